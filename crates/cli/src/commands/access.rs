// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `doorman access`: door requests and queue membership through doormand

use anyhow::Result;
use clap::Subcommand;
use doorman_core::storage::StorableInstance;
use doorman_core::{DoorId, InstanceId, NodeId, UserId};
use doorman_daemon::Caller;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::client::{Access, DaemonClient};
use crate::output::{self, OutputFormat};

#[derive(clap::Args)]
pub struct AccessArgs {
    #[command(subcommand)]
    pub command: AccessCommand,

    #[arg(long, value_enum, default_value = "text", global = true)]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum AccessCommand {
    /// Launch a door for a user, or queue them when no node is free
    Request {
        door: String,
        #[arg(long)]
        user: String,
        /// Node the user is calling from
        #[arg(long)]
        node: Option<u32>,
        #[arg(long, default_value_t = 10)]
        level: u32,
        /// Time the user has left online
        #[arg(long, default_value = "1h", value_parser = humantime::parse_duration)]
        time_left: Duration,
        #[arg(long, value_delimiter = ',')]
        flags: Vec<String>,
        /// Priority if the request ends up queued
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        priority: i32,
        #[arg(long)]
        session: Option<String>,
    },
    /// End a door session normally
    Release { instance: String },
    /// Kill a door instance and free its node and locks
    Terminate { instance: String },
    /// Put a user in a door's queue
    Join {
        door: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        node: Option<u32>,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        priority: i32,
    },
    /// Take a user out of a door's queue
    Leave {
        door: String,
        #[arg(long)]
        user: String,
    },
    /// Show a user's place in a door's queue
    Position {
        door: String,
        #[arg(long)]
        user: String,
    },
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Launched { instance } => writeln!(
                f,
                "Launched {} on node {} for {}",
                instance.id, instance.node_id, instance.user_id
            ),
            Access::Queued { position } => writeln!(f, "Queued at position {}", position),
        }
    }
}

#[derive(Serialize)]
struct Ended {
    instance: StorableInstance,
}

impl fmt::Display for Ended {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} {} (node {}, user {})",
            self.instance.id, self.instance.status, self.instance.node_id, self.instance.user_id
        )
    }
}

#[derive(Serialize)]
struct Place {
    door_id: DoorId,
    user_id: UserId,
    position: usize,
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} is #{} in the {} queue",
            self.user_id, self.position, self.door_id
        )
    }
}

pub async fn handle(args: AccessArgs) -> Result<()> {
    let client = DaemonClient::connect()?;
    let format = args.format;

    match args.command {
        AccessCommand::Request {
            door,
            user,
            node,
            level,
            time_left,
            flags,
            priority,
            session,
        } => {
            let caller = Caller {
                user_id: UserId::new(user),
                access_level: level,
                flags,
                time_remaining_secs: time_left.as_secs(),
                queue_priority: priority,
                session_id: session,
            };
            let access = client
                .request_access(DoorId::new(door), node.map(NodeId), caller)
                .await?;
            output::print(&access, format);
        }
        AccessCommand::Release { instance } => {
            let instance = client.release(InstanceId::new(instance)).await?;
            output::print(&Ended { instance }, format);
        }
        AccessCommand::Terminate { instance } => {
            let instance = client.terminate(InstanceId::new(instance)).await?;
            output::print(&Ended { instance }, format);
        }
        AccessCommand::Join {
            door,
            user,
            node,
            priority,
        } => {
            let (door_id, user_id) = (DoorId::new(door), UserId::new(user));
            let position = client
                .join_queue(door_id.clone(), user_id.clone(), node.map(NodeId), priority)
                .await?;
            output::print(
                &Place {
                    door_id,
                    user_id,
                    position,
                },
                format,
            );
        }
        AccessCommand::Leave { door, user } => {
            let (door_id, user_id) = (DoorId::new(door), UserId::new(user));
            client.leave_queue(door_id.clone(), user_id.clone()).await?;
            println!("{} left the {} queue", user_id, door_id);
        }
        AccessCommand::Position { door, user } => {
            let (door_id, user_id) = (DoorId::new(door), UserId::new(user));
            let position = client
                .queue_position(door_id.clone(), user_id.clone())
                .await?;
            output::print(
                &Place {
                    door_id,
                    user_id,
                    position,
                },
                format,
            );
        }
    }
    Ok(())
}
