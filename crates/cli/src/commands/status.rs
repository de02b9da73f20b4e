// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `doorman status` and `doorman queue`: read the daemon's snapshot file

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use doorman_core::storage::StorableQueueEntry;
use doorman_core::{DoorId, DoormanConfig, SnapshotStore, StorableState};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use crate::output::{self, OutputFormat};

/// Where to find the snapshot
#[derive(clap::Args)]
pub struct SnapshotArgs {
    /// Configuration file naming the snapshot path
    #[arg(long, default_value = "doorman.toml")]
    pub config: PathBuf,

    /// Read this snapshot file instead of the configured one
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

impl SnapshotArgs {
    fn path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.snapshot {
            return Ok(path.clone());
        }
        let settings = DoormanConfig::load(&self.config)
            .with_context(|| format!("cannot load {}", self.config.display()))?;
        Ok(DoormanConfig::resolve(&self.config, &settings.storage.snapshot_path))
    }

    fn load(&self) -> Result<(PathBuf, StorableState)> {
        let path = self.path()?;
        let state = SnapshotStore::new(&path)
            .load()
            .with_context(|| format!("cannot read snapshot {}", path.display()))?
            .ok_or_else(|| anyhow!("no snapshot at {} (has doormand run?)", path.display()))?;
        Ok((path, state))
    }
}

#[derive(clap::Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub source: SnapshotArgs,
}

#[derive(clap::Args)]
pub struct QueueArgs {
    /// Door whose queue to show
    pub door: String,

    #[command(flatten)]
    pub source: SnapshotArgs,
}

#[derive(Serialize)]
struct StatusView {
    snapshot: PathBuf,
    #[serde(flatten)]
    state: StorableState,
}

impl fmt::Display for StatusView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = &self.state;
        writeln!(
            f,
            "Snapshot: {} (written {})",
            self.snapshot.display(),
            state.written_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;

        if state.instances.is_empty() {
            writeln!(f, "No instances")?;
        } else {
            writeln!(f, "Instances: {}", state.instances.len())?;
            writeln!(
                f,
                "  {:<12} {:<16} {:<5} {:<16} {:<10} AGE",
                "ID", "DOOR", "NODE", "USER", "STATUS"
            )?;
            for i in &state.instances {
                writeln!(
                    f,
                    "  {:<12} {:<16} {:<5} {:<16} {:<10} {}",
                    output::column(i.id.as_str(), 12),
                    output::column(i.door_id.as_str(), 16),
                    i.node_id.to_string(),
                    output::column(i.user_id.as_str(), 16),
                    i.status.to_string(),
                    output::age(seconds_between(i.started_at, state.written_at))
                )?;
            }
        }

        if state.nodes.is_empty() {
            writeln!(f, "No nodes")?;
        } else {
            writeln!(f, "Nodes:")?;
            writeln!(f, "  {:<5} {:<10} {:<6} ACTIVE", "NODE", "STATUS", "LOAD")?;
            for n in &state.nodes {
                writeln!(
                    f,
                    "  {:<5} {:<10} {:<6.2} {}/{}{}",
                    n.node_id.to_string(),
                    n.status.to_string(),
                    n.load_score,
                    n.active_instances.len(),
                    n.capacity,
                    if n.maintenance { " (maintenance)" } else { "" }
                )?;
            }
        }

        if state.queues.is_empty() {
            writeln!(f, "No users waiting")?;
        } else {
            writeln!(f, "Queues:")?;
            for (door, entries) in &state.queues {
                writeln!(f, "  {:<16} {} waiting", door.as_str(), entries.len())?;
            }
        }

        if state.events_dropped > 0 {
            writeln!(f, "Events dropped: {}", state.events_dropped)?;
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct QueueView {
    door_id: DoorId,
    #[serde(skip)]
    written_at: DateTime<Utc>,
    entries: Vec<StorableQueueEntry>,
}

impl fmt::Display for QueueView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return writeln!(f, "No users waiting for {}", self.door_id);
        }
        writeln!(f, "Queue for {}: {} waiting", self.door_id, self.entries.len())?;
        for (index, entry) in self.entries.iter().enumerate() {
            let state = match entry.ready_node {
                Some(node) => format!("ready on node {}", node),
                None => "waiting".to_string(),
            };
            writeln!(
                f,
                "  {:>3}. {:<16} pri={:<4} waited={:<8} {}",
                index + 1,
                output::column(entry.user_id.as_str(), 16),
                entry.priority,
                output::age(seconds_between(entry.enqueued_at, self.written_at)),
                state
            )?;
        }
        Ok(())
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_seconds()).unwrap_or(0)
}

pub fn status(args: StatusArgs) -> Result<()> {
    let (snapshot, state) = args.source.load()?;
    output::print(&StatusView { snapshot, state }, args.source.format);
    Ok(())
}

pub fn queue(args: QueueArgs) -> Result<()> {
    let (_, mut state) = args.source.load()?;
    let door_id = DoorId::new(args.door);
    let view = QueueView {
        entries: state.queues.remove(&door_id).unwrap_or_default(),
        written_at: state.written_at,
        door_id,
    };
    output::print(&view, args.source.format);
    Ok(())
}
