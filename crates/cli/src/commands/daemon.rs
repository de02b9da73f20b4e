// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `doorman daemon`: look at the doormand PID file and log, or stop it

use anyhow::{anyhow, Context, Result};
use clap::Subcommand;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::client::{self, DaemonClient, LiveStatus};
use crate::output::{self, OutputFormat};

/// Startup marker prefix that doormand writes to its log before anything else.
/// Full format: "--- doormand: starting (pid: 12345) ---"
const STARTUP_MARKER_PREFIX: &str = "--- doormand: starting (pid: ";

#[derive(clap::Args)]
pub struct DaemonArgs {
    #[command(subcommand)]
    pub command: DaemonCommand,
}

#[derive(Subcommand)]
pub enum DaemonCommand {
    /// Show whether doormand is running
    Status {
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Print the log of the latest startup
    Log {
        /// Only lines reporting errors
        #[arg(long)]
        errors: bool,
    },
    /// Ask doormand to shut down
    Stop,
}

#[derive(Serialize)]
struct DaemonStatus {
    state_dir: PathBuf,
    pid: Option<u32>,
    running: bool,
    log: PathBuf,
    startup_error: Option<String>,
    live: Option<LiveStatus>,
}

impl fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.pid, self.running) {
            (Some(pid), true) => writeln!(f, "doormand running (pid {})", pid)?,
            (Some(pid), false) => writeln!(f, "doormand not running (stale pid {})", pid)?,
            (None, _) => writeln!(f, "doormand not running")?,
        }
        writeln!(f, "  State: {}", self.state_dir.display())?;
        writeln!(f, "  Log: {}", self.log.display())?;
        if let Some(live) = &self.live {
            writeln!(f, "  Uptime: {}", output::age(live.uptime_secs))?;
            writeln!(
                f,
                "  Doors: {}  Nodes: {} ({} eligible)",
                live.doors, live.nodes, live.available_nodes
            )?;
            writeln!(
                f,
                "  Instances: {}  Queued: {}  Locks: {}",
                live.instances, live.queued, live.locks
            )?;
            if live.events_dropped > 0 {
                writeln!(f, "  Events dropped: {}", live.events_dropped)?;
            }
        }
        if let Some(error) = &self.startup_error {
            writeln!(f, "  Last startup failed: {}", error)?;
        }
        Ok(())
    }
}

pub async fn handle(args: DaemonArgs) -> Result<()> {
    let state_dir = client::state_dir()?;
    let log = state_dir.join("doormand.log");

    match args.command {
        DaemonCommand::Status { format } => {
            let pid = read_daemon_pid(&state_dir.join("doormand.pid"));
            let running = pid.is_some_and(process_exists);
            let live = match DaemonClient::connect() {
                Ok(client) if running => client.status().await.ok(),
                _ => None,
            };
            let status = DaemonStatus {
                startup_error: if running {
                    None
                } else {
                    read_startup_error(&log)
                },
                state_dir,
                pid,
                running,
                log,
                live,
            };
            output::print(&status, format);
        }
        DaemonCommand::Log { errors } => {
            let content = std::fs::read_to_string(&log)
                .with_context(|| format!("cannot read {}", log.display()))?;
            let latest = latest_startup(&content)
                .ok_or_else(|| anyhow!("no startup recorded in {}", log.display()))?;
            for line in latest.lines() {
                if !errors || is_error_line(line) {
                    println!("{}", line);
                }
            }
        }
        DaemonCommand::Stop => {
            DaemonClient::connect()?.shutdown().await?;
            println!("doormand stopping");
        }
    }
    Ok(())
}

fn read_daemon_pid(pid_path: &Path) -> Option<u32> {
    std::fs::read_to_string(pid_path)
        .ok()
        .and_then(|content| content.trim().parse::<u32>().ok())
}

/// Check if a process with the given PID exists
fn process_exists(pid: u32) -> bool {
    // kill -0 checks existence without sending a signal
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// The log from the last startup marker on
fn latest_startup(content: &str) -> Option<&str> {
    content
        .rfind(STARTUP_MARKER_PREFIX)
        .map(|start| &content[start..])
}

fn is_error_line(line: &str) -> bool {
    line.contains(" ERROR ") || line.starts_with("ERROR ")
}

/// Error lines of the latest startup, stripped of their timestamp and level
fn read_startup_error(log_path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(log_path).ok()?;
    let messages: Vec<&str> = latest_startup(&content)?
        .lines()
        .filter(|line| is_error_line(line))
        .map(|line| line.split_once(": ").map_or(line, |(_, msg)| msg))
        .collect();

    if messages.is_empty() {
        None
    } else {
        Some(messages.join("\n"))
    }
}
