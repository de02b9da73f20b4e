// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! doorman - operator tool for the door access coordinator

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod commands;
mod completions;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{access, check, daemon, status};

#[derive(Parser)]
#[command(
    name = "doorman",
    version,
    about = "Door access coordinator - check configuration, inspect state and request doors"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration and door/node catalogue
    Check(check::CheckArgs),
    /// Show instances, nodes and queues from the latest snapshot
    Status(status::StatusArgs),
    /// Show the waiting users of one door
    Queue(status::QueueArgs),
    /// Request, release or queue for doors on the running doormand
    Access(access::AccessArgs),
    /// Inspect or stop the doormand process
    Daemon(daemon::DaemonArgs),
    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check(args) => check::handle(args),
        Commands::Status(args) => status::status(args),
        Commands::Queue(args) => status::queue(args),
        Commands::Access(args) => access::handle(args).await,
        Commands::Daemon(args) => daemon::handle(args).await,
        Commands::Completions(args) => {
            completions::generate_completions::<Cli>(args.shell);
            Ok(())
        }
    }
}
