// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `doorman check`: validate a configuration without starting the daemon

use anyhow::{bail, Context, Result};
use doorman_core::emitter;
use doorman_core::{Catalog, Coordinator, DoormanConfig, ResourceManager, SystemClock};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::output::{self, OutputFormat};

#[derive(clap::Args)]
pub struct CheckArgs {
    /// Configuration file to check
    #[arg(default_value = "doorman.toml")]
    pub config: PathBuf,

    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Serialize)]
struct CheckReport {
    config: PathBuf,
    snapshot: PathBuf,
    doors: Vec<DoorLine>,
    nodes: usize,
    eligible_nodes: usize,
    resources: usize,
}

#[derive(Serialize)]
struct DoorLine {
    id: String,
    policy: String,
    max_instances: usize,
    enabled: bool,
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "OK: {}", self.config.display())?;
        writeln!(f, "  Doors: {}", self.doors.len())?;
        for door in &self.doors {
            writeln!(
                f,
                "    {:<16} {:<20} max={:<3}{}",
                output::column(&door.id, 16),
                door.policy,
                door.max_instances,
                if door.enabled { "" } else { " (disabled)" }
            )?;
        }
        writeln!(f, "  Nodes: {} ({} eligible)", self.nodes, self.eligible_nodes)?;
        writeln!(f, "  Resources: {}", self.resources)?;
        writeln!(f, "  Snapshot: {}", self.snapshot.display())
    }
}

pub fn handle(args: CheckArgs) -> Result<()> {
    let text = std::fs::read_to_string(&args.config)
        .with_context(|| format!("cannot read {}", args.config.display()))?;
    let settings = DoormanConfig::from_toml_str(&text)
        .with_context(|| format!("cannot parse {}", args.config.display()))?;

    let problems = settings.validate();
    if !problems.is_empty() {
        for problem in &problems {
            eprintln!("  - {}", problem);
        }
        bail!("{} problem(s) in {}", problems.len(), args.config.display());
    }

    // Register the catalogue into a throwaway coordinator
    let (events, _rx) = emitter::channel(settings.events.capacity);
    let resources = Arc::new(ResourceManager::new(settings.resources.clone(), events.clone()));
    let coordinator = Coordinator::new(
        settings.coordinator.clone(),
        settings.queue.clone(),
        resources,
        events,
        SystemClock,
    );
    let catalog = Catalog::from_config(&settings);
    coordinator
        .register_doors_from(&catalog)
        .context("door catalogue rejected")?;
    coordinator
        .register_nodes_from(&catalog)
        .context("node catalogue rejected")?;

    let stats = coordinator.stats();
    let report = CheckReport {
        snapshot: DoormanConfig::resolve(&args.config, &settings.storage.snapshot_path),
        config: args.config,
        doors: coordinator
            .doors()
            .into_iter()
            .map(|door| DoorLine {
                id: door.id.to_string(),
                policy: door.policy.to_string(),
                max_instances: door.max_instances,
                enabled: door.enabled,
            })
            .collect(),
        nodes: stats.nodes,
        eligible_nodes: stats.available_nodes,
        resources: coordinator.resources().all_resources().len(),
    };
    output::print(&report, args.format);
    Ok(())
}
