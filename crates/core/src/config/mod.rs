// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration file
//!
//! One TOML document holds the tunables of every component plus the door and
//! node catalogues (`[[door]]`, `[[node]]`). Every key is optional.

mod alert;

pub use alert::{AlertLevel, AlertRules};

use crate::door::DoorRegistration;
use crate::event::EventPattern;
use crate::id::NodeId;
use crate::node::{NodeCapabilities, NodePreferences, NodeStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Coordinator tunables
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Node ids accepted by registration are `1..=max_nodes`
    pub max_nodes: u32,
    /// Node statuses that take part in placement
    pub eligible_statuses: Vec<NodeStatus>,
    /// Weighted random placement for multi-user doors
    pub load_balancing: bool,
    /// Instances older than this are terminated by the cleanup tick
    #[serde(with = "humantime_serde")]
    pub instance_timeout: Duration,
    /// Queue entries examined per door on each pass
    pub queue_drain_batch: usize,
    pub default_node_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_nodes: 32,
            eligible_statuses: vec![NodeStatus::Available, NodeStatus::InLogin],
            load_balancing: true,
            instance_timeout: Duration::from_secs(4 * 3600),
            queue_drain_batch: 5,
            default_node_capacity: 10,
        }
    }
}

/// Per-door queue settings, applied to every queue
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_length: usize,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub enabled: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_length: 50,
            timeout: Duration::from_secs(5 * 60),
            enabled: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    #[serde(with = "humantime_serde")]
    pub default_lock_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub max_lock_time: Duration,
    pub deadlock_detection: bool,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            default_lock_timeout: Duration::from_secs(30 * 60),
            max_lock_time: Duration::from_secs(8 * 3600),
            deadlock_detection: true,
        }
    }
}

/// Periods of the background ticks
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    #[serde(with = "humantime_serde")]
    pub coordination: Duration,
    #[serde(with = "humantime_serde")]
    pub cleanup: Duration,
    #[serde(with = "humantime_serde")]
    pub sync: Duration,
    #[serde(with = "humantime_serde")]
    pub lock_expiry: Duration,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            coordination: Duration::from_secs(5),
            cleanup: Duration::from_secs(60),
            sync: Duration::from_secs(30),
            lock_expiry: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Pending events buffered before new ones are dropped
    pub capacity: usize,
    /// Events logged at warn level
    pub alert_on: Vec<EventPattern>,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            alert_on: ["door:crash", "door:timeout", "queue:timeout"]
                .into_iter()
                .map(EventPattern::new)
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Relative paths resolve against the config file's directory
    pub snapshot_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("state/doorman.snapshot.json"),
        }
    }
}

fn default_node_status() -> NodeStatus {
    NodeStatus::Available
}

/// A `[[node]]` catalogue entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub id: NodeId,
    #[serde(default = "default_node_status")]
    pub status: NodeStatus,
    /// Falls back to `coordinator.default_node_capacity`
    #[serde(default)]
    pub capacity: Option<usize>,
    #[serde(default)]
    pub maintenance: bool,
    #[serde(flatten)]
    pub capabilities: NodeCapabilities,
    #[serde(flatten)]
    pub preferences: NodePreferences,
}

impl NodeEntry {
    pub fn new(id: u32) -> Self {
        Self {
            id: NodeId(id),
            status: default_node_status(),
            capacity: None,
            maintenance: false,
            capabilities: NodeCapabilities::default(),
            preferences: NodePreferences::default(),
        }
    }
}

/// The whole configuration file
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoormanConfig {
    pub coordinator: CoordinatorConfig,
    pub queue: QueueConfig,
    pub resources: ResourceConfig,
    pub ticks: TickConfig,
    pub events: EventConfig,
    pub storage: StorageConfig,
    #[serde(rename = "door")]
    pub doors: Vec<DoorRegistration>,
    #[serde(rename = "node")]
    pub nodes: Vec<NodeEntry>,
}

impl DoormanConfig {
    /// Read, parse and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        let problems = config.validate();
        if problems.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    /// Parse without validating
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Every problem found, empty when the configuration is usable
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.coordinator.max_nodes == 0 {
            problems.push("coordinator.max_nodes must be at least 1".to_string());
        }
        if self.coordinator.eligible_statuses.is_empty() {
            problems.push("coordinator.eligible_statuses is empty".to_string());
        }
        if self.queue.enabled && self.queue.max_length == 0 {
            problems.push("queue.max_length must be at least 1".to_string());
        }
        if self.resources.max_lock_time < self.resources.default_lock_timeout {
            problems.push(format!(
                "resources.max_lock_time ({}) is shorter than default_lock_timeout ({})",
                humantime::format_duration(self.resources.max_lock_time),
                humantime::format_duration(self.resources.default_lock_timeout)
            ));
        }
        for (name, period) in [
            ("coordination", self.ticks.coordination),
            ("cleanup", self.ticks.cleanup),
            ("sync", self.ticks.sync),
            ("lock_expiry", self.ticks.lock_expiry),
        ] {
            if period.is_zero() {
                problems.push(format!("ticks.{} must be non-zero", name));
            }
        }

        let mut door_ids = HashSet::new();
        for door in &self.doors {
            if door.id.as_str().is_empty() {
                problems.push("door with empty id".to_string());
            } else if !door_ids.insert(&door.id) {
                problems.push(format!("door {} declared twice", door.id));
            }
            if door.max_instances == 0 {
                problems.push(format!("door {}: max_instances must be at least 1", door.id));
            }
            if let Some(resource) = door
                .shared_resources
                .iter()
                .chain(&door.exclusive_resources)
                .find(|r| r.is_empty())
            {
                problems.push(format!("door {}: empty resource name {:?}", door.id, resource));
            }
            // Locks are held for the whole session, and max_lock_time caps them
            let session = door.time_limit.unwrap_or(self.coordinator.instance_timeout);
            let locks_anything =
                !door.shared_resources.is_empty() || !door.exclusive_resources.is_empty();
            if locks_anything && session > self.resources.max_lock_time {
                problems.push(format!(
                    "door {}: session limit ({}) outlives resources.max_lock_time ({})",
                    door.id,
                    humantime::format_duration(session),
                    humantime::format_duration(self.resources.max_lock_time)
                ));
            }
        }

        let mut node_ids = HashSet::new();
        for node in &self.nodes {
            if node.id.0 == 0 || node.id.0 > self.coordinator.max_nodes {
                problems.push(format!(
                    "node {} outside 1..={}",
                    node.id, self.coordinator.max_nodes
                ));
            }
            if !node_ids.insert(node.id) {
                problems.push(format!("node {} declared twice", node.id));
            }
            if !(0.0..=1.0).contains(&node.preferences.load_threshold) {
                problems.push(format!(
                    "node {}: load_threshold {} outside 0..=1",
                    node.id, node.preferences.load_threshold
                ));
            }
        }

        problems
    }

    /// Resolve a possibly relative path against the directory holding `config_path`
    pub fn resolve(config_path: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        config_path
            .parent()
            .map(|dir| dir.join(path))
            .unwrap_or_else(|| path.to_path_buf())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
