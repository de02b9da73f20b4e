// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Versioned JSON snapshot of the coordinator tables
//!
//! Monotonic instants do not survive a restart, so the stored form keeps wall
//! clock times and durations instead.

use crate::clock::Clock;
use crate::coordinator::{Coordinator, DoorInstance, DoorQueueEntry, InstanceStatus};
use crate::id::{DoorId, IdGen, InstanceId, LockId, NodeId, UserId};
use crate::node::{NodePlacementState, NodeStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Schema version written into every snapshot
pub const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot version {found} is not supported (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorableState {
    pub version: u32,
    pub written_at: DateTime<Utc>,
    pub instances: Vec<StorableInstance>,
    pub queues: BTreeMap<DoorId, Vec<StorableQueueEntry>>,
    pub nodes: Vec<StorableNode>,
    #[serde(default)]
    pub events_dropped: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorableInstance {
    pub id: InstanceId,
    pub door_id: DoorId,
    pub node_id: NodeId,
    pub user_id: UserId,
    pub session_id: Option<String>,
    pub status: InstanceStatus,
    pub started_at: DateTime<Utc>,
    pub idle_secs: u64,
    pub timeout_secs: u64,
    pub lock_ids: Vec<LockId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorableQueueEntry {
    pub user_id: UserId,
    pub node_id: Option<NodeId>,
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    pub notified: bool,
    pub ready_node: Option<NodeId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorableNode {
    pub node_id: NodeId,
    pub status: NodeStatus,
    pub maintenance: bool,
    pub capacity: usize,
    pub load_score: f64,
    pub active_instances: Vec<InstanceId>,
}

impl StorableInstance {
    pub fn from_instance(instance: &DoorInstance, now: Instant) -> Self {
        Self {
            id: instance.id.clone(),
            door_id: instance.door_id.clone(),
            node_id: instance.node_id,
            user_id: instance.user_id.clone(),
            session_id: instance.session_id.clone(),
            status: instance.status,
            started_at: instance.started_wall,
            idle_secs: now.saturating_duration_since(instance.last_activity).as_secs(),
            timeout_secs: instance.timeout.as_secs(),
            lock_ids: instance.lock_ids.clone(),
        }
    }
}

impl From<&DoorQueueEntry> for StorableQueueEntry {
    fn from(entry: &DoorQueueEntry) -> Self {
        Self {
            user_id: entry.user_id.clone(),
            node_id: entry.node_id,
            priority: entry.priority,
            enqueued_at: entry.enqueued_wall,
            notified: entry.notified,
            ready_node: entry.ready_node,
        }
    }
}

impl From<&NodePlacementState> for StorableNode {
    fn from(node: &NodePlacementState) -> Self {
        Self {
            node_id: node.node_id,
            status: node.status,
            maintenance: node.maintenance,
            capacity: node.capacity,
            load_score: node.load_score,
            active_instances: node.active_instances.keys().cloned().collect(),
        }
    }
}

impl StorableState {
    /// Copy the coordinator's instance, queue and node tables
    pub fn capture<C: Clock, I: IdGen>(coordinator: &Coordinator<C, I>) -> Self {
        let now = coordinator.clock().now();
        let instances = coordinator
            .instances()
            .iter()
            .map(|i| StorableInstance::from_instance(i, now))
            .collect();

        let mut queues = BTreeMap::new();
        for door in coordinator.doors() {
            let entries = coordinator.queue_entries(&door.id);
            if !entries.is_empty() {
                queues.insert(door.id, entries.iter().map(StorableQueueEntry::from).collect());
            }
        }

        Self {
            version: CURRENT_VERSION,
            written_at: coordinator.clock().wall(),
            instances,
            queues,
            nodes: coordinator.nodes().iter().map(StorableNode::from).collect(),
            events_dropped: coordinator.events().dropped(),
        }
    }

    pub fn queued(&self) -> usize {
        self.queues.values().map(Vec::len).sum()
    }
}

#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

/// Snapshot file on disk
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the snapshot through a temporary file so readers never see a
    /// partial write
    pub fn save(&self, state: &StorableState) -> Result<(), SnapshotError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Read the snapshot, `None` if there is none yet
    pub fn load(&self) -> Result<Option<StorableState>, SnapshotError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&self.path)?;
        let header: VersionHeader = serde_json::from_str(&json)?;
        if header.version != CURRENT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: header.version,
                expected: CURRENT_VERSION,
            });
        }
        Ok(Some(serde_json::from_str(&json)?))
    }
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
