// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle events consumed by the event sink

use crate::id::{DoorId, InstanceId, LockId, NodeId, UserId};
use crate::resource::LockMode;
use serde::{Deserialize, Serialize};

/// Events emitted by the coordinator and the resource manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // Door instance events
    DoorLaunched {
        instance_id: InstanceId,
        door_id: DoorId,
        node_id: NodeId,
        user_id: UserId,
    },
    DoorFinished {
        instance_id: InstanceId,
        door_id: DoorId,
        node_id: NodeId,
        user_id: UserId,
        runtime_secs: u64,
    },
    DoorCrashed {
        instance_id: InstanceId,
        door_id: DoorId,
        node_id: NodeId,
        user_id: UserId,
        reason: String,
    },
    DoorTimedOut {
        instance_id: InstanceId,
        door_id: DoorId,
        node_id: NodeId,
        user_id: UserId,
        age_secs: u64,
    },
    DoorKilled {
        instance_id: InstanceId,
        door_id: DoorId,
        node_id: NodeId,
        user_id: UserId,
    },

    // Placement events
    DoorFailover {
        door_id: DoorId,
        user_id: UserId,
        preferred: NodeId,
        selected: NodeId,
    },
    DoorLoadBalanced {
        door_id: DoorId,
        user_id: UserId,
        node_id: NodeId,
        candidates: usize,
    },

    // Queue events
    QueueAdded {
        door_id: DoorId,
        user_id: UserId,
        position: usize,
        priority: i32,
    },
    QueueRemoved {
        door_id: DoorId,
        user_id: UserId,
        reason: String,
    },
    QueueTimedOut {
        door_id: DoorId,
        user_id: UserId,
        waited_secs: u64,
    },
    QueueReady {
        door_id: DoorId,
        user_id: UserId,
        node_id: NodeId,
    },

    // Node events
    NodeAvailable {
        node_id: NodeId,
    },
    NodeUnavailable {
        node_id: NodeId,
        reason: String,
    },

    // Resource events
    ResourceLocked {
        resource_id: String,
        lock_id: LockId,
        door_id: DoorId,
        instance_id: InstanceId,
        mode: LockMode,
    },
    ResourceReleased {
        resource_id: String,
        lock_id: LockId,
        door_id: DoorId,
        instance_id: InstanceId,
    },
    ResourceExpired {
        resource_id: String,
        lock_id: LockId,
        door_id: DoorId,
        instance_id: InstanceId,
    },
    DeadlockSuspected {
        first: DoorId,
        second: DoorId,
        resources: Vec<String>,
    },
}

impl Event {
    /// Event name in `category:action` form, used for pattern matching
    pub fn name(&self) -> &'static str {
        match self {
            Event::DoorLaunched { .. } => "door:launch",
            Event::DoorFinished { .. } => "door:finish",
            Event::DoorCrashed { .. } => "door:crash",
            Event::DoorTimedOut { .. } => "door:timeout",
            Event::DoorKilled { .. } => "door:killed",
            Event::DoorFailover { .. } => "door:failover",
            Event::DoorLoadBalanced { .. } => "door:load-balance",
            Event::QueueAdded { .. } => "queue:add",
            Event::QueueRemoved { .. } => "queue:remove",
            Event::QueueTimedOut { .. } => "queue:timeout",
            Event::QueueReady { .. } => "queue:ready",
            Event::NodeAvailable { .. } => "node:available",
            Event::NodeUnavailable { .. } => "node:unavailable",
            Event::ResourceLocked { .. } => "resource:lock",
            Event::ResourceReleased { .. } => "resource:release",
            Event::ResourceExpired { .. } => "resource:expire",
            Event::DeadlockSuspected { .. } => "resource:deadlock",
        }
    }
}

/// Pattern over event names
///
/// `*` matches everything, a trailing `:` or `*` matches by prefix,
/// anything else must match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventPattern(String);

impl EventPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn matches(&self, event_name: &str) -> bool {
        let pattern = self.0.as_str();
        if pattern == "*" {
            return true;
        }

        if pattern.ends_with(':') || pattern.ends_with('*') {
            let prefix = pattern.trim_end_matches('*').trim_end_matches(':');
            return event_name.starts_with(prefix);
        }

        event_name == pattern
    }
}
