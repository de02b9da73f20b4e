// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Door access coordinator
//!
//! Owns door and node registrations, live instances and per-door queues, and
//! decides where (and whether) each door request runs.

mod instance;
mod maintenance;
mod manager;
mod placement;
mod queue;

pub use instance::{DoorInstance, InstanceStatus, Termination};
pub use maintenance::{CleanupReport, MaintenanceTask};
pub use manager::{AccessOutcome, Coordinator, CoordinatorStats, NodeUpdate};
pub use placement::{is_node_available_for_door, select_best_node, PlacementDecision, Strategy};
pub use queue::{DoorQueue, DoorQueueEntry};

use crate::id::{DoorId, InstanceId, NodeId, UserId};
use crate::resource::ResourceError;
use thiserror::Error;

/// Errors returned by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("door not found: {0}")]
    DoorNotFound(DoorId),

    #[error("door {0} is disabled")]
    DoorDisabled(DoorId),

    #[error("access to {door_id} denied: {reason}")]
    AccessDenied { door_id: DoorId, reason: String },

    #[error("{user_id} already has {door_id} running as {instance_id}")]
    AlreadyRunning {
        door_id: DoorId,
        user_id: UserId,
        instance_id: InstanceId,
    },

    /// The door is busy and its queue is not accepting entries
    #[error("door {0} is busy")]
    DoorBusy(DoorId),

    #[error("queue for {door_id} is full ({max_length} entries)")]
    QueueFull { door_id: DoorId, max_length: usize },

    #[error("{user_id} is already queued for {door_id}")]
    UserAlreadyQueued { door_id: DoorId, user_id: UserId },

    #[error("{user_id} is not queued for {door_id}")]
    UserNotQueued { door_id: DoorId, user_id: UserId },

    #[error("node {node_id} not available: {reason}")]
    NodeNotAvailable { node_id: NodeId, reason: String },

    #[error("door {door_id} already runs its maximum of {max_instances} instances")]
    MaxInstancesReached {
        door_id: DoorId,
        max_instances: usize,
    },

    #[error("no available nodes for {0}")]
    NoAvailableNodes(DoorId),

    #[error("node id {node_id} outside 1..={max_nodes}")]
    InvalidNodeId { node_id: NodeId, max_nodes: u32 },

    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("instance not found: {0}")]
    InstanceNotFound(InstanceId),

    #[error("instance {instance_id} cannot go from {from} to {to}")]
    InvalidTransition {
        instance_id: InstanceId,
        from: InstanceStatus,
        to: InstanceStatus,
    },

    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Coordinator tables disagree; a bug, not a normal failure
    #[error("internal coordinator error: {0}")]
    Internal(String),
}
