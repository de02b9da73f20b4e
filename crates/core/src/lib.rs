// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! doorman-core: door access coordination for a multi-node BBS
//!
//! This crate provides:
//! - The coordinator: door instances, per-door wait queues and node placement
//! - The resource manager: typed locks on door data files and devices
//! - A bounded event channel and the event model
//! - Configuration, collaborator traits and snapshot storage

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod door;
pub mod emitter;
pub mod event;
pub mod id;
pub mod node;
pub mod registry;
pub mod resource;
pub mod storage;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{ConfigError, DoormanConfig};
pub use coordinator::{
    AccessOutcome, Coordinator, CoordinatorError, DoorInstance, InstanceStatus, MaintenanceTask,
};
pub use door::{DoorRegistration, MultiNodePolicy, SessionContext, UserContext};
pub use emitter::{EventEmitter, EventReceiver};
pub use event::{Event, EventPattern};
pub use id::{DoorId, IdGen, InstanceId, LockId, NodeId, SequentialIdGen, UserId, UuidIdGen};
pub use node::{NodeCapabilities, NodePreferences, NodeStatus};
pub use registry::{Catalog, DoorRegistry, EventSink, NodeRegistry};
pub use resource::{LockMode, ResourceError, ResourceManager};
pub use storage::{SnapshotStore, StorableState};
