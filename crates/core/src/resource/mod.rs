// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource lock manager
//!
//! Tracks named resources (data files, directories, devices) and the locks door
//! instances hold on them. It knows nothing about doors or nodes beyond the ids
//! each lock is tagged with.

mod lock;
mod manager;

pub use lock::{DoorResource, LockMode, ResourceLock};
pub use manager::{DeadlockCandidate, LockRequest, LockSweep, ResourceManager};

use crate::id::LockId;
use thiserror::Error;

/// Errors returned by the resource manager
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// Raised by the compatibility check, surfaced as `IncompatibleLock`
    #[error("resource {resource_id} already locked ({held})")]
    ResourceAlreadyLocked { resource_id: String, held: LockMode },

    #[error("lock not found: {0}")]
    LockNotFound(LockId),

    #[error("invalid lock mode: {0}")]
    InvalidLockMode(String),

    #[error("lock {0} has outlived its timeout")]
    LockTimeout(LockId),

    #[error("resource {resource_id} already holds its maximum of {max_locks} locks")]
    MaxLocksExceeded {
        resource_id: String,
        max_locks: usize,
    },

    #[error("{requested} lock on {resource_id} conflicts with a held {held} lock")]
    IncompatibleLock {
        resource_id: String,
        requested: LockMode,
        held: LockMode,
    },

    #[error("resource id must not be empty")]
    EmptyResourceId,

    #[error("resource already registered: {0}")]
    ResourceExists(String),

    #[error("resource {resource_id} still has {locks} active locks")]
    ActiveLocksExist { resource_id: String, locks: usize },

    /// Table invariant violated; a bug, not a normal failure
    #[error("resource table inconsistent: {0}")]
    Internal(String),
}
