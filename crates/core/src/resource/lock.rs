// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock modes, held locks and managed resources

use super::ResourceError;
use crate::id::{DoorId, InstanceId, LockId, NodeId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Access mode requested for a resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockMode {
    Shared,
    Exclusive,
    ReadOnly,
    WriteOnly,
}

impl LockMode {
    /// Compatibility matrix: shared only with shared, read-only only with
    /// read-only. Every other pairing conflicts.
    pub fn is_compatible_with(self, held: LockMode) -> bool {
        matches!(
            (self, held),
            (LockMode::Shared, LockMode::Shared) | (LockMode::ReadOnly, LockMode::ReadOnly)
        )
    }
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LockMode::Shared => "shared",
            LockMode::Exclusive => "exclusive",
            LockMode::ReadOnly => "read-only",
            LockMode::WriteOnly => "write-only",
        };
        f.write_str(name)
    }
}

impl FromStr for LockMode {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(LockMode::Shared),
            "exclusive" => Ok(LockMode::Exclusive),
            "read-only" | "readonly" => Ok(LockMode::ReadOnly),
            "write-only" | "writeonly" => Ok(LockMode::WriteOnly),
            _ => Err(ResourceError::InvalidLockMode(s.to_string())),
        }
    }
}

/// A lock held by one door instance on one resource
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceLock {
    pub id: LockId,
    pub resource_id: String,
    pub door_id: DoorId,
    pub instance_id: InstanceId,
    pub node_id: NodeId,
    pub user_id: UserId,
    pub acquired_at: Instant,
    pub acquired_wall: DateTime<Utc>,
    pub mode: LockMode,
    pub timeout: Duration,
}

impl ResourceLock {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.acquired_at) > self.timeout
    }
}

/// A managed resource and the locks currently held on it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DoorResource {
    pub id: String,
    /// Declared lock policy
    pub mode: LockMode,
    pub max_locks: usize,
    /// Always equal to `locks.len()`
    pub current_locks: usize,
    pub locks: Vec<ResourceLock>,
}

impl DoorResource {
    /// A single-holder exclusive resource
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mode: LockMode::Exclusive,
            max_locks: 1,
            current_locks: 0,
            locks: Vec::new(),
        }
    }

    pub fn with_mode(mut self, mode: LockMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_locks(mut self, max_locks: usize) -> Self {
        self.max_locks = max_locks;
        self
    }

    pub(super) fn push_lock(&mut self, lock: ResourceLock) {
        self.locks.push(lock);
        self.current_locks = self.locks.len();
    }

    pub(super) fn remove_lock(&mut self, lock_id: &LockId) -> Option<ResourceLock> {
        let index = self.locks.iter().position(|l| &l.id == lock_id)?;
        let lock = self.locks.remove(index);
        self.current_locks = self.locks.len();
        Some(lock)
    }

    /// Check a requested mode against every held mode
    pub(super) fn check_compatible(&self, requested: LockMode) -> Result<(), ResourceError> {
        match self.locks.iter().find(|l| !requested.is_compatible_with(l.mode)) {
            Some(held) => Err(ResourceError::ResourceAlreadyLocked {
                resource_id: self.id.clone(),
                held: held.mode,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
