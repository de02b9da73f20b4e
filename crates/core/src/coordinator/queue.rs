// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-door wait queue
//!
//! Entries are ordered by descending priority, then by enqueue time. The order
//! is re-checked after every insertion.

use super::CoordinatorError;
use crate::config::QueueConfig;
use crate::id::{DoorId, NodeId, UserId};
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// A user waiting for a door
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DoorQueueEntry {
    pub user_id: UserId,
    /// Node the user asked from, used as the preferred node when retrying
    pub node_id: Option<NodeId>,
    pub enqueued_at: Instant,
    pub enqueued_wall: DateTime<Utc>,
    pub priority: i32,
    /// Set once the user has been told a slot is free
    pub notified: bool,
    pub ready_node: Option<NodeId>,
}

impl DoorQueueEntry {
    pub fn new(
        user_id: UserId,
        node_id: Option<NodeId>,
        priority: i32,
        enqueued_at: Instant,
        enqueued_wall: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            node_id,
            enqueued_at,
            enqueued_wall,
            priority,
            notified: false,
            ready_node: None,
        }
    }

    pub fn waited(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.enqueued_at)
    }

    /// Whether `self` belongs ahead of (or level with) `other`
    fn precedes(&self, other: &DoorQueueEntry) -> bool {
        self.priority > other.priority
            || (self.priority == other.priority && self.enqueued_at <= other.enqueued_at)
    }
}

#[derive(Clone, Debug)]
pub struct DoorQueue {
    door_id: DoorId,
    entries: Vec<DoorQueueEntry>,
    max_length: usize,
    timeout: Duration,
    enabled: bool,
}

impl DoorQueue {
    pub fn new(door_id: DoorId, config: &QueueConfig) -> Self {
        Self {
            door_id,
            entries: Vec::new(),
            max_length: config.max_length,
            timeout: config.timeout,
            enabled: config.enabled,
        }
    }

    pub fn door_id(&self) -> &DoorId {
        &self.door_id
    }

    pub fn entries(&self) -> &[DoorQueueEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Insert an entry, returning its 1-based position
    pub fn push(&mut self, entry: DoorQueueEntry) -> Result<usize, CoordinatorError> {
        if !self.enabled {
            return Err(CoordinatorError::DoorBusy(self.door_id.clone()));
        }
        if self.position(&entry.user_id).is_some() {
            return Err(CoordinatorError::UserAlreadyQueued {
                door_id: self.door_id.clone(),
                user_id: entry.user_id,
            });
        }
        if self.entries.len() >= self.max_length {
            return Err(CoordinatorError::QueueFull {
                door_id: self.door_id.clone(),
                max_length: self.max_length,
            });
        }

        let user_id = entry.user_id.clone();
        self.entries.push(entry);
        // Stable: equal priority and time keep insertion order
        self.entries.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.enqueued_at.cmp(&b.enqueued_at))
        });

        if !self.is_ordered() {
            return Err(CoordinatorError::Internal(format!(
                "queue for {} out of order after insert",
                self.door_id
            )));
        }

        self.position(&user_id).ok_or_else(|| {
            CoordinatorError::Internal(format!("{} vanished from queue {}", user_id, self.door_id))
        })
    }

    pub fn remove(&mut self, user: &UserId) -> Option<DoorQueueEntry> {
        let index = self.entries.iter().position(|e| &e.user_id == user)?;
        Some(self.entries.remove(index))
    }

    /// 1-based position of the user
    pub fn position(&self, user: &UserId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| &e.user_id == user)
            .map(|i| i + 1)
    }

    /// Up to `limit` entries that have not been notified yet, in queue order
    pub fn pending(&self, limit: usize) -> Vec<DoorQueueEntry> {
        self.entries
            .iter()
            .filter(|e| !e.notified)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn mark_ready(&mut self, user: &UserId, node: NodeId) -> bool {
        match self.entries.iter_mut().find(|e| &e.user_id == user) {
            Some(entry) => {
                entry.notified = true;
                entry.ready_node = Some(node);
                true
            }
            None => false,
        }
    }

    /// Drop a promise so the entry is offered the next free slot again.
    /// Returns the entry's position.
    pub fn clear_ready(&mut self, user: &UserId) -> Option<usize> {
        let index = self.entries.iter().position(|e| &e.user_id == user)?;
        let entry = &mut self.entries[index];
        entry.notified = false;
        entry.ready_node = None;
        Some(index + 1)
    }

    /// Remove and return entries that have waited longer than the queue timeout
    pub fn expire(&mut self, now: Instant) -> Vec<DoorQueueEntry> {
        let timeout = self.timeout;
        let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.waited(now) > timeout);
        self.entries = kept;
        expired
    }

    fn is_ordered(&self) -> bool {
        self.entries.windows(2).all(|w| w[0].precedes(&w[1]))
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
