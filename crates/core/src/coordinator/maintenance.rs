// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic maintenance for the coordinator
//!
//! Each tick is a single synchronous pass; the daemon decides how often to run
//! them. Ticks are safe to run concurrently with requests and with each other.

use super::instance::Termination;
use super::manager::Coordinator;
use super::CoordinatorError;
use crate::clock::Clock;
use crate::config::TickConfig;
use crate::id::{IdGen, InstanceId};
use crate::registry::NodeRegistry;
use crate::resource::LockSweep;
use std::sync::Arc;
use std::time::Duration;

/// What one cleanup pass removed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub timed_out: Vec<InstanceId>,
    pub queue_evicted: usize,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.timed_out.is_empty() && self.queue_evicted == 0
    }
}

/// Background maintenance passes over a shared coordinator
pub struct MaintenanceTask<C: Clock, I: IdGen> {
    coordinator: Arc<Coordinator<C, I>>,
    ticks: TickConfig,
    node_registry: Option<Arc<dyn NodeRegistry>>,
}

impl<C: Clock, I: IdGen> MaintenanceTask<C, I> {
    pub fn new(coordinator: Arc<Coordinator<C, I>>, ticks: TickConfig) -> Self {
        Self {
            coordinator,
            ticks,
            node_registry: None,
        }
    }

    /// Pull node statuses from `registry` on every coordination tick
    pub fn with_node_registry(mut self, registry: Arc<dyn NodeRegistry>) -> Self {
        self.node_registry = Some(registry);
        self
    }

    pub fn coordinator(&self) -> &Arc<Coordinator<C, I>> {
        &self.coordinator
    }

    /// Refresh node statuses and load scores, then offer free slots to queued
    /// users.
    ///
    /// Returns how many users were told a slot is ready.
    pub fn coordination_tick(&self) -> usize {
        if let Some(registry) = &self.node_registry {
            self.coordinator.refresh_node_statuses(registry.as_ref());
        }
        self.coordinator.recompute_loads();

        let mut notified = 0;
        for door_id in self.coordinator.doors_with_waiters() {
            match self.coordinator.process_queue(&door_id) {
                Ok(ready) => notified += ready.len(),
                Err(e) => {
                    tracing::warn!(door_id = %door_id, error = %e, "queue processing failed");
                }
            }
        }
        notified
    }

    /// Terminate instances past their timeout and evict stale queue entries
    pub fn cleanup_tick(&self) -> CleanupReport {
        let mut report = CleanupReport::default();

        for instance_id in self.coordinator.timed_out_instances() {
            match self
                .coordinator
                .force_terminate_instance(&instance_id, Termination::TimedOut)
            {
                Ok(_) => report.timed_out.push(instance_id),
                // Released between the scan and the termination
                Err(CoordinatorError::InstanceNotFound(_)) => {}
                Err(e) => {
                    tracing::error!(
                        instance_id = %instance_id,
                        error = %e,
                        "failed to terminate timed out instance"
                    );
                }
            }
        }
        report.queue_evicted = self.coordinator.expire_queue_entries();

        if !report.is_empty() {
            tracing::info!(
                timed_out = report.timed_out.len(),
                queue_evicted = report.queue_evicted,
                "cleanup pass"
            );
        }
        report
    }

    /// Reap expired locks and look for deadlock candidates
    pub fn lock_expiry_tick(&self) -> LockSweep {
        self.coordinator.resources().lock_expiry_tick()
    }

    pub fn coordination_interval(&self) -> Duration {
        self.ticks.coordination
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.ticks.cleanup
    }

    pub fn sync_interval(&self) -> Duration {
        self.ticks.sync
    }

    pub fn lock_expiry_interval(&self) -> Duration {
        self.ticks.lock_expiry
    }
}

#[cfg(test)]
#[path = "maintenance_tests.rs"]
mod tests;
