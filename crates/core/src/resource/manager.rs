// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource table guarded by a single readers/writer lock

use super::lock::{DoorResource, LockMode, ResourceLock};
use super::ResourceError;
use crate::clock::{Clock, SystemClock};
use crate::config::ResourceConfig;
use crate::emitter::EventEmitter;
use crate::event::Event;
use crate::id::{DoorId, IdGen, InstanceId, LockId, NodeId, UserId, UuidIdGen};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Parameters of a lock acquisition
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockRequest {
    pub resource_id: String,
    pub door_id: DoorId,
    pub instance_id: InstanceId,
    pub node_id: NodeId,
    pub user_id: UserId,
    pub mode: LockMode,
    /// Zero selects the configured default
    pub timeout: Duration,
}

impl LockRequest {
    pub fn new(
        resource_id: impl Into<String>,
        door_id: DoorId,
        instance_id: InstanceId,
        node_id: NodeId,
        user_id: UserId,
        mode: LockMode,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            door_id,
            instance_id,
            node_id,
            user_id,
            mode,
            timeout: Duration::ZERO,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Two doors whose held resource sets overlap
///
/// Best-effort pairwise check: cycles through three or more doors are not seen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadlockCandidate {
    pub first: DoorId,
    pub second: DoorId,
    pub resources: Vec<String>,
}

/// Outcome of one lock-expiry tick
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LockSweep {
    pub expired: usize,
    pub deadlocks: Vec<DeadlockCandidate>,
}

#[derive(Debug, Default)]
struct ResourceTable {
    resources: HashMap<String, DoorResource>,
    /// Lock id to owning resource id
    lock_index: HashMap<LockId, String>,
}

impl ResourceTable {
    fn remove_lock(&mut self, lock_id: &LockId) -> Result<ResourceLock, ResourceError> {
        let resource_id = self
            .lock_index
            .remove(lock_id)
            .ok_or_else(|| ResourceError::LockNotFound(lock_id.clone()))?;
        let resource = self.resources.get_mut(&resource_id).ok_or_else(|| {
            ResourceError::Internal(format!(
                "lock {} indexed under missing resource {}",
                lock_id, resource_id
            ))
        })?;
        resource.remove_lock(lock_id).ok_or_else(|| {
            ResourceError::Internal(format!(
                "lock {} indexed under {} but not held there",
                lock_id, resource_id
            ))
        })
    }

    fn locks(&self) -> impl Iterator<Item = &ResourceLock> {
        self.resources.values().flat_map(|r| r.locks.iter())
    }
}

/// Tracks resources and the locks held on them
pub struct ResourceManager<C: Clock = SystemClock, I: IdGen = UuidIdGen> {
    table: RwLock<ResourceTable>,
    config: ResourceConfig,
    events: EventEmitter,
    clock: C,
    id_gen: I,
}

impl ResourceManager {
    pub fn new(config: ResourceConfig, events: EventEmitter) -> Self {
        Self::with_clock(config, events, SystemClock, UuidIdGen)
    }
}

impl<C: Clock, I: IdGen> ResourceManager<C, I> {
    pub fn with_clock(config: ResourceConfig, events: EventEmitter, clock: C, id_gen: I) -> Self {
        Self {
            table: RwLock::new(ResourceTable::default()),
            config,
            events,
            clock,
            id_gen,
        }
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, ResourceTable> {
        self.table.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ResourceTable> {
        self.table.write().unwrap_or_else(|e| e.into_inner())
    }

    // === Registration ===

    /// Add a resource. Any locks on the passed value are discarded.
    pub fn register_resource(&self, mut resource: DoorResource) -> Result<(), ResourceError> {
        if resource.id.is_empty() {
            return Err(ResourceError::EmptyResourceId);
        }
        let mut table = self.write();
        if table.resources.contains_key(&resource.id) {
            return Err(ResourceError::ResourceExists(resource.id));
        }
        resource.locks.clear();
        resource.current_locks = 0;
        tracing::debug!(
            resource_id = %resource.id,
            mode = %resource.mode,
            max_locks = resource.max_locks,
            "resource registered"
        );
        table.resources.insert(resource.id.clone(), resource);
        Ok(())
    }

    /// Register the resource unless one with the same id exists.
    ///
    /// Returns whether it was added.
    pub fn ensure_resource(&self, resource: DoorResource) -> Result<bool, ResourceError> {
        match self.register_resource(resource) {
            Ok(()) => Ok(true),
            Err(ResourceError::ResourceExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn unregister_resource(&self, resource_id: &str) -> Result<DoorResource, ResourceError> {
        let mut table = self.write();
        let resource = table
            .resources
            .get(resource_id)
            .ok_or_else(|| ResourceError::ResourceNotFound(resource_id.to_string()))?;
        if resource.current_locks > 0 {
            return Err(ResourceError::ActiveLocksExist {
                resource_id: resource_id.to_string(),
                locks: resource.current_locks,
            });
        }
        table
            .resources
            .remove(resource_id)
            .ok_or_else(|| ResourceError::ResourceNotFound(resource_id.to_string()))
    }

    // === Locks ===

    /// Zero means the default timeout; anything past the maximum is cut to it.
    pub fn normalize_timeout(&self, timeout: Duration) -> Duration {
        let timeout = if timeout.is_zero() {
            self.config.default_lock_timeout
        } else {
            timeout
        };
        timeout.min(self.config.max_lock_time)
    }

    pub fn acquire_lock(&self, request: LockRequest) -> Result<ResourceLock, ResourceError> {
        let lock = {
            let mut table = self.write();
            let resource = table
                .resources
                .get_mut(&request.resource_id)
                .ok_or_else(|| ResourceError::ResourceNotFound(request.resource_id.clone()))?;

            resource
                .check_compatible(request.mode)
                .map_err(|e| match e {
                    ResourceError::ResourceAlreadyLocked { resource_id, held } => {
                        ResourceError::IncompatibleLock {
                            resource_id,
                            requested: request.mode,
                            held,
                        }
                    }
                    other => other,
                })?;

            // Shared requests are exempt from the ceiling
            if request.mode != LockMode::Shared && resource.current_locks >= resource.max_locks {
                return Err(ResourceError::MaxLocksExceeded {
                    resource_id: resource.id.clone(),
                    max_locks: resource.max_locks,
                });
            }

            let lock = ResourceLock {
                id: LockId::new(self.id_gen.next()),
                resource_id: resource.id.clone(),
                door_id: request.door_id,
                instance_id: request.instance_id,
                node_id: request.node_id,
                user_id: request.user_id,
                acquired_at: self.clock.now(),
                acquired_wall: self.clock.wall(),
                mode: request.mode,
                timeout: self.normalize_timeout(request.timeout),
            };
            resource.push_lock(lock.clone());
            table
                .lock_index
                .insert(lock.id.clone(), lock.resource_id.clone());
            lock
        };

        tracing::debug!(
            lock_id = %lock.id,
            resource_id = %lock.resource_id,
            door_id = %lock.door_id,
            instance_id = %lock.instance_id,
            mode = %lock.mode,
            "lock acquired"
        );
        self.events.emit(Event::ResourceLocked {
            resource_id: lock.resource_id.clone(),
            lock_id: lock.id.clone(),
            door_id: lock.door_id.clone(),
            instance_id: lock.instance_id.clone(),
            mode: lock.mode,
        });
        Ok(lock)
    }

    pub fn release_lock(&self, lock_id: &LockId) -> Result<ResourceLock, ResourceError> {
        let lock = self.write().remove_lock(lock_id)?;
        tracing::debug!(lock_id = %lock.id, resource_id = %lock.resource_id, "lock released");
        self.emit_released(&lock);
        Ok(lock)
    }

    /// Restart the lock's timeout from now
    pub fn refresh_lock(&self, lock_id: &LockId) -> Result<(), ResourceError> {
        let now = self.clock.now();
        let mut table = self.write();
        let resource_id = table
            .lock_index
            .get(lock_id)
            .cloned()
            .ok_or_else(|| ResourceError::LockNotFound(lock_id.clone()))?;
        let lock = table
            .resources
            .get_mut(&resource_id)
            .and_then(|r| r.locks.iter_mut().find(|l| &l.id == lock_id))
            .ok_or_else(|| {
                ResourceError::Internal(format!("lock {} missing from {}", lock_id, resource_id))
            })?;
        if lock.is_expired(now) {
            return Err(ResourceError::LockTimeout(lock_id.clone()));
        }
        lock.acquired_at = now;
        Ok(())
    }

    /// Remove every lock that has outlived its timeout. Returns how many went.
    pub fn cleanup_expired_locks(&self) -> usize {
        let now = self.clock.now();
        let expired = {
            let mut table = self.write();
            let ids: Vec<LockId> = table
                .locks()
                .filter(|l| l.is_expired(now))
                .map(|l| l.id.clone())
                .collect();
            ids.iter()
                .filter_map(|id| match table.remove_lock(id) {
                    Ok(lock) => Some(lock),
                    Err(e) => {
                        tracing::error!(lock_id = %id, error = %e, "failed to remove expired lock");
                        None
                    }
                })
                .collect::<Vec<_>>()
        };

        for lock in &expired {
            tracing::info!(
                lock_id = %lock.id,
                resource_id = %lock.resource_id,
                door_id = %lock.door_id,
                instance_id = %lock.instance_id,
                "lock expired"
            );
            self.events.emit(Event::ResourceExpired {
                resource_id: lock.resource_id.clone(),
                lock_id: lock.id.clone(),
                door_id: lock.door_id.clone(),
                instance_id: lock.instance_id.clone(),
            });
        }
        expired.len()
    }

    /// Pairs of distinct doors that hold locks on at least one common resource
    pub fn detect_deadlocks(&self) -> Vec<DeadlockCandidate> {
        let held: BTreeMap<DoorId, BTreeSet<String>> = {
            let table = self.read();
            let mut held: BTreeMap<DoorId, BTreeSet<String>> = BTreeMap::new();
            for lock in table.locks() {
                held.entry(lock.door_id.clone())
                    .or_default()
                    .insert(lock.resource_id.clone());
            }
            held
        };

        let doors: Vec<_> = held.iter().collect();
        let mut candidates = Vec::new();
        for (i, (first, first_res)) in doors.iter().enumerate() {
            for (second, second_res) in &doors[i + 1..] {
                let shared: Vec<String> = first_res.intersection(second_res).cloned().collect();
                if !shared.is_empty() {
                    candidates.push(DeadlockCandidate {
                        first: (*first).clone(),
                        second: (*second).clone(),
                        resources: shared,
                    });
                }
            }
        }
        candidates
    }

    /// Drop every lock whose door matches `door` or whose instance matches `instance`
    pub fn force_release_locks(
        &self,
        door: Option<&DoorId>,
        instance: Option<&InstanceId>,
    ) -> Vec<ResourceLock> {
        let released = {
            let mut table = self.write();
            let ids: Vec<LockId> = table
                .locks()
                .filter(|l| {
                    door.is_some_and(|d| &l.door_id == d)
                        || instance.is_some_and(|i| &l.instance_id == i)
                })
                .map(|l| l.id.clone())
                .collect();
            ids.iter()
                .filter_map(|id| table.remove_lock(id).ok())
                .collect::<Vec<_>>()
        };

        for lock in &released {
            tracing::info!(
                lock_id = %lock.id,
                resource_id = %lock.resource_id,
                instance_id = %lock.instance_id,
                "lock force-released"
            );
            self.emit_released(lock);
        }
        released
    }

    /// Periodic sweep: expire locks, then look for suspicious lock overlap
    pub fn lock_expiry_tick(&self) -> LockSweep {
        let expired = self.cleanup_expired_locks();
        let deadlocks = if self.config.deadlock_detection {
            self.detect_deadlocks()
        } else {
            Vec::new()
        };

        for candidate in &deadlocks {
            tracing::warn!(
                first = %candidate.first,
                second = %candidate.second,
                resources = ?candidate.resources,
                "possible deadlock between doors"
            );
            self.events.emit(Event::DeadlockSuspected {
                first: candidate.first.clone(),
                second: candidate.second.clone(),
                resources: candidate.resources.clone(),
            });
        }
        LockSweep { expired, deadlocks }
    }

    fn emit_released(&self, lock: &ResourceLock) {
        self.events.emit(Event::ResourceReleased {
            resource_id: lock.resource_id.clone(),
            lock_id: lock.id.clone(),
            door_id: lock.door_id.clone(),
            instance_id: lock.instance_id.clone(),
        });
    }

    // === Queries (copies, never live references) ===

    pub fn resource_status(&self, resource_id: &str) -> Result<DoorResource, ResourceError> {
        self.read()
            .resources
            .get(resource_id)
            .cloned()
            .ok_or_else(|| ResourceError::ResourceNotFound(resource_id.to_string()))
    }

    /// Every resource, ordered by id
    pub fn all_resources(&self) -> Vec<DoorResource> {
        let mut resources: Vec<_> = self.read().resources.values().cloned().collect();
        resources.sort_by(|a, b| a.id.cmp(&b.id));
        resources
    }

    pub fn lock_info(&self, lock_id: &LockId) -> Result<ResourceLock, ResourceError> {
        let table = self.read();
        let resource_id = table
            .lock_index
            .get(lock_id)
            .ok_or_else(|| ResourceError::LockNotFound(lock_id.clone()))?;
        table
            .resources
            .get(resource_id)
            .and_then(|r| r.locks.iter().find(|l| &l.id == lock_id))
            .cloned()
            .ok_or_else(|| ResourceError::Internal(format!("lock {} not in table", lock_id)))
    }

    pub fn locks_for_door(&self, door: &DoorId) -> Vec<ResourceLock> {
        self.collect_locks(|l| &l.door_id == door)
    }

    pub fn locks_for_node(&self, node: NodeId) -> Vec<ResourceLock> {
        self.collect_locks(|l| l.node_id == node)
    }

    pub fn locks_for_instance(&self, instance: &InstanceId) -> Vec<ResourceLock> {
        self.collect_locks(|l| &l.instance_id == instance)
    }

    pub fn lock_count(&self) -> usize {
        self.read().lock_index.len()
    }

    fn collect_locks(&self, filter: impl Fn(&ResourceLock) -> bool) -> Vec<ResourceLock> {
        let mut locks: Vec<_> = self.read().locks().filter(|l| filter(l)).cloned().collect();
        locks.sort_by(|a, b| a.acquired_at.cmp(&b.acquired_at).then(a.id.cmp(&b.id)));
        locks
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
