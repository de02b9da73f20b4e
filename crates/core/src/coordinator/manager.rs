// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The coordinator
//!
//! Lock order: coordinator state, then a door queue, then the resource manager.
//! A queue lock is never held while the state lock is being taken.

use super::instance::{DoorInstance, InstanceStatus, Termination};
use super::placement::{select_best_node, unavailable_reason, PlacementDecision, Strategy};
use super::queue::{DoorQueue, DoorQueueEntry};
use super::CoordinatorError;
use crate::clock::{Clock, SystemClock};
use crate::config::{CoordinatorConfig, QueueConfig};
use crate::door::{DoorRegistration, MultiNodePolicy, SessionContext, UserContext};
use crate::emitter::EventEmitter;
use crate::event::Event;
use crate::id::{DoorId, IdGen, InstanceId, NodeId, UserId, UuidIdGen};
use crate::node::{NodeCapabilities, NodePlacementState, NodePreferences, NodeStatus};
use crate::registry::{DoorRegistry, NodeRegistry};
use crate::resource::{DoorResource, LockMode, LockRequest, ResourceError, ResourceManager};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;

/// Result of a door request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessOutcome {
    Launched(DoorInstance),
    /// No node could take the door; the user is waiting at this 1-based position
    Queued { position: usize },
}

/// A node crossing between eligible and ineligible for placement
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeUpdate {
    pub node_id: NodeId,
    pub available: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub doors: usize,
    pub nodes: usize,
    pub available_nodes: usize,
    pub instances: BTreeMap<InstanceStatus, usize>,
    pub queued: BTreeMap<DoorId, usize>,
    pub locks: usize,
    pub events_dropped: u64,
}

#[derive(Debug, Default)]
struct CoordinatorState {
    doors: HashMap<DoorId, Arc<DoorRegistration>>,
    nodes: BTreeMap<NodeId, NodePlacementState>,
    instances: HashMap<InstanceId, DoorInstance>,
}

impl CoordinatorState {
    fn live_instance(&self, door: &DoorId, user: &UserId) -> Option<&DoorInstance> {
        self.instances
            .values()
            .find(|i| &i.door_id == door && &i.user_id == user)
    }

    /// Every instance of the door still in the table, suspended ones included
    fn door_instances(&self, door: &DoorId) -> usize {
        self.instances.values().filter(|i| &i.door_id == door).count()
    }
}

type QueueHandle = Arc<Mutex<DoorQueue>>;

/// Placeholder instance holding a slot promised to a queued user
fn reservation(door_id: &DoorId, user_id: &UserId) -> InstanceId {
    InstanceId::new(format!("reserved:{}:{}", door_id, user_id))
}

fn lock_queue(queue: &QueueHandle) -> MutexGuard<'_, DoorQueue> {
    queue.lock().unwrap_or_else(|e| e.into_inner())
}

/// Door access coordinator
pub struct Coordinator<C: Clock = SystemClock, I: IdGen = UuidIdGen> {
    config: CoordinatorConfig,
    queue_config: QueueConfig,
    state: RwLock<CoordinatorState>,
    queues: RwLock<HashMap<DoorId, QueueHandle>>,
    resources: Arc<ResourceManager<C, I>>,
    events: EventEmitter,
    clock: C,
    rng: Mutex<StdRng>,
    sequence: AtomicU64,
    queue_pump: Option<mpsc::Sender<DoorId>>,
}

impl<C: Clock, I: IdGen> Coordinator<C, I> {
    pub fn new(
        config: CoordinatorConfig,
        queue_config: QueueConfig,
        resources: Arc<ResourceManager<C, I>>,
        events: EventEmitter,
        clock: C,
    ) -> Self {
        Self {
            config,
            queue_config,
            state: RwLock::new(CoordinatorState::default()),
            queues: RwLock::new(HashMap::new()),
            resources,
            events,
            clock,
            rng: Mutex::new(StdRng::from_entropy()),
            sequence: AtomicU64::new(1),
            queue_pump: None,
        }
    }

    /// Deterministic weighted selection
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Hand queue processing after a release to whoever drains `pump`
    pub fn with_queue_pump(mut self, pump: mpsc::Sender<DoorId>) -> Self {
        self.queue_pump = Some(pump);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn resources(&self) -> &Arc<ResourceManager<C, I>> {
        &self.resources
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CoordinatorState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CoordinatorState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn queue(&self, door: &DoorId) -> Option<QueueHandle> {
        let queues = self.queues.read().unwrap_or_else(|e| e.into_inner());
        queues.get(door).cloned()
    }

    fn all_queues(&self) -> Vec<QueueHandle> {
        let queues = self.queues.read().unwrap_or_else(|e| e.into_inner());
        queues.values().cloned().collect()
    }

    // === Registration ===

    /// Store a door, creating its queue and resources on first sight.
    ///
    /// Registering an existing id replaces the registration.
    pub fn register_door(&self, door: DoorRegistration) -> Result<(), CoordinatorError> {
        for resource in &door.shared_resources {
            let resource = DoorResource::new(resource.clone()).with_mode(LockMode::Shared);
            self.resources.ensure_resource(resource)?;
        }
        for resource in &door.exclusive_resources {
            self.resources
                .ensure_resource(DoorResource::new(resource.clone()))?;
        }

        {
            let mut queues = self.queues.write().unwrap_or_else(|e| e.into_inner());
            queues.entry(door.id.clone()).or_insert_with(|| {
                Arc::new(Mutex::new(DoorQueue::new(door.id.clone(), &self.queue_config)))
            });
        }

        tracing::info!(
            door_id = %door.id,
            policy = %door.policy,
            enabled = door.enabled,
            "door registered"
        );
        self.write_state().doors.insert(door.id.clone(), Arc::new(door));
        Ok(())
    }

    pub fn register_doors_from(
        &self,
        registry: &dyn DoorRegistry,
    ) -> Result<usize, CoordinatorError> {
        let doors = registry.doors();
        let count = doors.len();
        for door in doors {
            self.register_door(door)?;
        }
        Ok(count)
    }

    /// Add a node with default capacity and preferences, or update the
    /// capabilities of a known one
    pub fn register_node(
        &self,
        node_id: NodeId,
        capabilities: NodeCapabilities,
    ) -> Result<(), CoordinatorError> {
        if node_id.0 == 0 || node_id.0 > self.config.max_nodes {
            return Err(CoordinatorError::InvalidNodeId {
                node_id,
                max_nodes: self.config.max_nodes,
            });
        }

        let mut state = self.write_state();
        match state.nodes.get_mut(&node_id) {
            Some(node) => node.capabilities = capabilities,
            None => {
                let node = NodePlacementState::new(
                    node_id,
                    capabilities,
                    self.config.default_node_capacity,
                );
                state.nodes.insert(node_id, node);
                tracing::info!(node_id = %node_id, "node registered");
                self.events.emit(Event::NodeAvailable { node_id });
            }
        }
        Ok(())
    }

    pub fn set_node_preferences(
        &self,
        node_id: NodeId,
        preferences: NodePreferences,
    ) -> Result<(), CoordinatorError> {
        let mut state = self.write_state();
        let node = state
            .nodes
            .get_mut(&node_id)
            .ok_or(CoordinatorError::NodeNotFound(node_id))?;
        node.preferences = preferences;
        Ok(())
    }

    pub fn set_node_capacity(
        &self,
        node_id: NodeId,
        capacity: usize,
    ) -> Result<(), CoordinatorError> {
        let mut state = self.write_state();
        let node = state
            .nodes
            .get_mut(&node_id)
            .ok_or(CoordinatorError::NodeNotFound(node_id))?;
        node.capacity = capacity;
        node.recompute_load();
        Ok(())
    }

    /// Register every node the registry knows, with its declared settings
    pub fn register_nodes_from(
        &self,
        registry: &dyn NodeRegistry,
    ) -> Result<usize, CoordinatorError> {
        let nodes = registry.nodes();
        for &node_id in &nodes {
            self.register_node(node_id, registry.capabilities(node_id).unwrap_or_default())?;
            if let Some(preferences) = registry.preferences(node_id) {
                self.set_node_preferences(node_id, preferences)?;
            }
            if let Some(capacity) = registry.capacity(node_id) {
                self.set_node_capacity(node_id, capacity)?;
            }
            if let Some(status) = registry.node_status(node_id) {
                self.set_node_status(node_id, status)?;
            }
            self.set_node_maintenance(node_id, registry.in_maintenance(node_id))?;
        }
        Ok(nodes.len())
    }

    /// Pull current statuses from the registry
    pub fn refresh_node_statuses(&self, registry: &dyn NodeRegistry) -> Vec<NodeUpdate> {
        let known: Vec<NodeId> = self.read_state().nodes.keys().copied().collect();
        known
            .into_iter()
            .filter_map(|node_id| {
                let status = registry.node_status(node_id)?;
                self.set_node_status(node_id, status).ok().flatten()
            })
            .collect()
    }

    pub fn set_node_status(
        &self,
        node_id: NodeId,
        status: NodeStatus,
    ) -> Result<Option<NodeUpdate>, CoordinatorError> {
        self.update_node(node_id, |node| node.status = status)
    }

    pub fn set_node_maintenance(
        &self,
        node_id: NodeId,
        maintenance: bool,
    ) -> Result<Option<NodeUpdate>, CoordinatorError> {
        self.update_node(node_id, |node| node.maintenance = maintenance)
    }

    /// Apply `change`, emitting an event if the node's eligibility flipped
    fn update_node(
        &self,
        node_id: NodeId,
        change: impl FnOnce(&mut NodePlacementState),
    ) -> Result<Option<NodeUpdate>, CoordinatorError> {
        let update = {
            let mut state = self.write_state();
            let node = state
                .nodes
                .get_mut(&node_id)
                .ok_or(CoordinatorError::NodeNotFound(node_id))?;
            let before = node.is_eligible(&self.config.eligible_statuses);
            change(node);
            let after = node.is_eligible(&self.config.eligible_statuses);
            if before == after {
                return Ok(None);
            }
            if after {
                self.events.emit(Event::NodeAvailable { node_id });
            } else {
                let reason = if node.maintenance {
                    "maintenance".to_string()
                } else {
                    format!("status {}", node.status)
                };
                self.events.emit(Event::NodeUnavailable { node_id, reason });
            }
            NodeUpdate {
                node_id,
                available: after,
            }
        };
        tracing::info!(
            node_id = %node_id,
            available = update.available,
            "node availability changed"
        );
        Ok(Some(update))
    }

    /// Remove a node that runs nothing
    pub fn unregister_node(
        &self,
        node_id: NodeId,
    ) -> Result<NodePlacementState, CoordinatorError> {
        let mut state = self.write_state();
        let owned = state
            .instances
            .values()
            .filter(|i| i.node_id == node_id)
            .count();
        if owned > 0 {
            return Err(CoordinatorError::NodeNotAvailable {
                node_id,
                reason: format!("{} instances still on node", owned),
            });
        }
        let node = state
            .nodes
            .remove(&node_id)
            .ok_or(CoordinatorError::NodeNotFound(node_id))?;
        self.events.emit(Event::NodeUnavailable {
            node_id,
            reason: "unregistered".to_string(),
        });
        Ok(node)
    }

    // === Access ===

    /// Launch the door for the user, or queue the user when no node can take it
    pub fn request_door_access(
        &self,
        door_id: &DoorId,
        preferred: Option<NodeId>,
        user_id: &UserId,
        user: &UserContext,
        session: &SessionContext,
    ) -> Result<AccessOutcome, CoordinatorError> {
        // A user told a slot is free goes back to the node picked for them
        let promised = self.ready_node(door_id, user_id);
        let preferred = preferred.or(promised);

        let instance = {
            let mut state = self.write_state();
            let door = state
                .doors
                .get(door_id)
                .cloned()
                .ok_or_else(|| CoordinatorError::DoorNotFound(door_id.clone()))?;
            if !door.enabled {
                return Err(CoordinatorError::DoorDisabled(door_id.clone()));
            }
            door.check_access(user)
                .map_err(|reason| CoordinatorError::AccessDenied {
                    door_id: door_id.clone(),
                    reason,
                })?;

            if let Some(existing) = state.live_instance(door_id, user_id) {
                return Err(CoordinatorError::AlreadyRunning {
                    door_id: door_id.clone(),
                    user_id: user_id.clone(),
                    instance_id: existing.id.clone(),
                });
            }

            // Slots promised to other queued users are not up for grabs
            let (nodes, reserved) = self.reserved_nodes(&state, door_id, Some(user_id));
            if door.policy == MultiNodePolicy::ExclusiveInstances
                && state.door_instances(door_id) + reserved >= door.max_instances
            {
                return Err(CoordinatorError::MaxInstancesReached {
                    door_id: door_id.clone(),
                    max_instances: door.max_instances,
                });
            }

            let decision = match self.select(&nodes, &door, preferred) {
                Ok(decision) => decision,
                Err(CoordinatorError::NoAvailableNodes(_)) if promised.is_some() => {
                    // Still queued: back to waiting at the same place
                    let position = self.withdraw_promise(door_id, user_id)?;
                    return Ok(AccessOutcome::Queued { position });
                }
                Err(CoordinatorError::NoAvailableNodes(_)) => {
                    let position =
                        self.enqueue(door_id, user_id, preferred, user.queue_priority)?;
                    return Ok(AccessOutcome::Queued { position });
                }
                Err(e) => return Err(e),
            };
            self.emit_placement(&door, user_id, preferred, &decision);
            self.launch(&mut state, &door, decision.node_id, user_id, session)?
        };

        if let Some(queue) = self.queue(door_id) {
            if lock_queue(&queue).remove(user_id).is_some() {
                self.events.emit(Event::QueueRemoved {
                    door_id: door_id.clone(),
                    user_id: user_id.clone(),
                    reason: "granted".to_string(),
                });
            }
        }
        Ok(AccessOutcome::Launched(instance))
    }

    /// The node table with every promised queue slot held, and how many of those
    /// promises are for `door_id`. The claimant's own promise on `door_id` stays free.
    fn reserved_nodes(
        &self,
        state: &CoordinatorState,
        door_id: &DoorId,
        claimant: Option<&UserId>,
    ) -> (BTreeMap<NodeId, NodePlacementState>, usize) {
        let mut nodes = state.nodes.clone();
        let mut reserved = 0;
        for queue in self.all_queues() {
            let queue = lock_queue(&queue);
            let own = queue.door_id() == door_id;
            for entry in queue.entries() {
                let Some(node_id) = entry.ready_node else {
                    continue;
                };
                if own && claimant == Some(&entry.user_id) {
                    continue;
                }
                if let Some(node) = nodes.get_mut(&node_id) {
                    let holder = reservation(queue.door_id(), &entry.user_id);
                    node.attach(holder, queue.door_id().clone());
                }
                if own {
                    reserved += 1;
                }
            }
        }
        (nodes, reserved)
    }

    /// A promised slot that can no longer be placed goes back to plain waiting
    fn withdraw_promise(
        &self,
        door_id: &DoorId,
        user_id: &UserId,
    ) -> Result<usize, CoordinatorError> {
        let queue = self.queue_for(door_id)?;
        let position = lock_queue(&queue).clear_ready(user_id).ok_or_else(|| {
            CoordinatorError::UserNotQueued {
                door_id: door_id.clone(),
                user_id: user_id.clone(),
            }
        })?;
        tracing::info!(
            door_id = %door_id,
            user_id = %user_id,
            position,
            "promised slot lost, back to waiting"
        );
        Ok(position)
    }

    fn select(
        &self,
        nodes: &BTreeMap<NodeId, NodePlacementState>,
        door: &DoorRegistration,
        preferred: Option<NodeId>,
    ) -> Result<PlacementDecision, CoordinatorError> {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        select_best_node(
            door,
            nodes,
            preferred,
            &self.config.eligible_statuses,
            self.config.load_balancing,
            &mut *rng,
        )
    }

    fn emit_placement(
        &self,
        door: &DoorRegistration,
        user_id: &UserId,
        preferred: Option<NodeId>,
        decision: &PlacementDecision,
    ) {
        tracing::debug!(
            door_id = %door.id,
            user_id = %user_id,
            node_id = %decision.node_id,
            strategy = ?decision.strategy,
            candidates = decision.candidates,
            "node selected"
        );
        if let Some(preferred) = preferred.filter(|p| *p != decision.node_id) {
            self.events.emit(Event::DoorFailover {
                door_id: door.id.clone(),
                user_id: user_id.clone(),
                preferred,
                selected: decision.node_id,
            });
        }
        if decision.strategy == Strategy::WeightedRandom {
            self.events.emit(Event::DoorLoadBalanced {
                door_id: door.id.clone(),
                user_id: user_id.clone(),
                node_id: decision.node_id,
                candidates: decision.candidates,
            });
        }
    }

    /// Acquire the door's resources and create the instance. All or nothing.
    fn launch(
        &self,
        state: &mut CoordinatorState,
        door: &DoorRegistration,
        node_id: NodeId,
        user_id: &UserId,
        session: &SessionContext,
    ) -> Result<DoorInstance, CoordinatorError> {
        if !state.nodes.contains_key(&node_id) {
            return Err(CoordinatorError::Internal(format!(
                "selected node {} is not registered",
                node_id
            )));
        }

        let now = self.clock.now();
        let wall = self.clock.wall();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let id = InstanceId::new(format!(
            "{}-n{}-{}-{}-{}",
            door.id,
            node_id,
            user_id,
            wall.timestamp_millis(),
            sequence
        ));
        let timeout = door.time_limit.unwrap_or(self.config.instance_timeout);

        let requests = door
            .shared_resources
            .iter()
            .map(|r| (r, LockMode::Shared))
            .chain(door.exclusive_resources.iter().map(|r| (r, LockMode::Exclusive)));

        let mut lock_ids = Vec::new();
        for (resource, mode) in requests {
            let request = LockRequest::new(
                resource.clone(),
                door.id.clone(),
                id.clone(),
                node_id,
                user_id.clone(),
                mode,
            )
            .with_timeout(timeout);
            match self.resources.acquire_lock(request) {
                Ok(lock) => lock_ids.push(lock.id),
                Err(e) => {
                    for lock_id in &lock_ids {
                        if let Err(err) = self.resources.release_lock(lock_id) {
                            tracing::error!(lock_id = %lock_id, error = %err, "rollback failed");
                        }
                    }
                    tracing::info!(
                        door_id = %door.id,
                        user_id = %user_id,
                        resource_id = %resource,
                        error = %e,
                        "launch refused, resource unavailable"
                    );
                    return Err(e.into());
                }
            }
        }

        let mut instance = DoorInstance {
            id: id.clone(),
            door_id: door.id.clone(),
            node_id,
            user_id: user_id.clone(),
            session_id: session.session_id.clone(),
            started_at: now,
            last_activity: now,
            started_wall: wall,
            lock_ids,
            status: InstanceStatus::Starting,
            timeout,
        };
        instance.transition(InstanceStatus::Running)?;

        if let Some(node) = state.nodes.get_mut(&node_id) {
            node.attach(id.clone(), door.id.clone());
        }
        state.instances.insert(id.clone(), instance.clone());

        tracing::info!(
            instance_id = %id,
            door_id = %door.id,
            node_id = %node_id,
            user_id = %user_id,
            "door launched"
        );
        self.events.emit(Event::DoorLaunched {
            instance_id: id,
            door_id: door.id.clone(),
            node_id,
            user_id: user_id.clone(),
        });
        Ok(instance)
    }

    /// Normal end of a door session
    pub fn release_door_access(
        &self,
        instance_id: &InstanceId,
    ) -> Result<DoorInstance, CoordinatorError> {
        let instance = {
            let mut state = self.write_state();
            self.finish_instance(&mut state, instance_id, InstanceStatus::Finished)?
        };

        let runtime = self.clock.since(instance.started_at);
        tracing::info!(
            instance_id = %instance.id,
            door_id = %instance.door_id,
            runtime_secs = runtime.as_secs(),
            "door finished"
        );
        self.events.emit(Event::DoorFinished {
            instance_id: instance.id.clone(),
            door_id: instance.door_id.clone(),
            node_id: instance.node_id,
            user_id: instance.user_id.clone(),
            runtime_secs: runtime.as_secs(),
        });
        self.schedule_queue(&instance.door_id);
        Ok(instance)
    }

    /// Tear down an instance that did not end normally
    pub fn force_terminate_instance(
        &self,
        instance_id: &InstanceId,
        termination: Termination,
    ) -> Result<DoorInstance, CoordinatorError> {
        let instance = {
            let mut state = self.write_state();
            let instance = self.finish_instance(&mut state, instance_id, termination.status())?;
            self.resources.force_release_locks(None, Some(instance_id));
            instance
        };

        let age = instance.age(self.clock.now());
        tracing::warn!(
            instance_id = %instance.id,
            door_id = %instance.door_id,
            node_id = %instance.node_id,
            age_secs = age.as_secs(),
            status = %instance.status,
            "door instance terminated"
        );
        let event = match termination {
            Termination::TimedOut => Event::DoorTimedOut {
                instance_id: instance.id.clone(),
                door_id: instance.door_id.clone(),
                node_id: instance.node_id,
                user_id: instance.user_id.clone(),
                age_secs: age.as_secs(),
            },
            Termination::Killed => Event::DoorKilled {
                instance_id: instance.id.clone(),
                door_id: instance.door_id.clone(),
                node_id: instance.node_id,
                user_id: instance.user_id.clone(),
            },
        };
        self.events.emit(event);
        self.schedule_queue(&instance.door_id);
        Ok(instance)
    }

    /// The door process died on its own
    pub fn report_crash(
        &self,
        instance_id: &InstanceId,
        reason: impl Into<String>,
    ) -> Result<DoorInstance, CoordinatorError> {
        let reason = reason.into();
        let instance = {
            let mut state = self.write_state();
            let instance = self.finish_instance(&mut state, instance_id, InstanceStatus::Crashed)?;
            self.resources.force_release_locks(None, Some(instance_id));
            instance
        };

        tracing::warn!(
            instance_id = %instance.id,
            door_id = %instance.door_id,
            reason = %reason,
            "door crashed"
        );
        self.events.emit(Event::DoorCrashed {
            instance_id: instance.id.clone(),
            door_id: instance.door_id.clone(),
            node_id: instance.node_id,
            user_id: instance.user_id.clone(),
            reason,
        });
        self.schedule_queue(&instance.door_id);
        Ok(instance)
    }

    /// Finishing then `terminal`, releasing locks and node bookkeeping
    fn finish_instance(
        &self,
        state: &mut CoordinatorState,
        instance_id: &InstanceId,
        terminal: InstanceStatus,
    ) -> Result<DoorInstance, CoordinatorError> {
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| CoordinatorError::InstanceNotFound(instance_id.clone()))?;
        instance.transition(InstanceStatus::Finishing)?;
        instance.transition(terminal)?;

        let instance = state
            .instances
            .remove(instance_id)
            .ok_or_else(|| CoordinatorError::InstanceNotFound(instance_id.clone()))?;

        for lock_id in &instance.lock_ids {
            match self.resources.release_lock(lock_id) {
                Ok(_) => {}
                // Already reaped by the expiry sweep
                Err(ResourceError::LockNotFound(_)) => {
                    tracing::debug!(lock_id = %lock_id, "lock already gone on release");
                }
                Err(e) => {
                    tracing::error!(lock_id = %lock_id, error = %e, "failed to release lock");
                }
            }
        }
        if let Some(node) = state.nodes.get_mut(&instance.node_id) {
            node.detach(&instance.id);
        }
        Ok(instance)
    }

    pub fn suspend_instance(&self, instance_id: &InstanceId) -> Result<(), CoordinatorError> {
        let mut state = self.write_state();
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| CoordinatorError::InstanceNotFound(instance_id.clone()))?;
        instance.transition(InstanceStatus::Suspended)?;
        let node_id = instance.node_id;
        if let Some(node) = state.nodes.get_mut(&node_id) {
            node.detach(instance_id);
        }
        tracing::info!(instance_id = %instance_id, "instance suspended");
        Ok(())
    }

    /// Resume a suspended instance if its node still has room
    pub fn resume_instance(&self, instance_id: &InstanceId) -> Result<(), CoordinatorError> {
        let mut state = self.write_state();
        let state = &mut *state;
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| CoordinatorError::InstanceNotFound(instance_id.clone()))?;
        if instance.status != InstanceStatus::Suspended {
            return Err(CoordinatorError::InvalidTransition {
                instance_id: instance_id.clone(),
                from: instance.status,
                to: InstanceStatus::Running,
            });
        }
        let node = state
            .nodes
            .get_mut(&instance.node_id)
            .ok_or(CoordinatorError::NodeNotFound(instance.node_id))?;
        if !node.has_capacity() {
            return Err(CoordinatorError::NodeNotAvailable {
                node_id: node.node_id,
                reason: format!("at capacity ({})", node.capacity),
            });
        }

        instance.transition(InstanceStatus::Running)?;
        instance.last_activity = self.clock.now();
        node.attach(instance_id.clone(), instance.door_id.clone());
        tracing::info!(instance_id = %instance_id, "instance resumed");
        Ok(())
    }

    /// Record activity on an instance
    pub fn touch_instance(&self, instance_id: &InstanceId) -> Result<(), CoordinatorError> {
        let now = self.clock.now();
        let mut state = self.write_state();
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| CoordinatorError::InstanceNotFound(instance_id.clone()))?;
        instance.last_activity = now;
        Ok(())
    }

    // === Queues ===

    fn queue_for(&self, door_id: &DoorId) -> Result<QueueHandle, CoordinatorError> {
        self.queue(door_id)
            .ok_or_else(|| CoordinatorError::DoorNotFound(door_id.clone()))
    }

    fn enqueue(
        &self,
        door_id: &DoorId,
        user_id: &UserId,
        node_id: Option<NodeId>,
        priority: i32,
    ) -> Result<usize, CoordinatorError> {
        let queue = self.queue_for(door_id)?;
        let entry = DoorQueueEntry::new(
            user_id.clone(),
            node_id,
            priority,
            self.clock.now(),
            self.clock.wall(),
        );
        let position = lock_queue(&queue).push(entry)?;

        tracing::info!(
            door_id = %door_id,
            user_id = %user_id,
            position,
            priority,
            "user queued"
        );
        self.events.emit(Event::QueueAdded {
            door_id: door_id.clone(),
            user_id: user_id.clone(),
            position,
            priority,
        });
        Ok(position)
    }

    pub fn add_to_queue(
        &self,
        door_id: &DoorId,
        user_id: &UserId,
        node_id: Option<NodeId>,
        priority: i32,
    ) -> Result<usize, CoordinatorError> {
        self.enqueue(door_id, user_id, node_id, priority)
    }

    /// Withdraw a user from a door's queue
    pub fn remove_from_queue(
        &self,
        door_id: &DoorId,
        user_id: &UserId,
    ) -> Result<DoorQueueEntry, CoordinatorError> {
        let queue = self.queue_for(door_id)?;
        let entry = lock_queue(&queue)
            .remove(user_id)
            .ok_or_else(|| CoordinatorError::UserNotQueued {
                door_id: door_id.clone(),
                user_id: user_id.clone(),
            })?;

        tracing::info!(door_id = %door_id, user_id = %user_id, "user left queue");
        self.events.emit(Event::QueueRemoved {
            door_id: door_id.clone(),
            user_id: user_id.clone(),
            reason: "withdrawn".to_string(),
        });
        Ok(entry)
    }

    pub fn queue_position(
        &self,
        door_id: &DoorId,
        user_id: &UserId,
    ) -> Result<usize, CoordinatorError> {
        let queue = self.queue_for(door_id)?;
        let position = lock_queue(&queue).position(user_id);
        position.ok_or_else(|| CoordinatorError::UserNotQueued {
            door_id: door_id.clone(),
            user_id: user_id.clone(),
        })
    }

    pub fn queue_entries(&self, door_id: &DoorId) -> Vec<DoorQueueEntry> {
        self.queue(door_id)
            .map(|q| lock_queue(&q).entries().to_vec())
            .unwrap_or_default()
    }

    fn ready_node(&self, door_id: &DoorId, user_id: &UserId) -> Option<NodeId> {
        let queue = self.queue(door_id)?;
        let queue = lock_queue(&queue);
        queue
            .entries()
            .iter()
            .find(|e| &e.user_id == user_id)
            .and_then(|e| e.ready_node)
    }

    /// Doors that currently have someone waiting
    pub fn doors_with_waiters(&self) -> Vec<DoorId> {
        let mut doors: Vec<DoorId> = self
            .all_queues()
            .iter()
            .filter_map(|q| {
                let q = lock_queue(q);
                (!q.is_empty()).then(|| q.door_id().clone())
            })
            .collect();
        doors.sort();
        doors
    }

    /// Look for free slots for waiting users.
    ///
    /// Each waiting entry not yet notified is placed against a working copy of the
    /// node table that already holds every slot promised to a queued user, so a
    /// slot is never promised twice. Entries that fit are marked ready and a
    /// `queue:ready` event names the node.
    pub fn process_queue(
        &self,
        door_id: &DoorId,
    ) -> Result<Vec<(UserId, NodeId)>, CoordinatorError> {
        let queue = self.queue_for(door_id)?;
        let pending = lock_queue(&queue).pending(self.config.queue_drain_batch);
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let assignments = {
            let state = self.read_state();
            let door = state
                .doors
                .get(door_id)
                .cloned()
                .ok_or_else(|| CoordinatorError::DoorNotFound(door_id.clone()))?;
            if !door.enabled {
                return Ok(Vec::new());
            }

            let (mut nodes, reserved) = self.reserved_nodes(&state, door_id, None);
            let mut live = state.door_instances(door_id) + reserved;
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            let mut assignments = Vec::new();

            for entry in pending {
                if state.live_instance(door_id, &entry.user_id).is_some() {
                    continue;
                }
                if door.policy == MultiNodePolicy::ExclusiveInstances
                    && live >= door.max_instances
                {
                    break;
                }
                let decision = match select_best_node(
                    &door,
                    &nodes,
                    entry.node_id,
                    &self.config.eligible_statuses,
                    self.config.load_balancing,
                    &mut *rng,
                ) {
                    Ok(decision) => decision,
                    Err(CoordinatorError::NoAvailableNodes(_))
                    | Err(CoordinatorError::MaxInstancesReached { .. }) => break,
                    Err(e) => return Err(e),
                };
                if let Some(node) = nodes.get_mut(&decision.node_id) {
                    node.attach(reservation(door_id, &entry.user_id), door_id.clone());
                }
                live += 1;
                assignments.push((entry.user_id, decision.node_id));
            }

            // Promises are recorded before the state lock is released so a direct
            // request never sees a slot as free in between
            let mut queue = lock_queue(&queue);
            assignments.retain(|(user_id, node_id)| queue.mark_ready(user_id, *node_id));
            assignments
        };

        for (user_id, node_id) in &assignments {
            tracing::info!(
                door_id = %door_id,
                user_id = %user_id,
                node_id = %node_id,
                "slot ready for queued user"
            );
            self.events.emit(Event::QueueReady {
                door_id: door_id.clone(),
                user_id: user_id.clone(),
                node_id: *node_id,
            });
        }
        Ok(assignments)
    }

    /// Process the door's queue now, or hand it to the pump if one is attached
    fn schedule_queue(&self, door_id: &DoorId) {
        if let Some(pump) = &self.queue_pump {
            match pump.try_send(door_id.clone()) {
                Ok(()) => return,
                Err(e) => {
                    tracing::debug!(
                        door_id = %door_id,
                        error = %e,
                        "queue pump unavailable, processing inline"
                    );
                }
            }
        }
        if let Err(e) = self.process_queue(door_id) {
            tracing::warn!(door_id = %door_id, error = %e, "queue processing failed");
        }
    }

    // === Maintenance hooks ===

    pub fn recompute_loads(&self) {
        let mut state = self.write_state();
        for node in state.nodes.values_mut() {
            node.recompute_load();
        }
    }

    /// Instances whose age exceeds their timeout
    pub fn timed_out_instances(&self) -> Vec<InstanceId> {
        let now = self.clock.now();
        let mut ids: Vec<InstanceId> = self
            .read_state()
            .instances
            .values()
            .filter(|i| i.is_timed_out(now))
            .map(|i| i.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Evict queue entries that waited too long. Returns how many went.
    pub fn expire_queue_entries(&self) -> usize {
        let now = self.clock.now();
        let mut evicted = 0;
        for queue in self.all_queues() {
            let (door_id, expired) = {
                let mut queue = lock_queue(&queue);
                (queue.door_id().clone(), queue.expire(now))
            };
            for entry in expired {
                let waited = entry.waited(now);
                tracing::info!(
                    door_id = %door_id,
                    user_id = %entry.user_id,
                    waited_secs = waited.as_secs(),
                    "queue entry timed out"
                );
                self.events.emit(Event::QueueTimedOut {
                    door_id: door_id.clone(),
                    user_id: entry.user_id,
                    waited_secs: waited.as_secs(),
                });
                evicted += 1;
            }
        }
        evicted
    }

    // === Queries (copies) ===

    pub fn door(&self, door_id: &DoorId) -> Option<DoorRegistration> {
        self.read_state().doors.get(door_id).map(|d| (**d).clone())
    }

    pub fn doors(&self) -> Vec<DoorRegistration> {
        let mut doors: Vec<_> = self
            .read_state()
            .doors
            .values()
            .map(|d| (**d).clone())
            .collect();
        doors.sort_by(|a, b| a.id.cmp(&b.id));
        doors
    }

    pub fn instance(&self, instance_id: &InstanceId) -> Option<DoorInstance> {
        self.read_state().instances.get(instance_id).cloned()
    }

    /// Every live instance, ordered by id
    pub fn instances(&self) -> Vec<DoorInstance> {
        self.collect_instances(|_| true)
    }

    pub fn instances_for_door(&self, door_id: &DoorId) -> Vec<DoorInstance> {
        self.collect_instances(|i| &i.door_id == door_id)
    }

    pub fn instances_for_user(&self, user_id: &UserId) -> Vec<DoorInstance> {
        self.collect_instances(|i| &i.user_id == user_id)
    }

    fn collect_instances(&self, filter: impl Fn(&DoorInstance) -> bool) -> Vec<DoorInstance> {
        let mut instances: Vec<_> = self
            .read_state()
            .instances
            .values()
            .filter(|i| filter(i))
            .cloned()
            .collect();
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        instances
    }

    pub fn node(&self, node_id: NodeId) -> Option<NodePlacementState> {
        self.read_state().nodes.get(&node_id).cloned()
    }

    /// Every node, ordered by id
    pub fn nodes(&self) -> Vec<NodePlacementState> {
        self.read_state().nodes.values().cloned().collect()
    }

    /// Why a node cannot take the door right now, if it cannot
    pub fn node_unavailable_reason(
        &self,
        node_id: NodeId,
        door_id: &DoorId,
    ) -> Result<Option<String>, CoordinatorError> {
        let state = self.read_state();
        let node = state
            .nodes
            .get(&node_id)
            .ok_or(CoordinatorError::NodeNotFound(node_id))?;
        let door = state
            .doors
            .get(door_id)
            .ok_or_else(|| CoordinatorError::DoorNotFound(door_id.clone()))?;
        Ok(unavailable_reason(node, door, &self.config.eligible_statuses))
    }

    pub fn stats(&self) -> CoordinatorStats {
        let mut stats = {
            let state = self.read_state();
            let mut instances = BTreeMap::new();
            for instance in state.instances.values() {
                *instances.entry(instance.status).or_insert(0) += 1;
            }
            CoordinatorStats {
                doors: state.doors.len(),
                nodes: state.nodes.len(),
                available_nodes: state
                    .nodes
                    .values()
                    .filter(|n| n.is_eligible(&self.config.eligible_statuses))
                    .count(),
                instances,
                ..CoordinatorStats::default()
            }
        };
        for queue in self.all_queues() {
            let queue = lock_queue(&queue);
            if !queue.is_empty() {
                stats.queued.insert(queue.door_id().clone(), queue.len());
            }
        }
        stats.locks = self.resources.lock_count();
        stats.events_dropped = self.events.dropped();
        stats
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
