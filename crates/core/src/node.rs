// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-node placement state

use crate::id::{DoorId, InstanceId, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Door list entry meaning "every door"
pub const WILDCARD: &str = "*";

/// Node status as reported by the node registry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeStatus {
    Available,
    InLogin,
    Busy,
    Offline,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeStatus::Available => "available",
            NodeStatus::InLogin => "in-login",
            NodeStatus::Busy => "busy",
            NodeStatus::Offline => "offline",
        };
        f.write_str(name)
    }
}

fn wildcard_doors() -> Vec<String> {
    vec![WILDCARD.to_string()]
}

/// What a node declares it can run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeCapabilities {
    /// Door ids this node may run, or `*`
    pub supported_doors: Vec<String>,
    pub os: Option<String>,
    pub arch: Option<String>,
    pub max_memory_mb: Option<u64>,
    pub max_cpu_percent: Option<u8>,
}

impl Default for NodeCapabilities {
    fn default() -> Self {
        Self {
            supported_doors: wildcard_doors(),
            os: None,
            arch: None,
            max_memory_mb: None,
            max_cpu_percent: None,
        }
    }
}

impl NodeCapabilities {
    pub fn supporting<S: Into<String>>(doors: impl IntoIterator<Item = S>) -> Self {
        Self {
            supported_doors: doors.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_os(mut self, os: impl Into<String>) -> Self {
        self.os = Some(os.into());
        self
    }

    pub fn supports(&self, door: &DoorId) -> bool {
        self.supported_doors
            .iter()
            .any(|d| d == WILDCARD || d == door.as_str())
    }
}

/// Placement preferences of a node
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodePreferences {
    /// Doors favoured by weighted selection
    pub preferred_doors: Vec<DoorId>,
    /// Doors never placed here
    pub avoided_doors: Vec<DoorId>,
    /// Above this load score the node takes no new instances
    pub load_threshold: f64,
    pub priority: u8,
    /// Per-door ceiling on concurrent users of this node
    pub max_users_per_door: BTreeMap<DoorId, usize>,
}

impl Default for NodePreferences {
    fn default() -> Self {
        Self {
            preferred_doors: Vec::new(),
            avoided_doors: Vec::new(),
            load_threshold: 0.8,
            priority: 5,
            max_users_per_door: BTreeMap::new(),
        }
    }
}

impl NodePreferences {
    pub fn prefers(&self, door: &DoorId) -> bool {
        self.preferred_doors.contains(door)
    }

    pub fn avoids(&self, door: &DoorId) -> bool {
        self.avoided_doors.contains(door)
    }
}

/// Coordinator-owned state of one registered node.
///
/// `active_instances` holds the instances counted against capacity (starting or
/// running). Suspended instances stay in the coordinator's instance table but are
/// detached from here until resumed.
#[derive(Clone, Debug, PartialEq)]
pub struct NodePlacementState {
    pub node_id: NodeId,
    pub status: NodeStatus,
    pub active_instances: BTreeMap<InstanceId, DoorId>,
    pub capacity: usize,
    /// Fraction of capacity in use, in `[0, 1]`
    pub load_score: f64,
    pub capabilities: NodeCapabilities,
    pub preferences: NodePreferences,
    pub maintenance: bool,
}

impl NodePlacementState {
    pub fn new(node_id: NodeId, capabilities: NodeCapabilities, capacity: usize) -> Self {
        Self {
            node_id,
            status: NodeStatus::Available,
            active_instances: BTreeMap::new(),
            capacity,
            load_score: 0.0,
            capabilities,
            preferences: NodePreferences::default(),
            maintenance: false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.active_instances.len()
    }

    pub fn has_capacity(&self) -> bool {
        self.active_count() < self.capacity
    }

    /// Active instances of one door on this node
    pub fn door_count(&self, door: &DoorId) -> usize {
        self.active_instances.values().filter(|d| *d == door).count()
    }

    pub fn attach(&mut self, instance: InstanceId, door: DoorId) {
        self.active_instances.insert(instance, door);
        self.recompute_load();
    }

    pub fn detach(&mut self, instance: &InstanceId) -> bool {
        let removed = self.active_instances.remove(instance).is_some();
        self.recompute_load();
        removed
    }

    pub fn recompute_load(&mut self) {
        self.load_score = if self.capacity == 0 {
            1.0
        } else {
            (self.active_count() as f64 / self.capacity as f64).min(1.0)
        };
    }

    /// Whether the node takes part in placement at all, ignoring door specifics
    pub fn is_eligible(&self, eligible_statuses: &[NodeStatus]) -> bool {
        !self.maintenance && eligible_statuses.contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(capacity: usize) -> NodePlacementState {
        NodePlacementState::new(NodeId(1), NodeCapabilities::default(), capacity)
    }

    #[test]
    fn load_tracks_attached_instances() {
        let mut node = node(4);
        node.attach(InstanceId::new("i-1"), DoorId::new("lord"));
        assert_eq!(node.load_score, 0.25);

        node.attach(InstanceId::new("i-2"), DoorId::new("lord"));
        node.attach(InstanceId::new("i-3"), DoorId::new("bre"));
        assert_eq!(node.load_score, 0.75);
        assert_eq!(node.door_count(&DoorId::new("lord")), 2);

        assert!(node.detach(&InstanceId::new("i-1")));
        assert!(!node.detach(&InstanceId::new("i-1")));
        assert_eq!(node.load_score, 0.5);
    }

    #[test]
    fn zero_capacity_node_is_fully_loaded() {
        let mut node = node(0);
        node.recompute_load();
        assert_eq!(node.load_score, 1.0);
        assert!(!node.has_capacity());
    }

    #[test]
    fn wildcard_supports_every_door() {
        let caps = NodeCapabilities::default();
        assert!(caps.supports(&DoorId::new("anything")));

        let caps = NodeCapabilities::supporting(["lord"]);
        assert!(caps.supports(&DoorId::new("lord")));
        assert!(!caps.supports(&DoorId::new("bre")));
    }

    #[test]
    fn maintenance_overrides_status() {
        let mut node = node(2);
        let eligible = [NodeStatus::Available, NodeStatus::InLogin];
        assert!(node.is_eligible(&eligible));

        node.maintenance = true;
        assert!(!node.is_eligible(&eligible));

        node.maintenance = false;
        node.status = NodeStatus::Busy;
        assert!(!node.is_eligible(&eligible));
    }
}
