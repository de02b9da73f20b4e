// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Collaborator interfaces
//!
//! The door registry, node registry and event sink live outside the
//! coordinator. [`Catalog`] serves both registries from the configuration file.

use crate::config::{DoormanConfig, NodeEntry};
use crate::door::DoorRegistration;
use crate::event::Event;
use crate::id::{DoorId, NodeId};
use crate::node::{NodeCapabilities, NodePreferences, NodeStatus};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

/// Source of door registrations
pub trait DoorRegistry: Send + Sync {
    fn door(&self, id: &DoorId) -> Option<DoorRegistration>;

    fn doors(&self) -> Vec<DoorRegistration>;
}

/// Source of node status and capability declarations
pub trait NodeRegistry: Send + Sync {
    fn nodes(&self) -> Vec<NodeId>;

    fn node_status(&self, node: NodeId) -> Option<NodeStatus>;

    fn capabilities(&self, node: NodeId) -> Option<NodeCapabilities>;

    fn preferences(&self, _node: NodeId) -> Option<NodePreferences> {
        None
    }

    /// `None` leaves the coordinator's default capacity in place
    fn capacity(&self, _node: NodeId) -> Option<usize> {
        None
    }

    fn in_maintenance(&self, _node: NodeId) -> bool {
        false
    }
}

/// Consumer of lifecycle events
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn deliver(&self, event: &Event);
}

/// Door and node catalogue read from the `[[door]]` and `[[node]]` tables
#[derive(Debug, Default)]
pub struct Catalog {
    doors: BTreeMap<DoorId, DoorRegistration>,
    nodes: RwLock<BTreeMap<NodeId, NodeEntry>>,
}

impl Catalog {
    pub fn new(doors: Vec<DoorRegistration>, nodes: Vec<NodeEntry>) -> Self {
        Self {
            doors: doors.into_iter().map(|d| (d.id.clone(), d)).collect(),
            nodes: RwLock::new(nodes.into_iter().map(|n| (n.id, n)).collect()),
        }
    }

    pub fn from_config(config: &DoormanConfig) -> Self {
        Self::new(config.doors.clone(), config.nodes.clone())
    }

    /// Record a new status for a node. Returns false for unknown nodes.
    pub fn set_status(&self, node: NodeId, status: NodeStatus) -> bool {
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        match nodes.get_mut(&node) {
            Some(entry) => {
                entry.status = status;
                true
            }
            None => false,
        }
    }

    fn with_node<T>(&self, node: NodeId, f: impl FnOnce(&NodeEntry) -> T) -> Option<T> {
        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        nodes.get(&node).map(f)
    }
}

impl DoorRegistry for Catalog {
    fn door(&self, id: &DoorId) -> Option<DoorRegistration> {
        self.doors.get(id).cloned()
    }

    fn doors(&self) -> Vec<DoorRegistration> {
        self.doors.values().cloned().collect()
    }
}

impl NodeRegistry for Catalog {
    fn nodes(&self) -> Vec<NodeId> {
        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        nodes.keys().copied().collect()
    }

    fn node_status(&self, node: NodeId) -> Option<NodeStatus> {
        self.with_node(node, |n| n.status)
    }

    fn capabilities(&self, node: NodeId) -> Option<NodeCapabilities> {
        self.with_node(node, |n| n.capabilities.clone())
    }

    fn preferences(&self, node: NodeId) -> Option<NodePreferences> {
        self.with_node(node, |n| n.preferences.clone())
    }

    fn capacity(&self, node: NodeId) -> Option<usize> {
        self.with_node(node, |n| n.capacity).flatten()
    }

    fn in_maintenance(&self, node: NodeId) -> bool {
        self.with_node(node, |n| n.maintenance).unwrap_or(false)
    }
}

/// Sink that keeps every event in memory, for tests
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(Event::name).collect()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn deliver(&self, event: &Event) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        let config = DoormanConfig::from_toml_str(
            r#"
            [[door]]
            id = "lord"

            [[node]]
            id = 2
            capacity = 3
            supported_doors = ["lord"]

            [[node]]
            id = 1
            maintenance = true
            "#,
        )
        .unwrap();
        Catalog::from_config(&config)
    }

    #[test]
    fn serves_doors_and_nodes() {
        let catalog = catalog();
        assert!(catalog.door(&DoorId::new("lord")).is_some());
        assert!(catalog.door(&DoorId::new("bre")).is_none());
        assert_eq!(catalog.nodes(), vec![NodeId(1), NodeId(2)]);
        assert_eq!(catalog.capacity(NodeId(2)), Some(3));
        assert_eq!(catalog.capacity(NodeId(1)), None);
        assert!(catalog.in_maintenance(NodeId(1)));
        assert!(!catalog.in_maintenance(NodeId(9)));
        assert!(!catalog
            .capabilities(NodeId(2))
            .unwrap()
            .supports(&DoorId::new("bre")));
    }

    #[test]
    fn status_updates_are_visible() {
        let catalog = catalog();
        assert!(catalog.set_status(NodeId(2), NodeStatus::Offline));
        assert_eq!(catalog.node_status(NodeId(2)), Some(NodeStatus::Offline));
        assert!(!catalog.set_status(NodeId(7), NodeStatus::Busy));
    }

    #[tokio::test]
    async fn memory_sink_records_events() {
        let sink = MemorySink::new();
        sink.deliver(&Event::NodeAvailable { node_id: NodeId(1) }).await;
        assert_eq!(sink.names(), vec!["node:available"]);
    }
}
