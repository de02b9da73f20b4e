// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::clock::FakeClock;
use crate::config::{CoordinatorConfig, QueueConfig, ResourceConfig};
use crate::door::{DoorRegistration, SessionContext, UserContext};
use crate::emitter;
use crate::id::SequentialIdGen;
use crate::node::NodeCapabilities;
use crate::resource::ResourceManager;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn coordinator() -> (Coordinator<FakeClock, SequentialIdGen>, FakeClock) {
    let clock = FakeClock::new();
    let (events, _rx) = emitter::channel(64);
    let resources = Arc::new(ResourceManager::with_clock(
        ResourceConfig::default(),
        events.clone(),
        clock.clone(),
        SequentialIdGen::default(),
    ));
    let coordinator = Coordinator::new(
        CoordinatorConfig::default(),
        QueueConfig::default(),
        resources,
        events,
        clock.clone(),
    );
    coordinator
        .register_door(DoorRegistration::new("lord").with_exclusive_resources(["lord/game.dat"]))
        .unwrap();
    coordinator
        .register_node(NodeId(1), NodeCapabilities::default())
        .unwrap();
    (coordinator, clock)
}

fn populated() -> StorableState {
    let (coordinator, clock) = coordinator();
    coordinator
        .request_door_access(
            &DoorId::new("lord"),
            None,
            &UserId::new("alice"),
            &UserContext::new(10, Duration::from_secs(600)),
            &SessionContext::new("tty3"),
        )
        .unwrap();
    coordinator
        .add_to_queue(&DoorId::new("lord"), &UserId::new("bob"), Some(NodeId(1)), 4)
        .unwrap();
    clock.advance(Duration::from_secs(45));
    StorableState::capture(&coordinator)
}

#[test]
fn capture_copies_tables_as_wall_times() {
    let state = populated();

    assert_eq!(state.version, CURRENT_VERSION);
    assert_eq!(state.instances.len(), 1);
    let instance = &state.instances[0];
    assert_eq!(instance.user_id, UserId::new("alice"));
    assert_eq!(instance.status, InstanceStatus::Running);
    assert_eq!(instance.idle_secs, 45);
    assert_eq!(instance.timeout_secs, 4 * 60 * 60);
    assert_eq!(instance.lock_ids.len(), 1);

    assert_eq!(state.queued(), 1);
    assert_eq!(state.queues[&DoorId::new("lord")][0].priority, 4);
    assert_eq!(state.nodes.len(), 1);
    assert_eq!(state.nodes[0].active_instances, vec![instance.id.clone()]);
}

#[test]
fn save_then_load_returns_the_same_state() {
    let dir = TempDir::new().unwrap();
    let store = SnapshotStore::new(dir.path().join("state/doorman.snapshot.json"));
    let state = populated();

    store.save(&state).unwrap();

    assert_eq!(store.load().unwrap(), Some(state));
    assert!(!dir.path().join("state/doorman.snapshot.json.tmp").exists());
}

#[test]
fn missing_snapshot_loads_as_none() {
    let dir = TempDir::new().unwrap();
    let store = SnapshotStore::new(dir.path().join("none.json"));
    assert!(store.load().unwrap().is_none());
}

#[test]
fn other_versions_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("snapshot.json");
    std::fs::write(&path, r#"{"version": 99, "instances": []}"#).unwrap();

    let err = SnapshotStore::new(&path).load().unwrap_err();
    assert!(matches!(
        err,
        SnapshotError::UnsupportedVersion {
            found: 99,
            expected: CURRENT_VERSION
        }
    ));
}

#[test]
fn corrupt_snapshot_is_a_json_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("snapshot.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = SnapshotStore::new(&path).load().unwrap_err();
    assert!(matches!(err, SnapshotError::Json(_)));
}
