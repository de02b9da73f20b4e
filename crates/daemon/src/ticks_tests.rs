// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::lifecycle::{startup, Config};
use doorman_core::registry::MemorySink;
use doorman_core::{
    AccessOutcome, DoormanConfig, NodeId, NodeStatus, SessionContext, UserContext, UserId,
};
use tempfile::TempDir;

fn daemon(dir: &TempDir, ticks: &str) -> DaemonState {
    let text = format!(
        r#"
{ticks}

[[door]]
id = "lord"
time_limit = "150ms"

[[node]]
id = 1
capacity = 1
load_threshold = 1.0

[[node]]
id = 2
status = "offline"
"#
    );
    let settings = DoormanConfig::from_toml_str(&text).unwrap();
    assert!(settings.validate().is_empty(), "{:?}", settings.validate());
    let config_path = dir.path().join("doorman.toml");
    let config = Config::with_state_dir(config_path, settings, dir.path().join("run"));
    startup(&config).unwrap()
}

const SLOW: &str = r#"
[ticks]
coordination = "1h"
cleanup = "1h"
sync = "1h"
lock_expiry = "1h"
"#;

fn request(daemon: &DaemonState, user: &str) -> AccessOutcome {
    daemon
        .coordinator
        .request_door_access(
            &DoorId::new("lord"),
            None,
            &UserId::new(user),
            &UserContext::new(10, Duration::from_secs(600)),
            &SessionContext::default(),
        )
        .unwrap()
}

async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn release_is_pumped_and_events_reach_the_sink() {
    let dir = TempDir::new().unwrap();
    let mut daemon = daemon(&dir, SLOW);
    let sink = MemorySink::new();
    let workers = Workers::spawn(&mut daemon, Arc::new(sink.clone()));

    let alice = match request(&daemon, "alice") {
        AccessOutcome::Launched(instance) => instance,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(request(&daemon, "bob"), AccessOutcome::Queued { position: 1 });
    daemon.coordinator.release_door_access(&alice.id).unwrap();

    let coordinator = Arc::clone(&daemon.coordinator);
    assert!(
        wait_for(|| coordinator.queue_entries(&DoorId::new("lord"))[0].notified).await,
        "queue pump never ran"
    );

    workers.stop().await;
    let names = sink.names();
    assert!(names.contains(&"door:launch"));
    assert!(names.contains(&"door:finish"));
    assert!(names.contains(&"queue:ready"));
}

#[tokio::test]
async fn coordination_tick_follows_the_catalog() {
    let dir = TempDir::new().unwrap();
    let ticks = SLOW.replace("coordination = \"1h\"", "coordination = \"20ms\"");
    let mut daemon = daemon(&dir, &ticks);
    let workers = Workers::spawn(&mut daemon, Arc::new(MemorySink::new()));

    daemon.catalog.set_status(NodeId(2), NodeStatus::Available);
    let coordinator = Arc::clone(&daemon.coordinator);
    assert!(
        wait_for(|| {
            coordinator
                .node(NodeId(2))
                .is_some_and(|n| n.status == NodeStatus::Available)
        })
        .await
    );

    workers.stop().await;
}

#[tokio::test]
async fn cleanup_tick_times_out_instances() {
    let dir = TempDir::new().unwrap();
    let mut daemon = daemon(&dir, &SLOW.replace("cleanup = \"1h\"", "cleanup = \"20ms\""));
    let workers = Workers::spawn(&mut daemon, Arc::new(MemorySink::new()));

    request(&daemon, "alice");
    let coordinator = Arc::clone(&daemon.coordinator);
    assert!(wait_for(|| coordinator.instances().is_empty()).await);
    assert_eq!(coordinator.resources().lock_count(), 0);

    workers.stop().await;
}

#[tokio::test]
async fn sync_tick_writes_snapshots() {
    let dir = TempDir::new().unwrap();
    let mut daemon = daemon(&dir, &SLOW.replace("sync = \"1h\"", "sync = \"20ms\""));
    let workers = Workers::spawn(&mut daemon, Arc::new(MemorySink::new()));

    request(&daemon, "alice");
    let store = daemon.store.clone();
    assert!(
        wait_for(|| {
            store
                .load()
                .ok()
                .flatten()
                .is_some_and(|s| s.instances.len() == 1)
        })
        .await
    );

    workers.stop().await;
}

#[tokio::test]
async fn stop_returns_with_every_worker_finished() {
    let dir = TempDir::new().unwrap();
    let mut daemon = daemon(&dir, SLOW);
    let workers = Workers::spawn(&mut daemon, Arc::new(MemorySink::new()));
    assert!(daemon.events.is_none());
    assert!(daemon.queue_pump.is_none());

    tokio::time::timeout(Duration::from_secs(5), workers.stop())
        .await
        .unwrap();
}
