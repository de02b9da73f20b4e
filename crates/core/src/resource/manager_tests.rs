// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::clock::FakeClock;
use crate::emitter::{self, EventReceiver};
use crate::id::SequentialIdGen;
use yare::parameterized;

type TestManager = ResourceManager<FakeClock, SequentialIdGen>;

fn config() -> ResourceConfig {
    ResourceConfig {
        default_lock_timeout: Duration::from_secs(30 * 60),
        max_lock_time: Duration::from_secs(8 * 3600),
        deadlock_detection: true,
    }
}

fn setup() -> (TestManager, FakeClock, EventReceiver) {
    let clock = FakeClock::new();
    let (events, rx) = emitter::channel(64);
    let manager =
        ResourceManager::with_clock(config(), events, clock.clone(), SequentialIdGen::default());
    (manager, clock, rx)
}

fn request(resource: &str, door: &str, instance: &str, mode: LockMode) -> LockRequest {
    LockRequest::new(
        resource,
        DoorId::new(door),
        InstanceId::new(instance),
        NodeId(1),
        UserId::new("alice"),
        mode,
    )
}

#[test]
fn register_rejects_empty_and_duplicate_ids() {
    let (manager, _, _) = setup();
    assert_eq!(
        manager.register_resource(DoorResource::new("")),
        Err(ResourceError::EmptyResourceId)
    );

    manager.register_resource(DoorResource::new("lord/players.dat")).unwrap();
    assert_eq!(
        manager.register_resource(DoorResource::new("lord/players.dat")),
        Err(ResourceError::ResourceExists("lord/players.dat".to_string()))
    );
    assert_eq!(manager.ensure_resource(DoorResource::new("lord/players.dat")), Ok(false));
    assert_eq!(manager.ensure_resource(DoorResource::new("lord/log.txt")), Ok(true));
}

#[test]
fn unregister_refuses_while_locked() {
    let (manager, _, _) = setup();
    manager.register_resource(DoorResource::new("r")).unwrap();
    let lock = manager.acquire_lock(request("r", "lord", "i-1", LockMode::Exclusive)).unwrap();

    assert_eq!(
        manager.unregister_resource("r"),
        Err(ResourceError::ActiveLocksExist {
            resource_id: "r".to_string(),
            locks: 1
        })
    );

    manager.release_lock(&lock.id).unwrap();
    assert!(manager.unregister_resource("r").is_ok());
    assert_eq!(
        manager.unregister_resource("r"),
        Err(ResourceError::ResourceNotFound("r".to_string()))
    );
}

#[test]
fn acquire_on_unknown_resource_fails() {
    let (manager, _, _) = setup();
    let err = manager.acquire_lock(request("nope", "lord", "i-1", LockMode::Shared)).unwrap_err();
    assert_eq!(err, ResourceError::ResourceNotFound("nope".to_string()));
}

#[parameterized(
    exclusive = { LockMode::Exclusive },
    read_only = { LockMode::ReadOnly },
    write_only = { LockMode::WriteOnly },
    shared = { LockMode::Shared },
)]
fn exclusive_holder_blocks_every_mode(second: LockMode) {
    let (manager, _, _) = setup();
    manager
        .register_resource(DoorResource::new("r").with_max_locks(4))
        .unwrap();
    manager.acquire_lock(request("r", "lord", "i-1", LockMode::Exclusive)).unwrap();

    let err = manager.acquire_lock(request("r", "bre", "i-2", second)).unwrap_err();
    assert_eq!(
        err,
        ResourceError::IncompatibleLock {
            resource_id: "r".to_string(),
            requested: second,
            held: LockMode::Exclusive,
        }
    );
    assert_eq!(manager.resource_status("r").unwrap().current_locks, 1);
}

#[test]
fn two_shared_locks_coexist() {
    let (manager, _, _) = setup();
    manager
        .register_resource(DoorResource::new("lord/data").with_mode(LockMode::Shared))
        .unwrap();

    manager.acquire_lock(request("lord/data", "lord", "i-1", LockMode::Shared)).unwrap();
    manager.acquire_lock(request("lord/data", "lord", "i-2", LockMode::Shared)).unwrap();

    let status = manager.resource_status("lord/data").unwrap();
    assert_eq!(status.current_locks, 2);
    assert_eq!(status.locks.len(), 2);
}

#[test]
fn shared_requests_ignore_the_max_locks_ceiling() {
    let (manager, _, _) = setup();
    manager.register_resource(DoorResource::new("r")).unwrap();

    for n in 0..3 {
        manager
            .acquire_lock(request("r", "lord", &format!("i-{}", n), LockMode::Shared))
            .unwrap();
    }
    assert_eq!(manager.resource_status("r").unwrap().current_locks, 3);
}

#[test]
fn read_only_requests_respect_the_ceiling() {
    let (manager, _, _) = setup();
    manager.register_resource(DoorResource::new("r").with_max_locks(2)).unwrap();

    manager.acquire_lock(request("r", "lord", "i-1", LockMode::ReadOnly)).unwrap();
    manager.acquire_lock(request("r", "lord", "i-2", LockMode::ReadOnly)).unwrap();
    let err = manager.acquire_lock(request("r", "lord", "i-3", LockMode::ReadOnly)).unwrap_err();
    assert_eq!(
        err,
        ResourceError::MaxLocksExceeded {
            resource_id: "r".to_string(),
            max_locks: 2
        }
    );
}

#[test]
fn acquire_release_round_trip_leaves_no_residue() {
    let (manager, _, mut rx) = setup();
    manager.register_resource(DoorResource::new("r")).unwrap();

    for n in 0..10 {
        let lock = manager
            .acquire_lock(request("r", "lord", &format!("i-{}", n), LockMode::Exclusive))
            .unwrap();
        assert_eq!(manager.resource_status("r").unwrap().current_locks, 1);
        manager.release_lock(&lock.id).unwrap();
        assert_eq!(manager.resource_status("r").unwrap().current_locks, 0);
    }

    assert_eq!(manager.lock_count(), 0);
    let names: Vec<_> = rx.drain().iter().map(|e| e.name()).collect();
    assert_eq!(names.len(), 20);
    assert_eq!(names[0], "resource:lock");
    assert_eq!(names[1], "resource:release");
}

#[test]
fn releasing_unknown_lock_fails() {
    let (manager, _, _) = setup();
    let id = LockId::new("lock-404");
    assert_eq!(manager.release_lock(&id), Err(ResourceError::LockNotFound(id)));
}

#[parameterized(
    zero_uses_default = { 0, 30 * 60 },
    within_range_kept = { 90, 90 },
    above_max_is_capped = { 9 * 3600, 8 * 3600 },
)]
fn timeouts_are_normalised(requested_secs: u64, expected_secs: u64) {
    let (manager, _, _) = setup();
    manager.register_resource(DoorResource::new("r")).unwrap();
    let lock = manager
        .acquire_lock(
            request("r", "lord", "i-1", LockMode::Exclusive)
                .with_timeout(Duration::from_secs(requested_secs)),
        )
        .unwrap();
    assert_eq!(lock.timeout, Duration::from_secs(expected_secs));
}

#[test]
fn expiry_sweep_removes_only_stale_locks() {
    let (manager, clock, mut rx) = setup();
    manager.register_resource(DoorResource::new("a")).unwrap();
    manager.register_resource(DoorResource::new("b")).unwrap();

    manager
        .acquire_lock(
            request("a", "lord", "i-1", LockMode::Exclusive).with_timeout(Duration::from_secs(60)),
        )
        .unwrap();
    let survivor = manager
        .acquire_lock(
            request("b", "lord", "i-1", LockMode::Exclusive).with_timeout(Duration::from_secs(600)),
        )
        .unwrap();
    rx.drain();

    clock.advance(Duration::from_secs(61));
    assert_eq!(manager.cleanup_expired_locks(), 1);
    assert_eq!(manager.resource_status("a").unwrap().current_locks, 0);
    assert_eq!(manager.lock_info(&survivor.id).unwrap().resource_id, "b");

    let events = rx.drain();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name(), "resource:expire");
}

#[test]
fn expiry_sweep_on_the_real_clock() {
    let (events, _rx) = emitter::channel(16);
    let manager = ResourceManager::new(config(), events);
    manager.register_resource(DoorResource::new("r")).unwrap();
    manager
        .acquire_lock(
            request("r", "lord", "i-1", LockMode::Exclusive)
                .with_timeout(Duration::from_millis(10)),
        )
        .unwrap();

    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(manager.cleanup_expired_locks(), 1);
    assert_eq!(manager.resource_status("r").unwrap().current_locks, 0);
}

#[test]
fn refresh_extends_a_live_lock_but_not_an_expired_one() {
    let (manager, clock, _) = setup();
    manager.register_resource(DoorResource::new("r")).unwrap();
    let lock = manager
        .acquire_lock(
            request("r", "lord", "i-1", LockMode::Exclusive).with_timeout(Duration::from_secs(60)),
        )
        .unwrap();

    clock.advance(Duration::from_secs(45));
    manager.refresh_lock(&lock.id).unwrap();
    clock.advance(Duration::from_secs(45));
    assert_eq!(manager.cleanup_expired_locks(), 0);

    clock.advance(Duration::from_secs(30));
    assert_eq!(
        manager.refresh_lock(&lock.id),
        Err(ResourceError::LockTimeout(lock.id.clone()))
    );
}

#[test]
fn force_release_matches_either_filter() {
    let (manager, _, _) = setup();
    for r in ["a", "b", "c"] {
        manager
            .register_resource(DoorResource::new(r).with_mode(LockMode::Shared))
            .unwrap();
    }
    manager.acquire_lock(request("a", "lord", "i-1", LockMode::Shared)).unwrap();
    manager.acquire_lock(request("b", "bre", "i-2", LockMode::Shared)).unwrap();
    manager.acquire_lock(request("c", "tw2002", "i-3", LockMode::Shared)).unwrap();

    let released =
        manager.force_release_locks(Some(&DoorId::new("lord")), Some(&InstanceId::new("i-2")));
    assert_eq!(released.len(), 2);
    assert_eq!(manager.lock_count(), 1);
    assert_eq!(manager.locks_for_door(&DoorId::new("tw2002")).len(), 1);

    assert!(manager.force_release_locks(None, None).is_empty());
}

#[test]
fn deadlock_check_is_pairwise_on_shared_resource_ids() {
    let (manager, _, mut rx) = setup();
    for r in ["shared.dat", "lord.dat", "bre.dat"] {
        manager
            .register_resource(DoorResource::new(r).with_mode(LockMode::Shared))
            .unwrap();
    }
    manager.acquire_lock(request("shared.dat", "lord", "i-1", LockMode::Shared)).unwrap();
    manager.acquire_lock(request("lord.dat", "lord", "i-1", LockMode::Shared)).unwrap();
    manager.acquire_lock(request("shared.dat", "bre", "i-2", LockMode::Shared)).unwrap();
    manager.acquire_lock(request("bre.dat", "bre", "i-2", LockMode::Shared)).unwrap();
    manager.acquire_lock(request("bre.dat", "usurper", "i-3", LockMode::Shared)).unwrap();
    rx.drain();

    let candidates = manager.detect_deadlocks();
    assert_eq!(
        candidates,
        vec![
            DeadlockCandidate {
                first: DoorId::new("bre"),
                second: DoorId::new("lord"),
                resources: vec!["shared.dat".to_string()],
            },
            DeadlockCandidate {
                first: DoorId::new("bre"),
                second: DoorId::new("usurper"),
                resources: vec!["bre.dat".to_string()],
            },
        ]
    );

    let sweep = manager.lock_expiry_tick();
    assert_eq!(sweep.expired, 0);
    assert_eq!(sweep.deadlocks.len(), 2);
    assert!(rx.drain().iter().all(|e| e.name() == "resource:deadlock"));
}

#[test]
fn deadlock_detection_can_be_disabled() {
    let clock = FakeClock::new();
    let manager = ResourceManager::with_clock(
        ResourceConfig {
            deadlock_detection: false,
            ..config()
        },
        EventEmitter::detached(),
        clock,
        SequentialIdGen::default(),
    );
    manager
        .register_resource(DoorResource::new("r").with_mode(LockMode::Shared))
        .unwrap();
    manager.acquire_lock(request("r", "lord", "i-1", LockMode::Shared)).unwrap();
    manager.acquire_lock(request("r", "bre", "i-2", LockMode::Shared)).unwrap();

    assert!(manager.lock_expiry_tick().deadlocks.is_empty());
    assert_eq!(manager.detect_deadlocks().len(), 1);
}

#[test]
fn queries_return_copies() {
    let (manager, _, _) = setup();
    manager.register_resource(DoorResource::new("r")).unwrap();
    let lock = manager.acquire_lock(request("r", "lord", "i-1", LockMode::Exclusive)).unwrap();

    let mut copy = manager.resource_status("r").unwrap();
    copy.locks.clear();
    copy.current_locks = 0;

    assert_eq!(manager.resource_status("r").unwrap().current_locks, 1);
    assert_eq!(manager.locks_for_node(NodeId(1)), vec![lock.clone()]);
    assert!(manager.locks_for_node(NodeId(2)).is_empty());
    assert_eq!(manager.locks_for_instance(&InstanceId::new("i-1")), vec![lock]);
    assert_eq!(manager.all_resources().len(), 1);
}
