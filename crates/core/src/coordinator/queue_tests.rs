// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use proptest::prelude::*;

fn queue(max_length: usize) -> DoorQueue {
    DoorQueue::new(
        DoorId::new("lord"),
        &QueueConfig {
            max_length,
            timeout: Duration::from_secs(300),
            enabled: true,
        },
    )
}

fn entry(user: &str, priority: i32, at: Instant) -> DoorQueueEntry {
    DoorQueueEntry::new(UserId::new(user), Some(NodeId(1)), priority, at, Utc::now())
}

#[test]
fn higher_priority_first_then_fifo() {
    let mut q = queue(50);
    let t0 = Instant::now();

    assert_eq!(q.push(entry("alice", 5, t0)).unwrap(), 1);
    assert_eq!(q.push(entry("bob", 9, t0 + Duration::from_millis(1))).unwrap(), 1);
    assert_eq!(q.push(entry("carol", 5, t0 + Duration::from_millis(2))).unwrap(), 3);

    let order: Vec<_> = q.entries().iter().map(|e| e.user_id.as_str()).collect();
    assert_eq!(order, vec!["bob", "alice", "carol"]);
    assert_eq!(q.position(&UserId::new("carol")), Some(3));
}

#[test]
fn same_instant_keeps_insertion_order() {
    let mut q = queue(50);
    let t0 = Instant::now();
    q.push(entry("alice", 1, t0)).unwrap();
    q.push(entry("bob", 1, t0)).unwrap();

    assert_eq!(q.position(&UserId::new("alice")), Some(1));
    assert_eq!(q.position(&UserId::new("bob")), Some(2));
}

#[test]
fn duplicate_user_is_rejected() {
    let mut q = queue(50);
    let t0 = Instant::now();
    q.push(entry("alice", 1, t0)).unwrap();

    let err = q.push(entry("alice", 7, t0)).unwrap_err();
    assert_eq!(
        err,
        CoordinatorError::UserAlreadyQueued {
            door_id: DoorId::new("lord"),
            user_id: UserId::new("alice"),
        }
    );
    assert_eq!(q.len(), 1);
}

#[test]
fn full_queue_is_rejected() {
    let mut q = queue(2);
    let t0 = Instant::now();
    q.push(entry("alice", 0, t0)).unwrap();
    q.push(entry("bob", 0, t0)).unwrap();

    let err = q.push(entry("carol", 100, t0)).unwrap_err();
    assert!(matches!(err, CoordinatorError::QueueFull { max_length: 2, .. }));
}

#[test]
fn disabled_queue_reports_busy_door() {
    let mut q = DoorQueue::new(
        DoorId::new("lord"),
        &QueueConfig {
            enabled: false,
            ..QueueConfig::default()
        },
    );
    let err = q.push(entry("alice", 0, Instant::now())).unwrap_err();
    assert_eq!(err, CoordinatorError::DoorBusy(DoorId::new("lord")));
}

#[test]
fn remove_and_position() {
    let mut q = queue(50);
    let t0 = Instant::now();
    q.push(entry("alice", 0, t0)).unwrap();
    q.push(entry("bob", 0, t0)).unwrap();

    assert!(q.remove(&UserId::new("alice")).is_some());
    assert!(q.remove(&UserId::new("alice")).is_none());
    assert_eq!(q.position(&UserId::new("bob")), Some(1));
    assert_eq!(q.position(&UserId::new("alice")), None);
}

#[test]
fn expire_removes_only_old_entries() {
    let mut q = queue(50);
    let t0 = Instant::now();
    q.push(entry("alice", 0, t0)).unwrap();
    q.push(entry("bob", 0, t0 + Duration::from_secs(200))).unwrap();

    let expired = q.expire(t0 + Duration::from_secs(301));
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].user_id, UserId::new("alice"));
    assert_eq!(q.len(), 1);
}

#[test]
fn pending_skips_notified_entries() {
    let mut q = queue(50);
    let t0 = Instant::now();
    for user in ["alice", "bob", "carol"] {
        q.push(entry(user, 0, t0)).unwrap();
    }
    assert!(q.mark_ready(&UserId::new("alice"), NodeId(2)));
    assert!(!q.mark_ready(&UserId::new("zed"), NodeId(2)));

    let pending: Vec<_> = q.pending(1).into_iter().map(|e| e.user_id).collect();
    assert_eq!(pending, vec![UserId::new("bob")]);
    assert_eq!(q.entries()[0].ready_node, Some(NodeId(2)));
}

#[test]
fn clearing_a_promise_makes_the_entry_pending_again() {
    let mut q = queue(10);
    let t0 = Instant::now();
    for user in ["alice", "bob"] {
        q.push(entry(user, 0, t0)).unwrap();
    }
    q.mark_ready(&UserId::new("alice"), NodeId(1));

    assert_eq!(q.clear_ready(&UserId::new("alice")), Some(1));
    assert_eq!(q.entries()[0].ready_node, None);
    assert_eq!(q.pending(1)[0].user_id, UserId::new("alice"));
    assert_eq!(q.clear_ready(&UserId::new("zed")), None);
}

proptest! {
    #[test]
    fn queue_stays_sorted(priorities in proptest::collection::vec(-5i32..5, 0..40)) {
        let mut q = queue(100);
        let t0 = Instant::now();

        for (n, priority) in priorities.iter().enumerate() {
            let at = t0 + Duration::from_millis(n as u64);
            q.push(entry(&format!("user-{}", n), *priority, at)).unwrap();
        }

        prop_assert_eq!(q.len(), priorities.len());
        for pair in q.entries().windows(2) {
            prop_assert!(pair[0].priority >= pair[1].priority);
            if pair[0].priority == pair[1].priority {
                prop_assert!(pair[0].enqueued_at <= pair[1].enqueued_at);
            }
        }
    }
}
