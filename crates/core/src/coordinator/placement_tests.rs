// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::id::{DoorId, InstanceId};
use crate::node::NodeCapabilities;
use rand::rngs::StdRng;
use rand::SeedableRng;
use yare::parameterized;

const ELIGIBLE: [NodeStatus; 2] = [NodeStatus::Available, NodeStatus::InLogin];

fn node(id: u32, capacity: usize, running: &[&str]) -> NodePlacementState {
    let mut node = NodePlacementState::new(NodeId(id), NodeCapabilities::default(), capacity);
    for (n, door) in running.iter().enumerate() {
        node.attach(InstanceId::new(format!("n{}-{}", id, n)), DoorId::new(*door));
    }
    node
}

fn nodes(list: Vec<NodePlacementState>) -> BTreeMap<NodeId, NodePlacementState> {
    list.into_iter().map(|n| (n.node_id, n)).collect()
}

fn select(
    door: &DoorRegistration,
    nodes: &BTreeMap<NodeId, NodePlacementState>,
    preferred: Option<u32>,
) -> Result<PlacementDecision, CoordinatorError> {
    let mut rng = StdRng::seed_from_u64(7);
    select_best_node(door, nodes, preferred.map(NodeId), &ELIGIBLE, true, &mut rng)
}

#[parameterized(
    offline = { NodeStatus::Offline, false, false },
    busy = { NodeStatus::Busy, false, false },
    in_login = { NodeStatus::InLogin, false, true },
    maintenance = { NodeStatus::Available, true, false },
    available = { NodeStatus::Available, false, true },
)]
fn status_and_maintenance_gate_eligibility(status: NodeStatus, maintenance: bool, ok: bool) {
    let mut n = node(1, 4, &[]);
    n.status = status;
    n.maintenance = maintenance;
    assert_eq!(
        is_node_available_for_door(&n, &DoorRegistration::new("lord"), &ELIGIBLE),
        ok
    );
}

#[test]
fn load_above_threshold_excludes_node() {
    let door = DoorRegistration::new("lord");
    let mut n = node(1, 10, &["a"; 8]);
    assert!(is_node_available_for_door(&n, &door, &ELIGIBLE));

    n.attach(InstanceId::new("extra"), DoorId::new("a"));
    assert!(!is_node_available_for_door(&n, &door, &ELIGIBLE));
    assert!(unavailable_reason(&n, &door, &ELIGIBLE)
        .unwrap()
        .contains("threshold"));
}

#[test]
fn capability_avoid_capacity_and_user_limits() {
    let door = DoorRegistration::new("lord");

    let mut n = node(1, 4, &[]);
    n.capabilities = NodeCapabilities::supporting(["bre"]);
    assert!(!is_node_available_for_door(&n, &door, &ELIGIBLE));

    let mut n = node(1, 4, &[]);
    n.preferences.avoided_doors = vec![DoorId::new("lord")];
    assert!(!is_node_available_for_door(&n, &door, &ELIGIBLE));

    let mut n = node(1, 1, &[]);
    n.preferences.load_threshold = 1.0;
    n.attach(InstanceId::new("x"), DoorId::new("bre"));
    assert!(!is_node_available_for_door(&n, &door, &ELIGIBLE));

    let mut n = node(1, 4, &["lord"]);
    n.preferences.max_users_per_door.insert(DoorId::new("lord"), 1);
    assert!(!is_node_available_for_door(&n, &door, &ELIGIBLE));
}

#[test]
fn required_os_must_match_declared_os() {
    let door = DoorRegistration::new("lord").with_required_os("dos");
    let mut n = node(1, 4, &[]);
    assert!(is_node_available_for_door(&n, &door, &ELIGIBLE));

    n.capabilities = NodeCapabilities::default().with_os("linux");
    assert!(!is_node_available_for_door(&n, &door, &ELIGIBLE));

    n.capabilities = NodeCapabilities::default().with_os("dos");
    assert!(is_node_available_for_door(&n, &door, &ELIGIBLE));
}

#[test]
fn empty_candidate_set_means_no_available_nodes() {
    let mut offline = node(1, 4, &[]);
    offline.status = NodeStatus::Offline;
    let err = select(&DoorRegistration::new("lord"), &nodes(vec![offline]), None).unwrap_err();
    assert_eq!(err, CoordinatorError::NoAvailableNodes(DoorId::new("lord")));
}

#[test]
fn eligible_preferred_node_wins_over_policy() {
    let door = DoorRegistration::new("lord");
    let table = nodes(vec![node(1, 10, &[]), node(2, 10, &["x", "y"])]);

    let decision = select(&door, &table, Some(2)).unwrap();
    assert_eq!(decision.node_id, NodeId(2));
    assert_eq!(decision.strategy, Strategy::Preferred);
}

#[test]
fn ineligible_preferred_node_falls_back_to_policy() {
    let door = DoorRegistration::new("lord");
    let mut down = node(2, 10, &[]);
    down.status = NodeStatus::Offline;
    let table = nodes(vec![node(1, 10, &[]), down]);

    let decision = select(&door, &table, Some(2)).unwrap();
    assert_eq!(decision.node_id, NodeId(1));
    assert_eq!(decision.strategy, Strategy::LeastLoaded);
}

#[test]
fn single_user_takes_least_loaded_lowest_id_on_tie() {
    let door = DoorRegistration::new("lord");
    let table = nodes(vec![
        node(1, 10, &["x", "y"]),
        node(2, 10, &["x"]),
        node(3, 10, &["x"]),
    ]);

    let decision = select(&door, &table, None).unwrap();
    assert_eq!(decision.node_id, NodeId(2));
    assert_eq!(decision.candidates, 3);
}

#[test]
fn shared_data_co_locates_with_running_instance() {
    let door = DoorRegistration::new("lord").with_policy(MultiNodePolicy::SharedData);
    let table = nodes(vec![node(1, 10, &[]), node(2, 10, &["lord", "x"])]);
    let decision = select(&door, &table, None).unwrap();
    assert_eq!(decision.node_id, NodeId(2));
    assert_eq!(decision.strategy, Strategy::CoLocated);

    let table = nodes(vec![node(1, 10, &["x"]), node(2, 10, &[])]);
    let decision = select(&door, &table, None).unwrap();
    assert_eq!(decision.node_id, NodeId(2));
    assert_eq!(decision.strategy, Strategy::LeastLoaded);
}

#[test]
fn exclusive_instances_needs_a_node_under_the_ceiling() {
    let door = DoorRegistration::new("lord")
        .with_policy(MultiNodePolicy::ExclusiveInstances)
        .with_max_instances(1);
    let table = nodes(vec![node(1, 10, &["lord"]), node(2, 10, &[])]);
    let decision = select(&door, &table, None).unwrap();
    assert_eq!(decision.node_id, NodeId(2));
    assert_eq!(decision.strategy, Strategy::InstanceCeiling);

    let table = nodes(vec![node(1, 10, &["lord"])]);
    let err = select(&door, &table, None).unwrap_err();
    assert!(matches!(err, CoordinatorError::MaxInstancesReached { max_instances: 1, .. }));
}

#[test]
fn multi_user_without_balancing_is_least_loaded() {
    let door = DoorRegistration::new("tw2002").with_policy(MultiNodePolicy::Competitive);
    let table = nodes(vec![node(1, 10, &["x"]), node(2, 10, &[])]);
    let mut rng = StdRng::seed_from_u64(1);

    let decision =
        select_best_node(&door, &table, None, &ELIGIBLE, false, &mut rng).unwrap();
    assert_eq!(decision.node_id, NodeId(2));
    assert_eq!(decision.strategy, Strategy::LeastLoaded);
}

#[test]
fn weighted_selection_favours_idle_and_preferring_nodes() {
    let door = DoorRegistration::new("tw2002").with_policy(MultiNodePolicy::Cooperative);
    let busy = node(1, 10, &["a"; 8]);
    let mut idle = node(2, 10, &[]);
    idle.preferences.preferred_doors = vec![DoorId::new("tw2002")];
    let table = nodes(vec![busy, idle]);

    // weights: node 1 = 0.2, node 2 = 1.0 * 1.5
    let mut rng = StdRng::seed_from_u64(42);
    let mut picks = BTreeMap::new();
    for _ in 0..1000 {
        let decision =
            select_best_node(&door, &table, None, &ELIGIBLE, true, &mut rng).unwrap();
        assert_eq!(decision.strategy, Strategy::WeightedRandom);
        *picks.entry(decision.node_id).or_insert(0) += 1;
    }

    let idle_picks = picks.get(&NodeId(2)).copied().unwrap_or(0);
    let busy_picks = picks.get(&NodeId(1)).copied().unwrap_or(0);
    assert!(busy_picks > 0);
    assert!(idle_picks > busy_picks * 4, "{:?}", picks);
}

#[test]
fn weight_floor_keeps_full_nodes_in_the_draw() {
    let door = DoorRegistration::new("tw2002");
    let mut full = node(1, 10, &[]);
    full.load_score = 1.0;
    assert!((weight(&full, &door) - MIN_WEIGHT).abs() < f64::EPSILON);
}
