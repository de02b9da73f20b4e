// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node selection
//!
//! Pure functions over a snapshot of node state. Candidates are visited in
//! ascending node id, so ties on load score go to the lowest node id.

use super::CoordinatorError;
use crate::door::{DoorRegistration, MultiNodePolicy};
use crate::id::NodeId;
use crate::node::{NodePlacementState, NodeStatus};
use rand::Rng;
use std::collections::BTreeMap;

/// Minimum weight of a candidate in weighted selection
const MIN_WEIGHT: f64 = 0.1;
/// Weight multiplier for nodes that list the door as preferred
const PREFERRED_BONUS: f64 = 1.5;

/// How a node was chosen
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// The caller's preferred node was a candidate
    Preferred,
    LeastLoaded,
    /// Joined a node already running the door
    CoLocated,
    /// First node under the door's instance ceiling
    InstanceCeiling,
    WeightedRandom,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlacementDecision {
    pub node_id: NodeId,
    pub strategy: Strategy,
    /// Size of the candidate set the choice was made from
    pub candidates: usize,
}

/// Why `node` cannot take a new instance of `door`, if it cannot
pub fn unavailable_reason(
    node: &NodePlacementState,
    door: &DoorRegistration,
    eligible_statuses: &[NodeStatus],
) -> Option<String> {
    if node.maintenance {
        return Some("in maintenance".to_string());
    }
    if !eligible_statuses.contains(&node.status) {
        return Some(format!("status {}", node.status));
    }
    if node.load_score > node.preferences.load_threshold {
        return Some(format!(
            "load {:.2} above threshold {:.2}",
            node.load_score, node.preferences.load_threshold
        ));
    }
    if !node.capabilities.supports(&door.id) {
        return Some(format!("does not support {}", door.id));
    }
    if node.preferences.avoids(&door.id) {
        return Some(format!("avoids {}", door.id));
    }
    if !node.has_capacity() {
        return Some(format!("at capacity ({})", node.capacity));
    }
    if let Some(limit) = node.preferences.max_users_per_door.get(&door.id) {
        if node.door_count(&door.id) >= *limit {
            return Some(format!("{} limited to {} users", door.id, limit));
        }
    }
    if let Some(os) = &door.required_os {
        if node.capabilities.os.as_ref().is_some_and(|have| have != os) {
            return Some(format!("needs os {}", os));
        }
    }
    None
}

pub fn is_node_available_for_door(
    node: &NodePlacementState,
    door: &DoorRegistration,
    eligible_statuses: &[NodeStatus],
) -> bool {
    unavailable_reason(node, door, eligible_statuses).is_none()
}

/// Pick a node for a new instance of `door`
pub fn select_best_node(
    door: &DoorRegistration,
    nodes: &BTreeMap<NodeId, NodePlacementState>,
    preferred: Option<NodeId>,
    eligible_statuses: &[NodeStatus],
    load_balancing: bool,
    rng: &mut impl Rng,
) -> Result<PlacementDecision, CoordinatorError> {
    let candidates: Vec<&NodePlacementState> = nodes
        .values()
        .filter(|n| is_node_available_for_door(n, door, eligible_statuses))
        .collect();
    if candidates.is_empty() {
        return Err(CoordinatorError::NoAvailableNodes(door.id.clone()));
    }

    let decide = |node: &NodePlacementState, strategy| PlacementDecision {
        node_id: node.node_id,
        strategy,
        candidates: candidates.len(),
    };

    if let Some(node) = preferred.and_then(|id| candidates.iter().find(|n| n.node_id == id)) {
        return Ok(decide(node, Strategy::Preferred));
    }

    match door.policy {
        MultiNodePolicy::SingleUser => Ok(decide(least_loaded(&candidates), Strategy::LeastLoaded)),
        MultiNodePolicy::SharedData => {
            match candidates.iter().find(|n| n.door_count(&door.id) > 0) {
                Some(node) => Ok(decide(node, Strategy::CoLocated)),
                None => Ok(decide(least_loaded(&candidates), Strategy::LeastLoaded)),
            }
        }
        MultiNodePolicy::ExclusiveInstances => candidates
            .iter()
            .find(|n| n.door_count(&door.id) < door.max_instances)
            .map(|node| decide(node, Strategy::InstanceCeiling))
            .ok_or_else(|| CoordinatorError::MaxInstancesReached {
                door_id: door.id.clone(),
                max_instances: door.max_instances,
            }),
        policy if policy.is_multi_user() && load_balancing => {
            let node = weighted_random(&candidates, door, rng);
            Ok(decide(node, Strategy::WeightedRandom))
        }
        MultiNodePolicy::Cooperative | MultiNodePolicy::Competitive => {
            Ok(decide(least_loaded(&candidates), Strategy::LeastLoaded))
        }
    }
}

/// Lowest load score; the first (lowest id) wins a tie
fn least_loaded<'a>(candidates: &[&'a NodePlacementState]) -> &'a NodePlacementState {
    let mut best = candidates[0];
    for node in &candidates[1..] {
        if node.load_score < best.load_score {
            best = node;
        }
    }
    best
}

fn weight(node: &NodePlacementState, door: &DoorRegistration) -> f64 {
    let base = (1.0 - node.load_score).max(MIN_WEIGHT);
    if node.preferences.prefers(&door.id) {
        base * PREFERRED_BONUS
    } else {
        base
    }
}

fn weighted_random<'a>(
    candidates: &[&'a NodePlacementState],
    door: &DoorRegistration,
    rng: &mut impl Rng,
) -> &'a NodePlacementState {
    let weights: Vec<f64> = candidates.iter().map(|n| weight(n, door)).collect();
    let total: f64 = weights.iter().sum();
    let mut draw = rng.gen::<f64>() * total;

    for (node, weight) in candidates.iter().zip(&weights) {
        if draw < *weight {
            return node;
        }
        draw -= weight;
    }
    candidates[candidates.len() - 1]
}

#[cfg(test)]
#[path = "placement_tests.rs"]
mod tests;
