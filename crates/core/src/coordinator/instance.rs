// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Door instances and their status state machine
//!
//! ```text
//! Starting -> Running -> [Suspended] -> Finishing -> Finished | Crashed | Killed | TimedOut
//! ```

use super::CoordinatorError;
use crate::id::{DoorId, InstanceId, LockId, NodeId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceStatus {
    Starting,
    Running,
    Suspended,
    Finishing,
    Finished,
    Crashed,
    Killed,
    TimedOut,
}

impl InstanceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InstanceStatus::Finished
                | InstanceStatus::Crashed
                | InstanceStatus::Killed
                | InstanceStatus::TimedOut
        )
    }

    /// Starting and running instances occupy a slot on their node
    pub fn counts_against_capacity(self) -> bool {
        matches!(self, InstanceStatus::Starting | InstanceStatus::Running)
    }

    pub fn can_transition_to(self, next: InstanceStatus) -> bool {
        use InstanceStatus::*;
        match self {
            Starting => matches!(next, Running | Finishing),
            Running => matches!(next, Suspended | Finishing),
            Suspended => matches!(next, Running | Finishing),
            Finishing => next.is_terminal(),
            Finished | Crashed | Killed | TimedOut => false,
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InstanceStatus::Starting => "starting",
            InstanceStatus::Running => "running",
            InstanceStatus::Suspended => "suspended",
            InstanceStatus::Finishing => "finishing",
            InstanceStatus::Finished => "finished",
            InstanceStatus::Crashed => "crashed",
            InstanceStatus::Killed => "killed",
            InstanceStatus::TimedOut => "timed-out",
        };
        f.write_str(name)
    }
}

/// Why an instance is being torn down without a normal release
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Exceeded its timeout
    TimedOut,
    /// Removed by an operator or the process launcher
    Killed,
}

impl Termination {
    pub(super) fn status(self) -> InstanceStatus {
        match self {
            Termination::TimedOut => InstanceStatus::TimedOut,
            Termination::Killed => InstanceStatus::Killed,
        }
    }
}

/// One live execution of a door for one user on one node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DoorInstance {
    pub id: InstanceId,
    pub door_id: DoorId,
    pub node_id: NodeId,
    pub user_id: UserId,
    pub session_id: Option<String>,
    pub started_at: Instant,
    pub last_activity: Instant,
    pub started_wall: DateTime<Utc>,
    /// Locks held by this instance, released with it
    pub lock_ids: Vec<LockId>,
    pub status: InstanceStatus,
    /// Age limit enforced by the cleanup tick
    pub timeout: Duration,
}

impl DoorInstance {
    /// Move to `next`, refusing transitions the state machine does not allow
    pub fn transition(&mut self, next: InstanceStatus) -> Result<(), CoordinatorError> {
        if !self.status.can_transition_to(next) {
            return Err(CoordinatorError::InvalidTransition {
                instance_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    pub fn is_timed_out(&self, now: Instant) -> bool {
        self.age(now) > self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn instance() -> DoorInstance {
        let now = Instant::now();
        DoorInstance {
            id: InstanceId::new("lord-n1-alice-0-1"),
            door_id: DoorId::new("lord"),
            node_id: NodeId(1),
            user_id: UserId::new("alice"),
            session_id: None,
            started_at: now,
            last_activity: now,
            started_wall: Utc::now(),
            lock_ids: Vec::new(),
            status: InstanceStatus::Starting,
            timeout: Duration::from_secs(60),
        }
    }

    #[parameterized(
        start = { InstanceStatus::Starting, InstanceStatus::Running, true },
        start_abort = { InstanceStatus::Starting, InstanceStatus::Finishing, true },
        suspend = { InstanceStatus::Running, InstanceStatus::Suspended, true },
        resume = { InstanceStatus::Suspended, InstanceStatus::Running, true },
        finish_suspended = { InstanceStatus::Suspended, InstanceStatus::Finishing, true },
        finish = { InstanceStatus::Finishing, InstanceStatus::Finished, true },
        crash = { InstanceStatus::Finishing, InstanceStatus::Crashed, true },
        skip_finishing = { InstanceStatus::Running, InstanceStatus::Finished, false },
        suspend_starting = { InstanceStatus::Starting, InstanceStatus::Suspended, false },
        back_to_start = { InstanceStatus::Running, InstanceStatus::Starting, false },
        after_terminal = { InstanceStatus::Finished, InstanceStatus::Running, false },
    )]
    fn transitions(from: InstanceStatus, to: InstanceStatus, allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn only_starting_and_running_count() {
        assert!(InstanceStatus::Starting.counts_against_capacity());
        assert!(InstanceStatus::Running.counts_against_capacity());
        assert!(!InstanceStatus::Suspended.counts_against_capacity());
        assert!(!InstanceStatus::Finishing.counts_against_capacity());
    }

    #[test]
    fn invalid_transition_is_an_error() {
        let mut instance = instance();
        let err = instance.transition(InstanceStatus::Finished).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTransition { .. }));
        assert_eq!(instance.status, InstanceStatus::Starting);

        instance.transition(InstanceStatus::Running).unwrap();
        assert_eq!(instance.status, InstanceStatus::Running);
    }

    #[test]
    fn timeout_is_strictly_greater_than_limit() {
        let instance = instance();
        let start = instance.started_at;
        assert!(!instance.is_timed_out(start + Duration::from_secs(60)));
        assert!(instance.is_timed_out(start + Duration::from_secs(61)));
    }
}
