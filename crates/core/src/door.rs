// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Door registrations and the caller-supplied context used for access checks

use crate::id::DoorId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// How (and whether) simultaneous instances of one door may run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MultiNodePolicy {
    /// One user per instance, placed on the least loaded node
    #[default]
    SingleUser,
    /// Instances share data files, co-locate with a running instance when possible
    SharedData,
    /// Global ceiling of `max_instances` across all nodes
    ExclusiveInstances,
    Cooperative,
    Competitive,
}

impl MultiNodePolicy {
    /// Multi-user doors are placed by weighted random selection when load balancing is on
    pub fn is_multi_user(self) -> bool {
        matches!(self, MultiNodePolicy::Cooperative | MultiNodePolicy::Competitive)
    }
}

impl std::fmt::Display for MultiNodePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MultiNodePolicy::SingleUser => "single-user",
            MultiNodePolicy::SharedData => "shared-data",
            MultiNodePolicy::ExclusiveInstances => "exclusive-instances",
            MultiNodePolicy::Cooperative => "cooperative",
            MultiNodePolicy::Competitive => "competitive",
        };
        f.write_str(name)
    }
}

fn default_max_instances() -> usize {
    1
}

fn default_enabled() -> bool {
    true
}

/// A door as declared by the door registry. The coordinator never mutates it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DoorRegistration {
    pub id: DoorId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub policy: MultiNodePolicy,
    /// Global instance ceiling, enforced for `exclusive-instances`
    #[serde(default = "default_max_instances")]
    pub max_instances: usize,
    /// Resources locked in shared mode for every instance
    #[serde(default)]
    pub shared_resources: Vec<String>,
    /// Resources locked in exclusive mode for every instance
    #[serde(default)]
    pub exclusive_resources: Vec<String>,
    #[serde(default)]
    pub min_access_level: u32,
    #[serde(default)]
    pub required_flags: Vec<String>,
    #[serde(default)]
    pub forbidden_flags: Vec<String>,
    /// Users with less time left than this are turned away
    #[serde(default, with = "humantime_serde")]
    pub min_time_remaining: Duration,
    /// Per-session limit; overrides the coordinator's instance timeout
    #[serde(default, with = "humantime_serde")]
    pub time_limit: Option<Duration>,
    /// Operating system the door binary needs, matched against node capabilities
    #[serde(default)]
    pub required_os: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl DoorRegistration {
    pub fn new(id: impl Into<DoorId>) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            policy: MultiNodePolicy::default(),
            max_instances: default_max_instances(),
            shared_resources: Vec::new(),
            exclusive_resources: Vec::new(),
            min_access_level: 0,
            required_flags: Vec::new(),
            forbidden_flags: Vec::new(),
            min_time_remaining: Duration::ZERO,
            time_limit: None,
            required_os: None,
            enabled: true,
        }
    }

    pub fn with_policy(mut self, policy: MultiNodePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_instances(mut self, max_instances: usize) -> Self {
        self.max_instances = max_instances;
        self
    }

    pub fn with_shared_resources<S: Into<String>>(
        mut self,
        resources: impl IntoIterator<Item = S>,
    ) -> Self {
        self.shared_resources = resources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_exclusive_resources<S: Into<String>>(
        mut self,
        resources: impl IntoIterator<Item = S>,
    ) -> Self {
        self.exclusive_resources = resources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_min_access_level(mut self, level: u32) -> Self {
        self.min_access_level = level;
        self
    }

    pub fn with_required_flags<S: Into<String>>(
        mut self,
        flags: impl IntoIterator<Item = S>,
    ) -> Self {
        self.required_flags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_forbidden_flags<S: Into<String>>(
        mut self,
        flags: impl IntoIterator<Item = S>,
    ) -> Self {
        self.forbidden_flags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_min_time_remaining(mut self, min: Duration) -> Self {
        self.min_time_remaining = min;
        self
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    pub fn with_required_os(mut self, os: impl Into<String>) -> Self {
        self.required_os = Some(os.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Compare the caller-supplied user context against this door's limits.
    ///
    /// Returns the reason for refusal.
    pub fn check_access(&self, user: &UserContext) -> Result<(), String> {
        if user.access_level < self.min_access_level {
            return Err(format!(
                "access level {} below required {}",
                user.access_level, self.min_access_level
            ));
        }

        if let Some(flag) = self
            .required_flags
            .iter()
            .find(|flag| !user.flags.contains(*flag))
        {
            return Err(format!("missing required flag {}", flag));
        }

        if let Some(flag) = self
            .forbidden_flags
            .iter()
            .find(|flag| user.flags.contains(*flag))
        {
            return Err(format!("flag {} not allowed", flag));
        }

        if user.time_remaining.is_zero() {
            return Err("no time remaining".to_string());
        }

        if user.time_remaining < self.min_time_remaining {
            return Err(format!(
                "{}s remaining, door needs {}s",
                user.time_remaining.as_secs(),
                self.min_time_remaining.as_secs()
            ));
        }

        Ok(())
    }
}

/// User attributes supplied by the caller for access checks. The coordinator
/// never reads or writes user records itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserContext {
    pub access_level: u32,
    pub flags: BTreeSet<String>,
    pub time_remaining: Duration,
    /// Priority used if the request ends up queued
    pub queue_priority: i32,
}

impl UserContext {
    pub fn new(access_level: u32, time_remaining: Duration) -> Self {
        Self {
            access_level,
            flags: BTreeSet::new(),
            time_remaining,
            queue_priority: 0,
        }
    }

    pub fn with_flags<S: Into<String>>(mut self, flags: impl IntoIterator<Item = S>) -> Self {
        self.flags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_queue_priority(mut self, priority: i32) -> Self {
        self.queue_priority = priority;
        self
    }
}

/// Details of the terminal session making the request
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: Option<String>,
    pub remote_addr: Option<String>,
    pub terminal: Option<String>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
#[path = "door_tests.rs"]
mod tests;
