// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Alert rules
//!
//! Maps events to the level they are reported at, by pattern matching on the
//! event name.

use crate::event::{Event, EventPattern};

/// How loudly an event is reported
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertLevel {
    Info,
    Warn,
}

/// Ordered pattern rules; the first match decides
#[derive(Clone, Debug, Default)]
pub struct AlertRules {
    rules: Vec<(EventPattern, AlertLevel)>,
}

impl AlertRules {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Warn on every pattern in `alert_on`, info for everything else
    pub fn from_patterns<'a>(alert_on: impl IntoIterator<Item = &'a EventPattern>) -> Self {
        let mut rules = Self::new();
        for pattern in alert_on {
            rules.rules.push((pattern.clone(), AlertLevel::Warn));
        }
        rules
    }

    pub fn add_rule(&mut self, pattern: &str, level: AlertLevel) {
        self.rules.push((EventPattern::new(pattern), level));
    }

    pub fn level_for(&self, event: &Event) -> AlertLevel {
        let name = event.name();
        self.rules
            .iter()
            .find(|(pattern, _)| pattern.matches(name))
            .map(|(_, level)| *level)
            .unwrap_or(AlertLevel::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{DoorId, UserId};

    fn queue_timeout() -> Event {
        Event::QueueTimedOut {
            door_id: DoorId::new("lord"),
            user_id: UserId::new("alice"),
            waited_secs: 301,
        }
    }

    #[test]
    fn unmatched_events_are_info() {
        let rules = AlertRules::new();
        assert_eq!(rules.level_for(&queue_timeout()), AlertLevel::Info);
    }

    #[test]
    fn configured_patterns_warn() {
        let patterns = vec![EventPattern::new("queue:")];
        let rules = AlertRules::from_patterns(&patterns);
        assert_eq!(rules.level_for(&queue_timeout()), AlertLevel::Warn);
    }

    #[test]
    fn first_matching_rule_wins() {
        let mut rules = AlertRules::new();
        rules.add_rule("queue:timeout", AlertLevel::Info);
        rules.add_rule("queue:*", AlertLevel::Warn);
        assert_eq!(rules.level_for(&queue_timeout()), AlertLevel::Info);
    }
}
