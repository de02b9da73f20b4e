// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event sink that writes lifecycle events to the daemon log

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use doorman_core::config::{AlertLevel, AlertRules};
use doorman_core::{Event, EventSink};

/// Logs each event at info, or warn when an alert rule matches
pub struct TracingSink {
    rules: AlertRules,
    delivered: AtomicU64,
    alerts: AtomicU64,
}

impl TracingSink {
    pub fn new(rules: AlertRules) -> Self {
        Self {
            rules,
            delivered: AtomicU64::new(0),
            alerts: AtomicU64::new(0),
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Events logged at warn level
    pub fn alerts(&self) -> u64 {
        self.alerts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventSink for TracingSink {
    async fn deliver(&self, event: &Event) {
        let fields = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => format!("<unserializable: {}>", e),
        };

        match self.rules.level_for(event) {
            AlertLevel::Info => tracing::info!(event = event.name(), %fields, "event"),
            AlertLevel::Warn => {
                self.alerts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(event = event.name(), %fields, "event")
            }
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }
}
