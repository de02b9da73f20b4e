// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded, fire-and-forget event channel
//!
//! Emission never blocks the caller. When the channel is full (or the sink has
//! gone away) the event is dropped and counted.

use crate::event::Event;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Create an emitter/receiver pair with room for `capacity` pending events
pub fn channel(capacity: usize) -> (EventEmitter, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        EventEmitter {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        EventReceiver { rx },
    )
}

/// Sending half, cheap to clone
#[derive(Clone, Debug)]
pub struct EventEmitter {
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

impl EventEmitter {
    /// An emitter with no receiver; every event is counted as dropped
    pub fn detached() -> Self {
        let (emitter, _) = channel(1);
        emitter
    }

    pub fn emit(&self, event: Event) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(event = event.name(), "event channel full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Number of events lost to overflow or a closed sink
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Receiving half, owned by whoever drives the event sink
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<Event>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Take everything currently buffered
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}
