// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background workers: the four periodic ticks, the queue pump and the event
//! drain. All of them stop when [`Workers::stop`] is called.

use std::sync::Arc;
use std::time::Duration;

use doorman_core::emitter::EventReceiver;
use doorman_core::{
    Coordinator, DoorId, EventSink, MaintenanceTask, SnapshotStore, StorableState,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::lifecycle::DaemonState;

type Maintenance = Arc<MaintenanceTask<doorman_core::SystemClock, doorman_core::UuidIdGen>>;

/// Handles of the running background tasks
pub struct Workers {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    /// Start every worker. Takes the event receiver and queue pump out of `daemon`.
    pub fn spawn(daemon: &mut DaemonState, sink: Arc<dyn EventSink>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let ticks = daemon.config.settings.ticks.clone();
        let task: Maintenance = Arc::new(
            MaintenanceTask::new(Arc::clone(&daemon.coordinator), ticks)
                .with_node_registry(daemon.catalog.clone()),
        );

        let mut handles = Vec::new();

        let coordination = Arc::clone(&task);
        handles.push(every(
            "coordination",
            task.coordination_interval(),
            shutdown.subscribe(),
            move || {
                let notified = coordination.coordination_tick();
                if notified > 0 {
                    debug!(notified, "queued users notified");
                }
            },
        ));

        let cleanup = Arc::clone(&task);
        handles.push(every(
            "cleanup",
            task.cleanup_interval(),
            shutdown.subscribe(),
            move || {
                cleanup.cleanup_tick();
            },
        ));

        let expiry = Arc::clone(&task);
        handles.push(every(
            "lock_expiry",
            task.lock_expiry_interval(),
            shutdown.subscribe(),
            move || {
                expiry.lock_expiry_tick();
            },
        ));

        handles.push(tokio::spawn(sync_loop(
            Arc::clone(&daemon.coordinator),
            daemon.store.clone(),
            task.sync_interval(),
            shutdown.subscribe(),
        )));

        if let Some(pump) = daemon.queue_pump.take() {
            handles.push(tokio::spawn(queue_pump(
                Arc::clone(&daemon.coordinator),
                pump,
                shutdown.subscribe(),
            )));
        }
        if let Some(events) = daemon.events.take() {
            handles.push(tokio::spawn(drain_events(events, sink, shutdown.subscribe())));
        }

        Self { shutdown, handles }
    }

    /// Signal every worker and wait for it to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("worker failed: {}", e);
            }
        }
    }
}

/// Run `tick` every `period` until shutdown
fn every(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: impl FnMut() + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => tick(),
                _ = shutdown.changed() => break,
            }
        }
        debug!(tick = name, "tick stopped");
    })
}

async fn sync_loop(
    coordinator: Arc<Coordinator>,
    store: SnapshotStore,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }

        let state = StorableState::capture(&coordinator);
        let store = store.clone();
        match tokio::task::spawn_blocking(move || store.save(&state)).await {
            Ok(Ok(())) => debug!("snapshot written"),
            Ok(Err(e)) => warn!(error = %e, "snapshot failed"),
            Err(e) => error!("snapshot task failed: {}", e),
        }
    }
}

/// Process the queues of doors that just freed a slot
async fn queue_pump(
    coordinator: Arc<Coordinator>,
    mut pump: mpsc::Receiver<DoorId>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            door = pump.recv() => {
                let Some(door_id) = door else { break };
                if let Err(e) = coordinator.process_queue(&door_id) {
                    warn!(door_id = %door_id, error = %e, "queue processing failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Forward events to the sink, flushing what is buffered on shutdown
async fn drain_events(
    mut events: EventReceiver,
    sink: Arc<dyn EventSink>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                sink.deliver(&event).await;
            }
            _ = shutdown.changed() => {
                for event in events.drain() {
                    sink.deliver(&event).await;
                }
                break;
            }
        }
    }
}

#[cfg(test)]
#[path = "ticks_tests.rs"]
mod tests;
