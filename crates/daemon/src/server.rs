// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket server and connection handling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use doorman_core::coordinator::Termination;
use doorman_core::storage::StorableInstance;
use doorman_core::{
    AccessOutcome, Clock, Coordinator, DoorInstance, SessionContext, UserContext,
};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info};

use crate::lifecycle::DaemonState;
use crate::protocol::{self, Caller, Request, Response, DEFAULT_TIMEOUT, PROTOCOL_VERSION};

/// Answers requests against the daemon's coordinator
pub struct Server {
    coordinator: Arc<Coordinator>,
    start_time: Instant,
    shutdown_requested: AtomicBool,
}

impl Server {
    pub fn new(daemon: &DaemonState) -> Self {
        Self {
            coordinator: Arc::clone(&daemon.coordinator),
            start_time: daemon.start_time,
            shutdown_requested: AtomicBool::new(false),
        }
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Accept connections one at a time until a client asks for shutdown
    pub async fn run(&self, listener: UnixListener) {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    if let Err(e) = self.handle_connection(stream).await {
                        error!("Error handling connection: {}", e);
                    }
                }
                Err(e) => error!("Error accepting connection: {}", e),
            }

            if self.shutdown_requested() {
                info!("Shutdown requested via IPC");
                break;
            }
        }
    }

    /// Handle a single client connection
    pub async fn handle_connection(&self, stream: UnixStream) -> Result<(), ServerError> {
        let (mut reader, mut writer) = stream.into_split();

        let request = match protocol::read_request(&mut reader, DEFAULT_TIMEOUT).await {
            Ok(req) => req,
            Err(protocol::ProtocolError::Timeout) => {
                error!("Request read timeout");
                return Err(ServerError::Timeout);
            }
            Err(protocol::ProtocolError::ConnectionClosed) => {
                debug!("Client disconnected before sending request");
                return Ok(());
            }
            Err(e) => {
                error!("Failed to read request: {}", e);
                return Err(ServerError::Protocol(e));
            }
        };

        debug!("Received request: {:?}", request);
        let response = self.handle_request(request);
        debug!("Sending response: {:?}", response);

        protocol::write_response(&mut writer, &response, DEFAULT_TIMEOUT)
            .await
            .map_err(ServerError::Protocol)?;
        Ok(())
    }

    /// Handle a single request and return a response
    pub fn handle_request(&self, request: Request) -> Response {
        let coordinator = &self.coordinator;
        match request {
            Request::Ping => Response::Pong,

            Request::Hello { version: _ } => Response::Hello {
                version: PROTOCOL_VERSION.to_string(),
            },

            Request::Status => {
                let stats = coordinator.stats();
                Response::Status {
                    uptime_secs: self.start_time.elapsed().as_secs(),
                    doors: stats.doors,
                    nodes: stats.nodes,
                    available_nodes: stats.available_nodes,
                    instances: stats.instances.values().sum(),
                    queued: stats.queued.values().sum(),
                    locks: stats.locks,
                    events_dropped: stats.events_dropped,
                }
            }

            Request::RequestAccess {
                door_id,
                node_id,
                caller,
            } => {
                let (user, session) = contexts(&caller);
                match coordinator.request_door_access(
                    &door_id,
                    node_id,
                    &caller.user_id,
                    &user,
                    &session,
                ) {
                    Ok(AccessOutcome::Launched(instance)) => Response::Launched {
                        instance: self.summary(&instance),
                    },
                    Ok(AccessOutcome::Queued { position }) => Response::Queued { position },
                    Err(e) => error_response(e),
                }
            }

            Request::Release { instance_id } => {
                match coordinator.release_door_access(&instance_id) {
                    Ok(instance) => Response::Ended {
                        instance: self.summary(&instance),
                    },
                    Err(e) => error_response(e),
                }
            }

            Request::Terminate { instance_id } => {
                match coordinator.force_terminate_instance(&instance_id, Termination::Killed) {
                    Ok(instance) => Response::Ended {
                        instance: self.summary(&instance),
                    },
                    Err(e) => error_response(e),
                }
            }

            Request::QueueAdd {
                door_id,
                user_id,
                node_id,
                priority,
            } => match coordinator.add_to_queue(&door_id, &user_id, node_id, priority) {
                Ok(position) => Response::Queued { position },
                Err(e) => error_response(e),
            },

            Request::QueueRemove { door_id, user_id } => {
                match coordinator.remove_from_queue(&door_id, &user_id) {
                    Ok(_) => Response::Ok,
                    Err(e) => error_response(e),
                }
            }

            Request::QueuePosition { door_id, user_id } => {
                match coordinator.queue_position(&door_id, &user_id) {
                    Ok(position) => Response::Queued { position },
                    Err(e) => error_response(e),
                }
            }

            Request::Shutdown => {
                self.shutdown_requested.store(true, Ordering::SeqCst);
                Response::ShuttingDown
            }
        }
    }

    fn summary(&self, instance: &DoorInstance) -> StorableInstance {
        StorableInstance::from_instance(instance, self.coordinator.clock().now())
    }
}

fn contexts(caller: &Caller) -> (UserContext, SessionContext) {
    let user = UserContext::new(
        caller.access_level,
        Duration::from_secs(caller.time_remaining_secs),
    )
    .with_flags(caller.flags.iter().cloned())
    .with_queue_priority(caller.queue_priority);
    let session = SessionContext {
        session_id: caller.session_id.clone(),
        ..SessionContext::default()
    };
    (user, session)
}

fn error_response(error: impl std::fmt::Display) -> Response {
    Response::Error {
        message: error.to_string(),
    }
}

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Request timeout")]
    Timeout,
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
