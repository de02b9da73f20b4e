// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! doormand client for CLI commands

use std::path::PathBuf;
use std::time::Duration;

use doorman_core::storage::StorableInstance;
use doorman_core::{DoorId, InstanceId, NodeId, UserId};
use doorman_daemon::protocol::{self, ProtocolError};
use doorman_daemon::{Caller, Request, Response};
use serde::Serialize;
use thiserror::Error;
use tokio::net::UnixStream;

/// Timeout for IPC requests, overridable in milliseconds
pub fn timeout_ipc() -> Duration {
    std::env::var("DOORMAN_TIMEOUT_IPC_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5))
}

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("doormand not running (no socket at {})", .0.display())]
    DaemonNotRunning(PathBuf),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{0}")]
    Rejected(String),

    #[error("Unexpected response from doormand")]
    UnexpectedResponse,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not determine state directory")]
    NoStateDir,
}

/// What a door request came to
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum Access {
    Launched { instance: StorableInstance },
    Queued { position: usize },
}

/// Live counters from a running doormand
#[derive(Debug, Serialize)]
pub struct LiveStatus {
    pub uptime_secs: u64,
    pub doors: usize,
    pub nodes: usize,
    pub available_nodes: usize,
    pub instances: usize,
    pub queued: usize,
    pub locks: usize,
    pub events_dropped: u64,
}

/// Daemon client
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    /// Connect to a running doormand
    pub fn connect() -> Result<Self, ClientError> {
        let socket_path = state_dir()?.join("doormand.sock");
        if !socket_path.exists() {
            return Err(ClientError::DaemonNotRunning(socket_path));
        }
        Ok(Self { socket_path })
    }

    /// Send a request and receive a response
    pub async fn send(&self, request: Request) -> Result<Response, ClientError> {
        let timeout = timeout_ipc();
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (mut reader, mut writer) = stream.into_split();

        let data = protocol::encode(&request)?;
        tokio::time::timeout(timeout, protocol::write_message(&mut writer, &data))
            .await
            .map_err(|_| ProtocolError::Timeout)??;

        let response_bytes = tokio::time::timeout(timeout, protocol::read_message(&mut reader))
            .await
            .map_err(|_| ProtocolError::Timeout)??;

        Ok(protocol::decode(&response_bytes)?)
    }

    pub async fn request_access(
        &self,
        door_id: DoorId,
        node_id: Option<NodeId>,
        caller: Caller,
    ) -> Result<Access, ClientError> {
        match self
            .send(Request::RequestAccess {
                door_id,
                node_id,
                caller,
            })
            .await?
        {
            Response::Launched { instance } => Ok(Access::Launched { instance }),
            Response::Queued { position } => Ok(Access::Queued { position }),
            Response::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn release(&self, instance_id: InstanceId) -> Result<StorableInstance, ClientError> {
        self.ended(Request::Release { instance_id }).await
    }

    pub async fn terminate(
        &self,
        instance_id: InstanceId,
    ) -> Result<StorableInstance, ClientError> {
        self.ended(Request::Terminate { instance_id }).await
    }

    async fn ended(&self, request: Request) -> Result<StorableInstance, ClientError> {
        match self.send(request).await? {
            Response::Ended { instance } => Ok(instance),
            Response::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn join_queue(
        &self,
        door_id: DoorId,
        user_id: UserId,
        node_id: Option<NodeId>,
        priority: i32,
    ) -> Result<usize, ClientError> {
        self.position_of(Request::QueueAdd {
            door_id,
            user_id,
            node_id,
            priority,
        })
        .await
    }

    pub async fn queue_position(
        &self,
        door_id: DoorId,
        user_id: UserId,
    ) -> Result<usize, ClientError> {
        self.position_of(Request::QueuePosition { door_id, user_id })
            .await
    }

    async fn position_of(&self, request: Request) -> Result<usize, ClientError> {
        match self.send(request).await? {
            Response::Queued { position } => Ok(position),
            Response::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn leave_queue(&self, door_id: DoorId, user_id: UserId) -> Result<(), ClientError> {
        match self.send(Request::QueueRemove { door_id, user_id }).await? {
            Response::Ok => Ok(()),
            Response::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Get daemon status
    pub async fn status(&self) -> Result<LiveStatus, ClientError> {
        match self.send(Request::Status).await? {
            Response::Status {
                uptime_secs,
                doors,
                nodes,
                available_nodes,
                instances,
                queued,
                locks,
                events_dropped,
            } => Ok(LiveStatus {
                uptime_secs,
                doors,
                nodes,
                available_nodes,
                instances,
                queued,
                locks,
                events_dropped,
            }),
            Response::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Request daemon shutdown
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        match self.send(Request::Shutdown).await? {
            Response::Ok | Response::ShuttingDown => Ok(()),
            Response::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}

/// Same lookup order as doormand
pub fn state_dir() -> Result<PathBuf, ClientError> {
    if let Ok(dir) = std::env::var("DOORMAN_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("doorman"));
    }

    let home = std::env::var("HOME").map_err(|_| ClientError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/doorman"))
}
