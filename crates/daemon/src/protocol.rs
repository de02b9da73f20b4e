// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request/response protocol between doormand and its callers.
//!
//! Wire format: a 4-byte big-endian length, then that many bytes of JSON.
//! One request and one response per connection.

use std::time::Duration;

use doorman_core::storage::StorableInstance;
use doorman_core::{DoorId, InstanceId, NodeId, UserId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Read and write timeout on the daemon side
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest message accepted, in bytes
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Who is asking for a door, as the session layer knows them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: UserId,
    pub access_level: u32,
    #[serde(default)]
    pub flags: Vec<String>,
    pub time_remaining_secs: u64,
    #[serde(default)]
    pub queue_priority: i32,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    Ping,
    Hello {
        version: String,
    },
    Status,
    /// Launch a door, or queue the caller when no node can take it
    RequestAccess {
        door_id: DoorId,
        node_id: Option<NodeId>,
        caller: Caller,
    },
    /// Normal end of a door session
    Release {
        instance_id: InstanceId,
    },
    Terminate {
        instance_id: InstanceId,
    },
    QueueAdd {
        door_id: DoorId,
        user_id: UserId,
        node_id: Option<NodeId>,
        #[serde(default)]
        priority: i32,
    },
    QueueRemove {
        door_id: DoorId,
        user_id: UserId,
    },
    QueuePosition {
        door_id: DoorId,
        user_id: UserId,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Pong,
    Hello {
        version: String,
    },
    Ok,
    ShuttingDown,
    Status {
        uptime_secs: u64,
        doors: usize,
        nodes: usize,
        available_nodes: usize,
        instances: usize,
        queued: usize,
        locks: usize,
        events_dropped: u64,
    },
    Launched {
        instance: StorableInstance,
    },
    Ended {
        instance: StorableInstance,
    },
    /// 1-based position in the door's queue
    Queued {
        position: usize,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message of {0} bytes exceeds the limit")]
    MessageTooLarge(usize),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timed out")]
    Timeout,
}

/// JSON body of a message, without the length prefix
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(message)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> Result<(), ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(data.len()));
    }
    let len = u32::try_from(data.len()).map_err(|_| ProtocolError::MessageTooLarge(data.len()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(len));
    }
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(data)
}

pub async fn read_request<R: AsyncRead + Unpin>(
    reader: &mut R,
    timeout: Duration,
) -> Result<Request, ProtocolError> {
    let bytes = tokio::time::timeout(timeout, read_message(reader))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    decode(&bytes)
}

pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &Response,
    timeout: Duration,
) -> Result<(), ProtocolError> {
    let data = encode(response)?;
    tokio::time::timeout(timeout, write_message(writer, &data))
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
