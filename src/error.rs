//! Error types for command handling and the server lifecycle.
//!
//! Per-command failures ([`CommandError`]) are logged by the connection loop
//! and never end the connection. Lifecycle failures ([`ServerError`]) come
//! out of `CommandServer::start()` or describe a dropped connection.

use std::net::SocketAddr;

use thiserror::Error;

use crate::server::protocol::TaskKind;

/// Reasons a single inbound message was not (fully) executed.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("malformed message: {0}")]
    Decode(#[from] DecodeError),

    #[error("unsupported task type {0}; expected 0, 1 or 2")]
    UnsupportedTaskKind(i64),

    #[error("{kind} task {task} requires an argument")]
    MissingArgument { kind: TaskKind, task: usize },

    #[error("{kind} task {task} is out of range ({len} registered)")]
    TaskIndexOutOfRange {
        kind: TaskKind,
        task: usize,
        len: usize,
    },

    #[error("{kind} task {task} has no registered handler")]
    UnassignedTask { kind: TaskKind, task: usize },

    #[error("{kind} task {task} panicked: {message}")]
    HandlerPanicked {
        kind: TaskKind,
        task: usize,
        message: String,
    },
}

/// Failures turning one frame of bytes into a command.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("invalid JSON command: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message exceeds {limit} bytes")]
    FrameTooLong { limit: usize },
}

/// Server lifecycle failures.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot resolve bind address {address}")]
    Resolve {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server is already running")]
    AlreadyRunning,

    #[error("connection to {peer} failed: {source}")]
    Connection {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

impl ServerError {
    /// True for the conditions that prevent the server from starting at all.
    pub fn is_startup_fault(&self) -> bool {
        matches!(self, ServerError::Resolve { .. } | ServerError::Bind { .. })
    }
}
