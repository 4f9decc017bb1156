// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker-specific error types.

use gearman_protocol::ConnectionError;
use thiserror::Error;

use crate::worker::WorkerState;

/// Errors that can occur in the worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Configuration error (missing or invalid environment variable)
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection to the job server failed
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// `run()` called while the worker is not idle
    #[error("worker cannot start while {0:?}")]
    InvalidState(WorkerState),

    /// `run()` called before any server was added
    #[error("no job server configured")]
    NoServer,

    /// Worker identity was rejected
    #[error("invalid worker id: {0}")]
    InvalidWorkerId(String),

    /// Executor failed to shut down cleanly
    #[error("executor error: {0}")]
    Executor(String),
}

/// Errors reported by job functions.
///
/// These never leave the dispatch boundary; they are logged and the
/// function is expected to have reported its own result to the server.
#[derive(Debug, Error)]
pub enum JobError {
    /// The function failed with a message
    #[error("{0}")]
    Failed(String),

    /// The function panicked
    #[error("job panicked: {0}")]
    Panicked(String),

    /// The job was cancelled during shutdown
    #[error("job cancelled")]
    Cancelled,
}

impl From<String> for JobError {
    fn from(message: String) -> Self {
        JobError::Failed(message)
    }
}

impl From<&str> for JobError {
    fn from(message: &str) -> Self {
        JobError::Failed(message.to_string())
    }
}

/// Type alias for worker results.
pub type Result<T> = std::result::Result<T, WorkerError>;
