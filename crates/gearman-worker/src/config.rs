// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker configuration.

use std::env;
use std::time::Duration;

use gearman_protocol::{ConnectionConfig, DEFAULT_PORT};

use crate::error::{Result, WorkerError};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Job server address as `host:port` (default: "127.0.0.1:4730")
    pub server_addr: String,
    /// Identity sent with SET_CLIENT_ID (default: none)
    pub worker_id: Option<String>,
    /// Connection timeout in milliseconds (default: 10_000)
    pub connect_timeout_ms: u64,
    /// Delay after a failed connect attempt in milliseconds (default: 3_000)
    pub reconnect_delay_ms: u64,
    /// Request jobs with GRAB_JOB_UNIQ instead of GRAB_JOB (default: false)
    pub require_unique_id: bool,
    /// Stop grabbing jobs while this many are queued or running (default: unbounded)
    pub max_queued_jobs: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{DEFAULT_PORT}"),
            worker_id: None,
            connect_timeout_ms: 10_000,
            reconnect_delay_ms: 3_000,
            require_unique_id: false,
            max_queued_jobs: None,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// # Optional Environment Variables
    /// - `GEARMAN_SERVER_ADDR` - Job server address (default: "127.0.0.1:4730")
    /// - `GEARMAN_WORKER_ID` - Worker identity sent to the server
    /// - `GEARMAN_CONNECT_TIMEOUT_MS` - Connection timeout (default: 10000)
    /// - `GEARMAN_RECONNECT_DELAY_MS` - Back-off after a failed connect (default: 3000)
    /// - `GEARMAN_REQUIRE_UNIQUE_ID` - Use GRAB_JOB_UNIQ (default: false)
    /// - `GEARMAN_MAX_QUEUED_JOBS` - Queue depth that pauses grabbing (default: unbounded)
    pub fn from_env() -> Result<Self> {
        let server_addr = env::var("GEARMAN_SERVER_ADDR")
            .unwrap_or_else(|_| format!("127.0.0.1:{DEFAULT_PORT}"));
        if server_addr.rsplit_once(':').is_none() {
            return Err(WorkerError::Config(format!(
                "invalid GEARMAN_SERVER_ADDR: {server_addr} (expected host:port)"
            )));
        }

        let worker_id = env::var("GEARMAN_WORKER_ID").ok().filter(|v| !v.is_empty());

        let connect_timeout_ms = parse_var::<u64>("GEARMAN_CONNECT_TIMEOUT_MS")?.unwrap_or(10_000);
        let reconnect_delay_ms = parse_var::<u64>("GEARMAN_RECONNECT_DELAY_MS")?.unwrap_or(3_000);

        let require_unique_id = env::var("GEARMAN_REQUIRE_UNIQUE_ID")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let max_queued_jobs = parse_var::<usize>("GEARMAN_MAX_QUEUED_JOBS")?;
        if max_queued_jobs == Some(0) {
            return Err(WorkerError::Config(
                "GEARMAN_MAX_QUEUED_JOBS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            server_addr,
            worker_id,
            connect_timeout_ms,
            reconnect_delay_ms,
            require_unique_id,
            max_queued_jobs,
        })
    }

    /// Create a configuration for the given server.
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            server_addr: format!("{host}:{port}"),
            ..Default::default()
        }
    }

    /// Set the worker identity.
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = Some(id.into());
        self
    }

    /// Set the back-off after a failed connect attempt.
    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    /// Request jobs together with their unique ids.
    pub fn with_require_unique_id(mut self, required: bool) -> Self {
        self.require_unique_id = required;
        self
    }

    /// Pause grabbing while `max` jobs are queued or running.
    pub fn with_max_queued_jobs(mut self, max: usize) -> Self {
        self.max_queued_jobs = Some(max.max(1));
        self
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Connection settings for the protocol layer.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            server_addr: self.server_addr.clone(),
            connect_timeout_ms: self.connect_timeout_ms,
            ..Default::default()
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| WorkerError::Config(format!("invalid {name}: {value}"))),
        Err(_) => Ok(None),
    }
}
