// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connection lifecycle for the job server session.

use std::time::Duration;

use gearman_protocol::{ConnectionError, Packet};
use tracing::{info, instrument, warn};

use crate::registry::FunctionRegistry;
use crate::transport::Transport;

/// The worker's one session with a job server.
pub(crate) struct Session {
    transport: Box<dyn Transport>,
    reconnect_delay: Duration,
    /// Bumped on every successful connect.
    generation: u64,
}

impl Session {
    pub(crate) fn new(transport: Box<dyn Transport>, reconnect_delay: Duration) -> Self {
        Self {
            transport,
            reconnect_delay,
            generation: 0,
        }
    }

    /// Try to (re)connect.
    ///
    /// On success the registry is marked dirty so the full capability set
    /// is re-advertised, and `worker_id` (if any) is queued as
    /// SET_CLIENT_ID. On failure the call sleeps for the reconnect delay
    /// before returning `false`.
    #[instrument(skip_all, fields(server = %self.transport.describe()))]
    pub(crate) async fn reconnect(
        &mut self,
        registry: &FunctionRegistry,
        worker_id: Option<&str>,
    ) -> bool {
        info!("Starting reconnect");
        match self.transport.connect().await {
            Ok(()) => {
                self.generation += 1;
                registry.mark_dirty();
                if let Some(id) = worker_id
                    && let Err(e) = self.transport.submit(Packet::set_client_id(id))
                {
                    warn!(error = %e, "Failed to queue worker id");
                }
                info!(generation = self.generation, "Session established");
                true
            }
            Err(e) => {
                warn!(
                    error = %e,
                    delay_ms = self.reconnect_delay.as_millis() as u64,
                    "Connect failed, backing off"
                );
                tokio::time::sleep(self.reconnect_delay).await;
                false
            }
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether work assigned under `generation` still belongs to this session.
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.is_connected() && self.generation == generation
    }

    pub(crate) fn submit(&mut self, packet: Packet) -> Result<(), ConnectionError> {
        if !self.transport.is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        self.transport.submit(packet)
    }

    pub(crate) async fn flush(&mut self) -> Result<(), ConnectionError> {
        self.transport.flush().await
    }

    pub(crate) async fn ready(&mut self) -> Result<(), ConnectionError> {
        self.transport.ready().await
    }

    pub(crate) fn drive_io(&mut self) -> Result<Vec<Packet>, ConnectionError> {
        self.transport.drive_io()
    }

    /// Close the session. Calling it again while closed does nothing.
    pub(crate) fn close(&mut self) {
        if self.transport.is_connected() {
            self.transport.close();
            info!(server = %self.transport.describe(), "Session closed");
        }
    }

    pub(crate) fn describe(&self) -> String {
        self.transport.describe()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("server", &self.transport.describe())
            .field("connected", &self.transport.is_connected())
            .field("generation", &self.generation)
            .finish()
    }
}
