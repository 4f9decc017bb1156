// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! TCP transport to a Gearman job server.

use async_trait::async_trait;
use gearman_protocol::{Connection, ConnectionConfig, ConnectionError, Packet};

use super::Transport;

/// TCP-based transport wrapping a protocol [`Connection`].
pub struct TcpTransport {
    connection: Connection,
}

impl TcpTransport {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            connection: Connection::new(config),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        // Always start from a fresh stream
        self.connection.close();
        self.connection.connect().await
    }

    fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    fn submit(&mut self, packet: Packet) -> Result<(), ConnectionError> {
        self.connection.queue(&packet)
    }

    fn has_pending_writes(&self) -> bool {
        self.connection.has_pending_writes()
    }

    async fn flush(&mut self) -> Result<(), ConnectionError> {
        self.connection.flush().await
    }

    async fn ready(&mut self) -> Result<(), ConnectionError> {
        self.connection.ready().await
    }

    fn drive_io(&mut self) -> Result<Vec<Packet>, ConnectionError> {
        self.connection.drive_io()
    }

    fn close(&mut self) {
        self.connection.close();
    }

    fn describe(&self) -> String {
        self.connection.config().server_addr.clone()
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("connection", &self.connection)
            .finish()
    }
}
