// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Transport implementations.
//!
//! The worker drives a session through this trait:
//! - `tcp`: plain TCP connection to a Gearman job server (default)
//!
//! Other implementations (test doubles, in-process servers) only need to
//! buffer outgoing packets and hand back decoded incoming ones.

pub mod tcp;

use async_trait::async_trait;
use gearman_protocol::{ConnectionError, Packet};

pub use tcp::TcpTransport;

/// Non-blocking packet transport to a single job server.
#[async_trait]
pub trait Transport: Send {
    /// (Re)establish the connection, discarding any buffered state.
    async fn connect(&mut self) -> Result<(), ConnectionError>;

    fn is_connected(&self) -> bool;

    /// Buffer a packet for sending. Never blocks.
    fn submit(&mut self, packet: Packet) -> Result<(), ConnectionError>;

    fn has_pending_writes(&self) -> bool;

    /// Write all buffered packets.
    async fn flush(&mut self) -> Result<(), ConnectionError>;

    /// Wait until [`drive_io`](Self::drive_io) can make progress.
    async fn ready(&mut self) -> Result<(), ConnectionError>;

    /// Perform pending non-blocking I/O and return the packets received.
    fn drive_io(&mut self) -> Result<Vec<Packet>, ConnectionError>;

    fn close(&mut self);

    /// Human-readable peer description for logs.
    fn describe(&self) -> String;
}
