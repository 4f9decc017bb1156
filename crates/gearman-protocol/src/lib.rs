// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Gearman Protocol - binary packet codec and TCP session
//!
//! This crate provides the wire protocol used by `gearman-worker` to talk
//! to a Gearman job server.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    gearman-protocol                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Session: buffered non-blocking TCP (Connection)            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Framing: 12-byte header + NUL-separated arguments          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Model: Packet / PacketType / Field                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use gearman_protocol::{Connection, ConnectionConfig, Packet};
//!
//! let mut conn = Connection::new(ConnectionConfig::new("127.0.0.1", 4730));
//! conn.connect().await?;
//!
//! conn.queue(&Packet::can_do("reverse"))?;
//! conn.queue(&Packet::grab_job())?;
//! conn.flush().await?;
//!
//! conn.ready().await?;
//! for packet in conn.drive_io()? {
//!     println!("{:?}", packet.kind);
//! }
//! ```

pub mod connection;
pub mod frame;
pub mod packet;

// Re-export main types
pub use connection::{
    Connection, ConnectionConfig, ConnectionError, DEFAULT_PORT, MAX_READ_PER_DRIVE,
};
pub use frame::{FrameError, HEADER_SIZE, MAX_PACKET_SIZE};
pub use packet::{Field, Magic, Packet, PacketType};
