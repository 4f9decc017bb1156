// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Buffered, non-blocking TCP session to a Gearman job server.
//!
//! Outbound packets are queued into a write buffer and flushed either
//! opportunistically from [`Connection::drive_io`] or eagerly with
//! [`Connection::flush`]. Inbound bytes are accumulated and decoded into
//! whole packets; partial packets stay buffered until the rest arrives.

use std::io;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use socket2::{SockRef, TcpKeepalive};
use thiserror::Error;
use tokio::io::{AsyncWriteExt, Interest};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument, warn};

use crate::frame::{self, FrameError};
use crate::packet::Packet;

/// Default Gearman job server port
pub const DEFAULT_PORT: u16 = 4730;

const READ_CHUNK: usize = 8 * 1024;

/// Upper bound on bytes read from the socket by a single [`Connection::drive_io`].
pub const MAX_READ_PER_DRIVE: usize = 256 * 1024;

/// Errors that can occur on a job server connection
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("no connection established")]
    NotConnected,

    #[error("connection closed by peer")]
    Closed,

    #[error("connection timed out after {0}ms")]
    Timeout(u64),
}

/// Configuration for a job server connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address as `host:port`
    pub server_addr: String,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// TCP keepalive interval in milliseconds (0 to disable)
    pub keepalive_interval_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{DEFAULT_PORT}"),
            connect_timeout_ms: 10_000,
            keepalive_interval_ms: 60_000,
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            server_addr: format!("{host}:{port}"),
            ..Default::default()
        }
    }
}

/// A single job server session.
pub struct Connection {
    config: ConnectionConfig,
    stream: Option<TcpStream>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    /// Error seen after packets that were still delivered; reported next call.
    deferred: Option<ConnectionError>,
}

impl Connection {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            stream: None,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::new(),
            deferred: None,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connect to the server. Reuses an existing stream.
    #[instrument(skip(self), fields(addr = %self.config.server_addr))]
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.stream.is_some() {
            debug!("reusing existing connection");
            return Ok(());
        }

        info!("connecting to job server");

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&self.config.server_addr))
            .await
            .map_err(|_| ConnectionError::Timeout(self.config.connect_timeout_ms))??;

        stream.set_nodelay(true)?;
        if self.config.keepalive_interval_ms > 0 {
            let keepalive = TcpKeepalive::new()
                .with_time(Duration::from_millis(self.config.keepalive_interval_ms));
            if let Err(e) = SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
                warn!(error = %e, "failed to enable TCP keepalive");
            }
        }

        info!("connected to job server");
        self.read_buf.clear();
        self.write_buf.clear();
        self.deferred = None;
        self.stream = Some(stream);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Queue a packet for sending. Nothing is written until the next flush.
    pub fn queue(&mut self, packet: &Packet) -> Result<(), ConnectionError> {
        frame::encode_into(packet, &mut self.write_buf)?;
        Ok(())
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.write_buf.is_empty()
    }

    /// Wait until the socket is readable, or writable while output is queued.
    /// Returns at once while an error is waiting to be reported.
    pub async fn ready(&self) -> Result<(), ConnectionError> {
        let stream = self.stream.as_ref().ok_or(ConnectionError::NotConnected)?;
        if self.deferred.is_some() {
            return Ok(());
        }
        let mut interest = Interest::READABLE;
        if self.has_pending_writes() {
            interest = interest | Interest::WRITABLE;
        }
        stream.ready(interest).await?;
        Ok(())
    }

    /// Write as much queued output as the socket accepts, then read and
    /// decode every complete inbound packet. Never blocks.
    ///
    /// Packets that arrived before end-of-stream or a malformed frame are
    /// returned first; the error is reported by the following call. At most
    /// [`MAX_READ_PER_DRIVE`] bytes are read per call.
    pub fn drive_io(&mut self) -> Result<Vec<Packet>, ConnectionError> {
        let stream = self.stream.as_ref().ok_or(ConnectionError::NotConnected)?;
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }

        while !self.write_buf.is_empty() {
            match stream.try_write(&self.write_buf) {
                Ok(0) => return Err(ConnectionError::Closed),
                Ok(n) => self.write_buf.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }

        let mut read_error = None;
        let mut read = 0;
        while read < MAX_READ_PER_DRIVE {
            self.read_buf.reserve(READ_CHUNK);
            match stream.try_read_buf(&mut self.read_buf) {
                Ok(0) => {
                    read_error = Some(ConnectionError::Closed);
                    break;
                }
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    read_error = Some(e.into());
                    break;
                }
            }
        }

        let mut packets = Vec::new();
        let error = loop {
            match frame::decode(&mut self.read_buf) {
                Ok(Some(packet)) => packets.push(packet),
                Ok(None) => break read_error,
                Err(e) => break Some(e.into()),
            }
        };

        match error {
            Some(err) if packets.is_empty() => Err(err),
            Some(err) => {
                debug!(
                    error = %err,
                    delivered = packets.len(),
                    "delivering buffered packets before reporting error"
                );
                self.deferred = Some(err);
                Ok(packets)
            }
            None => Ok(packets),
        }
    }

    /// Write all queued output, waiting for the socket as needed.
    pub async fn flush(&mut self) -> Result<(), ConnectionError> {
        let stream = self.stream.as_mut().ok_or(ConnectionError::NotConnected)?;
        if !self.write_buf.is_empty() {
            stream.write_all(&self.write_buf).await?;
            self.write_buf.clear();
        }
        stream.flush().await?;
        Ok(())
    }

    /// Drop the stream and any buffered data. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(addr = %self.config.server_addr, "connection closed");
        }
        self.read_buf.clear();
        self.write_buf.clear();
        self.deferred = None;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("server_addr", &self.config.server_addr)
            .field("connected", &self.is_connected())
            .field("pending_write_bytes", &self.write_buf.len())
            .finish()
    }
}
