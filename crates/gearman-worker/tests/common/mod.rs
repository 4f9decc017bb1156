// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for gearman-worker integration tests.
//!
//! Provides a scripted in-memory job server and helpers for waiting on the
//! packets a worker sends to it.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use gearman_worker::{ConnectionError, Packet, PacketType, Transport};
use tokio::sync::Notify;

/// Default time to wait for the worker to react.
pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct ServerState {
    connected: bool,
    fail_connects: usize,
    connect_attempts: usize,
    closes: usize,
    sent: Vec<Packet>,
    inbound: VecDeque<Packet>,
    fail_next_io: bool,
}

/// In-memory job server. Clones share state.
#[derive(Clone, Default)]
pub struct MockServer {
    state: Arc<Mutex<ServerState>>,
    readable: Arc<Notify>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport connected to this server, to hand to the worker.
    pub fn transport(&self) -> MockTransport {
        MockTransport {
            server: self.clone(),
        }
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_connects(&self, count: usize) {
        self.lock().fail_connects = count;
    }

    /// Make the next I/O pass on the session fail.
    pub fn fail_next_io(&self) {
        self.lock().fail_next_io = true;
        self.readable.notify_one();
    }

    /// Deliver a packet to the worker.
    pub fn push(&self, packet: Packet) {
        self.lock().inbound.push_back(packet);
        self.readable.notify_one();
    }

    pub fn sent(&self) -> Vec<Packet> {
        self.lock().sent.clone()
    }

    pub fn sent_kinds(&self) -> Vec<PacketType> {
        self.lock().sent.iter().map(|p| p.kind).collect()
    }

    pub fn count(&self, kind: PacketType) -> usize {
        self.lock().sent.iter().filter(|p| p.kind == kind).count()
    }

    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Poll until `predicate` holds for the packets sent so far.
    pub async fn wait_until<F>(&self, predicate: F) -> bool
    where
        F: Fn(&[Packet]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            if predicate(&self.lock().sent) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Wait until at least `n` packets of `kind` have been sent.
    pub async fn wait_for(&self, kind: PacketType, n: usize) -> bool {
        self.wait_until(|sent| sent.iter().filter(|p| p.kind == kind).count() >= n)
            .await
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }
}

/// Transport side of a [`MockServer`].
pub struct MockTransport {
    server: MockServer,
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        let mut state = self.server.lock();
        state.connect_attempts += 1;
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(ConnectionError::Closed);
        }
        state.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.server.lock().connected
    }

    fn submit(&mut self, packet: Packet) -> Result<(), ConnectionError> {
        let mut state = self.server.lock();
        if !state.connected {
            return Err(ConnectionError::NotConnected);
        }
        state.sent.push(packet);
        Ok(())
    }

    fn has_pending_writes(&self) -> bool {
        false
    }

    async fn flush(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }

    async fn ready(&mut self) -> Result<(), ConnectionError> {
        loop {
            {
                let state = self.server.lock();
                if state.fail_next_io || !state.inbound.is_empty() {
                    return Ok(());
                }
            }
            self.server.readable.notified().await;
        }
    }

    fn drive_io(&mut self) -> Result<Vec<Packet>, ConnectionError> {
        let mut state = self.server.lock();
        if state.fail_next_io {
            state.fail_next_io = false;
            return Err(ConnectionError::Closed);
        }
        Ok(state.inbound.drain(..).collect())
    }

    fn close(&mut self) {
        let mut state = self.server.lock();
        state.connected = false;
        state.closes += 1;
    }

    fn describe(&self) -> String {
        "mock-server".to_string()
    }
}

/// JOB_ASSIGN for `function` with handle `handle`.
pub fn job_assign(handle: &str, function: &str, data: &[u8]) -> Packet {
    Packet::response(
        PacketType::JobAssign,
        vec![
            Bytes::copy_from_slice(handle.as_bytes()),
            Bytes::copy_from_slice(function.as_bytes()),
            Bytes::copy_from_slice(data),
        ],
    )
}

/// JOB_ASSIGN_UNIQ carrying a unique id.
pub fn job_assign_uniq(handle: &str, function: &str, unique_id: &str, data: &[u8]) -> Packet {
    Packet::response(
        PacketType::JobAssignUniq,
        vec![
            Bytes::copy_from_slice(handle.as_bytes()),
            Bytes::copy_from_slice(function.as_bytes()),
            Bytes::copy_from_slice(unique_id.as_bytes()),
            Bytes::copy_from_slice(data),
        ],
    )
}

pub fn no_job() -> Packet {
    Packet::response(PacketType::NoJob, Vec::new())
}

pub fn noop() -> Packet {
    Packet::response(PacketType::Noop, Vec::new())
}

pub fn error(code: &str, text: &str) -> Packet {
    Packet::response(
        PacketType::Error,
        vec![
            Bytes::copy_from_slice(code.as_bytes()),
            Bytes::copy_from_slice(text.as_bytes()),
        ],
    )
}
