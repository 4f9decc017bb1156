// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory transport for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gearman_protocol::{ConnectionError, Packet};

use crate::transport::Transport;

/// Records every submitted packet and replays scripted inbound packets.
pub(crate) struct RecordingTransport {
    connected: bool,
    fail_connects: usize,
    sent: Arc<Mutex<Vec<Packet>>>,
    closes: Arc<Mutex<usize>>,
    inbound: Arc<Mutex<VecDeque<Packet>>>,
}

impl RecordingTransport {
    pub(crate) fn new() -> Self {
        Self {
            connected: false,
            fail_connects: 0,
            sent: Arc::default(),
            closes: Arc::default(),
            inbound: Arc::default(),
        }
    }

    pub(crate) fn connected() -> Self {
        Self {
            connected: true,
            ..Self::new()
        }
    }

    pub(crate) fn failing_connects(mut self, count: usize) -> Self {
        self.fail_connects = count;
        self
    }

    pub(crate) fn sent(&self) -> Arc<Mutex<Vec<Packet>>> {
        self.sent.clone()
    }

    pub(crate) fn close_count(&self) -> Arc<Mutex<usize>> {
        self.closes.clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.fail_connects > 0 {
            self.fail_connects -= 1;
            return Err(ConnectionError::Closed);
        }
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn submit(&mut self, packet: Packet) -> Result<(), ConnectionError> {
        self.sent.lock().unwrap().push(packet);
        Ok(())
    }

    fn has_pending_writes(&self) -> bool {
        false
    }

    async fn flush(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }

    async fn ready(&mut self) -> Result<(), ConnectionError> {
        if self.inbound.lock().unwrap().is_empty() {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn drive_io(&mut self) -> Result<Vec<Packet>, ConnectionError> {
        Ok(self.inbound.lock().unwrap().drain(..).collect())
    }

    fn close(&mut self) {
        self.connected = false;
        *self.closes.lock().unwrap() += 1;
    }

    fn describe(&self) -> String {
        "recording".to_string()
    }
}
