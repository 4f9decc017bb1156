// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tracks the single outstanding job request on a session.
//!
//! GRAB_JOB, GRAB_JOB_UNIQ and PRE_SLEEP expect a reply (or a NOOP wake-up)
//! before the worker may ask again. At most one is in flight.

use gearman_protocol::Packet;

/// A request awaiting its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingRequest {
    GrabJob,
    GrabJobUniq,
    PreSleep,
}

impl PendingRequest {
    /// The grab request matching the unique-id preference.
    pub fn grab(require_unique_id: bool) -> Self {
        if require_unique_id {
            PendingRequest::GrabJobUniq
        } else {
            PendingRequest::GrabJob
        }
    }

    pub fn packet(self) -> Packet {
        match self {
            PendingRequest::GrabJob => Packet::grab_job(),
            PendingRequest::GrabJobUniq => Packet::grab_job_uniq(),
            PendingRequest::PreSleep => Packet::pre_sleep(),
        }
    }
}

#[derive(Debug, Default)]
pub struct RequestTracker {
    pending: Option<PendingRequest>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_outstanding(&self) -> bool {
        self.pending.is_some()
    }

    pub fn outstanding(&self) -> Option<PendingRequest> {
        self.pending
    }

    /// Record a new outstanding request, returning the one it replaced.
    pub fn submit(&mut self, request: PendingRequest) -> Option<PendingRequest> {
        self.pending.replace(request)
    }

    pub fn clear(&mut self) -> Option<PendingRequest> {
        self.pending.take()
    }
}
