// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Desired capability set shared between the worker loop and other tasks.
//!
//! Any task may replace the set; the worker loop consumes it once per
//! change and re-advertises it to the job server. Reconnects mark the set
//! dirty again so a fresh session always receives the full registration.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::function::FunctionSet;

#[derive(Default)]
struct RegistryState {
    desired: FunctionSet,
    dirty: bool,
}

/// Thread-safe holder of the functions the worker should advertise.
#[derive(Default)]
pub struct FunctionRegistry {
    inner: Mutex<RegistryState>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the desired set and mark it for re-registration.
    pub fn set_functions(&self, functions: FunctionSet) {
        let mut state = self.lock();
        state.desired = functions;
        state.dirty = true;
    }

    /// Return the desired set if it changed since the last call, clearing
    /// the dirty flag.
    pub fn take_if_updated(&self) -> Option<FunctionSet> {
        let mut state = self.lock();
        if !state.dirty {
            return None;
        }
        state.dirty = false;
        Some(state.desired.clone())
    }

    /// Force the next [`take_if_updated`](Self::take_if_updated) to return
    /// the current set.
    pub fn mark_dirty(&self) {
        self.lock().dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// Names in the desired set. Does not touch the dirty flag.
    pub fn registered_names(&self) -> HashSet<String> {
        self.lock()
            .desired
            .iter()
            .map(|f| f.function_name().to_string())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("FunctionRegistry")
            .field("functions", &state.desired.len())
            .field("dirty", &state.dirty)
            .finish()
    }
}
