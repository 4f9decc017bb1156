// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job function traits and the definitions the worker advertises.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gearman_protocol::Packet;

use crate::error::JobError;
use crate::job::JobContext;

/// Produces a fresh [`JobFunction`] for every job assigned under its name.
pub trait FunctionFactory: Send + Sync {
    /// Name advertised to the job server with CAN_DO.
    fn function_name(&self) -> &str;

    /// Per-job timeout advertised with CAN_DO_TIMEOUT. `None` advertises
    /// the function without a timeout.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    fn create(&self) -> Box<dyn JobFunction>;
}

/// A runnable job handler.
///
/// The handler owns result reporting: it must call one of the terminal
/// result methods on the [`JobContext`] (`complete`, `fail` or
/// `exception`). Returning an error only logs it.
#[async_trait]
pub trait JobFunction: Send {
    async fn call(&mut self, job: &mut JobContext) -> Result<(), JobError>;
}

/// The set of capabilities handed to the worker.
pub type FunctionSet = Vec<Arc<dyn FunctionFactory>>;

/// A capability as registered with the current session.
#[derive(Clone)]
pub(crate) struct FunctionDefinition {
    name: String,
    timeout: Option<Duration>,
    factory: Arc<dyn FunctionFactory>,
}

impl FunctionDefinition {
    pub(crate) fn new(factory: Arc<dyn FunctionFactory>) -> Self {
        Self {
            name: factory.function_name().to_string(),
            timeout: factory.timeout(),
            factory,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn create(&self) -> Box<dyn JobFunction> {
        self.factory.create()
    }

    /// CAN_DO, or CAN_DO_TIMEOUT when the factory declares a timeout.
    /// Sub-second timeouts round up to one second.
    pub(crate) fn advertisement(&self) -> Packet {
        match self.timeout {
            Some(timeout) if !timeout.is_zero() => {
                let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
                Packet::can_do_timeout(&self.name, secs)
            }
            _ => Packet::can_do(&self.name),
        }
    }
}

impl fmt::Debug for FunctionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDefinition")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Factory for handlers written as a plain closure over the job payload.
///
/// `Ok(bytes)` is reported as WORK_COMPLETE with `bytes` as the result,
/// `Err(message)` as WORK_FAIL (the message is logged by the worker).
pub struct SimpleFunction<F> {
    name: String,
    timeout: Option<Duration>,
    handler: Arc<F>,
}

impl<F> SimpleFunction<F>
where
    F: Fn(&[u8]) -> Result<Vec<u8>, String> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            timeout: None,
            handler: Arc::new(handler),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Convenience for building a [`FunctionSet`] entry.
    pub fn shared(self) -> Arc<dyn FunctionFactory> {
        Arc::new(self)
    }
}

impl<F> FunctionFactory for SimpleFunction<F>
where
    F: Fn(&[u8]) -> Result<Vec<u8>, String> + Send + Sync + 'static,
{
    fn function_name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn create(&self) -> Box<dyn JobFunction> {
        Box::new(SimpleJob {
            handler: Arc::clone(&self.handler),
        })
    }
}

struct SimpleJob<F> {
    handler: Arc<F>,
}

#[async_trait]
impl<F> JobFunction for SimpleJob<F>
where
    F: Fn(&[u8]) -> Result<Vec<u8>, String> + Send + Sync + 'static,
{
    async fn call(&mut self, job: &mut JobContext) -> Result<(), JobError> {
        match (self.handler)(job.data()) {
            Ok(output) => {
                job.complete(output);
                Ok(())
            }
            Err(message) => {
                job.fail();
                Err(JobError::Failed(message))
            }
        }
    }
}
