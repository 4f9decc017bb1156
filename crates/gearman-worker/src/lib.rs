// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Gearman Worker - worker-side protocol engine for Gearman job servers.
//!
//! A [`GearmanWorker`] holds one session to a job server, advertises the
//! functions it can run, asks for work, and runs assigned jobs through a
//! pluggable [`JobExecutor`]. Connection loss is recovered automatically:
//! the worker reconnects, re-sends its identity and re-advertises every
//! function before asking for more work.
//!
//! # Features
//!
//! - **Capability Registry**: replace the advertised function set from any task
//! - **Automatic Reconnect**: back-off between failed attempts, full re-registration
//! - **Sleep/Wake Protocol**: PRE_SLEEP on NO_JOB, resume on NOOP
//! - **Executors**: inline execution or spawning onto a tokio runtime
//! - **Backpressure**: optional cap on queued and running jobs before grabbing more
//!
//! # Quick Start
//!
//! ```ignore
//! use gearman_worker::{GearmanWorker, SimpleFunction, WorkerConfig};
//!
//! #[tokio::main]
//! async fn main() -> gearman_worker::Result<()> {
//!     let mut worker = GearmanWorker::new(WorkerConfig::from_env()?);
//!     worker.set_functions(vec![
//!         SimpleFunction::new("reverse", |data| {
//!             let mut out = data.to_vec();
//!             out.reverse();
//!             Ok(out)
//!         })
//!         .shared(),
//!     ]);
//!     worker.add_server("127.0.0.1", 4730).await;
//!
//!     // Stop from elsewhere with worker.handle().request_stop()
//!     worker.run().await
//! }
//! ```
//!
//! # Job Functions
//!
//! Handlers implement [`JobFunction`] and report results through the
//! [`JobContext`]; a [`FunctionFactory`] creates one handler per job:
//!
//! ```ignore
//! struct Resize;
//!
//! #[async_trait]
//! impl JobFunction for Resize {
//!     async fn call(&mut self, job: &mut JobContext) -> Result<(), JobError> {
//!         job.status(0, 2);
//!         let image = decode(job.data())?;
//!         job.status(1, 2);
//!         job.complete(encode(&image.thumbnail(128, 128)));
//!         Ok(())
//!     }
//! }
//! ```

mod dispatch;
mod error;
mod session;
#[cfg(test)]
mod test_support;

pub mod config;
pub mod executor;
pub mod function;
pub mod job;
pub mod registry;
pub mod tracker;
pub mod transport;
pub mod worker;

pub use config::WorkerConfig;
pub use error::{JobError, Result, WorkerError};
pub use executor::{InlineExecutor, JobExecutor, PoolExecutor};
pub use function::{FunctionFactory, FunctionSet, JobFunction, SimpleFunction};
pub use job::{Job, JobContext, JobQueue, JobResult, ResultSender};
pub use registry::FunctionRegistry;
pub use tracker::{PendingRequest, RequestTracker};
pub use transport::{TcpTransport, Transport};
pub use worker::{GearmanWorker, WorkerHandle, WorkerState};

// Re-export protocol types used in the public API
pub use gearman_protocol::{ConnectionError, Field, Packet, PacketType};
