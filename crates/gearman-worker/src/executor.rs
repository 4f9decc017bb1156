// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job executors.
//!
//! The worker loop hands each dequeued [`Job`] to an executor:
//! - [`InlineExecutor`] runs the job to completion on the loop itself
//! - [`PoolExecutor`] spawns it on a tokio runtime and returns immediately

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{JobError, WorkerError};
use crate::job::Job;

/// Runs jobs handed over by the worker loop.
#[async_trait]
pub trait JobExecutor: Send {
    async fn execute(&mut self, job: Job);

    /// Stop accepting work. With `complete_tasks` the call waits for
    /// running jobs, otherwise they are cancelled.
    async fn shutdown(&mut self, complete_tasks: bool) -> Result<(), WorkerError>;

    /// Jobs accepted by [`execute`](Self::execute) that have not finished yet.
    fn in_flight(&self) -> usize {
        0
    }

    /// Register a notifier to signal each time an accepted job finishes.
    fn notify_on_finish(&mut self, _notify: Arc<Notify>) {}
}

/// Executes each job on the caller before returning.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

#[async_trait]
impl JobExecutor for InlineExecutor {
    async fn execute(&mut self, job: Job) {
        let handle = job.handle_str();
        let function = job.function_name().to_string();
        report(&handle, &function, job.execute().await);
    }

    async fn shutdown(&mut self, _complete_tasks: bool) -> Result<(), WorkerError> {
        Ok(())
    }
}

/// Spawns jobs onto a tokio runtime.
pub struct PoolExecutor {
    runtime: Handle,
    tasks: TaskTracker,
    cancel: CancellationToken,
    limit: Option<Arc<Semaphore>>,
    in_flight: Arc<AtomicUsize>,
    on_finish: Option<Arc<Notify>>,
}

impl PoolExecutor {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            tasks: TaskTracker::new(),
            cancel: CancellationToken::new(),
            limit: None,
            in_flight: Arc::new(AtomicUsize::new(0)),
            on_finish: None,
        }
    }

    /// Executor on the runtime of the calling task.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Cap the number of jobs running at once. Extra jobs wait for a slot.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.limit = Some(Arc::new(Semaphore::new(max.max(1))));
        self
    }

    /// Jobs spawned and not yet finished.
    pub fn active_jobs(&self) -> usize {
        self.tasks.len()
    }
}

#[async_trait]
impl JobExecutor for PoolExecutor {
    async fn execute(&mut self, job: Job) {
        // Accept work again after a previous shutdown
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        self.tasks.reopen();

        let cancel = self.cancel.clone();
        let limit = self.limit.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let on_finish = self.on_finish.clone();
        let handle = job.handle_str();
        let function = job.function_name().to_string();
        debug!(handle = %handle, function = %function, "Spawning job");

        in_flight.fetch_add(1, Ordering::SeqCst);
        self.tasks.spawn_on(
            async move {
                let run = async {
                    let _permit = match limit {
                        Some(semaphore) => semaphore.acquire_owned().await.ok(),
                        None => None,
                    };
                    job.execute().await
                };
                tokio::select! {
                    _ = cancel.cancelled() => report(&handle, &function, Err(JobError::Cancelled)),
                    result = run => report(&handle, &function, result),
                }
                in_flight.fetch_sub(1, Ordering::SeqCst);
                if let Some(notify) = on_finish {
                    notify.notify_one();
                }
            },
            &self.runtime,
        );
    }

    async fn shutdown(&mut self, complete_tasks: bool) -> Result<(), WorkerError> {
        let running = self.tasks.len();
        self.tasks.close();
        if complete_tasks {
            info!(running, "Waiting for running jobs");
        } else {
            self.cancel.cancel();
        }
        self.tasks.wait().await;

        if !complete_tasks && running > 0 {
            return Err(WorkerError::Executor(format!(
                "{running} running job(s) cancelled"
            )));
        }
        Ok(())
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn notify_on_finish(&mut self, notify: Arc<Notify>) {
        self.on_finish = Some(notify);
    }
}

impl std::fmt::Debug for PoolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolExecutor")
            .field("active_jobs", &self.tasks.len())
            .field("in_flight", &self.in_flight())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

fn report(handle: &str, function: &str, result: Result<(), JobError>) {
    match result {
        Ok(()) => debug!(handle = %handle, function = %function, "Job finished"),
        Err(e) => warn!(handle = %handle, function = %function, error = %e, "Job failed"),
    }
}
