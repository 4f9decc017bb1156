// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The worker engine: one session, one event loop.
//!
//! Each iteration of [`GearmanWorker::run`]:
//!
//! 1. reconnects the session if it is down (with back-off on failure)
//! 2. re-advertises capabilities if the registry changed
//! 3. asks for work when nothing is outstanding
//! 4. waits for socket readiness, a job result, a wake-up, or queued work
//! 5. dispatches received packets and forwards job results
//! 6. executes at most one queued job
//!
//! Other tasks interact through a [`WorkerHandle`]; every mutation it
//! makes wakes the loop so the change is acted on promptly.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use gearman_protocol::{ConnectionConfig, ConnectionError, Packet};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, instrument, warn};

use crate::config::WorkerConfig;
use crate::dispatch::{Disposition, Dispatcher};
use crate::error::{Result, WorkerError};
use crate::executor::{InlineExecutor, JobExecutor};
use crate::function::{FunctionDefinition, FunctionSet};
use crate::job::{Job, JobQueue, JobResult, ResultSender};
use crate::registry::FunctionRegistry;
use crate::session::Session;
use crate::tracker::{PendingRequest, RequestTracker};
use crate::transport::{TcpTransport, Transport};

/// Lifecycle state of the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    ShuttingDown,
}

struct Shared {
    state: Mutex<WorkerState>,
    registry: FunctionRegistry,
    wake: Arc<Notify>,
    require_unique_id: AtomicBool,
    /// Identity set through a handle, not yet picked up by the loop.
    pending_id: Mutex<Option<String>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending_id(&self) -> MutexGuard<'_, Option<String>> {
        self.pending_id.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn validate_worker_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(WorkerError::InvalidWorkerId(
            "worker id must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Cloneable handle for controlling a worker from other tasks.
#[derive(Clone)]
pub struct WorkerHandle {
    shared: Arc<Shared>,
}

impl WorkerHandle {
    /// Replace the advertised capabilities and wake the loop.
    pub fn set_functions(&self, functions: FunctionSet) {
        self.shared.registry.set_functions(functions);
        self.shared.wake.notify_one();
    }

    /// Names of the desired capability set.
    pub fn registered_functions(&self) -> HashSet<String> {
        self.shared.registry.registered_names()
    }

    /// Ask the loop to exit. The loop drains its queue and shuts down.
    pub fn request_stop(&self) {
        *self.shared.state() = WorkerState::ShuttingDown;
        self.shared.wake.notify_one();
    }

    /// Use GRAB_JOB_UNIQ for subsequent grabs.
    pub fn set_require_unique_id(&self, required: bool) {
        self.shared.require_unique_id.store(required, Ordering::SeqCst);
        self.shared.wake.notify_one();
    }

    /// Set the identity reported with SET_CLIENT_ID.
    ///
    /// The loop picks it up on its next iteration, sends it if connected and
    /// re-sends it after every reconnect.
    pub fn set_worker_id(&self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        validate_worker_id(&id)?;
        *self.shared.pending_id() = Some(id);
        self.shared.wake.notify_one();
        Ok(())
    }

    pub fn state(&self) -> WorkerState {
        *self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("state", &self.state())
            .finish()
    }
}

enum Wakeup {
    Session(std::result::Result<(), ConnectionError>),
    JobResult(JobResult),
    Notified,
    JobsQueued,
}

/// Worker-side Gearman protocol engine.
pub struct GearmanWorker {
    shared: Arc<Shared>,
    config: WorkerConfig,
    worker_id: String,
    announce_id: bool,
    session: Option<Session>,
    tracker: RequestTracker,
    functions: HashMap<String, FunctionDefinition>,
    queue: JobQueue,
    executor: Box<dyn JobExecutor>,
    results_tx: ResultSender,
    results_rx: mpsc::UnboundedReceiver<JobResult>,
}

impl GearmanWorker {
    /// Create a worker that runs jobs inline on its loop.
    pub fn new(config: WorkerConfig) -> Self {
        Self::with_executor(config, InlineExecutor)
    }

    pub fn with_executor(config: WorkerConfig, mut executor: impl JobExecutor + 'static) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (worker_id, announce_id) = match &config.worker_id {
            Some(id) if !id.is_empty() => (id.clone(), true),
            _ => (format!("GearmanWorker:{}", std::process::id()), false),
        };
        let shared = Arc::new(Shared {
            state: Mutex::new(WorkerState::Idle),
            registry: FunctionRegistry::new(),
            wake: Arc::new(Notify::new()),
            require_unique_id: AtomicBool::new(config.require_unique_id),
            pending_id: Mutex::new(None),
        });
        executor.notify_on_finish(Arc::clone(&shared.wake));

        Self {
            shared,
            config,
            worker_id,
            announce_id,
            session: None,
            tracker: RequestTracker::new(),
            functions: HashMap::new(),
            queue: JobQueue::new(),
            executor: Box::new(executor),
            results_tx,
            results_rx,
        }
    }

    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn state(&self) -> WorkerState {
        *self.shared.state()
    }

    /// Add a job server and try to connect to it.
    ///
    /// Only one server is supported; later calls are accepted and ignored.
    pub async fn add_server(&mut self, host: &str, port: u16) -> bool {
        let connection = ConnectionConfig {
            server_addr: format!("{host}:{port}"),
            connect_timeout_ms: self.config.connect_timeout_ms,
            ..Default::default()
        };
        self.add_transport(TcpTransport::new(connection)).await
    }

    /// Add the server from the worker configuration.
    pub async fn add_configured_server(&mut self) -> bool {
        let transport = TcpTransport::new(self.config.connection_config());
        self.add_transport(transport).await
    }

    /// Add a job server reached through a custom transport.
    pub async fn add_transport(&mut self, transport: impl Transport + 'static) -> bool {
        if let Some(session) = &self.session {
            debug!(server = %session.describe(), "Session already configured, ignoring server");
            return true;
        }

        let announced = self.announced_id().map(str::to_owned);
        let mut session = Session::new(Box::new(transport), self.config.reconnect_delay());
        session
            .reconnect(&self.shared.registry, announced.as_deref())
            .await;
        self.session = Some(session);
        self.shared.wake.notify_one();
        true
    }

    /// Set the identity reported to the server with SET_CLIENT_ID.
    ///
    /// Sent immediately when connected and again after every reconnect.
    pub fn set_worker_id(&mut self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        validate_worker_id(&id)?;
        *self.shared.pending_id() = None;
        self.apply_worker_id(id);
        Ok(())
    }

    fn apply_worker_id(&mut self, id: String) {
        self.worker_id = id;
        self.announce_id = true;
        let failed = match self.session.as_mut() {
            Some(session) if session.is_connected() => session
                .submit(Packet::set_client_id(&self.worker_id))
                .err(),
            _ => None,
        };
        if let Some(e) = failed {
            warn!(error = %e, "Failed to send worker id");
            self.close_session();
        }
        self.shared.wake.notify_one();
    }

    /// Replace the advertised capabilities.
    pub fn set_functions(&self, functions: FunctionSet) {
        self.handle().set_functions(functions);
    }

    pub fn registered_functions(&self) -> HashSet<String> {
        self.shared.registry.registered_names()
    }

    pub fn set_require_unique_id(&self, required: bool) {
        self.handle().set_require_unique_id(required);
    }

    pub fn request_stop(&self) {
        self.handle().request_stop();
    }

    /// Number of assigned jobs waiting to run.
    pub fn queued_jobs(&self) -> usize {
        self.queue.len()
    }

    /// Run the event loop until [`WorkerHandle::request_stop`] is called.
    ///
    /// Fails without side effects if the worker is not idle or no server
    /// has been added. On exit the worker shuts down, completing queued
    /// jobs.
    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn run(&mut self) -> Result<()> {
        {
            let mut state = self.shared.state();
            if *state != WorkerState::Idle {
                return Err(WorkerError::InvalidState(*state));
            }
            if self.session.is_none() {
                return Err(WorkerError::NoServer);
            }
            *state = WorkerState::Running;
        }
        info!("Starting work");

        while self.state() == WorkerState::Running {
            self.run_once().await;
        }

        for e in self.shutdown(true).await {
            warn!(error = %e, "Error during shutdown");
        }
        Ok(())
    }

    async fn run_once(&mut self) {
        let pending_id = self.shared.pending_id().take();
        if let Some(id) = pending_id {
            info!(worker_id = %id, "Worker id changed");
            self.apply_worker_id(id);
        }

        if !self.ensure_connected().await {
            return;
        }

        if let Err(e) = self.register_functions().await {
            warn!(error = %e, "Capability registration failed");
            self.close_session();
            return;
        }

        if let Err(e) = self.request_work() {
            warn!(error = %e, "Failed to request work");
            self.close_session();
            return;
        }

        match self.wait().await {
            Wakeup::Session(Err(e)) => {
                warn!(error = %e, "Session I/O failed");
                self.close_session();
                return;
            }
            Wakeup::Session(Ok(())) => {
                if let Err(e) = self.service_session() {
                    warn!(error = %e, "Session I/O failed");
                    self.close_session();
                    return;
                }
            }
            Wakeup::JobResult(result) => {
                self.forward_result(result);
                while let Ok(result) = self.results_rx.try_recv() {
                    self.forward_result(result);
                }
            }
            Wakeup::Notified | Wakeup::JobsQueued => {}
        }

        if let Err(e) = self.request_work() {
            warn!(error = %e, "Failed to request work");
            self.close_session();
            return;
        }

        if let Some(job) = self.next_job() {
            self.executor.execute(job).await;
        }
    }

    /// Dequeue the next job whose session is still live, dropping the rest.
    fn next_job(&mut self) -> Option<Job> {
        while let Some(job) = self.queue.dequeue() {
            if self
                .session
                .as_ref()
                .is_some_and(|session| session.is_current(job.generation()))
            {
                return Some(job);
            }
            warn!(
                handle = %job.handle_str(),
                function = %job.function_name(),
                "Dropping job assigned by a closed session"
            );
        }
        None
    }

    /// Reconnect if needed. Returns whether the session is usable.
    async fn ensure_connected(&mut self) -> bool {
        let announced = self.announce_id.then_some(self.worker_id.as_str());
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if session.is_connected() {
            return true;
        }
        self.tracker.clear();
        session.reconnect(&self.shared.registry, announced).await
    }

    /// Re-advertise capabilities if the desired set changed.
    async fn register_functions(&mut self) -> std::result::Result<(), ConnectionError> {
        let Some(functions) = self.shared.registry.take_if_updated() else {
            return Ok(());
        };
        let grab = self.next_grab();
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };

        self.functions.clear();
        session.submit(Packet::reset_abilities())?;
        for factory in functions {
            let definition = FunctionDefinition::new(factory);
            session.submit(definition.advertisement())?;
            self.functions
                .insert(definition.name().to_string(), definition);
        }

        if let Some(grab) = grab {
            self.tracker.submit(grab);
            session.submit(grab.packet())?;
        }
        session.flush().await?;

        info!(
            functions = self.functions.len(),
            server = %session.describe(),
            "Capabilities registered"
        );
        Ok(())
    }

    /// Submit a grab when connected, nothing is outstanding and the queue
    /// has room.
    fn request_work(&mut self) -> std::result::Result<(), ConnectionError> {
        if self.tracker.has_outstanding() {
            return Ok(());
        }
        let Some(grab) = self.next_grab() else {
            return Ok(());
        };
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if !session.is_connected() {
            return Ok(());
        }
        self.tracker.submit(grab);
        session.submit(grab.packet())
    }

    /// The grab request to send next, or `None` while queued and running
    /// jobs fill the configured limit.
    fn next_grab(&self) -> Option<PendingRequest> {
        if let Some(max) = self.config.max_queued_jobs
            && self.queue.len() + self.executor.in_flight() >= max
        {
            return None;
        }
        Some(PendingRequest::grab(
            self.shared.require_unique_id.load(Ordering::SeqCst),
        ))
    }

    async fn wait(&mut self) -> Wakeup {
        let jobs_queued = !self.queue.is_empty();
        let Some(session) = self.session.as_mut() else {
            return Wakeup::Notified;
        };

        tokio::select! {
            biased;
            ready = session.ready() => Wakeup::Session(ready),
            Some(result) = self.results_rx.recv() => Wakeup::JobResult(result),
            _ = self.shared.wake.notified() => Wakeup::Notified,
            _ = std::future::ready(()), if jobs_queued => Wakeup::JobsQueued,
        }
    }

    fn service_session(&mut self) -> std::result::Result<(), ConnectionError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let packets = session.drive_io()?;
        if packets.is_empty() {
            return Ok(());
        }

        let disposition = Dispatcher {
            session,
            tracker: &mut self.tracker,
            functions: &self.functions,
            queue: &mut self.queue,
            results: &self.results_tx,
        }
        .dispatch_all(packets);

        if disposition == Disposition::CloseSession {
            self.close_session();
        }
        Ok(())
    }

    fn forward_result(&mut self, result: JobResult) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.is_current(result.generation) {
            warn!(
                kind = ?result.packet.kind,
                generation = result.generation,
                "Dropping job result from a closed session"
            );
            return;
        }
        if let Err(e) = session.submit(result.packet) {
            warn!(error = %e, "Dropping job result");
        }
    }

    fn close_session(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.close();
        }
        self.tracker.clear();
    }

    fn announced_id(&self) -> Option<&str> {
        self.announce_id.then_some(self.worker_id.as_str())
    }

    /// Stop the worker and release the session.
    ///
    /// With `complete_tasks` queued jobs run to completion and the executor
    /// waits for running ones; otherwise queued jobs are dropped and running
    /// ones cancelled. Results still pending are flushed to the server.
    /// Returns the errors encountered; the worker ends up idle either way.
    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn shutdown(&mut self, complete_tasks: bool) -> Vec<WorkerError> {
        info!("Commencing shutdown");
        *self.shared.state() = WorkerState::ShuttingDown;
        let mut errors = Vec::new();

        if complete_tasks {
            while let Some(job) = self.next_job() {
                self.executor.execute(job).await;
            }
        } else {
            let dropped = self.queue.clear();
            if dropped > 0 {
                warn!(dropped, "Discarding queued jobs");
            }
        }

        if let Err(e) = self.executor.shutdown(complete_tasks).await {
            errors.push(e);
        }

        if let Some(session) = self.session.as_mut()
            && session.is_connected()
        {
            let mut pending = 0usize;
            while let Ok(result) = self.results_rx.try_recv() {
                if !session.is_current(result.generation) {
                    warn!(kind = ?result.packet.kind, "Dropping job result from a closed session");
                    continue;
                }
                match session.submit(result.packet) {
                    Ok(()) => pending += 1,
                    Err(e) => errors.push(e.into()),
                }
            }
            if pending > 0 {
                debug!(pending, "Flushing job results");
                if let Err(e) = session.flush().await {
                    errors.push(e.into());
                }
            }
        }

        self.close_session();
        self.functions.clear();
        *self.shared.state() = WorkerState::Idle;
        info!("Completed shutdown");
        errors
    }
}

impl std::fmt::Debug for GearmanWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GearmanWorker")
            .field("worker_id", &self.worker_id)
            .field("state", &self.state())
            .field("session", &self.session)
            .field("queued_jobs", &self.queue.len())
            .finish()
    }
}
