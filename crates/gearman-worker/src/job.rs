// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Assigned jobs and the queue they wait in before execution.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;

use bytes::Bytes;
use futures::FutureExt;
use gearman_protocol::Packet;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::JobError;
use crate::function::JobFunction;

/// A result packet, tagged with the session generation that assigned the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub generation: u64,
    pub packet: Packet,
}

/// Channel carrying job results from handlers back to the session.
pub type ResultSender = mpsc::UnboundedSender<JobResult>;

/// Everything a handler sees about its job, plus the way back to the server.
pub struct JobContext {
    handle: Bytes,
    function_name: String,
    data: Bytes,
    unique_id: Option<Bytes>,
    generation: u64,
    results: ResultSender,
}

impl JobContext {
    pub fn new(
        handle: Bytes,
        function_name: impl Into<String>,
        data: Bytes,
        unique_id: Option<Bytes>,
        results: ResultSender,
    ) -> Self {
        Self {
            handle,
            function_name: function_name.into(),
            data,
            unique_id,
            generation: 0,
            results,
        }
    }

    /// Tag results with the generation of the session that assigned the job.
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Server-assigned job handle.
    pub fn handle(&self) -> &[u8] {
        &self.handle
    }

    pub fn handle_str(&self) -> String {
        String::from_utf8_lossy(&self.handle).into_owned()
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    /// Job payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn unique_id(&self) -> Option<&[u8]> {
        self.unique_id.as_deref()
    }

    /// Session generation this job belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report success with a result payload.
    pub fn complete(&self, data: impl Into<Bytes>) {
        self.send(Packet::work_complete(self.handle.clone(), data));
    }

    /// Report failure.
    pub fn fail(&self) {
        self.send(Packet::work_fail(self.handle.clone()));
    }

    /// Report failure with exception data.
    pub fn exception(&self, data: impl Into<Bytes>) {
        self.send(Packet::work_exception(self.handle.clone(), data));
    }

    /// Send intermediate data to the client.
    pub fn send_data(&self, data: impl Into<Bytes>) {
        self.send(Packet::work_data(self.handle.clone(), data));
    }

    pub fn warning(&self, data: impl Into<Bytes>) {
        self.send(Packet::work_warning(self.handle.clone(), data));
    }

    /// Report progress as `numerator / denominator`.
    pub fn status(&self, numerator: u64, denominator: u64) {
        self.send(Packet::work_status(self.handle.clone(), numerator, denominator));
    }

    fn send(&self, packet: Packet) {
        let result = JobResult {
            generation: self.generation,
            packet,
        };
        if self.results.send(result).is_err() {
            debug!(handle = %self.handle_str(), "worker gone; dropping job result");
        }
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("handle", &self.handle_str())
            .field("function_name", &self.function_name)
            .field("data_len", &self.data.len())
            .field("unique_id", &self.unique_id)
            .field("generation", &self.generation)
            .finish()
    }
}

/// A job assigned by the server and bound to its handler.
pub struct Job {
    context: JobContext,
    function: Box<dyn JobFunction>,
}

impl Job {
    pub fn new(context: JobContext, function: Box<dyn JobFunction>) -> Self {
        Self { context, function }
    }

    pub fn handle(&self) -> &[u8] {
        self.context.handle()
    }

    pub fn handle_str(&self) -> String {
        self.context.handle_str()
    }

    pub fn function_name(&self) -> &str {
        self.context.function_name()
    }

    pub fn data(&self) -> &[u8] {
        self.context.data()
    }

    pub fn unique_id(&self) -> Option<&[u8]> {
        self.context.unique_id()
    }

    pub fn generation(&self) -> u64 {
        self.context.generation()
    }

    /// Run the handler. Panics are caught and returned as
    /// [`JobError::Panicked`].
    pub async fn execute(self) -> Result<(), JobError> {
        let Job {
            mut context,
            mut function,
        } = self;

        let run = async move { function.call(&mut context).await };
        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(JobError::Panicked(panic_message(panic.as_ref()))),
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("context", &self.context).finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// FIFO of jobs waiting to run.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: VecDeque<Job>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, job: Job) {
        self.jobs.push_back(job);
    }

    pub fn dequeue(&mut self) -> Option<Job> {
        self.jobs.pop_front()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Drop every queued job, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.jobs.len();
        self.jobs.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gearman_protocol::{Field, PacketType};

    struct Echo;

    #[async_trait]
    impl JobFunction for Echo {
        async fn call(&mut self, job: &mut JobContext) -> Result<(), JobError> {
            job.status(1, 2);
            job.complete(job.data().to_vec());
            Ok(())
        }
    }

    struct Panics;

    #[async_trait]
    impl JobFunction for Panics {
        async fn call(&mut self, _job: &mut JobContext) -> Result<(), JobError> {
            panic!("handler blew up");
        }
    }

    fn job(
        handle: &'static [u8],
        function: Box<dyn JobFunction>,
    ) -> (Job, mpsc::UnboundedReceiver<JobResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let context = JobContext::new(
            Bytes::from_static(handle),
            "echo",
            Bytes::from_static(b"payload"),
            None,
            tx,
        )
        .with_generation(3);
        (Job::new(context, function), rx)
    }

    #[test]
    fn test_queue_is_fifo() {
        let mut queue = JobQueue::new();
        for handle in [&b"H:1"[..], &b"H:2"[..], &b"H:3"[..]] {
            let (tx, _rx) = mpsc::unbounded_channel();
            let context = JobContext::new(Bytes::from_static(handle), "echo", Bytes::new(), None, tx);
            queue.enqueue(Job::new(context, Box::new(Echo)));
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue().unwrap().handle(), b"H:1");
        assert_eq!(queue.dequeue().unwrap().handle(), b"H:2");
        assert_eq!(queue.clear(), 1);
        assert!(queue.is_empty());
        assert!(queue.dequeue().is_none());
    }

    #[tokio::test]
    async fn test_execute_sends_results_through_channel() {
        let (job, mut rx) = job(b"H:7", Box::new(Echo));
        job.execute().await.unwrap();

        let status = rx.recv().await.unwrap();
        assert_eq!(status.generation, 3);
        assert_eq!(status.packet.kind, PacketType::WorkStatus);
        let complete = rx.recv().await.unwrap().packet;
        assert_eq!(complete.kind, PacketType::WorkComplete);
        assert_eq!(complete.field(Field::JobHandle).unwrap().as_ref(), b"H:7");
        assert_eq!(complete.field(Field::Data).unwrap().as_ref(), b"payload");
    }

    #[tokio::test]
    async fn test_execute_catches_panics() {
        let (job, _rx) = job(b"H:8", Box::new(Panics));
        match job.execute().await {
            Err(JobError::Panicked(message)) => assert!(message.contains("handler blew up")),
            other => panic!("expected panic error, got {:?}", other),
        }
    }

    #[test]
    fn test_results_after_worker_gone_are_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let context = JobContext::new(Bytes::from_static(b"H:9"), "echo", Bytes::new(), None, tx);
        // Must not panic
        context.complete("done");
        context.fail();
    }
}
