// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reacts to packets received from the job server.

use std::collections::HashMap;

use bytes::Bytes;
use gearman_protocol::{Field, Packet, PacketType};
use tracing::{debug, error, warn};

use crate::function::FunctionDefinition;
use crate::job::{Job, JobContext, JobQueue, ResultSender};
use crate::session::Session;
use crate::tracker::{PendingRequest, RequestTracker};

/// What the worker loop should do with the session after a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    Continue,
    CloseSession,
}

/// Borrowed view of the worker state a packet may touch.
pub(crate) struct Dispatcher<'a> {
    pub(crate) session: &'a mut Session,
    pub(crate) tracker: &'a mut RequestTracker,
    pub(crate) functions: &'a HashMap<String, FunctionDefinition>,
    pub(crate) queue: &'a mut JobQueue,
    pub(crate) results: &'a ResultSender,
}

impl Dispatcher<'_> {
    /// Handle packets in arrival order, stopping at the first one that
    /// closes the session.
    pub(crate) fn dispatch_all(&mut self, packets: Vec<Packet>) -> Disposition {
        let total = packets.len();
        for (index, packet) in packets.into_iter().enumerate() {
            if self.dispatch(packet) == Disposition::CloseSession {
                let skipped = total - index - 1;
                if skipped > 0 {
                    debug!(skipped, "Discarding packets received before close");
                }
                return Disposition::CloseSession;
            }
        }
        Disposition::Continue
    }

    pub(crate) fn dispatch(&mut self, packet: Packet) -> Disposition {
        debug!(kind = ?packet.kind, "Received packet");
        match packet.kind {
            PacketType::JobAssign | PacketType::JobAssignUniq => {
                self.tracker.clear();
                self.on_job_assign(&packet)
            }
            PacketType::NoJob => self.on_no_job(),
            PacketType::Noop => {
                self.tracker.clear();
                Disposition::Continue
            }
            PacketType::EchoRes | PacketType::OptionRes => Disposition::Continue,
            PacketType::Error => {
                error!(
                    code = %packet.field_str(Field::ErrorCode).unwrap_or_default(),
                    text = %packet.field_str(Field::ErrorText).unwrap_or_default(),
                    server = %self.session.describe(),
                    "Job server reported an error"
                );
                Disposition::CloseSession
            }
            other => {
                warn!(kind = ?other, server = %self.session.describe(), "Unexpected packet, closing session");
                Disposition::CloseSession
            }
        }
    }

    fn on_job_assign(&mut self, packet: &Packet) -> Disposition {
        let handle = field_bytes(packet, Field::JobHandle);
        let function_name = packet.field_str(Field::FunctionName).unwrap_or_default();

        let Some(definition) = self.functions.get(&function_name) else {
            warn!(
                handle = %String::from_utf8_lossy(&handle),
                function = %function_name,
                "Assigned job for unregistered function, failing it"
            );
            return self.submit(Packet::work_fail(handle));
        };

        let unique_id = packet
            .field(Field::UniqueId)
            .filter(|id| !id.is_empty())
            .cloned();
        let context = JobContext::new(
            handle,
            function_name,
            field_bytes(packet, Field::Data),
            unique_id,
            self.results.clone(),
        )
        .with_generation(self.session.generation());
        let job = Job::new(context, definition.create());
        debug!(handle = %job.handle_str(), function = %job.function_name(), "Job queued");
        self.queue.enqueue(job);
        Disposition::Continue
    }

    fn on_no_job(&mut self) -> Disposition {
        if self.tracker.outstanding() == Some(PendingRequest::PreSleep) {
            debug!("Already sleeping, ignoring NO_JOB");
            return Disposition::Continue;
        }
        self.tracker.submit(PendingRequest::PreSleep);
        self.submit(PendingRequest::PreSleep.packet())
    }

    fn submit(&mut self, packet: Packet) -> Disposition {
        match self.session.submit(packet) {
            Ok(()) => Disposition::Continue,
            Err(e) => {
                warn!(error = %e, "Failed to queue packet");
                Disposition::CloseSession
            }
        }
    }
}

fn field_bytes(packet: &Packet, field: Field) -> Bytes {
    packet.field(field).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::sync::mpsc;

    use crate::function::SimpleFunction;
    use crate::job::JobResult;
    use crate::test_support::RecordingTransport;

    struct Fixture {
        session: Session,
        sent: Arc<Mutex<Vec<Packet>>>,
        tracker: RequestTracker,
        functions: HashMap<String, FunctionDefinition>,
        queue: JobQueue,
        results: ResultSender,
        _rx: mpsc::UnboundedReceiver<JobResult>,
    }

    impl Fixture {
        fn new(names: &[&str]) -> Self {
            let transport = RecordingTransport::connected();
            let sent = transport.sent();
            let (results, rx) = mpsc::unbounded_channel();
            let functions = names
                .iter()
                .map(|n| {
                    let def = FunctionDefinition::new(SimpleFunction::new(*n, |d| Ok(d.to_vec())).shared());
                    (n.to_string(), def)
                })
                .collect();
            Self {
                session: Session::new(Box::new(transport), Duration::ZERO),
                sent,
                tracker: RequestTracker::new(),
                functions,
                queue: JobQueue::new(),
                results,
                _rx: rx,
            }
        }

        fn dispatch(&mut self, packet: Packet) -> Disposition {
            Dispatcher {
                session: &mut self.session,
                tracker: &mut self.tracker,
                functions: &self.functions,
                queue: &mut self.queue,
                results: &self.results,
            }
            .dispatch(packet)
        }

        fn sent_kinds(&self) -> Vec<PacketType> {
            self.sent.lock().unwrap().iter().map(|p| p.kind).collect()
        }
    }

    fn response(kind: PacketType, args: &[&[u8]]) -> Packet {
        Packet::response(kind, args.iter().map(|a| Bytes::copy_from_slice(a)).collect())
    }

    #[test]
    fn test_job_assign_enqueues_job() {
        let mut fx = Fixture::new(&["sum"]);
        fx.tracker.submit(PendingRequest::GrabJob);

        let packet = response(PacketType::JobAssign, &[b"H:1", b"sum", &[1, 2]]);
        assert_eq!(fx.dispatch(packet), Disposition::Continue);

        assert!(!fx.tracker.has_outstanding());
        assert_eq!(fx.queue.len(), 1);
        let job = fx.queue.dequeue().unwrap();
        assert_eq!(job.handle(), b"H:1");
        assert_eq!(job.function_name(), "sum");
        assert_eq!(job.data(), &[1, 2]);
        assert_eq!(job.unique_id(), None);
        assert!(fx.sent_kinds().is_empty());
    }

    #[tokio::test]
    async fn test_job_assign_tagged_with_session_generation() {
        let mut fx = Fixture::new(&["sum"]);
        fx.session.close();
        assert!(fx.session.reconnect(&crate::registry::FunctionRegistry::new(), None).await);

        fx.dispatch(response(PacketType::JobAssign, &[b"H:6", b"sum", b""]));
        let job = fx.queue.dequeue().unwrap();
        assert_eq!(job.generation(), fx.session.generation());
        assert_eq!(job.generation(), 1);
    }

    #[test]
    fn test_job_assign_uniq_keeps_unique_id() {
        let mut fx = Fixture::new(&["sum"]);
        let packet = response(PacketType::JobAssignUniq, &[b"H:2", b"sum", b"order-9", b"x"]);
        fx.dispatch(packet);

        let job = fx.queue.dequeue().unwrap();
        assert_eq!(job.unique_id(), Some(&b"order-9"[..]));
        assert_eq!(job.data(), b"x");
    }

    #[test]
    fn test_job_assign_uniq_empty_unique_id_is_none() {
        let mut fx = Fixture::new(&["sum"]);
        fx.dispatch(response(PacketType::JobAssignUniq, &[b"H:3", b"sum", b"", b"x"]));
        assert_eq!(fx.queue.dequeue().unwrap().unique_id(), None);
    }

    #[test]
    fn test_job_assign_for_unknown_function_fails_job() {
        let mut fx = Fixture::new(&["sum"]);
        let packet = response(PacketType::JobAssign, &[b"H:4", b"resize", b""]);
        assert_eq!(fx.dispatch(packet), Disposition::Continue);

        assert!(fx.queue.is_empty());
        let sent = fx.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, PacketType::WorkFail);
        assert_eq!(sent[0].field(Field::JobHandle).unwrap().as_ref(), b"H:4");
    }

    #[test]
    fn test_no_job_sends_single_pre_sleep() {
        let mut fx = Fixture::new(&[]);
        fx.tracker.submit(PendingRequest::GrabJob);

        fx.dispatch(response(PacketType::NoJob, &[]));
        assert_eq!(fx.tracker.outstanding(), Some(PendingRequest::PreSleep));
        fx.dispatch(response(PacketType::NoJob, &[]));

        assert_eq!(fx.sent_kinds(), vec![PacketType::PreSleep]);
    }

    #[test]
    fn test_noop_clears_outstanding() {
        let mut fx = Fixture::new(&[]);
        fx.tracker.submit(PendingRequest::PreSleep);

        assert_eq!(fx.dispatch(response(PacketType::Noop, &[])), Disposition::Continue);
        assert!(!fx.tracker.has_outstanding());
        assert!(fx.sent_kinds().is_empty());
    }

    #[test]
    fn test_echo_and_option_responses_are_ignored() {
        let mut fx = Fixture::new(&[]);
        fx.tracker.submit(PendingRequest::GrabJob);

        assert_eq!(fx.dispatch(response(PacketType::EchoRes, &[b"ping"])), Disposition::Continue);
        assert_eq!(
            fx.dispatch(response(PacketType::OptionRes, &[b"exceptions"])),
            Disposition::Continue
        );
        assert_eq!(fx.tracker.outstanding(), Some(PendingRequest::GrabJob));
    }

    #[test]
    fn test_error_closes_session() {
        let mut fx = Fixture::new(&[]);
        let packet = response(PacketType::Error, &[b"ERR_UNKNOWN", b"boom"]);
        assert_eq!(fx.dispatch(packet), Disposition::CloseSession);
    }

    #[test]
    fn test_unexpected_packet_closes_session() {
        let mut fx = Fixture::new(&[]);
        let packet = response(PacketType::JobCreated, &[b"H:5"]);
        assert_eq!(fx.dispatch(packet), Disposition::CloseSession);
    }

    #[test]
    fn test_dispatch_all_stops_at_close() {
        let mut fx = Fixture::new(&["sum"]);
        let packets = vec![
            response(PacketType::JobAssign, &[b"H:1", b"sum", b""]),
            response(PacketType::Error, &[b"E", b"bad"]),
            response(PacketType::JobAssign, &[b"H:2", b"sum", b""]),
        ];

        let disposition = Dispatcher {
            session: &mut fx.session,
            tracker: &mut fx.tracker,
            functions: &fx.functions,
            queue: &mut fx.queue,
            results: &fx.results,
        }
        .dispatch_all(packets);

        assert_eq!(disposition, Disposition::CloseSession);
        assert_eq!(fx.queue.len(), 1);
    }
}
