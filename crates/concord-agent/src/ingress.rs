//! Ingress sink (spec §6 "Ingress → agent", §9 "callback surface as
//! interface"): one named operation per inbound client-facing message,
//! rather than an inheritance chain of message classes.

use concord_types::{CorrelationId, SessionId};

use crate::collab::{FragmentAction, Subscription};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminRequest {
    ClusterMembersQuery { correlation_id: CorrelationId },
    BackupQuery { correlation_id: CorrelationId },
}

/// Implemented by the agent; each method corresponds to one semantic
/// ingress message from spec §6 (the wire codec framing itself is out of
/// scope per spec.md §1 Non-goals).
pub trait IngressSink {
    fn on_session_connect(
        &mut self,
        correlation_id: CorrelationId,
        response_stream_id: i32,
        version: u32,
        response_channel: String,
        credentials: Vec<u8>,
    );

    fn on_session_close(&mut self, session_id: SessionId);

    fn on_ingress_message(&mut self, session_id: SessionId, body: Vec<u8>);

    fn on_session_keep_alive(&mut self, session_id: SessionId);

    fn on_challenge_response(&mut self, session_id: SessionId, credentials: Vec<u8>);

    fn on_admin_request(&mut self, request: AdminRequest);
}

/// Polls the ingress subscription and dispatches decoded fragments into an
/// [`IngressSink`]. Decoding the wire frame itself is out of scope (spec.md
/// §1 Non-goal); callers that need real dispatch provide their own
/// `Subscription` that pre-decodes and calls the sink directly, or adapt
/// this type's `poll` result for a test harness.
pub struct IngressAdapter<S: Subscription> {
    subscription: S,
}

impl<S: Subscription> IngressAdapter<S> {
    pub fn new(subscription: S) -> Self {
        Self { subscription }
    }

    pub fn is_closed(&self) -> bool {
        self.subscription.is_closed()
    }

    /// Polls up to `limit` fragments; `on_fragment` is the caller-supplied
    /// decode step since the framing is a Non-goal here.
    pub fn poll(&mut self, limit: usize, on_fragment: &mut dyn FnMut(&[u8]) -> FragmentAction) -> usize {
        self.subscription.poll(limit, on_fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        connects: Vec<CorrelationId>,
        keep_alives: Vec<SessionId>,
    }

    impl IngressSink for RecordingSink {
        fn on_session_connect(
            &mut self,
            correlation_id: CorrelationId,
            _response_stream_id: i32,
            _version: u32,
            _response_channel: String,
            _credentials: Vec<u8>,
        ) {
            self.connects.push(correlation_id);
        }

        fn on_session_close(&mut self, _session_id: SessionId) {}

        fn on_ingress_message(&mut self, _session_id: SessionId, _body: Vec<u8>) {}

        fn on_session_keep_alive(&mut self, session_id: SessionId) {
            self.keep_alives.push(session_id);
        }

        fn on_challenge_response(&mut self, _session_id: SessionId, _credentials: Vec<u8>) {}

        fn on_admin_request(&mut self, _request: AdminRequest) {}
    }

    #[test]
    fn sink_records_dispatched_operations() {
        let mut sink = RecordingSink::default();
        sink.on_session_connect(CorrelationId::new(1), 5, 1, "chan".to_string(), vec![]);
        sink.on_session_keep_alive(SessionId::new(9));
        assert_eq!(sink.connects, vec![CorrelationId::new(1)]);
        assert_eq!(sink.keep_alives, vec![SessionId::new(9)]);
    }
}
