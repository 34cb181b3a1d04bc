//! Service control (spec §6 "Service control: JoinLog, TerminationPosition,
//! ClusterMembersResponse"): the narrow outbound surface to hosted
//! services, plus the inbound service-ack the snapshot and termination
//! flows wait on (spec §4.8, glossary "Service ack").

use concord_types::{LogPosition, RecordingId};

use crate::error::AgentError;

/// Sent once per hosted service when it should attach to the replicated
/// log at a known position (spec §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinLog {
    pub log_position: LogPosition,
    pub max_log_position: LogPosition,
    pub leadership_term_id: i64,
}

/// The three outbound message kinds a hosted service receives from the
/// agent (spec §6 "Service control").
pub trait ServiceControl {
    fn send_join_log(&mut self, join_log: &JoinLog) -> Result<(), AgentError>;

    fn send_termination_position(&mut self, log_position: LogPosition) -> Result<(), AgentError>;

    fn send_cluster_members_response(&mut self, encoded_members: &str) -> Result<(), AgentError>;
}

/// A service's acknowledgement that it has reached and processed up to
/// `log_position` (glossary: "Service ack"), used by the snapshot flow
/// (spec §4.8) and by termination to know every service has caught up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceAck {
    pub service_id: i32,
    pub log_position: LogPosition,
    pub recording_id: Option<RecordingId>,
}

/// Tracks outstanding acks for one coordinated barrier (a snapshot or a
/// termination), since every registered service id must ack the same
/// position before the agent proceeds (spec §4.8 step "when all services
/// acknowledge reaching the snapshot's log position").
#[derive(Debug, Default)]
pub struct ServiceAckBarrier {
    expected_position: LogPosition,
    acked: Vec<i32>,
    service_ids: Vec<i32>,
}

impl ServiceAckBarrier {
    pub fn new(expected_position: LogPosition, service_ids: Vec<i32>) -> Self {
        Self {
            expected_position,
            acked: Vec::new(),
            service_ids,
        }
    }

    /// Records an ack; returns an error if the reported position doesn't
    /// match what this barrier expects (spec §7 `SnapshotInvalidAck`).
    pub fn on_ack(&mut self, ack: ServiceAck) -> Result<(), AgentError> {
        if ack.log_position != self.expected_position {
            return Err(AgentError::SnapshotInvalidAck {
                correlation: concord_types::CorrelationId::new(i64::from(ack.service_id)),
                reported: ack.log_position,
                expected: self.expected_position,
            });
        }
        if !self.acked.contains(&ack.service_id) {
            self.acked.push(ack.service_id);
        }
        Ok(())
    }

    pub fn is_satisfied(&self) -> bool {
        self.service_ids.iter().all(|id| self.acked.contains(id))
    }
}
