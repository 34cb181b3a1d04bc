//! Error kinds and their disposition (spec §7).
//!
//! Every variant answers its own [`Disposition`] so the run loop's dispatch
//! can never drift from the table in spec §7: there is no separate lookup
//! that could fall out of sync with the enum.

use concord_types::{CorrelationId, LogPosition};

/// Whether an [`AgentError`] should be recovered from (usually by entering
/// an election) or is fatal (the module moves to `CLOSED`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Fatal,
    Recoverable,
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("publication or subscription closed by the transport")]
    TransportClosed,

    #[error("archive recording stopped unexpectedly at position {stop_position}")]
    RecordingStopped { stop_position: LogPosition },

    #[error("incompatible app version: local major {local_major}, remote major {remote_major}")]
    IncompatibleVersion { local_major: u32, remote_major: u32 },

    #[error("incompatible cluster time unit: expected {expected}, found {found}")]
    IncompatibleTimeUnit { expected: String, found: String },

    #[error("pending message queue capacity exceeded")]
    CapacityExceeded,

    #[error("quorum heartbeat lost: no append observed from a quorum within the timeout")]
    QuorumLost,

    #[error("no leader heartbeat observed within the timeout")]
    LeaderHeartbeatTimeout,

    #[error("unexpected role message observed at term {term_id}")]
    UnexpectedRoleMessage { term_id: i64 },

    #[error("service ack for correlation {correlation} reported position {reported}, expected {expected}")]
    SnapshotInvalidAck {
        correlation: CorrelationId,
        reported: LogPosition,
        expected: LogPosition,
    },

    #[error("archive control operation failed: {message}")]
    ArchiveOperation { message: String },

    #[error("session timed out after inactivity")]
    SessionTimeout,
}

impl AgentError {
    /// The disposition table from spec §7, kept as a method on the enum
    /// itself rather than a side table that could drift out of sync.
    pub const fn disposition(&self) -> Disposition {
        match self {
            Self::TransportClosed
            | Self::RecordingStopped { .. }
            | Self::IncompatibleVersion { .. }
            | Self::IncompatibleTimeUnit { .. }
            | Self::CapacityExceeded
            | Self::SnapshotInvalidAck { .. } => Disposition::Fatal,

            Self::QuorumLost
            | Self::LeaderHeartbeatTimeout
            | Self::UnexpectedRoleMessage { .. }
            | Self::ArchiveOperation { .. }
            | Self::SessionTimeout => Disposition::Recoverable,
        }
    }

    pub const fn is_fatal(&self) -> bool {
        matches!(self.disposition(), Disposition::Fatal)
    }
}

/// Counts and logs errors as they are handled, per spec §7: "Recoverable
/// errors go through a *counted error handler* ... Fatal errors call the
/// same handler, set state to CLOSED, and invoke the termination hook."
#[derive(Debug, Default)]
pub struct CountedErrorHandler {
    fatal_count: u64,
    recoverable_count: u64,
}

impl CountedErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records and logs `error`, returning its disposition so the caller
    /// can decide how to react (enter election, close, etc).
    pub fn handle(&mut self, error: &AgentError) -> Disposition {
        match error.disposition() {
            Disposition::Fatal => {
                self.fatal_count += 1;
                tracing::error!(error = %error, "fatal agent error");
                Disposition::Fatal
            }
            Disposition::Recoverable => {
                self.recoverable_count += 1;
                tracing::warn!(error = %error, "recoverable agent error");
                Disposition::Recoverable
            }
        }
    }

    pub fn fatal_count(&self) -> u64 {
        self.fatal_count
    }

    pub fn recoverable_count(&self) -> u64 {
        self.recoverable_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_lost_is_recoverable() {
        assert_eq!(AgentError::QuorumLost.disposition(), Disposition::Recoverable);
        assert!(!AgentError::QuorumLost.is_fatal());
    }

    #[test]
    fn capacity_exceeded_is_fatal() {
        assert_eq!(AgentError::CapacityExceeded.disposition(), Disposition::Fatal);
        assert!(AgentError::CapacityExceeded.is_fatal());
    }

    #[test]
    fn handler_counts_by_disposition() {
        let mut handler = CountedErrorHandler::new();
        handler.handle(&AgentError::QuorumLost);
        handler.handle(&AgentError::CapacityExceeded);
        assert_eq!(handler.recoverable_count(), 1);
        assert_eq!(handler.fatal_count(), 1);
    }
}
