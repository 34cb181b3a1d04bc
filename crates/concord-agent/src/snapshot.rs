//! `SnapshotTaker` / loading (spec §4.8).
//!
//! A snapshot is a serialized image of agent state at a specific log
//! position: a BEGIN marker, module state, membership, every OPEN/CLOSED
//! session, the timer wheel, the pending-message ring, and an END marker.

use serde::{Deserialize, Serialize};

use concord_types::{ClusterTimeUnit, LeadershipTermId, LogPosition, ServiceSessionId, SessionId};

use crate::pending_message_queue::{PendingServiceMessage, NOT_YET_APPENDED};
use crate::session::{ClusterSession, SessionState};
use crate::timer_wheel::TimerEntry;

pub const SNAPSHOT_TYPE_ID: i32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotBeginMarker {
    pub type_id: i32,
    pub log_position: LogPosition,
    pub leadership_term_id: LeadershipTermId,
    pub time_unit: ClusterTimeUnit,
    pub app_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusModuleState {
    pub next_session_id: SessionId,
    pub next_service_session_id: ServiceSessionId,
    pub log_service_session_id: ServiceSessionId,
    pub pending_message_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializedSession {
    id: u64,
    response_stream_id: i32,
    response_channel: String,
    correlation_id: i64,
    is_open: bool,
    opened_log_position: Option<i64>,
    closed_log_position: Option<i64>,
    time_of_last_activity_ns: i64,
}

impl From<&ClusterSession> for SerializedSession {
    fn from(s: &ClusterSession) -> Self {
        Self {
            id: s.id.as_u64(),
            response_stream_id: s.response_stream_id,
            response_channel: s.response_channel.clone(),
            correlation_id: s.correlation_id.as_i64(),
            is_open: s.state == SessionState::Open,
            opened_log_position: s.opened_log_position.map(concord_types::LogPosition::as_i64),
            closed_log_position: s.closed_log_position.map(concord_types::LogPosition::as_i64),
            time_of_last_activity_ns: s.time_of_last_activity.as_i64(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializedPendingMessage {
    service_session_id: i64,
    body: Vec<u8>,
    append_position_slot: i64,
}

/// A fully-materialized snapshot image (spec §4.8 step 3). Field order
/// matches the documented BEGIN...END sequence, so `Serialize`'s
/// struct-field order is itself the on-wire ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotImage {
    pub begin: SnapshotBeginMarker,
    pub module_state: ConsensusModuleState,
    pub membership_encoded: String,
    sessions: Vec<SerializedSession>,
    timers: Vec<(i64, i64)>,
    pending_messages: Vec<SerializedPendingMessage>,
}

/// Writes a [`SnapshotImage`] from live agent state (spec §4.8 step 3).
pub struct SnapshotTaker;

impl SnapshotTaker {
    #[allow(clippy::too_many_arguments)]
    pub fn take(
        begin: SnapshotBeginMarker,
        module_state: ConsensusModuleState,
        membership_encoded: String,
        sessions: &[ClusterSession],
        timers: &[TimerEntry],
        pending_messages: &[PendingServiceMessage],
    ) -> SnapshotImage {
        let sessions = sessions
            .iter()
            .filter(|s| matches!(s.state, SessionState::Open | SessionState::Closed))
            .map(SerializedSession::from)
            .collect();
        let timers = timers.iter().map(|t| (t.correlation_id.as_i64(), t.deadline.as_i64())).collect();
        let pending_messages = pending_messages
            .iter()
            .map(|m| SerializedPendingMessage {
                service_session_id: m.service_session_id.as_i64(),
                body: m.body.clone(),
                append_position_slot: m.append_position_slot,
            })
            .collect();
        SnapshotImage {
            begin,
            module_state,
            membership_encoded,
            sessions,
            timers,
            pending_messages,
        }
    }

    pub fn encode(image: &SnapshotImage) -> Vec<u8> {
        serde_json::to_vec(image).expect("snapshot image is always serializable")
    }
}

/// Loaded, materialized snapshot contents, ready to rehydrate an agent
/// (spec §4.8 "Snapshot loading ... is the symmetric operation").
pub struct LoadedSnapshot {
    pub begin: SnapshotBeginMarker,
    pub module_state: ConsensusModuleState,
    pub membership_encoded: String,
    pub sessions: Vec<ClusterSession>,
    pub timers: Vec<TimerEntry>,
    /// After load, timestamp slots are reset to `NOT_YET_APPENDED`: they
    /// are not yet re-appended in this term (spec §4.8 closing line).
    pub pending_messages: Vec<PendingServiceMessage>,
}

pub struct SnapshotLoader;

impl SnapshotLoader {
    pub fn decode(bytes: &[u8]) -> Result<LoadedSnapshot, serde_json::Error> {
        let image: SnapshotImage = serde_json::from_slice(bytes)?;
        let sessions = image
            .sessions
            .into_iter()
            .map(|s| {
                let mut session = ClusterSession::new(
                    SessionId::new(s.id),
                    s.response_stream_id,
                    s.response_channel,
                    concord_types::CorrelationId::new(s.correlation_id),
                    concord_types::ClusterTime::new(s.time_of_last_activity_ns),
                );
                if s.is_open {
                    session.set_state(SessionState::Connected).ok();
                    session.set_state(SessionState::Challenged).ok();
                    session.set_state(SessionState::Authenticated).ok();
                    session.mark_open(LogPosition::new(s.opened_log_position.unwrap_or_default())).ok();
                } else {
                    session.set_state(SessionState::Connected).ok();
                    session.set_state(SessionState::Challenged).ok();
                    session.set_state(SessionState::Authenticated).ok();
                    session.mark_open(LogPosition::new(s.opened_log_position.unwrap_or_default())).ok();
                    session
                        .mark_closed(
                            LogPosition::new(s.closed_log_position.unwrap_or_default()),
                            concord_types::CloseReason::ServiceAction,
                        )
                        .ok();
                }
                session
            })
            .collect();
        let timers = image
            .timers
            .into_iter()
            .map(|(correlation, deadline)| TimerEntry {
                correlation_id: concord_types::CorrelationId::new(correlation),
                deadline: concord_types::ClusterTime::new(deadline),
            })
            .collect();
        let pending_messages = image
            .pending_messages
            .into_iter()
            .map(|m| PendingServiceMessage {
                service_session_id: ServiceSessionId::new(m.service_session_id),
                body: m.body,
                append_position_slot: NOT_YET_APPENDED,
            })
            .collect();
        Ok(LoadedSnapshot {
            begin: image.begin,
            module_state: image.module_state,
            membership_encoded: image.membership_encoded,
            sessions,
            timers,
            pending_messages,
        })
    }
}
