//! `ClusterSession` and its state machine (spec §3, §4.2).

use concord_types::{ClusterTime, CloseReason, CorrelationId, LogPosition, SessionId};

/// Per-session state, transitioned only via [`SessionState::transition`]
/// (spec §9: "forbid 'set state directly' paths outside the transition
/// helper").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Init,
    Connected,
    Challenged,
    Authenticated,
    Open,
    Rejected,
    Closed,
}

impl SessionState {
    /// Spec §4.2: `INIT -> CONNECTED -> CHALLENGED -> AUTHENTICATED -> OPEN`,
    /// with `-> REJECTED` available from any pre-open state and `-> CLOSED`
    /// available only from `OPEN` (closing a non-open session just drops it
    /// from the registry — it never needed a log entry).
    pub fn transition(self, to: Self) -> Result<Self, InvalidSessionTransition> {
        let allowed = match (self, to) {
            (Self::Init, Self::Connected) => true,
            (Self::Connected, Self::Challenged | Self::Rejected) => true,
            (Self::Challenged, Self::Authenticated | Self::Rejected) => true,
            (Self::Authenticated, Self::Open | Self::Rejected) => true,
            (Self::Open, Self::Closed) => true,
            _ => false,
        };
        if allowed {
            Ok(to)
        } else {
            Err(InvalidSessionTransition { from: self, to })
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid session state transition: {from:?} -> {to:?}")]
pub struct InvalidSessionTransition {
    pub from: SessionState,
    pub to: SessionState,
}

/// A cluster client session (spec §3).
#[derive(Debug, Clone)]
pub struct ClusterSession {
    pub id: SessionId,
    pub response_stream_id: i32,
    pub response_channel: String,
    pub correlation_id: CorrelationId,
    pub state: SessionState,
    pub opened_log_position: Option<LogPosition>,
    pub closed_log_position: Option<LogPosition>,
    pub time_of_last_activity: ClusterTime,
    pub close_reason: Option<CloseReason>,
    pub has_new_leader_event_pending: bool,
}

impl ClusterSession {
    pub fn new(
        id: SessionId,
        response_stream_id: i32,
        response_channel: String,
        correlation_id: CorrelationId,
        now: ClusterTime,
    ) -> Self {
        Self {
            id,
            response_stream_id,
            response_channel,
            correlation_id,
            state: SessionState::Init,
            opened_log_position: None,
            closed_log_position: None,
            time_of_last_activity: now,
            close_reason: None,
            has_new_leader_event_pending: false,
        }
    }

    pub fn set_state(&mut self, to: SessionState) -> Result<(), InvalidSessionTransition> {
        self.state = self.state.transition(to)?;
        Ok(())
    }

    /// Marks the session open at the position its `SessionOpen` entry was
    /// appended at (spec §3 invariant: reaches OPEN only once that entry
    /// appears at a known log position).
    pub fn mark_open(&mut self, position: LogPosition) -> Result<(), InvalidSessionTransition> {
        self.set_state(SessionState::Open)?;
        self.opened_log_position = Some(position);
        Ok(())
    }

    /// Marks the session closed at the position its `SessionClose` entry
    /// was appended at, pending commit (spec §4.2, §4.6).
    pub fn mark_closed(
        &mut self,
        position: LogPosition,
        reason: CloseReason,
    ) -> Result<(), InvalidSessionTransition> {
        self.set_state(SessionState::Closed)?;
        self.closed_log_position = Some(position);
        self.close_reason = Some(reason);
        Ok(())
    }

    pub fn touch(&mut self, now: ClusterTime) {
        self.time_of_last_activity = now;
    }

    pub fn is_timed_out(&self, now: ClusterTime, timeout_ns: i64) -> bool {
        self.state == SessionState::Open
            && now.saturating_sub(self.time_of_last_activity) >= timeout_ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_session() -> ClusterSession {
        ClusterSession::new(
            SessionId::new(1),
            7,
            "aeron:udp?endpoint=localhost:9000".to_string(),
            CorrelationId::new(100),
            ClusterTime::new(0),
        )
    }

    #[test]
    fn happy_path_to_open() {
        let mut s = new_session();
        s.set_state(SessionState::Connected).unwrap();
        s.set_state(SessionState::Challenged).unwrap();
        s.set_state(SessionState::Authenticated).unwrap();
        s.mark_open(LogPosition::new(64)).unwrap();
        assert_eq!(s.state, SessionState::Open);
        assert_eq!(s.opened_log_position, Some(LogPosition::new(64)));
    }

    #[test]
    fn cannot_skip_states() {
        let mut s = new_session();
        assert!(s.set_state(SessionState::Open).is_err());
    }

    #[test]
    fn closed_is_terminal() {
        let mut s = new_session();
        s.set_state(SessionState::Connected).unwrap();
        s.set_state(SessionState::Challenged).unwrap();
        s.set_state(SessionState::Authenticated).unwrap();
        s.mark_open(LogPosition::new(1)).unwrap();
        s.mark_closed(LogPosition::new(2), CloseReason::ClientAction).unwrap();
        assert!(s.set_state(SessionState::Open).is_err());
    }

    #[test]
    fn timeout_only_applies_while_open() {
        let mut s = new_session();
        assert!(!s.is_timed_out(ClusterTime::new(1_000_000_000), 1));
        s.set_state(SessionState::Connected).unwrap();
        s.set_state(SessionState::Challenged).unwrap();
        s.set_state(SessionState::Authenticated).unwrap();
        s.mark_open(LogPosition::new(1)).unwrap();
        assert!(s.is_timed_out(ClusterTime::new(1_000_000_000), 1));
    }
}
