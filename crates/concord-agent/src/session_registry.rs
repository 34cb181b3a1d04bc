//! `SessionRegistry`: the cluster-session table, pending/rejected/redirect
//! queues, and timeouts (spec §4.2).

use std::collections::HashMap;

use concord_types::{ClusterTime, CloseReason, CorrelationId, LogPosition, RecordingId, SessionId};

use crate::error::AgentError;
use crate::session::{ClusterSession, SessionState};

/// A session waiting on the authenticator handshake before it can be
/// opened with a log append (spec §4.2: "allocate id ... initiate
/// authenticator connect, place into `pending_sessions`").
#[derive(Debug, Clone)]
pub struct PendingSession {
    pub session: ClusterSession,
}

/// A session the leader rejected (version mismatch, over the concurrent
/// session limit, or authenticator denial) — queued for one egress reply
/// then dropped (spec §4.2).
#[derive(Debug, Clone)]
pub struct RejectedSession {
    pub correlation_id: CorrelationId,
    pub reason: String,
}

/// A connect request this (follower) node cannot admit — queued for one
/// `REDIRECT` egress reply pointing at the current leader (spec §4.2).
#[derive(Debug, Clone)]
pub struct RedirectedSession {
    pub correlation_id: CorrelationId,
    pub response_channel: String,
}

/// A backup query's handshake state (spec §4.2 "Backup sessions are a
/// variant: same handshake, but the final act is a `backup_response`
/// rather than opening a real session; then close."). Tracked separately
/// from [`PendingSession`] since it never allocates a session id or
/// occupies a slot in `sessions_by_id`.
#[derive(Debug, Clone)]
pub struct PendingBackupQuery {
    pub correlation_id: CorrelationId,
    pub response_channel: String,
    pub state: SessionState,
}

/// The finished "final act" of a backup query: the recording id to report
/// back over `response_channel`, once the handshake authenticated.
#[derive(Debug, Clone)]
pub struct BackupResponse {
    pub correlation_id: CorrelationId,
    pub response_channel: String,
    pub recording_id: RecordingId,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions_by_id: HashMap<SessionId, ClusterSession>,
    pending: Vec<PendingSession>,
    rejected: Vec<RejectedSession>,
    redirected: Vec<RedirectedSession>,
    backup_queries: Vec<PendingBackupQuery>,
    backup_responses: Vec<BackupResponse>,
    next_session_id: SessionId,
    max_concurrent_sessions: usize,
    cluster_major_version: u32,
}

impl SessionRegistry {
    pub fn new(max_concurrent_sessions: usize, cluster_major_version: u32) -> Self {
        Self {
            sessions_by_id: HashMap::new(),
            pending: Vec::new(),
            rejected: Vec::new(),
            redirected: Vec::new(),
            backup_queries: Vec::new(),
            backup_responses: Vec::new(),
            next_session_id: SessionId::new(0),
            max_concurrent_sessions,
            cluster_major_version,
        }
    }

    pub fn sessions(&self) -> &HashMap<SessionId, ClusterSession> {
        &self.sessions_by_id
    }

    pub fn next_session_id(&self) -> SessionId {
        self.next_session_id
    }

    pub fn pending(&self) -> &[PendingSession] {
        &self.pending
    }

    pub fn rejected(&self) -> &[RejectedSession] {
        &self.rejected
    }

    pub fn redirected(&self) -> &[RedirectedSession] {
        &self.redirected
    }

    pub fn drain_rejected(&mut self) -> Vec<RejectedSession> {
        std::mem::take(&mut self.rejected)
    }

    pub fn drain_redirected(&mut self) -> Vec<RedirectedSession> {
        std::mem::take(&mut self.redirected)
    }

    /// Invariant check (spec §8): every session has a unique id and a
    /// state other than `REJECTED` (rejected sessions never enter the map).
    pub fn invariant_holds(&self) -> bool {
        self.sessions_by_id.values().all(|s| s.state != SessionState::Rejected)
    }

    /// Follower path (spec §4.2): "on follower, enqueue for REDIRECT
    /// reply."
    pub fn on_session_connect_as_follower(&mut self, correlation_id: CorrelationId, response_channel: String) {
        self.redirected.push(RedirectedSession { correlation_id, response_channel });
    }

    /// Leader path (spec §4.2 `on_session_connect`): rejects on version
    /// major mismatch or over `max_concurrent_sessions`; otherwise
    /// allocates a monotonic id and places the session into `pending`.
    pub fn on_session_connect_as_leader(
        &mut self,
        correlation_id: CorrelationId,
        response_stream_id: i32,
        response_channel: String,
        client_major_version: u32,
        now: ClusterTime,
    ) -> Result<SessionId, AgentError> {
        if client_major_version != self.cluster_major_version {
            self.rejected.push(RejectedSession {
                correlation_id,
                reason: format!(
                    "version major mismatch: cluster={}, client={client_major_version}",
                    self.cluster_major_version
                ),
            });
            return Err(AgentError::IncompatibleVersion {
                local_major: self.cluster_major_version,
                remote_major: client_major_version,
            });
        }
        if self.open_session_count() >= self.max_concurrent_sessions {
            self.rejected.push(RejectedSession {
                correlation_id,
                reason: "max concurrent sessions exceeded".to_string(),
            });
            return Err(AgentError::CapacityExceeded);
        }

        let id = self.next_session_id;
        self.next_session_id = self.next_session_id.next();
        let mut session = ClusterSession::new(id, response_stream_id, response_channel, correlation_id, now);
        session.set_state(SessionState::Connected).expect("INIT -> CONNECTED always valid");
        self.pending.push(PendingSession { session });
        Ok(id)
    }

    fn open_session_count(&self) -> usize {
        self.sessions_by_id.values().filter(|s| s.state == SessionState::Open).count()
    }

    /// Moves a pending session forward once the authenticator issues a
    /// challenge (spec §4.2 `CONNECTED -> CHALLENGED`).
    pub fn on_challenge_issued(&mut self, session_id: SessionId) -> Result<(), AgentError> {
        if let Some(pending) = self.pending.iter_mut().find(|p| p.session.id == session_id) {
            pending.session.set_state(SessionState::Challenged).ok();
        }
        Ok(())
    }

    /// `on_challenge_response` (spec §4.2): authenticated sessions wait for
    /// a successful `SessionOpen` append before moving to the session map;
    /// callers should call [`Self::complete_open`] once that append
    /// succeeds.
    pub fn on_challenge_response(&mut self, session_id: SessionId, authenticated: bool) {
        if let Some(index) = self.pending.iter().position(|p| p.session.id == session_id) {
            if authenticated {
                self.pending[index].session.set_state(SessionState::Authenticated).ok();
            } else {
                let pending = self.pending.remove(index);
                self.rejected.push(RejectedSession {
                    correlation_id: pending.session.correlation_id,
                    reason: "authentication rejected".to_string(),
                });
            }
        }
    }

    /// Completes the open once the `SessionOpen` log entry has actually
    /// been appended (spec §3 invariant, §4.2): moves the session from
    /// `pending` into the session-by-id map.
    pub fn complete_open(&mut self, session_id: SessionId, position: LogPosition) -> Result<(), AgentError> {
        let index = self
            .pending
            .iter()
            .position(|p| p.session.id == session_id)
            .ok_or(AgentError::SessionTimeout)?;
        let mut pending = self.pending.remove(index);
        pending
            .session
            .mark_open(position)
            .map_err(|_| AgentError::SessionTimeout)?;
        self.sessions_by_id.insert(session_id, pending.session);
        Ok(())
    }

    /// `on_session_keep_alive` (spec §4.2): bumps last-activity.
    pub fn on_session_keep_alive(&mut self, session_id: SessionId, now: ClusterTime) {
        if let Some(session) = self.sessions_by_id.get_mut(&session_id) {
            session.touch(now);
        }
    }

    /// Begins closing an open session: removes it from the active map
    /// (the caller is expected to append the `SessionClose` entry and
    /// push the returned session onto the uncommitted ledger — spec §4.2,
    /// §4.6). Returns `None` if the session isn't open.
    pub fn begin_close(&mut self, session_id: SessionId, reason: CloseReason, position: LogPosition) -> Option<ClusterSession> {
        let mut session = self.sessions_by_id.remove(&session_id)?;
        session.mark_closed(position, reason).ok()?;
        Some(session)
    }

    /// Re-admits a session into the active map — used only by
    /// [`crate::uncommitted::UncommittedLedger::restore_uncommitted_entries`]'s
    /// caller, since the close did not commit (spec §4.6 rollback).
    pub fn readmit(&mut self, mut session: ClusterSession) {
        session.state = SessionState::Open;
        session.closed_log_position = None;
        session.close_reason = None;
        self.sessions_by_id.insert(session.id, session);
    }

    /// `prepare_for_new_leadership` step 5 (spec §4.1): drops every session
    /// whose open was never committed past `log_position` — it was never
    /// durable under the old term and does not survive into the new one.
    pub fn clear_sessions_opened_after(&mut self, log_position: LogPosition) -> Vec<SessionId> {
        let stale: Vec<SessionId> = self
            .sessions_by_id
            .values()
            .filter(|s| s.opened_log_position.is_some_and(|p| p > log_position))
            .map(|s| s.id)
            .collect();
        for id in &stale {
            self.sessions_by_id.remove(id);
        }
        stale
    }

    /// `on_backup_query` connect step (spec §4.2 backup variant): the same
    /// CONNECTED entry a normal session connect makes, just tracked apart
    /// from the session map since it will never hold a session id.
    pub fn on_backup_connect(&mut self, correlation_id: CorrelationId, response_channel: String) {
        self.backup_queries.push(PendingBackupQuery {
            correlation_id,
            response_channel,
            state: SessionState::Connected,
        });
    }

    pub fn on_backup_challenge_issued(&mut self, correlation_id: CorrelationId) {
        if let Some(query) = self.backup_queries.iter_mut().find(|q| q.correlation_id == correlation_id) {
            query.state = SessionState::Challenged;
        }
    }

    /// Completes a backup query's handshake: on success, promotes it to a
    /// [`BackupResponse`] carrying the recording id to report back; on
    /// failure the query is simply dropped (spec §4.2: "then close").
    pub fn complete_backup_query(&mut self, correlation_id: CorrelationId, authenticated: bool, recording_id: RecordingId) {
        let Some(index) = self.backup_queries.iter().position(|q| q.correlation_id == correlation_id) else {
            return;
        };
        let mut query = self.backup_queries.remove(index);
        if authenticated {
            query.state = SessionState::Authenticated;
            self.backup_responses.push(BackupResponse {
                correlation_id: query.correlation_id,
                response_channel: query.response_channel,
                recording_id,
            });
        }
    }

    pub fn drain_backup_responses(&mut self) -> Vec<BackupResponse> {
        std::mem::take(&mut self.backup_responses)
    }

    /// Session-timeout sweep (spec §4.2, §6 `timedOutClientCounter`).
    /// Returns the ids of sessions that should be closed with reason
    /// `TIMEOUT`.
    pub fn timed_out_sessions(&self, now: ClusterTime, session_timeout_ns: i64) -> Vec<SessionId> {
        self.sessions_by_id
            .values()
            .filter(|s| s.is_timed_out(now, session_timeout_ns))
            .map(|s| s.id)
            .collect()
    }
}
