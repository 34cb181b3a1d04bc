//! The agent run-loop (spec §4.1): ties every other module together behind
//! one entry point, [`Agent::do_work`].

use std::sync::Arc;

use concord_types::{
    ClusterTime, ClusterTimeUnit, CloseReason, ControlToggle, CorrelationId, LeadershipTermId, LogPosition, MemberId, RecordingId, ServiceSessionId,
    SessionId,
};

use crate::collab::{ArchiveClient, Authenticator, FragmentAction, Publication, Subscription, TerminationHook};
use crate::config::{AgentConfig, SLOW_TICK_INTERVAL_NS};
use crate::counters::AgentCounters;
use crate::dynamic_join::{DynamicJoin, DynamicJoinState};
use crate::election::{Election, ElectionAdapter};
use crate::error::{AgentError, CountedErrorHandler, Disposition};
use crate::ingress::{AdminRequest, IngressAdapter, IngressSink};
use crate::log::{LogAdapter, LogEntryHandler, LogEntryPayload, LogPublisher};
use crate::member_status::MemberStatusSink;
use crate::membership::MembershipSet;
use crate::module_state::{ModuleState, SnapshotInFlight};
use crate::pending_message_queue::PendingMessageQueue;
use crate::recording_log::{RecordingLog, SnapshotEntry, MODULE_SERVICE_ID};
use crate::role::Role;
use crate::service_control::ServiceAckBarrier;
use crate::session::SessionState;
use crate::session_registry::SessionRegistry;
use crate::snapshot::{ConsensusModuleState, LoadedSnapshot, SnapshotBeginMarker, SnapshotLoader, SnapshotTaker, SNAPSHOT_TYPE_ID};
use crate::timer_wheel::TimerWheel;
use crate::uncommitted::UncommittedLedger;

/// The consensus module agent for one cluster node (spec §1, §4.1).
///
/// Generic over the log's [`Publication`]/[`Subscription`] pair, since
/// those are polled every tick; the archive client, authenticator, and
/// termination hook are trait objects, since they're only exercised on the
/// cold paths (leadership transition, session handshake, shutdown).
pub struct Agent<P: Publication, S: Subscription, I: Subscription> {
    config: AgentConfig,
    counters: Arc<AgentCounters>,
    error_handler: CountedErrorHandler,

    module_state: ModuleState,
    role: Role,
    leadership_term_id: LeadershipTermId,
    control_toggle: ControlToggle,

    now: ClusterTime,
    last_slow_tick: ClusterTime,
    last_leader_contact_ns: i64,

    sessions: SessionRegistry,
    timers: TimerWheel,
    pending_messages: PendingMessageQueue,
    uncommitted: UncommittedLedger,
    membership: MembershipSet,

    log_publisher: LogPublisher<P>,
    log_adapter: LogAdapter<S>,
    ingress: IngressAdapter<I>,
    recording_log: RecordingLog,
    recording_id: RecordingId,

    election: ElectionAdapter,
    dynamic_join: Option<DynamicJoin>,

    archive: Box<dyn ArchiveClient>,
    authenticator: Box<dyn Authenticator>,
    termination_hook: Box<dyn TerminationHook>,

    local_append_position: LogPosition,
    notified_commit_position: LogPosition,
    commit_position: LogPosition,
    termination_position: Option<LogPosition>,
    log_service_session_id: ServiceSessionId,

    snapshot_in_flight: Option<SnapshotInFlight>,
    snapshot_ack_barrier: Option<ServiceAckBarrier>,
}

impl<P: Publication, S: Subscription, I: Subscription> Agent<P, S, I> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AgentConfig,
        counters: Arc<AgentCounters>,
        log_publisher: LogPublisher<P>,
        log_adapter: LogAdapter<S>,
        ingress: IngressAdapter<I>,
        recording_log: RecordingLog,
        archive: Box<dyn ArchiveClient>,
        authenticator: Box<dyn Authenticator>,
        termination_hook: Box<dyn TerminationHook>,
        now: ClusterTime,
    ) -> Self {
        let timers = TimerWheel::new(config.wheel_tick_resolution_ns, config.ticks_per_wheel);
        let pending_messages = PendingMessageQueue::new(config.service_message_limit.max(1) * 8);
        let sessions = SessionRegistry::new(config.max_concurrent_sessions, config.cluster_major_version);
        Self {
            config,
            counters,
            error_handler: CountedErrorHandler::new(),
            module_state: ModuleState::Init,
            role: Role::Follower,
            leadership_term_id: LeadershipTermId::INITIAL,
            control_toggle: ControlToggle::Neutral,
            now,
            last_slow_tick: now,
            last_leader_contact_ns: now.as_i64(),
            sessions,
            timers,
            pending_messages,
            uncommitted: UncommittedLedger::new(),
            membership: MembershipSet::new(),
            log_publisher,
            log_adapter,
            ingress,
            recording_log,
            recording_id: RecordingId::NULL,
            election: ElectionAdapter::new(),
            dynamic_join: None,
            archive,
            authenticator,
            termination_hook,
            local_append_position: LogPosition::ZERO,
            notified_commit_position: LogPosition::ZERO,
            commit_position: LogPosition::ZERO,
            termination_position: None,
            log_service_session_id: ServiceSessionId::default(),
            snapshot_in_flight: None,
            snapshot_ack_barrier: None,
        }
    }

    pub fn module_state(&self) -> ModuleState {
        self.module_state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn commit_position(&self) -> LogPosition {
        self.commit_position
    }

    pub fn local_append_position(&self) -> LogPosition {
        self.local_append_position
    }

    pub fn membership(&self) -> &MembershipSet {
        &self.membership
    }

    pub fn membership_mut(&mut self) -> &mut MembershipSet {
        &mut self.membership
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Queues an outbound message for the agent's hosted services to
    /// replicate, returning the session id it will be tagged with once
    /// appended (spec §6 "ServiceSessionMessage").
    pub fn enqueue_service_message(&mut self, body: Vec<u8>) -> Result<concord_types::ServiceSessionId, AgentError> {
        self.pending_messages.on_service_message(body)
    }

    pub fn pending_service_message_count(&self) -> usize {
        self.pending_messages.len()
    }

    pub fn recording_log_entry_count(&self) -> usize {
        self.recording_log.entries().len()
    }

    pub fn set_control_toggle(&mut self, toggle: ControlToggle) {
        self.control_toggle = toggle;
    }

    /// INIT -> ACTIVE, or SUSPENDED if the control toggle was flipped
    /// before recovery finished (spec §4.1, §4.9). Consults the recording
    /// log's recovery plan and, when it names this module's own durable
    /// snapshot, retrieves and loads it before the module ever reaches
    /// ACTIVE.
    pub fn complete_recovery(&mut self) {
        let plan = self.recording_log.recovery_plan();
        self.leadership_term_id = plan.last_leadership_term_id;
        self.local_append_position = self.local_append_position.max(plan.appended_log_position);
        self.commit_position = self.commit_position.max(plan.appended_log_position);
        self.notified_commit_position = self.notified_commit_position.max(plan.appended_log_position);

        if let Some(module_snapshot) = plan.snapshots.iter().find(|s| s.service_id == MODULE_SERVICE_ID) {
            match self.archive.retrieve_snapshot(module_snapshot.recording_id) {
                Ok(bytes) => match SnapshotLoader::decode(&bytes) {
                    Ok(loaded) => self.apply_loaded_snapshot(loaded),
                    Err(err) => tracing::warn!(%err, "failed to decode durable snapshot during recovery"),
                },
                Err(err) => tracing::warn!(%err, recording_id = %module_snapshot.recording_id, "failed to retrieve durable snapshot during recovery"),
            }
        }

        let target = if self.control_toggle == ControlToggle::Suspend {
            ModuleState::Suspended
        } else {
            ModuleState::Active
        };
        self.transition_module_state(target);
    }

    /// Rehydrates live agent state from a decoded snapshot image (spec
    /// §4.8 "Snapshot loading ... is the symmetric operation"), used by
    /// both restart recovery and dynamic-join snapshot retrieval. Only
    /// sessions the snapshot recorded as still OPEN are re-admitted;
    /// closed sessions are historical and need no live bookkeeping.
    fn apply_loaded_snapshot(&mut self, loaded: LoadedSnapshot) {
        self.local_append_position = self.local_append_position.max(loaded.begin.log_position);
        self.commit_position = self.commit_position.max(loaded.begin.log_position);
        self.notified_commit_position = self.notified_commit_position.max(loaded.begin.log_position);
        self.leadership_term_id = loaded.begin.leadership_term_id;
        self.log_service_session_id = loaded.module_state.log_service_session_id;
        for session in loaded.sessions {
            if session.state == SessionState::Open {
                self.sessions.readmit(session);
            }
        }
        for timer in loaded.timers {
            self.timers.schedule(timer.correlation_id, timer.deadline);
        }
        self.pending_messages
            .restore_from_snapshot(loaded.module_state.next_service_session_id, loaded.pending_messages);
    }

    /// Begins a dynamic-join bootstrap (spec §4.9): used only when this
    /// node starts with empty membership.
    pub fn begin_dynamic_join(&mut self, join: DynamicJoin) {
        self.dynamic_join = Some(join);
    }

    /// The host hands the agent a concrete [`Election`] instance once
    /// dynamic join (or a detected newer term) calls for one; the agent
    /// never constructs its own (spec §9 "No cyclic ownership").
    pub fn enter_election(&mut self, election: Box<dyn Election>) {
        self.set_role(Role::Candidate);
        self.election.enter_election(election);
    }

    fn transition_module_state(&mut self, to: ModuleState) {
        match self.module_state.transition(to) {
            Ok(state) => {
                self.module_state = state;
                self.counters.set_module_state(state);
            }
            Err(err) => tracing::warn!(%err, "ignored invalid module state transition"),
        }
    }

    fn set_role(&mut self, role: Role) {
        self.role = role;
        self.counters.set_role(role);
    }

    /// The host scheduler's single entry point (spec §4.1, §5): performs at
    /// most one slow-tick and one fast-tick of work, never blocks beyond
    /// the documented internal busy-wait points.
    pub fn do_work(&mut self, now: ClusterTime) -> Result<(), AgentError> {
        self.now = now;
        if self.module_state == ModuleState::Closed {
            return Ok(());
        }

        if now.saturating_sub(self.last_slow_tick) >= SLOW_TICK_INTERVAL_NS {
            self.last_slow_tick = now;
            if let Err(err) = self.slow_tick() {
                self.handle_error(err)?;
            }
        }

        if self.module_state == ModuleState::Snapshot {
            if let Err(err) = self.advance_snapshot() {
                self.handle_error(err)?;
            }
            return Ok(());
        }

        // Priority dispatch: dynamic-join > election > normal consensus work.
        if let Some(join) = self.dynamic_join.as_ref() {
            if join.is_done() {
                self.dynamic_join = None;
            } else {
                return Ok(());
            }
        } else if self.election.is_active() {
            if let Some((leader, term)) = self.election.poll_complete() {
                if let Err(err) = self.election_complete(leader, term) {
                    self.handle_error(err)?;
                }
            }
            return Ok(());
        } else if let Err(err) = self.consensus_work() {
            self.handle_error(err)?;
        }

        self.update_member_position();
        Ok(())
    }

    fn slow_tick(&mut self) -> Result<(), AgentError> {
        match self.role {
            Role::Leader => self.slow_tick_leader(),
            Role::Follower | Role::Candidate => self.slow_tick_follower(),
        }
    }

    /// Spec §4.1 "Slow-tick work (leader in ACTIVE)".
    fn slow_tick_leader(&mut self) -> Result<(), AgentError> {
        if self.module_state != ModuleState::Active {
            return Ok(());
        }
        for redirect in self.sessions.drain_redirected() {
            tracing::debug!(correlation = %redirect.correlation_id, "redirecting session to current leader");
        }
        for rejected in self.sessions.drain_rejected() {
            tracing::debug!(correlation = %rejected.correlation_id, reason = %rejected.reason, "rejecting session");
        }
        match self.control_toggle {
            ControlToggle::Suspend => self.transition_module_state(ModuleState::Suspended),
            ControlToggle::Resume => {}
            ControlToggle::Snapshot => self.transition_module_state(ModuleState::Snapshot),
            ControlToggle::Shutdown => {
                self.termination_position = Some(self.local_append_position);
                self.transition_module_state(ModuleState::Snapshot);
            }
            ControlToggle::Abort => self.transition_module_state(ModuleState::Quitting),
            ControlToggle::Neutral => {}
        }
        self.control_toggle = ControlToggle::Neutral;

        let timed_out = self.sessions.timed_out_sessions(self.now, self.config.session_timeout_ns);
        for session_id in timed_out {
            self.close_session(session_id, CloseReason::Timeout)?;
            self.counters.timed_out_client_counter.increment();
        }

        if self.membership.has_lost_quorum(self.now.as_i64(), self.config.leader_heartbeat_timeout_ns) {
            return Err(AgentError::QuorumLost);
        }
        Ok(())
    }

    /// Spec §4.1 "Slow-tick work (follower)".
    fn slow_tick_follower(&mut self) -> Result<(), AgentError> {
        if let Some(termination_position) = self.termination_position {
            if self.log_adapter.local_position() >= termination_position {
                self.transition_module_state(ModuleState::Terminating);
            }
        }
        if self.now.as_i64() - self.last_leader_contact_ns > self.config.leader_heartbeat_timeout_ns {
            return Err(AgentError::LeaderHeartbeatTimeout);
        }
        Ok(())
    }

    /// Spec §4.1 "Consensus work".
    fn consensus_work(&mut self) -> Result<(), AgentError> {
        match self.role {
            Role::Leader => self.consensus_work_leader(),
            Role::Follower | Role::Candidate => self.consensus_work_follower(),
        }
    }

    fn consensus_work_leader(&mut self) -> Result<(), AgentError> {
        self.poll_ingress();
        if self.module_state != ModuleState::Active {
            return Ok(());
        }

        self.append_pending_session_opens()?;
        self.append_pending_join()?;

        for entry in self.timers.poll_expired(self.now) {
            self.append_timer(entry.correlation_id)?;
        }

        let mut appended = 0;
        while appended < self.config.service_message_limit {
            let Some(head) = self.pending_messages.head() else { break };
            if head.is_appended() {
                break;
            }
            let body = head.body.clone();
            let service_session_id = head.service_session_id;
            let outcome = self.log_publisher.append(&LogEntryPayload::ServiceSessionMessage {
                service_session_id: service_session_id.as_i64(),
                body,
            })?;
            let crate::log::AppendOutcome::Appended(position) = outcome else {
                break;
            };
            self.pending_messages.record_head_appended(position);
            self.uncommitted.note_service_message_appended();
            self.local_append_position = self.local_append_position.max(position);
            self.log_service_session_id = service_session_id;
            appended += 1;
        }
        Ok(())
    }

    /// Appends a `SessionOpen` entry for each pending session the
    /// authenticator has cleared, then moves it from `pending` into the
    /// session-by-id map (spec §4.2: `AUTHENTICATED -> OPEN` only happens
    /// on a successful append).
    fn append_pending_session_opens(&mut self) -> Result<(), AgentError> {
        let ready: Vec<SessionId> = self.sessions.pending().iter().filter(|p| p.session.state == SessionState::Authenticated).map(|p| p.session.id).collect();
        for session_id in ready {
            let Some(pending) = self.sessions.pending().iter().find(|p| p.session.id == session_id) else {
                continue;
            };
            let response_stream_id = pending.session.response_stream_id;
            let response_channel = pending.session.response_channel.clone();
            match self.log_publisher.append(&LogEntryPayload::SessionOpen { session_id, response_stream_id, response_channel })? {
                crate::log::AppendOutcome::Appended(position) => {
                    self.local_append_position = self.local_append_position.max(position);
                    self.sessions.complete_open(session_id, position)?;
                }
                crate::log::AppendOutcome::Backpressured => break,
            }
        }
        Ok(())
    }

    /// Appends the `JOIN` `MembershipChangeEvent` for one passive member
    /// that has requested to join, promoting it to active on success (spec
    /// §4.7). Only reached from `consensus_work_leader`, which requires
    /// `ModuleState::Active`, so a JOIN is never appended while a snapshot
    /// is in flight (spec §9 open question: serialize JOIN against
    /// SNAPSHOT).
    fn append_pending_join(&mut self) -> Result<(), AgentError> {
        let Some(member_id) = self.membership.passive_members.iter().find(|m| m.has_requested_join).map(|m| m.id) else {
            return Ok(());
        };
        match self.log_publisher.append(&LogEntryPayload::MembershipChangeEvent { encoded_members: format!("JOIN:{member_id}") })? {
            crate::log::AppendOutcome::Appended(position) => {
                self.local_append_position = self.local_append_position.max(position);
                self.membership.promote_to_active(member_id);
            }
            crate::log::AppendOutcome::Backpressured => {}
        }
        Ok(())
    }

    /// Poll bound is `min(notified_commit_position, local_append_position)`
    /// (spec §4.1); decoding the replayed frames themselves is out of
    /// scope here (spec.md §1 Non-goal: wire codec layout), but every
    /// replayed frame is still dispatched into follower-side state and
    /// resets the leader-heartbeat clock.
    fn consensus_work_follower(&mut self) -> Result<(), AgentError> {
        self.poll_ingress();
        if self.log_adapter.is_closed() {
            return Err(AgentError::TransportClosed);
        }
        let poll_bound = self.notified_commit_position.min(self.local_append_position);
        let limit = poll_bound.as_i64().max(0) as usize;
        if limit > 0 {
            let mut handler = FollowerLogHandler {
                membership: &mut self.membership,
                sessions: &mut self.sessions,
                uncommitted: &mut self.uncommitted,
                local_append_position: &mut self.local_append_position,
                last_leader_contact_ns: &mut self.last_leader_contact_ns,
                now: self.now,
            };
            self.log_adapter.poll(limit, &mut handler);
        }
        self.pending_messages.sweep_observed(self.log_service_session_id);
        Ok(())
    }

    /// Drives the snapshot sequence (spec §4.8): wait for every registered
    /// service to ack the frozen position, take and encode the image,
    /// start+truncate an archive recording for it, append the recording
    /// index entry, then return to `ACTIVE` (or forward to `TERMINATING` if
    /// a termination position arrived while the snapshot was in flight).
    fn advance_snapshot(&mut self) -> Result<(), AgentError> {
        let expected_position = self.local_append_position;
        let termination_position = self.termination_position;
        let in_flight = *self
            .snapshot_in_flight
            .get_or_insert_with(|| SnapshotInFlight { expected_position, termination_position });
        let service_ids = self.config.service_ids.clone();
        let barrier = self.snapshot_ack_barrier.get_or_insert_with(|| ServiceAckBarrier::new(in_flight.expected_position, service_ids));
        if !barrier.is_satisfied() {
            return Ok(());
        }

        let recording_id = self.archive.start_recording("snapshot", 0)?;
        let sessions: Vec<_> = self.sessions.sessions().values().cloned().collect();
        let begin = SnapshotBeginMarker {
            type_id: SNAPSHOT_TYPE_ID,
            log_position: in_flight.expected_position,
            leadership_term_id: self.leadership_term_id,
            time_unit: ClusterTimeUnit::Nanos,
            app_version: self.config.app_version,
        };
        let module_state = ConsensusModuleState {
            next_session_id: self.sessions.next_session_id(),
            next_service_session_id: self.pending_messages.next_service_session_id(),
            log_service_session_id: self.log_service_session_id,
            pending_message_capacity: self.pending_messages.capacity(),
        };
        let image = SnapshotTaker::take(
            begin,
            module_state,
            String::new(),
            &sessions,
            &self.timers.snapshot_entries(),
            &self.pending_messages.snapshot_entries(),
        );
        let encoded = SnapshotTaker::encode(&image);

        self.archive.stop_recording(recording_id)?;
        self.archive.persist_snapshot(recording_id, encoded)?;
        self.recording_log
            .append_snapshot(crate::recording_log::SnapshotEntry {
                leadership_term_id: self.leadership_term_id,
                log_position: in_flight.expected_position,
                timestamp: self.now.as_i64(),
                service_id: MODULE_SERVICE_ID,
                recording_id,
            })
            .map_err(|_| AgentError::ArchiveOperation { message: "failed to persist snapshot recording index entry".to_string() })?;

        self.snapshot_in_flight = None;
        self.snapshot_ack_barrier = None;
        let target = if in_flight.termination_position.is_some() { ModuleState::Terminating } else { ModuleState::Active };
        self.transition_module_state(target);
        Ok(())
    }

    /// Appends a fired timer, bumping `local_append_position` and pushing
    /// the resulting (position, correlation) pair onto the uncommitted
    /// ledger (spec §4.6). Session closes go through [`Self::close_session`].
    fn append_timer(&mut self, correlation_id: CorrelationId) -> Result<(), AgentError> {
        match self.log_publisher.append(&LogEntryPayload::Timer { correlation_id })? {
            crate::log::AppendOutcome::Appended(position) => {
                self.local_append_position = self.local_append_position.max(position);
                self.uncommitted.push_timer(position, correlation_id);
                Ok(())
            }
            crate::log::AppendOutcome::Backpressured => {
                // Retry next tick: put the timer back so it fires again.
                self.timers.schedule(correlation_id, self.now);
                Ok(())
            }
        }
    }

    /// Closes an OPEN session: appends `SessionClose`, then pushes it onto
    /// the uncommitted ledger (spec §4.2, §4.6).
    fn close_session(&mut self, session_id: SessionId, reason: CloseReason) -> Result<(), AgentError> {
        match self.log_publisher.append(&LogEntryPayload::SessionClose { session_id, reason })? {
            crate::log::AppendOutcome::Appended(position) => {
                if let Some(session) = self.sessions.begin_close(session_id, reason, position) {
                    self.local_append_position = self.local_append_position.max(position);
                    self.uncommitted.push_closed_session(position, session);
                }
                Ok(())
            }
            crate::log::AppendOutcome::Backpressured => Ok(()),
        }
    }

    /// Commit advancement (spec §4.6 `update_member_position`). Syncs the
    /// leader's own reported position first: `quorum_position` sorts every
    /// active member's `log_position`, but the leader never routes its own
    /// appends through `on_append_position` the way other members' reports
    /// arrive, so its entry would otherwise sit frozen at `ZERO` forever.
    fn update_member_position(&mut self) {
        if !self.role.is_leader() {
            return;
        }
        if let Some(member) = self.membership.member_by_id_mut(self.config.member_id) {
            member.log_position = self.local_append_position;
            member.time_of_last_append_position_ns = self.now.as_i64();
        }
        let new_commit = self.membership.quorum_position().min(self.local_append_position);
        if new_commit <= self.commit_position {
            return;
        }
        let removed = self.pending_messages.sweep_committed(new_commit);
        self.uncommitted.release_service_messages(removed as u64);
        let (_timers, _sessions) = self.uncommitted.pop_committed(new_commit);
        self.commit_position = new_commit;
        self.counters.commit_position.set(new_commit.as_i64());
        for member_id in self.membership.effect_pending_removals(new_commit) {
            tracing::info!(%member_id, "effected pending member removal at commit position");
        }
    }

    /// Polls the ingress adapter (spec §4.1: leader "poll ingress adapter";
    /// follower "poll ingress (only to reject/redirect)"). Decoding the
    /// wire frame itself is out of scope (spec.md §1 Non-goal: wire codec
    /// layout), so this only drains fragments and keeps the subscription
    /// moving; a follower's actual reject/redirect dispatch happens
    /// through `IngressSink::on_session_connect`, called directly by
    /// whoever decodes the frame on the caller side.
    fn poll_ingress(&mut self) {
        if self.ingress.is_closed() {
            return;
        }
        self.ingress.poll(self.config.service_message_limit, &mut |_frame| FragmentAction::Continue);
    }

    /// `prepareForNewLeadership` (spec §4.1): LEADER -> FOLLOWER.
    pub fn prepare_for_new_leadership(&mut self) -> Result<(), AgentError> {
        if !self.recording_id.is_null() {
            self.archive.stop_recording(self.recording_id)?;
            let stop_position = loop {
                if let Some(position) = self.archive.recording_stop_position(self.recording_id) {
                    break position;
                }
            };
            if stop_position > self.local_append_position {
                self.archive.truncate_recording(self.recording_id, self.local_append_position)?;
            }
        }

        self.notified_commit_position = self.local_append_position;
        self.commit_position = self.local_append_position;
        self.counters.commit_position.set(self.commit_position.as_i64());

        let restored = self.uncommitted.restore_uncommitted_entries(self.local_append_position);
        for correlation_id in restored.timers {
            self.timers.schedule(correlation_id, self.now);
        }
        for session in restored.sessions {
            self.sessions.readmit(session);
        }
        self.pending_messages.restore_uncommitted_entries();

        for session_id in self.sessions.clear_sessions_opened_after(self.local_append_position) {
            tracing::debug!(%session_id, "dropped session opened after the last safe log position");
        }

        self.set_role(Role::Follower);
        Ok(())
    }

    /// `election_complete` (spec §4.9): on LEADER, append a
    /// `NewLeadershipTermEvent` (retrying on backpressure by leaving the
    /// election outcome unresolved); rebuild the recovery plan so a
    /// newly-elected leader's committed/local positions never lag the
    /// durable index; reset leader-heartbeat timing either way.
    fn election_complete(&mut self, leader_member_id: MemberId, leadership_term_id: LeadershipTermId) -> Result<(), AgentError> {
        self.leadership_term_id = leadership_term_id;
        for member in &mut self.membership.cluster_members {
            member.is_leader = member.id == leader_member_id;
        }

        if leader_member_id == self.config.member_id {
            match self.log_publisher.append(&LogEntryPayload::NewLeadershipTermEvent {
                leadership_term_id,
                leader_member_id,
            })? {
                crate::log::AppendOutcome::Appended(position) => {
                    self.local_append_position = self.local_append_position.max(position);
                    self.set_role(Role::Leader);
                }
                crate::log::AppendOutcome::Backpressured => {
                    return Err(AgentError::UnexpectedRoleMessage { term_id: leadership_term_id.as_i64() });
                }
            }
        } else {
            self.set_role(Role::Follower);
        }

        let plan = self.recording_log.recovery_plan();
        if let Some(module_snapshot) = plan.snapshots.iter().find(|s| s.service_id == MODULE_SERVICE_ID) {
            self.commit_position = self.commit_position.max(module_snapshot.log_position);
            self.local_append_position = self.local_append_position.max(module_snapshot.log_position);
        }

        self.last_slow_tick = self.now;
        self.last_leader_contact_ns = self.now.as_i64();
        self.control_toggle = ControlToggle::Neutral;
        Ok(())
    }

    /// Spec §7: recoverable errors go through the counted handler and enter
    /// an election; fatal errors close the module and run the termination
    /// hook.
    fn handle_error(&mut self, error: AgentError) -> Result<(), AgentError> {
        match self.error_handler.handle(&error) {
            Disposition::Recoverable => {
                if self.role.is_leader() {
                    self.prepare_for_new_leadership()?;
                }
                self.set_role(Role::Candidate);
                Ok(())
            }
            Disposition::Fatal => {
                self.transition_module_state(ModuleState::Closed);
                self.termination_hook.on_terminate(false);
                Err(error)
            }
        }
    }

    /// Graceful shutdown: writes the final commit position to the
    /// recording log, then runs the termination hook exactly once (spec §6
    /// "Exit/termination").
    pub fn terminate_gracefully(&mut self) -> Result<(), AgentError> {
        self.recording_log
            .append_term(crate::recording_log::TermEntry {
                leadership_term_id: self.leadership_term_id,
                term_base_log_position: LogPosition::ZERO,
                log_position: self.commit_position,
                timestamp: self.now.as_i64(),
            })
            .map_err(|_| AgentError::ArchiveOperation { message: "failed to persist final commit position".to_string() })?;
        self.transition_module_state(ModuleState::Closed);
        self.termination_hook.on_terminate(true);
        Ok(())
    }
}

/// Dispatches replayed log entries into follower-side state (spec §4.1
/// consensus work, follower). Holds disjoint field borrows of `Agent` so
/// it can run while `log_adapter` is itself mutably borrowed for the poll.
struct FollowerLogHandler<'a> {
    membership: &'a mut MembershipSet,
    sessions: &'a mut SessionRegistry,
    uncommitted: &'a mut UncommittedLedger,
    local_append_position: &'a mut LogPosition,
    last_leader_contact_ns: &'a mut i64,
    now: ClusterTime,
}

impl LogEntryHandler for FollowerLogHandler<'_> {
    fn on_entry(&mut self, position: LogPosition, entry: &LogEntryPayload) -> FragmentAction {
        *self.local_append_position = (*self.local_append_position).max(position);
        *self.last_leader_contact_ns = self.now.as_i64();
        match entry {
            LogEntryPayload::SessionClose { session_id, reason } => {
                if let Some(session) = self.sessions.begin_close(*session_id, *reason, position) {
                    self.uncommitted.push_closed_session(position, session);
                }
            }
            LogEntryPayload::MembershipChangeEvent { encoded_members } => {
                apply_membership_change(self.membership, encoded_members);
            }
            LogEntryPayload::Timer { .. }
            | LogEntryPayload::NewLeadershipTermEvent { .. }
            | LogEntryPayload::SessionOpen { .. }
            | LogEntryPayload::SessionMessage { .. }
            | LogEntryPayload::ClusterAction(_)
            | LogEntryPayload::ServiceSessionMessage { .. } => {}
        }
        FragmentAction::Continue
    }
}

/// Replays a `JOIN:{id}`/`QUIT:{id}` membership-change entry into a
/// follower's own membership view (spec §4.7: membership changes "take
/// effect on both leader and followers at replay time").
fn apply_membership_change(membership: &mut MembershipSet, encoded: &str) {
    if let Some(id) = encoded.strip_prefix("JOIN:").and_then(|rest| rest.trim().parse::<i32>().ok()) {
        membership.promote_to_active(MemberId::new(id));
    } else if let Some(id) = encoded.strip_prefix("QUIT:").and_then(|rest| rest.trim().parse::<i32>().ok()) {
        membership.remove_active(MemberId::new(id));
    }
}

impl<P: Publication, S: Subscription, I: Subscription> IngressSink for Agent<P, S, I> {
    /// Spec §4.2 `on_session_connect`: rejects/redirects are queued by
    /// `SessionRegistry`; an accepted leader-side session still has to clear
    /// the authenticator before it can be opened with a log append.
    fn on_session_connect(
        &mut self,
        correlation_id: CorrelationId,
        response_stream_id: i32,
        version: u32,
        response_channel: String,
        credentials: Vec<u8>,
    ) {
        if !self.role.is_leader() {
            self.sessions.on_session_connect_as_follower(correlation_id, response_channel);
            return;
        }
        let Ok(session_id) =
            self.sessions
                .on_session_connect_as_leader(correlation_id, response_stream_id, response_channel, version, self.now)
        else {
            self.counters.invalid_request_counter.increment();
            return;
        };
        self.sessions.on_challenge_issued(session_id).ok();
        match self.authenticator.on_connect(self.config.member_id, &credentials) {
            Ok(true) => self.sessions.on_challenge_response(session_id, true),
            _ => self.sessions.on_challenge_response(session_id, false),
        }
    }

    fn on_session_close(&mut self, session_id: SessionId) {
        self.close_session(session_id, CloseReason::ClientAction).ok();
    }

    fn on_ingress_message(&mut self, service_session_id: SessionId, body: Vec<u8>) {
        self.pending_messages
            .on_service_message(body)
            .map(|_| ())
            .unwrap_or_else(|err| tracing::warn!(%err, session = %service_session_id, "dropped ingress message"));
    }

    fn on_session_keep_alive(&mut self, session_id: SessionId) {
        self.sessions.on_session_keep_alive(session_id, self.now);
    }

    fn on_challenge_response(&mut self, session_id: SessionId, credentials: Vec<u8>) {
        let authenticated = self.authenticator.on_challenge_response(&credentials).unwrap_or(false);
        self.sessions.on_challenge_response(session_id, authenticated);
    }

    fn on_admin_request(&mut self, request: AdminRequest) {
        match request {
            AdminRequest::ClusterMembersQuery { correlation_id } => {
                tracing::debug!(%correlation_id, "cluster members query");
            }
            AdminRequest::BackupQuery { correlation_id } => {
                tracing::debug!(%correlation_id, "backup query");
            }
        }
    }
}

impl<P: Publication, S: Subscription, I: Subscription> MemberStatusSink for Agent<P, S, I> {
    fn on_canvass_position(&mut self, log_position: LogPosition, leadership_term_id: LeadershipTermId, member_id: MemberId) {
        self.election.route_canvass_position(log_position, leadership_term_id, member_id);
    }

    fn on_request_vote(&mut self, log_position: LogPosition, candidate_term_id: LeadershipTermId, candidate_member_id: MemberId) {
        self.election.route_request_vote(log_position, candidate_term_id, candidate_member_id);
    }

    fn on_vote(&mut self, candidate_term_id: LeadershipTermId, voter_member_id: MemberId, vote_for_id: MemberId, vote_granted: bool) {
        self.election.route_vote(candidate_term_id, voter_member_id, vote_for_id, vote_granted);
    }

    fn on_new_leadership_term(&mut self, leadership_term_id: LeadershipTermId, leader_member_id: MemberId, log_position: LogPosition) {
        self.election.route_new_leadership_term(leadership_term_id, leader_member_id, log_position);
    }

    /// Also updates the reporting member's liveness bookkeeping so
    /// `has_lost_quorum` sees it (spec §4.1, §4.7).
    fn on_append_position(&mut self, leadership_term_id: LeadershipTermId, log_position: LogPosition, member_id: MemberId) {
        if let Some(member) = self.membership.member_by_id_mut(member_id) {
            member.log_position = member.log_position.max(log_position);
            member.time_of_last_append_position_ns = self.now.as_i64();
        }
        self.election.route_append_position(leadership_term_id, log_position, member_id);
    }

    fn on_commit_position(&mut self, leadership_term_id: LeadershipTermId, log_position: LogPosition) {
        if !self.role.is_leader() {
            self.notified_commit_position = self.notified_commit_position.max(log_position);
            self.last_leader_contact_ns = self.now.as_i64();
        }
        self.election.route_commit_position(leadership_term_id, log_position);
    }

    fn on_catchup_position(&mut self, leadership_term_id: LeadershipTermId, log_position: LogPosition, member_id: MemberId, _catchup_endpoint: String) {
        self.election.route_catchup_position(leadership_term_id, log_position, member_id);
    }

    fn on_stop_catchup(&mut self, leadership_term_id: LeadershipTermId, member_id: MemberId) {
        self.election.route_stop_catchup(leadership_term_id, member_id);
    }

    /// Comma-separated `"member_id,member_id,..."` with the reporting
    /// leader first — the format `DynamicJoin`'s cluster-members query
    /// expects an answer to (spec §4.9 "query peers").
    fn on_cluster_member_change(&mut self, encoded_members: String) {
        tracing::info!(%encoded_members, "cluster member change replayed");
        if let Some(join) = self.dynamic_join.as_mut() {
            if join.state() == DynamicJoinState::Init {
                if let Some(leader_id) = encoded_members.split(',').next().and_then(|s| s.trim().parse::<i32>().ok()) {
                    join.on_cluster_members_response(MemberId::new(leader_id));
                }
            }
        }
    }

    fn on_snapshot_recording_query(&mut self, correlation_id: CorrelationId, requesting_member_id: MemberId) {
        tracing::debug!(%correlation_id, %requesting_member_id, "snapshot recording query");
    }

    /// Drives the remaining `DynamicJoin` transitions straight through
    /// (spec §4.9): retrieve, load into agent state, record locally, then
    /// hand off to a normal election once `JoinCluster` resolves.
    fn on_snapshot_recording_response(&mut self, correlation_id: CorrelationId, recording_id: RecordingId, leadership_term_id: LeadershipTermId) {
        let matches_join = self.dynamic_join.as_ref().is_some_and(|j| j.correlation_id() == correlation_id);
        if !matches_join {
            return;
        }
        if let Some(join) = self.dynamic_join.as_mut() {
            join.on_snapshot_recording_response(recording_id);
            join.on_snapshot_retrieved();
        }

        match self.archive.retrieve_snapshot(recording_id) {
            Ok(bytes) => match SnapshotLoader::decode(&bytes) {
                Ok(loaded) => {
                    self.apply_loaded_snapshot(loaded);
                    if let Err(err) = self.recording_log.append_snapshot(SnapshotEntry {
                        leadership_term_id,
                        log_position: self.local_append_position,
                        timestamp: self.now.as_i64(),
                        service_id: MODULE_SERVICE_ID,
                        recording_id,
                    }) {
                        tracing::warn!(%err, "failed to append snapshot recording index entry during join");
                    }
                    if let Some(join) = self.dynamic_join.as_mut() {
                        join.on_snapshot_loaded();
                        join.complete();
                    }
                }
                Err(err) => tracing::warn!(%err, "failed to decode snapshot retrieved during dynamic join"),
            },
            Err(err) => tracing::warn!(%err, %recording_id, "failed to retrieve snapshot during dynamic join"),
        }
    }

    fn on_termination_position(&mut self, log_position: LogPosition) {
        self.termination_position = Some(log_position);
    }

    fn on_termination_ack(&mut self, member_id: MemberId, log_position: LogPosition) {
        tracing::debug!(%member_id, %log_position, "termination ack");
    }

    /// Backup-session leader path (spec §4.2: "same handshake, but the
    /// final act is a `backup_response` ... then close"): runs the same
    /// CONNECTED -> CHALLENGED -> AUTHENTICATED handshake a normal session
    /// connect does, then reports the module's latest recording id instead
    /// of opening a session.
    fn on_backup_query(&mut self, correlation_id: CorrelationId, response_channel: String, version: u32, credentials: Vec<u8>) {
        let _ = version;
        self.sessions.on_backup_connect(correlation_id, response_channel);
        self.sessions.on_backup_challenge_issued(correlation_id);
        let authenticated = matches!(self.authenticator.on_connect(self.config.member_id, &credentials), Ok(true));
        let recording_id = self
            .recording_log
            .recovery_plan()
            .snapshots
            .iter()
            .find(|s| s.service_id == MODULE_SERVICE_ID)
            .map(|s| s.recording_id)
            .unwrap_or(RecordingId::new(0));
        self.sessions.complete_backup_query(correlation_id, authenticated, recording_id);
        for response in self.sessions.drain_backup_responses() {
            tracing::debug!(
                correlation = %response.correlation_id,
                channel = %response.response_channel,
                recording_id = %response.recording_id,
                "backup query resolved"
            );
        }
    }

    /// The querying side of the same exchange, received as a symmetric
    /// member-status message once a peer's `on_backup_query` resolves.
    fn on_backup_response(&mut self, correlation_id: CorrelationId, recording_id: RecordingId) {
        tracing::debug!(%correlation_id, %recording_id, "backup response received from peer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::FragmentAction;

    struct InMemoryPublication {
        position: i64,
        connected: bool,
    }

    impl Publication for InMemoryPublication {
        fn offer(&mut self, payload: &[u8]) -> Result<Option<LogPosition>, AgentError> {
            self.position += payload.len().max(1) as i64;
            Ok(Some(LogPosition::new(self.position)))
        }
        fn position(&self) -> LogPosition {
            LogPosition::new(self.position)
        }
        fn is_connected(&self) -> bool {
            self.connected
        }
    }

    struct NeverClosedSubscription;

    impl Subscription for NeverClosedSubscription {
        fn poll(&mut self, _fragment_limit: usize, _on_fragment: &mut dyn FnMut(&[u8]) -> FragmentAction) -> usize {
            0
        }
        fn is_closed(&self) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct NoopArchive {
        snapshots: std::collections::HashMap<i64, Vec<u8>>,
    }

    impl ArchiveClient for NoopArchive {
        fn start_recording(&mut self, _channel: &str, _stream_id: i32) -> Result<RecordingId, AgentError> {
            Ok(RecordingId::new(1))
        }
        fn stop_recording(&mut self, _recording_id: RecordingId) -> Result<(), AgentError> {
            Ok(())
        }
        fn recording_stop_position(&self, _recording_id: RecordingId) -> Option<LogPosition> {
            Some(LogPosition::ZERO)
        }
        fn truncate_recording(&mut self, _recording_id: RecordingId, _position: LogPosition) -> Result<(), AgentError> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
        fn persist_snapshot(&mut self, recording_id: RecordingId, bytes: Vec<u8>) -> Result<(), AgentError> {
            self.snapshots.insert(recording_id.as_i64(), bytes);
            Ok(())
        }
        fn retrieve_snapshot(&mut self, recording_id: RecordingId) -> Result<Vec<u8>, AgentError> {
            self.snapshots
                .get(&recording_id.as_i64())
                .cloned()
                .ok_or_else(|| AgentError::ArchiveOperation { message: format!("no snapshot persisted for {recording_id}") })
        }
    }

    struct AlwaysAuthenticate;

    impl Authenticator for AlwaysAuthenticate {
        fn on_connect(&mut self, _member_id: MemberId, _credentials: &[u8]) -> Result<bool, AgentError> {
            Ok(true)
        }
        fn on_challenge_response(&mut self, _credentials: &[u8]) -> Result<bool, AgentError> {
            Ok(true)
        }
    }

    #[derive(Default)]
    struct RecordingTerminationHook {
        terminated: Option<bool>,
    }

    impl TerminationHook for RecordingTerminationHook {
        fn on_terminate(&mut self, graceful: bool) {
            self.terminated = Some(graceful);
        }
    }

    fn new_test_agent(dir: &std::path::Path) -> Agent<InMemoryPublication, NeverClosedSubscription, NeverClosedSubscription> {
        let config = AgentConfig::new(MemberId::new(0), Vec::new());
        let counters = AgentCounters::shared();
        let log_publisher = LogPublisher::new(InMemoryPublication { position: 0, connected: true });
        let log_adapter = LogAdapter::new(NeverClosedSubscription);
        let ingress = IngressAdapter::new(NeverClosedSubscription);
        let recording_log = RecordingLog::open(&dir.join("recording.log"), 0).unwrap();
        Agent::new(
            config,
            counters,
            log_publisher,
            log_adapter,
            ingress,
            recording_log,
            Box::new(NoopArchive::default()),
            Box::new(AlwaysAuthenticate),
            Box::new(RecordingTerminationHook::default()),
            ClusterTime::ZERO,
        )
    }

    #[test]
    fn recovery_moves_init_to_active() {
        let dir = tempfile::tempdir().unwrap();
        let mut agent = new_test_agent(dir.path());
        agent.complete_recovery();
        assert_eq!(agent.module_state(), ModuleState::Active);
    }

    #[test]
    fn do_work_is_a_no_op_once_closed() {
        let dir = tempfile::tempdir().unwrap();
        let mut agent = new_test_agent(dir.path());
        agent.complete_recovery();
        agent.terminate_gracefully().unwrap();
        assert_eq!(agent.module_state(), ModuleState::Closed);
        assert!(agent.do_work(ClusterTime::new(1)).is_ok());
    }

    #[test]
    fn leader_drains_pending_service_messages_on_tick() {
        let dir = tempfile::tempdir().unwrap();
        let mut agent = new_test_agent(dir.path());
        agent.complete_recovery();
        agent.membership_mut().cluster_members.push(crate::membership::ClusterMember::new(
            MemberId::new(0),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
        ));
        agent.enter_election(Box::new(StubLeaderElection {
            leader: MemberId::new(0),
            term: LeadershipTermId::new(1),
            done: true,
        }));
        agent.pending_messages.on_service_message(vec![1, 2, 3]).unwrap();
        agent.do_work(ClusterTime::new(20_000_000)).unwrap();
        assert_eq!(agent.role(), Role::Leader);
        agent.do_work(ClusterTime::new(40_000_000)).unwrap();
        assert_eq!(agent.role(), Role::Leader, "a single-member quorum should never be lost");
        assert!(
            agent.pending_messages.head().is_none(),
            "the head entry should have been appended and the head offset advanced"
        );
    }

    #[test]
    fn snapshot_toggle_returns_to_active_with_no_registered_services() {
        let dir = tempfile::tempdir().unwrap();
        let mut agent = new_test_agent(dir.path());
        agent.complete_recovery();
        agent.membership_mut().cluster_members.push(crate::membership::ClusterMember::new(
            MemberId::new(0),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
        ));
        agent.enter_election(Box::new(StubLeaderElection {
            leader: MemberId::new(0),
            term: LeadershipTermId::new(1),
            done: true,
        }));
        agent.do_work(ClusterTime::new(20_000_000)).unwrap();
        assert_eq!(agent.role(), Role::Leader);

        agent.set_control_toggle(ControlToggle::Snapshot);
        agent.do_work(ClusterTime::new(40_000_000)).unwrap();
        assert_eq!(
            agent.module_state(),
            ModuleState::Active,
            "no registered services means the ack barrier is trivially satisfied, completing in the same tick"
        );
        assert_eq!(agent.recording_log.entries().len(), 1);
    }

    #[test]
    fn leader_opens_an_authenticated_session_and_publishes_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut agent = new_test_agent(dir.path());
        agent.complete_recovery();
        agent.membership_mut().cluster_members.push(crate::membership::ClusterMember::new(
            MemberId::new(0),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
        ));
        agent.enter_election(Box::new(StubLeaderElection {
            leader: MemberId::new(0),
            term: LeadershipTermId::new(1),
            done: true,
        }));
        agent.do_work(ClusterTime::new(20_000_000)).unwrap();
        assert_eq!(agent.role(), Role::Leader);

        IngressSink::on_session_connect(&mut agent, CorrelationId::new(1), 7, 1, "chan".to_string(), Vec::new());
        assert_eq!(agent.sessions().pending().len(), 1);

        agent.do_work(ClusterTime::new(40_000_000)).unwrap();

        assert!(agent.sessions().pending().is_empty());
        assert_eq!(agent.sessions().sessions().len(), 1);
        let (_, session) = agent.sessions().sessions().iter().next().unwrap();
        assert_eq!(session.state, crate::session::SessionState::Open);
    }

    #[test]
    fn leader_promotes_a_joining_passive_member_to_active() {
        let dir = tempfile::tempdir().unwrap();
        let mut agent = new_test_agent(dir.path());
        agent.complete_recovery();
        agent.membership_mut().cluster_members.push(crate::membership::ClusterMember::new(
            MemberId::new(0),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
        ));
        let mut joiner = crate::membership::ClusterMember::new(MemberId::new(1), String::new(), String::new(), String::new(), String::new());
        joiner.has_requested_join = true;
        agent.membership_mut().add_passive(joiner);
        agent.enter_election(Box::new(StubLeaderElection {
            leader: MemberId::new(0),
            term: LeadershipTermId::new(1),
            done: true,
        }));
        agent.do_work(ClusterTime::new(20_000_000)).unwrap();
        assert_eq!(agent.role(), Role::Leader);

        agent.do_work(ClusterTime::new(40_000_000)).unwrap();

        assert!(agent.membership().member_by_id(MemberId::new(1)).is_some());
        assert_eq!(agent.membership().cluster_members.len(), 2);
        assert!(agent.membership().passive_members.is_empty());
    }

    struct StubLeaderElection {
        leader: MemberId,
        term: LeadershipTermId,
        done: bool,
    }

    impl Election for StubLeaderElection {
        fn on_canvass_position(&mut self, _: LogPosition, _: LeadershipTermId, _: MemberId) {}
        fn on_request_vote(&mut self, _: LogPosition, _: LeadershipTermId, _: MemberId) {}
        fn on_vote(&mut self, _: LeadershipTermId, _: MemberId, _: MemberId, _: bool) {}
        fn on_new_leadership_term(&mut self, _: LeadershipTermId, _: MemberId, _: LogPosition) {}
        fn on_append_position(&mut self, _: LeadershipTermId, _: LogPosition, _: MemberId) {}
        fn on_commit_position(&mut self, _: LeadershipTermId, _: LogPosition) {}
        fn on_catchup_position(&mut self, _: LeadershipTermId, _: LogPosition, _: MemberId) {}
        fn on_stop_catchup(&mut self, _: LeadershipTermId, _: MemberId) {}
        fn is_complete(&self) -> bool {
            self.done
        }
        fn leader_member_id(&self) -> Option<MemberId> {
            Some(self.leader)
        }
        fn leadership_term_id(&self) -> LeadershipTermId {
            self.term
        }
    }
}
