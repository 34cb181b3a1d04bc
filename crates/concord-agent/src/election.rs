//! Election adapter (spec §4.9, §1 Non-goal: "Implementing the Raft-style
//! voting protocol" — only the callback surface lives in this crate).
//!
//! Events are routed into whichever [`Election`] instance is active; when
//! none is active and an incoming event implies a newer term, the agent is
//! expected to call [`ElectionAdapter::enter_election`] itself before
//! routing (spec §4.9: "the agent synthesizes an election entry").

use concord_types::{LeadershipTermId, LogPosition, MemberId};

/// The election submodule's callback surface. A real vote-protocol
/// implementation lives outside this crate; tests and `concord-node` each
/// supply their own.
pub trait Election {
    fn on_canvass_position(&mut self, log_position: LogPosition, leadership_term_id: LeadershipTermId, member_id: MemberId);

    fn on_request_vote(&mut self, log_position: LogPosition, candidate_term_id: LeadershipTermId, candidate_member_id: MemberId);

    fn on_vote(&mut self, candidate_term_id: LeadershipTermId, voter_member_id: MemberId, vote_for_id: MemberId, vote_granted: bool);

    fn on_new_leadership_term(&mut self, leadership_term_id: LeadershipTermId, leader_member_id: MemberId, log_position: LogPosition);

    fn on_append_position(&mut self, leadership_term_id: LeadershipTermId, log_position: LogPosition, member_id: MemberId);

    fn on_commit_position(&mut self, leadership_term_id: LeadershipTermId, log_position: LogPosition);

    fn on_catchup_position(&mut self, leadership_term_id: LeadershipTermId, log_position: LogPosition, member_id: MemberId);

    fn on_stop_catchup(&mut self, leadership_term_id: LeadershipTermId, member_id: MemberId);

    /// Whether this instance has decided a winner.
    fn is_complete(&self) -> bool;

    fn leader_member_id(&self) -> Option<MemberId>;

    fn leadership_term_id(&self) -> LeadershipTermId;
}

/// Owns at most one active [`Election`] at a time (spec §9: "No cyclic
/// ownership ... the agent owns Election/DynamicJoin instances").
#[derive(Default)]
pub struct ElectionAdapter {
    active: Option<Box<dyn Election>>,
}

impl ElectionAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Synthesizes an election entry (spec §4.9: "the agent synthesizes an
    /// election entry (`enter_election`) and forwards the event").
    pub fn enter_election(&mut self, election: Box<dyn Election>) {
        self.active = Some(election);
    }

    pub fn route_canvass_position(&mut self, log_position: LogPosition, leadership_term_id: LeadershipTermId, member_id: MemberId) {
        if let Some(e) = self.active.as_mut() {
            e.on_canvass_position(log_position, leadership_term_id, member_id);
        }
    }

    pub fn route_request_vote(&mut self, log_position: LogPosition, candidate_term_id: LeadershipTermId, candidate_member_id: MemberId) {
        if let Some(e) = self.active.as_mut() {
            e.on_request_vote(log_position, candidate_term_id, candidate_member_id);
        }
    }

    pub fn route_vote(&mut self, candidate_term_id: LeadershipTermId, voter_member_id: MemberId, vote_for_id: MemberId, vote_granted: bool) {
        if let Some(e) = self.active.as_mut() {
            e.on_vote(candidate_term_id, voter_member_id, vote_for_id, vote_granted);
        }
    }

    pub fn route_new_leadership_term(&mut self, leadership_term_id: LeadershipTermId, leader_member_id: MemberId, log_position: LogPosition) {
        if let Some(e) = self.active.as_mut() {
            e.on_new_leadership_term(leadership_term_id, leader_member_id, log_position);
        }
    }

    pub fn route_append_position(&mut self, leadership_term_id: LeadershipTermId, log_position: LogPosition, member_id: MemberId) {
        if let Some(e) = self.active.as_mut() {
            e.on_append_position(leadership_term_id, log_position, member_id);
        }
    }

    pub fn route_commit_position(&mut self, leadership_term_id: LeadershipTermId, log_position: LogPosition) {
        if let Some(e) = self.active.as_mut() {
            e.on_commit_position(leadership_term_id, log_position);
        }
    }

    pub fn route_catchup_position(&mut self, leadership_term_id: LeadershipTermId, log_position: LogPosition, member_id: MemberId) {
        if let Some(e) = self.active.as_mut() {
            e.on_catchup_position(leadership_term_id, log_position, member_id);
        }
    }

    pub fn route_stop_catchup(&mut self, leadership_term_id: LeadershipTermId, member_id: MemberId) {
        if let Some(e) = self.active.as_mut() {
            e.on_stop_catchup(leadership_term_id, member_id);
        }
    }

    /// If the active election has decided, clears it and returns the
    /// winner so the caller can run `election_complete` (spec §4.9).
    pub fn poll_complete(&mut self) -> Option<(MemberId, LeadershipTermId)> {
        if self.active.as_deref().is_some_and(Election::is_complete) {
            let election = self.active.take().expect("checked Some above");
            let leader = election.leader_member_id()?;
            Some((leader, election.leadership_term_id()))
        } else {
            None
        }
    }
}
