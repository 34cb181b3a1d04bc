//! Member-status sink (spec §6 "Member-status (symmetric between
//! members)"): one named operation per message exchanged between cluster
//! members. The election-shaped subset (canvass/vote/term/append/commit/
//! catchup/stop-catchup) is routed onward to [`crate::election::Election`];
//! the rest (membership change, snapshot recording query, termination,
//! backup) is handled directly by the agent.

use concord_types::{CorrelationId, LeadershipTermId, LogPosition, MemberId, RecordingId};

pub trait MemberStatusSink {
    fn on_canvass_position(&mut self, log_position: LogPosition, leadership_term_id: LeadershipTermId, member_id: MemberId);

    fn on_request_vote(&mut self, log_position: LogPosition, candidate_term_id: LeadershipTermId, candidate_member_id: MemberId);

    fn on_vote(&mut self, candidate_term_id: LeadershipTermId, voter_member_id: MemberId, vote_for_id: MemberId, vote_granted: bool);

    fn on_new_leadership_term(&mut self, leadership_term_id: LeadershipTermId, leader_member_id: MemberId, log_position: LogPosition);

    fn on_append_position(&mut self, leadership_term_id: LeadershipTermId, log_position: LogPosition, member_id: MemberId);

    fn on_commit_position(&mut self, leadership_term_id: LeadershipTermId, log_position: LogPosition);

    fn on_catchup_position(&mut self, leadership_term_id: LeadershipTermId, log_position: LogPosition, member_id: MemberId, catchup_endpoint: String);

    fn on_stop_catchup(&mut self, leadership_term_id: LeadershipTermId, member_id: MemberId);

    fn on_cluster_member_change(&mut self, encoded_members: String);

    fn on_snapshot_recording_query(&mut self, correlation_id: CorrelationId, requesting_member_id: MemberId);

    fn on_snapshot_recording_response(&mut self, correlation_id: CorrelationId, recording_id: RecordingId, leadership_term_id: LeadershipTermId);

    fn on_termination_position(&mut self, log_position: LogPosition);

    fn on_termination_ack(&mut self, member_id: MemberId, log_position: LogPosition);

    fn on_backup_query(&mut self, correlation_id: CorrelationId, response_channel: String, version: u32, credentials: Vec<u8>);

    fn on_backup_response(&mut self, correlation_id: CorrelationId, recording_id: RecordingId);
}
