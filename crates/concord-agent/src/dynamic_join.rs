//! `DynamicJoin` (spec §4.9): bootstraps a node that starts with empty
//! membership into an existing cluster, then hands off to a normal
//! (non-initial) election.

use concord_types::{CorrelationId, MemberId, RecordingId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicJoinState {
    Init,
    PassiveFollower,
    SnapshotRetrieve,
    SnapshotLoad,
    JoinCluster,
    Done,
}

/// Drives one node's join sequence: query peers → passive-follow → retrieve
/// latest snapshot → load it → append term+snapshot to the local recording
/// log → join as a normal election participant (spec §4.9).
#[derive(Debug)]
pub struct DynamicJoin {
    state: DynamicJoinState,
    correlation_id: CorrelationId,
    leader_member_id: Option<MemberId>,
    snapshot_recording_id: Option<RecordingId>,
}

impl DynamicJoin {
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            state: DynamicJoinState::Init,
            correlation_id,
            leader_member_id: None,
            snapshot_recording_id: None,
        }
    }

    pub fn state(&self) -> DynamicJoinState {
        self.state
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// A peer answered the cluster-members query; becomes a passive
    /// follower of the reported leader.
    pub fn on_cluster_members_response(&mut self, leader_member_id: MemberId) {
        if self.state == DynamicJoinState::Init {
            self.leader_member_id = Some(leader_member_id);
            self.state = DynamicJoinState::PassiveFollower;
        }
    }

    pub fn on_snapshot_recording_response(&mut self, recording_id: RecordingId) {
        if self.state == DynamicJoinState::PassiveFollower {
            self.snapshot_recording_id = Some(recording_id);
            self.state = DynamicJoinState::SnapshotRetrieve;
        }
    }

    /// The snapshot recording has been fully replayed locally.
    pub fn on_snapshot_retrieved(&mut self) {
        if self.state == DynamicJoinState::SnapshotRetrieve {
            self.state = DynamicJoinState::SnapshotLoad;
        }
    }

    /// The retrieved snapshot has been loaded into agent state, and its
    /// term+snapshot records appended to the local recording log.
    pub fn on_snapshot_loaded(&mut self) {
        if self.state == DynamicJoinState::SnapshotLoad {
            self.state = DynamicJoinState::JoinCluster;
        }
    }

    /// Completes the join; the caller now hands control to a fresh,
    /// non-initial [`crate::election::ElectionAdapter`] (spec §4.9).
    /// Returns whether the join was actually in a state to complete.
    pub fn complete(&mut self) -> bool {
        if self.state == DynamicJoinState::JoinCluster {
            self.state = DynamicJoinState::Done;
            true
        } else {
            false
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == DynamicJoinState::Done
    }

    pub fn leader_member_id(&self) -> Option<MemberId> {
        self.leader_member_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_sequence_reaches_done_in_order() {
        let mut join = DynamicJoin::new(CorrelationId::new(1));
        assert_eq!(join.state(), DynamicJoinState::Init);

        join.on_cluster_members_response(MemberId::new(0));
        assert_eq!(join.state(), DynamicJoinState::PassiveFollower);

        join.on_snapshot_recording_response(RecordingId::new(7));
        assert_eq!(join.state(), DynamicJoinState::SnapshotRetrieve);

        join.on_snapshot_retrieved();
        assert_eq!(join.state(), DynamicJoinState::SnapshotLoad);

        join.on_snapshot_loaded();
        assert_eq!(join.state(), DynamicJoinState::JoinCluster);

        assert!(join.complete());
        assert!(join.is_done());
    }

    #[test]
    fn out_of_order_events_are_ignored() {
        let mut join = DynamicJoin::new(CorrelationId::new(1));
        join.on_snapshot_retrieved();
        assert_eq!(join.state(), DynamicJoinState::Init, "retrieved event before passive-follower is a no-op");
        assert!(!join.complete());
    }
}
