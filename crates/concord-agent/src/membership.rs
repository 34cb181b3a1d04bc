//! `MembershipSet`: active + passive members and quorum math (spec §4.7).

use concord_types::{CorrelationId, LogPosition, MemberId, SessionId};

/// One member of the cluster, active or passive (spec §3 `ClusterMember`).
#[derive(Debug, Clone)]
pub struct ClusterMember {
    pub id: MemberId,
    pub client_endpoint: String,
    pub member_endpoint: String,
    pub transfer_endpoint: String,
    pub log_endpoint: String,
    pub log_position: LogPosition,
    pub time_of_last_append_position_ns: i64,
    pub catchup_replay_session_id: Option<SessionId>,
    pub catchup_replay_correlation_id: Option<CorrelationId>,
    pub removal_position: Option<LogPosition>,
    pub is_leader: bool,
    pub has_requested_join: bool,
    pub has_requested_remove: bool,
    pub has_terminated: bool,
}

impl ClusterMember {
    pub fn new(id: MemberId, client_endpoint: String, member_endpoint: String, transfer_endpoint: String, log_endpoint: String) -> Self {
        Self {
            id,
            client_endpoint,
            member_endpoint,
            transfer_endpoint,
            log_endpoint,
            log_position: LogPosition::ZERO,
            time_of_last_append_position_ns: 0,
            catchup_replay_session_id: None,
            catchup_replay_correlation_id: None,
            removal_position: None,
            is_leader: false,
            has_requested_join: false,
            has_requested_remove: false,
            has_terminated: false,
        }
    }
}

/// Quorum size for `n` active voting members: `floor(n/2) + 1` (spec §4.7).
pub const fn quorum_size(active_member_count: usize) -> usize {
    active_member_count / 2 + 1
}

/// Active + passive membership, with quorum math over the active set
/// (spec §4.7).
#[derive(Debug, Default)]
pub struct MembershipSet {
    pub cluster_members: Vec<ClusterMember>,
    pub passive_members: Vec<ClusterMember>,
}

impl MembershipSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quorum_size(&self) -> usize {
        quorum_size(self.cluster_members.len())
    }

    /// Returns the `(n - quorum + 1)`-th largest `log_position` across
    /// active members, ranked tie-break by position descending (spec §4.7
    /// `quorum_position`). This is the highest position that a full quorum
    /// (including `self`, if present in the list) has reached.
    pub fn quorum_position(&self) -> LogPosition {
        if self.cluster_members.is_empty() {
            return LogPosition::ZERO;
        }
        let mut positions: Vec<LogPosition> = self.cluster_members.iter().map(|m| m.log_position).collect();
        positions.sort_unstable_by(|a, b| b.cmp(a));
        let quorum = self.quorum_size();
        let index = quorum.saturating_sub(1).min(positions.len() - 1);
        positions[index]
    }

    pub fn member_by_id(&self, id: MemberId) -> Option<&ClusterMember> {
        self.cluster_members.iter().find(|m| m.id == id).or_else(|| self.passive_members.iter().find(|m| m.id == id))
    }

    pub fn member_by_id_mut(&mut self, id: MemberId) -> Option<&mut ClusterMember> {
        if let Some(pos) = self.cluster_members.iter().position(|m| m.id == id) {
            return self.cluster_members.get_mut(pos);
        }
        self.passive_members.iter_mut().find(|m| m.id == id)
    }

    /// Adds a new node as passive; it catches up via snapshot + replay and
    /// is only promoted by a `JOIN` membership-change log entry (spec
    /// §4.7).
    pub fn add_passive(&mut self, member: ClusterMember) {
        self.passive_members.push(member);
    }

    /// Promotes a passive member to active — called only at the log
    /// position where the `JOIN` `MembershipChangeEvent` is replayed (spec
    /// §4.7: membership changes "take effect on both leader and followers
    /// *at replay time*").
    pub fn promote_to_active(&mut self, id: MemberId) -> bool {
        if let Some(pos) = self.passive_members.iter().position(|m| m.id == id) {
            let member = self.passive_members.remove(pos);
            self.cluster_members.push(member);
            true
        } else {
            false
        }
    }

    /// Removes an active member — called at the log position where the
    /// `QUIT` `MembershipChangeEvent` is replayed.
    pub fn remove_active(&mut self, id: MemberId) -> bool {
        if let Some(pos) = self.cluster_members.iter().position(|m| m.id == id) {
            self.cluster_members.remove(pos);
            true
        } else {
            false
        }
    }

    /// Effects pending removals whose `removal_position <= new_commit`
    /// (spec §4.6 step 5).
    pub fn effect_pending_removals(&mut self, new_commit: LogPosition) -> Vec<MemberId> {
        let mut removed = Vec::new();
        self.cluster_members.retain(|m| {
            let due = m.removal_position.is_some_and(|p| p <= new_commit);
            if due {
                removed.push(m.id);
            }
            !due
        });
        removed
    }

    /// A leader has lost quorum if fewer than a quorum of active members
    /// have appended within `leader_heartbeat_timeout_ns` of `now_ns`
    /// (spec §4.1 slow-tick: "if leader quorum is lost ... enter
    /// election").
    pub fn has_lost_quorum(&self, now_ns: i64, leader_heartbeat_timeout_ns: i64) -> bool {
        let responsive = self
            .cluster_members
            .iter()
            .filter(|m| now_ns - m.time_of_last_append_position_ns <= leader_heartbeat_timeout_ns)
            .count();
        responsive < self.quorum_size()
    }
}
