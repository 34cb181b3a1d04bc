//! Agent configuration (spec §7 ambient stack addition). Loaded and
//! validated by `concord-config`; this type is the in-memory shape the
//! agent run-loop actually reads from.

use concord_types::MemberId;

use crate::membership::ClusterMember;

/// Default bound on service-originated-message appends per leader tick
/// (spec §4.1 `SERVICE_MESSAGE_LIMIT=20`).
pub const DEFAULT_SERVICE_MESSAGE_LIMIT: usize = 20;

/// Bound on slow-tick frequency (spec §4.1: "bounded frequency, ~10 ms").
pub const SLOW_TICK_INTERVAL_NS: i64 = 10_000_000;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub member_id: MemberId,
    pub members: Vec<ClusterMember>,
    pub session_timeout_ns: i64,
    pub leader_heartbeat_interval_ns: i64,
    pub leader_heartbeat_timeout_ns: i64,
    pub catchup_timeout_ns: i64,
    pub termination_timeout_ns: i64,
    pub service_message_limit: usize,
    pub max_concurrent_sessions: usize,
    pub file_sync_level: u32,
    pub ticks_per_wheel: usize,
    pub wheel_tick_resolution_ns: i64,
    pub app_version: u32,
    pub cluster_major_version: u32,
    /// Hosted service ids the snapshot/termination ack barrier waits on
    /// (spec §4.8). Empty means no hosted services are registered, so the
    /// barrier is trivially satisfied.
    pub service_ids: Vec<i32>,
}

impl AgentConfig {
    pub fn new(member_id: MemberId, members: Vec<ClusterMember>) -> Self {
        Self {
            member_id,
            members,
            session_timeout_ns: 10_000_000_000,
            leader_heartbeat_interval_ns: 200_000_000,
            leader_heartbeat_timeout_ns: 2_000_000_000,
            catchup_timeout_ns: 10_000_000_000,
            termination_timeout_ns: 10_000_000_000,
            service_message_limit: DEFAULT_SERVICE_MESSAGE_LIMIT,
            max_concurrent_sessions: 10,
            file_sync_level: 0,
            ticks_per_wheel: 1024,
            wheel_tick_resolution_ns: 8_000_000,
            app_version: 1,
            cluster_major_version: 1,
            service_ids: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let config = AgentConfig::new(MemberId::new(0), Vec::new());
        assert_eq!(config.service_message_limit, 20);
        assert_eq!(SLOW_TICK_INTERVAL_NS, 10_000_000);
    }
}
