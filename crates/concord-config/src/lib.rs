//! On-disk and environment configuration for a Concord cluster node
//! (spec §7 ambient stack addition).
//!
//! A node's `concord.toml` describes the static cluster membership and the
//! timing/limits knobs the run loop reads via [`concord_agent::config::AgentConfig`].
//! [`ConfigLoader`] merges, in increasing precedence: built-in defaults, the
//! user's XDG config file, the node directory's `concord.toml`, an optional
//! `concord.local.toml`, then `CONCORD_`-prefixed environment variables.

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

use concord_agent::config::AgentConfig;
use concord_agent::membership::ClusterMember as AgentClusterMember;
use concord_types::MemberId;
use serde::{Deserialize, Serialize};

/// One member's static endpoints, as written in `concord.toml` (spec §3
/// `ClusterMember`, minus the runtime-only liveness fields the agent tracks
/// itself).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberConfig {
    pub id: i32,
    pub client_endpoint: String,
    pub member_endpoint: String,
    pub transfer_endpoint: String,
    pub log_endpoint: String,
}

impl MemberConfig {
    fn into_cluster_member(self) -> AgentClusterMember {
        AgentClusterMember::new(
            MemberId::new(self.id),
            self.client_endpoint,
            self.member_endpoint,
            self.transfer_endpoint,
            self.log_endpoint,
        )
    }
}

/// A node's full configuration, as loaded from disk/env (spec §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// This node's own member id; must match one entry in `members`.
    pub member_id: i32,
    pub members: Vec<MemberConfig>,

    pub session_timeout_ns: i64,
    pub leader_heartbeat_interval_ns: i64,
    pub leader_heartbeat_timeout_ns: i64,
    pub catchup_timeout_ns: i64,
    pub termination_timeout_ns: i64,

    /// Bound on service-originated-message appends per leader tick
    /// (spec §4.1 `SERVICE_MESSAGE_LIMIT`, default 20).
    pub service_message_limit: usize,
    pub max_concurrent_sessions: usize,
    pub file_sync_level: u32,
    pub ticks_per_wheel: usize,
    pub wheel_tick_resolution_ns: i64,
    pub app_version: u32,
    pub cluster_major_version: u32,

    /// Hosted service ids the snapshot/termination ack barrier waits on.
    pub service_ids: Vec<i32>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let defaults = AgentConfig::new(MemberId::new(0), Vec::new());
        Self {
            member_id: 0,
            members: Vec::new(),
            session_timeout_ns: defaults.session_timeout_ns,
            leader_heartbeat_interval_ns: defaults.leader_heartbeat_interval_ns,
            leader_heartbeat_timeout_ns: defaults.leader_heartbeat_timeout_ns,
            catchup_timeout_ns: defaults.catchup_timeout_ns,
            termination_timeout_ns: defaults.termination_timeout_ns,
            service_message_limit: defaults.service_message_limit,
            max_concurrent_sessions: defaults.max_concurrent_sessions,
            file_sync_level: defaults.file_sync_level,
            ticks_per_wheel: defaults.ticks_per_wheel,
            wheel_tick_resolution_ns: defaults.wheel_tick_resolution_ns,
            app_version: defaults.app_version,
            cluster_major_version: defaults.cluster_major_version,
            service_ids: defaults.service_ids,
        }
    }
}

impl ClusterConfig {
    /// Validates cross-field invariants the `config` crate's merge can't
    /// express: `member_id` must name an entry in `members`, and member ids
    /// must be unique.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.members.is_empty() {
            return Err(ConfigError::ValidationError("cluster must have at least one member".to_string()));
        }
        if !self.members.iter().any(|m| m.id == self.member_id) {
            return Err(ConfigError::ValidationError(format!("member_id {} not found in members", self.member_id)));
        }
        let mut ids: Vec<i32> = self.members.iter().map(|m| m.id).collect();
        ids.sort_unstable();
        if ids.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(ConfigError::ValidationError("duplicate member id in members".to_string()));
        }
        Ok(())
    }

    /// Converts into the in-memory shape the agent run loop reads from.
    pub fn into_agent_config(self) -> Result<AgentConfig, ConfigError> {
        self.validate()?;
        let member_id = MemberId::new(self.member_id);
        let members = self.members.into_iter().map(MemberConfig::into_cluster_member).collect();
        Ok(AgentConfig {
            member_id,
            members,
            session_timeout_ns: self.session_timeout_ns,
            leader_heartbeat_interval_ns: self.leader_heartbeat_interval_ns,
            leader_heartbeat_timeout_ns: self.leader_heartbeat_timeout_ns,
            catchup_timeout_ns: self.catchup_timeout_ns,
            termination_timeout_ns: self.termination_timeout_ns,
            service_message_limit: self.service_message_limit,
            max_concurrent_sessions: self.max_concurrent_sessions,
            file_sync_level: self.file_sync_level,
            ticks_per_wheel: self.ticks_per_wheel,
            wheel_tick_resolution_ns: self.wheel_tick_resolution_ns,
            app_version: self.app_version,
            cluster_major_version: self.cluster_major_version,
            service_ids: self.service_ids,
        })
    }
}
