//! Observable counters (spec §5, §6): single-writer (the agent),
//! multi-reader, release/acquire semantics. The agent never reads its own
//! counters through the atomic — it keeps the authoritative value in plain
//! fields and only mirrors writes out here for outside observers.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::module_state::ModuleState;
use crate::role::Role;

/// A single observable counter: written with `Release`, read with
/// `Acquire`, matching the corpus's single-writer/multi-reader convention
/// for cross-thread observability counters.
#[derive(Debug, Default)]
pub struct Counter(AtomicI64);

impl Counter {
    pub fn new(initial: i64) -> Self {
        Self(AtomicI64::new(initial))
    }

    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Release);
    }

    pub fn increment(&self) -> i64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }
}

/// All counters the host exposes to external observers (spec §6).
#[derive(Debug, Default)]
pub struct AgentCounters {
    pub module_state: Counter,
    pub cluster_role: Counter,
    pub commit_position: Counter,
    pub snapshot_counter: Counter,
    pub timed_out_client_counter: Counter,
    pub invalid_request_counter: Counter,
}

impl AgentCounters {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_module_state(&self, state: ModuleState) {
        self.module_state.set(state.code());
    }

    pub fn set_role(&self, role: Role) {
        self.cluster_role.set(role.code());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_roundtrips() {
        let c = Counter::new(0);
        c.set(42);
        assert_eq!(c.get(), 42);
        assert_eq!(c.increment(), 43);
    }

    #[test]
    fn role_counter_matches_spec_coding() {
        let counters = AgentCounters::default();
        counters.set_role(Role::Follower);
        assert_eq!(counters.cluster_role.get(), 0);
        counters.set_role(Role::Candidate);
        assert_eq!(counters.cluster_role.get(), 1);
        counters.set_role(Role::Leader);
        assert_eq!(counters.cluster_role.get(), 2);
    }
}
