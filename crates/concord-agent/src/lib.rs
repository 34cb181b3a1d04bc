//! # concord-agent
//!
//! The consensus module agent: the single-threaded, cooperatively polled
//! control component that drives membership, leader election coordination,
//! client session lifecycle, command ordering, replicated-log replay,
//! snapshotting, and coordinated termination for one node of a replicated
//! state-machine cluster.
//!
//! This crate implements the agent's run-loop and state machines. The
//! transport, archive/recording byte-stream, and authenticator are external
//! collaborators, modeled here as traits ([`collab`]) so the agent is
//! testable without a real network or disk.
//!
//! ## Architecture
//!
//! The agent is *not* a pure function the way a VSR replica state machine
//! might be: it owns real side-effecting handles (log publisher, archive
//! client) and is driven by repeated calls to [`agent::Agent::do_work`].
//! Each call performs at most one slow-tick (bounded to roughly every
//! 10ms) and one fast-tick of I/O polling and consensus work, never
//! blocking.
//!
//! - [`module_state`] / [`role`]: the two top-level state machines.
//! - [`session`] / [`session_registry`]: per-client session lifecycle.
//! - [`timer_wheel`]: correlation-id-keyed timers, snapshotable.
//! - [`pending_message_queue`]: service-originated messages awaiting append.
//! - [`uncommitted`]: rollback-safe bookkeeping for not-yet-committed effects.
//! - [`membership`]: active/passive members and quorum math.
//! - [`log`]: typed log appends and replay.
//! - [`recording_log`]: the durable term/snapshot index.
//! - [`snapshot`]: snapshot take/load.
//! - [`election`] / [`dynamic_join`]: adapters to the election submodule and
//!   the bootstrap-join state machine.
//! - [`agent`]: the run-loop tying everything together.

pub mod agent;
pub mod collab;
pub mod config;
pub mod counters;
pub mod dynamic_join;
pub mod election;
pub mod error;
pub mod ingress;
pub mod log;
pub mod member_status;
pub mod membership;
pub mod module_state;
pub mod pending_message_queue;
pub mod recording_log;
pub mod role;
pub mod service_control;
pub mod session;
pub mod session_registry;
pub mod snapshot;
pub mod timer_wheel;
pub mod uncommitted;

pub use agent::Agent;
pub use config::AgentConfig;
pub use error::{AgentError, Disposition};

#[cfg(test)]
mod tests;
