//! # concord-types: Core types for the Concord consensus agent
//!
//! Shared identifier, time, and wire-semantics types used by
//! [`concord_agent`](https://docs.rs/concord-agent) and its host:
//!
//! - Entity IDs ([`MemberId`], [`SessionId`], [`ServiceSessionId`], [`CorrelationId`])
//! - Replicated-log positions ([`LogPosition`], [`LeadershipTermId`], [`RecordingId`])
//! - Temporal types ([`ClusterTime`], [`ClusterTimeUnit`])
//! - Session/event codes ([`EventCode`], [`CloseReason`], [`ControlToggle`])

mod codes;
mod ids;
mod time;

pub use codes::{CloseReason, ControlToggle, EventCode};
pub use ids::{CorrelationId, LeadershipTermId, LogPosition, MemberId, RecordingId, ServiceSessionId, SessionId};
pub use time::{ClusterTime, ClusterTimeUnit};
