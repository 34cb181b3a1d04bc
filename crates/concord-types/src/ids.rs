//! Identifier newtypes.
//!
//! All ids are `Copy` so they move freely through the single-threaded agent
//! without borrow-juggling; each wraps the primitive the wire format uses
//! (see spec §3/§6) and adds `Display`/`From` conversions.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Identifies a member of the cluster (active or passive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(i32);

impl MemberId {
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    pub const fn as_i32(self) -> i32 {
        self.0
    }
}

impl Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "member#{}", self.0)
    }
}

impl From<i32> for MemberId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl From<MemberId> for i32 {
    fn from(id: MemberId) -> Self {
        id.0
    }
}

/// Identifies a cluster client session, assigned by the leader and
/// monotonically increasing (spec §3 `ClusterSession.id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next id in the monotonic sequence.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

impl From<u64> for SessionId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Identifies a service-originated message's synthetic session (spec §4.3).
///
/// Drawn from a reserved range starting at `i64::MIN + 1` and counting up,
/// so it can never collide with a real client-assigned [`SessionId`] cast to
/// `i64` (which the log entry header uses for both).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceSessionId(i64);

impl ServiceSessionId {
    /// The first id ever handed out, per spec §4.3.
    pub const FIRST: Self = Self(i64::MIN + 1);

    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn as_i64(self) -> i64 {
        self.0
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for ServiceSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service-session#{}", self.0)
    }
}

impl Default for ServiceSessionId {
    fn default() -> Self {
        Self::FIRST
    }
}

/// Correlates a request with its eventual response or timer firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CorrelationId(i64);

impl CorrelationId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "corr#{}", self.0)
    }
}

impl From<i64> for CorrelationId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// A byte offset in the replicated log stream, relative to the start of the
/// current leadership term (spec glossary: "Log position").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct LogPosition(i64);

impl LogPosition {
    pub const ZERO: Self = Self(0);

    pub const fn new(position: i64) -> Self {
        Self(position)
    }

    pub const fn as_i64(self) -> i64 {
        self.0
    }

    #[must_use]
    pub fn max(self, other: Self) -> Self {
        Self(self.0.max(other.0))
    }

    #[must_use]
    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }
}

impl Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for LogPosition {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<LogPosition> for i64 {
    fn from(p: LogPosition) -> Self {
        p.0
    }
}

/// Monotonic integer identifying a contiguous period of leadership by one
/// member (spec glossary: "Leadership term").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct LeadershipTermId(i64);

impl LeadershipTermId {
    pub const INITIAL: Self = Self(0);

    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn as_i64(self) -> i64 {
        self.0
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for LeadershipTermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "term#{}", self.0)
    }
}

/// Identifies an archived recording (spec glossary: "Recording").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordingId(i64);

impl RecordingId {
    pub const NULL: Self = Self(-1);

    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn as_i64(self) -> i64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == Self::NULL.0
    }
}

impl Display for RecordingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "recording#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_session_id_sequence_never_collides_with_client_range() {
        let first = ServiceSessionId::FIRST;
        assert_eq!(first.as_i64(), i64::MIN + 1);
        assert!(first.next().as_i64() > first.as_i64());
    }

    #[test]
    fn session_id_next_is_monotonic() {
        let a = SessionId::new(41);
        assert_eq!(a.next(), SessionId::new(42));
    }

    #[test]
    fn log_position_min_max() {
        let a = LogPosition::new(10);
        let b = LogPosition::new(20);
        assert_eq!(a.min(b), a);
        assert_eq!(a.max(b), b);
    }
}
