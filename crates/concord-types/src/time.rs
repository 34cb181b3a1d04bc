//! Cluster time representation.
//!
//! The agent never reads the wall clock directly inside its pure state
//! transitions; `now`/`now_ns` are passed in by the run loop each tick
//! (spec §4.1, §5). [`ClusterTimeUnit`] is recorded in snapshots and
//! recording headers so recovery can detect `IncompatibleTimeUnit`
//! (spec §7) before replaying data stamped in a different unit.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// A point in cluster time, in whatever unit the cluster was configured
/// with ([`ClusterTimeUnit`]). Comparable and orderable, never arithmetic
/// against wall-clock time directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct ClusterTime(i64);

impl ClusterTime {
    pub const ZERO: Self = Self(0);

    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn as_i64(self) -> i64 {
        self.0
    }

    #[must_use]
    pub fn saturating_add(self, delta: i64) -> Self {
        Self(self.0.saturating_add(delta))
    }

    #[must_use]
    pub fn saturating_sub(self, other: Self) -> i64 {
        self.0.saturating_sub(other.0)
    }
}

impl Display for ClusterTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ClusterTime {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// The unit that [`ClusterTime`] values and recorded timestamps are in.
///
/// A snapshot or recording taken under one unit cannot be replayed under
/// another; mismatch is the fatal `IncompatibleTimeUnit` error (spec §6/§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterTimeUnit {
    Nanos,
    Micros,
    Millis,
    Seconds,
}

impl ClusterTimeUnit {
    /// Nanoseconds per unit, for converting a wall-clock `Duration` reading
    /// into this unit's representation.
    pub const fn nanos_per_unit(self) -> i64 {
        match self {
            Self::Nanos => 1,
            Self::Micros => 1_000,
            Self::Millis => 1_000_000,
            Self::Seconds => 1_000_000_000,
        }
    }
}

impl Display for ClusterTimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Nanos => "nanos",
            Self::Micros => "micros",
            Self::Millis => "millis",
            Self::Seconds => "seconds",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nanos_per_unit_table() {
        assert_eq!(ClusterTimeUnit::Nanos.nanos_per_unit(), 1);
        assert_eq!(ClusterTimeUnit::Seconds.nanos_per_unit(), 1_000_000_000);
    }

    #[test]
    fn cluster_time_saturating_sub() {
        let a = ClusterTime::new(100);
        let b = ClusterTime::new(40);
        assert_eq!(a.saturating_sub(b), 60);
        assert_eq!(b.saturating_sub(a), -60);
    }
}
