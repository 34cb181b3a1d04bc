//! The module state machine (spec §4.1).
//!
//! Modeled as a closed enum with an explicit transition table; there is no
//! "set state directly" path anywhere outside [`ModuleState::transition`],
//! so the observable `moduleState` counter can never be written without a
//! state actually changing (spec §9 design note: "State machines as
//! explicit enums").

use concord_types::LogPosition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleState {
    Init,
    Active,
    Suspended,
    Snapshot,
    Terminating,
    Quitting,
    Closed,
}

impl ModuleState {
    /// The monotonic code written to the observable counter on every
    /// transition (spec §4.1: "Every state change also writes a monotonic
    /// state code to an observable counter").
    pub const fn code(self) -> i64 {
        match self {
            Self::Init => 0,
            Self::Active => 1,
            Self::Suspended => 2,
            Self::Snapshot => 3,
            Self::Terminating => 4,
            Self::Quitting => 5,
            Self::Closed => 6,
        }
    }

    /// Validates (and performs) a transition, per spec §4.1's diagram:
    /// `INIT -> ACTIVE|SUSPENDED`, `ACTIVE -> SNAPSHOT|TERMINATING|QUITTING|CLOSED`,
    /// `SNAPSHOT -> ACTIVE|TERMINATING`, `SUSPENDED -> ACTIVE`, any state `-> CLOSED`
    /// on a fatal error.
    pub fn transition(self, to: Self) -> Result<Self, InvalidTransition> {
        let allowed = match (self, to) {
            (Self::Init, Self::Active | Self::Suspended) => true,
            (Self::Active, Self::Snapshot | Self::Terminating | Self::Quitting) => true,
            (Self::Snapshot, Self::Active | Self::Terminating) => true,
            (Self::Suspended, Self::Active) => true,
            (_, Self::Closed) => true,
            _ => false,
        };
        if allowed {
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid module state transition: {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: ModuleState,
    pub to: ModuleState,
}

/// Tracks an in-flight snapshot so the agent knows the expected log
/// position every service must ack before returning to `ACTIVE` (or
/// forwarding to `TERMINATING` if a termination position was set while
/// the snapshot was in flight — spec §4.1, §4.8).
#[derive(Debug, Clone, Copy)]
pub struct SnapshotInFlight {
    pub expected_position: LogPosition,
    pub termination_position: Option<LogPosition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_can_go_active_or_suspended() {
        assert!(ModuleState::Init.transition(ModuleState::Active).is_ok());
        assert!(ModuleState::Init.transition(ModuleState::Suspended).is_ok());
        assert!(ModuleState::Init.transition(ModuleState::Snapshot).is_err());
    }

    #[test]
    fn snapshot_returns_to_active_or_forwards_to_terminating() {
        assert!(ModuleState::Snapshot.transition(ModuleState::Active).is_ok());
        assert!(ModuleState::Snapshot.transition(ModuleState::Terminating).is_ok());
        assert!(ModuleState::Snapshot.transition(ModuleState::Quitting).is_err());
    }

    #[test]
    fn any_state_can_close() {
        for from in [
            ModuleState::Init,
            ModuleState::Active,
            ModuleState::Suspended,
            ModuleState::Snapshot,
            ModuleState::Terminating,
            ModuleState::Quitting,
        ] {
            assert!(from.transition(ModuleState::Closed).is_ok());
        }
    }

    #[test]
    fn codes_are_monotonic_in_declaration_order() {
        let codes = [
            ModuleState::Init.code(),
            ModuleState::Active.code(),
            ModuleState::Suspended.code(),
            ModuleState::Snapshot.code(),
            ModuleState::Terminating.code(),
            ModuleState::Quitting.code(),
            ModuleState::Closed.code(),
        ];
        let mut sorted = codes;
        sorted.sort_unstable();
        assert_eq!(codes, sorted);
    }
}
