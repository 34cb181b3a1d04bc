//! The role state machine (spec §4.1, §9 supplemented feature).
//!
//! The agent's own transitions are only `Follower -> Leader` (on
//! [`crate::election::ElectionAdapter::election_complete`]) and
//! `Leader -> Follower` (on `prepare_for_new_leadership`). `Candidate` is a
//! transient value the election submodule asserts while canvassing; the
//! agent surfaces it on the `clusterRoleCounter` (spec §6: 0/1/2 coding)
//! but does not itself drive transitions into or out of it — see
//! SPEC_FULL.md's supplemented-features section.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    #[default]
    Follower,
    Candidate,
    Leader,
}

impl Role {
    pub const fn code(self) -> i64 {
        match self {
            Self::Follower => 0,
            Self::Candidate => 1,
            Self::Leader => 2,
        }
    }

    pub const fn is_leader(self) -> bool {
        matches!(self, Self::Leader)
    }
}
