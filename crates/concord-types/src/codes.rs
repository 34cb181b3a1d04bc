//! Session/event codes and operator controls (spec §3, §6).

use serde::{Deserialize, Serialize};

/// Result code attached to an egress response to a client (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCode {
    Ok,
    Error,
    Redirect,
    Closed,
    AuthenticationRejected,
}

/// Why a [`crate::SessionId`]'s session was closed (spec §3 `ClusterSession`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloseReason {
    ClientAction,
    ServiceAction,
    Timeout,
}

/// Operator-facing control toggle, written by an external caller and
/// consumed once per slow-tick (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ControlToggle {
    #[default]
    Neutral,
    Suspend,
    Resume,
    Snapshot,
    Shutdown,
    Abort,
}
