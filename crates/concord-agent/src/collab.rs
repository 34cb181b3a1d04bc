//! External collaborators, modeled as traits (spec §1 "Out of scope",
//! §9 design note: "No cyclic ownership ... they hold weak/plain
//! references (never owning) to the agent").
//!
//! The agent owns one implementation of each trait per role; production
//! implementations (a real Aeron-like transport, a real archive client, a
//! real pluggable authenticator) live outside this crate. `concord-node`
//! wires in minimal in-process implementations suitable for local testing.

use concord_types::{LogPosition, MemberId, RecordingId};

use crate::error::AgentError;

/// A reliable, ordered, byte-stream publication to one destination (spec
/// §1: "Transport ... consumed as reliable ordered byte streams with
/// position counters").
pub trait Publication {
    /// Attempts to publish `payload`. Returns the resulting stream position
    /// on success, or `None` if the publication is flow-controlled — the
    /// caller must retry on a later tick (spec §4.5: "backpressure").
    fn offer(&mut self, payload: &[u8]) -> Result<Option<LogPosition>, AgentError>;

    fn position(&self) -> LogPosition;

    fn is_connected(&self) -> bool;
}

/// A reliable, ordered byte-stream subscription, polled for framed
/// messages (spec §1, §4.5).
pub trait Subscription {
    /// Polls up to `fragment_limit` framed messages, invoking `on_fragment`
    /// for each. Returns the number of fragments consumed.
    fn poll(
        &mut self,
        fragment_limit: usize,
        on_fragment: &mut dyn FnMut(&[u8]) -> FragmentAction,
    ) -> usize;

    fn is_closed(&self) -> bool;
}

/// What to do after handling one polled fragment — lets a handler abort a
/// subscription mid-batch (spec §4.5: "controlled polling must be able to
/// *abort* a fragment, e.g., when the leader cannot append forward").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentAction {
    Continue,
    Abort,
}

/// The archive/recording subsystem (spec §1): record, replay, truncate,
/// stop. A narrow operation set, consumed opaquely.
pub trait ArchiveClient {
    fn start_recording(&mut self, channel: &str, stream_id: i32) -> Result<RecordingId, AgentError>;

    fn stop_recording(&mut self, recording_id: RecordingId) -> Result<(), AgentError>;

    /// Busy-waited on by the caller (spec §4.1 step 2) until the recording
    /// actually stops; returns the final stop position once known.
    fn recording_stop_position(&self, recording_id: RecordingId) -> Option<LogPosition>;

    fn truncate_recording(&mut self, recording_id: RecordingId, position: LogPosition) -> Result<(), AgentError>;

    fn is_connected(&self) -> bool;

    /// Persists an encoded snapshot image under `recording_id` (spec §4.8
    /// step 3). Keyed by the same recording id the snapshot index entry
    /// records, so recovery can look one up from the other.
    fn persist_snapshot(&mut self, recording_id: RecordingId, bytes: Vec<u8>) -> Result<(), AgentError>;

    /// Retrieves a previously persisted snapshot image's bytes (spec §4.8
    /// "Snapshot loading", §4.9 recovery).
    fn retrieve_snapshot(&mut self, recording_id: RecordingId) -> Result<Vec<u8>, AgentError>;
}

/// Pluggable client authentication (spec §1, §4.2).
pub trait Authenticator {
    /// Begins authenticating `credentials`; `Ok(true)` means authenticated
    /// immediately, `Ok(false)` means a challenge is required.
    fn on_connect(&mut self, member_id: MemberId, credentials: &[u8]) -> Result<bool, AgentError>;

    fn on_challenge_response(&mut self, credentials: &[u8]) -> Result<bool, AgentError>;
}

/// Invoked once, exactly, when the module reaches `CLOSED` (spec §6 "Exit/
/// termination"). Implementations should not panic — the agent has already
/// decided the outcome by the time this runs.
pub trait TerminationHook {
    fn on_terminate(&mut self, graceful: bool);
}
