//! Minimal in-process collaborator implementations for local/manual testing
//! of the agent's run loop (see `concord_agent::collab`'s module doc: "
//! `concord-node` wires in minimal in-process implementations suitable for
//! local testing").
//!
//! These are loopback stand-ins, not a real Aeron-like transport: a
//! single-node `Publication`/`Subscription` pair that appends to and
//! replays from an in-memory buffer, a counting archive client, a
//! credential-less authenticator, and a logging termination hook.

use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicI64, Ordering};

use concord_agent::collab::{ArchiveClient, Authenticator, FragmentAction, Publication, Subscription, TerminationHook};
use concord_agent::error::AgentError;
use concord_types::{LogPosition, MemberId, RecordingId};

/// A single-process "wire": what [`LoopbackPublication`] appends is what
/// [`LoopbackSubscription`] replays, in order. Shared via `Rc<RefCell<_>>`
/// since both ends live on the same single-threaded agent.
#[derive(Default)]
struct LoopbackLog {
    frames: VecDeque<Vec<u8>>,
    position: i64,
}

pub struct LoopbackPublication {
    log: Rc<std::cell::RefCell<LoopbackLog>>,
}

pub struct LoopbackSubscription {
    log: Rc<std::cell::RefCell<LoopbackLog>>,
    next_index: usize,
}

/// Builds a connected publication/subscription pair over one shared
/// in-memory log, for running a single node without a real transport.
pub fn loopback_pair() -> (LoopbackPublication, LoopbackSubscription) {
    let log = Rc::new(std::cell::RefCell::new(LoopbackLog::default()));
    (LoopbackPublication { log: log.clone() }, LoopbackSubscription { log, next_index: 0 })
}

impl Publication for LoopbackPublication {
    fn offer(&mut self, payload: &[u8]) -> Result<Option<LogPosition>, AgentError> {
        let mut log = self.log.borrow_mut();
        log.frames.push_back(payload.to_vec());
        log.position += payload.len() as i64;
        Ok(Some(LogPosition::new(log.position)))
    }

    fn position(&self) -> LogPosition {
        LogPosition::new(self.log.borrow().position)
    }

    fn is_connected(&self) -> bool {
        true
    }
}

impl Subscription for LoopbackSubscription {
    fn poll(&mut self, fragment_limit: usize, on_fragment: &mut dyn FnMut(&[u8]) -> FragmentAction) -> usize {
        let log = self.log.borrow();
        let mut consumed = 0;
        while consumed < fragment_limit {
            let Some(frame) = log.frames.get(self.next_index) else {
                break;
            };
            self.next_index += 1;
            consumed += 1;
            if on_fragment(frame) == FragmentAction::Abort {
                break;
            }
        }
        consumed
    }

    fn is_closed(&self) -> bool {
        false
    }
}

/// An archive client that tracks recordings in memory instead of talking to
/// a real archive process. `stop_recording` finalizes the position
/// immediately, so callers never need to busy-wait on it.
pub struct InMemoryArchiveClient {
    next_id: AtomicI64,
    stop_positions: std::collections::HashMap<i64, LogPosition>,
    current_position: LogPosition,
    snapshots: std::collections::HashMap<i64, Vec<u8>>,
}

impl InMemoryArchiveClient {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(0),
            stop_positions: std::collections::HashMap::new(),
            current_position: LogPosition::ZERO,
            snapshots: std::collections::HashMap::new(),
        }
    }

    /// Advances the position a future `stop_recording` call will finalize
    /// to, mirroring the log's own append progress.
    pub fn advance(&mut self, position: LogPosition) {
        self.current_position = self.current_position.max(position);
    }
}

impl Default for InMemoryArchiveClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveClient for InMemoryArchiveClient {
    fn start_recording(&mut self, _channel: &str, _stream_id: i32) -> Result<RecordingId, AgentError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(RecordingId::new(id))
    }

    fn stop_recording(&mut self, recording_id: RecordingId) -> Result<(), AgentError> {
        self.stop_positions.insert(recording_id.as_i64(), self.current_position);
        Ok(())
    }

    fn recording_stop_position(&self, recording_id: RecordingId) -> Option<LogPosition> {
        self.stop_positions.get(&recording_id.as_i64()).copied()
    }

    fn truncate_recording(&mut self, _recording_id: RecordingId, position: LogPosition) -> Result<(), AgentError> {
        self.current_position = position;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn persist_snapshot(&mut self, recording_id: RecordingId, bytes: Vec<u8>) -> Result<(), AgentError> {
        self.snapshots.insert(recording_id.as_i64(), bytes);
        Ok(())
    }

    fn retrieve_snapshot(&mut self, recording_id: RecordingId) -> Result<Vec<u8>, AgentError> {
        self.snapshots
            .get(&recording_id.as_i64())
            .cloned()
            .ok_or_else(|| AgentError::ArchiveOperation { message: format!("no snapshot persisted for {recording_id}") })
    }
}

/// Accepts every connection without a challenge. Real deployments plug in a
/// credential-checking implementation; this is for local/manual runs only.
#[derive(Default)]
pub struct AllowAllAuthenticator;

impl Authenticator for AllowAllAuthenticator {
    fn on_connect(&mut self, _member_id: MemberId, _credentials: &[u8]) -> Result<bool, AgentError> {
        Ok(true)
    }

    fn on_challenge_response(&mut self, _credentials: &[u8]) -> Result<bool, AgentError> {
        Ok(true)
    }
}

/// Logs the termination outcome; a real host would also flip an exit-code
/// flag the process's main loop reads.
#[derive(Default)]
pub struct LoggingTerminationHook;

impl TerminationHook for LoggingTerminationHook {
    fn on_terminate(&mut self, graceful: bool) {
        if graceful {
            tracing::info!("consensus module terminated gracefully");
        } else {
            tracing::error!("consensus module terminated abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_pair_replays_what_was_published() {
        let (mut publication, mut subscription) = loopback_pair();
        publication.offer(b"hello").unwrap();
        publication.offer(b"world").unwrap();

        let mut seen = Vec::new();
        subscription.poll(10, &mut |frame| {
            seen.push(frame.to_vec());
            FragmentAction::Continue
        });

        assert_eq!(seen, vec![b"hello".to_vec(), b"world".to_vec()]);
    }

    #[test]
    fn archive_client_tracks_recordings_independently() {
        let mut archive = InMemoryArchiveClient::new();
        let first = archive.start_recording("log", 0).unwrap();
        let second = archive.start_recording("log", 0).unwrap();
        assert_ne!(first, second);

        archive.advance(LogPosition::new(128));
        archive.stop_recording(first).unwrap();
        assert_eq!(archive.recording_stop_position(first), Some(LogPosition::new(128)));
        assert_eq!(archive.recording_stop_position(second), None);
    }
}
