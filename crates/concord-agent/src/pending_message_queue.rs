//! Ring buffer of service-originated messages awaiting log append
//! (spec §4.3).
//!
//! Service-originated messages are commands synthesized by a hosted
//! service; they're ordered into the replicated log under leader authority
//! and identified with a service-session id from the reserved range
//! starting at `i64::MIN + 1` (spec §4.3, [`concord_types::ServiceSessionId`]).

use std::collections::VecDeque;

use concord_types::{LogPosition, ServiceSessionId};
use crossbeam_queue::ArrayQueue;

use crate::error::AgentError;

/// Sentinel meaning "not yet appended" for a slot's overloaded timestamp
/// field (spec §3 `PendingServiceMessage`).
pub const NOT_YET_APPENDED: i64 = i64::MAX;

#[derive(Debug, Clone)]
pub struct PendingServiceMessage {
    pub service_session_id: ServiceSessionId,
    pub body: Vec<u8>,
    /// Overloaded slot: `NOT_YET_APPENDED` until the leader appends this
    /// message, after which it holds the append position (spec §3, §4.3).
    pub append_position_slot: i64,
}

impl PendingServiceMessage {
    pub fn is_appended(&self) -> bool {
        self.append_position_slot != NOT_YET_APPENDED
    }

    pub fn append_position(&self) -> Option<LogPosition> {
        self.is_appended().then(|| LogPosition::new(self.append_position_slot))
    }
}

/// Bounded ring of pending service messages. Uses a `crossbeam_queue`
/// bounded queue for the backing capacity check (fails fast with
/// `CapacityExceeded` rather than growing unboundedly) and a `VecDeque` as
/// the ordered view the leader tick walks from the head (spec §4.3: "the
/// head of the ring is replayed through `append_to_log`").
pub struct PendingMessageQueue {
    capacity_probe: ArrayQueue<()>,
    entries: VecDeque<PendingServiceMessage>,
    head_offset: usize,
    next_service_session_id: ServiceSessionId,
}

impl PendingMessageQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity_probe: ArrayQueue::new(capacity.max(1)),
            entries: VecDeque::new(),
            head_offset: 0,
            next_service_session_id: ServiceSessionId::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity_probe.capacity()
    }

    pub fn next_service_session_id(&self) -> ServiceSessionId {
        self.next_service_session_id
    }

    /// A snapshot-time copy of every still-pending entry (spec §4.8 step 3).
    pub fn snapshot_entries(&self) -> Vec<PendingServiceMessage> {
        self.entries.iter().cloned().collect()
    }

    /// Stamps the reserved slots and enqueues `body` (spec §4.3
    /// `on_service_message`). Fails with `CapacityExceeded` if the ring
    /// cannot grow.
    pub fn on_service_message(&mut self, body: Vec<u8>) -> Result<ServiceSessionId, AgentError> {
        if self.capacity_probe.push(()).is_err() {
            return Err(AgentError::CapacityExceeded);
        }
        let service_session_id = self.next_service_session_id;
        self.next_service_session_id = self.next_service_session_id.next();
        self.entries.push_back(PendingServiceMessage {
            service_session_id,
            body,
            append_position_slot: NOT_YET_APPENDED,
        });
        Ok(service_session_id)
    }

    /// Returns the unappended entry at the head (if any), for the leader
    /// tick to attempt to append (spec §4.1 consensus work, §4.3).
    pub fn head(&self) -> Option<&PendingServiceMessage> {
        self.entries.get(self.head_offset)
    }

    /// Records that the head entry was successfully appended at
    /// `position`, and advances the head offset (spec §4.3: "when an
    /// append succeeds, the slot's timestamp is overwritten ... the
    /// head-offset advances").
    pub fn record_head_appended(&mut self, position: LogPosition) {
        if let Some(entry) = self.entries.get_mut(self.head_offset) {
            entry.append_position_slot = position.as_i64();
            self.head_offset += 1;
        }
    }

    /// Leader sweeper (spec §4.3, §4.6): removes slots whose recorded
    /// append position is `<= commit_position`. Returns the count removed,
    /// for the caller to decrement `uncommitted_service_messages`.
    pub fn sweep_committed(&mut self, commit_position: LogPosition) -> usize {
        let mut removed = 0;
        while let Some(front) = self.entries.front() {
            if front.is_appended() && front.append_position().unwrap() <= commit_position {
                self.entries.pop_front();
                self.head_offset = self.head_offset.saturating_sub(1);
                self.capacity_probe.pop();
                removed += 1;
            } else {
                break;
            }
        }
        removed
    }

    /// Follower sweeper (spec §4.3): removes slots whose embedded
    /// service-session id is `<= log_service_session_id`, reconciling
    /// locally-generated ids against those the leader actually committed.
    pub fn sweep_observed(&mut self, log_service_session_id: ServiceSessionId) -> usize {
        let mut removed = 0;
        while let Some(front) = self.entries.front() {
            if front.service_session_id <= log_service_session_id {
                self.entries.pop_front();
                self.head_offset = self.head_offset.saturating_sub(1);
                self.capacity_probe.pop();
                removed += 1;
            } else {
                break;
            }
        }
        removed
    }

    /// On role loss: resets all unappended slots back to the sentinel and
    /// rewinds the head offset, so a new leader (or this node on
    /// re-catch-up) can re-append cleanly (spec §4.3, §4.6 rollback).
    pub fn restore_uncommitted_entries(&mut self) {
        // Everything remaining in the ring has already been swept of
        // committed entries by `sweep_committed`, so anything still
        // carrying a stamped position here is, by definition, uncommitted.
        for entry in &mut self.entries {
            entry.append_position_slot = NOT_YET_APPENDED;
        }
        self.head_offset = 0;
    }

    /// Rehydrates the ring from a loaded snapshot image (spec §4.8): the
    /// snapshot's entries replace the current ones and the id counter is
    /// resynced so newly enqueued messages never collide with ids the
    /// snapshot already covered.
    pub fn restore_from_snapshot(&mut self, next_service_session_id: ServiceSessionId, entries: Vec<PendingServiceMessage>) {
        self.capacity_probe = ArrayQueue::new(self.capacity_probe.capacity().max(entries.len()).max(1));
        for _ in 0..entries.len() {
            let _ = self.capacity_probe.push(());
        }
        self.entries = entries.into_iter().collect();
        self.head_offset = 0;
        self.next_service_session_id = next_service_session_id;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_message_ids_increase_from_reserved_range() {
        let mut queue = PendingMessageQueue::new(4);
        let a = queue.on_service_message(vec![1]).unwrap();
        let b = queue.on_service_message(vec![2]).unwrap();
        assert_eq!(a, ServiceSessionId::FIRST);
        assert!(b > a);
    }

    #[test]
    fn capacity_exceeded_when_full() {
        let mut queue = PendingMessageQueue::new(1);
        queue.on_service_message(vec![1]).unwrap();
        assert!(matches!(
            queue.on_service_message(vec![2]),
            Err(AgentError::CapacityExceeded)
        ));
    }

    #[test]
    fn append_then_sweep_on_commit() {
        let mut queue = PendingMessageQueue::new(4);
        queue.on_service_message(vec![1]).unwrap();
        queue.record_head_appended(LogPosition::new(10));
        assert_eq!(queue.sweep_committed(LogPosition::new(5)), 0);
        assert_eq!(queue.sweep_committed(LogPosition::new(10)), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn restore_resets_unappended_sentinel_and_head() {
        let mut queue = PendingMessageQueue::new(4);
        queue.on_service_message(vec![1]).unwrap();
        queue.on_service_message(vec![2]).unwrap();
        queue.record_head_appended(LogPosition::new(1));
        assert_eq!(queue.head().unwrap().service_session_id, queue.entries[1].service_session_id);
        queue.restore_uncommitted_entries();
        assert!(queue.entries.iter().all(|e| !e.is_appended()));
        assert_eq!(queue.head().unwrap().service_session_id, ServiceSessionId::FIRST);
    }
}
