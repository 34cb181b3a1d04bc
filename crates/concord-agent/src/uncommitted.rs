//! Uncommitted bookkeeping (spec §4.6, §9 design note).
//!
//! Three parallel queues (`uncommitted_timers`, `uncommitted_closed_sessions`,
//! `uncommitted_service_messages_count`) are folded into one time-ordered
//! log of tagged entries keyed by append position (§9 redesign: "a single
//! time-ordered log of `Uncommitted ∈ {Timer, SessionClose, ServiceMessage}`
//! ... the rollback becomes one pass"). The service-message count is still
//! tracked as a derived integer (it has no per-entry state to roll back
//! beyond the [`crate::pending_message_queue::PendingMessageQueue`] slot
//! reset, which happens independently).

use std::collections::VecDeque;

use concord_types::{CorrelationId, LogPosition};

use crate::session::ClusterSession;

#[derive(Debug, Clone)]
pub enum Uncommitted {
    Timer { correlation_id: CorrelationId },
    SessionClose { session: Box<ClusterSession> },
}

#[derive(Debug, Clone)]
struct Entry {
    append_position: LogPosition,
    item: Uncommitted,
}

/// Rollback-safe ledger of effects that anticipate commit (spec §4.6).
#[derive(Debug, Default)]
pub struct UncommittedLedger {
    entries: VecDeque<Entry>,
    service_messages_count: u64,
}

impl UncommittedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_timer(&mut self, append_position: LogPosition, correlation_id: CorrelationId) {
        self.entries.push_back(Entry {
            append_position,
            item: Uncommitted::Timer { correlation_id },
        });
    }

    pub fn push_closed_session(&mut self, append_position: LogPosition, session: ClusterSession) {
        self.entries.push_back(Entry {
            append_position,
            item: Uncommitted::SessionClose { session: Box::new(session) },
        });
    }

    pub fn note_service_message_appended(&mut self) {
        self.service_messages_count += 1;
    }

    pub fn service_messages_count(&self) -> u64 {
        self.service_messages_count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Commit advancement (spec §4.6 step 2-3): pops every entry whose
    /// `append_position <= new_commit`, returning the expired timers and
    /// closed sessions separately so the caller can release timers
    /// unconditionally and re-admit sessions into the active map only for
    /// the (never, on commit) rollback path.
    pub fn pop_committed(&mut self, new_commit: LogPosition) -> (Vec<CorrelationId>, Vec<ClusterSession>) {
        let mut timers = Vec::new();
        let mut sessions = Vec::new();
        while let Some(front) = self.entries.front() {
            if front.append_position > new_commit {
                break;
            }
            let entry = self.entries.pop_front().unwrap();
            match entry.item {
                Uncommitted::Timer { correlation_id } => timers.push(correlation_id),
                Uncommitted::SessionClose { session } => sessions.push(*session),
            }
        }
        (timers, sessions)
    }

    /// Decrements the service-message count by `count` (called alongside
    /// [`crate::pending_message_queue::PendingMessageQueue::sweep_committed`]).
    pub fn release_service_messages(&mut self, count: u64) {
        self.service_messages_count = self.service_messages_count.saturating_sub(count);
    }

    /// Rollback on leadership loss (spec §4.6 `restore_uncommitted_entries`):
    /// every entry whose append position exceeded `safe_commit` is removed
    /// from the ledger and handed back so the caller can re-schedule the
    /// timer or re-admit the session into the active map. Entries at or
    /// below `safe_commit` are left untouched (they are, in fact,
    /// committed and must not be rolled back).
    pub fn restore_uncommitted_entries(&mut self, safe_commit: LogPosition) -> RestoredEntries {
        let mut timers = Vec::new();
        let mut sessions = Vec::new();
        let mut retained = VecDeque::new();
        for entry in self.entries.drain(..) {
            if entry.append_position > safe_commit {
                match entry.item {
                    Uncommitted::Timer { correlation_id } => timers.push(correlation_id),
                    Uncommitted::SessionClose { session } => sessions.push(*session),
                }
            } else {
                retained.push_back(entry);
            }
        }
        self.entries = retained;
        self.service_messages_count = 0;
        RestoredEntries { timers, sessions }
    }
}

#[derive(Debug, Default)]
pub struct RestoredEntries {
    pub timers: Vec<CorrelationId>,
    pub sessions: Vec<ClusterSession>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_types::{ClusterTime, CorrelationId as Cid, SessionId};

    fn dummy_session(id: u64) -> ClusterSession {
        ClusterSession::new(
            SessionId::new(id),
            0,
            String::new(),
            Cid::new(0),
            ClusterTime::ZERO,
        )
    }

    #[test]
    fn pop_committed_respects_position_order() {
        let mut ledger = UncommittedLedger::new();
        ledger.push_timer(LogPosition::new(10), Cid::new(1));
        ledger.push_closed_session(LogPosition::new(20), dummy_session(1));
        ledger.push_timer(LogPosition::new(30), Cid::new(2));

        let (timers, sessions) = ledger.pop_committed(LogPosition::new(20));
        assert_eq!(timers.len(), 1);
        assert_eq!(sessions.len(), 1);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn restore_only_rolls_back_entries_past_safe_commit() {
        let mut ledger = UncommittedLedger::new();
        ledger.push_timer(LogPosition::new(10), Cid::new(1));
        ledger.push_closed_session(LogPosition::new(50), dummy_session(2));
        ledger.note_service_message_appended();

        let restored = ledger.restore_uncommitted_entries(LogPosition::new(10));
        assert_eq!(restored.timers.len(), 0);
        assert_eq!(restored.sessions.len(), 1);
        assert_eq!(ledger.len(), 1, "the entry at the safe commit position is retained");
        assert_eq!(ledger.service_messages_count(), 0);
    }

    #[test]
    fn invariant_all_entries_above_commit_after_restore() {
        let mut ledger = UncommittedLedger::new();
        ledger.push_timer(LogPosition::new(5), Cid::new(1));
        ledger.push_timer(LogPosition::new(15), Cid::new(2));
        let restored = ledger.restore_uncommitted_entries(LogPosition::new(0));
        assert_eq!(restored.timers.len(), 2);
        assert!(ledger.is_empty());
    }
}
