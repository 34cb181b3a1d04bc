//! A hashed timer wheel keyed by correlation id (spec §4.4).
//!
//! Granular to a configured resolution, with capacity rounded up to a power
//! of two (`ticks_per_wheel`). Snapshotable and restorable (spec §4.8).

use std::collections::HashMap;

use concord_types::{ClusterTime, CorrelationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEntry {
    pub correlation_id: CorrelationId,
    pub deadline: ClusterTime,
}

/// A correlation that fired during replay before its schedule was seen
/// (or whose cancel raced its schedule); spec §4.4's "duplicate fires
/// during replay" rule.
#[derive(Debug, Default)]
struct ExpiredCount(u32);

#[derive(Debug)]
pub struct TimerWheel {
    tick_resolution: i64,
    ticks_per_wheel: usize,
    entries: HashMap<CorrelationId, TimerEntry>,
    /// Per-correlation counter of expirations seen with no matching entry
    /// in the wheel (spec §4.4).
    expired_without_entry: HashMap<CorrelationId, ExpiredCount>,
}

impl TimerWheel {
    /// `ticks_per_wheel` is rounded up to the next power of two, matching
    /// the hashed-wheel convention described in spec §4.4.
    pub fn new(tick_resolution: i64, ticks_per_wheel: usize) -> Self {
        Self {
            tick_resolution,
            ticks_per_wheel: ticks_per_wheel.next_power_of_two(),
            entries: HashMap::new(),
            expired_without_entry: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.ticks_per_wheel
    }

    pub fn tick_resolution(&self) -> i64 {
        self.tick_resolution
    }

    /// Schedules a timer, unless a prior out-of-order expiry for this
    /// correlation is still outstanding — in which case the schedule is
    /// suppressed and the outstanding count is decremented instead (spec
    /// §4.4: "a later `schedule` call for the same correlation simply
    /// decrements that counter and suppresses the schedule").
    pub fn schedule(&mut self, correlation_id: CorrelationId, deadline: ClusterTime) {
        if let Some(count) = self.expired_without_entry.get_mut(&correlation_id) {
            count.0 -= 1;
            if count.0 == 0 {
                self.expired_without_entry.remove(&correlation_id);
            }
            return;
        }
        self.entries.insert(correlation_id, TimerEntry { correlation_id, deadline });
    }

    /// Cancels a timer. If the correlation isn't present, records an
    /// out-of-order expectation so a later `schedule` is suppressed once
    /// (idempotence across restart, spec §4.4).
    pub fn cancel(&mut self, correlation_id: CorrelationId) {
        if self.entries.remove(&correlation_id).is_none() {
            self.expired_without_entry.entry(correlation_id).or_default().0 += 1;
        }
    }

    /// Returns all timers whose deadline has passed as of `now`, removing
    /// them from the wheel. The caller is responsible for appending a
    /// `Timer` log entry for each and recording (append_position,
    /// correlation_id) in the uncommitted ledger (spec §4.4).
    pub fn poll_expired(&mut self, now: ClusterTime) -> Vec<TimerEntry> {
        let expired: Vec<CorrelationId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot support (spec §4.8): an ordered, deterministic list of live
    /// entries.
    pub fn snapshot_entries(&self) -> Vec<TimerEntry> {
        let mut entries: Vec<TimerEntry> = self.entries.values().copied().collect();
        entries.sort_by_key(|e| e.correlation_id.as_i64());
        entries
    }

    /// Restores a wheel from a snapshot's entry list.
    pub fn restore(tick_resolution: i64, ticks_per_wheel: usize, entries: Vec<TimerEntry>) -> Self {
        let mut wheel = Self::new(tick_resolution, ticks_per_wheel);
        for entry in entries {
            wheel.entries.insert(entry.correlation_id, entry);
        }
        wheel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        let wheel = TimerWheel::new(1, 100);
        assert_eq!(wheel.capacity(), 128);
    }

    #[test]
    fn poll_expired_removes_only_due_entries() {
        let mut wheel = TimerWheel::new(1, 8);
        wheel.schedule(CorrelationId::new(1), ClusterTime::new(10));
        wheel.schedule(CorrelationId::new(2), ClusterTime::new(20));
        let expired = wheel.poll_expired(ClusterTime::new(15));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].correlation_id, CorrelationId::new(1));
        assert_eq!(wheel.len(), 1);
    }

    #[test]
    fn cancel_before_schedule_suppresses_next_schedule() {
        let mut wheel = TimerWheel::new(1, 8);
        let id = CorrelationId::new(7);
        wheel.cancel(id); // cancel arrives before schedule during replay
        wheel.schedule(id, ClusterTime::new(50));
        assert_eq!(wheel.len(), 0, "schedule should have been suppressed");
        assert!(wheel.expired_without_entry.is_empty());
    }

    #[test]
    fn snapshot_round_trip() {
        let mut wheel = TimerWheel::new(2, 16);
        wheel.schedule(CorrelationId::new(3), ClusterTime::new(5));
        wheel.schedule(CorrelationId::new(1), ClusterTime::new(9));
        let entries = wheel.snapshot_entries();
        let restored = TimerWheel::restore(2, 16, entries.clone());
        assert_eq!(restored.snapshot_entries(), entries);
    }
}
