//! `RecordingLog`: the durable index of terms and snapshots, and the
//! `RecoveryPlan` it builds (spec §3, §4.8, §6 "Persistent layout").
//!
//! The file is a sequence of fixed-size entry records, each keyed by
//! `leadership_term_id`, fsync'd at the configured sync level when
//! snapshot entries are appended (spec §6).

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use concord_types::{LeadershipTermId, LogPosition, RecordingId};

/// On-disk record size: kind tag (1) + leadership_term_id (8) +
/// term_base_log_position (8) + log_position (8) + timestamp (8) +
/// service_id (4) + recording_id (8) = 37 bytes, padded to 40 for
/// alignment (spec §6: "a sequence of fixed-size entry records").
pub const RECORD_SIZE: usize = 40;

const KIND_TERM: u8 = 0;
const KIND_SNAPSHOT: u8 = 1;

/// Sentinel `service_id` for the module's own snapshot entry, as opposed
/// to a per-service snapshot entry (spec §4.8 step 4).
pub const MODULE_SERVICE_ID: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermEntry {
    pub leadership_term_id: LeadershipTermId,
    pub term_base_log_position: LogPosition,
    pub log_position: LogPosition,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub leadership_term_id: LeadershipTermId,
    pub log_position: LogPosition,
    pub timestamp: i64,
    pub service_id: i32,
    pub recording_id: RecordingId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingLogEntry {
    Term(TermEntry),
    Snapshot(SnapshotEntry),
}

impl RecordingLogEntry {
    fn encode(self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        match self {
            Self::Term(t) => {
                buf[0] = KIND_TERM;
                buf[1..9].copy_from_slice(&t.leadership_term_id.as_i64().to_le_bytes());
                buf[9..17].copy_from_slice(&t.term_base_log_position.as_i64().to_le_bytes());
                buf[17..25].copy_from_slice(&t.log_position.as_i64().to_le_bytes());
                buf[25..33].copy_from_slice(&t.timestamp.to_le_bytes());
            }
            Self::Snapshot(s) => {
                buf[0] = KIND_SNAPSHOT;
                buf[1..9].copy_from_slice(&s.leadership_term_id.as_i64().to_le_bytes());
                buf[9..17].copy_from_slice(&s.log_position.as_i64().to_le_bytes());
                buf[17..25].copy_from_slice(&s.timestamp.to_le_bytes());
                buf[25..29].copy_from_slice(&s.service_id.to_le_bytes());
                buf[29..37].copy_from_slice(&s.recording_id.as_i64().to_le_bytes());
            }
        }
        buf
    }

    fn decode(buf: &[u8; RECORD_SIZE]) -> Option<Self> {
        match buf[0] {
            KIND_TERM => Some(Self::Term(TermEntry {
                leadership_term_id: LeadershipTermId::new(i64::from_le_bytes(buf[1..9].try_into().ok()?)),
                term_base_log_position: LogPosition::new(i64::from_le_bytes(buf[9..17].try_into().ok()?)),
                log_position: LogPosition::new(i64::from_le_bytes(buf[17..25].try_into().ok()?)),
                timestamp: i64::from_le_bytes(buf[25..33].try_into().ok()?),
            })),
            KIND_SNAPSHOT => Some(Self::Snapshot(SnapshotEntry {
                leadership_term_id: LeadershipTermId::new(i64::from_le_bytes(buf[1..9].try_into().ok()?)),
                log_position: LogPosition::new(i64::from_le_bytes(buf[9..17].try_into().ok()?)),
                timestamp: i64::from_le_bytes(buf[17..25].try_into().ok()?),
                service_id: i32::from_le_bytes(buf[25..29].try_into().ok()?),
                recording_id: RecordingId::new(i64::from_le_bytes(buf[29..37].try_into().ok()?)),
            })),
            _ => None,
        }
    }
}

/// Derived from the recording log on recovery: which snapshots to load and
/// which log segment to replay (spec §3 `RecoveryPlan`).
#[derive(Debug, Clone, Default)]
pub struct RecoveryPlan {
    pub snapshots: Vec<SnapshotEntry>,
    pub log: Option<LogRecoveryInfo>,
    pub last_leadership_term_id: LeadershipTermId,
    pub appended_log_position: LogPosition,
}

#[derive(Debug, Clone, Copy)]
pub struct LogRecoveryInfo {
    pub recording_id: RecordingId,
    pub initial_term_id: LeadershipTermId,
    pub term_base_log_position: LogPosition,
    pub start_position: LogPosition,
    pub stop_position: Option<LogPosition>,
}

/// An append-only index of [`TermEntry`]/[`SnapshotEntry`] records,
/// fsync'd at `file_sync_level > 0` when a snapshot is appended (spec §6).
pub struct RecordingLog {
    file: File,
    entries: Vec<RecordingLogEntry>,
    file_sync_level: u32,
}

impl RecordingLog {
    pub fn open(path: &Path, file_sync_level: u32) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).read(true).append(true).open(path)?;
        let entries = Self::read_all(path)?;
        Ok(Self { file, entries, file_sync_level })
    }

    fn read_all(path: &Path) -> io::Result<Vec<RecordingLogEntry>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = BufReader::new(File::open(path)?);
        let mut entries = Vec::new();
        let mut buf = [0u8; RECORD_SIZE];
        loop {
            match reader.read_exact(&mut buf) {
                Ok(()) => {
                    if let Some(entry) = RecordingLogEntry::decode(&buf) {
                        entries.push(entry);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
        }
        Ok(entries)
    }

    pub fn entries(&self) -> &[RecordingLogEntry] {
        &self.entries
    }

    pub fn append_term(&mut self, entry: TermEntry) -> io::Result<()> {
        self.append(RecordingLogEntry::Term(entry), false)
    }

    /// Appends a snapshot record and `force`s the file if `file_sync_level
    /// > 0` (spec §4.8 step 4, §6).
    pub fn append_snapshot(&mut self, entry: SnapshotEntry) -> io::Result<()> {
        self.append(RecordingLogEntry::Snapshot(entry), true)
    }

    fn append(&mut self, entry: RecordingLogEntry, is_snapshot: bool) -> io::Result<()> {
        let mut writer = BufWriter::new(&mut self.file);
        writer.write_all(&entry.encode())?;
        writer.flush()?;
        drop(writer);
        if is_snapshot && self.file_sync_level > 0 {
            self.file.sync_all()?;
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Builds the [`RecoveryPlan`] by walking the entries in order: the
    /// most recent snapshot per service (plus the module's own, keyed by
    /// [`MODULE_SERVICE_ID`]) and the latest open term for log replay
    /// (spec §3 `RecoveryPlan`).
    pub fn recovery_plan(&self) -> RecoveryPlan {
        let mut latest_by_service: std::collections::HashMap<i32, SnapshotEntry> = std::collections::HashMap::new();
        let mut last_term: Option<TermEntry> = None;
        for entry in &self.entries {
            match entry {
                RecordingLogEntry::Snapshot(s) => {
                    latest_by_service.insert(s.service_id, *s);
                }
                RecordingLogEntry::Term(t) => {
                    last_term = Some(*t);
                }
            }
        }
        let mut snapshots: Vec<SnapshotEntry> = latest_by_service.into_values().collect();
        snapshots.sort_by_key(|s| s.service_id);

        let module_snapshot = snapshots.iter().find(|s| s.service_id == MODULE_SERVICE_ID).copied();
        let last_leadership_term_id = last_term
            .map(|t| t.leadership_term_id)
            .or_else(|| module_snapshot.map(|s| s.leadership_term_id))
            .unwrap_or(LeadershipTermId::INITIAL);
        let appended_log_position = last_term
            .map(|t| t.log_position)
            .or_else(|| module_snapshot.map(|s| s.log_position))
            .unwrap_or(LogPosition::ZERO);

        RecoveryPlan {
            snapshots,
            log: None,
            last_leadership_term_id,
            appended_log_position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recording.log");
        {
            let mut log = RecordingLog::open(&path, 1).unwrap();
            log.append_term(TermEntry {
                leadership_term_id: LeadershipTermId::new(1),
                term_base_log_position: LogPosition::ZERO,
                log_position: LogPosition::new(100),
                timestamp: 42,
            })
            .unwrap();
            log.append_snapshot(SnapshotEntry {
                leadership_term_id: LeadershipTermId::new(1),
                log_position: LogPosition::new(100),
                timestamp: 43,
                service_id: 0,
                recording_id: RecordingId::new(7),
            })
            .unwrap();
        }
        let reopened = RecordingLog::open(&path, 1).unwrap();
        assert_eq!(reopened.entries().len(), 2);
    }

    #[test]
    fn recovery_plan_picks_latest_snapshot_per_service() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recording.log");
        let mut log = RecordingLog::open(&path, 0).unwrap();
        log.append_snapshot(SnapshotEntry {
            leadership_term_id: LeadershipTermId::new(1),
            log_position: LogPosition::new(10),
            timestamp: 1,
            service_id: 0,
            recording_id: RecordingId::new(1),
        })
        .unwrap();
        log.append_snapshot(SnapshotEntry {
            leadership_term_id: LeadershipTermId::new(2),
            log_position: LogPosition::new(20),
            timestamp: 2,
            service_id: 0,
            recording_id: RecordingId::new(2),
        })
        .unwrap();
        log.append_snapshot(SnapshotEntry {
            leadership_term_id: LeadershipTermId::new(2),
            log_position: LogPosition::new(20),
            timestamp: 2,
            service_id: MODULE_SERVICE_ID,
            recording_id: RecordingId::new(3),
        })
        .unwrap();

        let plan = log.recovery_plan();
        assert_eq!(plan.snapshots.len(), 2);
        let module = plan.snapshots.iter().find(|s| s.service_id == MODULE_SERVICE_ID).unwrap();
        assert_eq!(module.recording_id, RecordingId::new(3));
        assert_eq!(plan.last_leadership_term_id, LeadershipTermId::new(2));
    }
}
