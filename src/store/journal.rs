//! Journal-backed metric store
//!
//! Every committed mutation appends the full record image to an
//! append-only journal before it becomes visible in the table.
//!
//! ## File Layout
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │ Header (8 bytes)                 │
//! │ - magic: "MJNL" (4 bytes)        │
//! │ - version: u8                    │
//! │ - reserved: 3 bytes              │
//! ├──────────────────────────────────┤
//! │ Frame 0                          │
//! │ - data_length: u32 LE            │
//! │ - checksum: u32 LE (CRC32)       │
//! │ - data: bincode(MetricRecord)    │
//! ├──────────────────────────────────┤
//! │ Frame 1 ...                      │
//! └──────────────────────────────────┘
//! ```
//!
//! Replay applies frames in order (last image per name wins) and stops at
//! the first truncated or corrupt frame; the torn tail is cut off so new
//! frames never land behind garbage.
//!
//! A failed append is rolled back to the last committed frame boundary.
//! If the rollback itself fails the store is poisoned: writes and `ping`
//! report `Unavailable` until a successful `compact()` rewrites the
//! journal from the committed table.

use super::{CasOutcome, MetricStore, MetricTable, StoreError};
use crate::clock::{MetricClock, ProductionClock};
use crate::metrics::{MetricKind, MetricRecord, NewMetricRecord};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const JOURNAL_MAGIC: [u8; 4] = *b"MJNL";
pub const JOURNAL_VERSION: u8 = 1;
pub const JOURNAL_HEADER_SIZE: usize = 8;
/// data_length(4) + checksum(4)
pub const FRAME_OVERHEAD: usize = 8;

/// Encode one record image as a checksummed frame
pub fn encode_frame(record: &MetricRecord) -> Result<Vec<u8>, StoreError> {
    let data = bincode::serialize(record)
        .map_err(|e| StoreError::Corruption(format!("serialize: {}", e)))?;
    let data_len = u32::try_from(data.len())
        .map_err(|_| StoreError::Corruption(format!("frame too large: {} bytes", data.len())))?;

    let mut buf = Vec::with_capacity(FRAME_OVERHEAD + data.len());
    buf.extend_from_slice(&data_len.to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(&data).to_le_bytes());
    buf.extend_from_slice(&data);
    Ok(buf)
}

/// Decode the frame at the start of `data`.
///
/// Returns the record and the frame length, or `None` if the frame is
/// truncated, fails its checksum, or does not deserialize.
pub fn decode_frame(data: &[u8]) -> Option<(MetricRecord, usize)> {
    if data.len() < FRAME_OVERHEAD {
        return None;
    }
    let data_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let checksum = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);

    let total = FRAME_OVERHEAD.checked_add(data_len)?;
    if data.len() < total {
        return None;
    }
    let payload = &data[FRAME_OVERHEAD..total];
    if crc32fast::hash(payload) != checksum {
        return None;
    }
    let record = bincode::deserialize(payload).ok()?;
    Some((record, total))
}

/// File operations the journal appends through
pub trait JournalFile: Write + Send + Sync {
    fn sync_data(&mut self) -> std::io::Result<()>;

    /// Cut the file to `len` bytes, make that durable, and move the
    /// write position to the new end
    fn truncate_to(&mut self, len: u64) -> std::io::Result<()>;
}

impl JournalFile for File {
    fn sync_data(&mut self) -> std::io::Result<()> {
        File::sync_data(self)
    }

    fn truncate_to(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len)?;
        File::sync_data(self)?;
        self.seek(SeekFrom::Start(len))?;
        Ok(())
    }
}

fn header() -> [u8; JOURNAL_HEADER_SIZE] {
    let mut header = [0u8; JOURNAL_HEADER_SIZE];
    header[..4].copy_from_slice(&JOURNAL_MAGIC);
    header[4] = JOURNAL_VERSION;
    header
}

/// Summary of a journal replay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub frames_applied: u64,
    pub records: usize,
    /// Bytes cut from a torn or corrupt tail
    pub truncated_bytes: u64,
}

struct JournalState {
    table: MetricTable,
    file: Box<dyn JournalFile>,
    frames: u64,
    /// Byte length of the journal up to the last committed frame
    len: u64,
    poisoned: bool,
}

/// Durable metric store
pub struct JournalMetricStore {
    state: RwLock<JournalState>,
    path: PathBuf,
    sync_every_write: bool,
    clock: Arc<dyn MetricClock>,
    replay: ReplayReport,
}

impl JournalMetricStore {
    /// Open (or create) the journal at `path` and replay it
    pub fn open(path: impl AsRef<Path>, sync_every_write: bool) -> Result<Self, StoreError> {
        Self::open_with_clock(path, sync_every_write, Arc::new(ProductionClock::new()))
    }

    pub fn open_with_clock(
        path: impl AsRef<Path>,
        sync_every_write: bool,
        clock: Arc<dyn MetricClock>,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut table = MetricTable::new();
        let mut report = ReplayReport::default();
        let mut len = JOURNAL_HEADER_SIZE as u64;

        if bytes.is_empty() {
            file.write_all(&header())?;
            file.sync_all()?;
        } else {
            if bytes.len() < JOURNAL_HEADER_SIZE || bytes[..4] != JOURNAL_MAGIC {
                return Err(StoreError::Corruption(format!(
                    "{} is not a metric journal",
                    path.display()
                )));
            }
            if bytes[4] != JOURNAL_VERSION {
                return Err(StoreError::Corruption(format!(
                    "unsupported journal version {}",
                    bytes[4]
                )));
            }

            let mut offset = JOURNAL_HEADER_SIZE;
            while let Some((record, len)) = decode_frame(&bytes[offset..]) {
                table.commit_replayed(record);
                report.frames_applied += 1;
                offset += len;
            }

            if offset < bytes.len() {
                report.truncated_bytes = (bytes.len() - offset) as u64;
                warn!(
                    "Journal {} has a torn tail, truncating {} bytes",
                    path.display(),
                    report.truncated_bytes
                );
                file.set_len(offset as u64)?;
                file.sync_all()?;
            }
            len = offset as u64;
        }
        file.seek(SeekFrom::End(0))?;

        report.records = table.len();
        info!(
            "Opened metric journal {}: {} frames, {} records",
            path.display(),
            report.frames_applied,
            report.records
        );

        Ok(JournalMetricStore {
            state: RwLock::new(JournalState {
                table,
                file: Box::new(file),
                frames: report.frames_applied,
                len,
                poisoned: false,
            }),
            path,
            sync_every_write,
            clock,
            replay: report,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// What the last open recovered
    pub fn replay_report(&self) -> &ReplayReport {
        &self.replay
    }

    /// Frames currently in the journal
    pub fn frame_count(&self) -> u64 {
        self.state.read().frames
    }

    /// Whether a failed rollback has stopped all writes
    pub fn is_poisoned(&self) -> bool {
        self.state.read().poisoned
    }

    /// Rewrite the journal with one frame per live record.
    ///
    /// The rewritten file is built and synced under a temporary name and
    /// only swapped in once the rename succeeds; on any error the current
    /// journal stays in place. A successful compaction clears poisoning.
    pub fn compact(&self) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let records = state.table.list(None);

        let tmp_path = self.path.with_extension("compact");
        let (file, len) = match Self::write_compacted(&tmp_path, &records) {
            Ok(written) => written,
            Err(e) => {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(e);
            }
        };
        if let Err(e) = std::fs::rename(&tmp_path, &self.path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        debug!(
            "Compacted journal {}: {} frames -> {}",
            self.path.display(),
            state.frames,
            records.len()
        );
        if state.poisoned {
            info!("Journal {} rewritten, accepting writes again", self.path.display());
        }
        state.file = Box::new(file);
        state.frames = records.len() as u64;
        state.len = len;
        state.poisoned = false;
        Ok(())
    }

    fn write_compacted(path: &Path, records: &[MetricRecord]) -> Result<(File, u64), StoreError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&header())?;
        let mut len = JOURNAL_HEADER_SIZE as u64;
        for record in records {
            let frame = encode_frame(record)?;
            file.write_all(&frame)?;
            len += frame.len() as u64;
        }
        file.sync_all()?;
        file.seek(SeekFrom::End(0))?;
        Ok((file, len))
    }

    fn check_writable(&self, state: &JournalState) -> Result<(), StoreError> {
        if state.poisoned {
            return Err(StoreError::Unavailable(format!(
                "journal {} failed to roll back a partial append",
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Append `record` to the journal, then install it in the table.
    ///
    /// On failure the journal is cut back to its last committed length so
    /// the table and the file describe the same mutations.
    fn append_and_commit(&self, state: &mut JournalState, record: &MetricRecord) -> Result<(), StoreError> {
        self.check_writable(state)?;
        let frame = encode_frame(record)?;

        let written = state.file.write_all(&frame).and_then(|()| {
            if self.sync_every_write {
                state.file.sync_data()
            } else {
                Ok(())
            }
        });

        if let Err(e) = written {
            match state.file.truncate_to(state.len) {
                Ok(()) => warn!(
                    "Append to journal {} failed, rolled back to {} bytes: {}",
                    self.path.display(),
                    state.len,
                    e
                ),
                Err(rollback) => {
                    error!(
                        "Append to journal {} failed ({}) and rollback failed ({}), refusing further writes",
                        self.path.display(),
                        e,
                        rollback
                    );
                    state.poisoned = true;
                }
            }
            return Err(e.into());
        }

        state.len += frame.len() as u64;
        state.frames += 1;
        state.table.commit(record.clone());
        Ok(())
    }

    #[cfg(test)]
    fn replace_file(&self, file: Box<dyn JournalFile>) {
        self.state.write().file = file;
    }

    fn mutate(
        &self,
        plan: impl FnOnce(&MetricTable, u64) -> Result<Option<MetricRecord>, StoreError>,
    ) -> Result<Option<MetricRecord>, StoreError> {
        let mut state = self.state.write();
        let planned = plan(&state.table, self.clock.now_ms())?;
        if let Some(record) = &planned {
            self.append_and_commit(&mut state, record)?;
        }
        Ok(planned)
    }
}

impl MetricStore for JournalMetricStore {
    fn get(&self, name: &str) -> Result<Option<MetricRecord>, StoreError> {
        Ok(self.state.read().table.get(name).cloned())
    }

    fn insert(&self, record: NewMetricRecord) -> Result<MetricRecord, StoreError> {
        let mut state = self.state.write();
        let created = state.table.plan_insert(record, self.clock.now_ms())?;
        self.append_and_commit(&mut state, &created)?;
        Ok(created)
    }

    fn increment_if_exists(&self, name: &str) -> Result<Option<MetricRecord>, StoreError> {
        self.mutate(|table, now| table.plan_increment(name, now))
    }

    fn set_if_exists(&self, name: &str, value: i64) -> Result<Option<MetricRecord>, StoreError> {
        self.mutate(|table, now| Ok(table.plan_set(name, value, now)))
    }

    fn reset_if_exists(&self, name: &str) -> Result<Option<MetricRecord>, StoreError> {
        self.mutate(|table, now| Ok(table.plan_set(name, 0, now)))
    }

    fn compare_and_swap(
        &self,
        name: &str,
        expected_version: u64,
        value: i64,
    ) -> Result<CasOutcome, StoreError> {
        let mut state = self.state.write();
        let outcome =
            state
                .table
                .plan_compare_and_swap(name, expected_version, value, self.clock.now_ms());
        if let CasOutcome::Swapped(record) = &outcome {
            self.append_and_commit(&mut state, record)?;
        }
        Ok(outcome)
    }

    fn list_by_kind(&self, kind: MetricKind) -> Result<Vec<MetricRecord>, StoreError> {
        Ok(self.state.read().table.list(Some(kind)))
    }

    fn list_all(&self) -> Result<Vec<MetricRecord>, StoreError> {
        Ok(self.state.read().table.list(None))
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.state.read().table.len())
    }

    fn ping(&self) -> Result<(), StoreError> {
        self.check_writable(&self.state.read())
    }
}
