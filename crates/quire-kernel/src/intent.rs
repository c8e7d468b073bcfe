//! Commit intent log.
//!
//! Before a transaction commits its store objects it records which roots it
//! is about to touch; once the indexes have committed too it records
//! completion. Intents without a completion record mark roots whose indexes
//! may disagree with the store and must be rebuilt.
//!
//! File frames:
//! ```text
//! [4 bytes: payload length (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload (bincode-serialized IntentRecord)]
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use quire_types::{Instant, ResourceId, TxId};

use crate::error::{KernelError, KernelResult};

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

/// Roots a transaction is about to commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitIntent {
    pub id: u64,
    pub tx: TxId,
    pub roots: Vec<ResourceId>,
    pub started: Instant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum IntentRecord {
    Begin(CommitIntent),
    Complete { id: u64 },
}

pub trait IntentLog: Send + Sync {
    /// Record that `tx` is about to commit `roots`. Returns the intent id.
    fn begin(&self, tx: TxId, roots: &[ResourceId], at: Instant) -> KernelResult<u64>;

    /// Record that intent `id` finished, store and indexes alike.
    fn complete(&self, id: u64) -> KernelResult<()>;

    /// Intents with no completion record, oldest first.
    fn unresolved(&self) -> KernelResult<Vec<CommitIntent>>;

    /// Drop completed intents from durable storage.
    fn compact(&self) -> KernelResult<()>;
}

/// Fold records into the intents still open.
fn open_intents(records: impl IntoIterator<Item = IntentRecord>) -> BTreeMap<u64, CommitIntent> {
    let mut open = BTreeMap::new();
    for record in records {
        match record {
            IntentRecord::Begin(intent) => {
                open.insert(intent.id, intent);
            }
            IntentRecord::Complete { id } => {
                open.remove(&id);
            }
        }
    }
    open
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: u64,
    open: BTreeMap<u64, CommitIntent>,
}

/// Intent log kept in process memory; used when no log file is configured.
#[derive(Debug, Default)]
pub struct InMemoryIntentLog {
    state: Mutex<MemoryState>,
}

impl InMemoryIntentLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IntentLog for InMemoryIntentLog {
    fn begin(&self, tx: TxId, roots: &[ResourceId], at: Instant) -> KernelResult<u64> {
        let mut state = self.state.lock().map_err(KernelError::poisoned)?;
        state.next_id += 1;
        let id = state.next_id;
        state.open.insert(id, CommitIntent {
            id,
            tx,
            roots: roots.to_vec(),
            started: at,
        });
        Ok(id)
    }

    fn complete(&self, id: u64) -> KernelResult<()> {
        self.state.lock().map_err(KernelError::poisoned)?.open.remove(&id);
        Ok(())
    }

    fn unresolved(&self) -> KernelResult<Vec<CommitIntent>> {
        Ok(self.state.lock().map_err(KernelError::poisoned)?.open.values().cloned().collect())
    }

    fn compact(&self) -> KernelResult<()> {
        Ok(())
    }
}

struct FileWriter {
    writer: BufWriter<File>,
    next_id: u64,
}

/// Crash-safe intent log backed by one append-only file.
///
/// Every record is synced before `begin`/`complete` return. On open the file
/// is scanned to continue the id sequence; torn or corrupt frames are skipped.
pub struct FileIntentLog {
    path: PathBuf,
    writer: Mutex<FileWriter>,
}

impl FileIntentLog {
    pub fn open(path: &Path) -> KernelResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).read(true).append(true).open(path)?;
        let next_id = read_records(path)?
            .iter()
            .map(|r| match r {
                IntentRecord::Begin(intent) => intent.id,
                IntentRecord::Complete { id } => *id,
            })
            .max()
            .unwrap_or(0);
        debug!(path = %path.display(), next_id, "intent log opened");
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(FileWriter {
                writer: BufWriter::new(file),
                next_id,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> KernelResult<MutexGuard<'_, FileWriter>> {
        self.writer.lock().map_err(KernelError::poisoned)
    }

    fn append(w: &mut FileWriter, record: &IntentRecord) -> KernelResult<()> {
        let payload = encode(record)?;
        w.writer.write_all(&payload)?;
        w.writer.flush()?;
        w.writer.get_ref().sync_all()?;
        Ok(())
    }
}

fn encode(record: &IntentRecord) -> KernelResult<Vec<u8>> {
    let payload = bincode::serialize(record).map_err(|e| KernelError::IntentLog(e.to_string()))?;
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Read every intact record, front to back.
fn read_records(path: &Path) -> KernelResult<Vec<IntentRecord>> {
    let mut data = Vec::new();
    match File::open(path) {
        Ok(file) => {
            BufReader::new(file).read_to_end(&mut data)?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    }

    let mut records = Vec::new();
    let mut offset = 0usize;
    while offset + HEADER_SIZE <= data.len() {
        let length = u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]]) as usize;
        let expected_crc =
            u32::from_le_bytes([data[offset + 4], data[offset + 5], data[offset + 6], data[offset + 7]]);
        let start = offset + HEADER_SIZE;
        if length == 0 || start + length > data.len() {
            warn!(offset, length, file_len = data.len(), "torn intent frame; stopping scan");
            break;
        }
        let payload = &data[start..start + length];
        let actual_crc = crc32fast::hash(payload);
        if actual_crc != expected_crc {
            warn!(offset, expected = expected_crc, actual = actual_crc, "CRC mismatch; skipping intent frame");
        } else {
            match bincode::deserialize::<IntentRecord>(payload) {
                Ok(record) => records.push(record),
                Err(e) => warn!(offset, error = %e, "unreadable intent frame; skipping"),
            }
        }
        offset = start + length;
    }
    Ok(records)
}

impl IntentLog for FileIntentLog {
    fn begin(&self, tx: TxId, roots: &[ResourceId], at: Instant) -> KernelResult<u64> {
        let mut w = self.lock()?;
        w.next_id += 1;
        let id = w.next_id;
        let record = IntentRecord::Begin(CommitIntent {
            id,
            tx,
            roots: roots.to_vec(),
            started: at,
        });
        Self::append(&mut w, &record)?;
        debug!(id, %tx, roots = roots.len(), "commit intent recorded");
        Ok(id)
    }

    fn complete(&self, id: u64) -> KernelResult<()> {
        let mut w = self.lock()?;
        Self::append(&mut w, &IntentRecord::Complete { id })
    }

    fn unresolved(&self) -> KernelResult<Vec<CommitIntent>> {
        let _guard = self.lock()?;
        Ok(open_intents(read_records(&self.path)?).into_values().collect())
    }

    /// Rewrite the file with only the open intents.
    fn compact(&self) -> KernelResult<()> {
        let mut w = self.lock()?;
        let open = open_intents(read_records(&self.path)?);
        let file = OpenOptions::new().write(true).truncate(true).open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for intent in open.values() {
            writer.write_all(&encode(&IntentRecord::Begin(intent.clone()))?)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        // Reopen in append mode so later frames land after the rewrite.
        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        w.writer = BufWriter::new(file);
        debug!(open = open.len(), "intent log compacted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(secs: i64) -> Instant {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    // --- In-memory ---

    #[test]
    fn memory_log_tracks_open_intents() {
        let log = InMemoryIntentLog::new();
        let a = log.begin(TxId::new(), &[id("a")], at(0)).unwrap();
        let b = log.begin(TxId::new(), &[id("b"), id("c")], at(1)).unwrap();
        log.complete(a).unwrap();
        let open = log.unresolved().unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, b);
        assert_eq!(open[0].roots, vec![id("b"), id("c")]);
    }

    // --- File ---

    #[test]
    fn file_log_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intents.wal");
        let tx = TxId::new();
        {
            let log = FileIntentLog::open(&path).unwrap();
            let first = log.begin(TxId::new(), &[id("a")], at(0)).unwrap();
            log.begin(tx, &[id("b")], at(1)).unwrap();
            log.complete(first).unwrap();
        }
        let log = FileIntentLog::open(&path).unwrap();
        let open = log.unresolved().unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].tx, tx);
        assert_eq!(open[0].started, at(1));
        // Ids keep increasing across reopen.
        assert_eq!(log.begin(TxId::new(), &[], at(2)).unwrap(), 3);
    }

    #[test]
    fn torn_tail_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intents.wal");
        let log = FileIntentLog::open(&path).unwrap();
        log.begin(TxId::new(), &[id("a")], at(0)).unwrap();
        drop(log);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[40, 0, 0, 0, 1, 2, 3, 4, 9]).unwrap();
        drop(file);

        let log = FileIntentLog::open(&path).unwrap();
        assert_eq!(log.unresolved().unwrap().len(), 1);
    }

    #[test]
    fn corrupt_frame_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intents.wal");
        let log = FileIntentLog::open(&path).unwrap();
        log.begin(TxId::new(), &[id("a")], at(0)).unwrap();
        log.begin(TxId::new(), &[id("b")], at(1)).unwrap();
        drop(log);

        // Flip one payload byte of the first frame.
        let mut data = fs::read(&path).unwrap();
        data[HEADER_SIZE + 2] ^= 0xff;
        fs::write(&path, &data).unwrap();

        let log = FileIntentLog::open(&path).unwrap();
        let open = log.unresolved().unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].roots, vec![id("b")]);
    }

    #[test]
    fn compact_keeps_only_open_intents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intents.wal");
        let log = FileIntentLog::open(&path).unwrap();
        for n in 0..5 {
            let intent = log.begin(TxId::new(), &[id("a")], at(n)).unwrap();
            log.complete(intent).unwrap();
        }
        let open = log.begin(TxId::new(), &[id("z")], at(9)).unwrap();
        let before = fs::metadata(&path).unwrap().len();
        log.compact().unwrap();
        assert!(fs::metadata(&path).unwrap().len() < before);

        log.complete(open).unwrap();
        assert!(log.unresolved().unwrap().is_empty());
    }
}
