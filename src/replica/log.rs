//! Recovery log for a replica
//!
//! Append-only sequence of transaction records, fsync'd on every append. The
//! replica's backing store is always reconstructible by replaying it:
//!
//! - `Put`/`Del` prepares a write for its key (phase 1 voted `READY`).
//! - `Commit` applies the key's prepared write; `Abort` discards it.
//! - A prepared write with no decision by end of log is in doubt and is not
//!   applied. It stays prepared in memory, so a decision redelivered by the
//!   coordinator's phase-2 retry still lands.
//!
//! Record format (little endian):
//! `[MAGIC:4][SEQUENCE:8][OP:1][KEY_LEN:4][VALUE_LEN:4][KEY][VALUE][CRC32:4]`

use crate::common::{Error, KvStore, Result};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

const LOG_MAGIC: [u8; 4] = [0x54, 0x50, 0x43, 0x31]; // "TPC1"
const OP_PUT: u8 = 1;
const OP_DEL: u8 = 2;
const OP_COMMIT: u8 = 3;
const OP_ABORT: u8 = 4;

/// Fixed bytes around the key and value of one record.
const FRAME_OVERHEAD: usize = 4 + 8 + 1 + 4 + 4 + 4;

/// One entry of the recovery log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Put { key: String, value: String },
    Del { key: String },
    Commit { key: String },
    Abort { key: String },
    /// Reads share the request pipeline but are never persisted.
    Get { key: String },
}

impl LogRecord {
    pub fn key(&self) -> &str {
        match self {
            LogRecord::Put { key, .. }
            | LogRecord::Del { key }
            | LogRecord::Commit { key }
            | LogRecord::Abort { key }
            | LogRecord::Get { key } => key,
        }
    }

    /// `Put` or `Del`: a write awaiting its decision.
    pub fn is_write(&self) -> bool {
        matches!(self, LogRecord::Put { .. } | LogRecord::Del { .. })
    }

    fn op_code(&self) -> Option<u8> {
        match self {
            LogRecord::Put { .. } => Some(OP_PUT),
            LogRecord::Del { .. } => Some(OP_DEL),
            LogRecord::Commit { .. } => Some(OP_COMMIT),
            LogRecord::Abort { .. } => Some(OP_ABORT),
            LogRecord::Get { .. } => None,
        }
    }

    fn value_bytes(&self) -> &[u8] {
        match self {
            LogRecord::Put { value, .. } => value.as_bytes(),
            _ => &[],
        }
    }

    /// Apply a committed write to `store`.
    pub fn apply_to(&self, store: &dyn KvStore) -> Result<()> {
        match self {
            LogRecord::Put { key, value } => store.put(key, value),
            LogRecord::Del { key } => store.delete(key),
            _ => Ok(()),
        }
    }
}

/// A persisted record and its position in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub sequence: u64,
    pub record: LogRecord,
}

/// Replay `entries` into `store`, applying committed writes only. Returns the
/// writes still awaiting a decision, by key.
pub fn replay<'a, I>(entries: I, store: &dyn KvStore) -> Result<HashMap<String, LogRecord>>
where
    I: IntoIterator<Item = &'a LogRecord>,
{
    let mut pending: HashMap<String, LogRecord> = HashMap::new();

    for record in entries {
        match record {
            LogRecord::Put { key, .. } | LogRecord::Del { key } => {
                pending.insert(key.clone(), record.clone());
            }
            LogRecord::Commit { key } => {
                if let Some(write) = pending.remove(key) {
                    write.apply_to(store)?;
                }
            }
            LogRecord::Abort { key } => {
                pending.remove(key);
            }
            LogRecord::Get { .. } => {}
        }
    }

    Ok(pending)
}

/// Durable transaction log of one replica.
pub struct RecoveryLog {
    path: PathBuf,
    writer: BufWriter<File>,
    next_sequence: u64,
    last: Option<LogRecord>,
    pending: HashMap<String, LogRecord>,
}

impl RecoveryLog {
    /// Open (or create) the log at `path` and rebuild `store` from it.
    ///
    /// A missing file is an empty history. Reading stops at the first torn or
    /// corrupt record; the file is cut back to the intact prefix so later
    /// appends stay readable.
    pub fn open(path: impl AsRef<Path>, store: &dyn KvStore) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let (entries, valid_len) = Self::read_entries(&path)?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let file_len = file.metadata()?.len();
        if file_len > valid_len {
            tracing::warn!(
                "Recovery log {:?}: dropping {} unreadable trailing bytes",
                path,
                file_len - valid_len
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        let records: Vec<LogRecord> = entries.iter().map(|e| e.record.clone()).collect();
        let pending = replay(&records, store)?;
        tracing::info!(
            "Recovery log {:?}: replayed {} records, {} in doubt",
            path,
            records.len(),
            pending.len()
        );

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            next_sequence: entries.last().map(|e| e.sequence + 1).unwrap_or(0),
            last: records.last().cloned(),
            pending,
        })
    }

    /// Read all intact entries and the byte length they occupy.
    pub fn read_entries(path: &Path) -> Result<(Vec<LogEntry>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut valid_len = 0u64;

        loop {
            match Self::read_entry(&mut reader) {
                Ok(Some((entry, len))) => {
                    entries.push(entry);
                    valid_len += len as u64;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Recovery log replay stopped at corrupted entry: {}", e);
                    break;
                }
            }
        }

        Ok((entries, valid_len))
    }

    /// Persist `record` and fsync before returning. `Get` records are not
    /// persisted.
    pub fn append_and_flush(&mut self, record: &LogRecord) -> Result<()> {
        let Some(op) = record.op_code() else {
            return Ok(());
        };

        let sequence = self.next_sequence;
        let frame = encode_frame(sequence, op, record.key().as_bytes(), record.value_bytes());
        self.writer.write_all(&frame)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;

        self.next_sequence += 1;
        self.last = Some(record.clone());
        Ok(())
    }

    /// Durably prepare a `Put`/`Del`; it replaces any earlier undecided write
    /// for the same key.
    pub fn prepare(&mut self, record: LogRecord) -> Result<()> {
        if !record.is_write() {
            return Err(Error::Log(format!("cannot prepare {:?}", record)));
        }
        self.append_and_flush(&record)?;
        self.pending.insert(record.key().to_string(), record);
        Ok(())
    }

    /// Record a commit for `key` and hand back the write to apply. A commit
    /// with nothing prepared (a redelivered decision) is a no-op.
    pub fn commit(&mut self, key: &str) -> Result<Option<LogRecord>> {
        if !self.pending.contains_key(key) {
            return Ok(None);
        }
        self.append_and_flush(&LogRecord::Commit {
            key: key.to_string(),
        })?;
        Ok(self.pending.remove(key))
    }

    /// Record an abort for `key`, discarding its prepared write. Returns
    /// whether anything was prepared.
    pub fn abort(&mut self, key: &str) -> Result<bool> {
        if !self.pending.contains_key(key) {
            return Ok(false);
        }
        self.append_and_flush(&LogRecord::Abort {
            key: key.to_string(),
        })?;
        self.pending.remove(key);
        Ok(true)
    }

    /// Undecided write for `key`, if any.
    pub fn pending(&self, key: &str) -> Option<&LogRecord> {
        self.pending.get(key)
    }

    /// Number of undecided writes.
    pub fn in_doubt(&self) -> usize {
        self.pending.len()
    }

    /// Most recently persisted record.
    pub fn last_entry(&self) -> Option<&LogRecord> {
        self.last.as_ref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a single entry and the number of bytes it took.
    fn read_entry<R: Read>(reader: &mut R) -> Result<Option<(LogEntry, usize)>> {
        // Read magic
        let mut magic = [0u8; 4];
        match reader.read_exact(&mut magic) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        if magic != LOG_MAGIC {
            return Err(Error::Log("Invalid log magic".into()));
        }

        let mut seq_bytes = [0u8; 8];
        reader.read_exact(&mut seq_bytes)?;
        let sequence = u64::from_le_bytes(seq_bytes);

        let mut op = [0u8; 1];
        reader.read_exact(&mut op)?;

        let mut key_len_bytes = [0u8; 4];
        reader.read_exact(&mut key_len_bytes)?;
        let key_len = u32::from_le_bytes(key_len_bytes) as usize;

        let mut val_len_bytes = [0u8; 4];
        reader.read_exact(&mut val_len_bytes)?;
        let val_len = u32::from_le_bytes(val_len_bytes) as usize;

        if key_len > crate::common::MAX_KEY_LEN || val_len > crate::common::MAX_VALUE_LEN {
            return Err(Error::Log("Record length out of range".into()));
        }

        let mut key_bytes = vec![0u8; key_len];
        reader.read_exact(&mut key_bytes)?;

        let mut val_bytes = vec![0u8; val_len];
        reader.read_exact(&mut val_bytes)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);

        let computed = checksum(sequence, op[0], &key_bytes, &val_bytes);
        if computed != stored_checksum {
            return Err(Error::Log("Checksum mismatch".into()));
        }

        let key = String::from_utf8(key_bytes)
            .map_err(|_| Error::Log("Invalid UTF-8 in key".into()))?;

        let record = match op[0] {
            OP_PUT => LogRecord::Put {
                key,
                value: String::from_utf8(val_bytes)
                    .map_err(|_| Error::Log("Invalid UTF-8 in value".into()))?,
            },
            OP_DEL => LogRecord::Del { key },
            OP_COMMIT => LogRecord::Commit { key },
            OP_ABORT => LogRecord::Abort { key },
            other => return Err(Error::Log(format!("Unknown op code: {}", other))),
        };

        Ok(Some((
            LogEntry { sequence, record },
            FRAME_OVERHEAD + key_len + val_len,
        )))
    }
}

fn checksum(sequence: u64, op: u8, key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&sequence.to_le_bytes());
    hasher.update(&[op]);
    hasher.update(&(key.len() as u32).to_le_bytes());
    hasher.update(&(value.len() as u32).to_le_bytes());
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

fn encode_frame(sequence: u64, op: u8, key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_OVERHEAD + key.len() + value.len());
    frame.extend_from_slice(&LOG_MAGIC);
    frame.extend_from_slice(&sequence.to_le_bytes());
    frame.push(op);
    frame.extend_from_slice(&(key.len() as u32).to_le_bytes());
    frame.extend_from_slice(&(value.len() as u32).to_le_bytes());
    frame.extend_from_slice(key);
    frame.extend_from_slice(value);
    frame.extend_from_slice(&checksum(sequence, op, key, value).to_le_bytes());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::MemStore;
    use tempfile::tempdir;

    fn put(k: &str, v: &str) -> LogRecord {
        LogRecord::Put {
            key: k.into(),
            value: v.into(),
        }
    }
    fn del(k: &str) -> LogRecord {
        LogRecord::Del { key: k.into() }
    }
    fn commit(k: &str) -> LogRecord {
        LogRecord::Commit { key: k.into() }
    }
    fn abort(k: &str) -> LogRecord {
        LogRecord::Abort { key: k.into() }
    }

    #[test]
    fn test_replay_applies_committed_only() {
        let store = MemStore::new();
        let records = vec![
            put("a", "1"),
            commit("a"),
            put("b", "2"),
            abort("b"),
            put("c", "3"),
            commit("c"),
            del("a"),
            commit("a"),
        ];
        let pending = replay(&records, &store).unwrap();

        assert!(pending.is_empty());
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.get("b").unwrap(), None);
        assert_eq!(store.get("c").unwrap().as_deref(), Some("3"));
    }

    #[test]
    fn test_replay_leaves_trailing_write_in_doubt() {
        let store = MemStore::new();
        let records = vec![put("a", "1"), commit("a"), put("a", "2")];
        let pending = replay(&records, &store).unwrap();

        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(pending.get("a"), Some(&put("a", "2")));
    }

    #[test]
    fn test_replay_interleaved_keys() {
        let store = MemStore::new();
        let records = vec![put("a", "1"), put("b", "2"), abort("a"), commit("b")];
        replay(&records, &store).unwrap();

        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.get("b").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_reopen_rebuilds_six_commits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replica.log");

        {
            let mut log = RecoveryLog::open(&path, &MemStore::new()).unwrap();
            for i in 0..6 {
                let key = format!("key{}", i);
                log.prepare(put(&key, &format!("value{}", i))).unwrap();
                assert!(log.commit(&key).unwrap().is_some());
            }
            assert_eq!(log.last_entry(), Some(&commit("key5")));
        }

        let store = MemStore::new();
        let log = RecoveryLog::open(&path, &store).unwrap();
        assert_eq!(store.len(), 6);
        for i in 0..6 {
            assert_eq!(
                store.get(&format!("key{}", i)).unwrap(),
                Some(format!("value{}", i))
            );
        }
        assert_eq!(log.in_doubt(), 0);
    }

    #[test]
    fn test_reopen_with_in_doubt_put() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replica.log");

        {
            let mut log = RecoveryLog::open(&path, &MemStore::new()).unwrap();
            log.prepare(put("x", "1")).unwrap();
            log.commit("x").unwrap();
            log.prepare(put("x", "2")).unwrap();
        }

        let store = MemStore::new();
        let mut log = RecoveryLog::open(&path, &store).unwrap();
        assert_eq!(store.get("x").unwrap().as_deref(), Some("1"));
        assert_eq!(log.pending("x"), Some(&put("x", "2")));

        // The redelivered decision still applies the prepared write.
        let write = log.commit("x").unwrap().unwrap();
        write.apply_to(&store).unwrap();
        assert_eq!(store.get("x").unwrap().as_deref(), Some("2"));

        let store = MemStore::new();
        RecoveryLog::open(&path, &store).unwrap();
        assert_eq!(store.get("x").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_duplicate_decisions_are_noops() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replica.log");
        let mut log = RecoveryLog::open(&path, &MemStore::new()).unwrap();

        log.prepare(del("k")).unwrap();
        assert!(log.abort("k").unwrap());
        assert!(!log.abort("k").unwrap());
        assert!(log.commit("k").unwrap().is_none());

        let (entries, _) = RecoveryLog::read_entries(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].sequence, 1);
    }

    #[test]
    fn test_get_records_not_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replica.log");
        let mut log = RecoveryLog::open(&path, &MemStore::new()).unwrap();

        log.append_and_flush(&LogRecord::Get { key: "k".into() })
            .unwrap();
        assert!(log.prepare(LogRecord::Get { key: "k".into() }).is_err());

        let (entries, len) = RecoveryLog::read_entries(&path).unwrap();
        assert!(entries.is_empty());
        assert_eq!(len, 0);
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replica.log");

        {
            let mut log = RecoveryLog::open(&path, &MemStore::new()).unwrap();
            log.prepare(put("a", "1")).unwrap();
            log.commit("a").unwrap();
        }
        let intact = std::fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&LOG_MAGIC).unwrap();
            f.write_all(&[0xFF; 5]).unwrap();
        }

        let store = MemStore::new();
        {
            let mut log = RecoveryLog::open(&path, &store).unwrap();
            assert_eq!(std::fs::metadata(&path).unwrap().len(), intact);
            log.prepare(put("b", "2")).unwrap();
            log.commit("b").unwrap();
        }
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));

        let store = MemStore::new();
        RecoveryLog::open(&path, &store).unwrap();
        assert_eq!(store.get("b").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_garbage_file_is_empty_history() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replica.log");
        std::fs::write(&path, b"definitely not a log").unwrap();

        let store = MemStore::new();
        let log = RecoveryLog::open(&path, &store).unwrap();
        assert!(store.is_empty());
        assert!(log.last_entry().is_none());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }
}
