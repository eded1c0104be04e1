//! # Write-Ahead Log Hit Store
//!
//! **Crash-Safe Durable Storage**
//!
//! Every mutation is appended to the log as one transaction and fsynced
//! before the in-memory index changes:
//! - Committed transactions: replayed on open
//! - Uncommitted or torn transactions: discarded on open
//!
//! ## Guarantees
//!
//! 1. **Durability**: once a call returns `Ok`, the change is on disk
//! 2. **Atomicity**: a batch delete applies fully or not at all
//! 3. **Recovery**: on restart, incomplete transactions are rolled back.
//!    Only the tail of the file is ever cut: a damaged record with data after
//!    it fails the open and leaves the file untouched.
//! 4. **Stable ids**: ids are never reused, even after compaction
//!
//! ## Format
//!
//! ```text
//! [4 bytes: magic "HWAL"]
//! [4 bytes: version]
//! [4 bytes: next hit id]
//! [4 bytes: reserved]
//!
//! Entry format:
//! [8 bytes: LSN (Log Sequence Number)]
//! [1 byte: record type (BEGIN/INSERT/DELETE/COMMIT/ROLLBACK)]
//! [4 bytes: payload length]
//! [N bytes: payload]
//! [4 bytes: CRC32 of above]
//!
//! INSERT payload:
//! [4 bytes: hit id]
//! [4 bytes: target length][target utf-8]
//! [1 byte: hirer present][4 bytes: hirer length][hirer utf-8]   (length+bytes only if present)
//! [8 bytes: bounty in hundredths]
//! [8 bytes: placed at, unix seconds][4 bytes: subsecond nanos]
//!
//! DELETE payload:
//! [4 bytes: hit id]
//! ```
//!
//! All integers are little-endian.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use super::{HitIndex, HitStore};
use crate::bounty::Bounty;
use crate::error::{HitError, HitResult};
use crate::hit::{Hit, HitId, NewHit};

/// Magic bytes identifying a hit WAL file.
const WAL_MAGIC: &[u8; 4] = b"HWAL";

/// Current WAL format version.
const WAL_VERSION: u32 = 1;

/// Header size in bytes.
const HEADER_LEN: u64 = 16;

/// WAL record types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum RecordType {
    Begin = 1,
    Insert = 2,
    Delete = 3,
    Commit = 4,
    Rollback = 5,
}

impl RecordType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Begin),
            2 => Some(Self::Insert),
            3 => Some(Self::Delete),
            4 => Some(Self::Commit),
            5 => Some(Self::Rollback),
            _ => None,
        }
    }
}

/// A logged mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
enum WalOperation {
    Insert(Hit),
    Delete(HitId),
}

impl WalOperation {
    const fn record_type(&self) -> RecordType {
        match self {
            Self::Insert(_) => RecordType::Insert,
            Self::Delete(_) => RecordType::Delete,
        }
    }

    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Self::Insert(hit) => {
                buf.extend_from_slice(&hit.id.to_le_bytes());
                put_str(&mut buf, &hit.target_player_id);
                match &hit.hirer_player_id {
                    Some(hirer) => {
                        buf.push(1);
                        put_str(&mut buf, hirer);
                    }
                    None => buf.push(0),
                }
                buf.extend_from_slice(&hit.bounty.cents().to_le_bytes());
                buf.extend_from_slice(&hit.time_placed.timestamp().to_le_bytes());
                buf.extend_from_slice(&hit.time_placed.timestamp_subsec_nanos().to_le_bytes());
            }
            Self::Delete(id) => buf.extend_from_slice(&id.to_le_bytes()),
        }
        buf
    }

    fn deserialize(record_type: RecordType, data: &[u8]) -> Option<Self> {
        let mut cursor = ByteCursor::new(data);
        match record_type {
            RecordType::Insert => {
                let id = cursor.u32()?;
                let target_player_id = cursor.string()?;
                let hirer_player_id = match cursor.u8()? {
                    0 => None,
                    1 => Some(cursor.string()?),
                    _ => return None,
                };
                let bounty = Bounty::from_cents(cursor.u64()?).ok()?;
                let secs = cursor.i64()?;
                let nanos = cursor.u32()?;
                let time_placed: DateTime<Utc> = Utc.timestamp_opt(secs, nanos).single()?;
                Some(Self::Insert(Hit {
                    id,
                    target_player_id,
                    hirer_player_id,
                    bounty,
                    time_placed,
                }))
            }
            RecordType::Delete => Some(Self::Delete(cursor.u32()?)),
            _ => None,
        }
    }
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    // Player ids are short; a u32 length prefix is plenty.
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

/// Bounds-checked little-endian reader over a payload.
struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.take(4)?.try_into().ok()?))
    }

    fn u64(&mut self) -> Option<u64> {
        Some(u64::from_le_bytes(self.take(8)?.try_into().ok()?))
    }

    fn i64(&mut self) -> Option<i64> {
        Some(i64::from_le_bytes(self.take(8)?.try_into().ok()?))
    }

    fn string(&mut self) -> Option<String> {
        let len = self.u32()? as usize;
        String::from_utf8(self.take(len)?.to_vec()).ok()
    }
}

/// Appends one framed record to `buf`.
fn encode_record(buf: &mut Vec<u8>, lsn: u64, record_type: RecordType, payload: &[u8]) {
    let start = buf.len();
    buf.extend_from_slice(&lsn.to_le_bytes());
    buf.push(record_type as u8);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    let crc = crc32fast::hash(&buf[start..]);
    buf.extend_from_slice(&crc.to_le_bytes());
}

fn encode_header(next_id: HitId) -> [u8; HEADER_LEN as usize] {
    let mut header = [0u8; HEADER_LEN as usize];
    header[0..4].copy_from_slice(WAL_MAGIC);
    header[4..8].copy_from_slice(&WAL_VERSION.to_le_bytes());
    header[8..12].copy_from_slice(&next_id.to_le_bytes());
    header
}

/// A WAL record read back from disk.
struct WalRecord {
    lsn: u64,
    record_type: RecordType,
    payload: Vec<u8>,
}

/// Why a record could not be read.
#[derive(Debug, PartialEq, Eq)]
enum RecordFault {
    /// The record runs into the end of the file: a write cut short by a crash.
    Torn,
    /// A damaged record followed by more data.
    Corrupt {
        /// Byte offset of the damaged record.
        offset: u64,
    },
}

/// Mutable state, guarded by one mutex so write + fsync + apply is atomic.
struct WalState {
    file: File,
    /// Next LSN to assign.
    lsn: u64,
    /// File length up to the last complete transaction.
    committed_len: u64,
    index: HitIndex,
}

impl WalState {
    /// Writes `ops` as one transaction and fsyncs it.
    ///
    /// On failure the file is cut back to the last committed length, so the
    /// log never carries a half-written transaction into later appends.
    fn commit(&mut self, ops: &[WalOperation]) -> HitResult<()> {
        let mut buf = Vec::new();
        let mut lsn = self.lsn;
        encode_record(&mut buf, lsn, RecordType::Begin, &[]);
        for op in ops {
            lsn += 1;
            encode_record(&mut buf, lsn, op.record_type(), &op.serialize());
        }
        lsn += 1;
        encode_record(&mut buf, lsn, RecordType::Commit, &[]);

        let written = self
            .file
            .write_all(&buf)
            .and_then(|()| self.file.flush())
            .and_then(|()| self.file.sync_data());

        if let Err(e) = written {
            if let Err(trunc) = self.file.set_len(self.committed_len) {
                warn!("WAL rollback truncate failed: {}", trunc);
            }
            return Err(HitError::io("WAL commit failed", &e));
        }

        self.lsn = lsn + 1;
        self.committed_len += buf.len() as u64;
        Ok(())
    }
}

/// Hit store backed by an append-only write-ahead log.
pub struct WalHitStore {
    /// Path to the WAL file.
    path: PathBuf,
    state: Mutex<WalState>,
}

impl std::fmt::Debug for WalHitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalHitStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl WalHitStore {
    /// Opens or creates a WAL file and replays committed transactions.
    ///
    /// # Errors
    ///
    /// Returns `HitError::Persistence` if the file cannot be opened or its
    /// header is not a hit WAL.
    pub fn open(path: impl AsRef<Path>) -> HitResult<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| HitError::io("failed to open WAL", &e))?;

        let len = file
            .metadata()
            .map_err(|e| HitError::io("failed to read WAL metadata", &e))?
            .len();

        if len == 0 {
            file.write_all(&encode_header(1))
                .and_then(|()| file.sync_data())
                .map_err(|e| HitError::io("failed to write WAL header", &e))?;
        }

        let file_len = file
            .metadata()
            .map_err(|e| HitError::io("failed to read WAL metadata", &e))?
            .len();

        let (index, lsn, committed_len) = Self::recover(&path, file_len)?;

        if file_len > committed_len {
            warn!(
                "WAL recovery: discarding {} bytes of uncommitted tail in {}",
                file_len - committed_len,
                path.display()
            );
            file.set_len(committed_len)
                .map_err(|e| HitError::io("failed to truncate WAL tail", &e))?;
        }

        info!("Opened hit WAL {} with {} active hits", path.display(), index.len());

        Ok(Self {
            path,
            state: Mutex::new(WalState {
                file,
                lsn,
                committed_len,
                index,
            }),
        })
    }

    /// Path to the WAL file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of active hits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    /// Returns true if no hits are active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrites the log as a single snapshot of the active hits.
    ///
    /// The snapshot goes to a sibling temp file which then atomically
    /// replaces the log. The append handle is opened on the temp file before
    /// the rename, so once the log is replaced nothing else can fail.
    ///
    /// # Errors
    ///
    /// Returns `HitError::Persistence` on IO failure; the old log and its
    /// handle stay in use.
    pub fn compact(&self) -> HitResult<()> {
        let mut state = self.state.lock();

        let hits = state.index.all();
        let mut buf = encode_header(state.index.next_id()).to_vec();
        let mut lsn = 0u64;
        if !hits.is_empty() {
            encode_record(&mut buf, lsn, RecordType::Begin, &[]);
            for hit in hits {
                lsn += 1;
                let op = WalOperation::Insert(hit);
                encode_record(&mut buf, lsn, op.record_type(), &op.serialize());
            }
            lsn += 1;
            encode_record(&mut buf, lsn, RecordType::Commit, &[]);
            lsn += 1;
        }

        let tmp_path = self.path.with_extension("compact.tmp");
        let replace = || -> std::io::Result<File> {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&buf)?;
            tmp.sync_all()?;
            let handle = OpenOptions::new().read(true).append(true).open(&tmp_path)?;
            fs::rename(&tmp_path, &self.path)?;
            Ok(handle)
        };
        let file = match replace() {
            Ok(file) => file,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(HitError::io("WAL compaction failed", &e));
            }
        };

        state.file = file;
        state.lsn = lsn;
        state.committed_len = buf.len() as u64;

        info!(
            "Compacted hit WAL {} to {} bytes",
            self.path.display(),
            state.committed_len
        );
        Ok(())
    }

    /// Replays committed transactions.
    ///
    /// Returns the rebuilt index, the next LSN, and the file length up to the
    /// last complete transaction. Fails on a damaged record that is not at
    /// the tail, since everything after it would be lost.
    fn recover(path: &Path, file_len: u64) -> HitResult<(HitIndex, u64, u64)> {
        let file = File::open(path).map_err(|e| HitError::io("failed to open WAL for recovery", &e))?;
        let mut reader = BufReader::new(file);

        let mut header = [0u8; HEADER_LEN as usize];
        reader
            .read_exact(&mut header)
            .map_err(|e| HitError::io("failed to read WAL header", &e))?;
        if &header[0..4] != WAL_MAGIC {
            return Err(HitError::Persistence("invalid WAL magic".to_string()));
        }
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != WAL_VERSION {
            return Err(HitError::Persistence(format!("unsupported WAL version: {version}")));
        }
        let next_id = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);

        let mut index = HitIndex::new(next_id);
        let mut pending: Option<Vec<WalOperation>> = None;
        let mut next_lsn = 0u64;
        let mut pos = HEADER_LEN;
        let mut committed_len = HEADER_LEN;
        let mut discarded = 0usize;

        loop {
            let (record, size) = match Self::read_record(&mut reader, pos, file_len) {
                Ok(Some(read)) => read,
                Ok(None) | Err(RecordFault::Torn) => break,
                Err(RecordFault::Corrupt { offset }) => {
                    return Err(HitError::Persistence(format!(
                        "corrupt WAL record at byte {offset} of {} with committed data after it",
                        path.display()
                    )));
                }
            };
            let offset = pos;
            pos += size;
            next_lsn = next_lsn.max(record.lsn + 1);

            match record.record_type {
                RecordType::Begin => {
                    if pending.replace(Vec::new()).is_some() {
                        discarded += 1;
                    }
                }
                RecordType::Insert | RecordType::Delete => {
                    let Some(op) = WalOperation::deserialize(record.record_type, &record.payload) else {
                        // The CRC matched, so this is not a torn write.
                        return Err(HitError::Persistence(format!(
                            "undecodable WAL record at byte {offset} of {}",
                            path.display()
                        )));
                    };
                    if let Some(ops) = pending.as_mut() {
                        ops.push(op);
                    }
                }
                RecordType::Commit => {
                    for op in pending.take().unwrap_or_default() {
                        match op {
                            WalOperation::Insert(hit) => index.insert(hit),
                            WalOperation::Delete(id) => {
                                index.remove(id);
                            }
                        }
                    }
                    committed_len = pos;
                }
                RecordType::Rollback => {
                    pending = None;
                    committed_len = pos;
                }
            }
        }

        if pending.is_some() {
            discarded += 1;
        }
        if discarded > 0 {
            warn!("WAL recovery: {} uncommitted transactions rolled back", discarded);
        }

        Ok((index, next_lsn, committed_len))
    }

    /// Reads the record starting at byte `offset`.
    ///
    /// Returns `Ok(None)` at a clean end of file. A bad record that ends
    /// exactly at `file_len`, or claims to run past it, is `Torn`; any other
    /// bad record is `Corrupt`.
    fn read_record(
        reader: &mut BufReader<File>,
        offset: u64,
        file_len: u64,
    ) -> Result<Option<(WalRecord, u64)>, RecordFault> {
        if offset >= file_len {
            return Ok(None);
        }

        let mut fixed = [0u8; 13];
        reader.read_exact(&mut fixed).map_err(|_| RecordFault::Torn)?;
        let lsn = u64::from_le_bytes([
            fixed[0], fixed[1], fixed[2], fixed[3], fixed[4], fixed[5], fixed[6], fixed[7],
        ]);
        let payload_len = u32::from_le_bytes([fixed[9], fixed[10], fixed[11], fixed[12]]);

        let size = fixed.len() as u64 + u64::from(payload_len) + 4;
        let end = offset + size;
        if end > file_len {
            return Err(RecordFault::Torn);
        }
        let damaged = || {
            if end == file_len {
                RecordFault::Torn
            } else {
                RecordFault::Corrupt { offset }
            }
        };

        let mut payload = vec![0u8; payload_len as usize];
        reader.read_exact(&mut payload).map_err(|_| RecordFault::Torn)?;
        let mut crc_bytes = [0u8; 4];
        reader.read_exact(&mut crc_bytes).map_err(|_| RecordFault::Torn)?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&fixed);
        hasher.update(&payload);
        if hasher.finalize() != u32::from_le_bytes(crc_bytes) {
            warn!("WAL recovery: CRC mismatch at byte {} (LSN {})", offset, lsn);
            return Err(damaged());
        }
        let Some(record_type) = RecordType::from_u8(fixed[8]) else {
            return Err(damaged());
        };

        Ok(Some((
            WalRecord {
                lsn,
                record_type,
                payload,
            },
            size,
        )))
    }
}

impl HitStore for WalHitStore {
    fn add(&self, hit: NewHit) -> HitResult<Hit> {
        let mut state = self.state.lock();
        let stored = hit.with_id(state.index.allocate_id()?);
        state.commit(&[WalOperation::Insert(stored.clone())])?;
        state.index.insert(stored.clone());
        Ok(stored)
    }

    fn remove(&self, id: HitId) -> HitResult<Option<Hit>> {
        let mut state = self.state.lock();
        if state.index.get(id).is_none() {
            return Ok(None);
        }
        state.commit(&[WalOperation::Delete(id)])?;
        Ok(state.index.remove(id))
    }

    fn remove_all(&self, ids: &[HitId]) -> HitResult<Vec<Hit>> {
        let mut state = self.state.lock();
        let existing = state.index.existing(ids);
        if existing.is_empty() {
            return Ok(Vec::new());
        }

        let ops: Vec<_> = existing.iter().copied().map(WalOperation::Delete).collect();
        state.commit(&ops)?;
        Ok(existing
            .into_iter()
            .filter_map(|id| state.index.remove(id))
            .collect())
    }

    fn find_by_target(&self, target_player_id: &str) -> HitResult<Vec<Hit>> {
        Ok(self.state.lock().index.by_target(target_player_id))
    }

    fn find_older_than(&self, cutoff: DateTime<Utc>) -> HitResult<Vec<Hit>> {
        Ok(self.state.lock().index.older_than(cutoff))
    }

    fn list_all(&self) -> HitResult<Vec<Hit>> {
        Ok(self.state.lock().index.all())
    }
}
