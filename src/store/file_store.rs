//! Single-file, log-structured backend
//!
//! File format:
//! ```text
//! [HEADER: 64 bytes]
//!   - magic: 8 bytes ("MRKLTREE")
//!   - version: 4 bytes (u32 LE)
//!   - flags: 4 bytes
//!   - reserved: 48 bytes
//!
//! [RECORDS: variable]
//!   - body_len: 4 bytes (u32 LE)
//!   - checksum: 32 bytes (BLAKE3 of body)
//!   - body: repeated (entry_len u32 LE, bincode LogEntry)
//! ```
//!
//! One record is written per [`WriteBatch`]. On open the log is replayed into
//! an in-memory index; a trailing record that is incomplete or fails its
//! checksum was never acknowledged and is cut off, so batches are atomic.

use super::backend::{BatchOp, Column, TreeBackend, WriteBatch};
use super::value;
use crate::config::Config;
use crate::{Error, Result, MAGIC, VERSION};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const HEADER_SIZE: u64 = 64;
const RECORD_HEADER_SIZE: u64 = 4 + 32;
const ENTRY_LEN_SIZE: u64 = 4;
const DB_FILE: &str = "tree.db";
const COMPACT_FILE: &str = "tree.db.compact";
/// Upper bound on a single record body written during compaction
const COMPACT_RECORD_BYTES: usize = 4 * 1024 * 1024;

/// One logged mutation; `value: None` is a delete
#[derive(Serialize, Deserialize)]
struct LogEntry {
    column: Column,
    key: String,
    value: Option<Vec<u8>>,
}

/// Location of a live entry's serialized bytes
#[derive(Clone, Copy, Debug)]
struct IndexEntry {
    offset: u64,
    size: u32,
}

type IndexKey = (Column, String);

struct Inner {
    file: File,
    index: HashMap<IndexKey, IndexEntry>,
    /// End of the last valid record
    write_offset: u64,
    /// Sum of the sizes of all live entries
    live_bytes: u64,
}

impl Inner {
    fn apply(&mut self, entry: LogEntry, location: IndexEntry) {
        let key = (entry.column, entry.key);
        let previous = if entry.value.is_some() {
            self.index.insert(key, location)
        } else {
            self.index.remove(&key)
        };
        if let Some(prev) = previous {
            self.live_bytes -= prev.size as u64;
        }
        if entry.value.is_some() {
            self.live_bytes += location.size as u64;
        }
    }

    fn read_entry(&mut self, entry: IndexEntry) -> Result<Vec<u8>> {
        self.file
            .seek(SeekFrom::Start(entry.offset))
            .map_err(|e| Error::storage("seeking to entry", e))?;
        let mut data = vec![0u8; entry.size as usize];
        self.file
            .read_exact(&mut data)
            .map_err(|e| Error::storage("reading entry", e))?;
        Ok(data)
    }

    fn dead_bytes(&self) -> u64 {
        self.write_offset - HEADER_SIZE - self.live_bytes
    }
}

/// A tree's three collections backed by a single append-only file
pub struct FileStore {
    path: PathBuf,
    sync_writes: bool,
    compression_threshold: usize,
    compression_level: i32,
    compaction_min_bytes: u64,
    inner: Mutex<Inner>,
}

impl FileStore {
    /// Open the store in `dir`, creating the directory and file if needed
    pub fn open(dir: impl AsRef<Path>, config: &Config) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::storage(format!("creating {}", dir.display()), e))?;

        let path = dir.join(DB_FILE);
        let inner = if path.exists() {
            Self::open_existing(&path)?
        } else {
            Self::create_file(&path)?
        };

        log::debug!(
            "Opened {} ({} live entries, {} bytes)",
            path.display(),
            inner.index.len(),
            inner.write_offset
        );

        Ok(FileStore {
            path,
            sync_writes: config.sync_writes,
            compression_threshold: config.compression_threshold,
            compression_level: config.compression_level,
            compaction_min_bytes: config.compaction_min_bytes,
            inner: Mutex::new(inner),
        })
    }

    fn create_file(path: &Path) -> Result<Inner> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| Error::storage(format!("creating {}", path.display()), e))?;

        write_header(&mut file).map_err(|e| Error::storage("writing header", e))?;

        Ok(Inner {
            file,
            index: HashMap::new(),
            write_offset: HEADER_SIZE,
            live_bytes: 0,
        })
    }

    fn open_existing(path: &Path) -> Result<Inner> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::storage(format!("opening {}", path.display()), e))?;

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)
            .map_err(|_| Error::Corruption(format!("{}: truncated header", path.display())))?;

        if &header[0..8] != MAGIC {
            return Err(Error::Corruption("Invalid magic bytes".into()));
        }

        let version = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        if version != VERSION {
            return Err(Error::Corruption(format!(
                "Version mismatch: expected {}, found {}",
                VERSION, version
            )));
        }

        let file_len = file
            .metadata()
            .map_err(|e| Error::storage("reading file length", e))?
            .len();

        let mut inner = Inner {
            file,
            index: HashMap::new(),
            write_offset: HEADER_SIZE,
            live_bytes: 0,
        };
        replay(&mut inner, file_len)?;

        if inner.write_offset < file_len {
            log::warn!(
                "Discarding {} bytes of incomplete log tail in {}",
                file_len - inner.write_offset,
                path.display()
            );
            inner
                .file
                .set_len(inner.write_offset)
                .map_err(|e| Error::storage("truncating log tail", e))?;
            inner
                .file
                .sync_all()
                .map_err(|e| Error::storage("syncing truncated log", e))?;
        }

        Ok(inner)
    }

    /// Number of live entries in a collection
    pub fn len(&self, column: Column) -> usize {
        let inner = self.inner.lock();
        inner.index.keys().filter(|(c, _)| *c == column).count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().index.is_empty()
    }

    /// Current size of the log file in bytes
    pub fn file_size(&self) -> u64 {
        self.inner.lock().write_offset
    }

    /// Rewrite the log keeping only live entries
    pub fn compact(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.compact_locked(&mut inner)
    }

    fn compact_locked(&self, inner: &mut Inner) -> Result<()> {
        let before = inner.write_offset;
        let tmp_path = self.path.with_file_name(COMPACT_FILE);

        let mut tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| Error::storage("creating compaction file", e))?;
        write_header(&mut tmp).map_err(|e| Error::storage("writing header", e))?;

        // Sorted for a deterministic layout
        let mut live: Vec<(IndexKey, IndexEntry)> =
            inner.index.iter().map(|(k, v)| (k.clone(), *v)).collect();
        live.sort_by(|(a, _), (b, _)| (a.0.name(), &a.1).cmp(&(b.0.name(), &b.1)));

        let mut new_index = HashMap::with_capacity(live.len());
        let mut offset = HEADER_SIZE;
        let mut body = Vec::new();
        let mut pending = Vec::new();

        for (key, entry) in live {
            let bytes = inner.read_entry(entry)?;
            pending.push((key, body.len() as u64 + ENTRY_LEN_SIZE, entry.size));
            body.extend_from_slice(&entry.size.to_le_bytes());
            body.extend_from_slice(&bytes);

            if body.len() >= COMPACT_RECORD_BYTES {
                offset = flush_compacted(&mut tmp, offset, &mut body, &mut pending, &mut new_index)?;
            }
        }
        if !body.is_empty() {
            offset = flush_compacted(&mut tmp, offset, &mut body, &mut pending, &mut new_index)?;
        }

        tmp.sync_all()
            .map_err(|e| Error::storage("syncing compaction file", e))?;
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| Error::storage("replacing log with compacted copy", e))?;

        inner.file = tmp;
        inner.index = new_index;
        inner.write_offset = offset;
        inner.live_bytes = inner.index.values().map(|e| e.size as u64).sum();

        log::info!(
            "Compacted {} from {} to {} bytes",
            self.path.display(),
            before,
            offset
        );
        Ok(())
    }

    fn should_compact(&self, inner: &Inner) -> bool {
        inner.write_offset > self.compaction_min_bytes && inner.dead_bytes() > inner.live_bytes
    }
}

impl TreeBackend for FileStore {
    fn get(&self, column: Column, key: &str) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock();
        let entry = match inner.index.get(&(column, key.to_string())) {
            Some(entry) => *entry,
            None => return Ok(None),
        };

        let bytes = inner.read_entry(entry)?;
        let logged: LogEntry = bincode::deserialize(&bytes)
            .map_err(|e| Error::Corruption(format!("Undecodable entry for {}: {}", key, e)))?;
        let stored = logged
            .value
            .ok_or_else(|| Error::Corruption(format!("Index points at a delete for {}", key)))?;

        value::unpack(&stored).map(Some)
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut body = Vec::new();
        let mut entries = Vec::with_capacity(batch.len());
        for op in batch.into_ops() {
            let entry = match op {
                BatchOp::Put { column, key, value } => LogEntry {
                    column,
                    key,
                    value: Some(value::pack(
                        &value,
                        self.compression_threshold,
                        self.compression_level,
                    )?),
                },
                BatchOp::Delete { column, key } => LogEntry {
                    column,
                    key,
                    value: None,
                },
            };
            let bytes = bincode::serialize(&entry)?;
            let size = u32::try_from(bytes.len())
                .map_err(|_| Error::InvalidArgument(format!("entry for {} is too large", entry.key)))?;
            entries.push((entry, body.len() as u64 + ENTRY_LEN_SIZE, size));
            body.extend_from_slice(&size.to_le_bytes());
            body.extend_from_slice(&bytes);
        }

        let body_len = u32::try_from(body.len())
            .map_err(|_| Error::InvalidArgument("batch is too large for one record".into()))?;
        let checksum = blake3::hash(&body);

        let mut record = Vec::with_capacity(RECORD_HEADER_SIZE as usize + body.len());
        record.extend_from_slice(&body_len.to_le_bytes());
        record.extend_from_slice(checksum.as_bytes());
        record.extend_from_slice(&body);

        let mut inner = self.inner.lock();
        let start = inner.write_offset;
        if let Err(e) = append_record(&mut inner.file, start, &record, self.sync_writes) {
            // Replay would stop at a partial record anyway; trimming it keeps
            // the next append contiguous with the last good one.
            let _ = inner.file.set_len(start);
            return Err(Error::storage("appending batch record", e));
        }

        let body_start = start + RECORD_HEADER_SIZE;
        for (entry, rel, size) in entries {
            inner.apply(
                entry,
                IndexEntry {
                    offset: body_start + rel,
                    size,
                },
            );
        }
        inner.write_offset = start + record.len() as u64;

        // The batch is already durable; a failed compaction only wastes space
        if self.should_compact(&inner) {
            if let Err(e) = self.compact_locked(&mut inner) {
                log::warn!("Compaction of {} failed: {}", self.path.display(), e);
            }
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner
            .file
            .set_len(HEADER_SIZE)
            .map_err(|e| Error::storage("truncating log", e))?;
        inner
            .file
            .sync_all()
            .map_err(|e| Error::storage("syncing cleared log", e))?;
        inner.index.clear();
        inner.write_offset = HEADER_SIZE;
        inner.live_bytes = 0;
        Ok(())
    }
}

fn write_header(file: &mut File) -> std::io::Result<()> {
    let mut header = [0u8; HEADER_SIZE as usize];
    header[0..8].copy_from_slice(MAGIC);
    header[8..12].copy_from_slice(&VERSION.to_le_bytes());
    // flags: 0
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header)?;
    file.sync_all()
}

fn append_record(file: &mut File, offset: u64, record: &[u8], sync: bool) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(record)?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}

/// Rebuild the index from the log. Leaves `write_offset` at the end of the
/// last intact record.
fn replay(inner: &mut Inner, file_len: u64) -> Result<()> {
    let mut offset = HEADER_SIZE;

    while offset + RECORD_HEADER_SIZE <= file_len {
        inner
            .file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| Error::storage("seeking during replay", e))?;

        let mut record_header = [0u8; RECORD_HEADER_SIZE as usize];
        inner
            .file
            .read_exact(&mut record_header)
            .map_err(|e| Error::storage("reading record header", e))?;
        let body_len = u32::from_le_bytes([
            record_header[0],
            record_header[1],
            record_header[2],
            record_header[3],
        ]) as u64;

        let body_start = offset + RECORD_HEADER_SIZE;
        if body_start + body_len > file_len {
            break;
        }

        let mut body = vec![0u8; body_len as usize];
        inner
            .file
            .read_exact(&mut body)
            .map_err(|e| Error::storage("reading record body", e))?;
        if blake3::hash(&body).as_bytes()[..] != record_header[4..] {
            break;
        }

        let mut pos = 0usize;
        while pos < body.len() {
            let len_bytes = body
                .get(pos..pos + ENTRY_LEN_SIZE as usize)
                .ok_or_else(|| Error::Corruption(format!("Truncated entry at {}", body_start)))?;
            let size = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]);
            let entry_start = pos + ENTRY_LEN_SIZE as usize;
            let bytes = body
                .get(entry_start..entry_start + size as usize)
                .ok_or_else(|| Error::Corruption(format!("Entry overruns record at {}", body_start)))?;
            let entry: LogEntry = bincode::deserialize(bytes)
                .map_err(|e| Error::Corruption(format!("Undecodable log entry: {}", e)))?;

            inner.apply(
                entry,
                IndexEntry {
                    offset: body_start + entry_start as u64,
                    size,
                },
            );
            pos = entry_start + size as usize;
        }

        offset = body_start + body_len;
    }

    inner.write_offset = offset;
    Ok(())
}

/// Write one compacted record and register its entries in `index`.
/// Returns the offset following the record.
fn flush_compacted(
    file: &mut File,
    offset: u64,
    body: &mut Vec<u8>,
    pending: &mut Vec<(IndexKey, u64, u32)>,
    index: &mut HashMap<IndexKey, IndexEntry>,
) -> Result<u64> {
    let checksum = blake3::hash(body);
    let mut record = Vec::with_capacity(RECORD_HEADER_SIZE as usize + body.len());
    record.extend_from_slice(&(body.len() as u32).to_le_bytes());
    record.extend_from_slice(checksum.as_bytes());
    record.extend_from_slice(body);

    append_record(file, offset, &record, false)
        .map_err(|e| Error::storage("writing compacted record", e))?;

    let body_start = offset + RECORD_HEADER_SIZE;
    for (key, rel, size) in pending.drain(..) {
        index.insert(
            key,
            IndexEntry {
                offset: body_start + rel,
                size,
            },
        );
    }
    body.clear();
    Ok(offset + record.len() as u64)
}
