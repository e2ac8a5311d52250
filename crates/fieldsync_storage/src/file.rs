//! File-based storage backend for persistent storage.

use crate::backend::StorageBackend;
use crate::batch::{BatchOp, WriteBatch};
use crate::error::{StorageError, StorageResult};
use crate::memory::{apply_ops, check_tables, preconditions_hold, scan_rows, Tables};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Leading bytes of every log file.
const MAGIC: &[u8; 8] = b"FSYNCLOG";

/// Log format version, stored in the base frame.
const LOG_VERSION: u32 = 1;

/// Size of the little-endian length in front of each frame.
const LEN_PREFIX: usize = 4;

#[derive(Deserialize)]
enum Frame {
    Base { version: u32, tables: Tables },
    Ops(Vec<BatchOp>),
}

#[derive(Serialize)]
enum FrameRef<'a> {
    Base { version: u32, tables: &'a Tables },
    Ops(&'a [BatchOp]),
}

fn encode_frame(frame: &FrameRef<'_>) -> StorageResult<Vec<u8>> {
    let mut body = Vec::new();
    ciborium::ser::into_writer(frame, &mut body).map_err(|e| StorageError::Codec(e.to_string()))?;
    let len = u32::try_from(body.len())
        .map_err(|_| StorageError::Codec(format!("log frame of {} bytes is too large", body.len())))?;

    let mut out = Vec::with_capacity(LEN_PREFIX + body.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// State rebuilt from a log file.
struct Replay {
    tables: Tables,
    frames: usize,
    /// Bytes up to the end of the last complete frame.
    valid_len: usize,
}

fn replay(path: &Path, bytes: &[u8]) -> StorageResult<Replay> {
    let corrupted = |detail: String| StorageError::Corrupted(format!("{}: {}", path.display(), detail));

    let Some(mut rest) = bytes.strip_prefix(MAGIC.as_slice()) else {
        return Err(corrupted("not a fieldsync log".to_string()));
    };
    let mut tables: Option<Tables> = None;
    let mut frames = 0;
    let mut offset = MAGIC.len();

    while rest.len() >= LEN_PREFIX {
        let (prefix, body) = rest.split_at(LEN_PREFIX);
        let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if body.len() < len {
            break;
        }
        let (raw, tail) = body.split_at(len);
        let frame: Frame = ciborium::de::from_reader(raw)
            .map_err(|e| corrupted(format!("frame at byte {offset}: {e}")))?;

        match frame {
            Frame::Base { version, tables: base } => {
                if tables.is_some() {
                    return Err(corrupted(format!("second base frame at byte {offset}")));
                }
                if version != LOG_VERSION {
                    return Err(corrupted(format!("unsupported log version {version}")));
                }
                tables = Some(base);
            }
            Frame::Ops(ops) => {
                let Some(current) = tables.as_mut() else {
                    return Err(corrupted("log does not start with a base frame".to_string()));
                };
                apply_ops(
                    current,
                    WriteBatch {
                        preconditions: Vec::new(),
                        ops,
                    },
                );
            }
        }

        frames += 1;
        offset += LEN_PREFIX + len;
        rest = tail;
    }

    let tables = tables.ok_or_else(|| corrupted("log has no base frame".to_string()))?;
    Ok(Replay {
        tables,
        frames,
        valid_len: offset,
    })
}

/// Writes a log holding only a base frame for `tables` and opens it for
/// appending.
fn write_base(path: &Path, tables: &Tables) -> StorageResult<File> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(MAGIC)?;
        file.write_all(&encode_frame(&FrameRef::Base {
            version: LOG_VERSION,
            tables,
        })?)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(OpenOptions::new().append(true).open(path)?)
}

#[derive(Debug)]
struct State {
    tables: Tables,
    log: File,
    log_len: u64,
    batches: usize,
}

impl State {
    fn append(&mut self, frame: &[u8]) -> StorageResult<()> {
        if let Err(e) = self.log.write_all(frame) {
            // Keep the next frame aligned on the last complete one
            if let Err(trim) = self.log.set_len(self.log_len) {
                tracing::warn!(error = %trim, "failed to trim partial log frame");
            }
            return Err(e.into());
        }
        self.log_len += frame.len() as u64;
        self.batches += 1;
        Ok(())
    }
}

/// A file-based storage backend.
///
/// All tables are held in memory. The file is an append-only log: a base
/// frame with the whole store, then one CBOR frame per applied batch.
/// Opening the file replays the log and compacts it back to a single base
/// frame, so a write costs the size of its own batch rather than the size
/// of the store. Data survives process restarts.
///
/// # Durability
///
/// - Each batch is appended to the OS before `apply` returns
/// - `flush()` calls `File::sync_all()` on the log
/// - A frame torn by a crash is dropped on the next open; every complete
///   frame before it is kept
/// - Compaction writes `<path>.tmp` and renames it over `<path>`
///
/// # Thread Safety
///
/// This backend is thread-safe. Open it once per physical store and share
/// the handle; two handles on one path do not see each other's writes.
///
/// # Example
///
/// ```no_run
/// use fieldsync_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("fieldsync.db")).unwrap();
/// backend.put("surveys", "s-1", b"row".to_vec()).unwrap();
/// backend.flush().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    state: RwLock<State>,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or is not a
    /// valid log, or if compaction fails.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let (tables, frames, torn) = if path.exists() {
            let bytes = fs::read(path)?;
            let replayed = replay(path, &bytes)?;
            (replayed.tables, replayed.frames, bytes.len() - replayed.valid_len)
        } else {
            (Tables::new(), 0, 0)
        };

        if torn > 0 {
            tracing::warn!(path = %path.display(), torn_bytes = torn, "discarding incomplete log frame");
        }
        let log = if frames == 1 && torn == 0 {
            OpenOptions::new().append(true).open(path)?
        } else {
            write_base(path, &tables)?
        };
        let log_len = log.metadata()?.len();

        tracing::debug!(
            path = %path.display(),
            tables = tables.len(),
            replayed = frames.saturating_sub(1),
            "opened file backend"
        );

        Ok(Self {
            path: path.to_path_buf(),
            state: RwLock::new(State {
                tables,
                log,
                log_len,
                batches: 0,
            }),
        })
    }

    /// Opens or creates a file backend, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or file cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Batches appended since the log was last compacted.
    pub fn logged_batches(&self) -> usize {
        self.state.read().batches
    }

    /// Rewrites the log as a single base frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the new log cannot be written. The old log is
    /// left in place in that case.
    pub fn compact(&self) -> StorageResult<()> {
        let mut state = self.state.write();
        let log = write_base(&self.path, &state.tables)?;
        state.log_len = log.metadata()?.len();
        state.log = log;
        tracing::debug!(path = %self.path.display(), batches = state.batches, "log compacted");
        state.batches = 0;
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, table: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .state
            .read()
            .tables
            .get(table)
            .and_then(|rows| rows.get(key))
            .cloned())
    }

    fn scan(&self, table: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        Ok(scan_rows(&self.state.read().tables, table, ""))
    }

    fn scan_prefix(&self, table: &str, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        Ok(scan_rows(&self.state.read().tables, table, prefix))
    }

    fn apply(&self, batch: WriteBatch) -> StorageResult<bool> {
        check_tables(&batch)?;
        let mut state = self.state.write();
        if !preconditions_hold(&state.tables, &batch) {
            return Ok(false);
        }
        if batch.ops.is_empty() {
            return Ok(true);
        }
        // Log first so a failed write leaves memory untouched
        let frame = encode_frame(&FrameRef::Ops(&batch.ops))?;
        state.append(&frame)?;
        apply_ops(&mut state.tables, batch);
        Ok(true)
    }

    fn flush(&self) -> StorageResult<()> {
        self.state.read().log.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn file_len(path: &Path) -> u64 {
        fs::metadata(path).unwrap().len()
    }

    #[test]
    fn file_put_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.db");

        {
            let backend = FileBackend::open(&path).unwrap();
            backend.put("surveys", "a", vec![1, 2, 3]).unwrap();
            backend.flush().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.get("surveys", "a").unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn file_failed_precondition_is_not_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.db");

        {
            let backend = FileBackend::open(&path).unwrap();
            backend.put("t", "a", vec![1]).unwrap();
            let swapped = backend
                .compare_and_swap("t", "a", Some(vec![7]), Some(vec![2]))
                .unwrap();
            assert!(!swapped);
            assert_eq!(backend.logged_batches(), 1);
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.get("t", "a").unwrap(), Some(vec![1]));
    }

    #[test]
    fn file_open_with_create_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("store.db");

        let backend = FileBackend::open_with_create_dirs(&path).unwrap();
        backend.put("t", "k", vec![0]).unwrap();
        assert!(path.exists());
        assert_eq!(backend.path(), path.as_path());
    }

    #[test]
    fn file_corrupted_log_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.db");
        fs::write(&path, b"definitely not cbor").unwrap();

        let result = FileBackend::open(&path);
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn file_delete_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.db");

        {
            let backend = FileBackend::open(&path).unwrap();
            backend.put("t", "a", vec![1]).unwrap();
            backend.put("t", "b", vec![2]).unwrap();
            backend.delete("t", "a").unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        let rows = backend.scan("t").unwrap();
        assert_eq!(rows, vec![("b".to_string(), vec![2])]);
    }

    #[test]
    fn file_write_appends_only_its_own_batch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.db");
        let backend = FileBackend::open(&path).unwrap();

        backend.put("__assets", "photo", vec![0xAB; 64 * 1024]).unwrap();
        let after_photo = file_len(&path);
        backend.put("phrases", "p-1", vec![1]).unwrap();
        let after_row = file_len(&path);

        assert!(after_row - after_photo < 256);
        assert_eq!(backend.logged_batches(), 2);
    }

    #[test]
    fn file_reopen_replays_and_compacts_the_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.db");

        {
            let backend = FileBackend::open(&path).unwrap();
            for round in 0..20u8 {
                backend.put("t", "hot", vec![round; 512]).unwrap();
            }
            backend.put("t", "cold", vec![9]).unwrap();
            backend.flush().unwrap();
        }
        let before = file_len(&path);

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.get("t", "hot").unwrap(), Some(vec![19; 512]));
        assert_eq!(backend.get("t", "cold").unwrap(), Some(vec![9]));
        assert_eq!(backend.logged_batches(), 0);
        assert!(file_len(&path) < before);

        backend.put("t", "after", vec![3]).unwrap();
        drop(backend);
        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.scan("t").unwrap().len(), 3);
    }

    #[test]
    fn file_torn_tail_is_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.db");

        {
            let backend = FileBackend::open(&path).unwrap();
            backend.put("t", "a", vec![1]).unwrap();
        }
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&100u32.to_le_bytes()).unwrap();
            file.write_all(&[0xA1, 0x02]).unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.get("t", "a").unwrap(), Some(vec![1]));
        backend.put("t", "b", vec![2]).unwrap();
        drop(backend);

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.get("t", "b").unwrap(), Some(vec![2]));
    }

    #[test]
    fn file_undecodable_frame_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.db");

        {
            let backend = FileBackend::open(&path).unwrap();
            backend.put("t", "a", vec![1]).unwrap();
        }
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&2u32.to_le_bytes()).unwrap();
            file.write_all(&[0xFF, 0xFF]).unwrap();
        }

        let result = FileBackend::open(&path);
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn file_explicit_compaction_keeps_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.db");
        let backend = FileBackend::open(&path).unwrap();

        for i in 0..10u8 {
            backend.put("t", "k", vec![i; 256]).unwrap();
        }
        let before = file_len(&path);
        backend.compact().unwrap();

        assert!(file_len(&path) < before);
        assert_eq!(backend.logged_batches(), 0);
        backend.put("t", "k2", vec![1]).unwrap();
        drop(backend);

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.get("t", "k").unwrap(), Some(vec![9; 256]));
        assert_eq!(backend.get("t", "k2").unwrap(), Some(vec![1]));
    }
}
