//! File-based key-value backend for persistent storage.
//!
//! ## Directory Layout
//!
//! ```text
//! state_dir/
//! ├─ LOCK     # Advisory lock for single-writer
//! └─ kv.log   # Append-only JSON lines, one mutation per line
//! ```

use crate::backend::KeyValueBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const LOG_FILE: &str = "kv.log";
const LOG_TMP_FILE: &str = "kv.log.tmp";

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogEntry {
    Put { key: String, value: Vec<u8> },
    Remove { key: String },
}

/// A file-based key-value backend.
///
/// Every mutation is appended to `kv.log` and synced before the call
/// returns. On open the log is replayed into memory; reads never touch disk.
///
/// # Durability
///
/// - `put` and `remove` call `File::sync_data()` before returning
/// - A torn final line (crash mid-write) is discarded on replay
/// - Any other malformed line is reported as [`StorageError::Corrupted`]
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
/// The directory `LOCK` file keeps a second process out.
///
/// # Example
///
/// ```no_run
/// use hisaab_storage::{FileBackend, KeyValueBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("sync_state")).unwrap();
/// backend.put("last_sync_time_u1_b1", b"1700000000000").unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    log: Mutex<File>,
    _lock_file: File,
}

impl FileBackend {
    /// Opens or creates a backend in the directory at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - Another process holds the lock (returns `Locked`)
    /// - The log is corrupted before its final line
    pub fn open(path: &Path) -> StorageResult<Self> {
        fs::create_dir_all(path)?;

        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(path.display().to_string()));
        }

        let log_path = path.join(LOG_FILE);
        let (entries, torn) = replay(&log_path)?;
        if torn {
            // Appending after a partial line would fuse the two entries.
            write_snapshot(path, &entries)?;
        }

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        tracing::debug!(path = %path.display(), keys = entries.len(), "opened state directory");

        Ok(Self {
            path: path.to_path_buf(),
            entries: RwLock::new(entries),
            log: Mutex::new(log),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the state directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites the log so it holds one `Put` per live key.
    ///
    /// The new log is written to a temporary file and renamed over the old one.
    ///
    /// # Errors
    ///
    /// Returns an error if the new log cannot be written or renamed.
    pub fn compact(&self) -> StorageResult<()> {
        let entries = self.entries.read();
        let mut log = self.log.lock();

        write_snapshot(&self.path, &entries)?;
        *log = OpenOptions::new()
            .append(true)
            .open(self.path.join(LOG_FILE))?;

        tracing::debug!(keys = entries.len(), "compacted state log");
        Ok(())
    }

    fn append(&self, entry: &LogEntry) -> StorageResult<()> {
        let line = encode(entry)?;
        let mut log = self.log.lock();
        log.write_all(line.as_bytes())?;
        log.flush()?;
        log.sync_data()?;
        Ok(())
    }
}

fn encode(entry: &LogEntry) -> StorageResult<String> {
    let mut line =
        serde_json::to_string(entry).map_err(|e| StorageError::Encoding(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Writes one `Put` per entry to a fresh log and renames it into place.
fn write_snapshot(dir: &Path, entries: &BTreeMap<String, Vec<u8>>) -> StorageResult<()> {
    let tmp_path = dir.join(LOG_TMP_FILE);
    {
        let mut tmp = File::create(&tmp_path)?;
        for (key, value) in entries {
            let line = encode(&LogEntry::Put {
                key: key.clone(),
                value: value.clone(),
            })?;
            tmp.write_all(line.as_bytes())?;
        }
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, dir.join(LOG_FILE))?;
    Ok(())
}

/// Replays the log. The flag is set when a torn final line was dropped.
fn replay(log_path: &Path) -> StorageResult<(BTreeMap<String, Vec<u8>>, bool)> {
    let mut entries = BTreeMap::new();
    let mut torn = false;
    let file = match File::open(log_path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((entries, torn)),
        Err(e) => return Err(e.into()),
    };

    let lines: Vec<String> = BufReader::new(file).lines().collect::<Result<_, _>>()?;
    let last = lines.len();
    for (idx, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogEntry>(line) {
            Ok(LogEntry::Put { key, value }) => {
                entries.insert(key, value);
            }
            Ok(LogEntry::Remove { key }) => {
                entries.remove(&key);
            }
            Err(_) if idx + 1 == last => {
                tracing::warn!(line = idx + 1, "discarding torn final log entry");
                torn = true;
            }
            Err(e) => {
                return Err(StorageError::Corrupted {
                    line: idx + 1,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok((entries, torn))
}

impl KeyValueBackend for FileBackend {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.append(&LogEntry::Put {
            key: key.to_string(),
            value: value.to_vec(),
        })?;
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        if !self.entries.read().contains_key(key) {
            return Ok(false);
        }
        self.append(&LogEntry::Remove {
            key: key.to_string(),
        })?;
        Ok(self.entries.write().remove(key).is_some())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn flush(&self) -> StorageResult<()> {
        let log = self.log.lock();
        log.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_put_and_get() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        backend.put("k", b"v").unwrap();
        assert_eq!(backend.get("k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        {
            let backend = FileBackend::open(dir.path()).unwrap();
            backend.put("a", b"1").unwrap();
            backend.put("b", b"2").unwrap();
            backend.remove("a").unwrap();
        }
        let backend = FileBackend::open(dir.path()).unwrap();
        assert_eq!(backend.get("a").unwrap(), None);
        assert_eq!(backend.get("b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn lock_prevents_second_open() {
        let dir = tempdir().unwrap();
        let _first = FileBackend::open(dir.path()).unwrap();
        let second = FileBackend::open(dir.path());
        assert!(matches!(second, Err(StorageError::Locked(_))));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempdir().unwrap();
        drop(FileBackend::open(dir.path()).unwrap());
        assert!(FileBackend::open(dir.path()).is_ok());
    }

    #[test]
    fn torn_final_line_is_discarded() {
        let dir = tempdir().unwrap();
        {
            let backend = FileBackend::open(dir.path()).unwrap();
            backend.put("a", b"1").unwrap();
        }
        let mut log = OpenOptions::new()
            .append(true)
            .open(dir.path().join(LOG_FILE))
            .unwrap();
        log.write_all(b"{\"op\":\"put\",\"key\":\"b\",\"val").unwrap();
        drop(log);

        {
            let backend = FileBackend::open(dir.path()).unwrap();
            assert_eq!(backend.get("a").unwrap(), Some(b"1".to_vec()));
            assert_eq!(backend.get("b").unwrap(), None);
            backend.put("c", b"3").unwrap();
        }

        let backend = FileBackend::open(dir.path()).unwrap();
        assert_eq!(backend.get("c").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn corruption_mid_log_is_reported() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(LOG_FILE),
            "garbage\n{\"op\":\"remove\",\"key\":\"x\"}\n",
        )
        .unwrap();
        let result = FileBackend::open(dir.path());
        assert!(matches!(result, Err(StorageError::Corrupted { line: 1, .. })));
    }

    #[test]
    fn compact_keeps_live_keys() {
        let dir = tempdir().unwrap();
        {
            let backend = FileBackend::open(dir.path()).unwrap();
            for i in 0..10 {
                backend.put("counter", i.to_string().as_bytes()).unwrap();
            }
            backend.put("gone", b"x").unwrap();
            backend.remove("gone").unwrap();
            backend.compact().unwrap();
            backend.put("after", b"y").unwrap();
        }
        let contents = fs::read_to_string(dir.path().join(LOG_FILE)).unwrap();
        assert_eq!(contents.lines().count(), 2);

        let backend = FileBackend::open(dir.path()).unwrap();
        assert_eq!(backend.get("counter").unwrap(), Some(b"9".to_vec()));
        assert_eq!(backend.get("after").unwrap(), Some(b"y".to_vec()));
        assert_eq!(backend.keys().unwrap().len(), 2);
    }
}
