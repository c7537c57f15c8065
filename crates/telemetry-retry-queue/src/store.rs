//! File-backed persistence for the retry queue.
//!
//! Three files live in the storage directory:
//!
//! | File                  | Contents                                  |
//! |-----------------------|-------------------------------------------|
//! | `failed-events.jsonl` | active entries, one JSON object per line  |
//! | `dead-events.jsonl`   | dead-lettered entries, append-only        |
//! | `queue-stats.json`    | single [`QueueStats`] record              |
//!
//! Whole-file rewrites go through a temp file and a rename so a crash leaves
//! either the old or the new content. Every mutation of the active file holds
//! the store lock and re-reads the file first, so concurrent writers in the
//! same process never overwrite each other.

use crate::{QueueEntry, QueueResult, QueueStats};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::warn;

pub const ACTIVE_FILE: &str = "failed-events.jsonl";
pub const DEAD_FILE: &str = "dead-events.jsonl";
pub const STATS_FILE: &str = "queue-stats.json";

/// Entries read from a JSONL file plus the number of lines that failed to parse.
#[derive(Debug, Default)]
pub struct Scan {
    pub entries: Vec<QueueEntry>,
    pub corrupt: usize,
}

/// Result of a bounded append to the active store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Entry written; carries the new active size.
    Accepted(usize),
    /// Store already at capacity; carries its current size.
    Full(usize),
}

/// Result of a bounded batch append to the active store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchAdmission {
    /// Leading entries written; the rest were dropped.
    pub accepted: usize,
    /// Active size after the append.
    pub size: usize,
}

/// Persistence for one storage directory.
pub struct QueueStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl QueueStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn active_path(&self) -> PathBuf {
        self.dir.join(ACTIVE_FILE)
    }

    pub fn dead_path(&self) -> PathBuf {
        self.dir.join(DEAD_FILE)
    }

    pub fn stats_path(&self) -> PathBuf {
        self.dir.join(STATS_FILE)
    }

    /// Create the storage directory if missing.
    pub fn ensure_dir(&self) -> QueueResult<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Read every well-formed active entry.
    pub fn read_active(&self) -> QueueResult<Scan> {
        let _guard = self.lock.lock();
        read_jsonl(&self.active_path())
    }

    /// Read the dead-letter store.
    pub fn read_dead(&self) -> QueueResult<Scan> {
        let _guard = self.lock.lock();
        read_jsonl(&self.dead_path())
    }

    /// Append `entry` unless the active store already holds `capacity` entries.
    pub fn append_active(&self, entry: &QueueEntry, capacity: usize) -> QueueResult<Admission> {
        let batch = self.append_active_many(std::slice::from_ref(entry), capacity)?;
        if batch.accepted == 1 {
            Ok(Admission::Accepted(batch.size))
        } else {
            Ok(Admission::Full(batch.size))
        }
    }

    /// Append as many of `entries` as fit under `capacity`, in order.
    ///
    /// One read and one synced write regardless of the batch size.
    pub fn append_active_many(
        &self,
        entries: &[QueueEntry],
        capacity: usize,
    ) -> QueueResult<BatchAdmission> {
        let _guard = self.lock.lock();
        let size = read_jsonl(&self.active_path())?.entries.len();
        let accepted = capacity.saturating_sub(size).min(entries.len());
        if accepted > 0 {
            append_lines(&self.active_path(), &entries[..accepted])?;
        }
        Ok(BatchAdmission {
            accepted,
            size: size + accepted,
        })
    }

    /// Append entries to the dead-letter store.
    pub fn append_dead(&self, entries: &[QueueEntry]) -> QueueResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock();
        append_lines(&self.dead_path(), entries)
    }

    /// Re-read the active store, apply `f`, and rewrite it atomically.
    ///
    /// Lines that fail to parse are not carried into the rewritten file.
    pub fn update_active<F, R>(&self, f: F) -> QueueResult<R>
    where
        F: FnOnce(&mut Vec<QueueEntry>) -> R,
    {
        let _guard = self.lock.lock();
        let mut entries = read_jsonl(&self.active_path())?.entries;
        let result = f(&mut entries);
        let mut content = String::new();
        for entry in &entries {
            content.push_str(&serde_json::to_string(entry)?);
            content.push('\n');
        }
        write_atomic(&self.active_path(), content.as_bytes())?;
        Ok(result)
    }

    /// Truncate the active store.
    pub fn clear_active(&self) -> QueueResult<()> {
        let _guard = self.lock.lock();
        write_atomic(&self.active_path(), b"")
    }

    /// Load persisted statistics. `None` when no record exists yet.
    pub fn load_stats(&self) -> QueueResult<Option<QueueStats>> {
        let content = match fs::read_to_string(self.stats_path()) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn save_stats(&self, stats: &QueueStats) -> QueueResult<()> {
        let content = serde_json::to_vec_pretty(stats)?;
        write_atomic(&self.stats_path(), &content)
    }
}

fn read_jsonl(path: &Path) -> QueueResult<Scan> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Scan::default()),
        Err(e) => return Err(e.into()),
    };

    // Lines are decoded as bytes so a record cut inside a multi-byte
    // character is skipped like any other malformed line.
    let mut scan = Scan::default();
    for (index, line) in bytes.split(|b| *b == b'\n').enumerate() {
        let trimmed = line.trim_ascii();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_slice::<QueueEntry>(trimmed) {
            Ok(record) => scan.entries.push(record),
            Err(e) => {
                scan.corrupt += 1;
                warn!(
                    path = %path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping malformed queue record"
                );
            }
        }
    }
    Ok(scan)
}

fn append_lines(path: &Path, entries: &[QueueEntry]) -> QueueResult<()> {
    let mut content = String::new();
    for entry in entries {
        content.push_str(&serde_json::to_string(entry)?);
        content.push('\n');
    }
    let mut file = OpenOptions::new()
        .read(true)
        .create(true)
        .append(true)
        .open(path)?;
    if ends_mid_line(&mut file)? {
        warn!(path = %path.display(), "Terminating torn queue record before append");
        content.insert(0, '\n');
    }
    file.write_all(content.as_bytes())?;
    file.sync_data()?;
    Ok(())
}

/// Whether the file is non-empty and its last byte is not a newline.
fn ends_mid_line(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

fn write_atomic(path: &Path, content: &[u8]) -> QueueResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp_path = dir.join(format!(
        ".{}.tmp.{}",
        file_name,
        std::time::SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    ));

    let write_result = (|| -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}
