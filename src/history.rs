use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ConsoleError;
use crate::types::HistoryEntry;

/// Key the history log is stored under.
pub const HISTORY_KEY: &str = "recentScans";
/// Default number of entries kept.
pub const HISTORY_LIMIT: usize = 5;
/// Current on-disk schema version. Version 0 is the bare record list.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage quota exceeded")]
    QuotaExceeded,
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Device-local key/value storage the history log lives in.
pub trait HistoryBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;
    /// Replace the value stored under `key` in one step.
    fn write(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// One JSON file per key inside a directory. Writes go to a temp file that is
/// renamed over the target, so a reader never sees a torn log.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl HistoryBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        let target = self.path_for(key);
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &target)?;
        Ok(())
    }
}

/// Volatile storage with an optional byte quota, for tests and for running
/// without a writable data directory.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    slots: HashMap<String, String>,
    quota_bytes: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(bytes: usize) -> Self {
        Self {
            slots: HashMap::new(),
            quota_bytes: Some(bytes),
        }
    }

    pub fn with_value(key: &str, value: impl Into<String>) -> Self {
        let mut slots = HashMap::new();
        slots.insert(key.to_string(), value.into());
        Self {
            slots,
            quota_bytes: None,
        }
    }
}

impl HistoryBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.slots.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.quota_bytes.is_some_and(|q| value.len() > q) {
            return Err(StorageError::QuotaExceeded);
        }
        self.slots.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Serialize)]
struct StoredLogRef<'a> {
    version: u32,
    entries: &'a [HistoryEntry],
}

/// Bounded, newest-first log of session summaries.
///
/// The log is read lazily; `entries()` is `None` until the first load, which is
/// a different state from an empty log.
pub struct History {
    backend: Box<dyn HistoryBackend>,
    entries: Option<Vec<HistoryEntry>>,
    limit: usize,
}

impl std::fmt::Debug for History {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("History")
            .field("entries", &self.entries)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl History {
    pub fn new(backend: impl HistoryBackend + 'static) -> Self {
        Self::with_limit(backend, HISTORY_LIMIT)
    }

    pub fn with_limit(backend: impl HistoryBackend + 'static, limit: usize) -> Self {
        Self {
            backend: Box::new(backend),
            entries: None,
            limit: limit.max(1),
        }
    }

    /// Entries as last loaded, or `None` before the first load.
    pub fn entries(&self) -> Option<&[HistoryEntry]> {
        self.entries.as_deref()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries
            .as_ref()
            .is_some_and(|e| e.iter().any(|h| h.id == id))
    }

    /// Newest first. Unreadable storage yields an empty log.
    pub fn load_all(&mut self) -> &[HistoryEntry] {
        if self.entries.is_none() {
            let loaded = match self.backend.read(HISTORY_KEY) {
                Ok(Some(raw)) => decode_log(&raw, self.limit),
                Ok(None) => Vec::new(),
                Err(e) => {
                    warn!(error = %e, "history unreadable, starting empty");
                    Vec::new()
                }
            };
            self.entries = Some(loaded);
        }
        self.entries.as_deref().unwrap_or_default()
    }

    /// Insert `entry` at the head, replacing any older snapshot of the same
    /// session, trim to the limit and persist.
    ///
    /// The in-memory log is always updated. If storage refuses the write for
    /// lack of space the oldest entry is dropped and the write retried once;
    /// a second failure is reported as [`ConsoleError::StorageDegraded`].
    pub fn append(&mut self, entry: HistoryEntry) -> Result<(), ConsoleError> {
        self.load_all();
        let limit = self.limit;
        let entries = self.entries.get_or_insert_with(Vec::new);
        entries.retain(|e| e.id != entry.id);
        entries.insert(0, entry);
        entries.truncate(limit);
        self.persist()
    }

    fn persist(&mut self) -> Result<(), ConsoleError> {
        let Some(entries) = self.entries.as_mut() else {
            return Ok(());
        };
        match write_log(self.backend.as_mut(), entries) {
            Ok(()) => Ok(()),
            Err(StorageError::QuotaExceeded) if entries.len() > 1 => {
                let dropped = entries.pop();
                debug!(dropped = ?dropped.map(|e| e.id), "history over quota, dropping oldest entry");
                write_log(self.backend.as_mut(), entries).map_err(|e| {
                    warn!(error = %e, "history write failed after trimming");
                    ConsoleError::StorageDegraded(e.to_string())
                })
            }
            Err(e) => {
                warn!(error = %e, "history write failed");
                Err(ConsoleError::StorageDegraded(e.to_string()))
            }
        }
    }
}

fn write_log(backend: &mut dyn HistoryBackend, entries: &[HistoryEntry]) -> Result<(), StorageError> {
    let body = serde_json::to_string(&StoredLogRef {
        version: SCHEMA_VERSION,
        entries,
    })
    .map_err(|e| StorageError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
    backend.write(HISTORY_KEY, &body)
}

/// Decode a stored log of any known version. Records that do not validate are
/// dropped rather than passed on; a repeated id keeps only its newest record.
fn decode_log(raw: &str, limit: usize) -> Vec<HistoryEntry> {
    let records = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(records)) => records,
        Ok(Value::Object(mut obj)) => {
            let version = obj.get("version").and_then(Value::as_u64).unwrap_or(0);
            if version > u64::from(SCHEMA_VERSION) {
                warn!(version, "history written by a newer schema, ignoring");
                return Vec::new();
            }
            match obj.remove("entries") {
                Some(Value::Array(records)) => records,
                _ => {
                    warn!("history has no entry list, ignoring");
                    return Vec::new();
                }
            }
        }
        Ok(_) => {
            warn!("history is not a record list, ignoring");
            return Vec::new();
        }
        Err(e) => {
            warn!(error = %e, "history is not valid JSON, ignoring");
            return Vec::new();
        }
    };

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for record in records {
        match serde_json::from_value::<HistoryEntry>(record) {
            Ok(entry) if entry.id.is_empty() => debug!("dropping history record without id"),
            Ok(entry) => {
                if seen.insert(entry.id.clone()) {
                    out.push(entry);
                }
            }
            Err(e) => warn!(error = %e, "dropping malformed history record"),
        }
    }
    out.truncate(limit);
    out
}
