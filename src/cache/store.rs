//! Durable cache tier.
//!
//! A [`DurableStore`] persists one serialized snapshot per cache category
//! and hands it back at startup to warm the in-process tier. The tier is
//! best-effort: a store that cannot read returns `None`, and write failures
//! are logged by the caller and otherwise ignored.
//!
//! # Snapshot format
//!
//! ```json
//! { "version": 1, "entries": { "<key>": { "data": ..., "timestamp": "<rfc3339>" } } }
//! ```
//!
//! Documents with an unsupported version, documents that are not JSON, and
//! individual entries whose `data` no longer fits the category's type are
//! dropped on load.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::CacheEntry;
use crate::{Result, SlotwiseError};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Capability interface for the durable tier.
pub trait DurableStore: Send + Sync {
    /// Store name for logging.
    fn name(&self) -> &str;

    /// Raw snapshot for `category`, or `None` when absent or unreadable.
    fn get(&self, category: &str) -> Option<String>;

    /// Replace the snapshot for `category`.
    fn put(&self, category: &str, snapshot: &str) -> Result<()>;

    /// Delete the snapshot for `category`. Absent snapshots are not an error.
    fn remove(&self, category: &str) -> Result<()>;
}

// ============================================================================
// Snapshot encoding
// ============================================================================

#[derive(Serialize)]
struct Snapshot<'a, T> {
    version: u32,
    entries: BTreeMap<&'a str, &'a CacheEntry<T>>,
}

#[derive(Deserialize)]
struct RawSnapshot {
    version: u32,
    #[serde(default)]
    entries: HashMap<String, serde_json::Value>,
}

/// Serialize entries into a versioned snapshot document.
pub(crate) fn encode_snapshot<T: Serialize>(
    entries: &[(String, CacheEntry<T>)],
) -> Result<String> {
    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        entries: entries.iter().map(|(k, v)| (k.as_str(), v)).collect(),
    };
    Ok(serde_json::to_string(&snapshot)?)
}

/// Parse a snapshot document, keeping only entries that deserialize as `T`.
///
/// Returns an empty list for unparseable or unsupported documents.
pub(crate) fn decode_snapshot<T: DeserializeOwned>(
    category: &str,
    raw: &str,
) -> Vec<(String, CacheEntry<T>)> {
    let snapshot: RawSnapshot = match serde_json::from_str(raw) {
        Ok(s) => s,
        Err(e) => {
            warn!(category, error = %e, "dropping corrupt cache snapshot");
            return Vec::new();
        }
    };
    if snapshot.version != SNAPSHOT_VERSION {
        warn!(
            category,
            version = snapshot.version,
            "dropping cache snapshot with unsupported version"
        );
        return Vec::new();
    }

    let total = snapshot.entries.len();
    let entries: Vec<_> = snapshot
        .entries
        .into_iter()
        .filter_map(|(key, value)| {
            serde_json::from_value::<CacheEntry<T>>(value)
                .ok()
                .map(|entry| (key, entry))
        })
        .collect();
    if entries.len() < total {
        debug!(
            category,
            dropped = total - entries.len(),
            "dropped malformed cache entries"
        );
    }
    entries
}

// ============================================================================
// FileStore
// ============================================================================

/// One JSON file per category under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Store snapshots under `dir` (created on first write).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store under the default directory, `~/.cache/slotwise/`.
    pub fn default_location() -> Self {
        Self::new(default_cache_dir())
    }

    /// The directory snapshots are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, category: &str) -> PathBuf {
        self.dir.join(format!("{category}.json"))
    }
}

/// Default cache directory: `~/.cache/slotwise/`.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("slotwise")
}

impl DurableStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    fn get(&self, category: &str) -> Option<String> {
        let path = self.path_for(category);
        match std::fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read cache snapshot");
                None
            }
        }
    }

    fn put(&self, category: &str, snapshot: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            SlotwiseError::Configuration(format!(
                "failed to create cache dir {}: {e}",
                self.dir.display()
            ))
        })?;

        // Write to tmp file first, then rename for atomicity
        let path = self.path_for(category);
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, snapshot).map_err(|e| {
            SlotwiseError::Configuration(format!(
                "failed to write cache file {}: {e}",
                tmp_path.display()
            ))
        })?;
        std::fs::rename(&tmp_path, &path).map_err(|e| {
            SlotwiseError::Configuration(format!(
                "failed to rename cache file {} → {}: {e}",
                tmp_path.display(),
                path.display()
            ))
        })
    }

    fn remove(&self, category: &str) -> Result<()> {
        let path = self.path_for(category);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SlotwiseError::Configuration(format!(
                "failed to remove cache file {}: {e}",
                path.display()
            ))),
        }
    }
}

// ============================================================================
// MemoryStore / NullStore
// ============================================================================

/// Process-local store. Survives cache rebuilds but not process restarts;
/// share one instance between caches to simulate a restart in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of categories with a stored snapshot.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.snapshots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DurableStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(&self, category: &str) -> Option<String> {
        self.lock().get(category).cloned()
    }

    fn put(&self, category: &str, snapshot: &str) -> Result<()> {
        self.lock()
            .insert(category.to_string(), snapshot.to_string());
        Ok(())
    }

    fn remove(&self, category: &str) -> Result<()> {
        self.lock().remove(category);
        Ok(())
    }
}

/// No durable tier: every read misses, every write is discarded.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStore;

impl DurableStore for NullStore {
    fn name(&self) -> &str {
        "null"
    }

    fn get(&self, _category: &str) -> Option<String> {
        None
    }

    fn put(&self, _category: &str, _snapshot: &str) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _category: &str) -> Result<()> {
        Ok(())
    }
}
