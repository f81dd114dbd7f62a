// SPDX-License-Identifier: Apache-2.0

//! Durable checkpoint storage keyed by file fingerprint.
//!
//! The file-backed store keeps the whole mapping in memory, batches disk
//! syncs, and writes atomically using a write-to-temp-then-rename strategy.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::tailer::error::{Error, Result};

/// How long syncs may be deferred after a write.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(500);

/// Entry count above which the least recently updated checkpoints are
/// evicted at sync time.
pub const DEFAULT_MAX_ENTRIES: usize = 1_000;

const STORE_VERSION: u8 = 1;

/// Durable mapping from file fingerprint to read offset.
///
/// A `get_position` after a successful `set_position` of the same
/// fingerprint returns the written offset unless a crash intervened, in
/// which case the prior value (or absence) is acceptable. Implementations
/// may bound their entry count and evict; an evicted fingerprint simply
/// re-tails from the configured initial position.
///
/// Stores may be shared across tailers; implementations must keep
/// individual operations on a single key linearizable.
pub trait PositionStore: Send {
    /// Look up the checkpointed offset for a fingerprint.
    fn get_position(&self, fingerprint: &str) -> Result<Option<u64>>;

    /// Record the read offset for a fingerprint.
    fn set_position(&self, fingerprint: &str, offset: u64) -> Result<()>;

    /// Flush pending state and release the store.
    fn close(&self) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    version: u8,
    entries: HashMap<String, StoreEntry>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct StoreEntry {
    offset: u64,
    updated_ms: u64,
}

struct Shared {
    entries: HashMap<String, StoreEntry>,
    dirty: bool,
    last_sync: Instant,
}

/// JSON-file-backed [`PositionStore`].
///
/// Handles are `Clone` and share state, so several tailers may checkpoint
/// into one store.
#[derive(Clone)]
pub struct FilePositionStore {
    path: PathBuf,
    flush_interval: Duration,
    max_entries: usize,
    shared: Arc<RwLock<Shared>>,
}

impl FilePositionStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // The store and its temp files land in this directory; make sure
        // it exists once here rather than on every sync.
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let entries = if path.exists() {
            let file = File::open(&path)?;
            let document: StoreDocument = serde_json::from_reader(BufReader::new(file))?;
            if document.version != STORE_VERSION {
                return Err(Error::PositionStore(format!(
                    "unsupported position store version {}",
                    document.version
                )));
            }
            document.entries
        } else {
            HashMap::new()
        };

        debug!(path = %path.display(), entries = entries.len(), "opened position store");

        Ok(Self {
            path,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_entries: DEFAULT_MAX_ENTRIES,
            shared: Arc::new(RwLock::new(Shared {
                entries,
                dirty: false,
                last_sync: Instant::now(),
            })),
        })
    }

    /// Replace the sync deferral interval. `Duration::ZERO` syncs on every
    /// write.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Replace the entry bound applied at sync time.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    fn sync_locked(&self, shared: &mut Shared) -> Result<()> {
        if shared.entries.len() > self.max_entries {
            let excess = shared.entries.len() - self.max_entries;
            let mut by_age: Vec<(String, u64)> = shared
                .entries
                .iter()
                .map(|(fingerprint, entry)| (fingerprint.clone(), entry.updated_ms))
                .collect();
            by_age.sort_by_key(|(_, updated_ms)| *updated_ms);
            for (fingerprint, _) in by_age.into_iter().take(excess) {
                shared.entries.remove(&fingerprint);
                debug!(%fingerprint, "evicted least recently updated checkpoint");
            }
        }

        let document = StoreDocument {
            version: STORE_VERSION,
            entries: shared.entries.clone(),
        };
        atomic_write(&self.path, &document)?;

        shared.dirty = false;
        shared.last_sync = Instant::now();
        Ok(())
    }
}

impl PositionStore for FilePositionStore {
    fn get_position(&self, fingerprint: &str) -> Result<Option<u64>> {
        let shared = self
            .shared
            .read()
            .map_err(|e| Error::PositionStore(e.to_string()))?;
        Ok(shared.entries.get(fingerprint).map(|entry| entry.offset))
    }

    fn set_position(&self, fingerprint: &str, offset: u64) -> Result<()> {
        let mut shared = self
            .shared
            .write()
            .map_err(|e| Error::PositionStore(e.to_string()))?;

        shared.entries.insert(
            fingerprint.to_string(),
            StoreEntry {
                offset,
                updated_ms: now_ms(),
            },
        );
        shared.dirty = true;

        if shared.last_sync.elapsed() >= self.flush_interval {
            self.sync_locked(&mut shared)?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut shared = self
            .shared
            .write()
            .map_err(|e| Error::PositionStore(e.to_string()))?;
        if shared.dirty {
            self.sync_locked(&mut shared)?;
        }
        Ok(())
    }
}

/// In-process [`PositionStore`] for tests and ephemeral runs.
///
/// Handles are `Clone` and share state, so a test can keep a handle to a
/// store it has moved into a tailer.
#[derive(Clone, Default)]
pub struct MemoryPositionStore {
    entries: Arc<RwLock<HashMap<String, u64>>>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current mapping.
    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.entries
            .read()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl PositionStore for MemoryPositionStore {
    fn get_position(&self, fingerprint: &str) -> Result<Option<u64>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| Error::PositionStore(e.to_string()))?;
        Ok(entries.get(fingerprint).copied())
    }

    fn set_position(&self, fingerprint: &str, offset: u64) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| Error::PositionStore(e.to_string()))?;
        entries.insert(fingerprint.to_string(), offset);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Publish the document by renaming a fully written sibling file over the
/// target, so readers never observe a partial store.
fn atomic_write(path: &Path, document: &StoreDocument) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(document)?;

    // The temp name carries a digest of the serialized state: writers of
    // different states cannot trample each other's temp file, and a
    // leftover from a crashed sync is inert.
    let digest = format!("{:x}", Md5::digest(&bytes));
    let mut temp_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    temp_name.push(format!(".{}.tmp", &digest[..8]));
    let temp_path = path.with_file_name(temp_name);

    let mut file = File::create(&temp_path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    Ok(())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
