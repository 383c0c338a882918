//! Window record storage.
//!
//! # Responsibilities
//! - Hold one `WindowRecord` per active client key
//! - Increment atomically with respect to concurrent requests for the same key
//! - Overwrite stale records lazily on the next request
//! - Remove stale records physically on sweep
//!
//! # Design Decisions
//! - Only the latest window per key is stored (plus the previous window's count)
//! - `DashMap::entry` holds the shard write lock for the read-modify-write
//! - `DashMap::retain` locks one shard at a time, so a sweep never stalls
//!   checks on other shards

use dashmap::DashMap;
use thiserror::Error;

/// Count state for one client key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRecord {
    /// Window index (`floor(now_ms / window_ms)`).
    pub window: u64,
    /// Attempts counted in `window`, including rejected ones.
    pub count: u64,
    /// Attempts counted in `window - 1`, or 0 if the key was idle then.
    pub previous_count: u64,
}

impl WindowRecord {
    fn fresh(window: u64) -> Self {
        Self {
            window,
            count: 0,
            previous_count: 0,
        }
    }

    /// Move the record forward to `window`, carrying the count over when the
    /// old window is the immediately preceding one.
    fn roll_to(&mut self, window: u64) {
        let previous_count = if self.window + 1 == window { self.count } else { 0 };
        *self = Self {
            window,
            count: 0,
            previous_count,
        };
    }
}

/// Failure of a backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("window store unavailable: {0}")]
    Unavailable(String),
}

/// Table of window records, shared by every request.
pub trait WindowStore: Send + Sync {
    /// Count one attempt for `key` in `window` and return the updated record.
    ///
    /// A record from an older window is rolled forward first. A record from a
    /// newer window (a racing request computed a later "now") absorbs the
    /// attempt as-is.
    fn increment(&self, key: &str, window: u64) -> Result<WindowRecord, StoreError>;

    /// Drop every record whose window is older than `horizon`. Returns the
    /// number removed.
    fn sweep(&self, horizon: u64) -> usize;

    /// Forget a key entirely.
    fn reset(&self, key: &str);

    /// Number of tracked keys.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process store backed by a sharded concurrent map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, WindowRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a key's record.
    pub fn get(&self, key: &str) -> Option<WindowRecord> {
        self.records.get(key).map(|r| *r.value())
    }
}

impl WindowStore for MemoryStore {
    fn increment(&self, key: &str, window: u64) -> Result<WindowRecord, StoreError> {
        // Fast path avoids allocating the key for clients already tracked.
        if let Some(mut record) = self.records.get_mut(key) {
            if record.window < window {
                record.roll_to(window);
            }
            record.count += 1;
            return Ok(*record);
        }

        let mut record = self
            .records
            .entry(key.to_owned())
            .or_insert_with(|| WindowRecord::fresh(window));
        if record.window < window {
            record.roll_to(window);
        }
        record.count += 1;
        Ok(*record)
    }

    fn sweep(&self, horizon: u64) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| record.window >= horizon);
        before.saturating_sub(self.records.len())
    }

    fn reset(&self, key: &str) {
        self.records.remove(key);
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}
