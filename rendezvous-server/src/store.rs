//! TTL-bounded content store for SDP blobs (component B).
//!
//! Entries expire 120 seconds after their most recent write. `get`
//! and `set` apply lazy expiry on the hot path; a background sweeper
//! (see [`spawn_sweeper`]) additionally walks the map on an interval
//! so `count()` does not need to scan expired entries itself.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;

/// Maximum accepted blob size, in bytes.
pub const MAX_BLOB_SIZE: usize = 10_240;

/// Time-to-live for a stored blob, measured from the most recent write.
pub const BLOB_TTL: Duration = Duration::from_secs(120);

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("body is empty")]
    Empty,
    #[error("body exceeds {MAX_BLOB_SIZE} bytes")]
    TooLarge,
    #[error("no such path")]
    NotFound,
}

struct Entry {
    bytes: Vec<u8>,
    expires_at: Instant,
}

/// Concurrent map from path to expiring blob.
#[derive(Default)]
pub struct ContentStore {
    entries: DashMap<String, Entry>,
}

impl ContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite `path`, resetting its expiry to `now + TTL`.
    pub fn set(&self, path: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        if bytes.is_empty() {
            return Err(StoreError::Empty);
        }
        if bytes.len() > MAX_BLOB_SIZE {
            return Err(StoreError::TooLarge);
        }
        self.entries.insert(
            path.to_string(),
            Entry {
                bytes,
                expires_at: Instant::now() + BLOB_TTL,
            },
        );
        Ok(())
    }

    /// Fetch `path`'s bytes, provided it has not expired.
    pub fn get(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let Some(entry) = self.entries.get(path) else {
            return Err(StoreError::NotFound);
        };
        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.entries.remove(path);
            return Err(StoreError::NotFound);
        }
        Ok(entry.bytes.clone())
    }

    /// Count of entries that have not yet expired.
    pub fn count(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|e| e.expires_at > now)
            .count()
    }

    fn sweep(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }
}

/// Periodically evict expired entries so long-lived servers do not
/// accumulate dead map slots between accesses.
pub fn spawn_sweeper(store: std::sync::Arc<ContentStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            store.sweep();
        }
    })
}
