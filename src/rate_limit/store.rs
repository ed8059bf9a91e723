use dashmap::DashMap;

use super::{FailurePolicy, FileStore, RateLimitEntry};
use crate::error::Result;

// Backing storage for rate limit buckets.
//
// Implementations guarantee that `with_entry` runs with exclusive access to
// the bucket, so a count and the append that follows it cannot interleave
// with another request for the same bucket.
pub trait RateLimitStore: Send + Sync {
    // Evict timestamps at or before `cutoff`, then run `f` on the bucket for
    // `key`. `f` returns its result and whether the bucket changed and must
    // be persisted. Buckets left empty are removed.
    fn with_entry<R, F>(&self, key: &str, cutoff: i64, f: F) -> Result<R>
    where
        F: FnOnce(&mut RateLimitEntry) -> (R, bool);

    // Evict timestamps at or before `cutoff` in every bucket and drop the
    // empty ones. Returns the number of buckets still tracked.
    fn sweep(&self, cutoff: i64) -> Result<usize>;

    // How to treat state that cannot be read. Set by the limiter that owns the store.
    fn set_failure_policy(&mut self, _policy: FailurePolicy) {}
}

// Single-process store. Other buckets are only evicted by `sweep`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, RateLimitEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RateLimitStore for MemoryStore {
    fn with_entry<R, F>(&self, key: &str, cutoff: i64, f: F) -> Result<R>
    where
        F: FnOnce(&mut RateLimitEntry) -> (R, bool),
    {
        let (out, empty) = {
            let mut entry = self.entries.entry(key.to_string()).or_default();
            entry.evict(cutoff);
            let (out, _) = f(entry.value_mut());
            (out, entry.is_empty())
        };

        // shard lock is released above, remove_if takes it again
        if empty {
            self.entries.remove_if(key, |_, entry| entry.is_empty());
        }
        Ok(out)
    }

    fn sweep(&self, cutoff: i64) -> Result<usize> {
        self.entries.retain(|_, entry| {
            entry.evict(cutoff);
            !entry.is_empty()
        });
        Ok(self.entries.len())
    }
}

// Store selected at startup.
#[derive(Debug)]
pub enum StoreBackend {
    Memory(MemoryStore),
    File(FileStore),
}

impl StoreBackend {
    pub fn name(&self) -> &'static str {
        match self {
            StoreBackend::Memory(_) => "memory",
            StoreBackend::File(_) => "file",
        }
    }
}

impl RateLimitStore for StoreBackend {
    fn with_entry<R, F>(&self, key: &str, cutoff: i64, f: F) -> Result<R>
    where
        F: FnOnce(&mut RateLimitEntry) -> (R, bool),
    {
        match self {
            StoreBackend::Memory(store) => store.with_entry(key, cutoff, f),
            StoreBackend::File(store) => store.with_entry(key, cutoff, f),
        }
    }

    fn sweep(&self, cutoff: i64) -> Result<usize> {
        match self {
            StoreBackend::Memory(store) => store.sweep(cutoff),
            StoreBackend::File(store) => store.sweep(cutoff),
        }
    }

    fn set_failure_policy(&mut self, policy: FailurePolicy) {
        match self {
            StoreBackend::Memory(store) => store.set_failure_policy(policy),
            StoreBackend::File(store) => store.set_failure_policy(policy),
        }
    }
}
