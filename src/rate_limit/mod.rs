// Sliding-window rate limiting.
//
// Every request is counted against a bucket identified by the hashed pair
// `(client address, endpoint name)`. A bucket holds the arrival times of the
// requests it accepted; anything older than the window is evicted before the
// bucket is counted.

mod clock;
mod file_store;
mod limiter;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use file_store::FileStore;
pub use limiter::{Decision, RateLimitConfig, RateLimiter, reset_instant};
pub use store::{MemoryStore, RateLimitStore, StoreBackend};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// Endpoint name used when the caller does not scope the check to a route.
pub const DEFAULT_ENDPOINT: &str = "default";

// What to do when the store cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FailurePolicy {
    // Treat unreadable state as "no prior requests" and allow.
    #[default]
    FailOpen,
    // Reject the request.
    FailClosed,
}

impl FailurePolicy {
    pub fn allows(self) -> bool {
        matches!(self, FailurePolicy::FailOpen)
    }
}

// Create a bucket key (hash of client address + endpoint)
pub fn client_key(client_address: &str, endpoint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(client_address);
    hasher.update(":");
    hasher.update(endpoint);
    format!("{:x}", hasher.finalize())
}

// Request arrival times (Unix seconds) recorded for one bucket, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateLimitEntry {
    timestamps: Vec<i64>,
}

impl RateLimitEntry {
    // Drop every timestamp at or before `cutoff`.
    pub fn evict(&mut self, cutoff: i64) {
        self.timestamps.retain(|&t| t > cutoff);
    }

    pub fn record(&mut self, now: i64) {
        self.timestamps.push(now);
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn oldest(&self) -> Option<i64> {
        self.timestamps.iter().copied().min()
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_key_is_stable_hex() {
        let key = client_key("1.2.3.4", "test");
        assert_eq!(key, client_key("1.2.3.4", "test"));
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn client_key_separates_address_and_endpoint() {
        assert_ne!(client_key("1.2.3.4", "login"), client_key("1.2.3.4", "products"));
        assert_ne!(client_key("1.2.3.4", "login"), client_key("5.6.7.8", "login"));
    }

    #[test]
    fn evict_keeps_only_newer_than_cutoff() {
        let mut entry = RateLimitEntry::default();
        for t in [100, 110, 120] {
            entry.record(t);
        }
        entry.evict(110);
        assert_eq!(entry.timestamps(), &[120]);
        assert_eq!(entry.oldest(), Some(120));

        entry.evict(120);
        assert!(entry.is_empty());
        assert_eq!(entry.oldest(), None);
    }

    #[test]
    fn entry_serializes_as_plain_array() {
        let mut entry = RateLimitEntry::default();
        entry.record(5);
        entry.record(7);
        assert_eq!(serde_json::to_string(&entry).unwrap(), "[5,7]");
    }
}
