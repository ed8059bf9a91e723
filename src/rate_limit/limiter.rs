use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{
    Clock, DEFAULT_ENDPOINT, FailurePolicy, RateLimitEntry, RateLimitStore, SystemClock,
    client_key,
};
use crate::error::{Error, Result};
use crate::metrics::STORE_ERRORS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    // Length of the trailing window, in seconds.
    pub window_seconds: u64,
    // Requests allowed inside one window.
    pub max_requests: u32,
    pub on_store_error: FailurePolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            max_requests: 100,
            on_store_error: FailurePolicy::FailOpen,
        }
    }
}

// Outcome of one check, taken in the same store cycle as the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    // Requests counted in the window, including this one if it was allowed.
    pub usage: u32,
    pub remaining: u32,
    // Unix seconds at which the oldest counted request leaves the window.
    pub reset_at: i64,
}

impl Decision {
    // Seconds until the bucket frees a slot, measured from `now`.
    pub fn retry_after(&self, now: i64) -> u64 {
        u64::try_from(self.reset_at.saturating_sub(now)).unwrap_or(0)
    }
}

// Sliding-window limiter over a swappable store.
pub struct RateLimiter<S> {
    store: S,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl<S: RateLimitStore> RateLimiter<S> {
    pub fn new(store: S, config: RateLimitConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    // The store follows the limiter's failure policy, whatever it was built with.
    pub fn with_clock(mut store: S, config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        store.set_failure_policy(config.on_store_error);
        Self { store, config, clock }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    // Accept or reject one request. Rejections are not recorded.
    //
    // Store failures resolve through the configured failure policy.
    pub fn check_limit(&self, client_address: &str, endpoint: &str) -> bool {
        self.decide(client_address, endpoint).allowed
    }

    // check_limit with the bucket state that led to the decision.
    pub fn decide(&self, client_address: &str, endpoint: &str) -> Decision {
        match self.try_check(client_address, endpoint) {
            Ok(decision) => decision,
            Err(err) => {
                STORE_ERRORS.inc();
                let allowed = self.config.on_store_error.allows();
                warn!(
                    client = client_address,
                    endpoint,
                    error = %err,
                    allowed,
                    "rate limit check failed, applying store error policy"
                );
                self.fallback_decision()
            }
        }
    }

    // Decision used when the store could not be consulted.
    pub fn fallback_decision(&self) -> Decision {
        let allowed = self.config.on_store_error.allows();
        let limit = self.config.max_requests;
        Decision {
            allowed,
            limit,
            usage: 0,
            remaining: if allowed { limit } else { 0 },
            reset_at: self.now(),
        }
    }

    // Fallible form of check_limit.
    pub fn try_check(&self, client_address: &str, endpoint: &str) -> Result<Decision> {
        let key = bucket_key(client_address, endpoint)?;
        let now = self.now();
        let max = self.config.max_requests as usize;

        let decision = self.store.with_entry(&key, self.cutoff(now), |entry| {
            if entry.len() >= max {
                (self.summarize(entry, now, false), false)
            } else {
                entry.record(now);
                (self.summarize(entry, now, true), true)
            }
        })?;

        if !decision.allowed {
            debug!(client = client_address, endpoint, usage = decision.usage, "rate limit exceeded");
        }
        Ok(decision)
    }

    // Bucket state as the next request would see it, read in one store cycle.
    // `allowed` says whether that request would be accepted. Records nothing.
    pub fn peek(&self, client_address: &str, endpoint: &str) -> Result<Decision> {
        self.inspect(client_address, endpoint, |entry, now| {
            let max = self.config.max_requests as usize;
            self.summarize(entry, now, entry.len() < max)
        })
    }

    // Requests currently counted in the window. Records nothing.
    pub fn get_usage(&self, client_address: &str, endpoint: &str) -> Result<u32> {
        self.inspect(client_address, endpoint, |entry, _| saturating_u32(entry.len()))
    }

    pub fn get_remaining(&self, client_address: &str, endpoint: &str) -> Result<u32> {
        let usage = self.get_usage(client_address, endpoint)?;
        Ok(self.config.max_requests.saturating_sub(usage))
    }

    // When the oldest counted request leaves the window, or now if nothing is counted.
    pub fn get_reset_time(&self, client_address: &str, endpoint: &str) -> Result<DateTime<Utc>> {
        let reset_at = self.inspect(client_address, endpoint, |entry, now| self.reset_at(entry, now))?;
        reset_instant(reset_at)
    }

    // Evict expired requests across all buckets. Returns buckets still tracked.
    pub fn sweep(&self) -> Result<usize> {
        self.store.sweep(self.cutoff(self.now()))
    }

    fn inspect<R>(
        &self,
        client_address: &str,
        endpoint: &str,
        f: impl FnOnce(&RateLimitEntry, i64) -> R,
    ) -> Result<R> {
        let key = bucket_key(client_address, endpoint)?;
        let now = self.now();
        self.store
            .with_entry(&key, self.cutoff(now), |entry| (f(&*entry, now), false))
    }

    fn window(&self) -> i64 {
        i64::try_from(self.config.window_seconds).unwrap_or(i64::MAX)
    }

    // Timestamps at or before this instant are outside the window.
    fn cutoff(&self, now: i64) -> i64 {
        now.saturating_sub(self.window())
    }

    fn reset_at(&self, entry: &RateLimitEntry, now: i64) -> i64 {
        entry
            .oldest()
            .map_or(now, |oldest| oldest.saturating_add(self.window()))
    }

    fn summarize(&self, entry: &RateLimitEntry, now: i64, allowed: bool) -> Decision {
        let usage = saturating_u32(entry.len());
        Decision {
            allowed,
            limit: self.config.max_requests,
            usage,
            remaining: self.config.max_requests.saturating_sub(usage),
            reset_at: self.reset_at(entry, now),
        }
    }
}

fn bucket_key(client_address: &str, endpoint: &str) -> Result<String> {
    if client_address.is_empty() {
        return Err(Error::EmptyClientAddress);
    }
    let endpoint = if endpoint.is_empty() { DEFAULT_ENDPOINT } else { endpoint };
    Ok(client_key(client_address, endpoint))
}

// Unix seconds to an instant; windows reaching past chrono's range are an error, not 1970.
pub fn reset_instant(reset_at: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(reset_at, 0).ok_or(Error::TimestampOutOfRange(reset_at))
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::{FileStore, ManualClock, MemoryStore};

    const T0: i64 = 1_700_000_000;

    fn limiter(max_requests: u32, window_seconds: u64) -> (RateLimiter<MemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let config = RateLimitConfig {
            window_seconds,
            max_requests,
            ..Default::default()
        };
        (RateLimiter::with_clock(MemoryStore::new(), config, clock.clone()), clock)
    }

    #[test]
    fn concrete_scenario() {
        let (limiter, clock) = limiter(2, 60);

        assert!(limiter.check_limit("1.2.3.4", "test"));
        assert_eq!(limiter.get_usage("1.2.3.4", "test").unwrap(), 1);

        clock.set(T0 + 10);
        assert!(limiter.check_limit("1.2.3.4", "test"));
        assert_eq!(limiter.get_usage("1.2.3.4", "test").unwrap(), 2);

        clock.set(T0 + 20);
        assert!(!limiter.check_limit("1.2.3.4", "test"));
        assert_eq!(limiter.get_usage("1.2.3.4", "test").unwrap(), 2);

        clock.set(T0 + 61);
        assert!(limiter.check_limit("1.2.3.4", "test"));
        assert_eq!(limiter.get_usage("1.2.3.4", "test").unwrap(), 2);
        clock.set(T0 + 71);
        assert_eq!(limiter.get_usage("1.2.3.4", "test").unwrap(), 1);
    }

    #[test]
    fn threshold_enforced_within_window() {
        let (limiter, clock) = limiter(3, 60);
        for _ in 0..3 {
            assert!(limiter.check_limit("10.0.0.1", DEFAULT_ENDPOINT));
            clock.advance(1);
        }
        assert!(!limiter.check_limit("10.0.0.1", DEFAULT_ENDPOINT));
        assert_eq!(limiter.get_remaining("10.0.0.1", DEFAULT_ENDPOINT).unwrap(), 0);
    }

    #[test]
    fn usage_excludes_timestamps_at_window_edge() {
        let (limiter, clock) = limiter(10, 60);
        limiter.check_limit("a", "x");
        clock.set(T0 + 30);
        limiter.check_limit("a", "x");

        clock.set(T0 + 59);
        assert_eq!(limiter.get_usage("a", "x").unwrap(), 2);
        clock.set(T0 + 60);
        assert_eq!(limiter.get_usage("a", "x").unwrap(), 1);
        clock.set(T0 + 90);
        assert_eq!(limiter.get_usage("a", "x").unwrap(), 0);
    }

    #[test]
    fn clients_are_independent() {
        let (limiter, _) = limiter(2, 60);
        assert!(limiter.check_limit("client-a", "default"));
        assert!(limiter.check_limit("client-a", "default"));
        assert!(!limiter.check_limit("client-a", "default"));

        assert!(limiter.check_limit("client-b", "default"));
        assert_eq!(limiter.get_remaining("client-b", "default").unwrap(), 1);
    }

    #[test]
    fn endpoints_are_independent() {
        let (limiter, _) = limiter(1, 60);
        assert!(limiter.check_limit("client-a", "/login"));
        assert!(!limiter.check_limit("client-a", "/login"));
        assert!(limiter.check_limit("client-a", "/products"));
    }

    #[test]
    fn empty_endpoint_means_default() {
        let (limiter, _) = limiter(1, 60);
        assert!(limiter.check_limit("client-a", ""));
        assert!(!limiter.check_limit("client-a", DEFAULT_ENDPOINT));
    }

    #[test]
    fn reset_time_follows_oldest_request() {
        let (limiter, clock) = limiter(3, 60);
        assert_eq!(limiter.get_reset_time("c", "e").unwrap().timestamp(), T0);

        limiter.check_limit("c", "e");
        clock.set(T0 + 5);
        limiter.check_limit("c", "e");
        clock.set(T0 + 10);
        limiter.check_limit("c", "e");
        assert_eq!(limiter.get_reset_time("c", "e").unwrap().timestamp(), T0 + 60);

        clock.set(T0 + 59);
        assert!(!limiter.check_limit("c", "e"));
        clock.set(T0 + 60);
        assert!(limiter.check_limit("c", "e"));
        assert_eq!(limiter.get_reset_time("c", "e").unwrap().timestamp(), T0 + 65);
    }

    #[test]
    fn decision_reports_bucket_state() {
        let (limiter, clock) = limiter(2, 60);
        let first = limiter.decide("c", "e");
        assert_eq!(
            first,
            Decision { allowed: true, limit: 2, usage: 1, remaining: 1, reset_at: T0 + 60 }
        );

        clock.advance(15);
        limiter.decide("c", "e");
        let rejected = limiter.decide("c", "e");
        assert!(!rejected.allowed);
        assert_eq!(rejected.usage, 2);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.retry_after(clock.now()), 45);
    }

    #[test]
    fn zero_limit_rejects_everything() {
        let (limiter, _) = limiter(0, 60);
        assert!(!limiter.check_limit("c", "e"));
        assert_eq!(limiter.get_usage("c", "e").unwrap(), 0);
    }

    #[test]
    fn empty_client_address_is_an_error() {
        let (limiter, _) = limiter(5, 60);
        assert!(matches!(limiter.try_check("", "e"), Err(Error::EmptyClientAddress)));
        assert!(matches!(limiter.get_usage("", "e"), Err(Error::EmptyClientAddress)));
    }

    #[test]
    fn store_errors_follow_policy() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("limits.json");
        std::fs::write(&path, "garbage").unwrap();

        // the store defaults to fail-open, the limiter's config decides
        let closed = RateLimiter::new(
            FileStore::new(&path),
            RateLimitConfig { on_store_error: FailurePolicy::FailClosed, ..Default::default() },
        );
        assert!(!closed.check_limit("c", "e"));
        assert!(closed.get_usage("c", "e").is_err());

        let open = RateLimiter::new(
            FileStore::new(&path).with_failure_policy(FailurePolicy::FailClosed),
            RateLimitConfig::default(),
        );
        assert!(open.check_limit("c", "e"));
        assert_eq!(open.get_usage("c", "e").unwrap(), 1);
    }

    #[test]
    fn fail_closed_limiter_keeps_rejecting_a_corrupt_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("limits.json");
        std::fs::write(&path, "garbage").unwrap();

        let limiter = RateLimiter::new(
            FileStore::new(&path),
            RateLimitConfig { on_store_error: FailurePolicy::FailClosed, ..Default::default() },
        );
        for _ in 0..3 {
            assert!(!limiter.check_limit("c", "e"));
        }
        assert!(limiter.sweep().is_err());

        std::fs::remove_file(&path).unwrap();
        assert!(limiter.check_limit("c", "e"));
    }

    #[test]
    fn oversized_window_reports_an_error_instead_of_the_epoch() {
        let (limiter, _) = limiter(5, u64::MAX);
        assert!(limiter.check_limit("c", "e"));
        assert!(matches!(
            limiter.get_reset_time("c", "e"),
            Err(Error::TimestampOutOfRange(i64::MAX))
        ));
    }

    #[test]
    fn peek_reads_usage_remaining_and_reset_together() {
        let (limiter, clock) = limiter(2, 60);
        let empty = limiter.peek("c", "e").unwrap();
        assert_eq!(empty, Decision { allowed: true, limit: 2, usage: 0, remaining: 2, reset_at: T0 });

        limiter.check_limit("c", "e");
        clock.advance(5);
        limiter.check_limit("c", "e");

        let full = limiter.peek("c", "e").unwrap();
        assert_eq!(full, Decision { allowed: false, limit: 2, usage: 2, remaining: 0, reset_at: T0 + 60 });
        // peeking never records
        assert_eq!(limiter.get_usage("c", "e").unwrap(), 2);
        assert_eq!(reset_instant(full.reset_at).unwrap().timestamp(), T0 + 60);
    }

    #[test]
    fn sweep_drops_idle_clients() {
        let (limiter, clock) = limiter(5, 60);
        limiter.check_limit("idle", "e");
        clock.advance(30);
        limiter.check_limit("busy", "e");

        clock.advance(40);
        assert_eq!(limiter.sweep().unwrap(), 1);
        assert_eq!(limiter.store().len(), 1);
    }
}
