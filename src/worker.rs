use std::sync::Arc;
use tokio::time::{Duration, interval};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::metrics::TRACKED_CLIENTS;
use crate::rate_limit::{RateLimiter, StoreBackend};

// Background sweeper -> evicts expired requests from every bucket
pub async fn sweeper(limiter: Arc<RateLimiter<StoreBackend>>, every: Duration) {
    let mut interval = interval(every);

    info!(interval = ?every, "rate limit sweeper started");

    loop {
        interval.tick().await;

        let limiter = Arc::clone(&limiter);
        let swept = tokio::task::spawn_blocking(move || limiter.sweep())
            .await
            .map_err(Error::from)
            .and_then(|result| result);

        match swept {
            Ok(tracked) => {
                TRACKED_CLIENTS.set(tracked as f64);
                debug!(tracked, "swept expired rate limit buckets");
            }
            Err(e) => warn!(error = %e, "rate limit sweep failed"),
        }
    }
}
