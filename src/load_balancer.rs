use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::time::{Duration, interval};
use tracing::{info, warn};

use crate::error::{Error, Result};

// Single storefront API server
#[derive(Debug)]
pub struct Upstream {
    pub url: String,
    healthy: AtomicBool,
}

impl Upstream {
    pub fn new(url: String) -> Self {
        Self {
            url,
            healthy: AtomicBool::new(true),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }
}

// Round-robin over the healthy upstreams
#[derive(Debug)]
pub struct LoadBalancer {
    upstreams: Vec<Arc<Upstream>>,
    current: AtomicUsize,
}

impl LoadBalancer {
    // Create from comma-separated urls "localhost:8000, localhost:8001"
    pub fn new(upstreams_str: &str) -> Result<Self> {
        let upstreams: Vec<Arc<Upstream>> = upstreams_str
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|url| {
                let full_url = if url.starts_with("http://") || url.starts_with("https://") {
                    url.trim_end_matches('/').to_string()
                } else {
                    format!("http://{}", url.trim_end_matches('/'))
                };
                Arc::new(Upstream::new(full_url))
            })
            .collect();

        if upstreams.is_empty() {
            return Err(Error::Config("at least one backend is required".to_string()));
        }

        for (i, upstream) in upstreams.iter().enumerate() {
            info!(index = i + 1, url = %upstream.url, "registered upstream");
        }

        Ok(Self {
            upstreams,
            current: AtomicUsize::new(0),
        })
    }

    // Get next healthy upstream (round-robin)
    pub fn next(&self) -> Option<Arc<Upstream>> {
        let len = self.upstreams.len();
        let start = self.current.fetch_add(1, Ordering::Relaxed) % len;

        (0..len)
            .map(|i| &self.upstreams[(start + i) % len])
            .find(|upstream| upstream.is_healthy())
            .map(Arc::clone)
    }

    pub fn upstreams(&self) -> &[Arc<Upstream>] {
        &self.upstreams
    }
}

// Probe every upstream on a fixed interval and flip its health flag
pub async fn health_checker(
    load_balancer: Arc<LoadBalancer>,
    client: reqwest::Client,
    health_path: String,
    check_interval: Duration,
) {
    let mut interval = interval(check_interval);

    info!(interval = ?check_interval, "health checker started");

    loop {
        interval.tick().await;

        for upstream in load_balancer.upstreams() {
            let url = format!("{}{}", upstream.url, health_path);
            let was_healthy = upstream.is_healthy();

            let is_healthy = match client.get(&url).timeout(Duration::from_secs(5)).send().await {
                Ok(res) => res.status().is_success(),
                Err(_) => false,
            };
            upstream.set_healthy(is_healthy);

            if was_healthy != is_healthy {
                if is_healthy {
                    info!(url = %upstream.url, "upstream is now healthy");
                } else {
                    warn!(url = %upstream.url, "upstream is now unhealthy");
                }
            }
        }
    }
}
