use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::error::{Error, Result};
use crate::rate_limit::{FailurePolicy, FileStore, MemoryStore, RateLimitConfig, StoreBackend};

// Longest accepted window (one year); reset times must stay representable
pub const MAX_RATE_WINDOW: u64 = 365 * 24 * 60 * 60;

// Where rate limit buckets live
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    // In-process map, lost on restart
    Memory,
    // JSON snapshot on disk, survives restarts
    File,
}

// How requests are grouped into buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EndpointScope {
    // One bucket per client for the whole API
    Global,
    // One bucket per client and request path
    PerPath,
}

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "storefront-gateway")]
#[command(about = "Rate limiting gateway in front of the storefront API")]
pub struct Args {
    // Address to bind
    #[arg(long, env = "STOREFRONT_HOST", default_value = "0.0.0.0")]
    pub host: String,

    // Port to run the server on
    #[arg(short, long, env = "STOREFRONT_PORT", default_value_t = 8080)]
    pub port: u16,

    // Storefront API servers (comma-separated)
    // Example: "localhost:8000,localhost:8001"
    #[arg(short, long, env = "STOREFRONT_BACKENDS", default_value = "localhost:8000")]
    pub backends: String,

    // Path probed on every backend by the health checker
    #[arg(long, env = "STOREFRONT_HEALTH_PATH", default_value = "/health")]
    pub health_path: String,

    // Rate limit max requests per window
    #[arg(long, env = "STOREFRONT_RATE_LIMIT", default_value_t = 100)]
    pub rate_limit: u32,

    // Rate limit window in seconds
    #[arg(long, env = "STOREFRONT_RATE_WINDOW", default_value_t = 60)]
    pub rate_window: u64,

    #[arg(long, value_enum, env = "STOREFRONT_STORE", default_value_t = StoreKind::File)]
    pub store: StoreKind,

    // Snapshot file for the file store
    #[arg(long, env = "STOREFRONT_STORE_PATH", default_value = "data/rate_limits.json")]
    pub store_path: PathBuf,

    // What to do when the store cannot be read
    #[arg(long, value_enum, env = "STOREFRONT_ON_STORE_ERROR", default_value_t = FailurePolicy::FailOpen)]
    pub on_store_error: FailurePolicy,

    #[arg(long, value_enum, env = "STOREFRONT_ENDPOINT_SCOPE", default_value_t = EndpointScope::Global)]
    pub endpoint_scope: EndpointScope,

    // Take the client address from X-Forwarded-For (only behind a trusted proxy)
    #[arg(long, env = "STOREFRONT_TRUST_FORWARDED_FOR")]
    pub trust_forwarded_for: bool,

    // Health check interval in seconds
    #[arg(long, env = "STOREFRONT_HEALTH_INTERVAL", default_value_t = 30)]
    pub health_interval: u64,

    // Expired bucket sweep interval in seconds
    #[arg(long, env = "STOREFRONT_SWEEP_INTERVAL", default_value_t = 60)]
    pub sweep_interval: u64,

    // Largest request body forwarded upstream
    #[arg(long, env = "STOREFRONT_MAX_BODY_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub max_body_bytes: usize,
}

impl Args {
    pub fn validate(&self) -> Result<()> {
        if self.rate_window == 0 {
            return Err(Error::Config("--rate-window must be at least 1 second".to_string()));
        }
        if self.rate_window > MAX_RATE_WINDOW {
            return Err(Error::Config(format!(
                "--rate-window must be at most {} seconds, got {}",
                MAX_RATE_WINDOW, self.rate_window
            )));
        }
        if self.health_interval == 0 || self.sweep_interval == 0 {
            return Err(Error::Config("intervals must be at least 1 second".to_string()));
        }
        if !self.health_path.starts_with('/') {
            return Err(Error::Config(format!(
                "--health-path must start with '/', got {:?}",
                self.health_path
            )));
        }
        Ok(())
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            window_seconds: self.rate_window,
            max_requests: self.rate_limit,
            on_store_error: self.on_store_error,
        }
    }

    pub fn build_store(&self) -> StoreBackend {
        match self.store {
            StoreKind::Memory => StoreBackend::Memory(MemoryStore::new()),
            StoreKind::File => StoreBackend::File(FileStore::new(&self.store_path)),
        }
    }
}
