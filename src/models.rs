use serde::Serialize;

// Request-scoped data set by the rate limit middleware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub client_address: String,
    pub endpoint: String,
}

// GET /rate-limit/status response format
#[derive(Debug, Serialize)]
pub struct RateLimitStatus {
    pub client: String,
    pub endpoint: String,
    pub limit: u32,
    pub usage: u32,
    pub remaining: u32,
    pub reset_at: String,
}
