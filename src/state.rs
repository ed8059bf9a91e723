use std::sync::Arc;
use crate::config::EndpointScope;
use crate::load_balancer::LoadBalancer;
use crate::rate_limit::{RateLimiter, StoreBackend};

// app's shared state

pub struct AppState {
    pub client: reqwest::Client,
    pub limiter: Arc<RateLimiter<StoreBackend>>,
    pub load_balancer: Arc<LoadBalancer>,
    pub endpoint_scope: EndpointScope,
    pub trust_forwarded_for: bool, // only behind a proxy that sets the header
    pub max_body_bytes: usize,
}
