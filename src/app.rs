use axum::{Router, middleware::from_fn_with_state, routing::get};
use std::sync::Arc;

use crate::handlers::{health_handler, metrics_handler, proxy_handler, status_handler};
use crate::middleware::rate_limit_middleware;
use crate::state::AppState;

// Everything outside the gateway's own endpoints is rate limited and proxied
pub fn router(state: Arc<AppState>) -> Router {
    let proxied = Router::new()
        .fallback(proxy_handler)
        .layer(from_fn_with_state(state.clone(), rate_limit_middleware));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/rate-limit/status", get(status_handler))
        .merge(proxied)
        .with_state(state)
}
