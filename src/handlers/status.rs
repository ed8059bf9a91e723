use axum::{
    Json,
    extract::{Query, Request, State},
};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{AppError, Error, Result};
use crate::middleware::resolve_context;
use crate::models::{RateLimitStatus, RequestContext};
use crate::rate_limit::{RateLimiter, StoreBackend, reset_instant};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    // Bucket to report on when buckets are per path
    pub endpoint: Option<String>,
}

// Report the caller's bucket without consuming quota
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
    request: Request,
) -> std::result::Result<Json<RateLimitStatus>, AppError> {
    let mut context = resolve_context(&state, request.headers(), request.extensions(), request.uri().path());
    if let Some(endpoint) = query.endpoint.filter(|e| !e.is_empty()) {
        context.endpoint = endpoint;
    }

    let limiter = Arc::clone(&state.limiter);
    let status = tokio::task::spawn_blocking(move || read_status(&limiter, context)).await.map_err(Error::from)??;
    Ok(Json(status))
}

fn read_status(
    limiter: &RateLimiter<StoreBackend>,
    context: RequestContext,
) -> Result<RateLimitStatus> {
    let RequestContext { client_address, endpoint } = context;
    // one store cycle, so the three numbers agree with each other
    let decision = limiter.peek(&client_address, &endpoint)?;

    Ok(RateLimitStatus {
        client: client_address,
        endpoint,
        limit: decision.limit,
        usage: decision.usage,
        remaining: decision.remaining,
        reset_at: reset_instant(decision.reset_at)?.to_rfc3339(),
    })
}
