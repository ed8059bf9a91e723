use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{Extensions, HeaderMap, HeaderName, HeaderValue, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{info, warn};

use crate::config::EndpointScope;
use crate::error::{AppError, Error};
use crate::metrics::{RATE_LIMITED, REQUEST_TOTAL};
use crate::models::RequestContext;
use crate::rate_limit::{DEFAULT_ENDPOINT, Decision};
use crate::state::AppState;

pub const UNKNOWN_CLIENT: &str = "unknown";

pub static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

// Who is calling and which bucket the request counts against
pub fn resolve_context(
    state: &AppState,
    headers: &HeaderMap,
    extensions: &Extensions,
    path: &str,
) -> RequestContext {
    let forwarded = state
        .trust_forwarded_for
        .then(|| {
            headers
                .get(&X_FORWARDED_FOR)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .flatten();

    let client_address = forwarded
        .or_else(|| peer_address(extensions))
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

    let endpoint = match state.endpoint_scope {
        EndpointScope::Global => DEFAULT_ENDPOINT.to_string(),
        EndpointScope::PerPath => path.to_string(),
    };

    RequestContext {
        client_address,
        endpoint,
    }
}

pub fn peer_address(extensions: &Extensions) -> Option<String> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

// Runs before every proxied request; rejected requests never reach the handler
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    REQUEST_TOTAL.inc();

    let context = resolve_context(&state, request.headers(), request.extensions(), request.uri().path());
    let decision = decide(&state, &context).await;

    if !decision.allowed {
        RATE_LIMITED.inc();
        info!(
            client = %context.client_address,
            endpoint = %context.endpoint,
            usage = decision.usage,
            "rejected request over rate limit"
        );
        let retry_after = decision.retry_after(state.limiter.now());
        let mut response = AppError::RateLimited.into_response();
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(retry_after));
        apply_headers(response.headers_mut(), &decision);
        return response;
    }

    request.extensions_mut().insert(context);
    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &decision);
    response
}

// File-backed checks do blocking IO, keep them off the async workers
async fn decide(state: &AppState, context: &RequestContext) -> Decision {
    let limiter = Arc::clone(&state.limiter);
    let client = context.client_address.clone();
    let endpoint = context.endpoint.clone();

    match tokio::task::spawn_blocking(move || limiter.decide(&client, &endpoint)).await {
        Ok(decision) => decision,
        Err(e) => {
            let err = Error::from(e);
            warn!(error = %err, "rate limit check did not complete");
            state.limiter.fallback_decision()
        }
    }
}

fn apply_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING.clone(), HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET.clone(), HeaderValue::from(decision.reset_at));
}
