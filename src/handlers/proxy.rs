use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, header},
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::error::{AppError, Error};
use crate::metrics::{REQUEST_LATENCY, UPSTREAM_ERRORS};
use crate::middleware::{X_FORWARDED_FOR, peer_address};
use crate::models::RequestContext;
use crate::state::AppState;

// Headers that only make sense for a single hop
const HOP_BY_HOP: [header::HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::CONTENT_LENGTH,
];

// Forward an accepted request to the storefront API
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, AppError> {
    let upstream = state.load_balancer.next().ok_or(AppError::NoUpstream)?;

    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|_| AppError::PayloadTooLarge)?;

    let path_and_query = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let url = format!("{}{}", upstream.url, path_and_query);

    let mut headers = forwardable(&parts.headers);
    headers.remove(header::HOST);
    headers.remove(&X_FORWARDED_FOR);
    if let Some(value) = forwarded_for(&state, &parts.headers, &parts.extensions) {
        headers.insert(X_FORWARDED_FOR.clone(), value);
    }

    debug!(method = %parts.method, url = %url, "forwarding request");
    let start_time = Instant::now();

    let result = state
        .client
        .request(parts.method.clone(), &url)
        .headers(headers)
        .body(body)
        .send()
        .await;

    let res = match result {
        Ok(res) => res,
        Err(e) => {
            UPSTREAM_ERRORS.inc();
            upstream.set_healthy(false);
            warn!(url = %upstream.url, error = %e, "upstream failed, marked unhealthy");
            return Err(Error::from(e).into());
        }
    };

    let status = res.status();
    let response_headers = forwardable(res.headers());
    let bytes = res.bytes().await.map_err(|e| {
        UPSTREAM_ERRORS.inc();
        AppError::from(Error::Upstream(e))
    })?;

    REQUEST_LATENCY.observe(start_time.elapsed().as_secs_f64());

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in &HOP_BY_HOP {
        out.remove(name);
    }
    out
}

// Trusted chains are extended with the peer, otherwise the chain starts at the client
fn forwarded_for(
    state: &AppState,
    headers: &HeaderMap,
    extensions: &axum::http::Extensions,
) -> Option<HeaderValue> {
    let incoming = headers
        .get(&X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty());

    let value = match (state.trust_forwarded_for, incoming, peer_address(extensions)) {
        (true, Some(chain), Some(peer)) => format!("{}, {}", chain, peer),
        (true, Some(chain), None) => chain.to_string(),
        _ => extensions.get::<RequestContext>()?.client_address.clone(),
    };
    HeaderValue::from_str(&value).ok()
}
