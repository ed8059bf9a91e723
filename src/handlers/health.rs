use axum::{Json, extract::State, response::IntoResponse};
use std::sync::Arc;
use crate::state::AppState;

// health handler
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let upstreams = state.load_balancer.upstreams();
    let healthy = upstreams.iter().filter(|u| u.is_healthy()).count();

    Json(serde_json::json!({
        "status": "healthy",
        "store": state.limiter.store().name(),
        "upstreams": { "healthy": healthy, "total": upstreams.len() },
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}
