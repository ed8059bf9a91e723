use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

// Crate-wide error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Rate limit store is unreadable: {0}")]
    CorruptStore(String),

    #[error("Reset time {0} is outside the representable range")]
    TimestampOutOfRange(i64),

    #[error("Client address must not be empty")]
    EmptyClientAddress,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;

// Errors surfaced to HTTP clients by the gateway
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,

    #[error("No healthy upstream available")]
    NoUpstream,

    #[error("Upstream request failed: {0}")]
    BadGateway(String),

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::NoUpstream => StatusCode::SERVICE_UNAVAILABLE,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        match err {
            Error::Upstream(e) => AppError::BadGateway(e.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));
        (status, body).into_response()
    }
}
