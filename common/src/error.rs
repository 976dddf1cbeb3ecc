// Error types for ChainPulse services
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("all RPC endpoints unavailable for chain {chain}")]
    AllEndpointsUnavailable { chain: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("subscriber capacity reached ({0})")]
    Capacity(usize),

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MonitorError>;

impl MonitorError {
    /// Transient failures are retried at the nearest resource boundary;
    /// everything else surfaces to the caller immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            MonitorError::Timeout(_) => true,
            MonitorError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            MonitorError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }
}

impl IntoResponse for MonitorError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            MonitorError::AllEndpointsUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "RPC endpoints unavailable")
            }
            MonitorError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "Upstream timeout"),
            MonitorError::Rpc { .. } => (StatusCode::BAD_GATEWAY, "RPC error"),
            MonitorError::Decode(_) => (StatusCode::BAD_GATEWAY, "Decode error"),
            MonitorError::Persistence(_) | MonitorError::Database(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "Database error")
            }
            MonitorError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Configuration error"),
            MonitorError::Capacity(_) => (StatusCode::SERVICE_UNAVAILABLE, "Capacity exceeded"),
            MonitorError::Invariant(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
            MonitorError::Http(_) => (StatusCode::BAD_GATEWAY, "External service error"),
            MonitorError::Json(_) => (StatusCode::BAD_REQUEST, "Invalid JSON"),
        };

        let body = axum::Json(serde_json::json!({
            "error": error_message,
            "details": self.to_string()
        }));

        (status, body).into_response()
    }
}
