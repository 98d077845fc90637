//! Parley HTTP server
//!
//! Streams conversation turns as newline-delimited JSON and exposes
//! health, readiness and Prometheus endpoints.

pub mod auth;
pub mod conversation;
pub mod http;
pub mod metrics;
pub mod state;
pub mod wire;

pub use auth::{auth_middleware, CurrentUser};
pub use http::create_router;
pub use metrics::init_metrics;
pub use state::AppState;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Server is shutting down")]
    Unavailable,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<&ServerError> for StatusCode {
    fn from(err: &ServerError) -> Self {
        match err {
            ServerError::Auth(_) => StatusCode::UNAUTHORIZED,
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = StatusCode::from(&self);
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            StatusCode::from(&ServerError::Auth("missing".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            StatusCode::from(&ServerError::Unavailable),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
