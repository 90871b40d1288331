use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Malformed admin input
    #[error("{0}")]
    InvalidInput(String),

    #[error("a route with path '{0}' already exists")]
    DuplicatePath(String),

    /// Route id unknown to the admin API
    #[error("route {0} not found")]
    NotFound(i64),

    /// No enabled route prefixes the request path
    #[error("no route matches {0}")]
    NoMatch(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("route store error: {0}")]
    Store(StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ProxyError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidInput(msg) => ProxyError::InvalidInput(msg),
            StoreError::DuplicatePath(path) => ProxyError::DuplicatePath(path),
            StoreError::NotFound(id) => ProxyError::NotFound(id),
            other => ProxyError::Store(other),
        }
    }
}

impl ResponseError for ProxyError {
    fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ProxyError::DuplicatePath(_) => StatusCode::CONFLICT,
            ProxyError::NotFound(_) | ProxyError::NoMatch(_) => StatusCode::NOT_FOUND,
            ProxyError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Unauthorized => StatusCode::UNAUTHORIZED,
            ProxyError::Store(_) | ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error, message) = match self {
            ProxyError::InvalidInput(msg) => ("invalid_input", msg.clone()),
            ProxyError::DuplicatePath(path) => (
                "duplicate_path",
                format!("A route with path '{path}' already exists"),
            ),
            ProxyError::NotFound(_) => ("not_found", "Route not found".to_string()),
            ProxyError::NoMatch(_) => (
                "no_matching_route",
                "No matching proxy route found for this path".to_string(),
            ),
            ProxyError::UpstreamUnavailable(_) => (
                "upstream_unavailable",
                "Failed to reach upstream service".to_string(),
            ),
            ProxyError::Unauthorized => (
                "unauthorized",
                "Valid Bearer token required".to_string(),
            ),
            ProxyError::Store(e) => {
                tracing::error!("Route store error: {}", e);
                ("internal_error", "An internal error occurred".to_string())
            }
            ProxyError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                ("internal_error", "An internal error occurred".to_string())
            }
        };

        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": error,
            "message": message,
        }))
    }
}
