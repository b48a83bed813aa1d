use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Server error types
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("invalid JSON: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration not loaded")]
    NotLoaded,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("internal server error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Convenience constructor for validation failures
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// HTTP status code mapping for server errors
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::InvalidConfig { .. } => StatusCode::BAD_REQUEST,
            ServerError::Decode(_) => StatusCode::BAD_REQUEST,
            // Persist failures on control-plane mutators surface as 400
            ServerError::Io(_) => StatusCode::BAD_REQUEST,
            ServerError::NotLoaded => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}
