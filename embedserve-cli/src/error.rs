//! Thin adapter-level error type wrapping [`embedserve::Error`] plus
//! boundary-only concerns (`SPEC_FULL.md` §7).
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the HTTP and CLI layers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid server/CLI configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Request failed validation before reaching the core (empty input,
    /// invalid base64, mixed string/image input in one call).
    #[error("invalid request: {0}")]
    Validation(String),

    /// Missing or mismatched API key when one is configured.
    #[error("unauthorized")]
    Unauthorized,

    /// Propagated from the core dispatch pipeline.
    #[error(transparent)]
    Core(#[from] embedserve::Error),
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::Config(_) => "config_error",
            ApiError::Validation(_) => "validation_error",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Core(embedserve::Error::ModelNotFound { .. }) => "model_not_found",
            ApiError::Core(embedserve::Error::NotRunning) => "not_running",
            ApiError::Core(embedserve::Error::AlreadyRunning) => "already_running",
            ApiError::Core(embedserve::Error::Inference(_)) => "inference_error",
            ApiError::Core(embedserve::Error::Shutdown) => "shutdown_error",
            ApiError::Core(embedserve::Error::EmptyInput) => "validation_error",
            ApiError::Core(embedserve::Error::Config(_)) => "config_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Core(embedserve::Error::ModelNotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Core(embedserve::Error::NotRunning) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Core(embedserve::Error::AlreadyRunning) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Core(embedserve::Error::Inference(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Core(embedserve::Error::Shutdown) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Core(embedserve::Error::EmptyInput) => StatusCode::BAD_REQUEST,
            ApiError::Core(embedserve::Error::Config(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn context(&self) -> Option<serde_json::Value> {
        match self {
            ApiError::Core(embedserve::Error::ModelNotFound { available, .. }) => {
                Some(json!({ "available_models": available }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
                "context": self.context(),
            }
        }));
        (status, body).into_response()
    }
}
