//! API error envelope and status mapping.
//!
//! Every failure leaves the service as `{ "error": ..., "code": ..., "details"? }`
//! so clients can branch on `code` without parsing prose.

use atelier_core::{EnrollError, StoreError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Result type alias for handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Failures raised at the HTTP layer; everything from the enrollment engine
/// arrives through the [`EnrollError`] variant.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Core(#[from] EnrollError),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            // Uniqueness violations from the user directory are client errors.
            StoreError::Conflict(message) => ApiError::Conflict(message),
            other => ApiError::Core(EnrollError::Store(other)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, details) = match &self {
            ApiError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "AUTH_REQUIRED", None),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN", None),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", None),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", None),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT", None),
            ApiError::Core(err) => core_status(err),
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

fn core_status(err: &EnrollError) -> (StatusCode, &'static str, Option<serde_json::Value>) {
    match err {
        EnrollError::WorkshopNotFound(_) | EnrollError::UserNotFound(_) => {
            (StatusCode::NOT_FOUND, "NOT_FOUND", None)
        }
        EnrollError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", None),
        EnrollError::PolicyDenied(reason) => (
            StatusCode::FORBIDDEN,
            "POLICY_DENIED",
            serde_json::to_value(reason)
                .ok()
                .map(|reason| serde_json::json!({ "reason": reason })),
        ),
        EnrollError::EnrollmentClosed(_) => (StatusCode::BAD_REQUEST, "ENROLLMENT_CLOSED", None),
        EnrollError::CapacityExceeded(_) => (StatusCode::BAD_REQUEST, "CAPACITY_EXCEEDED", None),
        EnrollError::AlreadyEnrolled { .. } => (StatusCode::BAD_REQUEST, "ALREADY_ENROLLED", None),
        // Removal of someone who is not on the roster targets a missing
        // resource, same as an unknown workshop.
        EnrollError::NotEnrolled { .. } => (StatusCode::NOT_FOUND, "NOT_ENROLLED", None),
        EnrollError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_UNAVAILABLE", None),
    }
}
