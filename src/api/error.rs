//! HTTP error responses

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::error::{ServiceError, UpstreamError};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Visualization not found")]
    NotFound,

    #[error("TargetProcess service error: {0}")]
    Upstream(UpstreamError),

    #[error("{0}")]
    Internal(String),
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Upstream(e) => ApiError::Upstream(e),
            ServiceError::NotFound(_) => ApiError::NotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Validation(details) => (
                StatusCode::BAD_REQUEST,
                json!({"error": "Validation failed", "details": details}),
            ),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                json!({"error": "Visualization not found"}),
            ),
            ApiError::Upstream(e) => (
                StatusCode::BAD_GATEWAY,
                json!({"error": "TargetProcess service error", "details": e.message}),
            ),
            ApiError::Internal(details) => {
                error!("Request failed: {}", details);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": "Internal server error", "details": details}),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransformError;

    #[test]
    fn test_service_errors_map_to_status_codes() {
        let cases = [
            (
                ServiceError::Upstream(UpstreamError::new(500, "boom")),
                StatusCode::BAD_GATEWAY,
            ),
            (ServiceError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                ServiceError::Transform(TransformError::NotAnObject),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
        assert_eq!(
            ApiError::Validation("title".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }
}
