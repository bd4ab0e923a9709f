//! API error types and response handling.
//!
//! This module provides a unified error type for all API handlers
//! with automatic conversion to appropriate HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
///
/// Each variant maps to a specific HTTP status code and produces a
/// consistent JSON error response.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input from client.
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 500 Internal Server Error - Unexpected server-side error.
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 503 Service Unavailable - The command queue cannot take the message.
    ServiceUnavailable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Whether retrying later may succeed.
        retryable: bool,
    },
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "queue_full",
    "message": "Command queue is full; message dropped",
    "details": { "retryable": true }
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "queue_full").
    #[schema(example = "queue_full")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "Command queue is full; message dropped")]
    pub message: String,

    /// Optional additional details.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Self::BadRequest {
                error_code,
                message,
            } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::InternalError {
                error_code,
                message,
            } => {
                tracing::error!(
                    error_code = %error_code,
                    message = %message,
                    "Internal server error"
                );

                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: error_code,
                        message,
                        details: None,
                    },
                )
            }

            Self::ServiceUnavailable {
                error_code,
                message,
                retryable,
            } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: Some(serde_json::json!({ "retryable": retryable })),
                },
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message, .. } => write!(f, "Bad Request: {message}"),
            Self::InternalError { message, .. } => write!(f, "Internal Error: {message}"),
            Self::ServiceUnavailable { message, .. } => {
                write!(f, "Service Unavailable: {message}")
            }
        }
    }
}

impl std::error::Error for ApiError {}

/// Convert from beacon_core errors.
impl From<beacon_core::BeaconError> for ApiError {
    fn from(err: beacon_core::BeaconError) -> Self {
        let error_code = err.error_code().to_ascii_lowercase();
        let message = err.to_string();

        match err.http_status_code() {
            400 => Self::BadRequest {
                error_code,
                message,
            },
            503 => Self::ServiceUnavailable {
                error_code,
                message,
                retryable: err.is_recoverable(),
            },
            _ => Self::InternalError {
                error_code,
                message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::BeaconError;

    #[test]
    fn test_queue_full_is_service_unavailable() {
        let err = ApiError::from(BeaconError::QueueFull);
        assert!(matches!(
            err,
            ApiError::ServiceUnavailable { ref error_code, retryable: true, .. } if error_code == "queue_full"
        ));
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_closed_queue_is_not_retryable() {
        let err = ApiError::from(BeaconError::QueueClosed);
        assert!(matches!(err, ApiError::ServiceUnavailable { retryable: false, .. }));
    }

    #[test]
    fn test_invalid_region_is_bad_request() {
        let err = ApiError::from(BeaconError::InvalidRegion("unique id is empty".into()));
        assert!(err.to_string().contains("Bad Request"));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_persistence_failure_is_internal_error() {
        let err = ApiError::from(BeaconError::PersistenceError("disk full".into()));
        assert!(matches!(
            err,
            ApiError::InternalError { ref error_code, .. } if error_code == "persistence_error"
        ));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse {
            error: "queue_full".to_string(),
            message: "Command queue is full".to_string(),
            details: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("queue_full"));
    }
}
