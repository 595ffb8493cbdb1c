//! Error handling module for the sync core and the backend.
//!
//! One error taxonomy is shared by the local store, the remote adapter and the
//! HTTP service so that a failure keeps its meaning across the wire.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Error codes as constants to avoid stringly-typed errors.
pub mod codes {
    pub const UNAUTHENTICATED: &str = "UNAUTHENTICATED";
    pub const NOT_FOUND_OR_FORBIDDEN: &str = "NOT_FOUND_OR_FORBIDDEN";
    pub const ZERO_ROWS_AFFECTED: &str = "ZERO_ROWS_AFFECTED";
    pub const TRANSPORT_FAILURE: &str = "TRANSPORT_FAILURE";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const CONFIGURATION_ERROR: &str = "CONFIGURATION_ERROR";
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Application error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// A mutating call was made without an owner identity
    Unauthenticated(String),
    /// The id/owner combination matches nothing (existence is not leaked)
    NotFoundOrForbidden(String),
    /// A remote update/delete matched no rows
    ZeroRowsAffected(String),
    /// The remote call did not complete
    TransportFailure(String),
    /// Input rejected before touching storage
    Validation(String),
    /// Missing or malformed configuration
    Configuration(String),
    /// Embedded store or backend database error
    Database(String),
    /// Malformed request payload
    BadRequest(String),
    /// Internal error
    Internal(String),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFoundOrForbidden(_) => StatusCode::NOT_FOUND,
            AppError::ZeroRowsAffected(_) => StatusCode::NOT_FOUND,
            AppError::TransportFailure(_) => StatusCode::BAD_GATEWAY,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Unauthenticated(_) => codes::UNAUTHENTICATED,
            AppError::NotFoundOrForbidden(_) => codes::NOT_FOUND_OR_FORBIDDEN,
            AppError::ZeroRowsAffected(_) => codes::ZERO_ROWS_AFFECTED,
            AppError::TransportFailure(_) => codes::TRANSPORT_FAILURE,
            AppError::Validation(_) => codes::VALIDATION_ERROR,
            AppError::Configuration(_) => codes::CONFIGURATION_ERROR,
            AppError::Database(_) => codes::DATABASE_ERROR,
            AppError::BadRequest(_) => codes::BAD_REQUEST,
            AppError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        match self {
            AppError::Unauthenticated(msg)
            | AppError::NotFoundOrForbidden(msg)
            | AppError::ZeroRowsAffected(msg)
            | AppError::TransportFailure(msg)
            | AppError::Validation(msg)
            | AppError::Configuration(msg)
            | AppError::Database(msg)
            | AppError::BadRequest(msg)
            | AppError::Internal(msg) => msg.clone(),
        }
    }

    /// Rebuild an error from a backend error envelope.
    pub fn from_code(code: &str, message: String) -> Self {
        match code {
            codes::UNAUTHENTICATED => AppError::Unauthenticated(message),
            codes::NOT_FOUND_OR_FORBIDDEN => AppError::NotFoundOrForbidden(message),
            codes::ZERO_ROWS_AFFECTED => AppError::ZeroRowsAffected(message),
            codes::TRANSPORT_FAILURE => AppError::TransportFailure(message),
            codes::VALIDATION_ERROR => AppError::Validation(message),
            codes::CONFIGURATION_ERROR => AppError::Configuration(message),
            codes::DATABASE_ERROR => AppError::Database(message),
            codes::BAD_REQUEST => AppError::BadRequest(message),
            _ => AppError::Internal(message),
        }
    }

    /// Whether leaving the record pending and trying again later can help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::TransportFailure(_) | AppError::Database(_) | AppError::Internal(_)
        )
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        AppError::Database(format!("Database error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON error: {:?}", err);
        AppError::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        tracing::warn!("Transport error: {:?}", err);
        AppError::TransportFailure(format!("Transport error: {}", err))
    }
}

/// Error details in the response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

/// Error response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetails,
}

impl ErrorResponse {
    pub fn new(error: &AppError) -> Self {
        Self {
            success: false,
            error: ErrorDetails {
                code: error.error_code().to_string(),
                message: error.message(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(ErrorResponse::new(&self))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip_through_envelope() {
        let errors = [
            AppError::Unauthenticated("no owner".into()),
            AppError::NotFoundOrForbidden("missing".into()),
            AppError::ZeroRowsAffected("gone".into()),
            AppError::TransportFailure("timeout".into()),
            AppError::Validation("bad".into()),
        ];
        for err in errors {
            let envelope = ErrorResponse::new(&err);
            let rebuilt = AppError::from_code(&envelope.error.code, envelope.error.message);
            assert_eq!(rebuilt, err);
        }
    }

    #[test]
    fn test_zero_rows_is_distinct_from_transport() {
        let zero = AppError::ZeroRowsAffected("x".into());
        let transport = AppError::TransportFailure("x".into());
        assert_ne!(zero.error_code(), transport.error_code());
        assert!(!zero.is_retryable());
        assert!(transport.is_retryable());
    }

    #[test]
    fn test_unknown_code_maps_to_internal() {
        let err = AppError::from_code("SOMETHING_ELSE", "boom".into());
        assert_eq!(err, AppError::Internal("boom".into()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
