//! Error types for the RAG gateway
//!
//! Provides:
//! - Distinct error types for the failure modes of a query pipeline
//! - Stable machine-readable error codes
//! - HTTP status code mapping
//! - Structured `{error:{code,message}}` responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Stable error codes surfaced in JSON error bodies
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRequest,
    PipelineNotFound,
    MethodNotAllowed,
    ExecutionError,
    StreamingError,
    InternalError,
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Request validation
    #[error("{message}")]
    InvalidRequest { message: String },

    #[error("unsupported filter operator: {operator}")]
    UnsupportedOperator { operator: String },

    // Routing
    #[error("pipeline not found: {name}")]
    PipelineNotFound { name: String },

    #[error("method not allowed")]
    MethodNotAllowed,

    // Pipeline execution
    #[error("embedding failed: {message}")]
    Embedding { message: String, retryable: bool },

    #[error("database error: {message}")]
    Database { message: String },

    #[error("completion failed: {message}")]
    Completion { message: String, retryable: bool },

    #[error("no documents found for query")]
    NoDocumentsFound,

    // Construction-time failures
    #[error("provider {provider} does not support {capability}")]
    UnsupportedCapability {
        provider: String,
        capability: String,
    },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("credential error: {message}")]
    Credential { message: String },

    // Transport
    #[error("streaming error: {message}")]
    Streaming { message: String },

    #[error("internal server error: {message}")]
    Internal { message: String },
}

impl AppError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        AppError::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        AppError::Internal {
            message: message.into(),
        }
    }

    /// Get the stable error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::InvalidRequest { .. } | AppError::UnsupportedOperator { .. } => {
                ErrorCode::InvalidRequest
            }
            AppError::PipelineNotFound { .. } => ErrorCode::PipelineNotFound,
            AppError::MethodNotAllowed => ErrorCode::MethodNotAllowed,
            AppError::Embedding { .. }
            | AppError::Database { .. }
            | AppError::Completion { .. }
            | AppError::NoDocumentsFound
            | AppError::UnsupportedCapability { .. }
            | AppError::Configuration { .. }
            | AppError::Credential { .. } => ErrorCode::ExecutionError,
            AppError::Streaming { .. } => ErrorCode::StreamingError,
            AppError::Internal { .. } => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self.code() {
            ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCode::PipelineNotFound => StatusCode::NOT_FOUND,
            ErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorCode::ExecutionError | ErrorCode::StreamingError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether an outer layer may retry the operation
    ///
    /// Set for provider failures classified as transient (rate limit,
    /// network, timeout). The core never retries on its own.
    pub fn is_retryable(&self) -> Option<bool> {
        match self {
            AppError::Embedding { retryable, .. } | AppError::Completion { retryable, .. } => {
                Some(*retryable)
            }
            _ => None,
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

/// Structured error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        ErrorResponse {
            error: ErrorDetails {
                code: err.code(),
                message: err.to_string(),
                retryable: err.is_retryable(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        if self.is_server_error() {
            tracing::error!(error = %message, code = ?code, status = status.as_u16(), "request failed");
        } else {
            tracing::warn!(error = %message, code = ?code, status = status.as_u16(), "request rejected");
        }

        (status, Json(ErrorResponse::from(&self))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_and_status_mapping() {
        let err = AppError::PipelineNotFound {
            name: "docs".into(),
        };
        assert_eq!(err.code(), ErrorCode::PipelineNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err = AppError::NoDocumentsFound;
        assert_eq!(err.code(), ErrorCode::ExecutionError);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "no documents found for query");

        let err = AppError::UnsupportedOperator {
            operator: "BETWEEN".into(),
        };
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn error_body_shape() {
        let err = AppError::invalid_request("query must not be empty");
        let body = serde_json::to_value(ErrorResponse::from(&err)).unwrap();
        assert_eq!(body["error"]["code"], "INVALID_REQUEST");
        assert_eq!(body["error"]["message"], "query must not be empty");
        assert!(body["error"].get("retryable").is_none());
    }

    #[test]
    fn transient_provider_errors_carry_retryable() {
        let err = AppError::Completion {
            message: "rate limited".into(),
            retryable: true,
        };
        let body = serde_json::to_value(ErrorResponse::from(&err)).unwrap();
        assert_eq!(body["error"]["retryable"], true);
    }
}
