//! Error types for Lectern
//!
//! Provides a single error enum for every crate with:
//! - Distinct variants per failure mode of the pipeline
//! - Machine-readable error codes
//! - HTTP status code mapping
//! - Structured error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,

    // Pipeline errors (2xxx)
    RetrievalError,
    GenerationError,
    SchemaParseError,
    NoContext,
    Timeout,
    EmbeddingError,

    // Storage errors (3xxx)
    PersistenceError,
    DatabaseError,
    CacheError,

    // Upstream errors (8xxx)
    UpstreamError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,

            // Pipeline (2xxx)
            ErrorCode::RetrievalError => 2001,
            ErrorCode::GenerationError => 2002,
            ErrorCode::SchemaParseError => 2003,
            ErrorCode::NoContext => 2004,
            ErrorCode::Timeout => 2005,
            ErrorCode::EmbeddingError => 2006,

            // Storage (3xxx)
            ErrorCode::PersistenceError => 3001,
            ErrorCode::DatabaseError => 3002,
            ErrorCode::CacheError => 3003,

            // Upstream (8xxx)
            ErrorCode::UpstreamError => 8001,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    // Pipeline errors
    #[error("Retrieval failed: {message}")]
    Retrieval { message: String },

    #[error("Generation failed: {message}")]
    Generation { message: String },

    #[error("Structured output did not match schema: {message}")]
    SchemaParse { message: String },

    #[error("{message}")]
    NoContext { message: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Embedding service error: {message}")]
    Embedding { message: String },

    // Storage errors
    #[error("Failed to persist conversation turn: {message}")]
    Persistence { message: String },

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Cache error: {message}")]
    Cache { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a validation error on a named field
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    /// Shorthand for a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        AppError::Configuration {
            message: message.into(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::Retrieval { .. } => ErrorCode::RetrievalError,
            AppError::Generation { .. } => ErrorCode::GenerationError,
            AppError::SchemaParse { .. } => ErrorCode::SchemaParseError,
            AppError::NoContext { .. } => ErrorCode::NoContext,
            AppError::Timeout { .. } => ErrorCode::Timeout,
            AppError::Embedding { .. } => ErrorCode::EmbeddingError,
            AppError::Persistence { .. } => ErrorCode::PersistenceError,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::Cache { .. } => ErrorCode::CacheError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } |
            AppError::MissingField { .. } => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::NoContext { .. } => StatusCode::NOT_FOUND,

            // 422 Unprocessable Entity
            AppError::SchemaParse { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 500 Internal Server Error
            AppError::Persistence { .. } |
            AppError::Database(_) |
            AppError::Internal { .. } |
            AppError::Configuration { .. } |
            AppError::Serialization(_) |
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::Retrieval { .. } |
            AppError::Generation { .. } |
            AppError::Embedding { .. } |
            AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::Cache { .. } => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            AppError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Errors that earn a structured worker its simplified retry
    pub fn is_retryable_for_artifact(&self) -> bool {
        matches!(
            self,
            AppError::SchemaParse { .. } | AppError::Generation { .. } | AppError::Timeout { .. }
        )
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub numeric_code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let field = match &self {
            AppError::Validation { field, .. } => field.clone(),
            AppError::MissingField { field } => Some(field.clone()),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                numeric_code: code.as_code(),
                message,
                field,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Cache {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field = errors.field_errors().keys().next().map(|f| f.to_string());
        AppError::Validation {
            message: errors.to_string(),
            field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::Persistence { message: "disk full".into() };
        assert_eq!(err.code(), ErrorCode::PersistenceError);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::validation("query", "must not be empty");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
    }

    #[test]
    fn test_artifact_retry_classification() {
        assert!(AppError::SchemaParse { message: "x".into() }.is_retryable_for_artifact());
        assert!(AppError::Generation { message: "x".into() }.is_retryable_for_artifact());
        assert!(AppError::Timeout { operation: "generate".into(), timeout_ms: 10 }
            .is_retryable_for_artifact());
        assert!(!AppError::Retrieval { message: "x".into() }.is_retryable_for_artifact());
        assert!(!AppError::NoContext { message: "x".into() }.is_retryable_for_artifact());
    }

    #[test]
    fn test_numeric_codes_are_grouped() {
        assert_eq!(ErrorCode::ValidationError.as_code() / 1000, 1);
        assert_eq!(ErrorCode::SchemaParseError.as_code() / 1000, 2);
        assert_eq!(ErrorCode::PersistenceError.as_code() / 1000, 3);
        assert_eq!(ErrorCode::ConfigurationError.as_code() / 1000, 9);
    }
}
