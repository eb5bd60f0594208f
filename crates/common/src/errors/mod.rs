//! Error types for Pressroom services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for validation, not-found, conflict and storage failures
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling
//!
//! Rasterization failures are intentionally absent: they degrade an ingestion
//! report instead of failing the request (see `pressroom_ingestion::report`).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,
    InvalidFormat,
    InvalidCoordinates,
    NoImageProvided,
    PayloadTooLarge,

    // Authentication errors (2xxx)
    Unauthorized,

    // Resource errors (4xxx)
    PaperNotFound,
    EpaperNotFound,
    PageNotFound,
    ClippingNotFound,

    // Conflict errors (5xxx)
    DuplicateScheduleDate,

    // Rate limiting (6xxx)
    RateLimited,

    // Storage errors (7xxx)
    DatabaseError,
    ConnectionError,
    BlobStorageError,

    // Dependency errors (8xxx)
    AllocatorUnavailable,
    RequestTimeout,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,
            ErrorCode::InvalidFormat => 1003,
            ErrorCode::InvalidCoordinates => 1004,
            ErrorCode::NoImageProvided => 1005,
            ErrorCode::PayloadTooLarge => 1006,

            ErrorCode::Unauthorized => 2001,

            ErrorCode::PaperNotFound => 4001,
            ErrorCode::EpaperNotFound => 4002,
            ErrorCode::PageNotFound => 4003,
            ErrorCode::ClippingNotFound => 4004,

            ErrorCode::DuplicateScheduleDate => 5001,

            ErrorCode::RateLimited => 6001,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,
            ErrorCode::BlobStorageError => 7003,

            ErrorCode::AllocatorUnavailable => 8001,
            ErrorCode::RequestTimeout => 8002,

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

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    #[error("Invalid coordinates: {field} must be a finite number, got {value:?}")]
    InvalidCoordinates { field: String, value: String },

    #[error("No replacement image provided")]
    NoImageProvided,

    #[error("Payload too large: request body exceeds limit of {limit} bytes")]
    PayloadTooLarge { limit: usize },

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    // Resource errors
    #[error("Paper not found: {id}")]
    PaperNotFound { id: String },

    #[error("No e-paper collection exists for tenant {tenant_id}")]
    EpaperNotFound { tenant_id: String },

    #[error("Page {page_number} not found in paper {paper_id}")]
    PageNotFound { paper_id: String, page_number: u32 },

    #[error("Clipping not found: {clip_id}")]
    ClippingNotFound { clip_id: i64 },

    // Conflict errors
    #[error("An edition is already scheduled for {date}")]
    DuplicateScheduleDate { date: NaiveDate },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // Storage errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("Blob storage error: {message}")]
    BlobStorage { message: String },

    // Dependency errors
    #[error("Sequence allocator unavailable: {message}")]
    AllocatorUnavailable { message: String },

    #[error("Request timed out after {timeout_ms}ms")]
    RequestTimeout { timeout_ms: u64 },

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::InvalidCoordinates { .. } => ErrorCode::InvalidCoordinates,
            AppError::NoImageProvided => ErrorCode::NoImageProvided,
            AppError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::PaperNotFound { .. } => ErrorCode::PaperNotFound,
            AppError::EpaperNotFound { .. } => ErrorCode::EpaperNotFound,
            AppError::PageNotFound { .. } => ErrorCode::PageNotFound,
            AppError::ClippingNotFound { .. } => ErrorCode::ClippingNotFound,
            AppError::DuplicateScheduleDate { .. } => ErrorCode::DuplicateScheduleDate,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::BlobStorage { .. } => ErrorCode::BlobStorageError,
            AppError::AllocatorUnavailable { .. } => ErrorCode::AllocatorUnavailable,
            AppError::RequestTimeout { .. } => ErrorCode::RequestTimeout,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request (date conflicts included, the API contract reports them as 400)
            AppError::Validation { .. }
            | AppError::MissingField { .. }
            | AppError::InvalidFormat { .. }
            | AppError::InvalidCoordinates { .. }
            | AppError::NoImageProvided
            | AppError::DuplicateScheduleDate { .. } => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,

            // 404 Not Found
            AppError::PaperNotFound { .. }
            | AppError::EpaperNotFound { .. }
            | AppError::PageNotFound { .. }
            | AppError::ClippingNotFound { .. } => StatusCode::NOT_FOUND,

            // 408 Request Timeout
            AppError::RequestTimeout { .. } => StatusCode::REQUEST_TIMEOUT,

            // 413 Payload Too Large
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::BlobStorage { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 503 Service Unavailable
            AppError::AllocatorUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Nothing to operate on: tenant collection, paper, page or clipping absent
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AppError::PaperNotFound { .. }
                | AppError::EpaperNotFound { .. }
                | AppError::PageNotFound { .. }
                | AppError::ClippingNotFound { .. }
        )
    }

    /// Bad input from the caller
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::Validation { .. }
                | AppError::MissingField { .. }
                | AppError::InvalidFormat { .. }
                | AppError::InvalidCoordinates { .. }
                | AppError::NoImageProvided
                | AppError::PayloadTooLarge { .. }
        )
    }

    /// The per-tenant schedule date invariant rejected the write
    pub fn is_conflict(&self) -> bool {
        matches!(self, AppError::DuplicateScheduleDate { .. })
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
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

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
            AppError::InvalidCoordinates { field, .. } => Some(field.clone()),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                field,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::BlobStorage {
            message: err.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let field = err.field_errors().keys().next().map(|k| k.to_string());
        AppError::Validation {
            message: err.to_string(),
            field,
        }
    }
}
