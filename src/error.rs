//! Error handling module
//!
//! Provides the HTTP-facing `AppError`, the migration error taxonomy and the
//! non-fatal warnings that are recorded in a run report.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match &self {
            AppError::Migration(MigrationError::Connection { endpoint, message }) => (
                StatusCode::BAD_GATEWAY,
                "CONNECTION_ERROR",
                format!("Could not connect to {}", endpoint),
                Some(message.clone()),
            ),
            AppError::Migration(MigrationError::Config(msg)) => (
                StatusCode::BAD_REQUEST,
                "CONFIG_ERROR",
                msg.clone(),
                None,
            ),
            AppError::Migration(e) => {
                error!("Migration error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "MIGRATION_ERROR",
                    "A migration error occurred".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg.clone(),
                None,
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                msg.clone(),
                None,
            ),
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                "CONFLICT",
                msg.clone(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: details,
            code: Some(error_code.to_string()),
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AppError {
    AppError::Validation(msg.into())
}

/// Helper function to create a not found error
pub fn not_found_error(msg: impl Into<String>) -> AppError {
    AppError::NotFound(msg.into())
}

/// Helper function to create a conflict error
pub fn conflict_error(msg: impl Into<String>) -> AppError {
    AppError::Conflict(msg.into())
}

/// Errors raised while migrating.
///
/// Only `Connection` aborts a run. Every other variant is caught at the
/// table or batch boundary and recorded in the report.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Connection to {endpoint} failed: {message}")]
    Connection { endpoint: String, message: String },

    #[error("Introspection of {table} failed: {message}")]
    Introspection { table: String, message: String },

    #[error("DDL for {table} failed: {message}")]
    Ddl { table: String, message: String },

    #[error("Batch {batch} of {table} failed: {message}")]
    BatchCopy {
        table: String,
        batch: usize,
        message: String,
    },

    #[error("Sequence {name}: {message}")]
    Sequence { name: String, message: String },

    #[error("Source read failed: {0}")]
    SourceRead(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("ODBC error: {0}")]
    Odbc(#[from] odbc_api::Error),
}

impl MigrationError {
    pub fn connection(endpoint: impl Into<String>, message: impl ToString) -> Self {
        MigrationError::Connection {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    pub fn introspection(table: impl Into<String>, message: impl ToString) -> Self {
        MigrationError::Introspection {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn ddl(table: impl Into<String>, message: impl ToString) -> Self {
        MigrationError::Ddl {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn batch(table: impl Into<String>, batch: usize, message: impl ToString) -> Self {
        MigrationError::BatchCopy {
            table: table.into(),
            batch,
            message: message.to_string(),
        }
    }

    pub fn sequence(name: impl Into<String>, message: impl ToString) -> Self {
        MigrationError::Sequence {
            name: name.into(),
            message: message.to_string(),
        }
    }
}

/// Result alias for the migration core
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Non-fatal conditions recorded alongside a table's errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MigrationWarning {
    #[error("column {column}: no mapping for type {native_type}, using TEXT")]
    TypeMapping { column: String, native_type: String },

    #[error("sequence {sequence}: {detail}")]
    SequenceDegrade { sequence: String, detail: String },

    #[error("destination column {column} has no matching source column and is excluded")]
    UnmatchedColumn { column: String },

    #[error("column {column}: {count} value(s) replaced with NULL ({reason})")]
    NullSubstitution {
        column: String,
        count: usize,
        reason: String,
    },

    #[error("column {column}: default `{expression}` cannot be carried over and was dropped")]
    DefaultDropped { column: String, expression: String },
}
