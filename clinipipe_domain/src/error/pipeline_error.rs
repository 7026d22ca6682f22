// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error System
//!
//! Hierarchical error types for the ingestion pipeline domain. Errors are
//! organized into the categories used throughout the tracking substrate:
//!
//! - **Record-scoped faults** (`ValidationError`, `ParseError`,
//!   `SchemaError`): caused by the data itself, recoverable, handled by the
//!   stage worker without aborting the run.
//! - **Environment faults** (`PermissionError`, `AuthenticationError`): not
//!   recoverable within a run.
//! - **Transient faults** (`NetworkError`, `TimeoutError`,
//!   `RateLimitError`): recoverable with retry.
//! - **Process-scoped faults** (`SystemError`, `ConfigurationError`): fatal.
//! - **Database faults** (`Database`): subdivided into connection, query,
//!   transaction, and not-supported kinds — see [`DatabaseError`].
//!
//! The error classifier builds its type-match tier on top of these variants;
//! the [`ErrorCategory`] enum is the persisted form written into
//! `ingestion_stats.error_category`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Domain-specific errors for the ingestion pipeline.
///
/// Each variant carries a descriptive message. Variants map one-to-one onto
/// the persisted [`ErrorCategory`] taxonomy via [`PipelineError::category`].
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Permission error: {0}")]
    PermissionError(String),

    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitError(String),

    #[error("System error: {0}")]
    SystemError(String),

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Metrics error: {0}")]
    MetricsError(String),
}

/// Database error kinds surfaced by the persistence providers.
///
/// The three operational kinds are distinct so that callers can branch on
/// retry-ability: connection loss is retried once inside `health_check`,
/// query faults are surfaced immediately, and transaction aborts roll back
/// the scoped guard. `NotSupported` marks engine tiers that are not bundled
/// in the open-source build.
#[derive(Error, Debug, Clone)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Database query error: {0}")]
    Query(String),

    #[error("Database transaction error: {0}")]
    Transaction(String),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl PipelineError {
    /// Creates a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Creates a new parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    /// Creates a new configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::ConfigurationError(msg.into())
    }

    /// Creates a new processing error
    pub fn processing_failed(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    /// Creates a new IO error
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::IoError(msg.into())
    }

    /// Creates a new timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::TimeoutError(msg.into())
    }

    /// Creates a new internal error
    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Creates a new metrics error
    pub fn metrics_error(msg: impl Into<String>) -> Self {
        Self::MetricsError(msg.into())
    }

    /// Creates a cancellation error with the canonical run-level message.
    pub fn cancelled() -> Self {
        Self::Cancelled("Pipeline execution was cancelled".to_string())
    }

    /// Creates a cancellation error with a custom message
    pub fn cancelled_with_msg(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Checks if the error is recoverable at record scope.
    ///
    /// Record-scoped data faults and transient infrastructure faults are
    /// recoverable; environment and process faults are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::ValidationError(_)
                | PipelineError::ParseError(_)
                | PipelineError::SchemaError(_)
                | PipelineError::NetworkError(_)
                | PipelineError::TimeoutError(_)
                | PipelineError::RateLimitError(_)
                | PipelineError::IoError(_)
        )
    }

    /// Gets the persisted error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::ValidationError(_) => ErrorCategory::ValidationError,
            PipelineError::ParseError(_) => ErrorCategory::ParseError,
            PipelineError::SchemaError(_) => ErrorCategory::SchemaError,
            PipelineError::PermissionError(_) => ErrorCategory::PermissionError,
            PipelineError::AuthenticationError(_) => ErrorCategory::AuthenticationError,
            PipelineError::NetworkError(_) => ErrorCategory::NetworkError,
            PipelineError::TimeoutError(_) => ErrorCategory::TimeoutError,
            PipelineError::RateLimitError(_) => ErrorCategory::RateLimitError,
            PipelineError::SystemError(_) => ErrorCategory::SystemError,
            PipelineError::ConfigurationError(_) => ErrorCategory::ConfigurationError,
            PipelineError::Database(_) => ErrorCategory::DatabaseError,
            PipelineError::SerializationError(_) => ErrorCategory::ParseError,
            PipelineError::IoError(_) => ErrorCategory::SystemError,
            PipelineError::ProcessingFailed(_) => ErrorCategory::SystemError,
            PipelineError::Cancelled(_) => ErrorCategory::SystemError,
            PipelineError::InternalError(_) => ErrorCategory::SystemError,
            PipelineError::MetricsError(_) => ErrorCategory::SystemError,
        }
    }
}

/// Persisted error taxonomy used by the tracking substrate.
///
/// Stored in `ingestion_stats.error_category` and aggregated in the
/// ingestion summary's error breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ValidationError,
    ParseError,
    SchemaError,
    PermissionError,
    AuthenticationError,
    NetworkError,
    TimeoutError,
    RateLimitError,
    SystemError,
    ConfigurationError,
    DatabaseError,
}

impl ErrorCategory {
    /// Canonical snake_case name, matching the stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::ValidationError => "validation_error",
            ErrorCategory::ParseError => "parse_error",
            ErrorCategory::SchemaError => "schema_error",
            ErrorCategory::PermissionError => "permission_error",
            ErrorCategory::AuthenticationError => "authentication_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::RateLimitError => "rate_limit_error",
            ErrorCategory::SystemError => "system_error",
            ErrorCategory::ConfigurationError => "configuration_error",
            ErrorCategory::DatabaseError => "database_error",
        }
    }

    /// Parses the stored representation back into a category.
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "validation_error" => Some(ErrorCategory::ValidationError),
            "parse_error" => Some(ErrorCategory::ParseError),
            "schema_error" => Some(ErrorCategory::SchemaError),
            "permission_error" => Some(ErrorCategory::PermissionError),
            "authentication_error" => Some(ErrorCategory::AuthenticationError),
            "network_error" => Some(ErrorCategory::NetworkError),
            "timeout_error" => Some(ErrorCategory::TimeoutError),
            "rate_limit_error" => Some(ErrorCategory::RateLimitError),
            "system_error" => Some(ErrorCategory::SystemError),
            "configuration_error" => Some(ErrorCategory::ConfigurationError),
            "database_error" => Some(ErrorCategory::DatabaseError),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Implement conversion from standard library errors
impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => PipelineError::PermissionError(err.to_string()),
            std::io::ErrorKind::TimedOut => PipelineError::TimeoutError(err.to_string()),
            _ => PipelineError::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::ParseError(format!("JSON parse error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trip() {
        let categories = [
            ErrorCategory::ValidationError,
            ErrorCategory::ParseError,
            ErrorCategory::SchemaError,
            ErrorCategory::PermissionError,
            ErrorCategory::AuthenticationError,
            ErrorCategory::NetworkError,
            ErrorCategory::TimeoutError,
            ErrorCategory::RateLimitError,
            ErrorCategory::SystemError,
            ErrorCategory::ConfigurationError,
            ErrorCategory::DatabaseError,
        ];
        for cat in categories {
            assert_eq!(ErrorCategory::parse_str(cat.as_str()), Some(cat));
        }
    }

    #[test]
    fn test_recoverability() {
        assert!(PipelineError::parse("bad json").is_recoverable());
        assert!(PipelineError::timeout("slow backend").is_recoverable());
        assert!(!PipelineError::SystemError("oom".into()).is_recoverable());
        assert!(!PipelineError::PermissionError("denied".into()).is_recoverable());
    }

    #[test]
    fn test_json_error_maps_to_parse() {
        let err = serde_json::from_str::<serde_json::Value>("{\"incomplete").unwrap_err();
        let pipeline_err: PipelineError = err.into();
        assert_eq!(pipeline_err.category(), ErrorCategory::ParseError);
        assert!(pipeline_err.to_string().contains("JSON"));
    }

    #[test]
    fn test_database_error_kinds_are_distinct() {
        let conn: PipelineError = DatabaseError::Connection("refused".into()).into();
        let query: PipelineError = DatabaseError::Query("syntax".into()).into();
        let txn: PipelineError = DatabaseError::Transaction("aborted".into()).into();
        assert_eq!(conn.category(), ErrorCategory::DatabaseError);
        assert!(matches!(query, PipelineError::Database(DatabaseError::Query(_))));
        assert!(matches!(txn, PipelineError::Database(DatabaseError::Transaction(_))));
    }

    #[test]
    fn test_cancelled_message_is_canonical() {
        assert_eq!(PipelineError::cancelled().to_string(), "Cancelled: Pipeline execution was cancelled");
    }
}
