// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Error Classifier
//!
//! Maps a pipeline error plus its context onto `(category, pattern,
//! severity, recoverable)` for the tracking substrate. Classification runs
//! three tiers in priority order:
//!
//! 1. **Type match** on the error variant (confidence 0.9).
//! 2. **Message pattern match** against a regex table (confidence 0.7).
//! 3. **Fallback** to `(system_error, unknown_error)` (confidence 0.3).
//!
//! The classifier also keeps a per-pattern occurrence counter so each
//! classified error reports how many similar errors preceded it, and can
//! aggregate statistics over a collection of classified errors.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};

use clinipipe_domain::entities::Severity;
use clinipipe_domain::error::ErrorCategory;
use clinipipe_domain::PipelineError;

/// Recognized error patterns, finer-grained than the category taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPattern {
    JsonParseError,
    XmlParseError,
    MissingRequiredField,
    InvalidDataType,
    SchemaViolation,
    EncodingError,
    NetworkTimeout,
    ConnectionRefused,
    RateLimitExceeded,
    PermissionDenied,
    AuthenticationFailure,
    MemoryError,
    DiskFull,
    DatabaseFault,
    UnknownError,
}

impl ErrorPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorPattern::JsonParseError => "json_parse_error",
            ErrorPattern::XmlParseError => "xml_parse_error",
            ErrorPattern::MissingRequiredField => "missing_required_field",
            ErrorPattern::InvalidDataType => "invalid_data_type",
            ErrorPattern::SchemaViolation => "schema_violation",
            ErrorPattern::EncodingError => "encoding_error",
            ErrorPattern::NetworkTimeout => "network_timeout",
            ErrorPattern::ConnectionRefused => "connection_refused",
            ErrorPattern::RateLimitExceeded => "rate_limit_exceeded",
            ErrorPattern::PermissionDenied => "permission_denied",
            ErrorPattern::AuthenticationFailure => "authentication_failure",
            ErrorPattern::MemoryError => "memory_error",
            ErrorPattern::DiskFull => "disk_full",
            ErrorPattern::DatabaseFault => "database_fault",
            ErrorPattern::UnknownError => "unknown_error",
        }
    }
}

/// The analysis portion of a classified error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    pub category: ErrorCategory,
    pub pattern: ErrorPattern,
    pub severity: Severity,
    pub description: String,
    pub root_cause: Option<String>,
    pub recommendations: Vec<String>,
    pub technical_details: HashMap<String, serde_json::Value>,
    pub similar_errors_count: usize,
    pub is_recoverable: bool,
    pub confidence_score: f64,
}

/// An error with its classification and capture context.
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    pub original: PipelineError,
    pub analysis: ErrorAnalysis,
    pub stage_name: String,
    pub record_id: Option<String>,
    pub context: HashMap<String, serde_json::Value>,
    pub stack_trace: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate statistics over a collection of classified errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorStatistics {
    pub total: usize,
    pub by_category: HashMap<String, usize>,
    pub by_pattern: HashMap<String, usize>,
    pub by_severity: HashMap<String, usize>,
    pub by_stage: HashMap<String, usize>,
    pub most_common_stage: Option<String>,
    pub avg_confidence: f64,
}

static MESSAGE_PATTERNS: Lazy<Vec<(Regex, ErrorPattern, ErrorCategory)>> = Lazy::new(|| {
    let table: &[(&str, ErrorPattern, ErrorCategory)] = &[
        (r"(?i)json", ErrorPattern::JsonParseError, ErrorCategory::ParseError),
        (r"(?i)\bxml\b", ErrorPattern::XmlParseError, ErrorCategory::ParseError),
        (
            r"(?i)missing (required )?field",
            ErrorPattern::MissingRequiredField,
            ErrorCategory::ValidationError,
        ),
        (
            r"(?i)(invalid|unexpected) (data )?type",
            ErrorPattern::InvalidDataType,
            ErrorCategory::ValidationError,
        ),
        (
            r"(?i)schema (violation|mismatch)",
            ErrorPattern::SchemaViolation,
            ErrorCategory::SchemaError,
        ),
        (
            r"(?i)(utf-?8|encoding|decode)",
            ErrorPattern::EncodingError,
            ErrorCategory::ParseError,
        ),
        (r"(?i)time(d)? ?out", ErrorPattern::NetworkTimeout, ErrorCategory::NetworkError),
        (
            r"(?i)connection (refused|reset|closed)",
            ErrorPattern::ConnectionRefused,
            ErrorCategory::NetworkError,
        ),
        (
            r"(?i)(rate limit|too many requests)",
            ErrorPattern::RateLimitExceeded,
            ErrorCategory::RateLimitError,
        ),
        (
            r"(?i)(permission denied|access denied)",
            ErrorPattern::PermissionDenied,
            ErrorCategory::PermissionError,
        ),
        (
            r"(?i)(authentication|unauthorized|credential)",
            ErrorPattern::AuthenticationFailure,
            ErrorCategory::AuthenticationError,
        ),
        (
            r"(?i)(out of memory|memory exhausted|allocation failed)",
            ErrorPattern::MemoryError,
            ErrorCategory::SystemError,
        ),
        (
            r"(?i)(disk full|no space left)",
            ErrorPattern::DiskFull,
            ErrorCategory::SystemError,
        ),
    ];
    table
        .iter()
        .map(|(pattern, p, c)| (Regex::new(pattern).expect("static pattern"), *p, *c))
        .collect()
});

/// Classifies pipeline errors and tracks pattern frequencies.
#[derive(Default)]
pub struct ErrorClassifier {
    pattern_counts: Mutex<HashMap<ErrorPattern, usize>>,
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies one error observed at `stage_name`.
    pub fn classify(
        &self,
        error: &PipelineError,
        stage_name: &str,
        record_id: Option<&str>,
        context: Option<HashMap<String, serde_json::Value>>,
    ) -> ClassifiedError {
        let message = error.to_string();

        // Tier 1: exact variant match.
        let typed = Self::match_by_type(error, &message);
        let (category, pattern, confidence) = match typed {
            Some((category, pattern)) => (category, pattern, 0.9),
            // Tier 2: message pattern table.
            None => match MESSAGE_PATTERNS.iter().find(|(re, _, _)| re.is_match(&message)) {
                Some((_, pattern, category)) => (*category, *pattern, 0.7),
                // Tier 3: fallback.
                None => (ErrorCategory::SystemError, ErrorPattern::UnknownError, 0.3),
            },
        };

        let (severity, is_recoverable) = Self::severity_for(pattern);
        let similar_errors_count = {
            let mut counts = self.pattern_counts.lock();
            let entry = counts.entry(pattern).or_insert(0);
            let previous = *entry;
            *entry += 1;
            previous
        };

        let mut technical_details = HashMap::new();
        technical_details.insert("error_category".to_string(), serde_json::json!(category.as_str()));
        technical_details.insert("error_display".to_string(), serde_json::json!(message.clone()));

        ClassifiedError {
            original: error.clone(),
            analysis: ErrorAnalysis {
                category,
                pattern,
                severity,
                description: message,
                root_cause: Self::root_cause_for(pattern),
                recommendations: Self::recommendations_for(pattern),
                technical_details,
                similar_errors_count,
                is_recoverable,
                confidence_score: confidence,
            },
            stage_name: stage_name.to_string(),
            record_id: record_id.map(str::to_string),
            context: context.unwrap_or_default(),
            stack_trace: None,
            timestamp: Utc::now(),
        }
    }

    fn match_by_type(error: &PipelineError, message: &str) -> Option<(ErrorCategory, ErrorPattern)> {
        match error {
            PipelineError::ParseError(_) => {
                let pattern = if message.to_lowercase().contains("xml") {
                    ErrorPattern::XmlParseError
                } else {
                    ErrorPattern::JsonParseError
                };
                Some((ErrorCategory::ParseError, pattern))
            }
            PipelineError::SchemaError(_) => Some((ErrorCategory::SchemaError, ErrorPattern::SchemaViolation)),
            PipelineError::PermissionError(_) => {
                Some((ErrorCategory::PermissionError, ErrorPattern::PermissionDenied))
            }
            PipelineError::AuthenticationError(_) => Some((
                ErrorCategory::AuthenticationError,
                ErrorPattern::AuthenticationFailure,
            )),
            // Timeouts surface as network faults for retry purposes.
            PipelineError::TimeoutError(_) => Some((ErrorCategory::NetworkError, ErrorPattern::NetworkTimeout)),
            PipelineError::NetworkError(_) => Some((ErrorCategory::NetworkError, ErrorPattern::ConnectionRefused)),
            PipelineError::RateLimitError(_) => {
                Some((ErrorCategory::RateLimitError, ErrorPattern::RateLimitExceeded))
            }
            PipelineError::Database(_) => Some((ErrorCategory::DatabaseError, ErrorPattern::DatabaseFault)),
            PipelineError::SystemError(_) => {
                let lower = message.to_lowercase();
                if lower.contains("memory") {
                    Some((ErrorCategory::SystemError, ErrorPattern::MemoryError))
                } else if lower.contains("disk full") || lower.contains("no space") {
                    Some((ErrorCategory::SystemError, ErrorPattern::DiskFull))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn severity_for(pattern: ErrorPattern) -> (Severity, bool) {
        match pattern {
            ErrorPattern::MemoryError | ErrorPattern::DiskFull => (Severity::Critical, false),
            ErrorPattern::PermissionDenied | ErrorPattern::AuthenticationFailure => (Severity::High, false),
            ErrorPattern::JsonParseError
            | ErrorPattern::XmlParseError
            | ErrorPattern::MissingRequiredField
            | ErrorPattern::InvalidDataType
            | ErrorPattern::SchemaViolation
            | ErrorPattern::EncodingError => (Severity::Medium, true),
            ErrorPattern::NetworkTimeout | ErrorPattern::ConnectionRefused | ErrorPattern::RateLimitExceeded => {
                (Severity::Medium, true)
            }
            ErrorPattern::DatabaseFault => (Severity::High, true),
            ErrorPattern::UnknownError => (Severity::Medium, false),
        }
    }

    fn root_cause_for(pattern: ErrorPattern) -> Option<String> {
        let cause = match pattern {
            ErrorPattern::JsonParseError => "Malformed JSON input",
            ErrorPattern::XmlParseError => "Malformed XML input",
            ErrorPattern::MissingRequiredField => "Source record lacks a required field",
            ErrorPattern::MemoryError => "Process exceeded available memory",
            ErrorPattern::DiskFull => "Storage volume has no free space",
            ErrorPattern::NetworkTimeout => "Remote endpoint did not respond in time",
            _ => return None,
        };
        Some(cause.to_string())
    }

    fn recommendations_for(pattern: ErrorPattern) -> Vec<String> {
        let recommendations: &[&str] = match pattern {
            ErrorPattern::JsonParseError | ErrorPattern::XmlParseError => &[
                "Validate the source file against its format before ingestion",
                "Inspect the failed-record payload for truncation",
            ],
            ErrorPattern::MissingRequiredField | ErrorPattern::InvalidDataType => &[
                "Review upstream data mapping for the affected field",
                "Add a validation rule at the source adapter",
            ],
            ErrorPattern::NetworkTimeout | ErrorPattern::ConnectionRefused => &[
                "Retry the operation; the fault is likely transient",
                "Check connectivity to the remote endpoint",
            ],
            ErrorPattern::RateLimitExceeded => &["Reduce request concurrency or add backoff"],
            ErrorPattern::PermissionDenied => &["Verify filesystem and credential permissions for the service account"],
            ErrorPattern::AuthenticationFailure => &["Refresh or re-issue the credentials in use"],
            ErrorPattern::MemoryError => &["Lower batch sizes or raise the memory limit"],
            ErrorPattern::DiskFull => &["Free storage or expand the volume before retrying"],
            ErrorPattern::DatabaseFault => &["Check database availability and recent schema changes"],
            _ => &[],
        };
        recommendations.iter().map(|s| s.to_string()).collect()
    }

    /// Aggregates statistics over a collection of classified errors.
    pub fn aggregate_statistics(errors: &[ClassifiedError]) -> ErrorStatistics {
        let mut stats = ErrorStatistics {
            total: errors.len(),
            ..Default::default()
        };
        if errors.is_empty() {
            return stats;
        }

        let mut confidence_sum = 0.0;
        for error in errors {
            *stats
                .by_category
                .entry(error.analysis.category.as_str().to_string())
                .or_insert(0) += 1;
            *stats
                .by_pattern
                .entry(error.analysis.pattern.as_str().to_string())
                .or_insert(0) += 1;
            *stats
                .by_severity
                .entry(error.analysis.severity.as_str().to_string())
                .or_insert(0) += 1;
            *stats.by_stage.entry(error.stage_name.clone()).or_insert(0) += 1;
            confidence_sum += error.analysis.confidence_score;
        }
        stats.avg_confidence = confidence_sum / errors.len() as f64;
        stats.most_common_stage = stats
            .by_stage
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(stage, _)| stage.clone());
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ErrorClassifier {
        ErrorClassifier::new()
    }

    #[test]
    fn test_json_parse_error_classification() {
        let classifier = classifier();
        let error: PipelineError = serde_json::from_str::<serde_json::Value>("{\"incomplete")
            .unwrap_err()
            .into();
        let classified = classifier.classify(&error, "ingestion", Some("rec_123"), None);

        assert_eq!(classified.analysis.category, ErrorCategory::ParseError);
        assert_eq!(classified.analysis.pattern, ErrorPattern::JsonParseError);
        assert_eq!(classified.analysis.severity, Severity::Medium);
        assert!(classified.analysis.is_recoverable);
        assert!(classified.analysis.confidence_score > 0.5);
        assert_eq!(classified.stage_name, "ingestion");
        assert_eq!(classified.record_id.as_deref(), Some("rec_123"));
    }

    #[test]
    fn test_missing_field_message_pattern() {
        let classifier = classifier();
        let error = PipelineError::ValidationError("Missing required field: patient_id".into());
        let classified = classifier.classify(&error, "validation", None, None);

        assert_eq!(classified.analysis.category, ErrorCategory::ValidationError);
        assert_eq!(classified.analysis.pattern, ErrorPattern::MissingRequiredField);
        assert!(classified.analysis.is_recoverable);
    }

    #[test]
    fn test_memory_error_is_critical_and_unrecoverable() {
        let classifier = classifier();
        let error = PipelineError::SystemError("out of memory while embedding batch".into());
        let classified = classifier.classify(&error, "embedding", None, None);

        assert_eq!(classified.analysis.category, ErrorCategory::SystemError);
        assert_eq!(classified.analysis.pattern, ErrorPattern::MemoryError);
        assert_eq!(classified.analysis.severity, Severity::Critical);
        assert!(!classified.analysis.is_recoverable);
    }

    #[test]
    fn test_permission_error_high_not_recoverable() {
        let classifier = classifier();
        let error = PipelineError::PermissionError("access denied: /data".into());
        let classified = classifier.classify(&error, "file_access", None, None);

        assert_eq!(classified.analysis.category, ErrorCategory::PermissionError);
        assert_eq!(classified.analysis.severity, Severity::High);
        assert!(!classified.analysis.is_recoverable);
    }

    #[test]
    fn test_timeout_maps_to_network_category() {
        let classifier = classifier();
        let error = PipelineError::timeout("vector store upsert timed out");
        let classified = classifier.classify(&error, "vectorstore", None, None);

        assert_eq!(classified.analysis.category, ErrorCategory::NetworkError);
        assert_eq!(classified.analysis.pattern, ErrorPattern::NetworkTimeout);
        assert!(classified.analysis.is_recoverable);
    }

    #[test]
    fn test_fallback_classification() {
        let classifier = classifier();
        let error = PipelineError::InternalError("something inexplicable".into());
        let classified = classifier.classify(&error, "chunking", None, None);

        assert_eq!(classified.analysis.category, ErrorCategory::SystemError);
        assert_eq!(classified.analysis.pattern, ErrorPattern::UnknownError);
        assert!((classified.analysis.confidence_score - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_type_match_outranks_message_match() {
        let classifier = classifier();
        // The message mentions a timeout, but the variant is a parse error.
        let error = PipelineError::ParseError("parser timed out reading value".into());
        let classified = classifier.classify(&error, "ingestion", None, None);
        assert_eq!(classified.analysis.category, ErrorCategory::ParseError);
        assert!((classified.analysis.confidence_score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_always_in_bounds() {
        let classifier = classifier();
        let errors = [
            PipelineError::parse("bad json"),
            PipelineError::ValidationError("missing field x".into()),
            PipelineError::InternalError("mystery".into()),
            PipelineError::timeout("slow"),
        ];
        for error in &errors {
            let classified = classifier.classify(error, "stage", None, None);
            let c = classified.analysis.confidence_score;
            assert!((0.0..=1.0).contains(&c));
        }
    }

    #[test]
    fn test_similar_errors_counter_increments() {
        let classifier = classifier();
        let error = PipelineError::parse("bad json");
        let first = classifier.classify(&error, "ingestion", None, None);
        let second = classifier.classify(&error, "ingestion", None, None);
        assert_eq!(first.analysis.similar_errors_count, 0);
        assert_eq!(second.analysis.similar_errors_count, 1);
    }

    #[test]
    fn test_aggregate_statistics() {
        let classifier = classifier();
        let classified: Vec<ClassifiedError> = vec![
            classifier.classify(&PipelineError::parse("bad json"), "ingestion", None, None),
            classifier.classify(&PipelineError::parse("also bad"), "ingestion", None, None),
            classifier.classify(&PipelineError::timeout("slow"), "vectorstore", None, None),
        ];
        let stats = ErrorClassifier::aggregate_statistics(&classified);

        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_category.get("parse_error"), Some(&2));
        assert_eq!(stats.by_stage.get("ingestion"), Some(&2));
        assert_eq!(stats.most_common_stage.as_deref(), Some("ingestion"));
        assert!(stats.avg_confidence > 0.0);
    }

    #[test]
    fn test_aggregate_statistics_empty() {
        let stats = ErrorClassifier::aggregate_statistics(&[]);
        assert_eq!(stats.total, 0);
        assert!(stats.most_common_stage.is_none());
    }
}
