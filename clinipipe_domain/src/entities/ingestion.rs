// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Ingestion Statistics
//!
//! One [`IngestionStat`] row is written per processed record attempt and is
//! immutable once recorded. Failures may carry a companion
//! [`FailedRecord`] holding the original payload for forensic replay; the
//! failed record is purged transitively with its stat.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCategory;
use crate::entities::pipeline_run::ProcessingStatus;

/// One processed-record attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionStat {
    /// Storage-assigned id; zero until persisted.
    pub id: i64,
    pub pipeline_run_id: String,
    pub stage_name: String,
    pub file_path: Option<String>,
    pub record_id: Option<String>,
    pub record_type: Option<String>,
    pub status: ProcessingStatus,
    pub error_category: Option<ErrorCategory>,
    pub error_message: Option<String>,
    /// Structured error context, serialized to JSON at the persistence
    /// boundary.
    pub error_details: Option<serde_json::Value>,
    pub processing_time_ms: Option<i64>,
    pub record_size_bytes: Option<i64>,
    pub data_source: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl IngestionStat {
    /// Creates a success stat for one record.
    pub fn success(pipeline_run_id: impl Into<String>, stage_name: impl Into<String>) -> Self {
        Self::with_status(pipeline_run_id, stage_name, ProcessingStatus::Success)
    }

    /// Creates a failure stat; the error fields are filled by the caller.
    pub fn failure(pipeline_run_id: impl Into<String>, stage_name: impl Into<String>) -> Self {
        Self::with_status(pipeline_run_id, stage_name, ProcessingStatus::Failure)
    }

    pub fn with_status(
        pipeline_run_id: impl Into<String>,
        stage_name: impl Into<String>,
        status: ProcessingStatus,
    ) -> Self {
        Self {
            id: 0,
            pipeline_run_id: pipeline_run_id.into(),
            stage_name: stage_name.into(),
            file_path: None,
            record_id: None,
            record_type: None,
            status,
            error_category: None,
            error_message: None,
            error_details: None,
            processing_time_ms: None,
            record_size_bytes: None,
            data_source: None,
            timestamp: Utc::now(),
        }
    }
}

/// Failure payload kept for forensic replay, 1:1-optional with a stat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRecord {
    pub id: i64,
    pub ingestion_stat_id: i64,
    pub original_data: String,
    pub normalized_data: Option<String>,
    pub failure_reason: String,
    pub stack_trace: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate ingestion analytics over a run or time window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestionSummary {
    pub total: i64,
    pub successful: i64,
    pub failed: i64,
    pub skipped: i64,
    /// error category name -> occurrence count
    pub error_breakdown: std::collections::HashMap<String, i64>,
    pub avg_processing_time_ms: f64,
    pub total_bytes_processed: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_stat_defaults() {
        let stat = IngestionStat::success("run-1", "ingestion");
        assert_eq!(stat.status, ProcessingStatus::Success);
        assert!(stat.error_category.is_none());
        assert!(stat.record_id.is_none());
        assert_eq!(stat.id, 0);
    }

    #[test]
    fn test_failure_stat_carries_category() {
        let mut stat = IngestionStat::failure("run-1", "ingestion");
        stat.error_category = Some(ErrorCategory::ParseError);
        stat.error_message = Some("JSON parse error at byte 12".into());
        assert_eq!(stat.status, ProcessingStatus::Failure);
        assert_eq!(stat.error_category, Some(ErrorCategory::ParseError));
    }
}
