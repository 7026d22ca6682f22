// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Batch Accounting
//!
//! Shared counter core for every stage tracker. A batch accumulates record
//! outcomes; `finish` stamps the completion time so derived rates can be
//! computed. Skipped and partial outcomes count toward the total but are
//! excluded from both the success and the failure rate, so
//! `success_rate + failure_rate <= 100`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clinipipe_domain::entities::ProcessingStatus;
use clinipipe_domain::error::ErrorCategory;

/// One record outcome as observed by a stage tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordOutcome {
    pub record_id: String,
    pub status: ProcessingStatus,
    pub record_type: Option<String>,
    pub file_path: Option<String>,
    pub data_source: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub error_message: Option<String>,
    pub processing_time_ms: Option<i64>,
    pub record_size_bytes: Option<i64>,
    /// Domain-specific measurements (chunk counts, embedding dims, quality
    /// scores) keyed by the constants in [`metadata_keys`].
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl RecordOutcome {
    pub fn new(record_id: impl Into<String>, status: ProcessingStatus) -> Self {
        Self {
            record_id: record_id.into(),
            status,
            record_type: None,
            file_path: None,
            data_source: None,
            error_category: None,
            error_message: None,
            processing_time_ms: None,
            record_size_bytes: None,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(serde_json::Value::as_f64)
    }
}

/// Metadata keys understood by the domain metric types.
pub mod metadata_keys {
    pub const CHUNK_COUNT: &str = "chunk_count";
    pub const AVG_CHUNK_SIZE: &str = "avg_chunk_size";
    pub const EMBEDDING_COUNT: &str = "embedding_count";
    pub const EMBEDDING_DIMS: &str = "embedding_dims";
    pub const QUALITY_SCORE: &str = "quality_score";
}

/// Counter core shared by every stage batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCore {
    pub batch_id: String,
    pub pipeline_run_id: String,
    pub stage_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_records: u64,
    pub successful_records: u64,
    pub failed_records: u64,
    pub skipped_records: u64,
    pub partial_success_records: u64,
    pub total_processing_time_ms: u64,
    pub total_bytes: u64,
    /// error category name -> occurrence count
    pub errors_by_category: HashMap<String, u64>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl BatchCore {
    pub fn new(
        batch_id: impl Into<String>,
        pipeline_run_id: impl Into<String>,
        stage_name: impl Into<String>,
    ) -> Self {
        Self {
            batch_id: batch_id.into(),
            pipeline_run_id: pipeline_run_id.into(),
            stage_name: stage_name.into(),
            started_at: Utc::now(),
            completed_at: None,
            total_records: 0,
            successful_records: 0,
            failed_records: 0,
            skipped_records: 0,
            partial_success_records: 0,
            total_processing_time_ms: 0,
            total_bytes: 0,
            errors_by_category: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    /// Folds one outcome into the counters.
    pub fn observe(&mut self, outcome: &RecordOutcome) {
        self.total_records += 1;
        match outcome.status {
            ProcessingStatus::Success => self.successful_records += 1,
            ProcessingStatus::Failure => self.failed_records += 1,
            ProcessingStatus::Skipped => self.skipped_records += 1,
            ProcessingStatus::PartialSuccess => self.partial_success_records += 1,
        }
        if let Some(ms) = outcome.processing_time_ms {
            self.total_processing_time_ms += ms.max(0) as u64;
        }
        if let Some(bytes) = outcome.record_size_bytes {
            self.total_bytes += bytes.max(0) as u64;
        }
        if let Some(category) = outcome.error_category {
            *self.errors_by_category.entry(category.as_str().to_string()).or_insert(0) += 1;
        }
    }

    pub fn finish(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    /// Percentage of successful records; skipped and partial are excluded.
    pub fn success_rate(&self) -> f64 {
        if self.total_records == 0 {
            0.0
        } else {
            self.successful_records as f64 / self.total_records as f64 * 100.0
        }
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total_records == 0 {
            0.0
        } else {
            self.failed_records as f64 / self.total_records as f64 * 100.0
        }
    }

    pub fn avg_processing_time_ms(&self) -> f64 {
        if self.total_records == 0 {
            0.0
        } else {
            self.total_processing_time_ms as f64 / self.total_records as f64
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0))
    }

    /// Records per second across the batch wall time; None until finished.
    pub fn records_per_second(&self) -> Option<f64> {
        let duration_ms = self.duration_ms()?;
        if duration_ms <= 0 {
            return None;
        }
        Some(self.total_records as f64 / (duration_ms as f64 / 1000.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn outcome(status: ProcessingStatus) -> RecordOutcome {
        RecordOutcome::new("rec", status)
    }

    #[test]
    fn test_counters_by_status() {
        let mut core = BatchCore::new("b1", "run-1", "ingestion");
        core.observe(&outcome(ProcessingStatus::Success));
        core.observe(&outcome(ProcessingStatus::Failure));
        core.observe(&outcome(ProcessingStatus::Skipped));
        core.observe(&outcome(ProcessingStatus::PartialSuccess));

        assert_eq!(core.total_records, 4);
        assert_eq!(core.successful_records, 1);
        assert_eq!(core.failed_records, 1);
        assert_eq!(core.skipped_records, 1);
        assert_eq!(core.partial_success_records, 1);
    }

    #[test]
    fn test_rates_exclude_skipped_and_partial() {
        let mut core = BatchCore::new("b1", "run-1", "ingestion");
        for _ in 0..2 {
            core.observe(&outcome(ProcessingStatus::Success));
        }
        core.observe(&outcome(ProcessingStatus::Skipped));
        core.observe(&outcome(ProcessingStatus::PartialSuccess));

        assert!((core.success_rate() - 50.0).abs() < 1e-9);
        assert!((core.failure_rate() - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_error_histogram() {
        let mut core = BatchCore::new("b1", "run-1", "ingestion");
        let mut failure = outcome(ProcessingStatus::Failure);
        failure.error_category = Some(ErrorCategory::ParseError);
        core.observe(&failure);
        core.observe(&failure.clone());

        assert_eq!(core.errors_by_category.get("parse_error"), Some(&2));
    }

    #[test]
    fn test_empty_batch_rates_are_zero() {
        let core = BatchCore::new("b1", "run-1", "ingestion");
        assert_eq!(core.success_rate(), 0.0);
        assert_eq!(core.failure_rate(), 0.0);
        assert_eq!(core.avg_processing_time_ms(), 0.0);
        assert!(core.records_per_second().is_none());
    }

    proptest! {
        #[test]
        fn prop_rates_never_exceed_hundred(
            successes in 0u64..200,
            failures in 0u64..200,
            skips in 0u64..200,
            partials in 0u64..200,
        ) {
            let mut core = BatchCore::new("b", "run", "stage");
            for _ in 0..successes { core.observe(&outcome(ProcessingStatus::Success)); }
            for _ in 0..failures { core.observe(&outcome(ProcessingStatus::Failure)); }
            for _ in 0..skips { core.observe(&outcome(ProcessingStatus::Skipped)); }
            for _ in 0..partials { core.observe(&outcome(ProcessingStatus::PartialSuccess)); }

            prop_assert!(core.success_rate() + core.failure_rate() <= 100.0 + 1e-9);
            prop_assert_eq!(
                core.total_records,
                successes + failures + skips + partials
            );
        }
    }
}
