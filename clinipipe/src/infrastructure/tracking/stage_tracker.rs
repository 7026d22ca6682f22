// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Generic Stage Tracker
//!
//! Per-stage batch accounting shared by the ingestion, chunking, embedding
//! and quality trackers. The generic core owns the counters, the bounded
//! completed-batch list (cap 100), optional per-record history, and the
//! persistence write-through; the [`StageMetrics`] parameter carries the
//! stage-specific measurements and recommendation thresholds.
//!
//! Persistence faults never propagate out of the record methods: the
//! in-memory path continues and the fault is logged. Recording without a
//! current batch opens an `auto_batch_<ts>` batch implicitly.

use std::collections::VecDeque;
use std::future::Future;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use clinipipe_domain::entities::{IngestionStat, ProcessingStatus};
use clinipipe_domain::PipelineError;

use crate::infrastructure::config::DataIntelligenceConfig;
use crate::infrastructure::persistence::TrackingRepository;

use super::batch::{BatchCore, RecordOutcome};

/// Cap on retained completed batches (FIFO eviction).
const COMPLETED_BATCH_CAP: usize = 100;

/// Stage-specific measurements folded into each batch.
pub trait StageMetrics: Default + Clone + Send + Serialize + 'static {
    /// Stage name this metric type belongs to.
    fn stage_label() -> &'static str;

    /// Folds one record outcome into the measurements.
    fn observe(&mut self, outcome: &RecordOutcome);

    /// Computes derived measurements when the batch finishes.
    fn finalize(&mut self, core: &BatchCore);

    /// Merges another batch's measurements for cross-batch summaries.
    fn merge(&mut self, other: &Self);

    /// Threshold-based recommendations for the given counters.
    fn recommendations(&self, core: &BatchCore) -> Vec<String>;
}

/// One batch: shared counters plus domain measurements.
#[derive(Debug, Clone, Serialize)]
pub struct BatchMetrics<M: StageMetrics> {
    pub core: BatchCore,
    pub domain: M,
}

impl<M: StageMetrics> BatchMetrics<M> {
    fn new(batch_id: String, pipeline_run_id: &str, stage_name: &str) -> Self {
        Self {
            core: BatchCore::new(batch_id, pipeline_run_id, stage_name),
            domain: M::default(),
        }
    }

    fn finish(&mut self) {
        self.core.finish();
        let core = self.core.clone();
        self.domain.finalize(&core);
    }
}

/// Aggregate view across every batch of one tracker.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerSummary<M: StageMetrics> {
    pub stage_name: String,
    pub pipeline_run_id: String,
    pub total_batches: usize,
    pub totals: BatchCore,
    pub domain: M,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub avg_processing_time_ms: f64,
    pub recommendations: Vec<String>,
}

struct TrackerState<M: StageMetrics> {
    current: Option<BatchMetrics<M>>,
    completed: VecDeque<BatchMetrics<M>>,
    history: Vec<RecordOutcome>,
}

/// Generic per-stage tracker; see the module docs.
pub struct StageTracker<M: StageMetrics> {
    pipeline_run_id: String,
    stage_name: String,
    enabled: bool,
    store_failed_records: bool,
    detailed_history: bool,
    /// Only the record-entry stage rolls outcomes up into the run counters.
    updates_run_counts: bool,
    repository: Option<TrackingRepository>,
    state: Mutex<TrackerState<M>>,
}

impl<M: StageMetrics> StageTracker<M> {
    pub fn new(
        pipeline_run_id: impl Into<String>,
        config: &DataIntelligenceConfig,
        repository: Option<TrackingRepository>,
    ) -> Self {
        let enabled = config.is_feature_enabled("ingestion_tracking");
        Self {
            pipeline_run_id: pipeline_run_id.into(),
            stage_name: M::stage_label().to_string(),
            enabled,
            store_failed_records: config.features.ingestion_tracking.store_failed_records,
            detailed_history: false,
            updates_run_counts: M::stage_label() == "ingestion",
            repository,
            state: Mutex::new(TrackerState {
                current: None,
                completed: VecDeque::new(),
                history: Vec::new(),
            }),
        }
    }

    /// Disabled tracker: all operations are no-ops.
    pub fn disabled(pipeline_run_id: impl Into<String>) -> Self {
        let mut tracker = Self::new(pipeline_run_id, &DataIntelligenceConfig::default(), None);
        tracker.enabled = false;
        tracker
    }

    /// Enables per-record history retention (off by default for memory).
    pub fn with_detailed_history(mut self) -> Self {
        self.detailed_history = true;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    // -- Batch lifecycle -------------------------------------------------

    /// Starts a batch, finishing and archiving any prior current batch.
    pub fn start_batch(&self, batch_id: Option<String>) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let id = batch_id.unwrap_or_else(|| format!("batch_{}", Utc::now().timestamp_millis()));
        let mut state = self.state.lock();
        if let Some(mut prior) = state.current.take() {
            prior.finish();
            Self::push_completed(&mut state.completed, prior);
        }
        state.current = Some(BatchMetrics::new(id.clone(), &self.pipeline_run_id, &self.stage_name));
        debug!(stage = %self.stage_name, batch_id = %id, "batch started");
        Some(id)
    }

    /// Finishes the current batch, computing derived metrics.
    pub fn finish_batch(&self) -> Option<BatchMetrics<M>> {
        if !self.enabled {
            return None;
        }
        let mut state = self.state.lock();
        let mut batch = state.current.take()?;
        batch.finish();
        let snapshot = batch.clone();
        Self::push_completed(&mut state.completed, batch);
        Some(snapshot)
    }

    /// Scoped batch: starts, runs `f`, and always finishes the batch on
    /// the way out, regardless of the result.
    pub async fn track_batch<T, F, Fut>(&self, batch_id: Option<String>, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.start_batch(batch_id);
        let result = f().await;
        self.finish_batch();
        result
    }

    fn push_completed(completed: &mut VecDeque<BatchMetrics<M>>, batch: BatchMetrics<M>) {
        if completed.len() >= COMPLETED_BATCH_CAP {
            completed.pop_front();
        }
        completed.push_back(batch);
    }

    // -- Record outcomes -------------------------------------------------

    pub async fn record_success(&self, outcome: RecordOutcome) {
        debug_assert_eq!(outcome.status, ProcessingStatus::Success);
        self.record(outcome, None).await;
    }

    /// Records a failure; `original_data`, when present and failed-record
    /// storage is on, is persisted for forensic replay.
    pub async fn record_failure(&self, outcome: RecordOutcome, original_data: Option<&str>) {
        debug_assert_eq!(outcome.status, ProcessingStatus::Failure);
        self.record(outcome, original_data).await;
    }

    pub async fn record_skip(&self, record_id: &str, reason: &str) {
        let mut outcome = RecordOutcome::new(record_id, ProcessingStatus::Skipped);
        outcome.error_message = Some(reason.to_string());
        self.record(outcome, None).await;
    }

    pub async fn record_partial_success(&self, outcome: RecordOutcome) {
        debug_assert_eq!(outcome.status, ProcessingStatus::PartialSuccess);
        self.record(outcome, None).await;
    }

    async fn record(&self, outcome: RecordOutcome, original_data: Option<&str>) {
        if !self.enabled {
            return;
        }

        {
            let mut state = self.state.lock();
            if state.current.is_none() {
                let id = format!("auto_batch_{}", Utc::now().timestamp_millis());
                debug!(stage = %self.stage_name, batch_id = %id, "auto-creating batch");
                state.current = Some(BatchMetrics::new(id, &self.pipeline_run_id, &self.stage_name));
            }
            let current = state.current.as_mut().expect("current batch just ensured");
            current.core.observe(&outcome);
            current.domain.observe(&outcome);
            if self.detailed_history {
                state.history.push(outcome.clone());
            }
        }

        // Write-through; faults are logged and the in-memory path continues.
        if let Some(repository) = &self.repository {
            let stat = self.outcome_to_stat(&outcome);
            let write = if outcome.status == ProcessingStatus::Failure
                && self.store_failed_records
                && original_data.is_some()
            {
                repository
                    .record_failure(&stat, original_data.unwrap_or_default(), None)
                    .await
                    .map(|_| ())
            } else {
                repository.record_ingestion_stat(&stat).await.map(|_| ())
            };
            if let Err(e) = write {
                warn!(stage = %self.stage_name, "tracking write failed: {}", e);
            }

            if self.updates_run_counts {
                let (successful, failed, skipped) = match outcome.status {
                    ProcessingStatus::Success => (1, 0, 0),
                    ProcessingStatus::Failure => (0, 1, 0),
                    ProcessingStatus::Skipped => (0, 0, 1),
                    // Partial successes raise the total only.
                    ProcessingStatus::PartialSuccess => (0, 0, 0),
                };
                if let Err(e) = repository
                    .update_pipeline_run_counts(&self.pipeline_run_id, 1, successful, failed, skipped)
                    .await
                {
                    warn!("run counter update failed: {}", e);
                }
            }
        }
    }

    fn outcome_to_stat(&self, outcome: &RecordOutcome) -> IngestionStat {
        let mut stat = IngestionStat::with_status(&self.pipeline_run_id, &self.stage_name, outcome.status);
        stat.record_id = Some(outcome.record_id.clone());
        stat.record_type = outcome.record_type.clone();
        stat.file_path = outcome.file_path.clone();
        stat.data_source = outcome.data_source.clone();
        stat.error_category = outcome.error_category;
        stat.error_message = outcome.error_message.clone();
        stat.processing_time_ms = outcome.processing_time_ms;
        stat.record_size_bytes = outcome.record_size_bytes;
        if !outcome.metadata.is_empty() {
            stat.error_details = serde_json::to_value(&outcome.metadata).ok();
        }
        stat.timestamp = outcome.timestamp;
        stat
    }

    // -- Summaries & export ----------------------------------------------

    /// Aggregates every batch (current included) under the lock, then
    /// derives rates and recommendations outside it.
    pub fn get_summary(&self) -> TrackerSummary<M> {
        let (batches, totals, domain) = {
            let state = self.state.lock();
            let mut totals = BatchCore::new("summary", &self.pipeline_run_id, &self.stage_name);
            let mut domain = M::default();
            let mut count = 0usize;
            for batch in state.completed.iter().chain(state.current.iter()) {
                count += 1;
                totals.total_records += batch.core.total_records;
                totals.successful_records += batch.core.successful_records;
                totals.failed_records += batch.core.failed_records;
                totals.skipped_records += batch.core.skipped_records;
                totals.partial_success_records += batch.core.partial_success_records;
                totals.total_processing_time_ms += batch.core.total_processing_time_ms;
                totals.total_bytes += batch.core.total_bytes;
                for (category, n) in &batch.core.errors_by_category {
                    *totals.errors_by_category.entry(category.clone()).or_insert(0) += n;
                }
                domain.merge(&batch.domain);
            }
            (count, totals, domain)
        };

        let recommendations = domain.recommendations(&totals);
        TrackerSummary {
            stage_name: self.stage_name.clone(),
            pipeline_run_id: self.pipeline_run_id.clone(),
            total_batches: batches,
            success_rate: totals.success_rate(),
            failure_rate: totals.failure_rate(),
            avg_processing_time_ms: totals.avg_processing_time_ms(),
            totals,
            domain,
            recommendations,
        }
    }

    /// Snapshot of retained per-record history (empty unless enabled).
    pub fn history(&self) -> Vec<RecordOutcome> {
        self.state.lock().history.clone()
    }

    /// Exports all batches to `path` as `json` or `csv`.
    pub fn export(&self, path: &std::path::Path, format: &str) -> Result<(), PipelineError> {
        if !self.enabled {
            warn!(stage = %self.stage_name, "tracker is disabled; export skipped");
            return Ok(());
        }
        let batches: Vec<BatchMetrics<M>> = {
            let state = self.state.lock();
            state.completed.iter().chain(state.current.iter()).cloned().collect()
        };
        match format {
            "json" => {
                let body = serde_json::to_string_pretty(&batches)
                    .map_err(|e| PipelineError::SerializationError(e.to_string()))?;
                std::fs::write(path, body).map_err(|e| PipelineError::io_error(e.to_string()))?;
            }
            "csv" => {
                let summary = self.get_summary();
                let mut out = String::new();
                out.push_str(&format!(
                    "stage_name,total_batches,total_records,successful,failed,skipped,success_rate\n{},{},{},{},{},{},{:.2}\n\n",
                    summary.stage_name,
                    summary.total_batches,
                    summary.totals.total_records,
                    summary.totals.successful_records,
                    summary.totals.failed_records,
                    summary.totals.skipped_records,
                    summary.success_rate,
                ));
                out.push_str("Batch Details\n");
                out.push_str("batch_id,started_at,completed_at,total,successful,failed,skipped,partial,avg_time_ms\n");
                for batch in &batches {
                    out.push_str(&format!(
                        "{},{},{},{},{},{},{},{},{:.2}\n",
                        batch.core.batch_id,
                        batch.core.started_at.to_rfc3339(),
                        batch
                            .core
                            .completed_at
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_default(),
                        batch.core.total_records,
                        batch.core.successful_records,
                        batch.core.failed_records,
                        batch.core.skipped_records,
                        batch.core.partial_success_records,
                        batch.core.avg_processing_time_ms(),
                    ));
                }
                std::fs::write(path, out).map_err(|e| PipelineError::io_error(e.to_string()))?;
            }
            other => {
                return Err(PipelineError::validation(format!("unsupported export format '{}'", other)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::tracking::domains::{ChunkingMetrics, IngestionMetrics};
    use clinipipe_domain::error::ErrorCategory;

    fn tracker() -> StageTracker<IngestionMetrics> {
        StageTracker::new("run-1", &DataIntelligenceConfig::default(), None)
    }

    fn success(record_id: &str) -> RecordOutcome {
        let mut outcome = RecordOutcome::new(record_id, ProcessingStatus::Success);
        outcome.record_size_bytes = Some(100);
        outcome.processing_time_ms = Some(5);
        outcome
    }

    #[tokio::test]
    async fn test_auto_batch_created_on_record() {
        let tracker = tracker();
        tracker.record_success(success("rec-1")).await;

        let summary = tracker.get_summary();
        assert_eq!(summary.total_batches, 1);
        assert_eq!(summary.totals.total_records, 1);

        let batch = tracker.finish_batch().unwrap();
        assert!(batch.core.batch_id.starts_with("auto_batch_"));
    }

    #[tokio::test]
    async fn test_start_batch_archives_prior() {
        let tracker = tracker();
        tracker.start_batch(Some("first".into()));
        tracker.record_success(success("rec-1")).await;
        tracker.start_batch(Some("second".into()));

        let summary = tracker.get_summary();
        assert_eq!(summary.total_batches, 2);

        // The archived batch was finished on replacement.
        let batch = tracker.finish_batch().unwrap();
        assert_eq!(batch.core.batch_id, "second");
    }

    #[tokio::test]
    async fn test_track_batch_finishes_on_error_path() {
        let tracker = tracker();
        let result: Result<(), PipelineError> = tracker
            .track_batch(Some("scoped".into()), || async {
                tracker.record_success(success("rec-1")).await;
                Err(PipelineError::parse("bad record"))
            })
            .await;
        assert!(result.is_err());

        // The batch is closed even though the body returned an error.
        let summary = tracker.get_summary();
        assert_eq!(summary.total_batches, 1);
        assert!(tracker.finish_batch().is_none());
    }

    #[tokio::test]
    async fn test_disabled_tracker_is_noop() {
        let tracker: StageTracker<IngestionMetrics> = StageTracker::disabled("run-1");
        tracker.record_success(success("rec-1")).await;
        assert!(tracker.start_batch(None).is_none());
        let summary = tracker.get_summary();
        assert_eq!(summary.totals.total_records, 0);
    }

    #[tokio::test]
    async fn test_failure_histogram_aggregation() {
        let tracker = tracker();
        let mut failure = RecordOutcome::new("rec-1", ProcessingStatus::Failure);
        failure.error_category = Some(ErrorCategory::ParseError);
        failure.error_message = Some("bad json".into());
        tracker.record_failure(failure, Some("{\"incomplete")).await;
        tracker.record_skip("rec-2", "duplicate").await;

        let summary = tracker.get_summary();
        assert_eq!(summary.totals.failed_records, 1);
        assert_eq!(summary.totals.skipped_records, 1);
        assert_eq!(summary.totals.errors_by_category.get("parse_error"), Some(&1));
        assert!(summary.success_rate + summary.failure_rate <= 100.0);
    }

    #[tokio::test]
    async fn test_completed_batches_are_bounded() {
        let tracker = tracker();
        for i in 0..(COMPLETED_BATCH_CAP + 10) {
            tracker.start_batch(Some(format!("batch-{}", i)));
            tracker.record_success(success("rec")).await;
            tracker.finish_batch();
        }
        let summary = tracker.get_summary();
        assert_eq!(summary.total_batches, COMPLETED_BATCH_CAP);
    }

    #[tokio::test]
    async fn test_detailed_history_gate() {
        let tracker = tracker();
        tracker.record_success(success("rec-1")).await;
        assert!(tracker.history().is_empty());

        let tracker = StageTracker::<IngestionMetrics>::new("run-1", &DataIntelligenceConfig::default(), None)
            .with_detailed_history();
        tracker.record_success(success("rec-1")).await;
        assert_eq!(tracker.history().len(), 1);
    }

    #[tokio::test]
    async fn test_export_formats() {
        let dir = tempfile::tempdir().unwrap();
        let tracker: StageTracker<ChunkingMetrics> =
            StageTracker::new("run-1", &DataIntelligenceConfig::default(), None);
        tracker.start_batch(Some("b1".into()));
        let mut outcome = RecordOutcome::new("rec-1", ProcessingStatus::Success);
        outcome
            .metadata
            .insert("chunk_count".into(), serde_json::json!(3));
        tracker.record_success(outcome).await;
        tracker.finish_batch();

        let json_path = dir.path().join("chunking.json");
        tracker.export(&json_path, "json").unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 1);

        let csv_path = dir.path().join("chunking.csv");
        tracker.export(&csv_path, "csv").unwrap();
        let body = std::fs::read_to_string(&csv_path).unwrap();
        assert!(body.contains("Batch Details"));

        assert!(tracker.export(&dir.path().join("x.bin"), "parquet").is_err());
    }

    #[tokio::test]
    async fn test_disabled_export_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let tracker: StageTracker<IngestionMetrics> = StageTracker::disabled("run-1");
        let path = dir.path().join("out.json");
        tracker.export(&path, "json").unwrap();
        assert!(!path.exists());
    }
}
