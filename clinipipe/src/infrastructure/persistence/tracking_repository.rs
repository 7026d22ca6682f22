// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Tracking Repository
//!
//! Thin orchestration over the persistence provider: validates inputs,
//! owns the failed-record write that accompanies a failure stat, and
//! batches audit-event writes. Trackers and the audit logger talk to this
//! repository only — never to the provider directly.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use clinipipe_domain::entities::{
    AuditEvent, IngestionStat, IngestionSummary, PerformanceMetric, PipelineRunSummary, ProcessingStatus,
    QualityMetric, QualitySummary, RunStatus, SystemMetric,
};
use clinipipe_domain::repositories::PersistenceProvider;
use clinipipe_domain::PipelineError;

/// High-level tracking operations over a persistence provider.
#[derive(Clone)]
pub struct TrackingRepository {
    provider: Arc<dyn PersistenceProvider>,
}

impl TrackingRepository {
    pub fn new(provider: Arc<dyn PersistenceProvider>) -> Self {
        Self { provider }
    }

    /// The underlying provider, for feature probes and maintenance.
    pub fn provider(&self) -> &Arc<dyn PersistenceProvider> {
        &self.provider
    }

    fn require_run_id(run_id: &str) -> Result<(), PipelineError> {
        if run_id.trim().is_empty() {
            return Err(PipelineError::validation("pipeline_run_id must not be empty"));
        }
        Ok(())
    }

    // -- Run lifecycle ---------------------------------------------------

    pub async fn start_pipeline_run(
        &self,
        run_id: &str,
        name: &str,
        config_snapshot: Option<&serde_json::Value>,
    ) -> Result<(), PipelineError> {
        Self::require_run_id(run_id)?;
        if name.trim().is_empty() {
            return Err(PipelineError::validation("pipeline run name must not be empty"));
        }
        self.provider.start_pipeline_run(run_id, name, config_snapshot).await
    }

    pub async fn complete_pipeline_run(
        &self,
        run_id: &str,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<(), PipelineError> {
        Self::require_run_id(run_id)?;
        self.provider.complete_pipeline_run(run_id, status, error_message).await
    }

    pub async fn update_pipeline_run_counts(
        &self,
        run_id: &str,
        delta_total: i64,
        delta_successful: i64,
        delta_failed: i64,
        delta_skipped: i64,
    ) -> Result<(), PipelineError> {
        Self::require_run_id(run_id)?;
        self.provider
            .update_pipeline_run_counts(run_id, delta_total, delta_successful, delta_failed, delta_skipped)
            .await
    }

    pub async fn get_pipeline_run(&self, run_id: &str) -> Result<Option<PipelineRunSummary>, PipelineError> {
        self.provider.get_pipeline_run(run_id).await
    }

    pub async fn get_recent_pipeline_runs(&self, limit: i64) -> Result<Vec<PipelineRunSummary>, PipelineError> {
        self.provider.get_recent_pipeline_runs(limit.max(1)).await
    }

    // -- Telemetry writes ------------------------------------------------

    pub async fn record_ingestion_stat(&self, stat: &IngestionStat) -> Result<i64, PipelineError> {
        Self::require_run_id(&stat.pipeline_run_id)?;
        if stat.processing_time_ms.is_some_and(|t| t < 0) {
            return Err(PipelineError::validation("processing_time_ms must not be negative"));
        }
        if stat.record_size_bytes.is_some_and(|b| b < 0) {
            return Err(PipelineError::validation("record_size_bytes must not be negative"));
        }
        self.provider.record_ingestion_stat(stat).await
    }

    /// Records a failure stat together with its forensic payload.
    ///
    /// Returns the ids `(stat_id, failed_record_id)`.
    pub async fn record_failure(
        &self,
        stat: &IngestionStat,
        original_data: &str,
        stack_trace: Option<&str>,
    ) -> Result<(i64, i64), PipelineError> {
        if stat.status != ProcessingStatus::Failure {
            return Err(PipelineError::validation(
                "record_failure requires a stat with failure status",
            ));
        }
        let stat_id = self.record_ingestion_stat(stat).await?;
        let reason = stat
            .error_message
            .clone()
            .unwrap_or_else(|| "unknown failure".to_string());
        let failed_id = self
            .provider
            .record_failed_record(stat_id, original_data, &reason, None, stack_trace)
            .await?;
        debug!(stat_id, failed_id, "recorded failed record payload");
        Ok((stat_id, failed_id))
    }

    pub async fn record_quality_metric(&self, metric: &QualityMetric) -> Result<i64, PipelineError> {
        Self::require_run_id(&metric.pipeline_run_id)?;
        if !metric.scores_in_bounds() {
            return Err(PipelineError::validation("quality scores must lie within [0, 1]"));
        }
        self.provider.record_quality_metric(metric).await
    }

    pub async fn record_audit_event(&self, event: &AuditEvent) -> Result<i64, PipelineError> {
        Self::require_run_id(&event.pipeline_run_id)?;
        self.provider.record_audit_event(event).await
    }

    /// Writes a buffered batch of audit events, stopping at the first
    /// provider error. Returns the number written.
    pub async fn record_audit_events(&self, events: &[AuditEvent]) -> Result<usize, PipelineError> {
        let mut written = 0;
        for event in events {
            self.record_audit_event(event).await?;
            written += 1;
        }
        Ok(written)
    }

    pub async fn record_performance_metric(&self, metric: &PerformanceMetric) -> Result<i64, PipelineError> {
        Self::require_run_id(&metric.pipeline_run_id)?;
        self.provider.record_performance_metric(metric).await
    }

    pub async fn record_system_metric(&self, metric: &SystemMetric) -> Result<i64, PipelineError> {
        Self::require_run_id(&metric.pipeline_run_id)?;
        self.provider.record_system_metric(metric).await
    }

    // -- Analytics & maintenance ----------------------------------------

    pub async fn get_ingestion_summary(
        &self,
        run_id: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<IngestionSummary, PipelineError> {
        self.provider.get_ingestion_summary(run_id, start, end).await
    }

    pub async fn get_quality_summary(&self, run_id: Option<&str>) -> Result<QualitySummary, PipelineError> {
        self.provider.get_quality_summary(run_id).await
    }

    pub async fn cleanup_old_data(&self, days_to_keep: i64) -> Result<u64, PipelineError> {
        if days_to_keep < 0 {
            return Err(PipelineError::validation("days_to_keep must not be negative"));
        }
        self.provider.cleanup_old_data(days_to_keep).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::sqlite_provider::SqliteProvider;
    use clinipipe_domain::error::ErrorCategory;

    async fn repository() -> TrackingRepository {
        let provider = SqliteProvider::open(":memory:").await.unwrap();
        TrackingRepository::new(Arc::new(provider))
    }

    #[tokio::test]
    async fn test_empty_run_id_rejected() {
        let repo = repository().await;
        let err = repo.start_pipeline_run("", "name", None).await.unwrap_err();
        assert!(matches!(err, PipelineError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_negative_timing_rejected() {
        let repo = repository().await;
        repo.start_pipeline_run("run-1", "nightly", None).await.unwrap();
        let mut stat = IngestionStat::success("run-1", "ingestion");
        stat.processing_time_ms = Some(-5);
        assert!(repo.record_ingestion_stat(&stat).await.is_err());
    }

    #[tokio::test]
    async fn test_record_failure_writes_both_rows() {
        let repo = repository().await;
        repo.start_pipeline_run("run-1", "nightly", None).await.unwrap();

        let mut stat = IngestionStat::failure("run-1", "ingestion");
        stat.error_category = Some(ErrorCategory::ParseError);
        stat.error_message = Some("JSON parse error at line 1".into());

        let (stat_id, failed_id) = repo.record_failure(&stat, "{\"incomplete", None).await.unwrap();
        assert!(stat_id > 0);
        assert!(failed_id > 0);

        let summary = repo.get_ingestion_summary(Some("run-1"), None, None).await.unwrap();
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_record_failure_requires_failure_status() {
        let repo = repository().await;
        repo.start_pipeline_run("run-1", "nightly", None).await.unwrap();
        let stat = IngestionStat::success("run-1", "ingestion");
        assert!(repo.record_failure(&stat, "raw", None).await.is_err());
    }

    #[tokio::test]
    async fn test_out_of_bounds_quality_metric_rejected() {
        let repo = repository().await;
        repo.start_pipeline_run("run-1", "nightly", None).await.unwrap();
        let mut metric = QualityMetric::placeholder("run-1", None);
        metric.overall_score = 1.3;
        assert!(repo.record_quality_metric(&metric).await.is_err());
    }

    #[tokio::test]
    async fn test_audit_event_batch() {
        use clinipipe_domain::entities::{AuditEventType, AuditLevel};
        let repo = repository().await;
        repo.start_pipeline_run("run-1", "nightly", None).await.unwrap();

        let events: Vec<AuditEvent> = (0..5)
            .map(|i| {
                AuditEvent::new(
                    "run-1",
                    AuditEventType::RecordProcessed,
                    "ingestion",
                    format!("record {}", i),
                    AuditLevel::Info,
                )
            })
            .collect();
        let written = repo.record_audit_events(&events).await.unwrap();
        assert_eq!(written, 5);
    }
}
