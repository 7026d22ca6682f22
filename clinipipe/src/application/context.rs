// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Context
//!
//! Per-run shared state: the immutable configuration tree plus the mutable
//! telemetry references every stage reports into. Constructed once per run
//! and wired through the executor to every worker.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use clinipipe_bootstrap::StopEvent;
use clinipipe_domain::entities::ProcessingStatus;
use clinipipe_domain::value_objects::PipelineRunId;
use clinipipe_domain::PipelineError;

use crate::infrastructure::audit::{AuditLogger, ErrorClassifier};
use crate::infrastructure::config::ClinipipeConfig;
use crate::infrastructure::config::DataIntelligenceConfig;
use crate::infrastructure::performance::PerformanceTracker;
use crate::infrastructure::persistence::TrackingRepository;
use crate::infrastructure::quality::QualityScorer;
use crate::infrastructure::tracking::{
    ChunkingTracker, EmbeddingTracker, IngestionTracker, QualityTracker, RecordOutcome,
};

/// Aggregated view of one run for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ContextSummary {
    pub pipeline_id: String,
    pub name: String,
    pub executed_stages: Vec<String>,
    pub errors: Vec<StageError>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageError {
    pub stage: String,
    pub message: String,
}

/// Per-run shared state; see the module docs.
pub struct PipelineContext {
    pub config: ClinipipeConfig,
    /// Data-intelligence tree with the performance-mode preset applied.
    pub data_intelligence: DataIntelligenceConfig,
    pub pipeline_id: String,
    pub name: String,
    pub output_path: Option<String>,

    pub repository: Option<TrackingRepository>,
    pub audit_logger: Arc<AuditLogger>,
    pub error_classifier: Arc<ErrorClassifier>,
    pub quality_scorer: Arc<QualityScorer>,

    pub ingestion_tracker: Arc<IngestionTracker>,
    pub chunking_tracker: Arc<ChunkingTracker>,
    pub embedding_tracker: Arc<EmbeddingTracker>,
    pub quality_tracker: Arc<QualityTracker>,
    pub performance_tracker: Arc<PerformanceTracker>,

    stop_event: StopEvent,
    errors: Mutex<Vec<StageError>>,
    warnings: Mutex<Vec<String>>,
    executed_stages: Mutex<Vec<String>>,
}

impl PipelineContext {
    /// Wires a fresh run: generates the run id and constructs the whole
    /// tracking substrate against the given repository.
    pub fn new(config: ClinipipeConfig, repository: Option<TrackingRepository>, stop_event: StopEvent) -> Self {
        let pipeline_id = PipelineRunId::generate().to_string();
        let data_intelligence = config.data_intelligence.effective();
        let name = config.pipeline.name.clone();
        let output_path = config.pipeline.output_path.clone();

        let audit_logger = Arc::new(AuditLogger::new(
            &pipeline_id,
            &data_intelligence.features.audit_trail,
            data_intelligence.enabled,
            repository.clone(),
        ));

        let tracker_repo = repository.clone();
        let ingestion_tracker = Arc::new(IngestionTracker::new(&pipeline_id, &data_intelligence, tracker_repo.clone()));
        let chunking_tracker = Arc::new(ChunkingTracker::new(&pipeline_id, &data_intelligence, tracker_repo.clone()));
        let embedding_tracker = Arc::new(EmbeddingTracker::new(&pipeline_id, &data_intelligence, tracker_repo.clone()));
        let quality_tracker = Arc::new(QualityTracker::new(&pipeline_id, &data_intelligence, tracker_repo.clone()));

        let performance_enabled =
            data_intelligence.is_feature_enabled("performance_tracking") && data_intelligence.features.performance_tracking.step_timing;
        let performance_tracker = Arc::new(PerformanceTracker::new(&pipeline_id, performance_enabled, tracker_repo));

        let quality_scorer = Arc::new(QualityScorer::new(data_intelligence.features.quality_scoring.clone()));

        Self {
            config,
            data_intelligence,
            pipeline_id,
            name,
            output_path,
            repository,
            audit_logger,
            error_classifier: Arc::new(ErrorClassifier::new()),
            quality_scorer,
            ingestion_tracker,
            chunking_tracker,
            embedding_tracker,
            quality_tracker,
            performance_tracker,
            stop_event,
            errors: Mutex::new(Vec::new()),
            warnings: Mutex::new(Vec::new()),
            executed_stages: Mutex::new(Vec::new()),
        }
    }

    pub fn stop_event(&self) -> &StopEvent {
        &self.stop_event
    }

    pub fn is_stage_enabled(&self, stage: &str) -> bool {
        self.config.pipeline.stages.is_enabled(stage)
    }

    pub fn start_stage(&self, stage: &str) {
        info!(stage, "stage starting");
        self.executed_stages.lock().push(stage.to_string());
        self.performance_tracker.start_step(stage);
    }

    pub async fn end_stage(&self, stage: &str, records: u64, successes: u64, failures: u64) {
        self.performance_tracker
            .finish_step(stage, records, 0, successes, failures)
            .await;
        self.audit_logger.log_stage_completed(stage, records as i64).await;
        info!(stage, records, "stage ended");
    }

    pub fn add_error(&self, stage: &str, message: impl Into<String>) {
        let message = message.into();
        warn!(stage, "pipeline error: {}", message);
        self.errors.lock().push(StageError {
            stage: stage.to_string(),
            message,
        });
    }

    pub fn add_warning(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("pipeline warning: {}", message);
        self.warnings.lock().push(message);
    }

    pub fn errors(&self) -> Vec<StageError> {
        self.errors.lock().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().clone()
    }

    pub fn executed_stages(&self) -> Vec<String> {
        self.executed_stages.lock().clone()
    }

    /// Classifies a record-scoped stage failure, routes it to the stage's
    /// tracker, and audits it. Never propagates.
    pub async fn record_stage_failure(
        &self,
        stage: &str,
        error: &PipelineError,
        record_id: Option<String>,
        raw_payload: Option<&str>,
    ) {
        let classified = self
            .error_classifier
            .classify(error, stage, record_id.as_deref(), None);

        let mut outcome = RecordOutcome::new(
            record_id.unwrap_or_else(|| "unknown".to_string()),
            ProcessingStatus::Failure,
        );
        outcome.error_category = Some(classified.analysis.category);
        outcome.error_message = Some(classified.analysis.description.clone());

        match stage {
            "chunking" => self.chunking_tracker.record_failure(outcome, raw_payload).await,
            "embedding" => self.embedding_tracker.record_failure(outcome, raw_payload).await,
            "quality" => self.quality_tracker.record_failure(outcome, raw_payload).await,
            _ => self.ingestion_tracker.record_failure(outcome, raw_payload).await,
        }

        self.audit_logger.log_stage_failed(stage, error).await;
    }

    pub fn get_summary(&self) -> ContextSummary {
        ContextSummary {
            pipeline_id: self.pipeline_id.clone(),
            name: self.name.clone(),
            executed_stages: self.executed_stages(),
            errors: self.errors(),
            warnings: self.warnings(),
        }
    }

    /// Writes a serializable run result to the configured output path.
    pub fn export_results<T: Serialize>(&self, result: &T, format: &str) -> Result<(), PipelineError> {
        let Some(output_path) = &self.output_path else {
            return Ok(());
        };
        match format {
            "json" => {
                let body = serde_json::to_string_pretty(result)
                    .map_err(|e| PipelineError::SerializationError(e.to_string()))?;
                std::fs::write(output_path, body).map_err(|e| PipelineError::io_error(e.to_string()))?;
            }
            "csv" => {
                let summary = self.get_summary();
                let mut out = String::new();
                out.push_str(&format!(
                    "pipeline_id,name,executed_stages,errors,warnings\n{},{},{},{},{}\n\n",
                    summary.pipeline_id,
                    summary.name,
                    summary.executed_stages.len(),
                    summary.errors.len(),
                    summary.warnings.len(),
                ));
                out.push_str("Stage Details\n");
                out.push_str("stage,error\n");
                for error in &summary.errors {
                    out.push_str(&format!("{},{}\n", error.stage, error.message.replace(',', ";")));
                }
                std::fs::write(output_path, out).map_err(|e| PipelineError::io_error(e.to_string()))?;
            }
            other => {
                return Err(PipelineError::validation(format!("unsupported export format '{}'", other)));
            }
        }
        Ok(())
    }

    /// Effective per-stage tracker summaries keyed by stage name.
    pub fn tracker_summaries(&self) -> HashMap<String, serde_json::Value> {
        let mut out = HashMap::new();
        out.insert(
            "ingestion".to_string(),
            serde_json::to_value(self.ingestion_tracker.get_summary()).unwrap_or_default(),
        );
        out.insert(
            "chunking".to_string(),
            serde_json::to_value(self.chunking_tracker.get_summary()).unwrap_or_default(),
        );
        out.insert(
            "embedding".to_string(),
            serde_json::to_value(self.embedding_tracker.get_summary()).unwrap_or_default(),
        );
        out.insert(
            "quality".to_string(),
            serde_json::to_value(self.quality_tracker.get_summary()).unwrap_or_default(),
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> PipelineContext {
        PipelineContext::new(ClinipipeConfig::default(), None, StopEvent::new())
    }

    #[test]
    fn test_stage_enablement_follows_config() {
        let ctx = context();
        assert!(ctx.is_stage_enabled("ingestion"));
        assert!(!ctx.is_stage_enabled("deid"));
        assert!(!ctx.is_stage_enabled("unknown"));
    }

    #[test]
    fn test_errors_and_warnings_accumulate() {
        let ctx = context();
        ctx.add_error("ingestion", "boom");
        ctx.add_warning("slow scan");

        let summary = ctx.get_summary();
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].stage, "ingestion");
        assert_eq!(summary.warnings, vec!["slow scan".to_string()]);
    }

    #[test]
    fn test_executed_stages_recorded_in_order() {
        let ctx = context();
        ctx.start_stage("ingestion");
        ctx.start_stage("chunking");
        assert_eq!(ctx.executed_stages(), vec!["ingestion", "chunking"]);
    }

    #[tokio::test]
    async fn test_record_stage_failure_routes_to_tracker() {
        let ctx = context();
        ctx.record_stage_failure("chunking", &PipelineError::parse("bad"), Some("rec-1".into()), None)
            .await;
        let summary = ctx.chunking_tracker.get_summary();
        assert_eq!(summary.totals.failed_records, 1);
    }

    #[test]
    fn test_export_results_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        let mut config = ClinipipeConfig::default();
        config.pipeline.output_path = Some(path.to_string_lossy().to_string());
        let ctx = PipelineContext::new(config, None, StopEvent::new());

        ctx.export_results(&serde_json::json!({"status": "completed"}), "json").unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("completed"));

        assert!(ctx.export_results(&serde_json::json!({}), "parquet").is_err());
    }
}
