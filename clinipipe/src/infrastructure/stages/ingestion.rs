// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Ingestion Stage
//!
//! The source stage: consumes raw file contents from the file watcher,
//! detects the wire format (X12 interchanges by their `ISA` envelope, JSON
//! otherwise), normalizes into clinical or operational content, scores
//! quality on parsed clinical records, and reports every attempt through
//! the ingestion tracker. Parse failures keep their raw payload for
//! forensic replay and never abort the stream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use clinipipe_domain::entities::{ClinicalContent, PipelineItem, ProcessingStatus};
use clinipipe_domain::PipelineError;

use crate::application::context::PipelineContext;
use crate::application::stages::SourceStage;
use crate::infrastructure::adapters::FileWatcherAdapter;
use crate::infrastructure::ingestion::x12::X12Dispatcher;
use crate::infrastructure::tracking::{metadata_keys, RecordOutcome};

/// Narrative-bearing keys lifted into retrieval text.
const NARRATIVE_KEYS: [&str; 5] = ["text", "notes", "narrative", "description", "summary"];

pub struct IngestionStage {
    watcher: Arc<FileWatcherAdapter>,
    dispatcher: X12Dispatcher,
}

impl IngestionStage {
    pub fn new(watcher: Arc<FileWatcherAdapter>) -> Self {
        Self {
            watcher,
            dispatcher: X12Dispatcher::new(),
        }
    }

    /// Format detection plus normalization of one raw payload.
    fn parse(&self, body: &str) -> Result<PipelineItem, PipelineError> {
        let trimmed = body.trim_start();
        if trimmed.starts_with("ISA") {
            return Ok(PipelineItem::Operational(self.dispatcher.parse(body)));
        }
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            let value: serde_json::Value = serde_json::from_str(body)?;
            return Ok(PipelineItem::Clinical(Self::normalize_json(value)));
        }
        Err(PipelineError::parse("unrecognized input format"))
    }

    fn normalize_json(value: serde_json::Value) -> ClinicalContent {
        let mut content = ClinicalContent::default();
        match value {
            serde_json::Value::Object(object) => {
                content.record_id = object.get("id").and_then(|v| v.as_str()).map(str::to_string);
                content.record_type = object
                    .get("resourceType")
                    .or_else(|| object.get("record_type"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_lowercase());
                for (key, field_value) in &object {
                    if NARRATIVE_KEYS.contains(&key.to_lowercase().as_str()) {
                        if let Some(text) = field_value.as_str() {
                            content.narratives.push(text.to_string());
                        }
                    }
                }
                content.fields = object.into_iter().collect();
            }
            other => {
                content.record_type = Some("collection".to_string());
                content.narratives.push(other.to_string());
            }
        }
        content
    }

    /// Scores a parsed clinical record when quality scoring is enabled.
    async fn score_quality(&self, context: &PipelineContext, clinical: &ClinicalContent) {
        if !context.data_intelligence.is_feature_enabled("quality_scoring") {
            return;
        }
        let record_type = clinical.record_type.clone().unwrap_or_else(|| "unknown".to_string());
        let fields: HashMap<String, serde_json::Value> = clinical.fields.clone();

        context.quality_scorer.outlier_detector().update_distributions([&fields]);
        let metric = context
            .quality_scorer
            .score_record(&context.pipeline_id, clinical.record_id.clone(), &record_type, &fields);

        let record_id = clinical.record_id.clone().unwrap_or_else(|| "unknown".to_string());
        context
            .audit_logger
            .log_data_quality_check(
                "ingestion",
                &record_id,
                metric.overall_score,
                metric.issues.len(),
            )
            .await;

        let mut outcome = RecordOutcome::new(&record_id, ProcessingStatus::Success);
        outcome.record_type = Some(record_type);
        outcome.metadata.insert(
            metadata_keys::QUALITY_SCORE.to_string(),
            serde_json::json!(metric.overall_score),
        );
        context.quality_tracker.record_success(outcome).await;

        if let Some(repository) = &context.repository {
            if let Err(e) = repository.record_quality_metric(&metric).await {
                warn!("quality metric write failed: {}", e);
            }
        }
    }
}

#[async_trait]
impl SourceStage for IngestionStage {
    fn name(&self) -> &'static str {
        "ingestion"
    }

    async fn produce(&self, context: &PipelineContext, tx: mpsc::Sender<PipelineItem>) -> Result<(), PipelineError> {
        let capacity = context.config.pipeline.queue_capacity;
        let (raw_tx, mut raw_rx) = mpsc::channel::<PipelineItem>(capacity);

        let watcher = Arc::clone(&self.watcher);
        let watcher_task = tokio::spawn(async move { watcher.run(raw_tx).await });

        context
            .ingestion_tracker
            .start_batch(Some(format!("ingest_{}", Utc::now().timestamp_millis())));

        while let Some(raw) = raw_rx.recv().await {
            let PipelineItem::RawText { source_path, body } = raw else {
                continue;
            };
            let started = Instant::now();

            match self.parse(&body) {
                Ok(parsed) => {
                    if let PipelineItem::Clinical(clinical) = &parsed {
                        self.score_quality(context, clinical).await;
                    }

                    let record_id = parsed
                        .record_id()
                        .or_else(|| source_path.clone())
                        .unwrap_or_else(|| "unknown".to_string());
                    let mut outcome = RecordOutcome::new(&record_id, ProcessingStatus::Success);
                    outcome.file_path = source_path.clone();
                    outcome.record_size_bytes = Some(body.len() as i64);
                    outcome.processing_time_ms = Some(started.elapsed().as_millis() as i64);
                    outcome.data_source = Some(
                        if matches!(parsed, PipelineItem::Operational(_)) {
                            "x12"
                        } else {
                            "json"
                        }
                        .to_string(),
                    );
                    if let PipelineItem::Clinical(c) = &parsed {
                        outcome.record_type = c.record_type.clone();
                    }
                    context.ingestion_tracker.record_success(outcome).await;
                    context.audit_logger.log_record_processed("ingestion", &record_id).await;

                    if tx.send(parsed).await.is_err() {
                        debug!("downstream queue closed; ingestion stopping");
                        break;
                    }
                }
                Err(error) => {
                    let classified =
                        context
                            .error_classifier
                            .classify(&error, "ingestion", source_path.as_deref(), None);

                    let mut outcome = RecordOutcome::new(
                        source_path.clone().unwrap_or_else(|| "unknown".to_string()),
                        ProcessingStatus::Failure,
                    );
                    outcome.file_path = source_path.clone();
                    outcome.record_size_bytes = Some(body.len() as i64);
                    outcome.processing_time_ms = Some(started.elapsed().as_millis() as i64);
                    outcome.error_category = Some(classified.analysis.category);
                    outcome.error_message = Some(classified.analysis.description.clone());
                    context.ingestion_tracker.record_failure(outcome, Some(&body)).await;

                    context
                        .audit_logger
                        .log_validation_failed(
                            "ingestion",
                            source_path.as_deref().unwrap_or("unknown"),
                            &classified.analysis.description,
                        )
                        .await;
                }
            }
        }

        context.ingestion_tracker.finish_batch();

        match watcher_task.await {
            Ok(Ok(_outcome)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(join_error) => Err(PipelineError::internal_error(format!(
                "file watcher task failed: {}",
                join_error
            ))),
        }
    }
}
