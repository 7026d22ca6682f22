// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Audit Logger
//!
//! Correlated event stream bound to one pipeline run. Events are kept in a
//! bounded in-memory buffer (cap 1000, FIFO eviction) for filtering and
//! export, and mirrored through the tracking repository synchronously.
//! Repository faults never propagate out of `log_event`: failed writes are
//! parked in a pending list and retried as a batch once the pending count
//! reaches the auto-flush threshold (default 100).
//!
//! ## Correlation
//!
//! [`AuditLogger::correlation_context`] pushes an id onto a stack and pops
//! it when the guard drops; nested contexts shadow outer ones. Every event
//! is tagged with the top-of-stack id at log time.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use clinipipe_domain::entities::{AuditEvent, AuditEventType, AuditLevel};
use clinipipe_domain::PipelineError;

use crate::infrastructure::config::AuditTrailConfig;
use crate::infrastructure::persistence::TrackingRepository;

const BUFFER_CAP: usize = 1000;
const DEFAULT_AUTO_FLUSH: usize = 100;

struct AuditState {
    buffer: VecDeque<AuditEvent>,
    pending: Vec<AuditEvent>,
    correlation_stack: Vec<String>,
}

/// Buffered, correlated audit event stream for one pipeline run.
pub struct AuditLogger {
    pipeline_run_id: String,
    enabled: bool,
    record_level_tracking: bool,
    auto_flush_threshold: usize,
    repository: Option<TrackingRepository>,
    state: Arc<Mutex<AuditState>>,
}

/// Scoped correlation id; pops the stack when dropped.
pub struct CorrelationContext {
    state: Arc<Mutex<AuditState>>,
    id: String,
}

impl CorrelationContext {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for CorrelationContext {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if let Some(position) = state.correlation_stack.iter().rposition(|c| c == &self.id) {
            state.correlation_stack.remove(position);
        }
    }
}

impl AuditLogger {
    pub fn new(
        pipeline_run_id: impl Into<String>,
        config: &AuditTrailConfig,
        master_enabled: bool,
        repository: Option<TrackingRepository>,
    ) -> Self {
        Self {
            pipeline_run_id: pipeline_run_id.into(),
            enabled: master_enabled && config.enabled,
            record_level_tracking: config.record_level_tracking,
            auto_flush_threshold: DEFAULT_AUTO_FLUSH,
            repository,
            state: Arc::new(Mutex::new(AuditState {
                buffer: VecDeque::with_capacity(BUFFER_CAP.min(256)),
                pending: Vec::new(),
                correlation_stack: Vec::new(),
            })),
        }
    }

    /// Disabled logger: every operation is a no-op.
    pub fn disabled(pipeline_run_id: impl Into<String>) -> Self {
        Self {
            pipeline_run_id: pipeline_run_id.into(),
            enabled: false,
            record_level_tracking: false,
            auto_flush_threshold: DEFAULT_AUTO_FLUSH,
            repository: None,
            state: Arc::new(Mutex::new(AuditState {
                buffer: VecDeque::new(),
                pending: Vec::new(),
                correlation_stack: Vec::new(),
            })),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Pushes a correlation id (auto-generated when none supplied) and
    /// returns the guard that pops it.
    pub fn correlation_context(&self, id: Option<String>) -> CorrelationContext {
        let id = id.unwrap_or_else(|| {
            let full = ulid::Ulid::new().to_string();
            full[full.len() - 8..].to_lowercase()
        });
        self.state.lock().correlation_stack.push(id.clone());
        CorrelationContext {
            state: Arc::clone(&self.state),
            id,
        }
    }

    /// Logs one event: tags the active correlation id, buffers it, and
    /// mirrors it through the repository. Never returns an error.
    pub async fn log_event(&self, mut event: AuditEvent) {
        if !self.enabled {
            return;
        }

        let flush_batch = {
            let mut state = self.state.lock();
            if event.correlation_id.is_none() {
                event.correlation_id = state.correlation_stack.last().cloned();
            }
            if state.buffer.len() >= BUFFER_CAP {
                state.buffer.pop_front();
            }
            state.buffer.push_back(event.clone());
            if state.pending.len() >= self.auto_flush_threshold {
                Some(std::mem::take(&mut state.pending))
            } else {
                None
            }
        };

        if let Some(repository) = &self.repository {
            if let Err(e) = repository.record_audit_event(&event).await {
                // Park the event for the next batch flush; never propagate.
                warn!("audit event write failed, parking for retry: {}", e);
                self.state.lock().pending.push(event);
            }
            if let Some(batch) = flush_batch {
                self.flush_batch(repository, batch).await;
            }
        }
    }

    async fn flush_batch(&self, repository: &TrackingRepository, batch: Vec<AuditEvent>) {
        debug!(count = batch.len(), "flushing parked audit events");
        if let Err(e) = repository.record_audit_events(&batch).await {
            warn!("audit batch flush failed: {}", e);
        }
    }

    /// Retries every parked event immediately.
    pub async fn flush(&self) {
        let Some(repository) = &self.repository else {
            return;
        };
        let batch = std::mem::take(&mut self.state.lock().pending);
        if !batch.is_empty() {
            self.flush_batch(repository, batch).await;
        }
    }

    fn event(&self, event_type: AuditEventType, stage: &str, message: impl Into<String>, level: AuditLevel) -> AuditEvent {
        AuditEvent::new(&self.pipeline_run_id, event_type, stage, message, level)
    }

    // -- Convenience wrappers --------------------------------------------

    pub async fn log_pipeline_started(&self, name: &str) {
        self.log_event(self.event(
            AuditEventType::PipelineStarted,
            "pipeline",
            format!("Pipeline '{}' started", name),
            AuditLevel::Info,
        ))
        .await;
    }

    pub async fn log_pipeline_completed(&self, name: &str, total_records: i64) {
        self.log_event(
            self.event(
                AuditEventType::PipelineCompleted,
                "pipeline",
                format!("Pipeline '{}' completed", name),
                AuditLevel::Info,
            )
            .with_details(serde_json::json!({"total_records": total_records})),
        )
        .await;
    }

    pub async fn log_stage_started(&self, stage: &str) {
        self.log_event(self.event(
            AuditEventType::StageStarted,
            stage,
            format!("Stage '{}' started", stage),
            AuditLevel::Info,
        ))
        .await;
    }

    pub async fn log_stage_completed(&self, stage: &str, records: i64) {
        self.log_event(
            self.event(
                AuditEventType::StageCompleted,
                stage,
                format!("Stage '{}' completed", stage),
                AuditLevel::Info,
            )
            .with_details(serde_json::json!({"records_processed": records})),
        )
        .await;
    }

    pub async fn log_stage_failed(&self, stage: &str, error: &PipelineError) {
        self.log_event(
            self.event(
                AuditEventType::StageFailed,
                stage,
                format!("Stage '{}' failed: {}", stage, error),
                AuditLevel::Error,
            )
            .with_details(serde_json::json!({"error": error.to_string()})),
        )
        .await;
    }

    /// Record-level event; a no-op unless record-level tracking is on.
    pub async fn log_record_processed(&self, stage: &str, record_id: &str) {
        if !self.record_level_tracking {
            return;
        }
        self.log_event(
            self.event(
                AuditEventType::RecordProcessed,
                stage,
                format!("Processed record '{}'", record_id),
                AuditLevel::Debug,
            )
            .with_record_id(record_id),
        )
        .await;
    }

    pub async fn log_validation_failed(&self, stage: &str, record_id: &str, reason: &str) {
        self.log_event(
            self.event(
                AuditEventType::ValidationFailed,
                stage,
                format!("Validation failed for '{}': {}", record_id, reason),
                AuditLevel::Warning,
            )
            .with_record_id(record_id),
        )
        .await;
    }

    /// Quality check event. Scores below 0.8 log at WARNING, others INFO.
    pub async fn log_data_quality_check(&self, stage: &str, record_id: &str, score: f64, issues: usize) {
        let level = if score < 0.8 { AuditLevel::Warning } else { AuditLevel::Info };
        self.log_event(
            self.event(
                AuditEventType::DataQualityCheck,
                stage,
                format!("Quality score {:.3} for record '{}'", score, record_id),
                level,
            )
            .with_record_id(record_id)
            .with_details(serde_json::json!({"score": score, "issues": issues})),
        )
        .await;
    }

    pub async fn log_performance_metric(&self, stage: &str, duration_ms: i64, records: i64) {
        self.log_event(
            self.event(
                AuditEventType::PerformanceMetric,
                stage,
                format!("Stage '{}' took {} ms", stage, duration_ms),
                AuditLevel::Info,
            )
            .with_details(serde_json::json!({"duration_ms": duration_ms, "records": records})),
        )
        .await;
    }

    pub async fn log_warning(&self, stage: &str, message: &str) {
        self.log_event(self.event(AuditEventType::Warning, stage, message, AuditLevel::Warning))
            .await;
    }

    pub async fn log_error(&self, stage: &str, message: &str) {
        self.log_event(self.event(AuditEventType::Error, stage, message, AuditLevel::Error))
            .await;
    }

    // -- Filters & export ------------------------------------------------

    /// Buffered events matching the given filters.
    pub fn get_events(
        &self,
        event_type: Option<AuditEventType>,
        level: Option<AuditLevel>,
        stage_name: Option<&str>,
    ) -> Vec<AuditEvent> {
        self.state
            .lock()
            .buffer
            .iter()
            .filter(|e| event_type.map_or(true, |t| e.event_type == t))
            .filter(|e| level.map_or(true, |l| e.level == l))
            .filter(|e| stage_name.map_or(true, |s| e.stage_name == s))
            .cloned()
            .collect()
    }

    pub fn get_event_count(
        &self,
        event_type: Option<AuditEventType>,
        level: Option<AuditLevel>,
        stage_name: Option<&str>,
    ) -> usize {
        self.get_events(event_type, level, stage_name).len()
    }

    /// Exports buffered events to `path` as `json` or `csv`. Disabled
    /// loggers warn and write nothing.
    pub fn export_events(
        &self,
        path: &std::path::Path,
        format: &str,
        event_type: Option<AuditEventType>,
    ) -> Result<(), PipelineError> {
        if !self.enabled {
            warn!("audit logger is disabled; export skipped");
            return Ok(());
        }
        let events = self.get_events(event_type, None, None);
        match format {
            "json" => {
                let body = serde_json::to_string_pretty(&events)
                    .map_err(|e| PipelineError::SerializationError(e.to_string()))?;
                std::fs::write(path, body).map_err(|e| PipelineError::io_error(e.to_string()))?;
            }
            "csv" => {
                let mut out = String::new();
                out.push_str(&format!(
                    "pipeline_run_id,total_events,exported_at\n{},{},{}\n\n",
                    self.pipeline_run_id,
                    events.len(),
                    chrono::Utc::now().to_rfc3339()
                ));
                out.push_str("Event Details\n");
                out.push_str("timestamp,event_type,stage_name,level,record_id,correlation_id,message\n");
                for event in &events {
                    out.push_str(&format!(
                        "{},{},{},{},{},{},{}\n",
                        event.timestamp.to_rfc3339(),
                        event.event_type.as_str(),
                        event.stage_name,
                        event.level.as_str(),
                        event.record_id.as_deref().unwrap_or(""),
                        event.correlation_id.as_deref().unwrap_or(""),
                        event.message.replace(',', ";"),
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
