// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Concurrent Pipeline Executor
//!
//! One worker task per enabled stage, connected by bounded queues of
//! `Option<PipelineItem>`; `None` is the end-of-stream sentinel. The
//! bounded queues provide backpressure: a fast producer blocks at `send`
//! until its consumer catches up.
//!
//! ## Lifecycle
//!
//! The source worker runs the ingestion stage's `produce`, forwarding each
//! item downstream; when the source drains (or the stop event fires) it
//! pushes the sentinel and exits. Every downstream worker consumes until
//! it observes the sentinel, then forwards one sentinel of its own.
//!
//! A single stop event is shared by the executor, the timeout handler and
//! every worker. Workers check it at each queue operation; in-flight
//! `execute` calls complete before the worker drains out. Cancellation
//! yields a terminal `cancelled` run status.
//!
//! Ordering: strict FIFO within one queue, no ordering across queues.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use clinipipe_bootstrap::StopEvent;
use clinipipe_domain::entities::{PipelineItem, RunStatus};
use clinipipe_domain::PipelineError;

use crate::infrastructure::metrics::{MetricsService, SystemMetricsCollector};

use super::context::PipelineContext;
use super::stages::{PipelineStage, SourceStage};

/// Fixed stage ordering, leaf first.
pub const STAGE_ORDER: [&str; 5] = ["ingestion", "deid", "chunking", "embedding", "vectorstore"];

/// Terminal state of one stage worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Per-stage outcome collected after the worker exits.
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub stage: String,
    pub status: StageStatus,
    pub results: Vec<PipelineItem>,
    pub error: Option<String>,
}

/// The run-level result returned by `execute_pipeline`.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRunResult {
    pub status: RunStatus,
    pub results: HashMap<String, StageResult>,
    pub duration_ms: u64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

struct WorkerOutcome {
    stage: String,
    status: StageStatus,
    results: Vec<PipelineItem>,
    error: Option<String>,
    processed: u64,
    failed: u64,
}

/// Staged concurrent executor; see the module docs.
pub struct ConcurrentPipelineExecutor {
    source: Arc<dyn SourceStage>,
    stages: HashMap<String, Arc<dyn PipelineStage>>,
    stop_event: StopEvent,
    metrics: Option<MetricsService>,
    system_metrics: Option<Arc<SystemMetricsCollector>>,
}

impl ConcurrentPipelineExecutor {
    pub fn new(
        source: Arc<dyn SourceStage>,
        stages: Vec<Arc<dyn PipelineStage>>,
        stop_event: StopEvent,
    ) -> Self {
        let stages = stages
            .into_iter()
            .map(|stage| (stage.name().to_string(), stage))
            .collect();
        Self {
            source,
            stages,
            stop_event,
            metrics: None,
            system_metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsService) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_system_metrics(mut self, collector: Arc<SystemMetricsCollector>) -> Self {
        self.system_metrics = Some(collector);
        self
    }

    /// Sets the stop event and lets the workers drain out. Idempotent.
    pub fn stop(&self) {
        info!("executor stop requested");
        self.stop_event.set();
    }

    pub fn stop_event(&self) -> &StopEvent {
        &self.stop_event
    }

    /// Stage names known to this executor, in pipeline order.
    pub fn available_stages(&self) -> Vec<&'static str> {
        STAGE_ORDER.to_vec()
    }

    /// Enabled stages in pipeline order, warning on dependency gaps.
    pub fn get_enabled_stages(&self, context: &PipelineContext) -> Vec<String> {
        let enabled: Vec<String> = STAGE_ORDER
            .iter()
            .filter(|stage| context.is_stage_enabled(stage))
            .map(|s| s.to_string())
            .collect();

        let deid_enabled = context.is_stage_enabled("deid");
        let dependencies: HashMap<&str, &str> = [
            ("deid", "ingestion"),
            ("chunking", if deid_enabled { "deid" } else { "ingestion" }),
            ("embedding", "chunking"),
            ("vectorstore", "embedding"),
        ]
        .into_iter()
        .collect();

        for stage in &enabled {
            if let Some(dependency) = dependencies.get(stage.as_str()) {
                if !context.is_stage_enabled(dependency) {
                    context.add_warning(format!(
                        "Stage '{}' is enabled but its dependency '{}' is disabled",
                        stage, dependency
                    ));
                }
            }
        }
        enabled
    }

    /// Runs the pipeline to completion, cancellation, or failure.
    pub async fn execute_pipeline(&self, context: Arc<PipelineContext>) -> Result<PipelineRunResult, PipelineError> {
        let started = Instant::now();
        let enabled = self.get_enabled_stages(&context);
        if enabled.is_empty() {
            return Err(PipelineError::ConfigurationError("no pipeline stages are enabled".to_string()));
        }
        info!(stages = ?enabled, pipeline_id = %context.pipeline_id, "starting pipeline");

        if let Some(metrics) = &self.metrics {
            metrics.run_started();
        }

        // Run bookkeeping is best-effort: a dead backend must not stop the
        // in-memory pipeline.
        if let Some(repository) = &context.repository {
            if let Err(e) = repository
                .start_pipeline_run(&context.pipeline_id, &context.name, Some(&context.config.snapshot()))
                .await
            {
                warn!("failed to record pipeline run start: {}", e);
            }
        }
        context.audit_logger.log_pipeline_started(&context.name).await;
        self.record_system_snapshot(&context).await;

        // Timeout handler: sets the shared stop event after the deadline.
        let timeout_handle = context.config.pipeline.timeout_seconds.map(|seconds| {
            let stop = self.stop_event.clone();
            tokio::spawn(async move {
                let deadline = Duration::from_secs_f64(seconds);
                if !stop.wait_timeout(deadline).await {
                    warn!(timeout_seconds = seconds, "pipeline timeout reached, cancelling");
                    stop.set();
                }
            })
        });

        let capacity = context.config.pipeline.queue_capacity;
        let outcomes = self.run_stage_workers(&context, &enabled, capacity).await;

        if let Some(handle) = timeout_handle {
            handle.abort();
        }

        // Terminal status: cancellation wins, then any failed worker.
        let cancelled = self.stop_event.is_set();
        let any_failed = outcomes.iter().any(|o| o.status == StageStatus::Failed);
        let status = if cancelled {
            context.add_error("pipeline", "Pipeline execution was cancelled");
            RunStatus::Cancelled
        } else if any_failed {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        let total_processed: u64 = outcomes
            .iter()
            .find(|o| o.stage == "ingestion")
            .map(|o| o.processed)
            .unwrap_or(0);

        let pipeline_metrics = context.performance_tracker.finish_pipeline();
        if let Some(metrics) = &self.metrics {
            metrics.run_finished(pipeline_metrics.avg_records_per_second);
        }

        if let Some(repository) = &context.repository {
            let first_error = context.errors().first().map(|e| e.message.clone());
            if let Err(e) = repository
                .complete_pipeline_run(&context.pipeline_id, status, first_error.as_deref())
                .await
            {
                warn!("failed to record pipeline run completion: {}", e);
            }
        }

        match status {
            RunStatus::Completed => {
                context
                    .audit_logger
                    .log_pipeline_completed(&context.name, total_processed as i64)
                    .await;
            }
            _ => {
                context
                    .audit_logger
                    .log_error("pipeline", &format!("Pipeline finished with status '{}'", status))
                    .await;
            }
        }
        context.audit_logger.flush().await;

        let results = outcomes
            .into_iter()
            .map(|o| {
                (
                    o.stage.clone(),
                    StageResult {
                        stage: o.stage,
                        status: o.status,
                        results: o.results,
                        error: o.error,
                    },
                )
            })
            .collect();

        Ok(PipelineRunResult {
            status,
            results,
            duration_ms: started.elapsed().as_millis() as u64,
            errors: context.errors().into_iter().map(|e| e.message).collect(),
            warnings: context.warnings(),
        })
    }

    async fn record_system_snapshot(&self, context: &PipelineContext) {
        let Some(collector) = &self.system_metrics else { return };
        if !context.data_intelligence.is_feature_enabled("system_metrics") {
            return;
        }
        let snapshot = collector.get_system_snapshot();
        let metric = collector.to_system_metric(&context.pipeline_id, &snapshot);
        if let Some(repository) = &context.repository {
            if let Err(e) = repository.record_system_metric(&metric).await {
                warn!("system metric write failed: {}", e);
            }
        }
    }

    /// Spawns one worker per enabled stage and joins them all.
    async fn run_stage_workers(
        &self,
        context: &Arc<PipelineContext>,
        enabled: &[String],
        capacity: usize,
    ) -> Vec<WorkerOutcome> {
        // One bounded queue per stage, named `<stage>_output`.
        let mut senders: HashMap<String, mpsc::Sender<Option<PipelineItem>>> = HashMap::new();
        let mut receivers: HashMap<String, mpsc::Receiver<Option<PipelineItem>>> = HashMap::new();
        for stage in enabled {
            let (tx, rx) = mpsc::channel::<Option<PipelineItem>>(capacity);
            senders.insert(format!("{}_output", stage), tx);
            receivers.insert(format!("{}_output", stage), rx);
        }

        let mut handles = Vec::new();
        let mut previous_stage: Option<String> = None;

        for (index, stage_name) in enabled.iter().enumerate() {
            let own_output = senders.remove(&format!("{}_output", stage_name));
            // The final stage has no consumer; it only collects results.
            let own_output = if index + 1 < enabled.len() { own_output } else { None };

            if stage_name == "ingestion" {
                handles.push(self.spawn_source_worker(context, own_output, capacity));
            } else {
                let input = previous_stage
                    .as_ref()
                    .and_then(|prev| receivers.remove(&format!("{}_output", prev)));
                handles.push(self.spawn_transform_worker(context, stage_name, input, own_output));
            }
            previous_stage = Some(stage_name.clone());
        }

        join_all(handles)
            .await
            .into_iter()
            .map(|joined| {
                joined.unwrap_or_else(|join_error| WorkerOutcome {
                    stage: "unknown".to_string(),
                    status: StageStatus::Failed,
                    results: Vec::new(),
                    error: Some(format!("worker panicked: {}", join_error)),
                    processed: 0,
                    failed: 0,
                })
            })
            .collect()
    }

    fn spawn_source_worker(
        &self,
        context: &Arc<PipelineContext>,
        output: Option<mpsc::Sender<Option<PipelineItem>>>,
        capacity: usize,
    ) -> tokio::task::JoinHandle<WorkerOutcome> {
        let context = Arc::clone(context);
        let source = Arc::clone(&self.source);
        let stop = self.stop_event.clone();

        tokio::spawn(async move {
            let stage_name = source.name().to_string();
            context.start_stage(&stage_name);

            let (item_tx, mut item_rx) = mpsc::channel::<PipelineItem>(capacity);
            let produce_context = Arc::clone(&context);
            let produce_task =
                tokio::spawn(async move { source.produce(&produce_context, item_tx).await });

            let mut outcome = WorkerOutcome {
                stage: stage_name.clone(),
                status: StageStatus::Completed,
                results: Vec::new(),
                error: None,
                processed: 0,
                failed: 0,
            };

            loop {
                tokio::select! {
                    _ = stop.wait() => {
                        info!(stage = %stage_name, "stop event observed; source draining");
                        outcome.status = StageStatus::Cancelled;
                        break;
                    }
                    item = item_rx.recv() => match item {
                        Some(item) => {
                            outcome.processed += 1;
                            outcome.results.push(item.clone());
                            if let Some(tx) = &output {
                                let sent = tokio::select! {
                                    _ = stop.wait() => false,
                                    result = tx.send(Some(item)) => result.is_ok(),
                                };
                                if !sent {
                                    outcome.status = StageStatus::Cancelled;
                                    break;
                                }
                            }
                        }
                        None => break,
                    }
                }
            }
            // Receiver closes here, unblocking a producer mid-send.
            drop(item_rx);

            match produce_task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if outcome.status == StageStatus::Cancelled => {
                    debug!(stage = %stage_name, "source error after cancellation ignored: {}", e);
                }
                Ok(Err(e)) => {
                    outcome.status = StageStatus::Failed;
                    outcome.error = Some(e.to_string());
                    context.add_error(&stage_name, e.to_string());
                }
                Err(join_error) => {
                    outcome.status = StageStatus::Failed;
                    outcome.error = Some(format!("source task panicked: {}", join_error));
                    context.add_error(&stage_name, format!("source task panicked: {}", join_error));
                }
            }

            if let Some(tx) = &output {
                let _ = tx.send(None).await;
            }
            context
                .end_stage(&stage_name, outcome.processed, outcome.processed, outcome.failed)
                .await;
            outcome
        })
    }

    fn spawn_transform_worker(
        &self,
        context: &Arc<PipelineContext>,
        stage_name: &str,
        input: Option<mpsc::Receiver<Option<PipelineItem>>>,
        output: Option<mpsc::Sender<Option<PipelineItem>>>,
    ) -> tokio::task::JoinHandle<WorkerOutcome> {
        let context = Arc::clone(context);
        let stage = self.stages.get(stage_name).cloned();
        let stage_name = stage_name.to_string();
        let stop = self.stop_event.clone();

        tokio::spawn(async move {
            let mut outcome = WorkerOutcome {
                stage: stage_name.clone(),
                status: StageStatus::Completed,
                results: Vec::new(),
                error: None,
                processed: 0,
                failed: 0,
            };

            // Initialization failures abort this worker but still emit the
            // sentinel so downstream can terminate.
            let (Some(stage), Some(mut input)) = (stage, input) else {
                let message = format!("stage '{}' has no input queue or implementation", stage_name);
                warn!("{}", message);
                context.add_error(&stage_name, &message);
                outcome.status = StageStatus::Failed;
                outcome.error = Some(message);
                if let Some(tx) = &output {
                    let _ = tx.send(None).await;
                }
                return outcome;
            };

            context.start_stage(&stage_name);

            loop {
                tokio::select! {
                    _ = stop.wait() => {
                        info!(stage = %stage_name, "stop event observed; worker draining");
                        outcome.status = StageStatus::Cancelled;
                        break;
                    }
                    message = input.recv() => match message {
                        Some(Some(item)) => {
                            let record_id = item.record_id();
                            match stage.execute(&context, item).await {
                                Ok(Some(result)) => {
                                    outcome.processed += 1;
                                    outcome.results.push(result.clone());
                                    if let Some(tx) = &output {
                                        let sent = tokio::select! {
                                            _ = stop.wait() => false,
                                            sent = tx.send(Some(result)) => sent.is_ok(),
                                        };
                                        if !sent {
                                            outcome.status = StageStatus::Cancelled;
                                            break;
                                        }
                                    }
                                }
                                Ok(None) => {
                                    // Filtered out of the stream.
                                    outcome.processed += 1;
                                }
                                Err(error) => {
                                    // Record-scoped: classify, track, keep going.
                                    outcome.failed += 1;
                                    context
                                        .record_stage_failure(&stage_name, &error, record_id, None)
                                        .await;
                                }
                            }
                        }
                        Some(None) | None => break,
                    }
                }
            }

            if let Some(tx) = &output {
                let _ = tx.send(None).await;
            }
            context
                .end_stage(&stage_name, outcome.processed, outcome.processed, outcome.failed)
                .await;
            outcome
        })
    }
}
