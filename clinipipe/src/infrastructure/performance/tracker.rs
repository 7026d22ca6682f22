// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Performance Tracker
//!
//! Ordered step timing for one pipeline run plus the run-level aggregate.
//! All state lives behind one mutex so concurrent `start_step` /
//! `finish_step` calls from stage workers can never interleave into a
//! split step. Step history is capped at 100 with FIFO eviction.
//!
//! Bottleneck rules: a step is flagged when its duration is at least 50%
//! of the pipeline total, or at least 30% and more than twice the step
//! average, or its failure rate reaches 10%.

use std::collections::{HashMap, VecDeque};
use std::future::Future;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use clinipipe_domain::entities::PerformanceMetric;

use crate::infrastructure::persistence::TrackingRepository;

const STEP_HISTORY_CAP: usize = 100;

/// Timing and throughput for one pipeline step.
#[derive(Debug, Clone, Serialize)]
pub struct StepMetrics {
    pub step_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub records_processed: u64,
    pub bytes_processed: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub records_per_second: Option<f64>,
    pub bytes_per_second: Option<f64>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StepMetrics {
    fn new(step_name: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            records_processed: 0,
            bytes_processed: 0,
            success_count: 0,
            failure_count: 0,
            records_per_second: None,
            bytes_per_second: None,
            metadata: HashMap::new(),
        }
    }

    fn finish(&mut self, records: u64, bytes: u64, successes: u64, failures: u64) {
        let completed = Utc::now();
        let duration_ms = (completed - self.started_at).num_milliseconds().max(0);
        self.completed_at = Some(completed);
        self.duration_ms = Some(duration_ms);
        self.records_processed = records;
        self.bytes_processed = bytes;
        self.success_count = successes;
        self.failure_count = failures;
        if duration_ms > 0 {
            let seconds = duration_ms as f64 / 1000.0;
            self.records_per_second = Some(records as f64 / seconds);
            self.bytes_per_second = Some(bytes as f64 / seconds);
        }
    }

    pub fn failure_rate(&self) -> f64 {
        let attempts = self.success_count + self.failure_count;
        if attempts == 0 {
            0.0
        } else {
            self.failure_count as f64 / attempts as f64 * 100.0
        }
    }
}

/// Run-level aggregate derived when the pipeline finishes.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineMetrics {
    pub pipeline_run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total_duration_ms: i64,
    pub steps: Vec<StepMetrics>,
    pub avg_records_per_second: f64,
    /// Step names flagged by the bottleneck rules.
    pub bottlenecks: Vec<String>,
}

/// Ranked view of the slowest and highest-failure steps.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BottleneckAnalysis {
    /// (step, duration_ms) sorted slowest first.
    pub slowest_steps: Vec<(String, i64)>,
    /// (step, failure_rate_percent) for steps at or above 10%.
    pub high_failure_steps: Vec<(String, f64)>,
    pub recommendations: Vec<String>,
}

struct PerfState {
    active: HashMap<String, StepMetrics>,
    completed: VecDeque<StepMetrics>,
    pipeline_started: DateTime<Utc>,
}

/// Per-run step and pipeline timing; see the module docs.
pub struct PerformanceTracker {
    pipeline_run_id: String,
    enabled: bool,
    repository: Option<TrackingRepository>,
    state: Mutex<PerfState>,
}

impl PerformanceTracker {
    pub fn new(pipeline_run_id: impl Into<String>, enabled: bool, repository: Option<TrackingRepository>) -> Self {
        Self {
            pipeline_run_id: pipeline_run_id.into(),
            enabled,
            repository,
            state: Mutex::new(PerfState {
                active: HashMap::new(),
                completed: VecDeque::new(),
                pipeline_started: Utc::now(),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Starts timing a step. Restarting an active step discards the prior
    /// unfinished timing with a warning.
    pub fn start_step(&self, step_name: &str) {
        if !self.enabled {
            return;
        }
        let mut state = self.state.lock();
        if state.active.insert(step_name.to_string(), StepMetrics::new(step_name)).is_some() {
            warn!(step = step_name, "step restarted while active; prior timing discarded");
        }
        debug!(step = step_name, "step started");
    }

    /// Finishes a step, derives its rates, and persists the measurement.
    pub async fn finish_step(
        &self,
        step_name: &str,
        records: u64,
        bytes: u64,
        successes: u64,
        failures: u64,
    ) -> Option<StepMetrics> {
        if !self.enabled {
            return None;
        }
        let step = {
            let mut state = self.state.lock();
            let Some(mut step) = state.active.remove(step_name) else {
                warn!(step = step_name, "finish_step without matching start_step");
                return None;
            };
            step.finish(records, bytes, successes, failures);
            if state.completed.len() >= STEP_HISTORY_CAP {
                state.completed.pop_front();
            }
            state.completed.push_back(step.clone());
            step
        };

        if let Some(repository) = &self.repository {
            let mut metric = PerformanceMetric::started(&self.pipeline_run_id, step_name);
            metric.started_at = step.started_at;
            metric.completed_at = step.completed_at;
            metric.duration_ms = step.duration_ms;
            metric.records_processed = step.records_processed as i64;
            metric.records_per_second = step.records_per_second;
            if let Err(e) = repository.record_performance_metric(&metric).await {
                warn!("performance metric write failed: {}", e);
            }
        }
        Some(step)
    }

    /// Scoped step timing: runs `f` and finishes the step with the counts
    /// it returns `(records, bytes, successes, failures)`.
    pub async fn track_step<T, F, Fut>(&self, step_name: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = (T, (u64, u64, u64, u64))>,
    {
        self.start_step(step_name);
        let (result, (records, bytes, successes, failures)) = f().await;
        self.finish_step(step_name, records, bytes, successes, failures).await;
        result
    }

    /// Completed steps, oldest first.
    pub fn completed_steps(&self) -> Vec<StepMetrics> {
        self.state.lock().completed.iter().cloned().collect()
    }

    /// Derives the run aggregate and flags bottleneck steps.
    pub fn finish_pipeline(&self) -> PipelineMetrics {
        let (started_at, steps) = {
            let state = self.state.lock();
            (state.pipeline_started, state.completed.iter().cloned().collect::<Vec<_>>())
        };
        let completed_at = Utc::now();
        let total_duration_ms = (completed_at - started_at).num_milliseconds().max(0);

        let rates: Vec<f64> = steps.iter().filter_map(|s| s.records_per_second).collect();
        let avg_records_per_second = if rates.is_empty() {
            0.0
        } else {
            rates.iter().sum::<f64>() / rates.len() as f64
        };

        let bottlenecks = Self::flag_bottlenecks(&steps, total_duration_ms);

        PipelineMetrics {
            pipeline_run_id: self.pipeline_run_id.clone(),
            started_at,
            completed_at,
            total_duration_ms,
            steps,
            avg_records_per_second,
            bottlenecks,
        }
    }

    fn flag_bottlenecks(steps: &[StepMetrics], total_duration_ms: i64) -> Vec<String> {
        if steps.is_empty() || total_duration_ms <= 0 {
            return Vec::new();
        }
        let durations: Vec<i64> = steps.iter().filter_map(|s| s.duration_ms).collect();
        let avg_duration = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<i64>() as f64 / durations.len() as f64
        };

        let mut flagged = Vec::new();
        for step in steps {
            let duration = step.duration_ms.unwrap_or(0) as f64;
            let share = duration / total_duration_ms as f64;
            let dominant = share >= 0.5 || (share >= 0.3 && avg_duration > 0.0 && duration > 2.0 * avg_duration);
            if dominant || step.failure_rate() >= 10.0 {
                flagged.push(step.step_name.clone());
            }
        }
        flagged
    }

    /// Ranks slow and failure-heavy steps and writes the recommendations.
    pub fn analyze_bottlenecks(&self) -> BottleneckAnalysis {
        let metrics = self.finish_pipeline();

        let mut slowest: Vec<(String, i64)> = metrics
            .steps
            .iter()
            .filter_map(|s| s.duration_ms.map(|d| (s.step_name.clone(), d)))
            .collect();
        slowest.sort_by(|a, b| b.1.cmp(&a.1));

        let high_failure: Vec<(String, f64)> = metrics
            .steps
            .iter()
            .filter(|s| s.failure_rate() >= 10.0)
            .map(|s| (s.step_name.clone(), s.failure_rate()))
            .collect();

        let mut recommendations = Vec::new();
        if let Some((name, duration)) = slowest.first() {
            if metrics.total_duration_ms > 0 {
                let share = *duration as f64 / metrics.total_duration_ms as f64 * 100.0;
                if share >= 30.0 {
                    recommendations.push(format!(
                        "Step '{}' consumed {:.0}% of pipeline wall time; consider parallelizing it",
                        name, share
                    ));
                }
            }
        }
        for (name, rate) in &high_failure {
            recommendations.push(format!(
                "Step '{}' fails {:.1}% of its records; inspect its error breakdown",
                name, rate
            ));
        }

        BottleneckAnalysis {
            slowest_steps: slowest,
            high_failure_steps: high_failure,
            recommendations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn tracker() -> PerformanceTracker {
        PerformanceTracker::new("run-1", true, None)
    }

    #[tokio::test]
    async fn test_step_round_trip_derives_rates() {
        let tracker = tracker();
        tracker.start_step("chunking");
        tokio::time::sleep(std::time::Duration::from_millis(15)).await;
        let step = tracker.finish_step("chunking", 30, 3000, 30, 0).await.unwrap();

        assert!(step.duration_ms.unwrap() >= 10);
        assert!(step.records_per_second.unwrap() > 0.0);
        assert!(step.bytes_per_second.unwrap() > step.records_per_second.unwrap());
        assert_eq!(step.failure_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_finish_without_start_is_noop() {
        let tracker = tracker();
        assert!(tracker.finish_step("ghost", 0, 0, 0, 0).await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_tracker_records_nothing() {
        let tracker = PerformanceTracker::new("run-1", false, None);
        tracker.start_step("chunking");
        assert!(tracker.finish_step("chunking", 1, 1, 1, 0).await.is_none());
        assert!(tracker.completed_steps().is_empty());
    }

    #[tokio::test]
    async fn test_step_history_is_bounded() {
        let tracker = tracker();
        for i in 0..(STEP_HISTORY_CAP + 20) {
            let name = format!("step-{}", i);
            tracker.start_step(&name);
            tracker.finish_step(&name, 1, 1, 1, 0).await;
        }
        assert_eq!(tracker.completed_steps().len(), STEP_HISTORY_CAP);
        // FIFO: the earliest steps were evicted.
        assert_eq!(tracker.completed_steps()[0].step_name, "step-20");
    }

    #[tokio::test]
    async fn test_concurrent_steps_never_split() {
        let tracker = Arc::new(tracker());
        let mut handles = Vec::new();
        for i in 0..8 {
            let tracker = Arc::clone(&tracker);
            handles.push(tokio::spawn(async move {
                let name = format!("worker-{}", i);
                tracker.start_step(&name);
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                tracker.finish_step(&name, 10, 100, 10, 0).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_some());
        }
        assert_eq!(tracker.completed_steps().len(), 8);
    }

    #[tokio::test]
    async fn test_high_failure_step_is_flagged() {
        let tracker = tracker();
        tracker.start_step("embedding");
        tracker.finish_step("embedding", 10, 100, 8, 2).await;

        let metrics = tracker.finish_pipeline();
        assert!(metrics.bottlenecks.contains(&"embedding".to_string()));

        let analysis = tracker.analyze_bottlenecks();
        assert_eq!(analysis.high_failure_steps.len(), 1);
        assert!(analysis.recommendations.iter().any(|r| r.contains("embedding")));
    }

    #[tokio::test]
    async fn test_dominant_step_is_flagged() {
        let tracker = tracker();
        tracker.start_step("fast");
        tracker.finish_step("fast", 5, 50, 5, 0).await;
        tracker.start_step("slow");
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        tracker.finish_step("slow", 5, 50, 5, 0).await;

        let metrics = tracker.finish_pipeline();
        assert!(metrics.bottlenecks.contains(&"slow".to_string()));
        assert!(!metrics.bottlenecks.contains(&"fast".to_string()));

        let analysis = tracker.analyze_bottlenecks();
        assert_eq!(analysis.slowest_steps.first().unwrap().0, "slow");
    }

    #[tokio::test]
    async fn test_track_step_scoped() {
        let tracker = tracker();
        let value = tracker
            .track_step("scoped", || async { ("done", (3, 300, 3, 0)) })
            .await;
        assert_eq!(value, "done");
        let steps = tracker.completed_steps();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].records_processed, 3);
    }
}
