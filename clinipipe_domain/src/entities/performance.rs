// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Persisted per-stage timing rows written by the performance tracker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One stage timing measurement bound to a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    /// Storage-assigned id; zero until persisted.
    pub id: i64,
    pub pipeline_run_id: String,
    pub stage_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub records_processed: i64,
    pub records_per_second: Option<f64>,
    pub memory_usage_mb: Option<f64>,
    pub cpu_usage_percent: Option<f64>,
    pub bottleneck_indicator: Option<String>,
}

impl PerformanceMetric {
    pub fn started(pipeline_run_id: impl Into<String>, stage_name: impl Into<String>) -> Self {
        Self {
            id: 0,
            pipeline_run_id: pipeline_run_id.into(),
            stage_name: stage_name.into(),
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            records_processed: 0,
            records_per_second: None,
            memory_usage_mb: None,
            cpu_usage_percent: None,
            bottleneck_indicator: None,
        }
    }

    /// Marks the metric complete and derives duration and throughput.
    pub fn finish(&mut self, records_processed: i64) {
        let completed = Utc::now();
        let duration_ms = (completed - self.started_at).num_milliseconds().max(0);
        self.completed_at = Some(completed);
        self.duration_ms = Some(duration_ms);
        self.records_processed = records_processed;
        if duration_ms > 0 {
            self.records_per_second = Some(records_processed as f64 / (duration_ms as f64 / 1000.0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_derives_duration() {
        let mut metric = PerformanceMetric::started("run-1", "chunking");
        metric.finish(10);
        assert!(metric.completed_at.is_some());
        assert!(metric.duration_ms.is_some());
        assert_eq!(metric.records_processed, 10);
    }
}
