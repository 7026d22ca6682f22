// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Run
//!
//! A pipeline run identifies one execution of the staged pipeline. The
//! executor creates the run at launch, stage trackers increment its
//! counters additively as records flow through, and the executor sets a
//! terminal status exactly once when the run finishes.
//!
//! ## Invariants
//!
//! - `successful + failed + skipped <= total` at every point in time.
//! - A terminal status (`completed`, `failed`, `cancelled`) is monotonic:
//!   once set, neither the status nor the counters change again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states admit no further mutation.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome status of a single processed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Success,
    Failure,
    Skipped,
    PartialSuccess,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Success => "success",
            ProcessingStatus::Failure => "failure",
            ProcessingStatus::Skipped => "skipped",
            ProcessingStatus::PartialSuccess => "partial_success",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(ProcessingStatus::Success),
            "failure" => Some(ProcessingStatus::Failure),
            "skipped" => Some(ProcessingStatus::Skipped),
            "partial_success" => Some(ProcessingStatus::PartialSuccess),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary view of one pipeline run as stored by the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRunSummary {
    pub id: String,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub total_records: i64,
    pub successful_records: i64,
    pub failed_records: i64,
    pub skipped_records: i64,
    /// Snapshot of the effective configuration at launch.
    pub config_snapshot: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

impl PipelineRunSummary {
    /// Creates a freshly started run with zeroed counters.
    pub fn started(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::Running,
            total_records: 0,
            successful_records: 0,
            failed_records: 0,
            skipped_records: 0,
            config_snapshot: None,
            error_message: None,
        }
    }

    /// Checks the counter invariant: outcomes never exceed the total.
    pub fn counters_consistent(&self) -> bool {
        self.successful_records + self.failed_records + self.skipped_records <= self.total_records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [RunStatus::Running, RunStatus::Completed, RunStatus::Failed, RunStatus::Cancelled] {
            assert_eq!(RunStatus::parse_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_started_run_counters_consistent() {
        let run = PipelineRunSummary::started("run-1", "nightly");
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.counters_consistent());
        assert!(run.completed_at.is_none());
    }

    #[test]
    fn test_processing_status_serde_names() {
        let json = serde_json::to_string(&ProcessingStatus::PartialSuccess).unwrap();
        assert_eq!(json, "\"partial_success\"");
    }
}
