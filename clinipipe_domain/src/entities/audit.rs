// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Audit Events
//!
//! One [`AuditEvent`] per observable pipeline action, tagged with the
//! active correlation id so causally related actions can be linked across
//! stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Enumerated audit event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    PipelineStarted,
    PipelineCompleted,
    PipelineFailed,
    StageStarted,
    StageCompleted,
    StageFailed,
    RecordProcessed,
    RecordFailed,
    RecordSkipped,
    ValidationFailed,
    DataQualityCheck,
    PerformanceMetric,
    SystemEvent,
    Warning,
    Error,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::PipelineStarted => "pipeline_started",
            AuditEventType::PipelineCompleted => "pipeline_completed",
            AuditEventType::PipelineFailed => "pipeline_failed",
            AuditEventType::StageStarted => "stage_started",
            AuditEventType::StageCompleted => "stage_completed",
            AuditEventType::StageFailed => "stage_failed",
            AuditEventType::RecordProcessed => "record_processed",
            AuditEventType::RecordFailed => "record_failed",
            AuditEventType::RecordSkipped => "record_skipped",
            AuditEventType::ValidationFailed => "validation_failed",
            AuditEventType::DataQualityCheck => "data_quality_check",
            AuditEventType::PerformanceMetric => "performance_metric",
            AuditEventType::SystemEvent => "system_event",
            AuditEventType::Warning => "warning",
            AuditEventType::Error => "error",
        }
    }
}

/// Event level, mirroring conventional log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl AuditLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditLevel::Debug => "DEBUG",
            AuditLevel::Info => "INFO",
            AuditLevel::Warning => "WARNING",
            AuditLevel::Error => "ERROR",
            AuditLevel::Critical => "CRITICAL",
        }
    }
}

/// One observable pipeline event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Storage-assigned id; zero until persisted.
    pub id: i64,
    pub pipeline_run_id: String,
    pub event_type: AuditEventType,
    pub stage_name: String,
    pub message: String,
    pub level: AuditLevel,
    pub record_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        pipeline_run_id: impl Into<String>,
        event_type: AuditEventType,
        stage_name: impl Into<String>,
        message: impl Into<String>,
        level: AuditLevel,
    ) -> Self {
        Self {
            id: 0,
            pipeline_run_id: pipeline_run_id.into(),
            event_type,
            stage_name: stage_name.into(),
            message: message.into(),
            level,
            record_id: None,
            details: None,
            correlation_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(AuditLevel::Debug < AuditLevel::Info);
        assert!(AuditLevel::Error < AuditLevel::Critical);
    }

    #[test]
    fn test_level_serde_uppercase() {
        assert_eq!(serde_json::to_string(&AuditLevel::Warning).unwrap(), "\"WARNING\"");
    }

    #[test]
    fn test_event_builder() {
        let event = AuditEvent::new("run-1", AuditEventType::RecordFailed, "ingestion", "parse failed", AuditLevel::Error)
            .with_record_id("rec-1")
            .with_details(serde_json::json!({"byte_offset": 12}));
        assert_eq!(event.record_id.as_deref(), Some("rec-1"));
        assert!(event.correlation_id.is_none());
    }
}
