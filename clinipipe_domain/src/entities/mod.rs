// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Domain entities: telemetry rows, run lifecycle, and pipeline payloads.

pub mod audit;
pub mod content;
pub mod ingestion;
pub mod operational;
pub mod performance;
pub mod pipeline_run;
pub mod quality;
pub mod system;

pub use audit::{AuditEvent, AuditEventType, AuditLevel};
pub use content::{ClinicalContent, ContentChunk, EmbeddedChunk, PipelineItem, StoredBatch};
pub use ingestion::{FailedRecord, IngestionStat, IngestionSummary};
pub use operational::{
    Adjustment, Charge, Claim, HierarchyNode, MessageCache, OperationalContent, Payment, PriorAuthorization,
};
pub use performance::PerformanceMetric;
pub use pipeline_run::{PipelineRunSummary, ProcessingStatus, RunStatus};
pub use quality::{QualityDimension, QualityIssue, QualityMetric, QualitySummary, Severity};
pub use system::SystemMetric;
