// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Persistence Provider Port
//!
//! Engine-agnostic contract for the tracking substrate. Two implementations
//! live in the infrastructure layer: a relational provider (parameterized
//! SQL through a dialect) and a document provider (operation documents
//! through an executor). Higher layers query [`PersistenceProvider::
//! supports_feature`] instead of branching on engine type.
//!
//! ## Failure semantics
//!
//! - Connection loss: retried once inside `health_check`, otherwise
//!   surfaced as `DatabaseError::Connection`.
//! - Malformed operations: `DatabaseError::Query`.
//! - Transaction aborts: `DatabaseError::Transaction`.
//!
//! Providers never panic on backend faults; every operation returns
//! `Result`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{
    AuditEvent, IngestionStat, IngestionSummary, PerformanceMetric, PipelineRunSummary, QualityMetric,
    QualitySummary, RunStatus, SystemMetric,
};
use crate::error::PipelineError;

/// Row-level result of one engine operation.
///
/// Relational engines fill `last_row_id` from the driver; the document
/// engine allocates monotonic ids per collection and stringifies binary ids
/// inside `rows` before returning them.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    pub last_row_id: Option<i64>,
    pub row_count: u64,
}

/// Feature names a provider may advertise through `supports_feature`.
pub mod features {
    pub const TRANSACTIONS: &str = "transactions";
    pub const JSON_EXTRACT: &str = "json_extract";
    pub const FULL_TEXT_SEARCH: &str = "full_text_search";
    pub const STREAMING_EXPORTS: &str = "streaming_exports";
}

/// Unified CRUD/analytics contract over a relational or document backend.
#[async_trait]
pub trait PersistenceProvider: Send + Sync + std::fmt::Debug {
    /// Establishes the backend connection.
    async fn connect(&self) -> Result<(), PipelineError>;

    /// Tears down the backend connection.
    async fn disconnect(&self) -> Result<(), PipelineError>;

    /// Liveness probe. Retries once on a transient fault, then reports
    /// false instead of erroring.
    async fn health_check(&self) -> bool;

    /// Creates tables/collections and indexes. Idempotent.
    async fn initialize_schema(&self) -> Result<(), PipelineError>;

    /// Capability probe; see [`features`].
    fn supports_feature(&self, feature: &str) -> bool;

    // -- Pipeline run lifecycle ------------------------------------------

    async fn start_pipeline_run(
        &self,
        id: &str,
        name: &str,
        config_snapshot: Option<&serde_json::Value>,
    ) -> Result<(), PipelineError>;

    /// Sets the terminal status. Implementations must not overwrite an
    /// already-terminal run.
    async fn complete_pipeline_run(
        &self,
        id: &str,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<(), PipelineError>;

    /// Additively increments the run counters. No-op on terminal runs.
    async fn update_pipeline_run_counts(
        &self,
        id: &str,
        delta_total: i64,
        delta_successful: i64,
        delta_failed: i64,
        delta_skipped: i64,
    ) -> Result<(), PipelineError>;

    async fn get_pipeline_run(&self, id: &str) -> Result<Option<PipelineRunSummary>, PipelineError>;

    async fn get_recent_pipeline_runs(&self, limit: i64) -> Result<Vec<PipelineRunSummary>, PipelineError>;

    // -- Telemetry writes ------------------------------------------------

    /// Returns the storage-assigned stat id.
    async fn record_ingestion_stat(&self, stat: &IngestionStat) -> Result<i64, PipelineError>;

    async fn record_failed_record(
        &self,
        ingestion_stat_id: i64,
        original_data: &str,
        failure_reason: &str,
        normalized_data: Option<&str>,
        stack_trace: Option<&str>,
    ) -> Result<i64, PipelineError>;

    async fn record_quality_metric(&self, metric: &QualityMetric) -> Result<i64, PipelineError>;

    async fn record_audit_event(&self, event: &AuditEvent) -> Result<i64, PipelineError>;

    async fn record_performance_metric(&self, metric: &PerformanceMetric) -> Result<i64, PipelineError>;

    async fn record_system_metric(&self, metric: &SystemMetric) -> Result<i64, PipelineError>;

    // -- Analytics -------------------------------------------------------

    async fn get_ingestion_summary(
        &self,
        pipeline_run_id: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<IngestionSummary, PipelineError>;

    async fn get_quality_summary(&self, pipeline_run_id: Option<&str>) -> Result<QualitySummary, PipelineError>;

    // -- Maintenance -----------------------------------------------------

    /// Deletes telemetry older than the retention window, children before
    /// parents. Returns the number of deleted rows.
    async fn cleanup_old_data(&self, days_to_keep: i64) -> Result<u64, PipelineError>;
}
