// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # SQLite Persistence Provider
//!
//! Relational implementation of the persistence provider contract using a
//! sqlx connection pool. All queries are parameterized statements emitted
//! through the [`SqlDialect`]; structured fields are stored as JSON text
//! columns and timestamps as RFC 3339 text.
//!
//! ## Schema
//!
//! `pipeline_runs` owns every child table (`ingestion_stats`,
//! `failed_records`, `quality_metrics`, `audit_events`,
//! `performance_metrics`, `system_metrics`) via `ON DELETE CASCADE`
//! foreign keys. Child tables carry a `(pipeline_run_id, timestamp)`
//! index; `pipeline_runs` is indexed on `started_at DESC` for the
//! recent-runs listing.
//!
//! ## Terminal-state monotonicity
//!
//! `complete_pipeline_run` and `update_pipeline_run_counts` both guard on
//! `status = 'running'`, so a terminal run can never be re-completed or
//! have its counters mutated.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use clinipipe_domain::entities::{
    AuditEvent, IngestionStat, IngestionSummary, PerformanceMetric, PipelineRunSummary, QualityMetric,
    QualitySummary, RunStatus, SystemMetric,
};
use clinipipe_domain::repositories::{features, PersistenceProvider};
use clinipipe_domain::{DatabaseError, PipelineError};

use super::dialect::{SqlDialect, SqliteDialect};

/// Relational persistence provider backed by SQLite.
#[derive(Debug)]
pub struct SqliteProvider {
    db_path: String,
    pool: RwLock<Option<SqlitePool>>,
    dialect: SqliteDialect,
    txn_active: Arc<AtomicBool>,
}

impl SqliteProvider {
    /// Creates a provider for the given database file. `:memory:` yields
    /// an in-memory database for tests.
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            pool: RwLock::new(None),
            dialect: SqliteDialect,
            txn_active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Convenience constructor: connect and initialize the schema.
    pub async fn open(db_path: impl Into<String>) -> Result<Self, PipelineError> {
        let provider = Self::new(db_path);
        provider.connect().await?;
        provider.initialize_schema().await?;
        Ok(provider)
    }

    async fn pool(&self) -> Result<SqlitePool, PipelineError> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| DatabaseError::Connection("provider is not connected".to_string()).into())
    }

    /// Acquires the scoped transaction guard.
    ///
    /// One transaction per connection: a nested acquisition fails with
    /// `DatabaseError::Transaction`. The guard commits on
    /// [`SqliteTransaction::commit`] and rolls back when dropped
    /// uncommitted.
    pub async fn transaction(&self) -> Result<SqliteTransaction, PipelineError> {
        if self
            .txn_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DatabaseError::Transaction("nested transactions are not supported".to_string()).into());
        }
        let pool = self.pool().await?;
        let inner = pool.begin().await.map_err(|e| {
            self.txn_active.store(false, Ordering::SeqCst);
            DatabaseError::Transaction(e.to_string())
        })?;
        Ok(SqliteTransaction {
            inner: Some(inner),
            active_flag: Arc::clone(&self.txn_active),
        })
    }
}

/// Scoped transaction: commit on success, rollback on drop.
pub struct SqliteTransaction {
    inner: Option<sqlx::Transaction<'static, sqlx::Sqlite>>,
    active_flag: Arc<AtomicBool>,
}

impl SqliteTransaction {
    /// The underlying sqlx transaction, for issuing statements.
    pub fn as_mut(&mut self) -> &mut sqlx::Transaction<'static, sqlx::Sqlite> {
        self.inner.as_mut().expect("transaction already consumed")
    }

    pub async fn commit(mut self) -> Result<(), PipelineError> {
        if let Some(txn) = self.inner.take() {
            txn.commit()
                .await
                .map_err(|e| PipelineError::from(DatabaseError::Transaction(e.to_string())))?;
        }
        Ok(())
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        // Uncommitted sqlx transactions roll back when dropped.
        self.active_flag.store(false, Ordering::SeqCst);
    }
}

fn query_err(e: sqlx::Error) -> PipelineError {
    DatabaseError::Query(e.to_string()).into()
}

fn to_rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, PipelineError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Query(format!("invalid timestamp '{}': {}", raw, e)).into())
}

fn json_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

fn row_to_run_summary(row: &SqliteRow) -> Result<PipelineRunSummary, PipelineError> {
    let started_at: String = row.try_get("started_at").map_err(query_err)?;
    let completed_at: Option<String> = row.try_get("completed_at").map_err(query_err)?;
    let status_raw: String = row.try_get("status").map_err(query_err)?;
    let config_raw: Option<String> = row.try_get("config_snapshot").map_err(query_err)?;

    Ok(PipelineRunSummary {
        id: row.try_get("id").map_err(query_err)?,
        name: row.try_get("name").map_err(query_err)?,
        started_at: parse_ts(&started_at)?,
        completed_at: completed_at.as_deref().map(parse_ts).transpose()?,
        status: RunStatus::parse_str(&status_raw)
            .ok_or_else(|| PipelineError::from(DatabaseError::Query(format!("unknown run status '{}'", status_raw))))?,
        total_records: row.try_get("total_records").map_err(query_err)?,
        successful_records: row.try_get("successful_records").map_err(query_err)?,
        failed_records: row.try_get("failed_records").map_err(query_err)?,
        skipped_records: row.try_get("skipped_records").map_err(query_err)?,
        config_snapshot: config_raw.and_then(|s| serde_json::from_str(&s).ok()),
        error_message: row.try_get("error_message").map_err(query_err)?,
    })
}

const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS pipeline_runs (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        started_at TEXT NOT NULL,
        completed_at TEXT,
        status TEXT NOT NULL DEFAULT 'running',
        total_records INTEGER NOT NULL DEFAULT 0,
        successful_records INTEGER NOT NULL DEFAULT 0,
        failed_records INTEGER NOT NULL DEFAULT 0,
        skipped_records INTEGER NOT NULL DEFAULT 0,
        config_snapshot TEXT,
        error_message TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_pipeline_runs_started_at ON pipeline_runs(started_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS ingestion_stats (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        pipeline_run_id TEXT NOT NULL REFERENCES pipeline_runs(id) ON DELETE CASCADE,
        stage_name TEXT NOT NULL,
        file_path TEXT,
        record_id TEXT,
        record_type TEXT,
        status TEXT NOT NULL,
        error_category TEXT,
        error_message TEXT,
        error_details TEXT,
        processing_time_ms INTEGER,
        record_size_bytes INTEGER,
        data_source TEXT,
        timestamp TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_ingestion_stats_run_ts ON ingestion_stats(pipeline_run_id, timestamp)",
    r#"
    CREATE TABLE IF NOT EXISTS failed_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ingestion_stat_id INTEGER NOT NULL REFERENCES ingestion_stats(id) ON DELETE CASCADE,
        original_data TEXT NOT NULL,
        normalized_data TEXT,
        failure_reason TEXT NOT NULL,
        stack_trace TEXT,
        timestamp TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_failed_records_stat ON failed_records(ingestion_stat_id)",
    r#"
    CREATE TABLE IF NOT EXISTS quality_metrics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        pipeline_run_id TEXT NOT NULL REFERENCES pipeline_runs(id) ON DELETE CASCADE,
        record_id TEXT,
        record_type TEXT,
        completeness_score REAL NOT NULL,
        consistency_score REAL NOT NULL,
        validity_score REAL NOT NULL,
        accuracy_score REAL NOT NULL,
        outlier_score REAL NOT NULL,
        data_usage_score REAL NOT NULL,
        overall_score REAL NOT NULL,
        missing_fields TEXT,
        invalid_fields TEXT,
        outlier_fields TEXT,
        unused_fields TEXT,
        issues TEXT,
        sampled INTEGER NOT NULL DEFAULT 1,
        timestamp TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_quality_metrics_run_ts ON quality_metrics(pipeline_run_id, timestamp)",
    r#"
    CREATE TABLE IF NOT EXISTS audit_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        pipeline_run_id TEXT NOT NULL REFERENCES pipeline_runs(id) ON DELETE CASCADE,
        event_type TEXT NOT NULL,
        stage_name TEXT NOT NULL,
        message TEXT NOT NULL,
        level TEXT NOT NULL,
        record_id TEXT,
        details TEXT,
        correlation_id TEXT,
        timestamp TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_audit_events_run_ts ON audit_events(pipeline_run_id, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_audit_events_type_level ON audit_events(event_type, level)",
    r#"
    CREATE TABLE IF NOT EXISTS performance_metrics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        pipeline_run_id TEXT NOT NULL REFERENCES pipeline_runs(id) ON DELETE CASCADE,
        stage_name TEXT NOT NULL,
        started_at TEXT NOT NULL,
        completed_at TEXT,
        duration_ms INTEGER,
        records_processed INTEGER NOT NULL DEFAULT 0,
        records_per_second REAL,
        memory_usage_mb REAL,
        cpu_usage_percent REAL,
        bottleneck_indicator TEXT,
        timestamp TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_performance_metrics_run_ts ON performance_metrics(pipeline_run_id, timestamp)",
    r#"
    CREATE TABLE IF NOT EXISTS system_metrics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        pipeline_run_id TEXT NOT NULL REFERENCES pipeline_runs(id) ON DELETE CASCADE,
        hostname TEXT NOT NULL,
        os_name TEXT NOT NULL,
        os_version TEXT NOT NULL,
        runtime_version TEXT NOT NULL,
        cpu_model TEXT NOT NULL,
        cpu_cores INTEGER NOT NULL,
        memory_total_gb REAL NOT NULL,
        gpu_available INTEGER NOT NULL,
        gpu_model TEXT,
        additional_info TEXT,
        timestamp TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_system_metrics_run_ts ON system_metrics(pipeline_run_id, timestamp)",
];

#[async_trait]
impl PersistenceProvider for SqliteProvider {
    async fn connect(&self) -> Result<(), PipelineError> {
        let mut guard = self.pool.write().await;
        if guard.is_some() {
            debug!("sqlite provider already connected");
            return Ok(());
        }

        let in_memory = self.db_path == ":memory:";
        let options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| DatabaseError::Connection(e.to_string()))?
        } else {
            SqliteConnectOptions::new()
                .filename(&self.db_path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
        }
        .foreign_keys(true);

        // In-memory databases are per-connection; a single connection keeps
        // every statement on the same database.
        let max_connections = if in_memory { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        *guard = Some(pool);
        debug!(db_path = %self.db_path, "sqlite provider connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PipelineError> {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
        Ok(())
    }

    async fn health_check(&self) -> bool {
        let Ok(pool) = self.pool().await else {
            return false;
        };
        for attempt in 0..2 {
            match sqlx::query("SELECT 1").fetch_one(&pool).await {
                Ok(_) => return true,
                Err(e) if attempt == 0 => {
                    warn!("sqlite health check failed, retrying once: {}", e);
                }
                Err(e) => {
                    warn!("sqlite health check failed: {}", e);
                }
            }
        }
        false
    }

    async fn initialize_schema(&self) -> Result<(), PipelineError> {
        let pool = self.pool().await?;
        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement).execute(&pool).await.map_err(query_err)?;
        }
        Ok(())
    }

    fn supports_feature(&self, feature: &str) -> bool {
        matches!(feature, features::TRANSACTIONS | features::JSON_EXTRACT)
    }

    async fn start_pipeline_run(
        &self,
        id: &str,
        name: &str,
        config_snapshot: Option<&serde_json::Value>,
    ) -> Result<(), PipelineError> {
        let pool = self.pool().await?;
        let sql = format!(
            "INSERT INTO pipeline_runs (id, name, started_at, status, config_snapshot) VALUES ({})",
            self.dialect.placeholder_list(1, 5)
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(name)
            .bind(to_rfc3339(&Utc::now()))
            .bind(RunStatus::Running.as_str())
            .bind(config_snapshot.map(|c| c.to_string()))
            .execute(&pool)
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn complete_pipeline_run(
        &self,
        id: &str,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<(), PipelineError> {
        if !status.is_terminal() {
            return Err(PipelineError::validation(format!(
                "cannot complete run '{}' with non-terminal status '{}'",
                id, status
            )));
        }
        let pool = self.pool().await?;
        // The status guard keeps terminal runs immutable.
        let result = sqlx::query(
            "UPDATE pipeline_runs SET status = ?, completed_at = ?, error_message = ? \
             WHERE id = ? AND status = 'running'",
        )
        .bind(status.as_str())
        .bind(to_rfc3339(&Utc::now()))
        .bind(error_message)
        .bind(id)
        .execute(&pool)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            debug!(run_id = id, "complete_pipeline_run ignored: run missing or already terminal");
        }
        Ok(())
    }

    async fn update_pipeline_run_counts(
        &self,
        id: &str,
        delta_total: i64,
        delta_successful: i64,
        delta_failed: i64,
        delta_skipped: i64,
    ) -> Result<(), PipelineError> {
        let pool = self.pool().await?;
        sqlx::query(
            "UPDATE pipeline_runs SET \
                total_records = total_records + ?, \
                successful_records = successful_records + ?, \
                failed_records = failed_records + ?, \
                skipped_records = skipped_records + ? \
             WHERE id = ? AND status = 'running'",
        )
        .bind(delta_total)
        .bind(delta_successful)
        .bind(delta_failed)
        .bind(delta_skipped)
        .bind(id)
        .execute(&pool)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn get_pipeline_run(&self, id: &str) -> Result<Option<PipelineRunSummary>, PipelineError> {
        let pool = self.pool().await?;
        let row = sqlx::query("SELECT * FROM pipeline_runs WHERE id = ?")
            .bind(id)
            .fetch_optional(&pool)
            .await
            .map_err(query_err)?;
        row.as_ref().map(row_to_run_summary).transpose()
    }

    async fn get_recent_pipeline_runs(&self, limit: i64) -> Result<Vec<PipelineRunSummary>, PipelineError> {
        let pool = self.pool().await?;
        let rows = sqlx::query("SELECT * FROM pipeline_runs ORDER BY started_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&pool)
            .await
            .map_err(query_err)?;
        rows.iter().map(row_to_run_summary).collect()
    }

    async fn record_ingestion_stat(&self, stat: &IngestionStat) -> Result<i64, PipelineError> {
        let pool = self.pool().await?;
        let sql = format!(
            "INSERT INTO ingestion_stats \
             (pipeline_run_id, stage_name, file_path, record_id, record_type, status, \
              error_category, error_message, error_details, processing_time_ms, \
              record_size_bytes, data_source, timestamp) VALUES ({})",
            self.dialect.placeholder_list(1, 13)
        );
        let result = sqlx::query(&sql)
            .bind(&stat.pipeline_run_id)
            .bind(&stat.stage_name)
            .bind(&stat.file_path)
            .bind(&stat.record_id)
            .bind(&stat.record_type)
            .bind(stat.status.as_str())
            .bind(stat.error_category.map(|c| c.as_str()))
            .bind(&stat.error_message)
            .bind(stat.error_details.as_ref().map(|d| d.to_string()))
            .bind(stat.processing_time_ms)
            .bind(stat.record_size_bytes)
            .bind(&stat.data_source)
            .bind(to_rfc3339(&stat.timestamp))
            .execute(&pool)
            .await
            .map_err(query_err)?;
        Ok(result.last_insert_rowid())
    }

    async fn record_failed_record(
        &self,
        ingestion_stat_id: i64,
        original_data: &str,
        failure_reason: &str,
        normalized_data: Option<&str>,
        stack_trace: Option<&str>,
    ) -> Result<i64, PipelineError> {
        let pool = self.pool().await?;
        let result = sqlx::query(
            "INSERT INTO failed_records \
             (ingestion_stat_id, original_data, normalized_data, failure_reason, stack_trace, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(ingestion_stat_id)
        .bind(original_data)
        .bind(normalized_data)
        .bind(failure_reason)
        .bind(stack_trace)
        .bind(to_rfc3339(&Utc::now()))
        .execute(&pool)
        .await
        .map_err(query_err)?;
        Ok(result.last_insert_rowid())
    }

    async fn record_quality_metric(&self, metric: &QualityMetric) -> Result<i64, PipelineError> {
        let pool = self.pool().await?;
        let sql = format!(
            "INSERT INTO quality_metrics \
             (pipeline_run_id, record_id, record_type, completeness_score, consistency_score, \
              validity_score, accuracy_score, outlier_score, data_usage_score, overall_score, \
              missing_fields, invalid_fields, outlier_fields, unused_fields, issues, sampled, timestamp) \
             VALUES ({})",
            self.dialect.placeholder_list(1, 17)
        );
        let issues = serde_json::to_string(&metric.issues).unwrap_or_else(|_| "[]".to_string());
        let result = sqlx::query(&sql)
            .bind(&metric.pipeline_run_id)
            .bind(&metric.record_id)
            .bind(&metric.record_type)
            .bind(metric.completeness_score)
            .bind(metric.consistency_score)
            .bind(metric.validity_score)
            .bind(metric.accuracy_score)
            .bind(metric.outlier_score)
            .bind(metric.data_usage_score)
            .bind(metric.overall_score)
            .bind(json_list(&metric.missing_fields))
            .bind(json_list(&metric.invalid_fields))
            .bind(json_list(&metric.outlier_fields))
            .bind(json_list(&metric.unused_fields))
            .bind(issues)
            .bind(metric.sampled)
            .bind(to_rfc3339(&metric.timestamp))
            .execute(&pool)
            .await
            .map_err(query_err)?;
        Ok(result.last_insert_rowid())
    }

    async fn record_audit_event(&self, event: &AuditEvent) -> Result<i64, PipelineError> {
        let pool = self.pool().await?;
        let result = sqlx::query(
            "INSERT INTO audit_events \
             (pipeline_run_id, event_type, stage_name, message, level, record_id, details, correlation_id, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.pipeline_run_id)
        .bind(event.event_type.as_str())
        .bind(&event.stage_name)
        .bind(&event.message)
        .bind(event.level.as_str())
        .bind(&event.record_id)
        .bind(event.details.as_ref().map(|d| d.to_string()))
        .bind(&event.correlation_id)
        .bind(to_rfc3339(&event.timestamp))
        .execute(&pool)
        .await
        .map_err(query_err)?;
        Ok(result.last_insert_rowid())
    }

    async fn record_performance_metric(&self, metric: &PerformanceMetric) -> Result<i64, PipelineError> {
        let pool = self.pool().await?;
        let result = sqlx::query(
            "INSERT INTO performance_metrics \
             (pipeline_run_id, stage_name, started_at, completed_at, duration_ms, records_processed, \
              records_per_second, memory_usage_mb, cpu_usage_percent, bottleneck_indicator, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&metric.pipeline_run_id)
        .bind(&metric.stage_name)
        .bind(to_rfc3339(&metric.started_at))
        .bind(metric.completed_at.as_ref().map(to_rfc3339))
        .bind(metric.duration_ms)
        .bind(metric.records_processed)
        .bind(metric.records_per_second)
        .bind(metric.memory_usage_mb)
        .bind(metric.cpu_usage_percent)
        .bind(&metric.bottleneck_indicator)
        .bind(to_rfc3339(&metric.started_at))
        .execute(&pool)
        .await
        .map_err(query_err)?;
        Ok(result.last_insert_rowid())
    }

    async fn record_system_metric(&self, metric: &SystemMetric) -> Result<i64, PipelineError> {
        let pool = self.pool().await?;
        let additional = serde_json::to_string(&metric.additional_info).unwrap_or_else(|_| "{}".to_string());
        let result = sqlx::query(
            "INSERT INTO system_metrics \
             (pipeline_run_id, hostname, os_name, os_version, runtime_version, cpu_model, cpu_cores, \
              memory_total_gb, gpu_available, gpu_model, additional_info, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&metric.pipeline_run_id)
        .bind(&metric.hostname)
        .bind(&metric.os_name)
        .bind(&metric.os_version)
        .bind(&metric.runtime_version)
        .bind(&metric.cpu_model)
        .bind(metric.cpu_cores)
        .bind(metric.memory_total_gb)
        .bind(metric.gpu_available)
        .bind(&metric.gpu_model)
        .bind(additional)
        .bind(to_rfc3339(&metric.timestamp))
        .execute(&pool)
        .await
        .map_err(query_err)?;
        Ok(result.last_insert_rowid())
    }

    async fn get_ingestion_summary(
        &self,
        pipeline_run_id: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<IngestionSummary, PipelineError> {
        let pool = self.pool().await?;

        let mut clauses: Vec<String> = Vec::new();
        let mut binds: Vec<String> = Vec::new();
        let mut index = 1usize;
        if let Some(run_id) = pipeline_run_id {
            clauses.push(format!("pipeline_run_id = {}", self.dialect.placeholder(index)));
            binds.push(run_id.to_string());
            index += 1;
        }
        if let Some(start) = start {
            clauses.push(format!("timestamp >= {}", self.dialect.placeholder(index)));
            binds.push(to_rfc3339(&start));
            index += 1;
        }
        if let Some(end) = end {
            clauses.push(format!("timestamp <= {}", self.dialect.placeholder(index)));
            binds.push(to_rfc3339(&end));
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let sql = format!(
            "SELECT \
                COUNT(*) AS total, \
                COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0) AS successful, \
                COALESCE(SUM(CASE WHEN status = 'failure' THEN 1 ELSE 0 END), 0) AS failed, \
                COALESCE(SUM(CASE WHEN status = 'skipped' THEN 1 ELSE 0 END), 0) AS skipped, \
                COALESCE(AVG(processing_time_ms), 0.0) AS avg_time, \
                COALESCE(SUM(record_size_bytes), 0) AS total_bytes \
             FROM ingestion_stats{}",
            where_clause
        );
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let row = query.fetch_one(&pool).await.map_err(query_err)?;

        let mut summary = IngestionSummary {
            total: row.try_get("total").map_err(query_err)?,
            successful: row.try_get("successful").map_err(query_err)?,
            failed: row.try_get("failed").map_err(query_err)?,
            skipped: row.try_get("skipped").map_err(query_err)?,
            error_breakdown: Default::default(),
            avg_processing_time_ms: row.try_get("avg_time").map_err(query_err)?,
            total_bytes_processed: row.try_get("total_bytes").map_err(query_err)?,
        };

        let breakdown_sql = format!(
            "SELECT error_category, COUNT(*) AS count FROM ingestion_stats{} {} error_category IS NOT NULL \
             GROUP BY error_category",
            where_clause,
            if where_clause.is_empty() { "WHERE" } else { "AND" },
        );
        let mut breakdown_query = sqlx::query(&breakdown_sql);
        for bind in &binds {
            breakdown_query = breakdown_query.bind(bind);
        }
        for row in breakdown_query.fetch_all(&pool).await.map_err(query_err)? {
            let category: String = row.try_get("error_category").map_err(query_err)?;
            let count: i64 = row.try_get("count").map_err(query_err)?;
            summary.error_breakdown.insert(category, count);
        }

        Ok(summary)
    }

    async fn get_quality_summary(&self, pipeline_run_id: Option<&str>) -> Result<QualitySummary, PipelineError> {
        let pool = self.pool().await?;
        let where_clause = if pipeline_run_id.is_some() {
            " WHERE pipeline_run_id = ?"
        } else {
            ""
        };
        let sql = format!(
            "SELECT \
                COUNT(*) AS total, \
                COALESCE(AVG(completeness_score), 0.0) AS avg_completeness, \
                COALESCE(AVG(consistency_score), 0.0) AS avg_consistency, \
                COALESCE(AVG(validity_score), 0.0) AS avg_validity, \
                COALESCE(AVG(accuracy_score), 0.0) AS avg_accuracy, \
                COALESCE(AVG(overall_score), 0.0) AS avg_overall, \
                COALESCE(MIN(overall_score), 0.0) AS min_overall, \
                COALESCE(MAX(overall_score), 0.0) AS max_overall \
             FROM quality_metrics{}",
            where_clause
        );
        let mut query = sqlx::query(&sql);
        if let Some(run_id) = pipeline_run_id {
            query = query.bind(run_id);
        }
        let row = query.fetch_one(&pool).await.map_err(query_err)?;
        Ok(QualitySummary {
            total: row.try_get("total").map_err(query_err)?,
            avg_completeness: row.try_get("avg_completeness").map_err(query_err)?,
            avg_consistency: row.try_get("avg_consistency").map_err(query_err)?,
            avg_validity: row.try_get("avg_validity").map_err(query_err)?,
            avg_accuracy: row.try_get("avg_accuracy").map_err(query_err)?,
            avg_overall: row.try_get("avg_overall").map_err(query_err)?,
            min_overall: row.try_get("min_overall").map_err(query_err)?,
            max_overall: row.try_get("max_overall").map_err(query_err)?,
        })
    }

    async fn cleanup_old_data(&self, days_to_keep: i64) -> Result<u64, PipelineError> {
        let cutoff = to_rfc3339(&(Utc::now() - ChronoDuration::days(days_to_keep)));
        let mut txn = self.transaction().await?;
        let mut deleted = 0u64;

        // Children before parents; the cascade keys would also cover this,
        // but explicit child deletes keep the count accurate.
        let child_statements = [
            "DELETE FROM failed_records WHERE ingestion_stat_id IN \
             (SELECT id FROM ingestion_stats WHERE timestamp < ?)",
            "DELETE FROM ingestion_stats WHERE timestamp < ?",
            "DELETE FROM quality_metrics WHERE timestamp < ?",
            "DELETE FROM audit_events WHERE timestamp < ?",
            "DELETE FROM performance_metrics WHERE timestamp < ?",
            "DELETE FROM system_metrics WHERE timestamp < ?",
            "DELETE FROM pipeline_runs WHERE started_at < ? AND status != 'running'",
        ];
        for statement in child_statements {
            let result = sqlx::query(statement)
                .bind(&cutoff)
                .execute(&mut **txn.as_mut())
                .await
                .map_err(query_err)?;
            deleted += result.rows_affected();
        }

        txn.commit().await?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinipipe_domain::entities::{AuditEventType, AuditLevel, ProcessingStatus};
    use clinipipe_domain::error::ErrorCategory;

    async fn provider() -> SqliteProvider {
        SqliteProvider::open(":memory:").await.unwrap()
    }

    fn sample_stat(run_id: &str, status: ProcessingStatus) -> IngestionStat {
        let mut stat = IngestionStat::with_status(run_id, "ingestion", status);
        stat.record_size_bytes = Some(256);
        stat.processing_time_ms = Some(10);
        stat
    }

    #[tokio::test]
    async fn test_connect_and_health_check() {
        let provider = provider().await;
        assert!(provider.health_check().await);
        provider.disconnect().await.unwrap();
        assert!(!provider.health_check().await);
    }

    #[tokio::test]
    async fn test_initialize_schema_is_idempotent() {
        let provider = provider().await;
        provider.initialize_schema().await.unwrap();
        provider.initialize_schema().await.unwrap();
        assert!(provider.health_check().await);
    }

    #[tokio::test]
    async fn test_pipeline_run_round_trip() {
        let provider = provider().await;
        let config = serde_json::json!({"profile": "test", "concurrent": true});
        provider.start_pipeline_run("run-1", "nightly", Some(&config)).await.unwrap();

        let run = provider.get_pipeline_run("run-1").await.unwrap().unwrap();
        assert_eq!(run.id, "run-1");
        assert_eq!(run.name, "nightly");
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.total_records, 0);
        assert!(run.completed_at.is_none());
        assert_eq!(run.config_snapshot.unwrap()["profile"], "test");
    }

    #[tokio::test]
    async fn test_counts_are_additive() {
        let provider = provider().await;
        provider.start_pipeline_run("run-1", "nightly", None).await.unwrap();
        provider.update_pipeline_run_counts("run-1", 100, 95, 3, 2).await.unwrap();
        provider.update_pipeline_run_counts("run-1", 10, 10, 0, 0).await.unwrap();

        let run = provider.get_pipeline_run("run-1").await.unwrap().unwrap();
        assert_eq!(run.total_records, 110);
        assert_eq!(run.successful_records, 105);
        assert_eq!(run.failed_records, 3);
        assert_eq!(run.skipped_records, 2);
        assert!(run.counters_consistent());
    }

    #[tokio::test]
    async fn test_terminal_status_is_monotonic() {
        let provider = provider().await;
        provider.start_pipeline_run("run-1", "nightly", None).await.unwrap();
        provider
            .complete_pipeline_run("run-1", RunStatus::Completed, None)
            .await
            .unwrap();

        // Neither a second completion nor a counter update may mutate it.
        provider
            .complete_pipeline_run("run-1", RunStatus::Failed, Some("late error"))
            .await
            .unwrap();
        provider.update_pipeline_run_counts("run-1", 5, 5, 0, 0).await.unwrap();

        let run = provider.get_pipeline_run("run-1").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.error_message.is_none());
        assert_eq!(run.total_records, 0);
    }

    #[tokio::test]
    async fn test_recent_runs_ordering() {
        let provider = provider().await;
        provider.start_pipeline_run("run-a", "first", None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        provider.start_pipeline_run("run-b", "second", None).await.unwrap();

        let runs = provider.get_recent_pipeline_runs(10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, "run-b");
        assert_eq!(runs[1].id, "run-a");
    }

    #[tokio::test]
    async fn test_ingestion_stat_and_failed_record() {
        let provider = provider().await;
        provider.start_pipeline_run("run-1", "nightly", None).await.unwrap();

        let mut stat = sample_stat("run-1", ProcessingStatus::Failure);
        stat.error_category = Some(ErrorCategory::ParseError);
        stat.error_message = Some("JSON parse error at byte 12".into());
        let stat_id = provider.record_ingestion_stat(&stat).await.unwrap();
        assert!(stat_id > 0);

        let failed_id = provider
            .record_failed_record(stat_id, "{\"incomplete", "JSON parse error at byte 12", None, None)
            .await
            .unwrap();
        assert!(failed_id > 0);
    }

    #[tokio::test]
    async fn test_ingestion_summary_totals_and_breakdown() {
        let provider = provider().await;
        provider.start_pipeline_run("run-1", "nightly", None).await.unwrap();

        provider
            .record_ingestion_stat(&sample_stat("run-1", ProcessingStatus::Success))
            .await
            .unwrap();
        provider
            .record_ingestion_stat(&sample_stat("run-1", ProcessingStatus::Success))
            .await
            .unwrap();
        let mut failure = sample_stat("run-1", ProcessingStatus::Failure);
        failure.error_category = Some(ErrorCategory::ParseError);
        provider.record_ingestion_stat(&failure).await.unwrap();

        let summary = provider.get_ingestion_summary(Some("run-1"), None, None).await.unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total_bytes_processed, 768);
        assert_eq!(summary.error_breakdown.get("parse_error"), Some(&1));
    }

    #[tokio::test]
    async fn test_quality_metric_round_trip() {
        let provider = provider().await;
        provider.start_pipeline_run("run-1", "nightly", None).await.unwrap();

        let mut metric = QualityMetric::placeholder("run-1", Some("rec-1".into()));
        metric.sampled = true;
        metric.completeness_score = 0.8;
        metric.overall_score = 0.75;
        metric.missing_fields = vec!["birth_date".into()];
        provider.record_quality_metric(&metric).await.unwrap();

        let summary = provider.get_quality_summary(Some("run-1")).await.unwrap();
        assert_eq!(summary.total, 1);
        assert!((summary.avg_overall - 0.75).abs() < 1e-9);
        assert!((summary.max_overall - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_audit_and_metrics_writes() {
        let provider = provider().await;
        provider.start_pipeline_run("run-1", "nightly", None).await.unwrap();

        let event = AuditEvent::new(
            "run-1",
            AuditEventType::PipelineStarted,
            "pipeline",
            "started",
            AuditLevel::Info,
        );
        assert!(provider.record_audit_event(&event).await.unwrap() > 0);

        let mut perf = PerformanceMetric::started("run-1", "chunking");
        perf.finish(42);
        assert!(provider.record_performance_metric(&perf).await.unwrap() > 0);

        let system = SystemMetric::unavailable("run-1");
        assert!(provider.record_system_metric(&system).await.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_nested_transactions_rejected() {
        let provider = provider().await;
        let _outer = provider.transaction().await.unwrap();
        let nested = provider.transaction().await;
        assert!(matches!(
            nested,
            Err(PipelineError::Database(DatabaseError::Transaction(_)))
        ));
    }

    #[tokio::test]
    async fn test_transaction_flag_released_after_drop() {
        let provider = provider().await;
        {
            let _txn = provider.transaction().await.unwrap();
        }
        // Dropped uncommitted: the slot is free again.
        let again = provider.transaction().await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_removes_nothing_for_fresh_data() {
        let provider = provider().await;
        provider.start_pipeline_run("run-1", "nightly", None).await.unwrap();
        provider
            .record_ingestion_stat(&sample_stat("run-1", ProcessingStatus::Success))
            .await
            .unwrap();

        let deleted = provider.cleanup_old_data(30).await.unwrap();
        assert_eq!(deleted, 0);

        let summary = provider.get_ingestion_summary(None, None, None).await.unwrap();
        assert_eq!(summary.total, 1);
    }

    #[tokio::test]
    async fn test_feature_probes() {
        let provider = provider().await;
        assert!(provider.supports_feature(features::TRANSACTIONS));
        assert!(provider.supports_feature(features::JSON_EXTRACT));
        assert!(!provider.supports_feature(features::FULL_TEXT_SEARCH));
    }
}
