// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Document Persistence Provider
//!
//! Document implementation of the persistence provider contract. The
//! provider's dialect emits [`OperationDocument`]s — `{collection,
//! operation, filter, update, pipeline, limit, skip, sort}` — and hands
//! them to a [`DocumentExecutor`]. A network document database client is an
//! external collaborator behind that port; the bundled executor is an
//! embedded JSON document store on SQLite (one table per collection,
//! `json_extract` equality fast path, expression indexes).
//!
//! Rows returned by an executor always carry their document id under
//! `_id`, converted to a string before leaving the executor.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use clinipipe_domain::entities::{
    AuditEvent, IngestionStat, IngestionSummary, PerformanceMetric, PipelineRunSummary, QualityMetric,
    QualitySummary, RunStatus, SystemMetric,
};
use clinipipe_domain::repositories::{features, PersistenceProvider, QueryResult};
use clinipipe_domain::{DatabaseError, PipelineError};

/// Operations a document executor must support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocOperation {
    InsertOne,
    FindOne,
    Find,
    UpdateOne,
    DeleteMany,
    Aggregate,
}

/// One engine-agnostic document operation.
#[derive(Debug, Clone)]
pub struct OperationDocument {
    pub collection: String,
    pub operation: DocOperation,
    pub filter: Option<Value>,
    pub update: Option<Value>,
    pub pipeline: Option<Vec<Value>>,
    pub limit: Option<i64>,
    pub skip: Option<i64>,
    /// (field, direction) pairs; direction 1 ascending, -1 descending.
    pub sort: Option<Vec<(String, i32)>>,
    /// Document body for inserts.
    pub document: Option<Value>,
}

impl OperationDocument {
    pub fn new(collection: impl Into<String>, operation: DocOperation) -> Self {
        Self {
            collection: collection.into(),
            operation,
            filter: None,
            update: None,
            pipeline: None,
            limit: None,
            skip: None,
            sort: None,
            document: None,
        }
    }

    pub fn insert_one(collection: impl Into<String>, document: Value) -> Self {
        let mut op = Self::new(collection, DocOperation::InsertOne);
        op.document = Some(document);
        op
    }

    pub fn with_filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_update(mut self, update: Value) -> Self {
        self.update = Some(update);
        self
    }

    pub fn with_pipeline(mut self, pipeline: Vec<Value>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, direction: i32) -> Self {
        self.sort.get_or_insert_with(Vec::new).push((field.into(), direction));
        self
    }
}

/// Executes operation documents against a concrete document store.
#[async_trait]
pub trait DocumentExecutor: Send + Sync + std::fmt::Debug {
    async fn connect(&self) -> Result<(), PipelineError>;
    async fn disconnect(&self) -> Result<(), PipelineError>;
    async fn ping(&self) -> Result<(), PipelineError>;

    /// Creates the collection and its indexes. Idempotent.
    async fn ensure_collection(&self, collection: &str, indexed_fields: &[&str]) -> Result<(), PipelineError>;

    async fn execute(&self, op: &OperationDocument) -> Result<QueryResult, PipelineError>;
}

// ---------------------------------------------------------------------------
// Embedded executor (SQLite JSON1)
// ---------------------------------------------------------------------------

/// Embedded document executor: one `(id, doc)` table per collection with
/// expression indexes over `json_extract`.
#[derive(Debug)]
pub struct SqliteDocumentExecutor {
    db_path: String,
    pool: RwLock<Option<SqlitePool>>,
}

impl SqliteDocumentExecutor {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            pool: RwLock::new(None),
        }
    }

    async fn pool(&self) -> Result<SqlitePool, PipelineError> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| DatabaseError::Connection("document executor is not connected".to_string()).into())
    }

    fn table_name(collection: &str) -> Result<String, PipelineError> {
        let valid = !collection.is_empty()
            && collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !collection.chars().next().unwrap().is_ascii_digit();
        if !valid {
            return Err(DatabaseError::Query(format!("invalid collection name '{}'", collection)).into());
        }
        Ok(format!("docs_{}", collection))
    }

    /// Loads `(rowid, doc)` pairs, pushing pure-equality filters down into
    /// SQL via `json_extract`; operator filters are evaluated in memory.
    async fn load_matching(&self, op: &OperationDocument) -> Result<Vec<(i64, Map<String, Value>)>, PipelineError> {
        let pool = self.pool().await?;
        let table = Self::table_name(&op.collection)?;

        let filter = op.filter.as_ref().and_then(Value::as_object);
        let mut where_parts: Vec<String> = Vec::new();
        let mut binds: Vec<Value> = Vec::new();
        if let Some(filter) = filter {
            for (field, expected) in filter {
                match expected {
                    Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                        where_parts.push(format!("json_extract(doc, '$.{}') = ?", field));
                        binds.push(expected.clone());
                    }
                    // Operator objects and nulls fall through to the
                    // in-memory predicate.
                    _ => {}
                }
            }
        }

        let mut sql = format!("SELECT id, doc FROM {}", table);
        if !where_parts.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_parts.join(" AND "));
        }
        sql.push_str(" ORDER BY id");

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = match bind {
                Value::String(s) => query.bind(s.clone()),
                Value::Number(n) if n.is_i64() => query.bind(n.as_i64().unwrap()),
                Value::Number(n) => query.bind(n.as_f64().unwrap_or(0.0)),
                Value::Bool(b) => query.bind(*b),
                _ => query,
            };
        }

        let rows = query
            .fetch_all(&pool)
            .await
            .map_err(|e| PipelineError::from(DatabaseError::Query(e.to_string())))?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row
                .try_get("id")
                .map_err(|e| PipelineError::from(DatabaseError::Query(e.to_string())))?;
            let raw: String = row
                .try_get("doc")
                .map_err(|e| PipelineError::from(DatabaseError::Query(e.to_string())))?;
            let doc: Map<String, Value> = serde_json::from_str(&raw)
                .map_err(|e| PipelineError::from(DatabaseError::Query(format!("corrupt document: {}", e))))?;
            if matches_filter(&doc, op.filter.as_ref()) {
                documents.push((id, doc));
            }
        }
        Ok(documents)
    }
}

/// Evaluates a filter document against one stored document.
///
/// Supported shapes: `{field: scalar}` equality, `{field: null}`,
/// and operator objects `{field: {"$lt"|"$lte"|"$gt"|"$gte"|"$ne"|"$in": v}}`.
fn matches_filter(doc: &Map<String, Value>, filter: Option<&Value>) -> bool {
    let Some(Value::Object(filter)) = filter else {
        return true;
    };
    for (field, expected) in filter {
        let actual = doc.get(field).unwrap_or(&Value::Null);
        let matched = match expected {
            Value::Object(ops) => ops.iter().all(|(operator, operand)| match operator.as_str() {
                "$lt" => compare_values(actual, operand) == Some(std::cmp::Ordering::Less),
                "$lte" => matches!(
                    compare_values(actual, operand),
                    Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
                ),
                "$gt" => compare_values(actual, operand) == Some(std::cmp::Ordering::Greater),
                "$gte" => matches!(
                    compare_values(actual, operand),
                    Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
                ),
                "$ne" => actual != operand,
                "$in" => operand.as_array().is_some_and(|candidates| candidates.contains(actual)),
                _ => false,
            }),
            expected => actual == expected,
        };
        if !matched {
            return false;
        }
    }
    true
}

fn compare_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64().partial_cmp(&y.as_f64()),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn numeric(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Applies `$set` / `$inc` update operators to a document.
fn apply_update(doc: &mut Map<String, Value>, update: &Value) -> Result<(), PipelineError> {
    let Some(update) = update.as_object() else {
        return Err(DatabaseError::Query("update must be a document".to_string()).into());
    };
    for (operator, fields) in update {
        let Some(fields) = fields.as_object() else {
            return Err(DatabaseError::Query(format!("malformed update operator '{}'", operator)).into());
        };
        match operator.as_str() {
            "$set" => {
                for (field, value) in fields {
                    doc.insert(field.clone(), value.clone());
                }
            }
            "$inc" => {
                for (field, delta) in fields {
                    let current = doc.get(field).and_then(numeric).unwrap_or(0.0);
                    let delta = numeric(delta).unwrap_or(0.0);
                    let next = current + delta;
                    // Preserve integer representation where possible.
                    let next_value = if next.fract() == 0.0 {
                        json!(next as i64)
                    } else {
                        json!(next)
                    };
                    doc.insert(field.clone(), next_value);
                }
            }
            other => {
                return Err(DatabaseError::Query(format!("unsupported update operator '{}'", other)).into());
            }
        }
    }
    Ok(())
}

/// Computes one `$group` stage over the matched documents.
fn run_group_stage(
    documents: &[(i64, Map<String, Value>)],
    group_spec: &Map<String, Value>,
) -> Result<Vec<Map<String, Value>>, PipelineError> {
    let group_key = group_spec
        .get("_id")
        .cloned()
        .unwrap_or(Value::Null);

    // Bucket documents by the group key.
    let mut buckets: Vec<(Value, Vec<&Map<String, Value>>)> = Vec::new();
    for (_, doc) in documents {
        let key = match &group_key {
            Value::String(path) if path.starts_with('$') => doc.get(&path[1..]).cloned().unwrap_or(Value::Null),
            other => other.clone(),
        };
        match buckets.iter_mut().find(|(k, _)| *k == key) {
            Some((_, bucket)) => bucket.push(doc),
            None => buckets.push((key, vec![doc])),
        }
    }

    let mut results = Vec::with_capacity(buckets.len());
    for (key, bucket) in buckets {
        let mut row = Map::new();
        row.insert("_id".to_string(), key);
        for (output, accumulator) in group_spec {
            if output == "_id" {
                continue;
            }
            let Some(accumulator) = accumulator.as_object() else {
                return Err(DatabaseError::Query(format!("malformed accumulator for '{}'", output)).into());
            };
            let Some((operator, operand)) = accumulator.iter().next() else {
                continue;
            };
            let values: Vec<f64> = match operand {
                Value::String(path) if path.starts_with('$') => bucket
                    .iter()
                    .filter_map(|doc| doc.get(&path[1..]).and_then(numeric))
                    .collect(),
                constant => {
                    let c = numeric(constant).unwrap_or(0.0);
                    bucket.iter().map(|_| c).collect()
                }
            };
            let value = match operator.as_str() {
                "$sum" => json!(values.iter().sum::<f64>()),
                "$avg" => {
                    if values.is_empty() {
                        json!(0.0)
                    } else {
                        json!(values.iter().sum::<f64>() / values.len() as f64)
                    }
                }
                "$min" => json!(values.iter().copied().fold(f64::INFINITY, f64::min)),
                "$max" => json!(values.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
                "$count" => json!(bucket.len() as i64),
                other => {
                    return Err(DatabaseError::Query(format!("unsupported accumulator '{}'", other)).into());
                }
            };
            row.insert(output.clone(), value);
        }
        results.push(row);
    }
    Ok(results)
}

#[async_trait]
impl DocumentExecutor for SqliteDocumentExecutor {
    async fn connect(&self) -> Result<(), PipelineError> {
        let mut guard = self.pool.write().await;
        if guard.is_some() {
            return Ok(());
        }
        let in_memory = self.db_path == ":memory:";
        let options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| DatabaseError::Connection(e.to_string()))?
        } else {
            SqliteConnectOptions::new().filename(&self.db_path).create_if_missing(true)
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        *guard = Some(pool);
        debug!(db_path = %self.db_path, "document executor connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PipelineError> {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), PipelineError> {
        let pool = self.pool().await?;
        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| PipelineError::from(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    async fn ensure_collection(&self, collection: &str, indexed_fields: &[&str]) -> Result<(), PipelineError> {
        let pool = self.pool().await?;
        let table = Self::table_name(collection)?;
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY AUTOINCREMENT, doc TEXT NOT NULL)",
            table
        );
        sqlx::query(&create)
            .execute(&pool)
            .await
            .map_err(|e| PipelineError::from(DatabaseError::Query(e.to_string())))?;
        for field in indexed_fields {
            let index = format!(
                "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {}(json_extract(doc, '$.{}'))",
                table, field, table, field
            );
            sqlx::query(&index)
                .execute(&pool)
                .await
                .map_err(|e| PipelineError::from(DatabaseError::Query(e.to_string())))?;
        }
        Ok(())
    }

    async fn execute(&self, op: &OperationDocument) -> Result<QueryResult, PipelineError> {
        let pool = self.pool().await?;
        let table = Self::table_name(&op.collection)?;

        match op.operation {
            DocOperation::InsertOne => {
                let document = op
                    .document
                    .as_ref()
                    .ok_or_else(|| PipelineError::from(DatabaseError::Query("insert_one requires a document".into())))?;
                let raw = document.to_string();
                let sql = format!("INSERT INTO {} (doc) VALUES (?)", table);
                let result = sqlx::query(&sql)
                    .bind(raw)
                    .execute(&pool)
                    .await
                    .map_err(|e| PipelineError::from(DatabaseError::Query(e.to_string())))?;
                Ok(QueryResult {
                    rows: Vec::new(),
                    last_row_id: Some(result.last_insert_rowid()),
                    row_count: result.rows_affected(),
                })
            }
            DocOperation::FindOne | DocOperation::Find => {
                let mut documents = self.load_matching(op).await?;
                if let Some(sort) = &op.sort {
                    documents.sort_by(|(_, a), (_, b)| {
                        for (field, direction) in sort {
                            let av = a.get(field).unwrap_or(&Value::Null);
                            let bv = b.get(field).unwrap_or(&Value::Null);
                            let ordering = compare_values(av, bv).unwrap_or(std::cmp::Ordering::Equal);
                            let ordering = if *direction < 0 { ordering.reverse() } else { ordering };
                            if ordering != std::cmp::Ordering::Equal {
                                return ordering;
                            }
                        }
                        std::cmp::Ordering::Equal
                    });
                }
                let skip = op.skip.unwrap_or(0).max(0) as usize;
                let limit = if op.operation == DocOperation::FindOne {
                    1
                } else {
                    op.limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX)
                };
                let rows: Vec<Map<String, Value>> = documents
                    .into_iter()
                    .skip(skip)
                    .take(limit)
                    .map(|(id, mut doc)| {
                        // Ids leave the executor as strings.
                        doc.insert("_id".to_string(), Value::String(id.to_string()));
                        doc
                    })
                    .collect();
                let row_count = rows.len() as u64;
                Ok(QueryResult {
                    rows,
                    last_row_id: None,
                    row_count,
                })
            }
            DocOperation::UpdateOne => {
                let update = op
                    .update
                    .as_ref()
                    .ok_or_else(|| PipelineError::from(DatabaseError::Query("update_one requires an update".into())))?;
                let documents = self.load_matching(op).await?;
                let Some((id, mut doc)) = documents.into_iter().next() else {
                    return Ok(QueryResult::default());
                };
                apply_update(&mut doc, update)?;
                let sql = format!("UPDATE {} SET doc = ? WHERE id = ?", table);
                let result = sqlx::query(&sql)
                    .bind(Value::Object(doc).to_string())
                    .bind(id)
                    .execute(&pool)
                    .await
                    .map_err(|e| PipelineError::from(DatabaseError::Query(e.to_string())))?;
                Ok(QueryResult {
                    rows: Vec::new(),
                    last_row_id: Some(id),
                    row_count: result.rows_affected(),
                })
            }
            DocOperation::DeleteMany => {
                let documents = self.load_matching(op).await?;
                if documents.is_empty() {
                    return Ok(QueryResult::default());
                }
                let ids: Vec<String> = documents.iter().map(|(id, _)| id.to_string()).collect();
                let sql = format!("DELETE FROM {} WHERE id IN ({})", table, ids.join(", "));
                let result = sqlx::query(&sql)
                    .execute(&pool)
                    .await
                    .map_err(|e| PipelineError::from(DatabaseError::Query(e.to_string())))?;
                Ok(QueryResult {
                    rows: Vec::new(),
                    last_row_id: None,
                    row_count: result.rows_affected(),
                })
            }
            DocOperation::Aggregate => {
                let pipeline = op
                    .pipeline
                    .as_ref()
                    .ok_or_else(|| PipelineError::from(DatabaseError::Query("aggregate requires a pipeline".into())))?;

                // $match (optional, first) then $group.
                let mut match_filter: Option<Value> = None;
                let mut group_spec: Option<Map<String, Value>> = None;
                for stage in pipeline {
                    let Some(stage) = stage.as_object() else {
                        return Err(DatabaseError::Query("malformed aggregation stage".to_string()).into());
                    };
                    if let Some(filter) = stage.get("$match") {
                        match_filter = Some(filter.clone());
                    } else if let Some(spec) = stage.get("$group").and_then(Value::as_object) {
                        group_spec = Some(spec.clone());
                    } else {
                        return Err(DatabaseError::Query("unsupported aggregation stage".to_string()).into());
                    }
                }

                let scan = OperationDocument {
                    filter: match_filter,
                    ..OperationDocument::new(op.collection.clone(), DocOperation::Find)
                };
                let documents = self.load_matching(&scan).await?;
                let group_spec = group_spec
                    .ok_or_else(|| PipelineError::from(DatabaseError::Query("aggregate requires a $group stage".into())))?;
                let rows = run_group_stage(&documents, &group_spec)?;
                let row_count = rows.len() as u64;
                Ok(QueryResult {
                    rows,
                    last_row_id: None,
                    row_count,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

const COLLECTIONS: &[(&str, &[&str])] = &[
    ("pipeline_runs", &["id", "started_at"]),
    ("ingestion_stats", &["pipeline_run_id", "timestamp"]),
    ("failed_records", &["ingestion_stat_id"]),
    ("quality_metrics", &["pipeline_run_id", "timestamp"]),
    ("audit_events", &["pipeline_run_id", "timestamp", "event_type", "level"]),
    ("performance_metrics", &["pipeline_run_id", "timestamp"]),
    ("system_metrics", &["pipeline_run_id", "timestamp"]),
];

/// Document persistence provider over a [`DocumentExecutor`].
#[derive(Debug)]
pub struct DocumentProvider {
    executor: Arc<dyn DocumentExecutor>,
}

impl DocumentProvider {
    pub fn new(executor: Arc<dyn DocumentExecutor>) -> Self {
        Self { executor }
    }

    /// Embedded document provider, connected and initialized.
    pub async fn open_embedded(db_path: impl Into<String>) -> Result<Self, PipelineError> {
        let provider = Self::new(Arc::new(SqliteDocumentExecutor::new(db_path)));
        provider.connect().await?;
        provider.initialize_schema().await?;
        Ok(provider)
    }

    fn to_doc<T: serde::Serialize>(value: &T) -> Result<Value, PipelineError> {
        serde_json::to_value(value).map_err(|e| DatabaseError::Query(format!("serialization failed: {}", e)).into())
    }

    async fn insert(&self, collection: &str, document: Value) -> Result<i64, PipelineError> {
        let result = self
            .executor
            .execute(&OperationDocument::insert_one(collection, document))
            .await?;
        result
            .last_row_id
            .ok_or_else(|| DatabaseError::Query("insert returned no id".to_string()).into())
    }
}

fn doc_to_run_summary(row: &Map<String, Value>) -> Result<PipelineRunSummary, PipelineError> {
    let mut doc = row.clone();
    doc.remove("_id");
    serde_json::from_value(Value::Object(doc))
        .map_err(|e| DatabaseError::Query(format!("corrupt pipeline run document: {}", e)).into())
}

#[async_trait]
impl PersistenceProvider for DocumentProvider {
    async fn connect(&self) -> Result<(), PipelineError> {
        self.executor.connect().await
    }

    async fn disconnect(&self) -> Result<(), PipelineError> {
        self.executor.disconnect().await
    }

    async fn health_check(&self) -> bool {
        for attempt in 0..2 {
            match self.executor.ping().await {
                Ok(()) => return true,
                Err(e) if attempt == 0 => warn!("document ping failed, retrying once: {}", e),
                Err(e) => warn!("document ping failed: {}", e),
            }
        }
        false
    }

    async fn initialize_schema(&self) -> Result<(), PipelineError> {
        for (collection, indexes) in COLLECTIONS {
            self.executor.ensure_collection(collection, indexes).await?;
        }
        Ok(())
    }

    fn supports_feature(&self, feature: &str) -> bool {
        // No multi-document transactions in the embedded tier.
        matches!(feature, features::JSON_EXTRACT)
    }

    async fn start_pipeline_run(
        &self,
        id: &str,
        name: &str,
        config_snapshot: Option<&Value>,
    ) -> Result<(), PipelineError> {
        let mut summary = PipelineRunSummary::started(id, name);
        summary.config_snapshot = config_snapshot.cloned();
        self.insert("pipeline_runs", Self::to_doc(&summary)?).await?;
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
        let op = OperationDocument::new("pipeline_runs", DocOperation::UpdateOne)
            .with_filter(json!({"id": id, "status": "running"}))
            .with_update(json!({
                "$set": {
                    "status": status.as_str(),
                    "completed_at": Utc::now().to_rfc3339(),
                    "error_message": error_message,
                }
            }));
        let result = self.executor.execute(&op).await?;
        if result.row_count == 0 {
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
        let op = OperationDocument::new("pipeline_runs", DocOperation::UpdateOne)
            .with_filter(json!({"id": id, "status": "running"}))
            .with_update(json!({
                "$inc": {
                    "total_records": delta_total,
                    "successful_records": delta_successful,
                    "failed_records": delta_failed,
                    "skipped_records": delta_skipped,
                }
            }));
        self.executor.execute(&op).await?;
        Ok(())
    }

    async fn get_pipeline_run(&self, id: &str) -> Result<Option<PipelineRunSummary>, PipelineError> {
        let op = OperationDocument::new("pipeline_runs", DocOperation::FindOne).with_filter(json!({"id": id}));
        let result = self.executor.execute(&op).await?;
        result.rows.first().map(doc_to_run_summary).transpose()
    }

    async fn get_recent_pipeline_runs(&self, limit: i64) -> Result<Vec<PipelineRunSummary>, PipelineError> {
        let op = OperationDocument::new("pipeline_runs", DocOperation::Find)
            .with_sort("started_at", -1)
            .with_limit(limit);
        let result = self.executor.execute(&op).await?;
        result.rows.iter().map(doc_to_run_summary).collect()
    }

    async fn record_ingestion_stat(&self, stat: &IngestionStat) -> Result<i64, PipelineError> {
        self.insert("ingestion_stats", Self::to_doc(stat)?).await
    }

    async fn record_failed_record(
        &self,
        ingestion_stat_id: i64,
        original_data: &str,
        failure_reason: &str,
        normalized_data: Option<&str>,
        stack_trace: Option<&str>,
    ) -> Result<i64, PipelineError> {
        let document = json!({
            "ingestion_stat_id": ingestion_stat_id,
            "original_data": original_data,
            "normalized_data": normalized_data,
            "failure_reason": failure_reason,
            "stack_trace": stack_trace,
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.insert("failed_records", document).await
    }

    async fn record_quality_metric(&self, metric: &QualityMetric) -> Result<i64, PipelineError> {
        self.insert("quality_metrics", Self::to_doc(metric)?).await
    }

    async fn record_audit_event(&self, event: &AuditEvent) -> Result<i64, PipelineError> {
        self.insert("audit_events", Self::to_doc(event)?).await
    }

    async fn record_performance_metric(&self, metric: &PerformanceMetric) -> Result<i64, PipelineError> {
        self.insert("performance_metrics", Self::to_doc(metric)?).await
    }

    async fn record_system_metric(&self, metric: &SystemMetric) -> Result<i64, PipelineError> {
        self.insert("system_metrics", Self::to_doc(metric)?).await
    }

    async fn get_ingestion_summary(
        &self,
        pipeline_run_id: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<IngestionSummary, PipelineError> {
        let mut match_filter = Map::new();
        if let Some(run_id) = pipeline_run_id {
            match_filter.insert("pipeline_run_id".to_string(), json!(run_id));
        }
        let mut ts_bounds = Map::new();
        if let Some(start) = start {
            ts_bounds.insert("$gte".to_string(), json!(start.to_rfc3339()));
        }
        if let Some(end) = end {
            ts_bounds.insert("$lte".to_string(), json!(end.to_rfc3339()));
        }
        if !ts_bounds.is_empty() {
            match_filter.insert("timestamp".to_string(), Value::Object(ts_bounds));
        }

        // Per-status counts plus run-wide time/byte totals.
        let by_status = OperationDocument::new("ingestion_stats", DocOperation::Aggregate).with_pipeline(vec![
            json!({"$match": match_filter.clone()}),
            json!({"$group": {
                "_id": "$status",
                "count": {"$sum": 1},
                "avg_time": {"$avg": "$processing_time_ms"},
                "bytes": {"$sum": "$record_size_bytes"},
            }}),
        ]);
        let result = self.executor.execute(&by_status).await?;

        let mut summary = IngestionSummary::default();
        let mut time_weighted = 0.0;
        for row in &result.rows {
            let status = row.get("_id").and_then(Value::as_str).unwrap_or("");
            let count = row.get("count").and_then(Value::as_f64).unwrap_or(0.0) as i64;
            summary.total += count;
            match status {
                "success" => summary.successful += count,
                "failure" => summary.failed += count,
                "skipped" => summary.skipped += count,
                _ => {}
            }
            summary.total_bytes_processed += row.get("bytes").and_then(Value::as_f64).unwrap_or(0.0) as i64;
            time_weighted += row.get("avg_time").and_then(Value::as_f64).unwrap_or(0.0) * count as f64;
        }
        if summary.total > 0 {
            summary.avg_processing_time_ms = time_weighted / summary.total as f64;
        }

        let mut breakdown_filter = match_filter;
        breakdown_filter.insert("error_category".to_string(), json!({"$ne": null}));
        let breakdown = OperationDocument::new("ingestion_stats", DocOperation::Aggregate).with_pipeline(vec![
            json!({"$match": breakdown_filter}),
            json!({"$group": {"_id": "$error_category", "count": {"$sum": 1}}}),
        ]);
        for row in &self.executor.execute(&breakdown).await?.rows {
            if let Some(category) = row.get("_id").and_then(Value::as_str) {
                let count = row.get("count").and_then(Value::as_f64).unwrap_or(0.0) as i64;
                summary.error_breakdown.insert(category.to_string(), count);
            }
        }

        Ok(summary)
    }

    async fn get_quality_summary(&self, pipeline_run_id: Option<&str>) -> Result<QualitySummary, PipelineError> {
        let mut match_filter = Map::new();
        if let Some(run_id) = pipeline_run_id {
            match_filter.insert("pipeline_run_id".to_string(), json!(run_id));
        }
        let op = OperationDocument::new("quality_metrics", DocOperation::Aggregate).with_pipeline(vec![
            json!({"$match": match_filter}),
            json!({"$group": {
                "_id": null,
                "total": {"$sum": 1},
                "avg_completeness": {"$avg": "$completeness_score"},
                "avg_consistency": {"$avg": "$consistency_score"},
                "avg_validity": {"$avg": "$validity_score"},
                "avg_accuracy": {"$avg": "$accuracy_score"},
                "avg_overall": {"$avg": "$overall_score"},
                "min_overall": {"$min": "$overall_score"},
                "max_overall": {"$max": "$overall_score"},
            }}),
        ]);
        let result = self.executor.execute(&op).await?;
        let Some(row) = result.rows.first() else {
            return Ok(QualitySummary::default());
        };
        let get = |name: &str| row.get(name).and_then(Value::as_f64).unwrap_or(0.0);
        let total = get("total") as i64;
        if total == 0 {
            return Ok(QualitySummary::default());
        }
        Ok(QualitySummary {
            total,
            avg_completeness: get("avg_completeness"),
            avg_consistency: get("avg_consistency"),
            avg_validity: get("avg_validity"),
            avg_accuracy: get("avg_accuracy"),
            avg_overall: get("avg_overall"),
            min_overall: get("min_overall"),
            max_overall: get("max_overall"),
        })
    }

    async fn cleanup_old_data(&self, days_to_keep: i64) -> Result<u64, PipelineError> {
        let cutoff = (Utc::now() - ChronoDuration::days(days_to_keep)).to_rfc3339();
        let mut deleted = 0u64;

        // Children before parents. Failed records key off their stats.
        let stats_scan = OperationDocument::new("ingestion_stats", DocOperation::Find)
            .with_filter(json!({"timestamp": {"$lt": cutoff}}));
        let old_stats = self.executor.execute(&stats_scan).await?;
        let stat_ids: Vec<Value> = old_stats
            .rows
            .iter()
            .filter_map(|row| row.get("_id").and_then(Value::as_str))
            .filter_map(|id| id.parse::<i64>().ok())
            .map(|id| json!(id))
            .collect();
        if !stat_ids.is_empty() {
            let op = OperationDocument::new("failed_records", DocOperation::DeleteMany)
                .with_filter(json!({"ingestion_stat_id": {"$in": stat_ids}}));
            deleted += self.executor.execute(&op).await?.row_count;
        }

        for collection in [
            "ingestion_stats",
            "quality_metrics",
            "audit_events",
            "performance_metrics",
            "system_metrics",
        ] {
            let op = OperationDocument::new(collection, DocOperation::DeleteMany)
                .with_filter(json!({"timestamp": {"$lt": cutoff}}));
            deleted += self.executor.execute(&op).await?.row_count;
        }

        let runs = OperationDocument::new("pipeline_runs", DocOperation::DeleteMany)
            .with_filter(json!({"started_at": {"$lt": cutoff}, "status": {"$ne": "running"}}));
        deleted += self.executor.execute(&runs).await?.row_count;

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinipipe_domain::entities::{IngestionStat, ProcessingStatus};
    use clinipipe_domain::error::ErrorCategory;

    async fn provider() -> DocumentProvider {
        DocumentProvider::open_embedded(":memory:").await.unwrap()
    }

    #[test]
    fn test_filter_equality_and_operators() {
        let doc: Map<String, Value> = serde_json::from_value(json!({
            "status": "running",
            "total": 5,
            "timestamp": "2025-01-02T00:00:00+00:00",
        }))
        .unwrap();

        assert!(matches_filter(&doc, Some(&json!({"status": "running"}))));
        assert!(!matches_filter(&doc, Some(&json!({"status": "completed"}))));
        assert!(matches_filter(&doc, Some(&json!({"total": {"$gte": 5}}))));
        assert!(matches_filter(&doc, Some(&json!({"timestamp": {"$lt": "2026-01-01T00:00:00+00:00"}}))));
        assert!(matches_filter(&doc, Some(&json!({"status": {"$ne": null}}))));
        assert!(matches_filter(&doc, Some(&json!({"total": {"$in": [1, 5]}}))));
        assert!(!matches_filter(&doc, Some(&json!({"total": {"$in": [2, 3]}}))));
    }

    #[test]
    fn test_apply_update_set_and_inc() {
        let mut doc: Map<String, Value> = serde_json::from_value(json!({"status": "running", "total": 2})).unwrap();
        apply_update(&mut doc, &json!({"$set": {"status": "completed"}, "$inc": {"total": 3}})).unwrap();
        assert_eq!(doc["status"], "completed");
        assert_eq!(doc["total"], json!(5));
    }

    #[tokio::test]
    async fn test_run_lifecycle_round_trip() {
        let provider = provider().await;
        provider
            .start_pipeline_run("run-1", "doc-run", Some(&json!({"profile": "test"})))
            .await
            .unwrap();

        let run = provider.get_pipeline_run("run-1").await.unwrap().unwrap();
        assert_eq!(run.name, "doc-run");
        assert_eq!(run.status, RunStatus::Running);

        provider.update_pipeline_run_counts("run-1", 4, 3, 1, 0).await.unwrap();
        provider
            .complete_pipeline_run("run-1", RunStatus::Completed, None)
            .await
            .unwrap();

        // Terminal status is monotonic: later mutations are ignored.
        provider.update_pipeline_run_counts("run-1", 10, 10, 0, 0).await.unwrap();
        provider
            .complete_pipeline_run("run-1", RunStatus::Failed, Some("late"))
            .await
            .unwrap();

        let run = provider.get_pipeline_run("run-1").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.total_records, 4);
        assert_eq!(run.successful_records, 3);
        assert!(run.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_recent_runs_sorted_descending() {
        let provider = provider().await;
        provider.start_pipeline_run("run-a", "first", None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        provider.start_pipeline_run("run-b", "second", None).await.unwrap();

        let runs = provider.get_recent_pipeline_runs(10).await.unwrap();
        assert_eq!(runs[0].id, "run-b");
        assert_eq!(runs[1].id, "run-a");
    }

    #[tokio::test]
    async fn test_ingestion_summary_aggregation() {
        let provider = provider().await;
        provider.start_pipeline_run("run-1", "doc-run", None).await.unwrap();

        for status in [ProcessingStatus::Success, ProcessingStatus::Success, ProcessingStatus::Failure] {
            let mut stat = IngestionStat::with_status("run-1", "ingestion", status);
            stat.record_size_bytes = Some(100);
            stat.processing_time_ms = Some(20);
            if status == ProcessingStatus::Failure {
                stat.error_category = Some(ErrorCategory::ParseError);
            }
            provider.record_ingestion_stat(&stat).await.unwrap();
        }

        let summary = provider.get_ingestion_summary(Some("run-1"), None, None).await.unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total_bytes_processed, 300);
        assert!((summary.avg_processing_time_ms - 20.0).abs() < 1e-9);
        assert_eq!(summary.error_breakdown.get("parse_error"), Some(&1));
    }

    #[tokio::test]
    async fn test_quality_summary_aggregation() {
        let provider = provider().await;
        provider.start_pipeline_run("run-1", "doc-run", None).await.unwrap();

        for overall in [0.5, 0.9] {
            let mut metric = QualityMetric::placeholder("run-1", None);
            metric.sampled = true;
            metric.overall_score = overall;
            metric.completeness_score = overall;
            provider.record_quality_metric(&metric).await.unwrap();
        }

        let summary = provider.get_quality_summary(Some("run-1")).await.unwrap();
        assert_eq!(summary.total, 2);
        assert!((summary.avg_overall - 0.7).abs() < 1e-9);
        assert!((summary.min_overall - 0.5).abs() < 1e-9);
        assert!((summary.max_overall - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_record_ids_are_strings_in_rows() {
        let provider = provider().await;
        provider.start_pipeline_run("run-1", "doc-run", None).await.unwrap();

        let stat = IngestionStat::failure("run-1", "ingestion");
        let stat_id = provider.record_ingestion_stat(&stat).await.unwrap();
        provider
            .record_failed_record(stat_id, "{\"incomplete", "JSON parse error", None, None)
            .await
            .unwrap();

        let scan = OperationDocument::new("failed_records", DocOperation::Find);
        let rows = provider.executor.execute(&scan).await.unwrap().rows;
        assert_eq!(rows.len(), 1);
        assert!(rows[0]["_id"].is_string());
    }

    #[tokio::test]
    async fn test_feature_probes() {
        let provider = provider().await;
        assert!(provider.supports_feature(features::JSON_EXTRACT));
        assert!(!provider.supports_feature(features::TRANSACTIONS));
    }

    #[tokio::test]
    async fn test_cleanup_keeps_fresh_documents() {
        let provider = provider().await;
        provider.start_pipeline_run("run-1", "doc-run", None).await.unwrap();
        let stat = IngestionStat::success("run-1", "ingestion");
        provider.record_ingestion_stat(&stat).await.unwrap();

        let deleted = provider.cleanup_old_data(30).await.unwrap();
        assert_eq!(deleted, 0);
        assert!(provider.get_pipeline_run("run-1").await.unwrap().is_some());
    }
}
