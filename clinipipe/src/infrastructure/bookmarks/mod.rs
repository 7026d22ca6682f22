// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Bookmark Stores
//!
//! Durable "processed" set used by the file watcher to deduplicate source
//! files across runs. Every path is normalized at this boundary before
//! lookup or insert; marking is insert-or-ignore, so re-marking an already
//! processed path is a no-op.
//!
//! The open-source tier ships the SQLite store (single-file mode,
//! `:memory:` for tests) and a document-store variant over the embedded
//! document executor. Other backends are tiered out through the factory.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use clinipipe_domain::repositories::BookmarkStore;
use clinipipe_domain::value_objects::normalize_path;
use clinipipe_domain::{DatabaseError, PipelineError};

use crate::infrastructure::persistence::{DocOperation, DocumentExecutor, OperationDocument};

/// File-backed bookmark table. One row per normalized path.
#[derive(Debug)]
pub struct SqliteBookmarkStore {
    pool: SqlitePool,
}

impl SqliteBookmarkStore {
    /// Opens (and creates if needed) the bookmark database at `db_path`.
    pub async fn open(db_path: &str) -> Result<Self, PipelineError> {
        let in_memory = db_path == ":memory:";
        let options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| DatabaseError::Connection(e.to_string()))?
        } else {
            if let Some(parent) = std::path::Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| PipelineError::io_error(format!("failed to create bookmark directory: {}", e)))?;
                }
            }
            SqliteConnectOptions::new().filename(db_path).create_if_missing(true)
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS bookmarks (
                path TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                processed_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| PipelineError::from(DatabaseError::Query(e.to_string())))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl BookmarkStore for SqliteBookmarkStore {
    async fn is_processed(&self, path: &str) -> Result<bool, PipelineError> {
        let normalized = normalize_path(path);
        let row = sqlx::query("SELECT 1 FROM bookmarks WHERE path = ?")
            .bind(&normalized)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PipelineError::from(DatabaseError::Query(e.to_string())))?;
        Ok(row.is_some())
    }

    async fn mark_processed(&self, path: &str, status: &str) -> Result<(), PipelineError> {
        let normalized = normalize_path(path);
        sqlx::query("INSERT OR IGNORE INTO bookmarks (path, status, processed_at) VALUES (?, ?, ?)")
            .bind(&normalized)
            .bind(status)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| PipelineError::from(DatabaseError::Query(e.to_string())))?;
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<String>, PipelineError> {
        let rows = sqlx::query("SELECT path FROM bookmarks ORDER BY path")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PipelineError::from(DatabaseError::Query(e.to_string())))?;
        rows.into_iter()
            .map(|row| {
                row.try_get::<String, _>("path")
                    .map_err(|e| PipelineError::from(DatabaseError::Query(e.to_string())))
            })
            .collect()
    }

    async fn clear_all(&self) -> Result<u64, PipelineError> {
        let result = sqlx::query("DELETE FROM bookmarks")
            .execute(&self.pool)
            .await
            .map_err(|e| PipelineError::from(DatabaseError::Query(e.to_string())))?;
        Ok(result.rows_affected())
    }
}

/// Bookmark store over a document executor, for deployments already on the
/// document persistence tier.
#[derive(Debug)]
pub struct DocumentBookmarkStore {
    executor: Arc<dyn DocumentExecutor>,
}

impl DocumentBookmarkStore {
    pub async fn new(executor: Arc<dyn DocumentExecutor>) -> Result<Self, PipelineError> {
        executor.ensure_collection("bookmarks", &["path"]).await?;
        Ok(Self { executor })
    }
}

#[async_trait]
impl BookmarkStore for DocumentBookmarkStore {
    async fn is_processed(&self, path: &str) -> Result<bool, PipelineError> {
        let normalized = normalize_path(path);
        let op = OperationDocument::new("bookmarks", DocOperation::FindOne).with_filter(json!({"path": normalized}));
        Ok(self.executor.execute(&op).await?.row_count > 0)
    }

    async fn mark_processed(&self, path: &str, status: &str) -> Result<(), PipelineError> {
        let normalized = normalize_path(path);
        if self.is_processed(&normalized).await? {
            return Ok(());
        }
        let op = OperationDocument::insert_one(
            "bookmarks",
            json!({
                "path": normalized,
                "status": status,
                "processed_at": Utc::now().to_rfc3339(),
            }),
        );
        self.executor.execute(&op).await?;
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<String>, PipelineError> {
        let op = OperationDocument::new("bookmarks", DocOperation::Find).with_sort("path", 1);
        let result = self.executor.execute(&op).await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| row.get("path").and_then(serde_json::Value::as_str))
            .map(str::to_string)
            .collect())
    }

    async fn clear_all(&self) -> Result<u64, PipelineError> {
        let op = OperationDocument::new("bookmarks", DocOperation::DeleteMany);
        Ok(self.executor.execute(&op).await?.row_count)
    }
}

/// Builds a bookmark store from the configured tier.
///
/// Only `sqlite` ships in the open-source tier; the other backends return
/// a clear unsupported error rather than a connection failure.
pub async fn create_bookmark_store(
    store_type: &str,
    db_path: &str,
) -> Result<Arc<dyn BookmarkStore>, PipelineError> {
    match store_type {
        "sqlite" => Ok(Arc::new(SqliteBookmarkStore::open(db_path).await?)),
        "postgres" => Err(DatabaseError::NotSupported(
            "PostgreSQL bookmark store is not bundled in this build".to_string(),
        )
        .into()),
        "redis" => Err(DatabaseError::NotSupported(
            "Redis bookmark store is not bundled in this build".to_string(),
        )
        .into()),
        "s3" => Err(DatabaseError::NotSupported(
            "S3 bookmark store is not bundled in this build".to_string(),
        )
        .into()),
        other => Err(PipelineError::ConfigurationError(format!(
            "unsupported bookmark store type '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::SqliteDocumentExecutor;

    async fn store() -> SqliteBookmarkStore {
        SqliteBookmarkStore::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_mark_then_query() {
        let store = store().await;
        assert!(!store.is_processed("/data/a.json").await.unwrap());
        store.mark_processed("/data/a.json", "processed").await.unwrap();
        assert!(store.is_processed("/data/a.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_remarking_is_idempotent() {
        let store = store().await;
        store.mark_processed("/data/a.json", "processed").await.unwrap();
        store.mark_processed("/data/a.json", "processed").await.unwrap();
        assert_eq!(store.get_all().await.unwrap(), vec!["/data/a.json".to_string()]);
    }

    #[tokio::test]
    async fn test_windows_and_unix_separators_collide() {
        let store = store().await;
        store.mark_processed(r"data\in\a.json", "processed").await.unwrap();
        assert!(store.is_processed("data/in/a.json").await.unwrap());
        let all = store.get_all().await.unwrap();
        assert_eq!(all, vec!["data/in/a.json".to_string()]);
    }

    #[tokio::test]
    async fn test_clear_all_reports_count() {
        let store = store().await;
        store.mark_processed("a.json", "processed").await.unwrap();
        store.mark_processed("b.json", "processed").await.unwrap();
        assert_eq!(store.clear_all().await.unwrap(), 2);
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_document_store_variant() {
        let executor = Arc::new(SqliteDocumentExecutor::new(":memory:"));
        executor.connect().await.unwrap();
        let store = DocumentBookmarkStore::new(executor).await.unwrap();

        store.mark_processed(r"in\x.json", "processed").await.unwrap();
        store.mark_processed("in/x.json", "processed").await.unwrap();
        assert!(store.is_processed("in/x.json").await.unwrap());
        assert_eq!(store.get_all().await.unwrap().len(), 1);
        assert_eq!(store.clear_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_factory_tiers() {
        assert!(create_bookmark_store("sqlite", ":memory:").await.is_ok());
        for tier in ["postgres", "redis", "s3"] {
            let err = create_bookmark_store(tier, ":memory:").await.unwrap_err();
            assert!(matches!(err, PipelineError::Database(DatabaseError::NotSupported(_))));
        }
        assert!(matches!(
            create_bookmark_store("dynamo", ":memory:").await.unwrap_err(),
            PipelineError::ConfigurationError(_)
        ));
    }
}
