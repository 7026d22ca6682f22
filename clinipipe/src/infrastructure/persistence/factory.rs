// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Persistence Factory
//!
//! Builds a connected, schema-initialized provider from configuration.
//! The open-source tier ships `sqlite` (relational) and `docstore`
//! (embedded document engine); `postgresql` and `mongodb` name drivers that
//! are not bundled and return `NotSupportedError` so callers can surface a
//! clear message instead of a connection failure.

use std::sync::Arc;

use clinipipe_domain::repositories::PersistenceProvider;
use clinipipe_domain::{DatabaseError, PipelineError};

use crate::infrastructure::config::DatabaseConfig;

use super::document::DocumentProvider;
use super::sqlite_provider::SqliteProvider;

/// Creates a connected provider for the configured engine.
pub async fn create_provider(config: &DatabaseConfig) -> Result<Arc<dyn PersistenceProvider>, PipelineError> {
    match config.db_type.as_str() {
        "sqlite" => {
            let provider = SqliteProvider::open(config.db_path.clone()).await?;
            Ok(Arc::new(provider))
        }
        "docstore" => {
            let provider = DocumentProvider::open_embedded(config.db_path.clone()).await?;
            Ok(Arc::new(provider))
        }
        "postgresql" => Err(DatabaseError::NotSupported(
            "PostgreSQL persistence requires the postgres driver, which is not bundled in this build".to_string(),
        )
        .into()),
        "mongodb" => Err(DatabaseError::NotSupported(
            "MongoDB persistence requires a network document-database client, which is not bundled in this build; \
             the embedded 'docstore' engine implements the same document dialect"
                .to_string(),
        )
        .into()),
        other => Err(PipelineError::ConfigurationError(format!(
            "persistence.database.type: unknown engine '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(db_type: &str) -> DatabaseConfig {
        DatabaseConfig {
            db_type: db_type.to_string(),
            db_path: ":memory:".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sqlite_tier_is_supported() {
        let provider = create_provider(&config_for("sqlite")).await.unwrap();
        assert!(provider.health_check().await);
    }

    #[tokio::test]
    async fn test_docstore_tier_is_supported() {
        let provider = create_provider(&config_for("docstore")).await.unwrap();
        assert!(provider.health_check().await);
    }

    #[tokio::test]
    async fn test_unbundled_drivers_report_not_supported() {
        for engine in ["postgresql", "mongodb"] {
            let err = create_provider(&config_for(engine)).await.unwrap_err();
            assert!(
                matches!(err, PipelineError::Database(DatabaseError::NotSupported(_))),
                "expected NotSupported for {}",
                engine
            );
        }
    }
}
