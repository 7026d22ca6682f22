// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Runner
//!
//! Assembles the default pipeline for one run: persistence provider and
//! tracking repository, bookmark store, file watcher, the five stages, and
//! the concurrent executor. A connection-level persistence fault degrades
//! to an untracked run with a warning; configuration faults fail fast.

use std::sync::Arc;

use tracing::warn;

use clinipipe_bootstrap::StopEvent;
use clinipipe_domain::{DatabaseError, PipelineError};

use crate::infrastructure::adapters::FileWatcherAdapter;
use crate::infrastructure::bookmarks::create_bookmark_store;
use crate::infrastructure::config::ClinipipeConfig;
use crate::infrastructure::metrics::{MetricsService, SystemMetricsCollector};
use crate::infrastructure::persistence::{create_provider, TrackingRepository};
use crate::infrastructure::stages::{
    ChunkingStage, DeidStage, EmbeddingStage, HashingEmbedder, IngestionStage, InMemoryVectorStore, VectorStoreStage,
};

use super::context::PipelineContext;
use super::executor::{ConcurrentPipelineExecutor, PipelineRunResult};
use super::stages::PipelineStage;

/// Builds and runs the default staged pipeline from configuration.
pub struct PipelineRunner {
    config: ClinipipeConfig,
    stop_event: StopEvent,
}

impl PipelineRunner {
    pub fn new(config: ClinipipeConfig, stop_event: StopEvent) -> Self {
        Self { config, stop_event }
    }

    /// Opens the tracking repository. Connection faults degrade to an
    /// untracked run; configuration and unsupported-driver faults
    /// propagate.
    async fn open_repository(&self) -> Result<Option<TrackingRepository>, PipelineError> {
        match create_provider(&self.config.persistence.database).await {
            Ok(provider) => Ok(Some(TrackingRepository::new(provider))),
            Err(e @ PipelineError::ConfigurationError(_)) => Err(e),
            Err(e @ PipelineError::Database(DatabaseError::NotSupported(_))) => Err(e),
            Err(e) => {
                warn!("persistence unavailable, continuing without tracking: {}", e);
                Ok(None)
            }
        }
    }

    fn bookmark_db_path(&self) -> String {
        let db_path = &self.config.persistence.database.db_path;
        if db_path == ":memory:" {
            ":memory:".to_string()
        } else {
            format!("{}.bookmarks", db_path)
        }
    }

    /// Runs the pipeline once and returns the run result.
    pub async fn run(&self) -> Result<PipelineRunResult, PipelineError> {
        self.config.validate()?;

        let repository = self.open_repository().await?;
        let context = Arc::new(PipelineContext::new(
            self.config.clone(),
            repository,
            self.stop_event.clone(),
        ));

        let bookmarks = create_bookmark_store("sqlite", &self.bookmark_db_path()).await?;
        let watcher = Arc::new(FileWatcherAdapter::new(
            self.config.adapter.clone(),
            bookmarks,
            self.stop_event.clone(),
        ));

        let stages: Vec<Arc<dyn PipelineStage>> = vec![
            Arc::new(DeidStage::new()),
            Arc::new(ChunkingStage),
            Arc::new(EmbeddingStage::new(Arc::new(HashingEmbedder::default()))),
            Arc::new(VectorStoreStage::new(Arc::new(InMemoryVectorStore::default()), "clinipipe")),
        ];

        let system_metrics = Arc::new(SystemMetricsCollector::new(
            context.data_intelligence.features.system_metrics.gpu_detection,
        ));

        let mut executor =
            ConcurrentPipelineExecutor::new(Arc::new(IngestionStage::new(watcher)), stages, self.stop_event.clone())
                .with_system_metrics(system_metrics);
        match MetricsService::new() {
            Ok(metrics) => executor = executor.with_metrics(metrics),
            Err(e) => warn!("metrics registry unavailable: {}", e),
        }

        let result = executor.execute_pipeline(Arc::clone(&context)).await?;

        if context.output_path.is_some() {
            if let Err(e) = context.export_results(&result, "json") {
                warn!("result export failed: {}", e);
            }
        }

        Ok(result)
    }
}
