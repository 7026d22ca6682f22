// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! End-to-end pipeline scenarios: full runs from a watched directory
//! through parsing, chunking, embedding and the vector store, asserting on
//! the persisted telemetry afterwards.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;

use clinipipe::application::{ConcurrentPipelineExecutor, PipelineContext, PipelineRunner, SourceStage};
use clinipipe::infrastructure::bookmarks::SqliteBookmarkStore;
use clinipipe::infrastructure::config::ClinipipeConfig;
use clinipipe::infrastructure::persistence::SqliteProvider;
use clinipipe::infrastructure::stages::ChunkingStage;
use clinipipe_bootstrap::StopEvent;
use clinipipe_domain::entities::{PipelineItem, RunStatus};
use clinipipe_domain::repositories::{BookmarkStore, PersistenceProvider};
use clinipipe_domain::PipelineError;

struct Env {
    _dir: TempDir,
    watch_path: std::path::PathBuf,
    db_path: String,
    config: ClinipipeConfig,
}

fn env() -> Env {
    let dir = TempDir::new().unwrap();
    let watch_path = dir.path().join("incoming");
    std::fs::create_dir_all(&watch_path).unwrap();
    let db_path = dir.path().join("telemetry.db").to_string_lossy().to_string();

    let mut config = ClinipipeConfig::default();
    config.adapter.watch_path = watch_path.to_string_lossy().to_string();
    config.adapter.continuous = false;
    config.persistence.database.db_path = db_path.clone();
    config.pipeline.name = "e2e".to_string();

    Env {
        _dir: dir,
        watch_path,
        db_path,
        config,
    }
}

async fn run_pipeline(config: &ClinipipeConfig) -> clinipipe::PipelineRunResult {
    PipelineRunner::new(config.clone(), StopEvent::new()).run().await.unwrap()
}

async fn provider_for(env: &Env) -> SqliteProvider {
    SqliteProvider::open(env.db_path.clone()).await.unwrap()
}

#[tokio::test]
async fn test_empty_directory_completes_with_zero_records() {
    let env = env();
    let result = run_pipeline(&env.config).await;

    assert_eq!(result.status, RunStatus::Completed);
    assert!(result.errors.is_empty());

    let provider = provider_for(&env).await;
    let runs = provider.get_recent_pipeline_runs(1).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(runs[0].total_records, 0);

    let summary = provider.get_ingestion_summary(Some(&runs[0].id), None, None).await.unwrap();
    assert_eq!(summary.total, 0);
}

#[tokio::test]
async fn test_two_valid_files_are_ingested_and_bookmarked() {
    let env = env();
    // 200 and 300 bytes exactly.
    let body_a = format!("{{\"id\": \"a\", \"pad\": \"{}\"}}", "x".repeat(200 - 22));
    let body_b = format!("{{\"id\": \"b\", \"pad\": \"{}\"}}", "y".repeat(300 - 22));
    assert_eq!(body_a.len(), 200);
    assert_eq!(body_b.len(), 300);
    std::fs::write(env.watch_path.join("a.json"), &body_a).unwrap();
    std::fs::write(env.watch_path.join("b.json"), &body_b).unwrap();

    let result = run_pipeline(&env.config).await;
    assert_eq!(result.status, RunStatus::Completed);

    let provider = provider_for(&env).await;
    let run = provider.get_recent_pipeline_runs(1).await.unwrap().remove(0);
    assert_eq!(run.total_records, 2);
    assert_eq!(run.successful_records, 2);

    let summary = provider.get_ingestion_summary(Some(&run.id), None, None).await.unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.successful, 2);
    assert_eq!(summary.total_bytes_processed, 500);

    // Bookmarks hold both normalized paths with processed status.
    let bookmarks = SqliteBookmarkStore::open(&format!("{}.bookmarks", env.db_path)).await.unwrap();
    let all = bookmarks.get_all().await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().any(|p| p.ends_with("a.json")));
    assert!(all.iter().any(|p| p.ends_with("b.json")));
    assert!(all.iter().all(|p| !p.contains('\\')));
}

#[tokio::test]
async fn test_rerun_over_unchanged_directory_processes_nothing() {
    let env = env();
    std::fs::write(env.watch_path.join("a.json"), "{\"id\": \"a\"}").unwrap();

    let first = run_pipeline(&env.config).await;
    assert_eq!(first.status, RunStatus::Completed);

    let second = run_pipeline(&env.config).await;
    assert_eq!(second.status, RunStatus::Completed);

    let provider = provider_for(&env).await;
    let runs = provider.get_recent_pipeline_runs(2).await.unwrap();
    assert_eq!(runs.len(), 2);
    // The most recent run saw zero new files.
    assert_eq!(runs[0].total_records, 0);
    assert_eq!(runs[1].total_records, 1);
}

#[tokio::test]
async fn test_corrupt_json_is_classified_and_kept_for_replay() {
    let env = env();
    std::fs::write(env.watch_path.join("bad.json"), "{\"incomplete").unwrap();

    let result = run_pipeline(&env.config).await;
    assert_eq!(result.status, RunStatus::Completed);

    let provider = provider_for(&env).await;
    let run = provider.get_recent_pipeline_runs(1).await.unwrap().remove(0);
    assert_eq!(run.total_records, 1);
    assert_eq!(run.successful_records, 0);
    assert_eq!(run.failed_records, 1);

    let summary = provider.get_ingestion_summary(Some(&run.id), None, None).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.error_breakdown.get("parse_error"), Some(&1));

    // The forensic payload row carries the original data and a JSON reason.
    let pool = sqlx::SqlitePool::connect(&format!("sqlite://{}", env.db_path)).await.unwrap();
    let row: (String, String) =
        sqlx::query_as("SELECT original_data, failure_reason FROM failed_records LIMIT 1")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(row.0, "{\"incomplete");
    assert!(row.1.contains("JSON"));
}

#[tokio::test]
async fn test_x12_835_claim_flows_through_pipeline() {
    let env = env();
    let mut config = env.config.clone();
    config.adapter.extensions = vec![".x12".to_string()];

    let interchange = concat!(
        "ISA*00*          *00*          *ZZ*SENDER*ZZ*RECEIVER*250101*1200*^*00501*000000123*0*P*:~",
        "GS*HP*SENDER*RECEIVER*20250101*1200*456*X*005010X221A1~",
        "ST*835*0001~",
        "CLP*123*4*1500*1200~",
        "SE*3*0001~",
        "IEA*1*000000123~"
    );
    std::fs::write(env.watch_path.join("remit.x12"), interchange).unwrap();

    let result = run_pipeline(&config).await;
    assert_eq!(result.status, RunStatus::Completed);

    let ingestion = result.results.get("ingestion").unwrap();
    let claims: Vec<_> = ingestion
        .results
        .iter()
        .filter_map(|item| match item {
            PipelineItem::Operational(content) => Some(content.claims.clone()),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].claim_id, "123");
    assert_eq!(claims[0].claim_status, "adjusted");
    assert!((claims[0].total_charge_amount - 15.00).abs() < 1e-9);
    assert!((claims[0].total_payment_amount - 12.00).abs() < 1e-9);
}

#[tokio::test]
async fn test_incomplete_patient_quality_is_persisted() {
    let env = env();
    std::fs::write(
        env.watch_path.join("p2.json"),
        "{\"resourceType\": \"Patient\", \"id\": \"p2\", \"name\": \"\", \"birth_date\": null, \"email\": \"invalid-email\"}",
    )
    .unwrap();

    let result = run_pipeline(&env.config).await;
    assert_eq!(result.status, RunStatus::Completed);

    let provider = provider_for(&env).await;
    let quality = provider.get_quality_summary(None).await.unwrap();
    assert_eq!(quality.total, 1);
    assert!(quality.avg_overall < 0.5, "overall was {}", quality.avg_overall);

    let pool = sqlx::SqlitePool::connect(&format!("sqlite://{}", env.db_path)).await.unwrap();
    let row: (String, String) =
        sqlx::query_as("SELECT missing_fields, issues FROM quality_metrics LIMIT 1")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(row.0.contains("birth_date"));
    assert!(row.1.contains("missing_required"));
    assert!(row.1.contains("format_mismatch"));
}

/// Source that never finishes on its own; only cancellation ends it.
struct SlowSource;

#[async_trait]
impl SourceStage for SlowSource {
    fn name(&self) -> &'static str {
        "ingestion"
    }

    async fn produce(&self, _context: &PipelineContext, tx: mpsc::Sender<PipelineItem>) -> Result<(), PipelineError> {
        loop {
            tokio::time::sleep(Duration::from_millis(25)).await;
            let item = PipelineItem::RawText {
                source_path: None,
                body: "{}".to_string(),
            };
            if tx.send(item).await.is_err() {
                return Ok(());
            }
        }
    }
}

#[tokio::test]
async fn test_timeout_cancels_run_and_joins_workers() {
    let mut config = ClinipipeConfig::default();
    config.pipeline.timeout_seconds = Some(0.1);
    config.pipeline.stages.embedding = false;
    config.pipeline.stages.vectorstore = false;

    let stop = StopEvent::new();
    let context = Arc::new(PipelineContext::new(config, None, stop.clone()));
    let executor = ConcurrentPipelineExecutor::new(Arc::new(SlowSource), vec![Arc::new(ChunkingStage)], stop);

    let result = tokio::time::timeout(Duration::from_secs(10), executor.execute_pipeline(context))
        .await
        .expect("executor must join all workers after the timeout")
        .unwrap();

    assert_eq!(result.status, RunStatus::Cancelled);
    assert!(result
        .errors
        .iter()
        .any(|e| e.contains("Pipeline execution was cancelled")));
    for outcome in result.results.values() {
        assert_ne!(outcome.status, clinipipe::application::StageStatus::Failed);
    }
}

/// Source emitting a fixed number of items as fast as possible.
struct BurstSource {
    count: usize,
}

#[async_trait]
impl SourceStage for BurstSource {
    fn name(&self) -> &'static str {
        "ingestion"
    }

    async fn produce(&self, _context: &PipelineContext, tx: mpsc::Sender<PipelineItem>) -> Result<(), PipelineError> {
        for i in 0..self.count {
            let item = PipelineItem::RawText {
                source_path: Some(format!("burst-{}.json", i)),
                body: format!("{{\"id\": \"{}\"}}", i),
            };
            if tx.send(item).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_capacity_one_queue_does_not_deadlock() {
    let mut config = ClinipipeConfig::default();
    config.pipeline.queue_capacity = 1;
    config.pipeline.stages.embedding = false;
    config.pipeline.stages.vectorstore = false;

    let stop = StopEvent::new();
    let context = Arc::new(PipelineContext::new(config, None, stop.clone()));
    let executor =
        ConcurrentPipelineExecutor::new(Arc::new(BurstSource { count: 25 }), vec![Arc::new(ChunkingStage)], stop);

    let result = tokio::time::timeout(Duration::from_secs(10), executor.execute_pipeline(context))
        .await
        .expect("bounded queues with sentinels must drain")
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.results.get("ingestion").unwrap().results.len(), 25);
}

#[tokio::test]
async fn test_dependency_gap_warns_but_does_not_fail() {
    let env = env();
    let mut config = env.config.clone();
    // Embedding enabled with chunking disabled.
    config.pipeline.stages.chunking = false;
    std::fs::write(env.watch_path.join("a.json"), "{\"id\": \"a\"}").unwrap();

    let result = run_pipeline(&config).await;
    assert_eq!(result.status, RunStatus::Completed);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("embedding") && w.contains("chunking")));
}
