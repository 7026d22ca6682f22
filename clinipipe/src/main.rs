// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Clinipipe command-line entry point.
//!
//! Exit codes: 0 success, 1 pipeline failure, 2 configuration error.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::error;

use clinipipe::application::PipelineRunner;
use clinipipe::infrastructure::audit::AuditReporter;
use clinipipe::infrastructure::config::ClinipipeConfig;
use clinipipe::infrastructure::persistence::{create_provider, TrackingRepository};
use clinipipe_bootstrap::{signals, ExitCode, ShutdownCoordinator};
use clinipipe_domain::entities::RunStatus;
use clinipipe_domain::PipelineError;

#[derive(Parser)]
#[command(name = "clinipipe", about = "Healthcare data ingestion and enrichment pipeline", version)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, global = true, default_value = "clinipipe.yaml")]
    config: PathBuf,

    /// Log filter when CLINIPIPE_LOG/RUST_LOG are unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the pipeline described by the configuration
    Run {
        /// Override the watch directory
        #[arg(long)]
        watch_path: Option<String>,

        /// Keep watching for new files after the initial sweep
        #[arg(long)]
        continuous: bool,

        /// Run-wide timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,
    },
    /// Show recent pipeline runs
    Status {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// Show ingestion and quality analytics for a run
    Summary {
        /// Pipeline run id; omit for all runs
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Export an audit report for a run
    Report {
        /// Pipeline run id; omit for all runs
        #[arg(long)]
        run_id: Option<String>,

        /// Output file
        #[arg(long, default_value = "clinipipe-report.html")]
        output: PathBuf,

        /// Report format: json, csv, or html
        #[arg(long, default_value = "html")]
        format: String,
    },
    /// Delete telemetry older than the retention window
    Cleanup {
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
}

fn exit_code_for(error: &PipelineError) -> ExitCode {
    match error {
        PipelineError::ConfigurationError(_) => ExitCode::ConfigError,
        PipelineError::Database(clinipipe_domain::DatabaseError::NotSupported(_)) => ExitCode::ConfigError,
        _ => ExitCode::PipelineFailure,
    }
}

async fn open_repository(config: &ClinipipeConfig) -> Result<TrackingRepository, PipelineError> {
    let provider = create_provider(&config.persistence.database).await?;
    Ok(TrackingRepository::new(provider))
}

async fn cmd_run(
    mut config: ClinipipeConfig,
    watch_path: Option<String>,
    continuous: bool,
    timeout: Option<f64>,
) -> Result<ExitCode, PipelineError> {
    if let Some(watch_path) = watch_path {
        config.adapter.watch_path = watch_path;
    }
    if continuous {
        config.adapter.continuous = true;
    }
    if timeout.is_some() {
        config.pipeline.timeout_seconds = timeout;
    }
    config.validate()?;

    let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
    let signal_task = signals::spawn_signal_listener(coordinator.clone());

    let runner = PipelineRunner::new(config, coordinator.stop_event());
    let result = runner.run().await?;
    signal_task.abort();

    println!(
        "pipeline finished: status={} duration={}ms stages={} errors={} warnings={}",
        result.status,
        result.duration_ms,
        result.results.len(),
        result.errors.len(),
        result.warnings.len(),
    );
    for warning in &result.warnings {
        println!("  warning: {}", warning);
    }
    for error in &result.errors {
        println!("  error: {}", error);
    }

    Ok(match result.status {
        RunStatus::Completed => ExitCode::Success,
        _ => ExitCode::PipelineFailure,
    })
}

async fn cmd_status(config: ClinipipeConfig, limit: i64) -> Result<ExitCode, PipelineError> {
    let repository = open_repository(&config).await?;
    let runs = repository.get_recent_pipeline_runs(limit).await?;
    if runs.is_empty() {
        println!("no pipeline runs recorded");
        return Ok(ExitCode::Success);
    }
    println!(
        "{:<38} {:<20} {:<10} {:>8} {:>8} {:>8} {:>8}",
        "id", "name", "status", "total", "ok", "failed", "skipped"
    );
    for run in runs {
        println!(
            "{:<38} {:<20} {:<10} {:>8} {:>8} {:>8} {:>8}",
            run.id,
            run.name,
            run.status.as_str(),
            run.total_records,
            run.successful_records,
            run.failed_records,
            run.skipped_records,
        );
    }
    Ok(ExitCode::Success)
}

async fn cmd_summary(config: ClinipipeConfig, run_id: Option<String>) -> Result<ExitCode, PipelineError> {
    let repository = open_repository(&config).await?;
    let ingestion = repository.get_ingestion_summary(run_id.as_deref(), None, None).await?;
    let quality = repository.get_quality_summary(run_id.as_deref()).await?;

    println!("ingestion summary:");
    println!("  total:      {}", ingestion.total);
    println!("  successful: {}", ingestion.successful);
    println!("  failed:     {}", ingestion.failed);
    println!("  skipped:    {}", ingestion.skipped);
    println!("  avg time:   {:.1} ms", ingestion.avg_processing_time_ms);
    println!("  bytes:      {}", ingestion.total_bytes_processed);
    if !ingestion.error_breakdown.is_empty() {
        println!("  errors by category:");
        let mut categories: Vec<_> = ingestion.error_breakdown.iter().collect();
        categories.sort_by(|a, b| b.1.cmp(a.1));
        for (category, count) in categories {
            println!("    {:<24} {}", category, count);
        }
    }

    println!("quality summary:");
    println!("  scored:           {}", quality.total);
    println!("  avg overall:      {:.3}", quality.avg_overall);
    println!("  avg completeness: {:.3}", quality.avg_completeness);
    println!("  overall range:    [{:.3}, {:.3}]", quality.min_overall, quality.max_overall);
    Ok(ExitCode::Success)
}

async fn cmd_report(
    config: ClinipipeConfig,
    run_id: Option<String>,
    output: PathBuf,
    format: String,
) -> Result<ExitCode, PipelineError> {
    let repository = open_repository(&config).await?;
    let reporter = AuditReporter::new(repository);
    let report = reporter.generate(run_id.as_deref()).await?;
    reporter.export(&report, &output, &format)?;
    println!("wrote {} report to {}", format, output.display());
    Ok(ExitCode::Success)
}

async fn cmd_cleanup(config: ClinipipeConfig, days: i64) -> Result<ExitCode, PipelineError> {
    let repository = open_repository(&config).await?;
    let deleted = repository.cleanup_old_data(days).await?;
    println!("deleted {} telemetry rows older than {} days", deleted, days);
    Ok(ExitCode::Success)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    clinipipe_bootstrap::logger::init_logging(&cli.log_level);

    let config = if cli.config.exists() {
        match ClinipipeConfig::load(&cli.config) {
            Ok(config) => config,
            Err(e) => {
                error!("configuration error: {}", e);
                std::process::exit(ExitCode::ConfigError.as_i32());
            }
        }
    } else {
        ClinipipeConfig::default()
    };

    let outcome = match cli.command {
        Commands::Run {
            watch_path,
            continuous,
            timeout,
        } => cmd_run(config, watch_path, continuous, timeout).await,
        Commands::Status { limit } => cmd_status(config, limit).await,
        Commands::Summary { run_id } => cmd_summary(config, run_id).await,
        Commands::Report { run_id, output, format } => cmd_report(config, run_id, output, format).await,
        Commands::Cleanup { days } => cmd_cleanup(config, days).await,
    };

    let code = match outcome {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            exit_code_for(&e)
        }
    };
    std::process::exit(code.as_i32());
}
