// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Audit Reporter
//!
//! Builds a run-level report from the persisted telemetry (run summary,
//! ingestion analytics, quality analytics, error breakdown) and exports
//! it as JSON, CSV (summary header, blank line, detail sections) or a
//! single-file HTML document with the summary and tables.

use serde::Serialize;

use clinipipe_domain::entities::{IngestionSummary, PipelineRunSummary, QualitySummary};
use clinipipe_domain::PipelineError;

use crate::infrastructure::persistence::TrackingRepository;

/// Rate view of the ingestion analytics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessingSummary {
    pub total_records: i64,
    pub successful_records: i64,
    pub failed_records: i64,
    pub skipped_records: i64,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub skip_rate: f64,
    pub avg_processing_time_ms: f64,
    pub total_bytes_processed: i64,
}

impl ProcessingSummary {
    pub fn from_ingestion_summary(summary: &IngestionSummary) -> Self {
        let rate = |part: i64| {
            if summary.total == 0 {
                0.0
            } else {
                part as f64 / summary.total as f64 * 100.0
            }
        };
        Self {
            total_records: summary.total,
            successful_records: summary.successful,
            failed_records: summary.failed,
            skipped_records: summary.skipped,
            success_rate: rate(summary.successful),
            failure_rate: rate(summary.failed),
            skip_rate: rate(summary.skipped),
            avg_processing_time_ms: summary.avg_processing_time_ms,
            total_bytes_processed: summary.total_bytes_processed,
        }
    }
}

/// One generated report.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub run: Option<PipelineRunSummary>,
    pub processing: ProcessingSummary,
    pub quality: QualitySummary,
    /// (category, count), most frequent first.
    pub error_breakdown: Vec<(String, i64)>,
    pub recommendations: Vec<String>,
}

/// Builds and exports audit reports from persisted telemetry.
pub struct AuditReporter {
    repository: TrackingRepository,
}

impl AuditReporter {
    pub fn new(repository: TrackingRepository) -> Self {
        Self { repository }
    }

    /// Assembles the report for one run (or all runs when `None`).
    pub async fn generate(&self, pipeline_run_id: Option<&str>) -> Result<AuditReport, PipelineError> {
        let run = match pipeline_run_id {
            Some(run_id) => self.repository.get_pipeline_run(run_id).await?,
            None => None,
        };
        let ingestion = self.repository.get_ingestion_summary(pipeline_run_id, None, None).await?;
        let quality = self.repository.get_quality_summary(pipeline_run_id).await?;

        let mut error_breakdown: Vec<(String, i64)> = ingestion.error_breakdown.clone().into_iter().collect();
        error_breakdown.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let processing = ProcessingSummary::from_ingestion_summary(&ingestion);
        let recommendations = Self::recommendations(&processing, &quality);

        Ok(AuditReport {
            run,
            processing,
            quality,
            error_breakdown,
            recommendations,
        })
    }

    fn recommendations(processing: &ProcessingSummary, quality: &QualitySummary) -> Vec<String> {
        let mut out = Vec::new();
        if processing.failure_rate > 10.0 {
            out.push(format!(
                "Failure rate is {:.1}%; review the error breakdown and failed-record payloads",
                processing.failure_rate
            ));
        }
        if processing.total_records > 0 && processing.avg_processing_time_ms > 1000.0 {
            out.push("Average record processing exceeds 1s; profile the slowest stage".to_string());
        }
        if quality.total > 0 && quality.avg_overall < 0.7 {
            out.push(format!(
                "Average quality score is {:.2}; inspect the most common quality issues",
                quality.avg_overall
            ));
        }
        if out.is_empty() {
            out.push("Pipeline health looks good".to_string());
        }
        out
    }

    /// Exports a report as `json`, `csv` or `html`.
    pub fn export(&self, report: &AuditReport, path: &std::path::Path, format: &str) -> Result<(), PipelineError> {
        let body = match format {
            "json" => serde_json::to_string_pretty(report)
                .map_err(|e| PipelineError::SerializationError(e.to_string()))?,
            "csv" => Self::render_csv(report),
            "html" => Self::render_html(report),
            other => {
                return Err(PipelineError::validation(format!("unsupported export format '{}'", other)));
            }
        };
        std::fs::write(path, body).map_err(|e| PipelineError::io_error(e.to_string()))
    }

    fn render_csv(report: &AuditReport) -> String {
        let mut out = String::new();
        out.push_str("total_records,successful,failed,skipped,success_rate,avg_time_ms,total_bytes\n");
        out.push_str(&format!(
            "{},{},{},{},{:.2},{:.2},{}\n\n",
            report.processing.total_records,
            report.processing.successful_records,
            report.processing.failed_records,
            report.processing.skipped_records,
            report.processing.success_rate,
            report.processing.avg_processing_time_ms,
            report.processing.total_bytes_processed,
        ));
        out.push_str("Error Breakdown\n");
        out.push_str("category,count\n");
        for (category, count) in &report.error_breakdown {
            out.push_str(&format!("{},{}\n", category, count));
        }
        out
    }

    fn render_html(report: &AuditReport) -> String {
        let mut rows = String::new();
        for (category, count) in &report.error_breakdown {
            rows.push_str(&format!("<tr><td>{}</td><td>{}</td></tr>", escape(category), count));
        }
        let mut recommendations = String::new();
        for recommendation in &report.recommendations {
            recommendations.push_str(&format!("<li>{}</li>", escape(recommendation)));
        }
        let run_line = report
            .run
            .as_ref()
            .map(|r| format!("{} ({}) status {}", escape(&r.name), escape(&r.id), r.status))
            .unwrap_or_else(|| "all runs".to_string());

        format!(
            concat!(
                "<!DOCTYPE html><html><head><meta charset=\"utf-8\">",
                "<title>Clinipipe Audit Report</title>",
                "<style>body{{font-family:sans-serif;margin:2em}}table{{border-collapse:collapse}}",
                "td,th{{border:1px solid #999;padding:4px 8px}}</style></head><body>",
                "<h1>Clinipipe Audit Report</h1>",
                "<p>Scope: {run_line}</p>",
                "<h2>Processing Summary</h2>",
                "<table><tr><th>Total</th><th>Successful</th><th>Failed</th><th>Skipped</th>",
                "<th>Success rate</th><th>Avg time (ms)</th><th>Bytes</th></tr>",
                "<tr><td>{total}</td><td>{ok}</td><td>{failed}</td><td>{skipped}</td>",
                "<td>{rate:.1}%</td><td>{avg:.1}</td><td>{bytes}</td></tr></table>",
                "<h2>Quality Summary</h2>",
                "<table><tr><th>Scored</th><th>Avg overall</th><th>Min</th><th>Max</th></tr>",
                "<tr><td>{q_total}</td><td>{q_avg:.3}</td><td>{q_min:.3}</td><td>{q_max:.3}</td></tr></table>",
                "<h2>Error Breakdown</h2>",
                "<table><tr><th>Category</th><th>Count</th></tr>{rows}</table>",
                "<h2>Recommendations</h2><ul>{recommendations}</ul>",
                "</body></html>"
            ),
            run_line = run_line,
            total = report.processing.total_records,
            ok = report.processing.successful_records,
            failed = report.processing.failed_records,
            skipped = report.processing.skipped_records,
            rate = report.processing.success_rate,
            avg = report.processing.avg_processing_time_ms,
            bytes = report.processing.total_bytes_processed,
            q_total = report.quality.total,
            q_avg = report.quality.avg_overall,
            q_min = report.quality.min_overall,
            q_max = report.quality.max_overall,
            rows = rows,
            recommendations = recommendations,
        )
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
