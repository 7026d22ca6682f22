// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Prometheus Metrics Service
//!
//! Process-wide Prometheus registry for pipeline observability: run and
//! record counters, byte throughput, and active-run gauges. The executor
//! increments these as records flow; the registry can be scraped or
//! dumped by an embedding application.

use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

use clinipipe_domain::PipelineError;

/// Prometheus metrics for the ingestion pipeline.
#[derive(Clone)]
pub struct MetricsService {
    registry: Arc<Registry>,

    runs_total: IntCounter,
    records_processed_total: IntCounter,
    records_failed_total: IntCounter,
    bytes_processed_total: IntCounter,
    errors_total: IntCounter,
    warnings_total: IntCounter,

    active_runs: IntGauge,
    throughput_records_per_second: Gauge,
}

impl MetricsService {
    pub fn new() -> Result<Self, PipelineError> {
        let registry = Registry::new();

        let runs_total = IntCounter::with_opts(
            Opts::new("runs_total", "Total pipeline runs started").namespace("clinipipe"),
        )
        .map_err(|e| PipelineError::metrics_error(format!("failed to create runs_total: {}", e)))?;

        let records_processed_total = IntCounter::with_opts(
            Opts::new("records_processed_total", "Total records processed").namespace("clinipipe"),
        )
        .map_err(|e| PipelineError::metrics_error(format!("failed to create records_processed_total: {}", e)))?;

        let records_failed_total = IntCounter::with_opts(
            Opts::new("records_failed_total", "Total records failed").namespace("clinipipe"),
        )
        .map_err(|e| PipelineError::metrics_error(format!("failed to create records_failed_total: {}", e)))?;

        let bytes_processed_total = IntCounter::with_opts(
            Opts::new("bytes_processed_total", "Total bytes ingested").namespace("clinipipe"),
        )
        .map_err(|e| PipelineError::metrics_error(format!("failed to create bytes_processed_total: {}", e)))?;

        let errors_total = IntCounter::with_opts(
            Opts::new("errors_total", "Total pipeline errors").namespace("clinipipe"),
        )
        .map_err(|e| PipelineError::metrics_error(format!("failed to create errors_total: {}", e)))?;

        let warnings_total = IntCounter::with_opts(
            Opts::new("warnings_total", "Total pipeline warnings").namespace("clinipipe"),
        )
        .map_err(|e| PipelineError::metrics_error(format!("failed to create warnings_total: {}", e)))?;

        let active_runs = IntGauge::with_opts(
            Opts::new("active_runs", "Currently executing pipeline runs").namespace("clinipipe"),
        )
        .map_err(|e| PipelineError::metrics_error(format!("failed to create active_runs: {}", e)))?;

        let throughput_records_per_second = Gauge::with_opts(
            Opts::new("throughput_records_per_second", "Most recent run throughput").namespace("clinipipe"),
        )
        .map_err(|e| PipelineError::metrics_error(format!("failed to create throughput gauge: {}", e)))?;

        for collector in [
            Box::new(runs_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(records_processed_total.clone()),
            Box::new(records_failed_total.clone()),
            Box::new(bytes_processed_total.clone()),
            Box::new(errors_total.clone()),
            Box::new(warnings_total.clone()),
            Box::new(active_runs.clone()),
            Box::new(throughput_records_per_second.clone()),
        ] {
            registry
                .register(collector)
                .map_err(|e| PipelineError::metrics_error(format!("failed to register metric: {}", e)))?;
        }

        Ok(Self {
            registry: Arc::new(registry),
            runs_total,
            records_processed_total,
            records_failed_total,
            bytes_processed_total,
            errors_total,
            warnings_total,
            active_runs,
            throughput_records_per_second,
        })
    }

    pub fn run_started(&self) {
        self.runs_total.inc();
        self.active_runs.inc();
    }

    pub fn run_finished(&self, records_per_second: f64) {
        self.active_runs.dec();
        self.throughput_records_per_second.set(records_per_second);
    }

    pub fn record_processed(&self, bytes: u64) {
        self.records_processed_total.inc();
        self.bytes_processed_total.inc_by(bytes);
    }

    pub fn record_failed(&self) {
        self.records_failed_total.inc();
        self.errors_total.inc();
    }

    pub fn warning(&self) {
        self.warnings_total.inc();
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn gather(&self) -> Result<String, PipelineError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| PipelineError::metrics_error(format!("metrics encoding failed: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| PipelineError::metrics_error(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = MetricsService::new().unwrap();
        metrics.run_started();
        metrics.record_processed(500);
        metrics.record_processed(300);
        metrics.record_failed();
        metrics.run_finished(12.5);

        let rendered = metrics.gather().unwrap();
        assert!(rendered.contains("clinipipe_records_processed_total 2"));
        assert!(rendered.contains("clinipipe_bytes_processed_total 800"));
        assert!(rendered.contains("clinipipe_records_failed_total 1"));
        assert!(rendered.contains("clinipipe_active_runs 0"));
    }
}
