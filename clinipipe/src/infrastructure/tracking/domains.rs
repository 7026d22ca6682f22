// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stage Domain Metrics
//!
//! The four stage trackers share the generic core in `stage_tracker`; the
//! types here carry what differs per stage: ingestion byte/source tallies,
//! chunking size statistics, embedding dimensionality, and quality score
//! aggregates, each with its own recommendation thresholds.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::batch::{metadata_keys, BatchCore, RecordOutcome};
use super::stage_tracker::StageMetrics;

/// Ingestion: bytes and per-source/type tallies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestionMetrics {
    pub total_bytes: u64,
    pub by_data_source: HashMap<String, u64>,
    pub by_record_type: HashMap<String, u64>,
}

impl StageMetrics for IngestionMetrics {
    fn stage_label() -> &'static str {
        "ingestion"
    }

    fn observe(&mut self, outcome: &RecordOutcome) {
        if let Some(bytes) = outcome.record_size_bytes {
            self.total_bytes += bytes.max(0) as u64;
        }
        if let Some(source) = &outcome.data_source {
            *self.by_data_source.entry(source.clone()).or_insert(0) += 1;
        }
        if let Some(record_type) = &outcome.record_type {
            *self.by_record_type.entry(record_type.clone()).or_insert(0) += 1;
        }
    }

    fn finalize(&mut self, _core: &BatchCore) {}

    fn merge(&mut self, other: &Self) {
        self.total_bytes += other.total_bytes;
        for (source, count) in &other.by_data_source {
            *self.by_data_source.entry(source.clone()).or_insert(0) += count;
        }
        for (record_type, count) in &other.by_record_type {
            *self.by_record_type.entry(record_type.clone()).or_insert(0) += count;
        }
    }

    fn recommendations(&self, core: &BatchCore) -> Vec<String> {
        let mut out = Vec::new();
        if core.failure_rate() > 10.0 {
            out.push(format!(
                "High ingestion failure rate ({:.1}%): inspect the failed-record payloads",
                core.failure_rate()
            ));
        }
        if core.avg_processing_time_ms() > 1000.0 {
            out.push("Slow ingestion: average record takes over 1s to parse".to_string());
        }
        if out.is_empty() {
            out.push("Ingestion metrics look healthy".to_string());
        }
        out
    }
}

/// Chunking: chunk counts and size statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkingMetrics {
    pub total_chunks: u64,
    chunk_size_sum: f64,
    chunk_size_samples: u64,
    pub min_chunk_size: Option<f64>,
    pub max_chunk_size: Option<f64>,
    /// Derived on finish.
    pub chunks_per_second: Option<f64>,
}

impl ChunkingMetrics {
    pub fn avg_chunk_size(&self) -> f64 {
        if self.chunk_size_samples == 0 {
            0.0
        } else {
            self.chunk_size_sum / self.chunk_size_samples as f64
        }
    }
}

impl StageMetrics for ChunkingMetrics {
    fn stage_label() -> &'static str {
        "chunking"
    }

    fn observe(&mut self, outcome: &RecordOutcome) {
        if let Some(count) = outcome.metadata_f64(metadata_keys::CHUNK_COUNT) {
            self.total_chunks += count.max(0.0) as u64;
        }
        if let Some(size) = outcome.metadata_f64(metadata_keys::AVG_CHUNK_SIZE) {
            self.chunk_size_sum += size;
            self.chunk_size_samples += 1;
            self.min_chunk_size = Some(self.min_chunk_size.map_or(size, |m| m.min(size)));
            self.max_chunk_size = Some(self.max_chunk_size.map_or(size, |m| m.max(size)));
        }
    }

    fn finalize(&mut self, core: &BatchCore) {
        if let Some(duration_ms) = core.duration_ms() {
            if duration_ms > 0 {
                self.chunks_per_second = Some(self.total_chunks as f64 / (duration_ms as f64 / 1000.0));
            }
        }
    }

    fn merge(&mut self, other: &Self) {
        self.total_chunks += other.total_chunks;
        self.chunk_size_sum += other.chunk_size_sum;
        self.chunk_size_samples += other.chunk_size_samples;
        self.min_chunk_size = match (self.min_chunk_size, other.min_chunk_size) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max_chunk_size = match (self.max_chunk_size, other.max_chunk_size) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    fn recommendations(&self, core: &BatchCore) -> Vec<String> {
        let mut out = Vec::new();
        if core.failure_rate() > 10.0 {
            out.push(format!("High chunking failure rate ({:.1}%)", core.failure_rate()));
        }
        if core.avg_processing_time_ms() > 1000.0 {
            out.push("Slow chunking: average record takes over 1s".to_string());
        }
        let avg = self.avg_chunk_size();
        if self.chunk_size_samples > 0 && (avg > 2000.0 || avg < 200.0) {
            out.push(format!(
                "Chunk size skew: average chunk is {:.0} chars; retrieval works best between 200 and 2000",
                avg
            ));
        }
        if out.is_empty() {
            out.push("Chunking metrics look healthy".to_string());
        }
        out
    }
}

/// Embedding: vector counts and dimensionality.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingMetrics {
    pub total_embeddings: u64,
    dims_sum: u64,
    dims_samples: u64,
    pub embeddings_per_second: Option<f64>,
}

impl EmbeddingMetrics {
    pub fn avg_dimensions(&self) -> f64 {
        if self.dims_samples == 0 {
            0.0
        } else {
            self.dims_sum as f64 / self.dims_samples as f64
        }
    }
}

impl StageMetrics for EmbeddingMetrics {
    fn stage_label() -> &'static str {
        "embedding"
    }

    fn observe(&mut self, outcome: &RecordOutcome) {
        if let Some(count) = outcome.metadata_f64(metadata_keys::EMBEDDING_COUNT) {
            self.total_embeddings += count.max(0.0) as u64;
        }
        if let Some(dims) = outcome.metadata_f64(metadata_keys::EMBEDDING_DIMS) {
            self.dims_sum += dims.max(0.0) as u64;
            self.dims_samples += 1;
        }
    }

    fn finalize(&mut self, core: &BatchCore) {
        if let Some(duration_ms) = core.duration_ms() {
            if duration_ms > 0 {
                self.embeddings_per_second = Some(self.total_embeddings as f64 / (duration_ms as f64 / 1000.0));
            }
        }
    }

    fn merge(&mut self, other: &Self) {
        self.total_embeddings += other.total_embeddings;
        self.dims_sum += other.dims_sum;
        self.dims_samples += other.dims_samples;
    }

    fn recommendations(&self, core: &BatchCore) -> Vec<String> {
        let mut out = Vec::new();
        if core.failure_rate() > 10.0 {
            out.push(format!("High embedding failure rate ({:.1}%)", core.failure_rate()));
        }
        if core.avg_processing_time_ms() > 1000.0 {
            out.push("Slow embedding: consider batching records per model call".to_string());
        }
        if out.is_empty() {
            out.push("Embedding metrics look healthy".to_string());
        }
        out
    }
}

/// Quality: score aggregates from the scoring engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityStageMetrics {
    score_sum: f64,
    scored_records: u64,
    pub low_quality_records: u64,
}

impl QualityStageMetrics {
    pub fn avg_score(&self) -> f64 {
        if self.scored_records == 0 {
            0.0
        } else {
            self.score_sum / self.scored_records as f64
        }
    }
}

impl StageMetrics for QualityStageMetrics {
    fn stage_label() -> &'static str {
        "quality"
    }

    fn observe(&mut self, outcome: &RecordOutcome) {
        if let Some(score) = outcome.metadata_f64(metadata_keys::QUALITY_SCORE) {
            self.score_sum += score;
            self.scored_records += 1;
            if score < 0.7 {
                self.low_quality_records += 1;
            }
        }
    }

    fn finalize(&mut self, _core: &BatchCore) {}

    fn merge(&mut self, other: &Self) {
        self.score_sum += other.score_sum;
        self.scored_records += other.scored_records;
        self.low_quality_records += other.low_quality_records;
    }

    fn recommendations(&self, core: &BatchCore) -> Vec<String> {
        let mut out = Vec::new();
        if self.scored_records > 0 {
            let low_share = self.low_quality_records as f64 / self.scored_records as f64 * 100.0;
            if low_share > 20.0 {
                out.push(format!(
                    "{:.0}% of scored records fall below 0.7 overall quality",
                    low_share
                ));
            }
        }
        if core.failure_rate() > 10.0 {
            out.push(format!("High quality-scoring failure rate ({:.1}%)", core.failure_rate()));
        }
        if out.is_empty() {
            out.push("Quality metrics look healthy".to_string());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinipipe_domain::entities::ProcessingStatus;

    #[test]
    fn test_chunking_size_skew_recommendation() {
        let mut metrics = ChunkingMetrics::default();
        let mut core = BatchCore::new("b", "run", "chunking");
        let mut outcome = RecordOutcome::new("rec", ProcessingStatus::Success);
        outcome
            .metadata
            .insert(metadata_keys::CHUNK_COUNT.into(), serde_json::json!(4));
        outcome
            .metadata
            .insert(metadata_keys::AVG_CHUNK_SIZE.into(), serde_json::json!(5000.0));
        core.observe(&outcome);
        metrics.observe(&outcome);

        let recommendations = metrics.recommendations(&core);
        assert!(recommendations.iter().any(|r| r.contains("skew")));
    }

    #[test]
    fn test_chunking_healthy_recommendation() {
        let mut metrics = ChunkingMetrics::default();
        let mut core = BatchCore::new("b", "run", "chunking");
        let mut outcome = RecordOutcome::new("rec", ProcessingStatus::Success);
        outcome
            .metadata
            .insert(metadata_keys::AVG_CHUNK_SIZE.into(), serde_json::json!(800.0));
        core.observe(&outcome);
        metrics.observe(&outcome);

        let recommendations = metrics.recommendations(&core);
        assert_eq!(recommendations, vec!["Chunking metrics look healthy".to_string()]);
    }

    #[test]
    fn test_embedding_avg_dimensions() {
        let mut metrics = EmbeddingMetrics::default();
        for dims in [384.0, 768.0] {
            let mut outcome = RecordOutcome::new("rec", ProcessingStatus::Success);
            outcome
                .metadata
                .insert(metadata_keys::EMBEDDING_DIMS.into(), serde_json::json!(dims));
            outcome
                .metadata
                .insert(metadata_keys::EMBEDDING_COUNT.into(), serde_json::json!(3));
            metrics.observe(&outcome);
        }
        assert!((metrics.avg_dimensions() - 576.0).abs() < 1e-9);
        assert_eq!(metrics.total_embeddings, 6);
    }

    #[test]
    fn test_quality_low_share_recommendation() {
        let mut metrics = QualityStageMetrics::default();
        let core = BatchCore::new("b", "run", "quality");
        for score in [0.5, 0.6, 0.9] {
            let mut outcome = RecordOutcome::new("rec", ProcessingStatus::Success);
            outcome
                .metadata
                .insert(metadata_keys::QUALITY_SCORE.into(), serde_json::json!(score));
            metrics.observe(&outcome);
        }
        assert_eq!(metrics.low_quality_records, 2);
        let recommendations = metrics.recommendations(&core);
        assert!(recommendations.iter().any(|r| r.contains("below 0.7")));
    }

    #[test]
    fn test_ingestion_source_tallies() {
        let mut metrics = IngestionMetrics::default();
        let mut outcome = RecordOutcome::new("rec", ProcessingStatus::Success);
        outcome.data_source = Some("fhir".into());
        outcome.record_size_bytes = Some(512);
        metrics.observe(&outcome);
        metrics.observe(&outcome);

        assert_eq!(metrics.total_bytes, 1024);
        assert_eq!(metrics.by_data_source.get("fhir"), Some(&2));
    }
}
