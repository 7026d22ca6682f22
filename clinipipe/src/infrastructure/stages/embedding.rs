// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Embedding Stage
//!
//! Computes vector embeddings for each chunk batch. Concrete model
//! backends are external collaborators behind the [`Embedder`] trait; the
//! bundled [`HashingEmbedder`] is a deterministic model-free feature
//! hasher good enough for local retrieval and tests.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Instant;

use async_trait::async_trait;

use clinipipe_domain::entities::{EmbeddedChunk, PipelineItem, ProcessingStatus};
use clinipipe_domain::PipelineError;

use crate::application::context::PipelineContext;
use crate::application::stages::PipelineStage;
use crate::infrastructure::tracking::{metadata_keys, RecordOutcome};

/// Embedding model port.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;
    fn dimensions(&self) -> usize;

    /// Embeds a batch of texts, one vector per input.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError>;
}

/// Deterministic feature-hashing embedder.
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(8),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "feature-hashing"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

pub struct EmbeddingStage {
    embedder: std::sync::Arc<dyn Embedder>,
}

impl EmbeddingStage {
    pub fn new(embedder: std::sync::Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl PipelineStage for EmbeddingStage {
    fn name(&self) -> &'static str {
        "embedding"
    }

    async fn execute(
        &self,
        context: &PipelineContext,
        item: PipelineItem,
    ) -> Result<Option<PipelineItem>, PipelineError> {
        let PipelineItem::Chunks(chunks) = item else {
            return Ok(Some(item));
        };
        if chunks.is_empty() {
            return Ok(None);
        }
        let started = Instant::now();
        let record_id = chunks[0]
            .record_id
            .clone()
            .unwrap_or_else(|| "unknown".to_string());

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(PipelineError::processing_failed(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let embedded: Vec<EmbeddedChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| EmbeddedChunk {
                chunk,
                embedding,
                model_name: self.embedder.model_name().to_string(),
            })
            .collect();

        let mut outcome = RecordOutcome::new(&record_id, ProcessingStatus::Success);
        outcome.processing_time_ms = Some(started.elapsed().as_millis() as i64);
        outcome.metadata.insert(
            metadata_keys::EMBEDDING_COUNT.to_string(),
            serde_json::json!(embedded.len()),
        );
        outcome.metadata.insert(
            metadata_keys::EMBEDDING_DIMS.to_string(),
            serde_json::json!(self.embedder.dimensions()),
        );
        context.embedding_tracker.record_success(outcome).await;

        Ok(Some(PipelineItem::Embedded(embedded)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::ClinipipeConfig;
    use clinipipe_bootstrap::StopEvent;
    use clinipipe_domain::entities::ContentChunk;

    #[tokio::test]
    async fn test_hashing_embedder_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64);
        let texts = vec!["patient presented with fever".to_string()];
        let first = embedder.embed(&texts).await.unwrap();
        let second = embedder.embed(&texts).await.unwrap();
        assert_eq!(first, second);

        let norm: f32 = first[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_different_texts_differ() {
        let embedder = HashingEmbedder::new(64);
        let vectors = embedder
            .embed(&["fever and chills".to_string(), "routine checkup".to_string()])
            .await
            .unwrap();
        assert_ne!(vectors[0], vectors[1]);
    }

    #[tokio::test]
    async fn test_stage_embeds_chunk_batch() {
        let ctx = PipelineContext::new(ClinipipeConfig::default(), None, StopEvent::new());
        let stage = EmbeddingStage::new(std::sync::Arc::new(HashingEmbedder::new(32)));

        let chunks = vec![
            ContentChunk {
                id: "c1".into(),
                record_id: Some("r1".into()),
                sequence: 0,
                text: "note one".into(),
                metadata: Default::default(),
            },
            ContentChunk {
                id: "c2".into(),
                record_id: Some("r1".into()),
                sequence: 1,
                text: "note two".into(),
                metadata: Default::default(),
            },
        ];

        let out = stage.execute(&ctx, PipelineItem::Chunks(chunks)).await.unwrap().unwrap();
        let PipelineItem::Embedded(embedded) = out else {
            panic!("expected embedded chunks")
        };
        assert_eq!(embedded.len(), 2);
        assert_eq!(embedded[0].dimensions(), 32);
        assert_eq!(embedded[0].model_name, "feature-hashing");

        let summary = ctx.embedding_tracker.get_summary();
        assert_eq!(summary.domain.total_embeddings, 2);
    }
}
