// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Vector Store Stage
//!
//! Upserts embedded chunks into a vector store. Wire protocols for real
//! vector databases are external collaborators behind the [`VectorStore`]
//! trait; the bundled in-memory store serves local runs and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use clinipipe_domain::entities::{EmbeddedChunk, PipelineItem, StoredBatch};
use clinipipe_domain::PipelineError;

use crate::application::context::PipelineContext;
use crate::application::stages::PipelineStage;

/// Vector database port.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upserts the batch and returns the number of stored vectors.
    async fn upsert(&self, collection: &str, chunks: &[EmbeddedChunk]) -> Result<usize, PipelineError>;

    /// Number of vectors currently held in the collection.
    async fn count(&self, collection: &str) -> Result<usize, PipelineError>;
}

/// In-memory vector store keyed by chunk id.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: Mutex<HashMap<String, HashMap<String, EmbeddedChunk>>>,
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, collection: &str, chunks: &[EmbeddedChunk]) -> Result<usize, PipelineError> {
        let mut collections = self.collections.lock();
        let entries = collections.entry(collection.to_string()).or_default();
        for chunk in chunks {
            entries.insert(chunk.chunk.id.clone(), chunk.clone());
        }
        Ok(chunks.len())
    }

    async fn count(&self, collection: &str) -> Result<usize, PipelineError> {
        Ok(self.collections.lock().get(collection).map_or(0, HashMap::len))
    }
}

pub struct VectorStoreStage {
    store: std::sync::Arc<dyn VectorStore>,
    collection: String,
}

impl VectorStoreStage {
    pub fn new(store: std::sync::Arc<dyn VectorStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }
}

#[async_trait]
impl PipelineStage for VectorStoreStage {
    fn name(&self) -> &'static str {
        "vectorstore"
    }

    async fn execute(
        &self,
        _context: &PipelineContext,
        item: PipelineItem,
    ) -> Result<Option<PipelineItem>, PipelineError> {
        let PipelineItem::Embedded(chunks) = item else {
            return Ok(Some(item));
        };
        if chunks.is_empty() {
            return Ok(None);
        }
        let upserted = self.store.upsert(&self.collection, &chunks).await?;
        Ok(Some(PipelineItem::Stored(StoredBatch {
            collection: self.collection.clone(),
            upserted,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::ClinipipeConfig;
    use clinipipe_bootstrap::StopEvent;
    use clinipipe_domain::entities::ContentChunk;

    fn embedded(id: &str) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: ContentChunk {
                id: id.to_string(),
                record_id: Some("r1".into()),
                sequence: 0,
                text: "t".into(),
                metadata: Default::default(),
            },
            embedding: vec![0.1, 0.2],
            model_name: "test".into(),
        }
    }

    #[tokio::test]
    async fn test_upsert_is_keyed_by_chunk_id() {
        let store = InMemoryVectorStore::default();
        store.upsert("notes", &[embedded("a"), embedded("b")]).await.unwrap();
        store.upsert("notes", &[embedded("a")]).await.unwrap();
        assert_eq!(store.count("notes").await.unwrap(), 2);
        assert_eq!(store.count("other").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stage_emits_acknowledgement() {
        let ctx = PipelineContext::new(ClinipipeConfig::default(), None, StopEvent::new());
        let store = std::sync::Arc::new(InMemoryVectorStore::default());
        let stage = VectorStoreStage::new(store.clone(), "clinical");

        let out = stage
            .execute(&ctx, PipelineItem::Embedded(vec![embedded("a")]))
            .await
            .unwrap()
            .unwrap();
        match out {
            PipelineItem::Stored(batch) => {
                assert_eq!(batch.collection, "clinical");
                assert_eq!(batch.upserted, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(store.count("clinical").await.unwrap(), 1);
    }
}
