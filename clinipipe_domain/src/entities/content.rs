// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Payloads
//!
//! The typed payloads that flow through the staged pipeline queues:
//! raw source text, parsed clinical/operational content, retrieval chunks,
//! embedded chunks, and vector-store acknowledgements.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::entities::operational::OperationalContent;

/// Parsed clinical record in a format-agnostic envelope.
///
/// Individual resource mappers (FHIR, HL7v2) live behind the ingestion
/// stage; the envelope carries the identifiers and the flattened field map
/// the downstream stages need.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClinicalContent {
    pub record_id: Option<String>,
    pub record_type: Option<String>,
    /// Flattened field map used by the quality scorers and the chunker.
    pub fields: HashMap<String, serde_json::Value>,
    /// Free-text portions worth chunking for retrieval.
    pub narratives: Vec<String>,
}

impl ClinicalContent {
    /// Field value as a trimmed string, when present and scalar.
    pub fn field_str(&self, name: &str) -> Option<String> {
        match self.fields.get(name)? {
            serde_json::Value::String(s) => Some(s.trim().to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// One retrieval chunk cut from a record's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChunk {
    pub id: String,
    pub record_id: Option<String>,
    pub sequence: usize,
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A chunk with its computed embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub chunk: ContentChunk,
    pub embedding: Vec<f32>,
    pub model_name: String,
}

impl EmbeddedChunk {
    pub fn dimensions(&self) -> usize {
        self.embedding.len()
    }
}

/// Acknowledgement for chunks upserted into a vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredBatch {
    pub collection: String,
    pub upserted: usize,
}

/// The unit of work flowing between stage workers.
///
/// Each queue carries `Option<PipelineItem>`; `None` is the end-of-stream
/// sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineItem {
    /// Raw file contents straight from the source adapter.
    RawText { source_path: Option<String>, body: String },
    /// Parsed clinical record.
    Clinical(ClinicalContent),
    /// Parsed operational transaction.
    Operational(OperationalContent),
    /// Retrieval chunks for one record.
    Chunks(Vec<ContentChunk>),
    /// Embedded chunks for one record.
    Embedded(Vec<EmbeddedChunk>),
    /// Vector-store acknowledgement.
    Stored(StoredBatch),
}

impl PipelineItem {
    /// Best-effort record identifier for tracking and audit.
    pub fn record_id(&self) -> Option<String> {
        match self {
            PipelineItem::RawText { source_path, .. } => source_path.clone(),
            PipelineItem::Clinical(c) => c.record_id.clone(),
            PipelineItem::Operational(o) => o.claims.first().map(|c| c.claim_id.clone()),
            PipelineItem::Chunks(chunks) => chunks.first().and_then(|c| c.record_id.clone()),
            PipelineItem::Embedded(chunks) => chunks.first().and_then(|c| c.chunk.record_id.clone()),
            PipelineItem::Stored(_) => None,
        }
    }

    /// Approximate payload size in bytes, used for throughput metrics.
    pub fn size_bytes(&self) -> usize {
        match self {
            PipelineItem::RawText { body, .. } => body.len(),
            PipelineItem::Clinical(c) => c.narratives.iter().map(String::len).sum(),
            PipelineItem::Operational(_) => 0,
            PipelineItem::Chunks(chunks) => chunks.iter().map(|c| c.text.len()).sum(),
            PipelineItem::Embedded(chunks) => chunks.iter().map(|c| c.chunk.text.len()).sum(),
            PipelineItem::Stored(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_str_trims_scalars() {
        let mut content = ClinicalContent::default();
        content.fields.insert("name".into(), serde_json::json!("  Jane Doe "));
        content.fields.insert("age".into(), serde_json::json!(39));
        content.fields.insert("tags".into(), serde_json::json!(["a"]));
        assert_eq!(content.field_str("name").as_deref(), Some("Jane Doe"));
        assert_eq!(content.field_str("age").as_deref(), Some("39"));
        assert_eq!(content.field_str("tags"), None);
    }

    #[test]
    fn test_raw_text_size() {
        let item = PipelineItem::RawText {
            source_path: Some("a.json".into()),
            body: "x".repeat(200),
        };
        assert_eq!(item.size_bytes(), 200);
    }
}
