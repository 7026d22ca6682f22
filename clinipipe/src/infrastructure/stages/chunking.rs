// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Chunking Stage
//!
//! Cuts normalized content into retrieval chunks: paragraph-first, then a
//! size window so no chunk exceeds the maximum. Operational transactions
//! chunk per claim. Records with no chunkable content are skipped, not
//! failed.

use std::time::Instant;

use async_trait::async_trait;
use ulid::Ulid;

use clinipipe_domain::entities::{ContentChunk, OperationalContent, PipelineItem, ProcessingStatus};
use clinipipe_domain::PipelineError;

use crate::application::context::PipelineContext;
use crate::application::stages::PipelineStage;
use crate::infrastructure::tracking::{metadata_keys, RecordOutcome};

/// Maximum characters per chunk.
const MAX_CHUNK_CHARS: usize = 1000;

pub struct ChunkingStage;

impl ChunkingStage {
    /// Paragraph-first windowing over free text.
    fn chunk_text(record_id: Option<&str>, text: &str) -> Vec<ContentChunk> {
        let mut windows: Vec<String> = Vec::new();
        let mut current = String::new();

        for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            if paragraph.len() > MAX_CHUNK_CHARS {
                if !current.is_empty() {
                    windows.push(std::mem::take(&mut current));
                }
                // Hard-split an oversized paragraph on char boundaries.
                let chars: Vec<char> = paragraph.chars().collect();
                for slice in chars.chunks(MAX_CHUNK_CHARS) {
                    windows.push(slice.iter().collect());
                }
                continue;
            }
            if !current.is_empty() && current.len() + paragraph.len() + 1 > MAX_CHUNK_CHARS {
                windows.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(paragraph);
        }
        if !current.is_empty() {
            windows.push(current);
        }

        windows
            .into_iter()
            .enumerate()
            .map(|(sequence, text)| ContentChunk {
                id: Ulid::new().to_string(),
                record_id: record_id.map(str::to_string),
                sequence,
                text,
                metadata: Default::default(),
            })
            .collect()
    }

    /// One chunk per claim, summarizing the operational entities.
    fn chunk_operational(content: &OperationalContent) -> Vec<ContentChunk> {
        content
            .claims
            .iter()
            .enumerate()
            .map(|(sequence, claim)| ContentChunk {
                id: Ulid::new().to_string(),
                record_id: Some(claim.claim_id.clone()),
                sequence,
                text: format!(
                    "Claim {} ({}): status {}, charged {:.2}, paid {:.2}",
                    claim.claim_id,
                    content.transaction_type,
                    claim.claim_status,
                    claim.total_charge_amount,
                    claim.total_payment_amount,
                ),
                metadata: Default::default(),
            })
            .collect()
    }
}

#[async_trait]
impl PipelineStage for ChunkingStage {
    fn name(&self) -> &'static str {
        "chunking"
    }

    async fn execute(
        &self,
        context: &PipelineContext,
        item: PipelineItem,
    ) -> Result<Option<PipelineItem>, PipelineError> {
        let started = Instant::now();
        let (record_id, chunks) = match &item {
            PipelineItem::Clinical(content) => {
                let text = content.narratives.join("\n\n");
                (
                    content.record_id.clone(),
                    Self::chunk_text(content.record_id.as_deref(), &text),
                )
            }
            PipelineItem::Operational(content) => (
                content.claims.first().map(|c| c.claim_id.clone()),
                Self::chunk_operational(content),
            ),
            // Already-chunked items pass through.
            _ => return Ok(Some(item)),
        };

        let record_id = record_id.unwrap_or_else(|| "unknown".to_string());
        if chunks.is_empty() {
            context
                .chunking_tracker
                .record_skip(&record_id, "no chunkable content")
                .await;
            return Ok(None);
        }

        let total_chars: usize = chunks.iter().map(|c| c.text.len()).sum();
        let mut outcome = RecordOutcome::new(&record_id, ProcessingStatus::Success);
        outcome.processing_time_ms = Some(started.elapsed().as_millis() as i64);
        outcome.metadata.insert(
            metadata_keys::CHUNK_COUNT.to_string(),
            serde_json::json!(chunks.len()),
        );
        outcome.metadata.insert(
            metadata_keys::AVG_CHUNK_SIZE.to_string(),
            serde_json::json!(total_chars as f64 / chunks.len() as f64),
        );
        context.chunking_tracker.record_success(outcome).await;

        Ok(Some(PipelineItem::Chunks(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::ClinipipeConfig;
    use clinipipe_bootstrap::StopEvent;
    use clinipipe_domain::entities::{Claim, ClinicalContent};

    fn ctx() -> PipelineContext {
        PipelineContext::new(ClinipipeConfig::default(), None, StopEvent::new())
    }

    #[test]
    fn test_paragraphs_are_respected() {
        let text = "First paragraph.\n\nSecond paragraph.";
        let chunks = ChunkingStage::chunk_text(Some("r1"), text);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("First paragraph."));
        assert_eq!(chunks[0].record_id.as_deref(), Some("r1"));
    }

    #[test]
    fn test_oversized_paragraph_is_hard_split() {
        let text = "x".repeat(2500);
        let chunks = ChunkingStage::chunk_text(None, &text);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.text.len() <= MAX_CHUNK_CHARS));
        let sequences: Vec<usize> = chunks.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn test_window_packing() {
        let paragraph = "y".repeat(600);
        let text = format!("{}\n\n{}\n\n{}", paragraph, paragraph, paragraph);
        let chunks = ChunkingStage::chunk_text(None, &text);
        // 600 + 600 exceeds the window, so each paragraph stands alone.
        assert_eq!(chunks.len(), 3);
    }

    #[tokio::test]
    async fn test_clinical_without_narrative_is_skipped() {
        let ctx = ctx();
        let content = ClinicalContent {
            record_id: Some("r1".into()),
            ..Default::default()
        };
        let out = ChunkingStage
            .execute(&ctx, PipelineItem::Clinical(content))
            .await
            .unwrap();
        assert!(out.is_none());
        assert_eq!(ctx.chunking_tracker.get_summary().totals.skipped_records, 1);
    }

    #[tokio::test]
    async fn test_operational_chunks_per_claim() {
        let ctx = ctx();
        let mut content = clinipipe_domain::entities::OperationalContent::unknown();
        content.transaction_type = "835".into();
        content.claims.push(Claim {
            claim_id: "123".into(),
            claim_status: "adjusted".into(),
            total_charge_amount: 15.0,
            total_payment_amount: 12.0,
            ..Default::default()
        });

        let out = ChunkingStage
            .execute(&ctx, PipelineItem::Operational(content))
            .await
            .unwrap()
            .unwrap();
        let PipelineItem::Chunks(chunks) = out else {
            panic!("expected chunks")
        };
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("Claim 123"));
        assert_eq!(ctx.chunking_tracker.get_summary().totals.successful_records, 1);
    }
}
