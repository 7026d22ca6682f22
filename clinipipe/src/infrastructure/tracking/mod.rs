// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Stage trackers: shared batch core, the generic tracker, and the four
//! stage-specific metric types.

pub mod batch;
pub mod domains;
pub mod stage_tracker;

pub use batch::{metadata_keys, BatchCore, RecordOutcome};
pub use domains::{ChunkingMetrics, EmbeddingMetrics, IngestionMetrics, QualityStageMetrics};
pub use stage_tracker::{BatchMetrics, StageMetrics, StageTracker, TrackerSummary};

/// Tracker for the record-entry stage; rolls outcomes into run counters.
pub type IngestionTracker = StageTracker<IngestionMetrics>;
/// Tracker for the chunking stage.
pub type ChunkingTracker = StageTracker<ChunkingMetrics>;
/// Tracker for the embedding stage.
pub type EmbeddingTracker = StageTracker<EmbeddingMetrics>;
/// Tracker for quality scoring.
pub type QualityTracker = StageTracker<QualityStageMetrics>;
