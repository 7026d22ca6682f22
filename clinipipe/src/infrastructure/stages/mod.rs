// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Stage implementations: ingestion source, de-identification, chunking,
//! embedding, and the vector store sink.

pub mod chunking;
pub mod deid;
pub mod embedding;
pub mod ingestion;
pub mod vectorstore;

pub use chunking::ChunkingStage;
pub use deid::{DeidStage, DeidentificationService, PatternMasker};
pub use embedding::{Embedder, EmbeddingStage, HashingEmbedder};
pub use ingestion::IngestionStage;
pub use vectorstore::{InMemoryVectorStore, VectorStore, VectorStoreStage};
