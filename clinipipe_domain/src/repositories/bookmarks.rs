// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Bookmark Store Port
//!
//! Idempotent "processed" set keyed by normalized path. The store is the
//! trust boundary: implementations normalize every path before lookup or
//! insert, so a given file is enqueued at most once per store lifetime
//! regardless of the OS separator it was observed with.

use async_trait::async_trait;

use crate::error::PipelineError;

/// Durable set of processed source files.
#[async_trait]
pub trait BookmarkStore: Send + Sync + std::fmt::Debug {
    /// True if the (normalized) path has already been processed.
    async fn is_processed(&self, path: &str) -> Result<bool, PipelineError>;

    /// Marks the (normalized) path processed. Insert-or-ignore semantics:
    /// re-marking is a no-op, never an error.
    async fn mark_processed(&self, path: &str, status: &str) -> Result<(), PipelineError>;

    /// All bookmarked paths, sorted.
    async fn get_all(&self) -> Result<Vec<String>, PipelineError>;

    /// Removes every bookmark, returning the number removed.
    async fn clear_all(&self) -> Result<u64, PipelineError>;
}
