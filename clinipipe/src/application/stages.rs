// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stage Contracts
//!
//! The executor drives two kinds of stages: one source stage that produces
//! items over time (the ingestion adapter) and transform stages that map
//! one item to at most one output item. Returning `Ok(None)` from a
//! transform filters the item out of the stream without error.

use async_trait::async_trait;
use tokio::sync::mpsc;

use clinipipe_domain::entities::PipelineItem;
use clinipipe_domain::PipelineError;

use super::context::PipelineContext;

/// The head of the pipeline; produces items until its source is drained
/// or the stop event fires.
#[async_trait]
pub trait SourceStage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Produces items into `tx`. Returning closes the stream; the worker
    /// then pushes the end-of-stream sentinel downstream.
    async fn produce(&self, context: &PipelineContext, tx: mpsc::Sender<PipelineItem>) -> Result<(), PipelineError>;
}

/// A transform stage between two queues.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Transforms one item. `Ok(None)` drops the item from the stream;
    /// errors are record-scoped and handled by the worker.
    async fn execute(
        &self,
        context: &PipelineContext,
        item: PipelineItem,
    ) -> Result<Option<PipelineItem>, PipelineError>;
}
