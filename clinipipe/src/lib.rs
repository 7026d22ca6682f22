// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Clinipipe
//!
//! Healthcare data ingestion and enrichment pipeline: ingests
//! heterogeneous clinical and operational records (FHIR-shaped JSON, X12
//! EDI), normalizes them into a common domain model, optionally masks PHI,
//! segments content into retrieval chunks, computes embeddings, and writes
//! to a vector store. Every stage reports into the tracking substrate:
//! pipeline-run lifecycle, per-stage batch metrics, error classification,
//! performance timing, host metrics, quality scores, and a correlated
//! audit stream, persisted through a pluggable relational or document
//! engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Application Layer                          │
//! │  (Pipeline context, concurrent executor, runner)            │
//! └─────────────────────────────────────────────────────────────┘
//!                                │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Domain Layer                             │
//! │  (Telemetry entities, content model, ports, errors)         │
//! └─────────────────────────────────────────────────────────────┘
//!                                │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                Infrastructure Layer                         │
//! │  (Persistence providers, trackers, audit, quality engine,   │
//! │   file watcher, X12 dispatcher, stage implementations)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Execution model
//!
//! One worker task per enabled stage (`ingestion → [deid] → chunking →
//! embedding → vectorstore`) connected by bounded queues with an explicit
//! end-of-stream sentinel; a single shared stop event coordinates
//! cancellation, timeouts and signal-driven shutdown.

pub mod application;
pub mod infrastructure;

pub use application::{ConcurrentPipelineExecutor, PipelineContext, PipelineRunResult, PipelineRunner};
pub use infrastructure::config::ClinipipeConfig;
