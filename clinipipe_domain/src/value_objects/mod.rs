// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Value objects: identifiers and normalized paths.

pub mod ids;
pub mod normalized_path;

pub use ids::{BatchId, PipelineRunId};
pub use normalized_path::{normalize_path, NormalizedPath};
