// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Step and pipeline timing with bottleneck analysis.

pub mod tracker;

pub use tracker::{BottleneckAnalysis, PerformanceTracker, PipelineMetrics, StepMetrics};
