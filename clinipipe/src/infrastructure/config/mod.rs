// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Configuration loading and validation.

pub mod data_intelligence;
pub mod settings;

pub use data_intelligence::{
    AuditTrailConfig, DataIntelligenceConfig, DetailLevel, FeaturesConfig, IngestionTrackingConfig,
    PerformanceMode, PerformanceTrackingConfig, QualityScoringConfig, SamplingConfig, SystemMetricsConfig,
    TerminologyValidationConfig,
};
pub use settings::{AdapterConfig, ClinipipeConfig, DatabaseConfig, PersistenceConfig, PipelineSettings, StageToggles};
