// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Data Intelligence Configuration
//!
//! Feature tree controlling the tracking substrate: stage trackers, audit
//! trail, quality scoring, terminology validation, performance tracking and
//! system metrics. `enabled` is the master switch; when false every
//! tracker and the audit logger become no-ops.
//!
//! `performance_mode` is a preset bundle folded into the tree before
//! validation:
//!
//! - `fast` — sampling at 10%, record-level tracking and outlier detection
//!   off.
//! - `standard` — the defaults as written.
//! - `comprehensive` — sampling off (rate 1.0), every analysis flag on.

use serde::{Deserialize, Serialize};

use clinipipe_domain::PipelineError;

/// Preset bundles for sampling and content-analysis flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceMode {
    Fast,
    #[default]
    Standard,
    Comprehensive,
}

/// Audit detail presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailLevel {
    Minimal,
    #[default]
    Standard,
    Comprehensive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataIntelligenceConfig {
    /// Master switch; when false, trackers and audit become no-ops.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub performance_mode: PerformanceMode,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl Default for DataIntelligenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            performance_mode: PerformanceMode::Standard,
            sampling: SamplingConfig::default(),
            features: FeaturesConfig::default(),
        }
    }
}

impl DataIntelligenceConfig {
    /// Validates the tree after folding in the performance-mode preset.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.sampling.validate("data_intelligence.sampling")?;
        self.features.validate()?;
        Ok(())
    }

    /// Effective config with the performance-mode preset applied.
    pub fn effective(&self) -> Self {
        let mut config = self.clone();
        match config.performance_mode {
            PerformanceMode::Fast => {
                config.sampling.enabled = true;
                config.sampling.rate = config.sampling.rate.min(0.1);
                config.features.audit_trail.record_level_tracking = false;
                config.features.quality_scoring.outlier_detection = false;
            }
            PerformanceMode::Standard => {}
            PerformanceMode::Comprehensive => {
                config.sampling.enabled = false;
                config.sampling.rate = 1.0;
                config.features.quality_scoring.sampling_rate = 1.0;
                config.features.quality_scoring.outlier_detection = true;
                config.features.audit_trail.record_level_tracking = true;
                config.features.performance_tracking.bottleneck_analysis = true;
            }
        }
        config
    }

    /// True when the master switch and the named feature are both on.
    pub fn is_feature_enabled(&self, feature: &str) -> bool {
        if !self.enabled {
            return false;
        }
        match feature {
            "ingestion_tracking" => self.features.ingestion_tracking.enabled,
            "audit_trail" => self.features.audit_trail.enabled,
            "quality_scoring" => self.features.quality_scoring.enabled,
            "terminology_validation" => self.features.terminology_validation.enabled,
            "performance_tracking" => self.features.performance_tracking.enabled,
            "system_metrics" => self.features.system_metrics.enabled,
            _ => false,
        }
    }
}

/// Global sampling floor applied across features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_rate")]
    pub rate: f64,
    #[serde(default = "default_min_batch")]
    pub minimum_batch_size: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rate: 1.0,
            minimum_batch_size: 1,
        }
    }
}

impl SamplingConfig {
    fn validate(&self, path: &str) -> Result<(), PipelineError> {
        if !(0.0..=1.0).contains(&self.rate) {
            return Err(PipelineError::ConfigurationError(format!(
                "{}.rate: must be within [0, 1]",
                path
            )));
        }
        if self.minimum_batch_size < 1 {
            return Err(PipelineError::ConfigurationError(format!(
                "{}.minimum_batch_size: must be at least 1",
                path
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default)]
    pub ingestion_tracking: IngestionTrackingConfig,
    #[serde(default)]
    pub audit_trail: AuditTrailConfig,
    #[serde(default)]
    pub quality_scoring: QualityScoringConfig,
    #[serde(default)]
    pub terminology_validation: TerminologyValidationConfig,
    #[serde(default)]
    pub performance_tracking: PerformanceTrackingConfig,
    #[serde(default)]
    pub system_metrics: SystemMetricsConfig,
}

impl FeaturesConfig {
    fn validate(&self) -> Result<(), PipelineError> {
        self.ingestion_tracking.validate()?;
        self.quality_scoring.validate()?;
        self.terminology_validation.validate()?;
        Ok(())
    }
}

const EXPORT_FORMATS: [&str; 4] = ["json", "csv", "xlsx", "yaml"];
const CODE_SYSTEMS: [&str; 7] = ["icd10", "icd9", "snomed", "rxnorm", "loinc", "cpt", "hcpcs"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionTrackingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub store_failed_records: bool,
    #[serde(default)]
    pub export_metrics: bool,
    #[serde(default = "default_export_formats")]
    pub export_formats: Vec<String>,
}

impl Default for IngestionTrackingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store_failed_records: true,
            export_metrics: false,
            export_formats: default_export_formats(),
        }
    }
}

impl IngestionTrackingConfig {
    fn validate(&self) -> Result<(), PipelineError> {
        for format in &self.export_formats {
            if !EXPORT_FORMATS.contains(&format.as_str()) {
                return Err(PipelineError::ConfigurationError(format!(
                    "data_intelligence.features.ingestion_tracking.export_formats: unknown format '{}'",
                    format
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditTrailConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub detail_level: DetailLevel,
    #[serde(default)]
    pub record_level_tracking: bool,
    #[serde(default = "default_true")]
    pub structured_errors: bool,
}

impl Default for AuditTrailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detail_level: DetailLevel::Standard,
            record_level_tracking: false,
            structured_errors: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityScoringConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rate")]
    pub sampling_rate: f64,
    #[serde(default = "default_true")]
    pub completeness_scoring: bool,
    #[serde(default = "default_true")]
    pub consistency_checks: bool,
    #[serde(default = "default_true")]
    pub outlier_detection: bool,
    #[serde(default = "default_true")]
    pub aggregate_scoring: bool,
}

impl Default for QualityScoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sampling_rate: 1.0,
            completeness_scoring: true,
            consistency_checks: true,
            outlier_detection: true,
            aggregate_scoring: true,
        }
    }
}

impl QualityScoringConfig {
    fn validate(&self) -> Result<(), PipelineError> {
        if !(0.0..=1.0).contains(&self.sampling_rate) {
            return Err(PipelineError::ConfigurationError(
                "data_intelligence.features.quality_scoring.sampling_rate: must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminologyValidationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub code_systems: Vec<String>,
    #[serde(default)]
    pub coverage_reporting: bool,
    #[serde(default)]
    pub unmapped_terms_collection: bool,
    #[serde(default)]
    pub compliance_reports: bool,
}

impl Default for TerminologyValidationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            code_systems: Vec::new(),
            coverage_reporting: false,
            unmapped_terms_collection: false,
            compliance_reports: false,
        }
    }
}

impl TerminologyValidationConfig {
    fn validate(&self) -> Result<(), PipelineError> {
        for system in &self.code_systems {
            if !CODE_SYSTEMS.contains(&system.as_str()) {
                return Err(PipelineError::ConfigurationError(format!(
                    "data_intelligence.features.terminology_validation.code_systems: unknown system '{}'",
                    system
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceTrackingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub step_timing: bool,
    #[serde(default)]
    pub resource_monitoring: bool,
    #[serde(default = "default_true")]
    pub bottleneck_analysis: bool,
    #[serde(default)]
    pub optimization_recommendations: bool,
}

impl Default for PerformanceTrackingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            step_timing: true,
            resource_monitoring: false,
            bottleneck_analysis: true,
            optimization_recommendations: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub hardware_detection: bool,
    #[serde(default)]
    pub resource_utilization: bool,
    #[serde(default = "default_true")]
    pub gpu_detection: bool,
    #[serde(default = "default_true")]
    pub os_detection: bool,
    #[serde(default)]
    pub infrastructure_recommendations: bool,
}

impl Default for SystemMetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hardware_detection: true,
            resource_utilization: false,
            gpu_detection: true,
            os_detection: true,
            infrastructure_recommendations: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_rate() -> f64 {
    1.0
}

fn default_min_batch() -> usize {
    1
}

fn default_export_formats() -> Vec<String> {
    vec!["json".to_string(), "csv".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = DataIntelligenceConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.is_feature_enabled("ingestion_tracking"));
        assert!(!config.is_feature_enabled("terminology_validation"));
    }

    #[test]
    fn test_master_switch_disables_all_features() {
        let config = DataIntelligenceConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(!config.is_feature_enabled("ingestion_tracking"));
        assert!(!config.is_feature_enabled("audit_trail"));
    }

    #[test]
    fn test_invalid_sampling_rate_rejected() {
        let config = DataIntelligenceConfig {
            sampling: SamplingConfig {
                enabled: true,
                rate: 1.5,
                minimum_batch_size: 1,
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("data_intelligence.sampling.rate"));
    }

    #[test]
    fn test_unknown_export_format_rejected() {
        let mut config = DataIntelligenceConfig::default();
        config.features.ingestion_tracking.export_formats = vec!["parquet".to_string()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("export_formats"));
    }

    #[test]
    fn test_unknown_code_system_rejected() {
        let mut config = DataIntelligenceConfig::default();
        config.features.terminology_validation.code_systems = vec!["icd11".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fast_mode_caps_sampling() {
        let config = DataIntelligenceConfig {
            performance_mode: PerformanceMode::Fast,
            ..Default::default()
        };
        let effective = config.effective();
        assert!(effective.sampling.enabled);
        assert!(effective.sampling.rate <= 0.1);
        assert!(!effective.features.quality_scoring.outlier_detection);
    }

    #[test]
    fn test_comprehensive_mode_disables_sampling() {
        let config = DataIntelligenceConfig {
            performance_mode: PerformanceMode::Comprehensive,
            ..Default::default()
        };
        let effective = config.effective();
        assert!(!effective.sampling.enabled);
        assert!((effective.features.quality_scoring.sampling_rate - 1.0).abs() < f64::EPSILON);
        assert!(effective.features.audit_trail.record_level_tracking);
    }
}
