// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Configuration
//!
//! Typed configuration tree loaded from YAML. Unknown keys are ignored;
//! invalid values fail fast with a `ConfigurationError` carrying a path
//! pointer (e.g. `adapter.scan_interval: must be positive`).

use serde::{Deserialize, Serialize};
use std::path::Path;

use clinipipe_domain::PipelineError;

use super::data_intelligence::DataIntelligenceConfig;

/// Root configuration for one pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClinipipeConfig {
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub adapter: AdapterConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub data_intelligence: DataIntelligenceConfig,
}

impl ClinipipeConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::ConfigurationError(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&raw)
    }

    /// Parses and validates configuration from a YAML string.
    pub fn from_yaml(raw: &str) -> Result<Self, PipelineError> {
        let config: ClinipipeConfig = serde_yaml::from_str(raw)
            .map_err(|e| PipelineError::ConfigurationError(format!("failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the whole tree, applying performance-mode presets first.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.pipeline.validate()?;
        self.adapter.validate()?;
        self.persistence.validate()?;
        self.data_intelligence.validate()?;
        Ok(())
    }

    /// JSON snapshot persisted with the pipeline run.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Pipeline-level settings: name, stage toggles, timeout, queue sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_pipeline_name")]
    pub name: String,
    /// Run-wide timeout; stages have no inherent timeout of their own.
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
    /// Bounded queue capacity between stage workers.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub stages: StageToggles,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            name: default_pipeline_name(),
            timeout_seconds: None,
            queue_capacity: default_queue_capacity(),
            output_path: None,
            stages: StageToggles::default(),
        }
    }
}

impl PipelineSettings {
    fn validate(&self) -> Result<(), PipelineError> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::ConfigurationError(
                "pipeline.name: must not be empty".to_string(),
            ));
        }
        if let Some(timeout) = self.timeout_seconds {
            if timeout <= 0.0 {
                return Err(PipelineError::ConfigurationError(
                    "pipeline.timeout_seconds: must be positive".to_string(),
                ));
            }
        }
        if self.queue_capacity == 0 {
            return Err(PipelineError::ConfigurationError(
                "pipeline.queue_capacity: must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-stage enablement flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageToggles {
    #[serde(default = "default_true")]
    pub ingestion: bool,
    #[serde(default)]
    pub deid: bool,
    #[serde(default = "default_true")]
    pub chunking: bool,
    #[serde(default = "default_true")]
    pub embedding: bool,
    #[serde(default = "default_true")]
    pub vectorstore: bool,
}

impl Default for StageToggles {
    fn default() -> Self {
        Self {
            ingestion: true,
            deid: false,
            chunking: true,
            embedding: true,
            vectorstore: true,
        }
    }
}

impl StageToggles {
    pub fn is_enabled(&self, stage: &str) -> bool {
        match stage {
            "ingestion" => self.ingestion,
            "deid" => self.deid,
            "chunking" => self.chunking,
            "embedding" => self.embedding,
            "vectorstore" => self.vectorstore,
            _ => false,
        }
    }
}

/// Source adapter configuration. Only the file watcher ships today.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(rename = "type", default = "default_adapter_type")]
    pub adapter_type: String,
    #[serde(default = "default_watch_path")]
    pub watch_path: String,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub continuous: bool,
    #[serde(default = "default_scan_interval")]
    pub scan_interval: f64,
    #[serde(default)]
    pub single_scan_mode: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            adapter_type: default_adapter_type(),
            watch_path: default_watch_path(),
            extensions: default_extensions(),
            continuous: false,
            scan_interval: default_scan_interval(),
            single_scan_mode: false,
        }
    }
}

impl AdapterConfig {
    fn validate(&self) -> Result<(), PipelineError> {
        if self.adapter_type != "file_watcher" {
            return Err(PipelineError::ConfigurationError(format!(
                "adapter.type: unsupported adapter '{}'",
                self.adapter_type
            )));
        }
        if self.watch_path.trim().is_empty() {
            return Err(PipelineError::ConfigurationError(
                "adapter.watch_path: must not be empty".to_string(),
            ));
        }
        if self.scan_interval <= 0.0 {
            return Err(PipelineError::ConfigurationError(
                "adapter.scan_interval: must be positive".to_string(),
            ));
        }
        if self.extensions.is_empty() {
            return Err(PipelineError::ConfigurationError(
                "adapter.extensions: must list at least one extension".to_string(),
            ));
        }
        Ok(())
    }
}

/// Persistence engine selection plus engine-specific settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl PersistenceConfig {
    fn validate(&self) -> Result<(), PipelineError> {
        self.database.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(rename = "type", default = "default_db_type")]
    pub db_type: String,
    /// Relational tier: database file path (`:memory:` for tests).
    #[serde(default = "default_db_path")]
    pub db_path: String,
    // Document tier connection settings.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub tls_ca_file: Option<String>,
    #[serde(default)]
    pub tls_cert_file: Option<String>,
    #[serde(default)]
    pub replica_set: Option<String>,
    #[serde(default)]
    pub auth_source: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: default_db_type(),
            db_path: default_db_path(),
            host: None,
            port: None,
            database: None,
            username: None,
            password: None,
            tls: false,
            tls_ca_file: None,
            tls_cert_file: None,
            replica_set: None,
            auth_source: None,
        }
    }
}

impl DatabaseConfig {
    const KNOWN_TYPES: [&'static str; 4] = ["sqlite", "docstore", "postgresql", "mongodb"];

    fn validate(&self) -> Result<(), PipelineError> {
        if !Self::KNOWN_TYPES.contains(&self.db_type.as_str()) {
            return Err(PipelineError::ConfigurationError(format!(
                "persistence.database.type: unknown engine '{}' (expected one of {})",
                self.db_type,
                Self::KNOWN_TYPES.join(", ")
            )));
        }
        if self.db_type == "sqlite" && self.db_path.trim().is_empty() {
            return Err(PipelineError::ConfigurationError(
                "persistence.database.db_path: must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_pipeline_name() -> String {
    "clinipipe".to_string()
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_adapter_type() -> String {
    "file_watcher".to_string()
}

fn default_watch_path() -> String {
    "./incoming".to_string()
}

fn default_extensions() -> Vec<String> {
    vec![".json".to_string()]
}

fn default_scan_interval() -> f64 {
    1.0
}

fn default_db_type() -> String {
    "sqlite".to_string()
}

fn default_db_path() -> String {
    "clinipipe.db".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClinipipeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.queue_capacity, 1024);
        assert_eq!(config.adapter.extensions, vec![".json"]);
        assert!((config.adapter.scan_interval - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let yaml = r#"
pipeline:
  name: nightly
  flux_capacitor: true
totally_unknown_section:
  x: 1
"#;
        let config = ClinipipeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.pipeline.name, "nightly");
    }

    #[test]
    fn test_invalid_scan_interval_points_at_path() {
        let yaml = r#"
adapter:
  watch_path: ./in
  scan_interval: -2.0
"#;
        let err = ClinipipeConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("adapter.scan_interval"));
    }

    #[test]
    fn test_unknown_engine_rejected() {
        let yaml = r#"
persistence:
  database:
    type: oracle
"#;
        let err = ClinipipeConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("persistence.database.type"));
    }

    #[test]
    fn test_stage_toggles_lookup() {
        let toggles = StageToggles::default();
        assert!(toggles.is_enabled("ingestion"));
        assert!(!toggles.is_enabled("deid"));
        assert!(!toggles.is_enabled("no_such_stage"));
    }
}
