// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Point-in-time host snapshot bound to a pipeline run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Host characteristics recorded once per run (and periodically when the
/// background monitor is enabled).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetric {
    /// Storage-assigned id; zero until persisted.
    pub id: i64,
    pub pipeline_run_id: String,
    pub hostname: String,
    pub os_name: String,
    pub os_version: String,
    pub runtime_version: String,
    pub cpu_model: String,
    pub cpu_cores: i64,
    pub memory_total_gb: f64,
    pub gpu_available: bool,
    pub gpu_model: Option<String>,
    #[serde(default)]
    pub additional_info: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl SystemMetric {
    /// Zero-valued snapshot used when host introspection fails.
    pub fn unavailable(pipeline_run_id: impl Into<String>) -> Self {
        Self {
            id: 0,
            pipeline_run_id: pipeline_run_id.into(),
            hostname: String::new(),
            os_name: String::new(),
            os_version: String::new(),
            runtime_version: String::new(),
            cpu_model: String::new(),
            cpu_cores: 0,
            memory_total_gb: 0.0,
            gpu_available: false,
            gpu_model: None,
            additional_info: HashMap::new(),
            timestamp: Utc::now(),
        }
    }
}
