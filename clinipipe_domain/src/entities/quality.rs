// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Quality Metrics
//!
//! One [`QualityMetric`] per scored record: six dimension scores in
//! `[0, 1]`, a weighted overall score, and the structured issues the
//! scoring engine raised. Records excluded by sampling receive a
//! placeholder metric with `sampled = false`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The quality dimension an issue was raised under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityDimension {
    Completeness,
    Consistency,
    Validity,
    Accuracy,
    Outlier,
    DataUsage,
}

impl QualityDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityDimension::Completeness => "completeness",
            QualityDimension::Consistency => "consistency",
            QualityDimension::Validity => "validity",
            QualityDimension::Accuracy => "accuracy",
            QualityDimension::Outlier => "outlier",
            QualityDimension::DataUsage => "data_usage",
        }
    }
}

/// Issue severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// One structured finding raised by a dimension scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub dimension: QualityDimension,
    pub severity: Severity,
    pub field_name: String,
    pub issue_type: String,
    pub description: String,
    pub suggested_fix: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl QualityIssue {
    pub fn new(
        dimension: QualityDimension,
        severity: Severity,
        field_name: impl Into<String>,
        issue_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            dimension,
            severity,
            field_name: field_name.into(),
            issue_type: issue_type.into(),
            description: description.into(),
            suggested_fix: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }
}

/// One scored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetric {
    /// Storage-assigned id; zero until persisted.
    pub id: i64,
    pub pipeline_run_id: String,
    pub record_id: Option<String>,
    pub record_type: Option<String>,
    pub completeness_score: f64,
    pub consistency_score: f64,
    pub validity_score: f64,
    pub accuracy_score: f64,
    pub outlier_score: f64,
    pub data_usage_score: f64,
    pub overall_score: f64,
    pub missing_fields: Vec<String>,
    pub invalid_fields: Vec<String>,
    pub outlier_fields: Vec<String>,
    pub unused_fields: Vec<String>,
    pub issues: Vec<QualityIssue>,
    /// False for placeholder metrics emitted for records excluded by
    /// sampling.
    pub sampled: bool,
    pub timestamp: DateTime<Utc>,
}

impl QualityMetric {
    /// Placeholder metric for a record excluded by sampling.
    pub fn placeholder(pipeline_run_id: impl Into<String>, record_id: Option<String>) -> Self {
        Self {
            id: 0,
            pipeline_run_id: pipeline_run_id.into(),
            record_id,
            record_type: None,
            completeness_score: 0.0,
            consistency_score: 0.0,
            validity_score: 0.0,
            accuracy_score: 0.0,
            outlier_score: 0.0,
            data_usage_score: 0.0,
            overall_score: 0.0,
            missing_fields: Vec::new(),
            invalid_fields: Vec::new(),
            outlier_fields: Vec::new(),
            unused_fields: Vec::new(),
            issues: Vec::new(),
            sampled: false,
            timestamp: Utc::now(),
        }
    }

    /// All dimension scores plus the overall score lie in `[0, 1]`.
    pub fn scores_in_bounds(&self) -> bool {
        [
            self.completeness_score,
            self.consistency_score,
            self.validity_score,
            self.accuracy_score,
            self.outlier_score,
            self.data_usage_score,
            self.overall_score,
        ]
        .iter()
        .all(|s| (0.0..=1.0).contains(s))
    }
}

/// Aggregate quality analytics over a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
    pub total: i64,
    pub avg_completeness: f64,
    pub avg_consistency: f64,
    pub avg_validity: f64,
    pub avg_accuracy: f64,
    pub avg_overall: f64,
    pub min_overall: f64,
    pub max_overall: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_is_unsampled() {
        let metric = QualityMetric::placeholder("run-1", Some("rec-9".into()));
        assert!(!metric.sampled);
        assert!(metric.scores_in_bounds());
        assert!(metric.issues.is_empty());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_issue_builder() {
        let issue = QualityIssue::new(
            QualityDimension::Completeness,
            Severity::High,
            "birth_date",
            "missing_required",
            "Required field is missing",
        )
        .with_fix("Provide birth date");
        assert_eq!(issue.suggested_fix.as_deref(), Some("Provide birth date"));
        assert_eq!(issue.dimension, QualityDimension::Completeness);
    }
}
