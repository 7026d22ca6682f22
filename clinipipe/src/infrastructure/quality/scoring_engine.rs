// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Quality Scoring Engine
//!
//! Multi-dimensional record scoring: completeness, consistency, validity,
//! accuracy, outlier detection and data usage, combined into a weighted
//! overall score in `[0, 1]`.
//!
//! The weighted sum is clamped after combination so accumulated
//! floating-point error can never push a score out of bounds. Batch
//! scoring applies optional sampling; records excluded by the sample
//! receive a placeholder metric with `sampled = false`.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::Rng;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use clinipipe_domain::entities::{QualityDimension, QualityIssue, QualityMetric, Severity};

use crate::infrastructure::config::QualityScoringConfig;

/// Dimension weights; must sum to 1.
#[derive(Debug, Clone, Serialize)]
pub struct QualityWeights {
    pub completeness: f64,
    pub consistency: f64,
    pub validity: f64,
    pub accuracy: f64,
    pub outlier: f64,
    pub data_usage: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            completeness: 0.25,
            consistency: 0.20,
            validity: 0.15,
            accuracy: 0.15,
            outlier: 0.15,
            data_usage: 0.10,
        }
    }
}

impl QualityWeights {
    pub fn sum(&self) -> f64 {
        self.completeness + self.consistency + self.validity + self.accuracy + self.outlier + self.data_usage
    }
}

const PLACEHOLDER_VALUES: [&str; 6] = ["null", "none", "n/a", "na", "unknown", ""];
const TEST_VALUES: [&str; 4] = ["0", "test", "dummy", "sample"];

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("static pattern"));
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9][0-9 ().-]{6,}$").expect("static pattern"));
static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}([T ].*)?$").expect("static pattern"));

/// (field, min, max) plausibility table shared by the range check and the
/// domain outlier check.
const LOGICAL_RANGES: [(&str, f64, f64); 6] = [
    ("age", 0.0, 150.0),
    ("heart_rate", 20.0, 250.0),
    ("temperature_celsius", 30.0, 45.0),
    ("weight_kg", 0.0, 500.0),
    ("height_cm", 20.0, 300.0),
    ("bmi", 5.0, 100.0),
];

fn value_str(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A field is present when non-null, non-empty and not a placeholder.
fn is_present(value: Option<&Value>) -> bool {
    let Some(value) = value else {
        return false;
    };
    if value.is_null() {
        return false;
    }
    match value_str(value) {
        Some(text) => !PLACEHOLDER_VALUES.contains(&text.to_lowercase().as_str()),
        None => true, // objects/arrays count as present
    }
}

// ---------------------------------------------------------------------------
// Completeness
// ---------------------------------------------------------------------------

/// Required/optional field coverage per record type.
pub struct CompletenessScorer {
    required: HashMap<String, Vec<&'static str>>,
    optional: HashMap<String, Vec<&'static str>>,
}

impl Default for CompletenessScorer {
    fn default() -> Self {
        let mut required = HashMap::new();
        required.insert("patient".to_string(), vec!["id", "name", "birth_date", "gender"]);
        required.insert("observation".to_string(), vec!["id", "subject", "code", "value"]);
        required.insert("claim".to_string(), vec!["claim_id", "total_charge_amount", "claim_status"]);
        required.insert("encounter".to_string(), vec!["id", "patient_id", "status"]);

        let mut optional = HashMap::new();
        optional.insert(
            "patient".to_string(),
            vec!["email", "phone", "address", "weight_kg", "height_cm"],
        );
        optional.insert("observation".to_string(), vec!["unit", "effective_date", "status"]);

        Self { required, optional }
    }
}

pub struct CompletenessResult {
    pub score: f64,
    pub missing_fields: Vec<String>,
    pub issues: Vec<QualityIssue>,
}

impl CompletenessScorer {
    /// Coverage score: required at 80% weight, optional at 20%.
    pub fn score(&self, record_type: &str, fields: &HashMap<String, Value>) -> CompletenessResult {
        let default_required = vec!["id"];
        let required = self
            .required
            .get(&record_type.to_lowercase())
            .unwrap_or(&default_required);
        let optional = self.optional.get(&record_type.to_lowercase());

        let mut missing_fields = Vec::new();
        let mut issues = Vec::new();
        let mut required_present = 0usize;

        for field in required {
            let value = fields.get(*field);
            if is_present(value) {
                required_present += 1;
            } else if value.is_none() || value.is_some_and(Value::is_null) {
                missing_fields.push(field.to_string());
                issues.push(
                    QualityIssue::new(
                        QualityDimension::Completeness,
                        Severity::High,
                        *field,
                        "missing_required",
                        format!("Required field '{}' is missing", field),
                    )
                    .with_fix(format!("Provide a value for '{}'", field)),
                );
            } else {
                // Present key, but empty or placeholder content.
                let severity = if value.and_then(value_str).as_deref() == Some("") {
                    Severity::Medium
                } else {
                    Severity::Low
                };
                let issue_type = if severity == Severity::Medium {
                    "empty_field"
                } else {
                    "placeholder_value"
                };
                issues.push(QualityIssue::new(
                    QualityDimension::Completeness,
                    severity,
                    *field,
                    issue_type,
                    format!("Required field '{}' has no usable value", field),
                ));
            }
        }

        let required_coverage = required_present as f64 / required.len().max(1) as f64;
        let optional_coverage = match optional {
            Some(optional) if !optional.is_empty() => {
                let present = optional.iter().filter(|f| is_present(fields.get(**f))).count();
                present as f64 / optional.len() as f64
            }
            _ => 1.0,
        };

        CompletenessResult {
            score: required_coverage * 0.8 + optional_coverage * 0.2,
            missing_fields,
            issues,
        }
    }
}

// ---------------------------------------------------------------------------
// Consistency
// ---------------------------------------------------------------------------

pub struct ConsistencyResult {
    pub score: f64,
    pub issues: Vec<QualityIssue>,
}

/// Format, range, cross-field and temporal checks.
#[derive(Default)]
pub struct ConsistencyScorer;

impl ConsistencyScorer {
    pub fn score(&self, fields: &HashMap<String, Value>) -> ConsistencyResult {
        let mut issues = Vec::new();
        let mut checks = 0usize;

        // Format consistency against name-inferred patterns.
        for (name, value) in fields {
            let Some(text) = value_str(value) else { continue };
            if text.is_empty() {
                continue;
            }
            let lower = name.to_lowercase();
            let matched = if lower.contains("email") {
                Some(EMAIL_RE.is_match(&text))
            } else if lower.contains("phone") {
                Some(PHONE_RE.is_match(&text))
            } else if lower.contains("date") {
                Some(DATE_RE.is_match(&text))
            } else {
                None
            };
            if let Some(ok) = matched {
                checks += 1;
                if !ok {
                    issues.push(QualityIssue::new(
                        QualityDimension::Consistency,
                        Severity::Medium,
                        name,
                        "format_mismatch",
                        format!("Field '{}' does not match the expected format", name),
                    ));
                }
            }
        }

        // Logical ranges.
        for (field, min, max) in LOGICAL_RANGES {
            if let Some(value) = fields.get(field).and_then(value_f64) {
                checks += 1;
                if value < min || value > max {
                    issues.push(QualityIssue::new(
                        QualityDimension::Consistency,
                        Severity::Medium,
                        field,
                        "range_violation",
                        format!("Field '{}' = {} is outside the plausible range [{}, {}]", field, value, min, max),
                    ));
                }
            }
        }

        // Cross-field: stated age against birth_date, within one year.
        let birth_date = fields.get("birth_date").and_then(value_str).and_then(|s| parse_date(&s));
        if let (Some(age), Some(birth)) = (fields.get("age").and_then(value_f64), birth_date) {
            checks += 1;
            let years = (chrono::Utc::now().date_naive() - birth).num_days() as f64 / 365.25;
            if (age - years).abs() > 1.0 {
                issues.push(QualityIssue::new(
                    QualityDimension::Consistency,
                    Severity::Medium,
                    "age",
                    "cross_field_mismatch",
                    format!("Stated age {} disagrees with birth_date ({:.1} years)", age, years),
                ));
            }
        }

        // Cross-field: BMI against weight and height, within one unit.
        if let (Some(bmi), Some(weight), Some(height_cm)) = (
            fields.get("bmi").and_then(value_f64),
            fields.get("weight_kg").and_then(value_f64),
            fields.get("height_cm").and_then(value_f64),
        ) {
            if height_cm > 0.0 {
                checks += 1;
                let height_m = height_cm / 100.0;
                let computed = weight / (height_m * height_m);
                if (bmi - computed).abs() > 1.0 {
                    issues.push(QualityIssue::new(
                        QualityDimension::Consistency,
                        Severity::Medium,
                        "bmi",
                        "cross_field_mismatch",
                        format!("Stated BMI {} disagrees with computed {:.1}", bmi, computed),
                    ));
                }
            }
        }

        // Temporal order: every other date must not precede birth_date.
        if let Some(birth) = fields.get("birth_date").and_then(value_str).and_then(|s| parse_date(&s)) {
            for (name, value) in fields {
                if name == "birth_date" || !name.to_lowercase().contains("date") {
                    continue;
                }
                if let Some(date) = value_str(value).and_then(|s| parse_date(&s)) {
                    checks += 1;
                    if date < birth {
                        issues.push(QualityIssue::new(
                            QualityDimension::Consistency,
                            Severity::High,
                            name,
                            "temporal_order",
                            format!("Field '{}' precedes birth_date", name),
                        ));
                    }
                }
            }
        }

        let score = if checks == 0 {
            1.0
        } else {
            1.0 - issues.len() as f64 / checks as f64
        };
        ConsistencyResult {
            score: score.clamp(0.0, 1.0),
            issues,
        }
    }
}

fn parse_date(text: &str) -> Option<chrono::NaiveDate> {
    let date_part = text.split(['T', ' ']).next()?;
    chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

// ---------------------------------------------------------------------------
// Outlier detection
// ---------------------------------------------------------------------------

/// Running distribution (Welford) for one numeric field.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FieldDistribution {
    pub count: u64,
    pub mean: f64,
    m2: f64,
    pub min: f64,
    pub max: f64,
}

impl FieldDistribution {
    fn update(&mut self, value: f64) {
        self.count += 1;
        if self.count == 1 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn stddev(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }
}

/// Minimum samples before the statistical rule activates.
const MIN_DISTRIBUTION_SAMPLES: u64 = 10;

/// Statistical (3-sigma) and domain-plausibility outlier detection.
#[derive(Default)]
pub struct OutlierDetector {
    distributions: Mutex<HashMap<String, FieldDistribution>>,
}

pub struct OutlierResult {
    pub score: f64,
    pub outlier_fields: Vec<String>,
    pub issues: Vec<QualityIssue>,
}

impl OutlierDetector {
    /// Feeds a batch of records into the running distributions.
    pub fn update_distributions<'a>(&self, batch: impl IntoIterator<Item = &'a HashMap<String, Value>>) {
        let mut distributions = self.distributions.lock();
        for fields in batch {
            for (name, value) in fields {
                if let Some(number) = value_f64(value) {
                    distributions.entry(name.clone()).or_default().update(number);
                }
            }
        }
    }

    pub fn distribution(&self, field: &str) -> Option<FieldDistribution> {
        self.distributions.lock().get(field).cloned()
    }

    pub fn detect(&self, fields: &HashMap<String, Value>) -> OutlierResult {
        let mut outlier_fields: Vec<String> = Vec::new();
        let mut issues = Vec::new();

        // Domain plausibility first.
        for (field, min, max) in LOGICAL_RANGES {
            if let Some(value) = fields.get(field).and_then(value_f64) {
                if value < min || value > max {
                    outlier_fields.push(field.to_string());
                    issues.push(QualityIssue::new(
                        QualityDimension::Outlier,
                        Severity::High,
                        field,
                        "domain_outlier",
                        format!("Field '{}' = {} is implausible for this domain", field, value),
                    ));
                }
            }
        }

        // Statistical rule: |x - mean| > 3 sigma.
        {
            let distributions = self.distributions.lock();
            for (name, value) in fields {
                if outlier_fields.iter().any(|f| f == name) {
                    continue;
                }
                let Some(number) = value_f64(value) else { continue };
                let Some(dist) = distributions.get(name) else { continue };
                if dist.count < MIN_DISTRIBUTION_SAMPLES {
                    continue;
                }
                let stddev = dist.stddev();
                if stddev > 0.0 && (number - dist.mean).abs() > 3.0 * stddev {
                    outlier_fields.push(name.clone());
                    issues.push(QualityIssue::new(
                        QualityDimension::Outlier,
                        Severity::Medium,
                        name,
                        "statistical_outlier",
                        format!(
                            "Field '{}' = {} deviates more than 3 sigma from mean {:.2}",
                            name, number, dist.mean
                        ),
                    ));
                }
            }
        }

        OutlierResult {
            score: (1.0 - 0.2 * outlier_fields.len() as f64).clamp(0.0, 1.0),
            outlier_fields,
            issues,
        }
    }
}

// ---------------------------------------------------------------------------
// Data usage
// ---------------------------------------------------------------------------

/// Records which fields downstream stages actually consumed.
#[derive(Default)]
pub struct UsageTracker {
    consumed: Mutex<HashSet<String>>,
}

impl UsageTracker {
    pub fn mark_consumed(&self, field: &str) {
        self.consumed.lock().insert(field.to_string());
    }

    pub fn consumed(&self) -> HashSet<String> {
        self.consumed.lock().clone()
    }
}

pub struct UsageResult {
    pub score: f64,
    pub unused_fields: Vec<String>,
    pub issues: Vec<QualityIssue>,
}

/// Unused-field penalties weighted by field importance.
#[derive(Default)]
pub struct DataUsageAnalyzer;

impl DataUsageAnalyzer {
    fn importance_penalty(field: &str) -> f64 {
        let lower = field.to_lowercase();
        if lower == "id" || lower.ends_with("_id") {
            0.10
        } else if lower.contains("name") || lower.contains("date") {
            0.05
        } else if lower.contains("note") || lower.contains("comment") {
            0.02
        } else {
            0.03
        }
    }

    pub fn score(&self, fields: &HashMap<String, Value>, usage: Option<&UsageTracker>) -> UsageResult {
        let mut unused_fields = Vec::new();
        let mut issues = Vec::new();
        let mut penalty = 0.0;

        match usage {
            Some(tracker) => {
                let consumed = tracker.consumed();
                for name in fields.keys() {
                    if !consumed.contains(name) {
                        penalty += Self::importance_penalty(name);
                        unused_fields.push(name.clone());
                        issues.push(QualityIssue::new(
                            QualityDimension::DataUsage,
                            Severity::Low,
                            name,
                            "unused_field",
                            format!("Field '{}' was never consumed downstream", name),
                        ));
                    }
                }
            }
            None => {
                // Without tracking context, penalize obviously redundant
                // names and fields whose value carries no usable data.
                for (name, value) in fields {
                    let lower = name.to_lowercase();
                    if lower.starts_with("temp_") || lower.starts_with("debug_") {
                        penalty += 0.05;
                        unused_fields.push(name.clone());
                        issues.push(QualityIssue::new(
                            QualityDimension::DataUsage,
                            Severity::Low,
                            name,
                            "likely_redundant",
                            format!("Field '{}' looks like scratch data", name),
                        ));
                    } else if !is_present(Some(value)) {
                        penalty += Self::importance_penalty(name);
                        unused_fields.push(name.clone());
                        issues.push(QualityIssue::new(
                            QualityDimension::DataUsage,
                            Severity::Low,
                            name,
                            "unusable_field",
                            format!("Field '{}' carries no usable data", name),
                        ));
                    }
                }
            }
        }

        UsageResult {
            score: (1.0 - penalty).clamp(0.0, 1.0),
            unused_fields,
            issues,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Distribution buckets for aggregate reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScoreDistribution {
    /// overall >= 0.9
    pub excellent: usize,
    /// 0.8 <= overall < 0.9
    pub good: usize,
    /// 0.7 <= overall < 0.8
    pub fair: usize,
    /// overall < 0.7
    pub poor: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssueFrequency {
    pub issue_type: String,
    pub count: usize,
    pub percentage: f64,
}

/// Aggregate quality report over a batch of metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QualityReport {
    pub total_records: usize,
    pub scored_records: usize,
    pub avg_overall: f64,
    pub distribution: ScoreDistribution,
    pub top_issues: Vec<IssueFrequency>,
}

/// The scoring engine; one instance per pipeline run.
pub struct QualityScorer {
    config: QualityScoringConfig,
    weights: QualityWeights,
    completeness: CompletenessScorer,
    consistency: ConsistencyScorer,
    outliers: OutlierDetector,
    usage_analyzer: DataUsageAnalyzer,
    usage_tracker: Option<UsageTracker>,
}

impl QualityScorer {
    pub fn new(config: QualityScoringConfig) -> Self {
        let weights = QualityWeights::default();
        debug_assert!((weights.sum() - 1.0).abs() < 1e-9);
        Self {
            config,
            weights,
            completeness: CompletenessScorer::default(),
            consistency: ConsistencyScorer,
            outliers: OutlierDetector::default(),
            usage_analyzer: DataUsageAnalyzer,
            usage_tracker: None,
        }
    }

    /// Attaches a usage-tracking context for the data-usage dimension.
    pub fn with_usage_tracker(mut self, tracker: UsageTracker) -> Self {
        self.usage_tracker = Some(tracker);
        self
    }

    pub fn outlier_detector(&self) -> &OutlierDetector {
        &self.outliers
    }

    /// Scores one record into a quality metric.
    pub fn score_record(
        &self,
        pipeline_run_id: &str,
        record_id: Option<String>,
        record_type: &str,
        fields: &HashMap<String, Value>,
    ) -> QualityMetric {
        let mut metric = QualityMetric::placeholder(pipeline_run_id, record_id);
        metric.record_type = Some(record_type.to_string());
        metric.sampled = true;

        let completeness = if self.config.completeness_scoring {
            self.completeness.score(record_type, fields)
        } else {
            CompletenessResult {
                score: 1.0,
                missing_fields: Vec::new(),
                issues: Vec::new(),
            }
        };

        let consistency = if self.config.consistency_checks {
            self.consistency.score(fields)
        } else {
            ConsistencyResult {
                score: 1.0,
                issues: Vec::new(),
            }
        };

        // Validity: schema-level soundness, derived from the validation
        // class of issues (format mismatches and missing/empty/placeholder
        // required fields). High-severity violations deduct double.
        const VALIDITY_ISSUE_TYPES: [&str; 4] =
            ["format_mismatch", "missing_required", "empty_field", "placeholder_value"];
        let validity_deduction: f64 = completeness
            .issues
            .iter()
            .chain(consistency.issues.iter())
            .filter(|i| VALIDITY_ISSUE_TYPES.contains(&i.issue_type.as_str()))
            .map(|i| if i.severity >= Severity::High { 0.2 } else { 0.1 })
            .sum();
        let validity_score = (1.0 - validity_deduction).clamp(0.0, 1.0);
        let invalid_fields: Vec<String> = consistency
            .issues
            .iter()
            .filter(|i| i.issue_type == "format_mismatch")
            .map(|i| i.field_name.clone())
            .collect();

        // Accuracy: placeholder and test-value detection.
        let mut accuracy_issues = Vec::new();
        let mut offenders = 0usize;
        for (name, value) in fields {
            let offender = if value.is_null() {
                true
            } else {
                match value_str(value) {
                    Some(text) => {
                        let lower = text.to_lowercase();
                        TEST_VALUES.contains(&lower.as_str()) || PLACEHOLDER_VALUES.contains(&lower.as_str())
                    }
                    None => false,
                }
            };
            if offender {
                offenders += 1;
                accuracy_issues.push(QualityIssue::new(
                    QualityDimension::Accuracy,
                    Severity::Low,
                    name,
                    "test_value",
                    format!("Field '{}' holds a placeholder or test value", name),
                ));
            }
        }
        let accuracy_score = (1.0 - 0.05 * offenders as f64).clamp(0.0, 1.0);

        let outliers = if self.config.outlier_detection {
            self.outliers.detect(fields)
        } else {
            OutlierResult {
                score: 1.0,
                outlier_fields: Vec::new(),
                issues: Vec::new(),
            }
        };

        let usage = self.usage_analyzer.score(fields, self.usage_tracker.as_ref());

        metric.completeness_score = completeness.score.clamp(0.0, 1.0);
        metric.consistency_score = consistency.score;
        metric.validity_score = validity_score;
        metric.accuracy_score = accuracy_score;
        metric.outlier_score = outliers.score;
        metric.data_usage_score = usage.score;

        let overall = metric.completeness_score * self.weights.completeness
            + metric.consistency_score * self.weights.consistency
            + metric.validity_score * self.weights.validity
            + metric.accuracy_score * self.weights.accuracy
            + metric.outlier_score * self.weights.outlier
            + metric.data_usage_score * self.weights.data_usage;
        metric.overall_score = overall.clamp(0.0, 1.0);

        metric.missing_fields = completeness.missing_fields;
        metric.invalid_fields = invalid_fields;
        metric.outlier_fields = outliers.outlier_fields;
        metric.unused_fields = usage.unused_fields;

        metric.issues = completeness
            .issues
            .into_iter()
            .chain(consistency.issues)
            .chain(accuracy_issues)
            .chain(outliers.issues)
            .chain(usage.issues)
            .collect();

        metric
    }

    /// Scores a batch with sampling. Non-sampled records receive a
    /// placeholder metric with `sampled = false`.
    pub fn score_batch(
        &self,
        pipeline_run_id: &str,
        records: &[(Option<String>, String, HashMap<String, Value>)],
    ) -> Vec<QualityMetric> {
        let rate = self.config.sampling_rate.clamp(0.0, 1.0);
        let mut rng = rand::rng();
        records
            .iter()
            .map(|(record_id, record_type, fields)| {
                let include = rate >= 1.0 || (rate > 0.0 && rng.random::<f64>() < rate);
                if include {
                    self.score_record(pipeline_run_id, record_id.clone(), record_type, fields)
                } else {
                    QualityMetric::placeholder(pipeline_run_id, record_id.clone())
                }
            })
            .collect()
    }

    /// Aggregate report: distribution buckets and most common issues.
    pub fn aggregate_report(metrics: &[QualityMetric], top_n: usize) -> QualityReport {
        let mut report = QualityReport {
            total_records: metrics.len(),
            ..Default::default()
        };

        let mut issue_counts: HashMap<String, usize> = HashMap::new();
        let mut overall_sum = 0.0;

        for metric in metrics.iter().filter(|m| m.sampled) {
            report.scored_records += 1;
            overall_sum += metric.overall_score;
            match metric.overall_score {
                s if s >= 0.9 => report.distribution.excellent += 1,
                s if s >= 0.8 => report.distribution.good += 1,
                s if s >= 0.7 => report.distribution.fair += 1,
                _ => report.distribution.poor += 1,
            }
            for issue in &metric.issues {
                *issue_counts.entry(issue.issue_type.clone()).or_insert(0) += 1;
            }
        }

        if report.scored_records > 0 {
            report.avg_overall = overall_sum / report.scored_records as f64;
        }

        let total_issues: usize = issue_counts.values().sum();
        let mut ranked: Vec<(String, usize)> = issue_counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        report.top_issues = ranked
            .into_iter()
            .take(top_n)
            .map(|(issue_type, count)| IssueFrequency {
                issue_type,
                count,
                percentage: if total_issues == 0 {
                    0.0
                } else {
                    count as f64 / total_issues as f64 * 100.0
                },
            })
            .collect();

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn scorer() -> QualityScorer {
        QualityScorer::new(QualityScoringConfig::default())
    }

    fn complete_patient() -> HashMap<String, Value> {
        fields(&[
            ("id", json!("patient_001")),
            ("name", json!("John Doe")),
            ("birth_date", json!("1985-03-15")),
            ("age", json!(40)),
            ("gender", json!("male")),
            ("email", json!("john.doe@example.com")),
            ("phone", json!("555-123-4567")),
            ("address", json!("123 Main St")),
            ("weight_kg", json!(75.5)),
            ("height_cm", json!(180)),
            ("bmi", json!(23.3)),
        ])
    }

    #[test]
    fn test_complete_patient_scores_high() {
        let scorer = scorer();
        let metric = scorer.score_record("run-1", Some("p1".into()), "patient", &complete_patient());
        assert!(metric.scores_in_bounds());
        assert!(metric.overall_score > 0.9, "overall was {}", metric.overall_score);
        assert!(metric.missing_fields.is_empty());
    }

    #[test]
    fn test_incomplete_patient_scores_low() {
        let scorer = scorer();
        let record = fields(&[
            ("id", json!("p2")),
            ("name", json!("")),
            ("birth_date", Value::Null),
            ("email", json!("invalid-email")),
        ]);
        let metric = scorer.score_record("run-1", Some("p2".into()), "patient", &record);

        assert!(metric.overall_score < 0.5, "overall was {}", metric.overall_score);
        assert!(metric.missing_fields.contains(&"birth_date".to_string()));
        assert!(metric
            .issues
            .iter()
            .any(|i| i.issue_type == "missing_required" && i.severity == Severity::High));
        assert!(metric
            .issues
            .iter()
            .any(|i| i.issue_type == "format_mismatch" && i.field_name == "email"));
        assert!(metric.invalid_fields.contains(&"email".to_string()));
    }

    #[test]
    fn test_overall_is_weighted_sum_of_dimensions() {
        let scorer = scorer();
        let metric = scorer.score_record("run-1", None, "patient", &complete_patient());
        let weights = QualityWeights::default();
        let expected = metric.completeness_score * weights.completeness
            + metric.consistency_score * weights.consistency
            + metric.validity_score * weights.validity
            + metric.accuracy_score * weights.accuracy
            + metric.outlier_score * weights.outlier
            + metric.data_usage_score * weights.data_usage;
        assert!((metric.overall_score - expected.clamp(0.0, 1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_weights_sum_to_one() {
        assert!((QualityWeights::default().sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_domain_outliers_detected() {
        let scorer = scorer();
        let record = fields(&[
            ("id", json!("p3")),
            ("name", json!("Jane Smith")),
            ("birth_date", json!("1990-01-01")),
            ("gender", json!("female")),
            ("age", json!(250)),
            ("heart_rate", json!(500)),
            ("temperature_celsius", json!(60)),
        ]);
        let metric = scorer.score_record("run-1", Some("p3".into()), "patient", &record);

        assert!(metric.outlier_fields.contains(&"age".to_string()));
        assert!(metric.outlier_fields.contains(&"heart_rate".to_string()));
        assert!(metric.outlier_fields.contains(&"temperature_celsius".to_string()));
        assert!(metric.outlier_score < 0.5);
    }

    #[test]
    fn test_statistical_outlier_after_distribution_update() {
        let scorer = scorer();
        let batch: Vec<HashMap<String, Value>> = (0..20)
            .map(|i| fields(&[("glucose", json!(90.0 + (i % 5) as f64))]))
            .collect();
        scorer.outlier_detector().update_distributions(batch.iter());

        let record = fields(&[("id", json!("p4")), ("glucose", json!(400.0))]);
        let metric = scorer.score_record("run-1", None, "patient", &record);
        assert!(metric.outlier_fields.contains(&"glucose".to_string()));
        assert!(metric
            .issues
            .iter()
            .any(|i| i.issue_type == "statistical_outlier"));
    }

    #[test]
    fn test_temporal_order_violation() {
        let scorer = scorer();
        let record = fields(&[
            ("id", json!("p5")),
            ("name", json!("A")),
            ("gender", json!("other")),
            ("birth_date", json!("1990-06-01")),
            ("admission_date", json!("1985-01-01")),
        ]);
        let metric = scorer.score_record("run-1", None, "patient", &record);
        assert!(metric.issues.iter().any(|i| i.issue_type == "temporal_order"));
    }

    #[test]
    fn test_test_values_lower_accuracy() {
        let scorer = scorer();
        let record = fields(&[
            ("id", json!("p6")),
            ("name", json!("test")),
            ("birth_date", json!("1990-06-01")),
            ("gender", json!("dummy")),
        ]);
        let metric = scorer.score_record("run-1", None, "patient", &record);
        assert!((metric.accuracy_score - 0.9).abs() < 1e-9);
        assert_eq!(metric.issues.iter().filter(|i| i.issue_type == "test_value").count(), 2);
    }

    #[test]
    fn test_redundant_fields_without_usage_context() {
        let scorer = scorer();
        let record = fields(&[
            ("id", json!("p7")),
            ("temp_buffer", json!("x")),
            ("debug_flags", json!("y")),
        ]);
        let metric = scorer.score_record("run-1", None, "patient", &record);
        assert_eq!(metric.unused_fields.len(), 2);
        assert!((metric.data_usage_score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_usage_tracker_penalizes_unconsumed() {
        let tracker = UsageTracker::default();
        tracker.mark_consumed("id");
        let scorer = scorer().with_usage_tracker(tracker);

        let record = fields(&[("id", json!("p8")), ("patient_id", json!("p8")), ("notes", json!("n"))]);
        let metric = scorer.score_record("run-1", None, "patient", &record);
        assert!(metric.unused_fields.contains(&"patient_id".to_string()));
        assert!(metric.unused_fields.contains(&"notes".to_string()));
        assert!(!metric.unused_fields.contains(&"id".to_string()));
    }

    #[test]
    fn test_sampling_rate_zero_and_one() {
        let mut config = QualityScoringConfig::default();
        config.sampling_rate = 0.0;
        let scorer_zero = QualityScorer::new(config.clone());
        let records: Vec<(Option<String>, String, HashMap<String, Value>)> = (0..10)
            .map(|i| (Some(format!("r{}", i)), "patient".to_string(), complete_patient()))
            .collect();
        let metrics = scorer_zero.score_batch("run-1", &records);
        assert!(metrics.iter().all(|m| !m.sampled));

        config.sampling_rate = 1.0;
        let scorer_one = QualityScorer::new(config);
        let metrics = scorer_one.score_batch("run-1", &records);
        assert!(metrics.iter().all(|m| m.sampled));
    }

    #[test]
    fn test_sampling_rate_half_is_statistical() {
        let mut config = QualityScoringConfig::default();
        config.sampling_rate = 0.5;
        let scorer = QualityScorer::new(config);
        let records: Vec<(Option<String>, String, HashMap<String, Value>)> = (0..2000)
            .map(|i| (Some(format!("r{}", i)), "patient".to_string(), complete_patient()))
            .collect();
        let sampled = scorer
            .score_batch("run-1", &records)
            .iter()
            .filter(|m| m.sampled)
            .count();
        // 0.5 over 2000 records: allow a generous statistical tolerance.
        assert!((700..=1300).contains(&sampled), "sampled {}", sampled);
    }

    #[test]
    fn test_aggregate_report_buckets_and_top_issues() {
        let scorer = scorer();
        let good = scorer.score_record("run-1", None, "patient", &complete_patient());
        let poor = scorer.score_record(
            "run-1",
            None,
            "patient",
            &fields(&[("id", json!("p")), ("email", json!("nope"))]),
        );
        let placeholder = QualityMetric::placeholder("run-1", None);

        let report = QualityScorer::aggregate_report(&[good, poor, placeholder], 3);
        assert_eq!(report.total_records, 3);
        assert_eq!(report.scored_records, 2);
        assert_eq!(report.distribution.poor, 1);
        assert!(!report.top_issues.is_empty());
        let pct: f64 = report.top_issues.iter().map(|i| i.percentage).sum();
        assert!(pct <= 100.0 + 1e-9);
    }
}
