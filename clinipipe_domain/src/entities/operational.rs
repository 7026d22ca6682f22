// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Operational Content Model
//!
//! Normalized form of operational (billing/administrative) transactions
//! extracted from X12 interchanges: claims, charges, payments, adjustments
//! and prior authorizations.
//!
//! [`MessageCache`] is the mutable scratch state threaded through the
//! segment mappers of a single interchange: identifiers discovered early
//! (patient, payer, claim) are cached so later segments can reference them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Normalized contents of one parsed interchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationalContent {
    pub transaction_type: String,
    pub interchange_control_number: String,
    pub functional_group_control_number: String,
    pub organization_id: String,
    pub claims: Vec<Claim>,
    pub charges: Vec<Charge>,
    pub payments: Vec<Payment>,
    pub adjustments: Vec<Adjustment>,
    pub prior_authorizations: Vec<PriorAuthorization>,
}

impl OperationalContent {
    /// Sentinel content for empty input.
    pub fn unknown() -> Self {
        Self {
            transaction_type: "UNKNOWN".to_string(),
            interchange_control_number: "UNKNOWN".to_string(),
            functional_group_control_number: "UNKNOWN".to_string(),
            organization_id: "UNKNOWN".to_string(),
            ..Default::default()
        }
    }

    /// Sentinel content for fundamentally unparseable input.
    pub fn error() -> Self {
        Self {
            transaction_type: "ERROR".to_string(),
            interchange_control_number: "ERROR".to_string(),
            functional_group_control_number: "ERROR".to_string(),
            organization_id: "UNKNOWN".to_string(),
            ..Default::default()
        }
    }

    /// Total number of extracted operational entities.
    pub fn entity_count(&self) -> usize {
        self.claims.len()
            + self.charges.len()
            + self.payments.len()
            + self.adjustments.len()
            + self.prior_authorizations.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub claim_id: String,
    pub patient_id: Option<String>,
    pub encounter_id: Option<String>,
    pub claim_date: Option<DateTime<Utc>>,
    pub payer_id: Option<String>,
    pub total_charge_amount: f64,
    pub total_payment_amount: f64,
    pub claim_status: String,
    pub claim_type: Option<String>,
    pub service_start_date: Option<DateTime<Utc>>,
    pub service_end_date: Option<DateTime<Utc>>,
    pub organization_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Charge {
    pub charge_id: String,
    pub encounter_id: Option<String>,
    pub patient_id: Option<String>,
    pub service_date: Option<DateTime<Utc>>,
    pub charge_code: String,
    pub charge_description: Option<String>,
    pub charge_amount: f64,
    pub quantity: Option<i64>,
    pub performing_provider_id: Option<String>,
    pub revenue_code: Option<String>,
    pub charge_status: String,
    pub organization_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: String,
    pub claim_id: Option<String>,
    pub patient_id: Option<String>,
    pub payment_date: Option<DateTime<Utc>>,
    pub payment_amount: f64,
    pub payer_id: Option<String>,
    pub organization_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub adjustment_id: String,
    pub charge_id: Option<String>,
    pub payment_id: Option<String>,
    pub adjustment_date: Option<DateTime<Utc>>,
    pub adjustment_reason_code: String,
    pub adjustment_reason_description: Option<String>,
    pub adjustment_amount: f64,
    /// X12 CAS group code (CO, PR, OA, PI).
    pub adjustment_type: String,
    pub organization_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriorAuthorization {
    pub auth_id: String,
    pub patient_id: Option<String>,
    pub provider_id: Option<String>,
    pub requested_procedure: Option<String>,
    pub auth_type: Option<String>,
    pub review_status: Option<String>,
    pub service_dates: Vec<DateTime<Utc>>,
    pub diagnosis_codes: Vec<String>,
    pub organization_id: Option<String>,
}

/// Hierarchy entry cached from HL segments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HierarchyNode {
    pub parent: Option<String>,
    pub code: Option<String>,
}

/// Mutable scratch state shared by the segment mappers of one interchange.
#[derive(Debug, Clone, Default)]
pub struct MessageCache {
    pub claim_id: Option<String>,
    pub patient_id: Option<String>,
    pub encounter_id: Option<String>,
    pub payer_id: Option<String>,
    pub rendering_provider_id: Option<String>,
    pub last_charge_id: Option<String>,
    pub last_auth_id: Option<String>,
    pub hl_id: Option<String>,
    pub hl_parent: Option<String>,
    pub hl_code: Option<String>,
    pub hl_hierarchy: HashMap<String, HierarchyNode>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_contents() {
        let unknown = OperationalContent::unknown();
        assert_eq!(unknown.transaction_type, "UNKNOWN");
        assert_eq!(unknown.entity_count(), 0);

        let error = OperationalContent::error();
        assert_eq!(error.transaction_type, "ERROR");
        assert_eq!(error.interchange_control_number, "ERROR");
    }

    #[test]
    fn test_cache_hierarchy_insert() {
        let mut cache = MessageCache::default();
        cache.hl_hierarchy.insert(
            "1".into(),
            HierarchyNode {
                parent: None,
                code: Some("20".into()),
            },
        );
        assert_eq!(cache.hl_hierarchy["1"].code.as_deref(), Some("20"));
    }
}
