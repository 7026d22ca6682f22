// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # X12 Segment Mappers
//!
//! Each mapper handles one segment id and folds its elements into the
//! operational content, using the message cache for identifiers discovered
//! earlier in the interchange:
//!
//! - `CLP` — claim payment information (835)
//! - `CAS` — adjustment triplets (group code, reason, amount)
//! - `NM1` — entity names; caches patient/provider/payer ids
//! - `HL`  — hierarchy levels; caches the hierarchy tree
//! - `PLB` — provider-level adjustments, mapped as posted charges
//! - `UM`  — prior-authorization review information (278)

use chrono::Utc;
use tracing::debug;

use clinipipe_domain::entities::{
    Adjustment, Charge, Claim, HierarchyNode, MessageCache, OperationalContent, PriorAuthorization,
};
use clinipipe_domain::PipelineError;

use super::decimal::parse_x12_money;

/// One registered segment handler.
pub trait SegmentMapper: Send + Sync {
    /// True when this mapper handles the segment id.
    fn accepts(&self, segment_id: &str) -> bool;

    /// Folds the segment's elements into the content.
    fn map(
        &self,
        segment_id: &str,
        elements: &[&str],
        content: &mut OperationalContent,
        cache: &mut MessageCache,
    ) -> Result<(), PipelineError>;

    /// Mapper name for dispatch logging.
    fn name(&self) -> &'static str;
}

fn element<'a>(elements: &'a [&str], index: usize) -> Option<&'a str> {
    elements.get(index).map(|e| e.trim()).filter(|e| !e.is_empty())
}

/// CLP: claim payment information.
pub struct ClpMapper;

impl SegmentMapper for ClpMapper {
    fn accepts(&self, segment_id: &str) -> bool {
        segment_id == "CLP"
    }

    fn map(
        &self,
        _segment_id: &str,
        elements: &[&str],
        content: &mut OperationalContent,
        cache: &mut MessageCache,
    ) -> Result<(), PipelineError> {
        let claim_id = element(elements, 0)
            .ok_or_else(|| PipelineError::parse("CLP segment missing claim id (CLP01)"))?
            .to_string();

        // Status codes 3 and 4 both normalize to "adjusted"; see the
        // open-question decisions in DESIGN.md.
        let claim_status = match element(elements, 1) {
            Some("1") => "accepted",
            Some("2") => "denied",
            Some("3") | Some("4") => "adjusted",
            _ => "submitted",
        };

        let claim = Claim {
            claim_id: claim_id.clone(),
            patient_id: cache.patient_id.clone(),
            payer_id: cache.payer_id.clone(),
            total_charge_amount: element(elements, 2).map(parse_x12_money).unwrap_or(0.0),
            total_payment_amount: element(elements, 3).map(parse_x12_money).unwrap_or(0.0),
            claim_status: claim_status.to_string(),
            ..Default::default()
        };
        content.claims.push(claim);
        cache.claim_id = Some(claim_id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ClpMapper"
    }
}

/// CAS: claim/service adjustments in (group, reason, amount) triplets.
pub struct CasMapper;

impl SegmentMapper for CasMapper {
    fn accepts(&self, segment_id: &str) -> bool {
        segment_id == "CAS"
    }

    fn map(
        &self,
        _segment_id: &str,
        elements: &[&str],
        content: &mut OperationalContent,
        cache: &mut MessageCache,
    ) -> Result<(), PipelineError> {
        let mut i = 0;
        while i + 2 < elements.len() {
            let group_code = elements[i].trim();
            let reason_code = elements[i + 1].trim();
            let amount = parse_x12_money(elements[i + 2]);

            content.adjustments.push(Adjustment {
                adjustment_id: format!(
                    "{}_{}",
                    cache.claim_id.as_deref().unwrap_or("unknown"),
                    content.adjustments.len() + 1
                ),
                charge_id: cache.last_charge_id.clone(),
                adjustment_reason_code: reason_code.to_string(),
                adjustment_amount: amount,
                adjustment_type: group_code.to_string(),
                ..Default::default()
            });
            i += 3;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "CasMapper"
    }
}

/// NM1: entity names. Caches identifiers by entity qualifier.
pub struct Nm1Mapper;

impl SegmentMapper for Nm1Mapper {
    fn accepts(&self, segment_id: &str) -> bool {
        segment_id == "NM1"
    }

    fn map(
        &self,
        _segment_id: &str,
        elements: &[&str],
        _content: &mut OperationalContent,
        cache: &mut MessageCache,
    ) -> Result<(), PipelineError> {
        let entity_id = element(elements, 0).unwrap_or_default();
        let identifier = element(elements, 8).map(str::to_string);
        match entity_id {
            // QC: patient
            "QC" => cache.patient_id = identifier,
            // 82: rendering provider
            "82" => cache.rendering_provider_id = identifier,
            // PR: payer
            "PR" => cache.payer_id = identifier,
            _ => {}
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Nm1Mapper"
    }
}

/// HL: hierarchy level; tracks the parent/child tree for the interchange.
pub struct HlMapper;

impl SegmentMapper for HlMapper {
    fn accepts(&self, segment_id: &str) -> bool {
        segment_id == "HL"
    }

    fn map(
        &self,
        _segment_id: &str,
        elements: &[&str],
        _content: &mut OperationalContent,
        cache: &mut MessageCache,
    ) -> Result<(), PipelineError> {
        let hl_id = element(elements, 0)
            .ok_or_else(|| PipelineError::parse("HL segment missing id (HL01)"))?
            .to_string();
        let parent = element(elements, 1).map(str::to_string);
        let code = element(elements, 2).map(str::to_string);

        cache.hl_id = Some(hl_id.clone());
        cache.hl_parent = parent.clone();
        cache.hl_code = code.clone();
        cache.hl_hierarchy.insert(hl_id.clone(), HierarchyNode { parent, code });
        debug!(hl_id = %hl_id, "HL hierarchy level cached");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "HlMapper"
    }
}

/// PLB: provider-level adjustments, posted as charges.
pub struct PlbMapper;

impl SegmentMapper for PlbMapper {
    fn accepts(&self, segment_id: &str) -> bool {
        segment_id == "PLB"
    }

    fn map(
        &self,
        _segment_id: &str,
        elements: &[&str],
        content: &mut OperationalContent,
        cache: &mut MessageCache,
    ) -> Result<(), PipelineError> {
        let charge_code = element(elements, 0)
            .ok_or_else(|| PipelineError::parse("PLB segment missing provider id (PLB01)"))?;

        let charge = Charge {
            charge_id: format!(
                "{}_{}",
                cache.claim_id.as_deref().unwrap_or("unknown"),
                content.charges.len() + 1
            ),
            patient_id: cache.patient_id.clone(),
            charge_code: charge_code.to_string(),
            charge_amount: element(elements, 1).map(parse_x12_money).unwrap_or(0.0),
            quantity: element(elements, 3).and_then(|q| q.parse().ok()),
            charge_status: "posted".to_string(),
            ..Default::default()
        };
        cache.last_charge_id = Some(charge.charge_id.clone());
        content.charges.push(charge);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "PlbMapper"
    }
}

/// UM: health care services review, mapped as a prior authorization.
pub struct UmMapper;

impl SegmentMapper for UmMapper {
    fn accepts(&self, segment_id: &str) -> bool {
        segment_id == "UM"
    }

    fn map(
        &self,
        _segment_id: &str,
        elements: &[&str],
        content: &mut OperationalContent,
        cache: &mut MessageCache,
    ) -> Result<(), PipelineError> {
        let auth_id = element(elements, 0)
            .map(str::to_string)
            .unwrap_or_else(|| format!("UM_{}", content.prior_authorizations.len() + 1));

        let auth = PriorAuthorization {
            auth_id: auth_id.clone(),
            patient_id: cache.patient_id.clone(),
            provider_id: cache.rendering_provider_id.clone(),
            auth_type: element(elements, 1).map(str::to_string),
            review_status: element(elements, 2).map(str::to_string),
            service_dates: vec![Utc::now()],
            ..Default::default()
        };
        content.prior_authorizations.push(auth);
        cache.last_auth_id = Some(auth_id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "UmMapper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatch(mapper: &dyn SegmentMapper, elements: &[&str]) -> (OperationalContent, MessageCache) {
        let mut content = OperationalContent::unknown();
        let mut cache = MessageCache::default();
        mapper.map("X", elements, &mut content, &mut cache).unwrap();
        (content, cache)
    }

    #[test]
    fn test_clp_claim_mapping() {
        let (content, cache) = dispatch(&ClpMapper, &["123", "4", "1500", "1200"]);
        let claim = &content.claims[0];
        assert_eq!(claim.claim_id, "123");
        assert_eq!(claim.claim_status, "adjusted");
        assert!((claim.total_charge_amount - 15.00).abs() < 1e-9);
        assert!((claim.total_payment_amount - 12.00).abs() < 1e-9);
        assert_eq!(cache.claim_id.as_deref(), Some("123"));
    }

    #[test]
    fn test_clp_status_code_table() {
        for (code, expected) in [("1", "accepted"), ("2", "denied"), ("3", "adjusted"), ("4", "adjusted")] {
            let (content, _) = dispatch(&ClpMapper, &["9", code, "100", "0"]);
            assert_eq!(content.claims[0].claim_status, expected, "CLP02 {}", code);
        }
    }

    #[test]
    fn test_clp_unknown_status_defaults_to_submitted() {
        let (content, _) = dispatch(&ClpMapper, &["9", "7", "100", "0"]);
        assert_eq!(content.claims[0].claim_status, "submitted");
    }

    #[test]
    fn test_cas_triplets() {
        let mut content = OperationalContent::unknown();
        let mut cache = MessageCache::default();
        cache.claim_id = Some("123".into());
        CasMapper
            .map("CAS", &["CO", "45", "500", "PR", "1", "2500"], &mut content, &mut cache)
            .unwrap();

        assert_eq!(content.adjustments.len(), 2);
        assert_eq!(content.adjustments[0].adjustment_type, "CO");
        assert_eq!(content.adjustments[0].adjustment_reason_code, "45");
        assert!((content.adjustments[0].adjustment_amount - 5.00).abs() < 1e-9);
        assert_eq!(content.adjustments[1].adjustment_id, "123_2");
        assert!((content.adjustments[1].adjustment_amount - 25.00).abs() < 1e-9);
    }

    #[test]
    fn test_nm1_entity_caching() {
        let mut content = OperationalContent::unknown();
        let mut cache = MessageCache::default();
        Nm1Mapper
            .map(
                "NM1",
                &["QC", "1", "DOE", "JANE", "", "", "", "MI", "PATIENT123"],
                &mut content,
                &mut cache,
            )
            .unwrap();
        assert_eq!(cache.patient_id.as_deref(), Some("PATIENT123"));

        Nm1Mapper
            .map(
                "NM1",
                &["PR", "2", "ACME HEALTH", "", "", "", "", "PI", "PAYER9"],
                &mut content,
                &mut cache,
            )
            .unwrap();
        assert_eq!(cache.payer_id.as_deref(), Some("PAYER9"));
    }

    #[test]
    fn test_hl_hierarchy_tracking() {
        let mut content = OperationalContent::unknown();
        let mut cache = MessageCache::default();
        HlMapper.map("HL", &["1", "", "20", "1"], &mut content, &mut cache).unwrap();
        HlMapper.map("HL", &["2", "1", "21", "1"], &mut content, &mut cache).unwrap();

        assert_eq!(cache.hl_id.as_deref(), Some("2"));
        assert_eq!(cache.hl_hierarchy["2"].parent.as_deref(), Some("1"));
        assert_eq!(cache.hl_hierarchy["1"].code.as_deref(), Some("20"));
    }

    #[test]
    fn test_plb_charge_posting() {
        let mut content = OperationalContent::unknown();
        let mut cache = MessageCache::default();
        cache.claim_id = Some("123".into());
        PlbMapper
            .map("PLB", &["PROV1", "2500", "", "2"], &mut content, &mut cache)
            .unwrap();

        let charge = &content.charges[0];
        assert_eq!(charge.charge_id, "123_1");
        assert_eq!(charge.charge_code, "PROV1");
        assert!((charge.charge_amount - 25.00).abs() < 1e-9);
        assert_eq!(charge.quantity, Some(2));
        assert_eq!(charge.charge_status, "posted");
        assert_eq!(cache.last_charge_id.as_deref(), Some("123_1"));
    }

    #[test]
    fn test_um_prior_authorization() {
        let mut content = OperationalContent::unknown();
        let mut cache = MessageCache::default();
        cache.patient_id = Some("PATIENT123".into());
        UmMapper
            .map("UM", &["AUTH77", "HS", "I"], &mut content, &mut cache)
            .unwrap();

        let auth = &content.prior_authorizations[0];
        assert_eq!(auth.auth_id, "AUTH77");
        assert_eq!(auth.auth_type.as_deref(), Some("HS"));
        assert_eq!(auth.review_status.as_deref(), Some("I"));
        assert_eq!(auth.patient_id.as_deref(), Some("PATIENT123"));
        assert_eq!(cache.last_auth_id.as_deref(), Some("AUTH77"));
    }
}
