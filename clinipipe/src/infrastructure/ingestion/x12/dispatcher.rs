// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # X12 Dispatcher
//!
//! Splits one interchange into segments and routes each segment to the
//! first registered mapper that accepts it. Registration order is the
//! tie-break when multiple mappers accept a segment id: first wins.
//!
//! Mapper faults are logged with the segment id and mapper name and the
//! dispatch loop continues; a malformed segment never aborts the
//! interchange. Empty input yields the `UNKNOWN` sentinel content and a
//! fundamentally unparseable interchange yields the `ERROR` sentinel.

use tracing::{debug, error, warn};

use clinipipe_domain::entities::{MessageCache, OperationalContent};

use super::mappers::{CasMapper, ClpMapper, HlMapper, Nm1Mapper, PlbMapper, SegmentMapper, UmMapper};

/// Ordered mapper registry; first accepting mapper wins.
pub struct MapperRegistry {
    mappers: Vec<Box<dyn SegmentMapper>>,
}

impl MapperRegistry {
    /// Empty registry for custom mapper sets.
    pub fn new() -> Self {
        Self { mappers: Vec::new() }
    }

    /// Registry with the bundled mappers in their canonical order.
    pub fn with_default_mappers() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ClpMapper));
        registry.register(Box::new(CasMapper));
        registry.register(Box::new(Nm1Mapper));
        registry.register(Box::new(HlMapper));
        registry.register(Box::new(PlbMapper));
        registry.register(Box::new(UmMapper));
        registry
    }

    /// Appends a mapper. Later registrations never shadow earlier ones
    /// for segment ids both accept.
    pub fn register(&mut self, mapper: Box<dyn SegmentMapper>) {
        self.mappers.push(mapper);
    }

    fn find(&self, segment_id: &str) -> Option<&dyn SegmentMapper> {
        self.mappers.iter().find(|m| m.accepts(segment_id)).map(|m| m.as_ref())
    }

    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }
}

impl Default for MapperRegistry {
    fn default() -> Self {
        Self::with_default_mappers()
    }
}

/// Parses X12 interchanges into operational content.
pub struct X12Dispatcher {
    registry: MapperRegistry,
}

impl X12Dispatcher {
    pub fn new() -> Self {
        Self {
            registry: MapperRegistry::with_default_mappers(),
        }
    }

    pub fn with_registry(registry: MapperRegistry) -> Self {
        Self { registry }
    }

    /// Parses one interchange. Never fails: malformed input produces the
    /// `ERROR` sentinel and empty input the `UNKNOWN` sentinel.
    pub fn parse(&self, raw_data: &str) -> OperationalContent {
        if raw_data.trim().is_empty() {
            warn!("empty X12 data received, returning sentinel content");
            return OperationalContent::unknown();
        }

        let segments: Vec<&str> = raw_data
            .trim()
            .split('~')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if segments.is_empty() {
            error!("no segments found in X12 data");
            return OperationalContent::error();
        }

        let mut content = self.detect_transaction(&segments);
        let mut cache = MessageCache::default();

        for segment_text in &segments {
            let mut parts = segment_text.split('*');
            let Some(segment_id) = parts.next().map(str::trim).filter(|s| !s.is_empty()) else {
                continue;
            };
            let elements: Vec<&str> = parts.collect();
            self.dispatch_segment(segment_id, &elements, &mut content, &mut cache);
        }

        debug!(segments = segments.len(), transaction = %content.transaction_type, "parsed X12 interchange");
        content
    }

    /// Reads envelope metadata: ISA13 and the GS01 functional code.
    fn detect_transaction(&self, segments: &[&str]) -> OperationalContent {
        let mut content = OperationalContent::unknown();

        for segment in segments {
            if let Some(isa) = segment.strip_prefix("ISA") {
                let parts: Vec<&str> = isa.split('*').collect();
                // ISA13 is the interchange control number.
                if parts.len() > 13 {
                    content.interchange_control_number = parts[13].trim().to_string();
                }
            } else if let Some(gs) = segment.strip_prefix("GS") {
                let parts: Vec<&str> = gs.split('*').collect();
                if parts.len() > 1 {
                    content.transaction_type = match parts[1].trim() {
                        "HC" => "837",
                        "HP" => "835",
                        "HR" => "834",
                        "HI" => "270",
                        "HJ" => "271",
                        "HB" => "276",
                        "HN" => "277",
                        "HS" => "278",
                        "RT" => "820",
                        "FA" | "TA" => "999",
                        "RA" => "277CA",
                        _ => "UNKNOWN",
                    }
                    .to_string();
                }
                // GS06 is the group control number.
                if parts.len() > 6 {
                    content.functional_group_control_number = parts[6].trim().to_string();
                }
                // One GS segment per interchange is expected.
                break;
            }
        }

        content
    }

    fn dispatch_segment(
        &self,
        segment_id: &str,
        elements: &[&str],
        content: &mut OperationalContent,
        cache: &mut MessageCache,
    ) {
        let Some(mapper) = self.registry.find(segment_id) else {
            return;
        };
        match mapper.map(segment_id, elements, content, cache) {
            Ok(()) => debug!(segment = segment_id, mapper = mapper.name(), "segment mapped"),
            Err(e) => error!(
                segment = segment_id,
                mapper = mapper.name(),
                "segment mapping failed: {}",
                e
            ),
        }
    }
}

impl Default for X12Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinipipe_domain::PipelineError;

    const SAMPLE_835: &str = concat!(
        "ISA*00*          *00*          *ZZ*SENDER         *ZZ*RECEIVER       ",
        "*250101*1200*^*00501*000000123*0*P*:~",
        "GS*HP*SENDER*RECEIVER*20250101*1200*456*X*005010X221A1~",
        "ST*835*0001~",
        "NM1*QC*1*DOE*JANE****MI*PATIENT123~",
        "CLP*123*4*1500*1200~",
        "CAS*CO*45*300~",
        "SE*6*0001~",
        "GE*1*456~",
        "IEA*1*000000123~"
    );

    #[test]
    fn test_sample_835_round_trip() {
        let dispatcher = X12Dispatcher::new();
        let content = dispatcher.parse(SAMPLE_835);

        assert_eq!(content.transaction_type, "835");
        assert_eq!(content.interchange_control_number, "000000123");
        assert_eq!(content.functional_group_control_number, "456");

        assert_eq!(content.claims.len(), 1);
        let claim = &content.claims[0];
        assert_eq!(claim.claim_id, "123");
        assert_eq!(claim.claim_status, "adjusted");
        assert!((claim.total_charge_amount - 15.00).abs() < 1e-9);
        assert!((claim.total_payment_amount - 12.00).abs() < 1e-9);
        assert_eq!(claim.patient_id.as_deref(), Some("PATIENT123"));

        assert_eq!(content.adjustments.len(), 1);
        assert!((content.adjustments[0].adjustment_amount - 3.00).abs() < 1e-9);
    }

    #[test]
    fn test_empty_input_sentinel() {
        let dispatcher = X12Dispatcher::new();
        let content = dispatcher.parse("   ");
        assert_eq!(content.transaction_type, "UNKNOWN");
        assert_eq!(content.interchange_control_number, "UNKNOWN");
        assert_eq!(content.entity_count(), 0);
    }

    #[test]
    fn test_separator_only_input_is_error_sentinel() {
        let dispatcher = X12Dispatcher::new();
        let content = dispatcher.parse("~~~~");
        assert_eq!(content.transaction_type, "ERROR");
    }

    #[test]
    fn test_gs_code_table() {
        let dispatcher = X12Dispatcher::new();
        for (code, expected) in [
            ("HC", "837"),
            ("HP", "835"),
            ("HR", "834"),
            ("HI", "270"),
            ("HJ", "271"),
            ("HB", "276"),
            ("HN", "277"),
            ("HS", "278"),
            ("RT", "820"),
            ("FA", "999"),
            ("TA", "999"),
            ("RA", "277CA"),
            ("XX", "UNKNOWN"),
        ] {
            let raw = format!("GS*{}*S*R*20250101*1200*77*X*V~ST*0*1~", code);
            let content = dispatcher.parse(&raw);
            assert_eq!(content.transaction_type, expected, "GS01 {}", code);
            assert_eq!(content.functional_group_control_number, "77");
        }
    }

    #[test]
    fn test_mapper_fault_does_not_abort_interchange() {
        // CLP without its claim id fails inside the mapper; the following
        // segment must still be processed.
        let dispatcher = X12Dispatcher::new();
        let raw = "GS*HP*S*R*20250101*1200*1*X*V~CLP~CLP*77*2*100*100~";
        let content = dispatcher.parse(raw);
        assert_eq!(content.claims.len(), 1);
        assert_eq!(content.claims[0].claim_id, "77");
        assert_eq!(content.claims[0].claim_status, "denied");
    }

    #[test]
    fn test_first_registered_mapper_wins() {
        struct FirstClp;
        impl SegmentMapper for FirstClp {
            fn accepts(&self, segment_id: &str) -> bool {
                segment_id == "CLP"
            }
            fn map(
                &self,
                _segment_id: &str,
                _elements: &[&str],
                content: &mut clinipipe_domain::entities::OperationalContent,
                _cache: &mut clinipipe_domain::entities::MessageCache,
            ) -> Result<(), PipelineError> {
                content.organization_id = "first".to_string();
                Ok(())
            }
            fn name(&self) -> &'static str {
                "FirstClp"
            }
        }

        let mut registry = MapperRegistry::new();
        registry.register(Box::new(FirstClp));
        registry.register(Box::new(ClpMapper));
        let dispatcher = X12Dispatcher::with_registry(registry);

        let content = dispatcher.parse("CLP*123*4*100*100~");
        assert_eq!(content.organization_id, "first");
        // The second mapper never ran.
        assert!(content.claims.is_empty());
    }

    #[test]
    fn test_unhandled_segments_are_ignored() {
        let dispatcher = X12Dispatcher::new();
        let content = dispatcher.parse("ZZZ*1*2~ST*835*0001~");
        assert_eq!(content.entity_count(), 0);
    }
}
