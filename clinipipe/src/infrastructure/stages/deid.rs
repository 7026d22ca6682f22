// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # De-identification Stage
//!
//! Pattern-based PHI masking over clinical content: direct identifier
//! fields are replaced wholesale and narrative text is scrubbed for
//! emails, phone numbers, SSNs and MRNs. Model-driven NER sits behind the
//! [`DeidentificationService`] trait as an external collaborator; the
//! bundled implementation is the pattern masker.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use clinipipe_domain::entities::{ClinicalContent, PipelineItem};
use clinipipe_domain::PipelineError;

use crate::application::context::PipelineContext;
use crate::application::stages::PipelineStage;

/// Masks PHI from one clinical record.
pub trait DeidentificationService: Send + Sync {
    fn deidentify(&self, content: &mut ClinicalContent) -> Result<(), PipelineError>;
}

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("static pattern"));
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\+?\d{3}[ .-]?\d{3}[ .-]?\d{4}\b").expect("static pattern"));
static SSN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("static pattern"));
static MRN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bMRN\s*[:#]?\s*\d+\b").expect("static pattern"));

/// Identifier fields replaced wholesale when present.
const DIRECT_IDENTIFIER_FIELDS: [(&str, &str); 6] = [
    ("name", "[NAME]"),
    ("phone", "[PHONE]"),
    ("email", "[EMAIL]"),
    ("address", "[ADDRESS]"),
    ("ssn", "[SSN]"),
    ("mrn", "[MRN]"),
];

/// Regex-based PHI masker.
#[derive(Default)]
pub struct PatternMasker;

impl PatternMasker {
    pub fn mask_text(&self, text: &str) -> String {
        let masked = EMAIL_RE.replace_all(text, "[EMAIL]");
        let masked = SSN_RE.replace_all(&masked, "[SSN]");
        let masked = PHONE_RE.replace_all(&masked, "[PHONE]");
        MRN_RE.replace_all(&masked, "[MRN]").into_owned()
    }
}

impl DeidentificationService for PatternMasker {
    fn deidentify(&self, content: &mut ClinicalContent) -> Result<(), PipelineError> {
        for (field, replacement) in DIRECT_IDENTIFIER_FIELDS {
            if let Some(value) = content.fields.get_mut(field) {
                if value.is_string() {
                    *value = serde_json::json!(replacement);
                }
            }
        }
        for narrative in &mut content.narratives {
            *narrative = self.mask_text(narrative);
        }
        Ok(())
    }
}

pub struct DeidStage {
    service: Box<dyn DeidentificationService>,
}

impl DeidStage {
    pub fn new() -> Self {
        Self {
            service: Box::new(PatternMasker),
        }
    }

    pub fn with_service(service: Box<dyn DeidentificationService>) -> Self {
        Self { service }
    }
}

impl Default for DeidStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PipelineStage for DeidStage {
    fn name(&self) -> &'static str {
        "deid"
    }

    async fn execute(
        &self,
        _context: &PipelineContext,
        item: PipelineItem,
    ) -> Result<Option<PipelineItem>, PipelineError> {
        match item {
            PipelineItem::Clinical(mut content) => {
                self.service.deidentify(&mut content)?;
                Ok(Some(PipelineItem::Clinical(content)))
            }
            // Operational content carries identifiers, not free text; it
            // passes through untouched.
            other => Ok(Some(other)),
        }
    }
}
