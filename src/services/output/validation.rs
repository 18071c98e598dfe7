//! Output Contract
//!
//! A draft is acceptable when its answer matches the format hint, its
//! confidence lies in [0, 1] and its citations name only evidence the run
//! actually gathered, with at least one citation whenever evidence exists.

use std::collections::BTreeMap;

use retail_copilot_core::SynthesisOutput;

use super::format_hint::FormatHint;

/// Citations a draft may use: retrieved chunk ids and tables the executed
/// query touched.
#[derive(Debug, Clone, Default)]
pub struct CitationScope {
    chunks: Vec<String>,
    /// lowercase name -> schema spelling
    tables: BTreeMap<String, String>,
}

impl CitationScope {
    pub fn new<C, T>(chunks: C, tables: T) -> Self
    where
        C: IntoIterator<Item = String>,
        T: IntoIterator<Item = String>,
    {
        Self {
            chunks: chunks.into_iter().collect(),
            tables: tables
                .into_iter()
                .map(|t| (t.to_ascii_lowercase(), t))
                .collect(),
        }
    }

    pub fn has_evidence(&self) -> bool {
        !self.chunks.is_empty() || !self.tables.is_empty()
    }

    /// Canonical spelling of `citation`, if it is in scope. Chunk ids match
    /// exactly; table names case-insensitively.
    pub fn resolve(&self, citation: &str) -> Option<&str> {
        let citation = citation.trim();
        self.chunks
            .iter()
            .find(|c| c.as_str() == citation)
            .map(String::as_str)
            .or_else(|| self.tables.get(&citation.to_ascii_lowercase()).map(String::as_str))
    }
}

/// Check a draft against the output contract.
pub fn validate_draft(
    draft: &SynthesisOutput,
    hint: &FormatHint,
    scope: &CitationScope,
) -> Result<(), String> {
    if !draft.confidence.is_finite() || !(0.0..=1.0).contains(&draft.confidence) {
        return Err(format!("confidence {} is outside [0, 1]", draft.confidence));
    }

    hint.check(&draft.final_answer)?;

    if draft.citations.is_empty() && scope.has_evidence() {
        return Err("citations are missing although evidence was gathered".to_string());
    }
    let fabricated: Vec<&str> = draft
        .citations
        .iter()
        .map(String::as_str)
        .filter(|c| scope.resolve(c).is_none())
        .collect();
    if !fabricated.is_empty() {
        return Err(format!("citations not backed by evidence: {}", fabricated.join(", ")));
    }

    Ok(())
}
