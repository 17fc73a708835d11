//! Data models for the evidence explorer.
//!
//! This module contains the core data structures shared by the matching
//! pipeline, the highlight mapper, and the HTTP surface: extracted page text,
//! match candidates and requests, highlight instructions, and the read-only
//! findings data shown next to the document.

use serde::{Deserialize, Serialize};

// ============================================================================
// Document Text
// ============================================================================

/// Plain text of one physical page, produced once when the document loads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageText {
    /// 1-based page number.
    pub page_number: u32,
    pub text: String,
}

/// A whitespace-delimited run of page text.
///
/// Offsets are byte offsets into the original, non-normalized text so the
/// original slice can always be recovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub original: &'a str,
    pub start: usize,
    pub end: usize,
    pub normalized: String,
}

// ============================================================================
// Matching
// ============================================================================

/// Best window found by the approximate matcher.
///
/// A score of `0.0` with an empty substring means no window scored at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    pub score: f64,
    pub substring: String,
    pub start: usize,
    pub end: usize,
}

impl MatchCandidate {
    pub fn none() -> Self {
        Self {
            score: 0.0,
            substring: String::new(),
            start: 0,
            end: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.substring.is_empty()
    }
}

/// A citation the user selected: which page to search, and for what.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub reference_id: String,
    pub page: u32,
    pub query: String,
}

impl From<&Finding> for Reference {
    fn from(finding: &Finding) -> Self {
        Self {
            reference_id: finding.reference_id.clone(),
            page: finding.page,
            query: finding.query.clone(),
        }
    }
}

impl From<&SupportingEvidence> for Reference {
    fn from(evidence: &SupportingEvidence) -> Self {
        Self {
            reference_id: evidence.label.clone(),
            page: evidence.page,
            query: evidence.quote.clone(),
        }
    }
}

/// One issued match request. Only the most recently issued id is live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRequest {
    pub request_id: u64,
    pub reference_id: String,
    pub page_number: u32,
    pub query: String,
}

/// Where the text of a highlight instruction came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MatchOrigin {
    /// Local match at or above the confidence threshold.
    Local { score: f64 },
    /// Verbatim answer from the language model.
    Remote,
    /// Local candidate used because the remote call failed or came back empty.
    LocalFallback { score: f64 },
}

/// What the highlight mapper should mark on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightInstruction {
    pub request_id: u64,
    pub page_number: u32,
    pub primary_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_text: Option<String>,
    pub label: String,
    pub origin: MatchOrigin,
}

// ============================================================================
// Findings Data
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Findings {
    pub summary: Summary,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub supporting_evidence: Vec<SupportingEvidence>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub title: String,
    #[serde(default)]
    pub paragraphs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub id: String,
    pub heading: String,
    pub body: String,
    pub reference_id: String,
    pub page: u32,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportingEvidence {
    pub id: String,
    pub label: String,
    pub quote: String,
    pub page: u32,
}

impl Findings {
    /// Every selectable citation, findings first, in display order.
    pub fn references(&self) -> Vec<Reference> {
        self.findings
            .iter()
            .map(Reference::from)
            .chain(self.supporting_evidence.iter().map(Reference::from))
            .collect()
    }
}

// ============================================================================
// Text-Location Endpoint Payloads
// ============================================================================

/// Body of `POST /api/gemini`. Fields are optional so that missing values
/// produce a 400 instead of a deserialization rejection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocateRequest {
    #[serde(default)]
    pub page_number: Option<u32>,
    #[serde(default)]
    pub page_text: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
}

/// Either shape the endpoint answers with: `{match}` on success, `{error}`
/// otherwise.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocateResponse {
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub matched: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
