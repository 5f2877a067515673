//! Core domain types for TenderFit evaluations.
//!
//! Every record that crosses the reasoning boundary is a typed envelope: the
//! known fields are strongly typed and anything else the producer sent is kept
//! in `extra`, so artifacts round-trip without loss.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TenderFitError};

/// Unrecognized fields preserved on a typed envelope.
pub type Extra = serde_json::Map<String, serde_json::Value>;

/// An artifact type that may only be built from validated external JSON.
pub trait Artifact: Serialize + DeserializeOwned {
    /// Domain checks the JSON schema cannot express.
    fn check(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Classification of an evidence document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Base,
    Sla,
    Atc,
    Corrigendum,
    Other,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Sla => "sla",
            Self::Atc => "atc",
            Self::Corrigendum => "corrigendum",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for DocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requirement category assigned by the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementCategory {
    Eligibility,
    Sla,
    Technical,
    Financial,
    Documents,
    Submission,
    Other,
}

/// Per-requirement verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictStatus {
    Pass,
    Fail,
    NeedsReview,
}

impl std::fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::NeedsReview => "NEEDS_REVIEW",
        })
    }
}

/// Overall bid decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Go,
    NoGo,
    NeedsReview,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Go => "GO",
            Self::NoGo => "NO_GO",
            Self::NeedsReview => "NEEDS_REVIEW",
        })
    }
}

/// Independent verifier identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VerifierId {
    A,
    B,
    C,
}

impl VerifierId {
    /// All identities, in the order their reports are handed to arbitration.
    pub const ALL: [VerifierId; 3] = [VerifierId::A, VerifierId::B, VerifierId::C];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        }
    }
}

impl std::fmt::Display for VerifierId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Citations & requirements
// ---------------------------------------------------------------------------

/// A pointer into source text. `quote` must appear verbatim at `anchor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub source_url: String,
    pub doc_type: DocType,
    pub page: u32,
    pub quote: String,
    /// Chunk id (`p{page}-c{index}`) the quote was taken from.
    pub anchor: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// One extracted tender requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: String,
    pub category: RequirementCategory,
    pub requirement: String,
    #[serde(default)]
    pub mandatory: Option<bool>,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Extractor output, persisted as `tender_requirements.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenderRequirements {
    pub bid_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub closing_date: Option<String>,
    pub requirements: Vec<Requirement>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Artifact for TenderRequirements {
    fn check(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for req in &self.requirements {
            if !seen.insert(req.id.as_str()) {
                return Err(TenderFitError::validation(format!(
                    "duplicate requirement id: {}",
                    req.id
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Evidence manifest
// ---------------------------------------------------------------------------

/// A document that belongs to a bid's evidence set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceDocument {
    pub doc_id: String,
    pub source_url: String,
    pub local_path: String,
    pub doc_type: DocType,
    #[serde(default)]
    pub title: Option<String>,
    /// RFC 3339 timestamp.
    #[serde(default)]
    pub fetched_at: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// The authoritative record of a bid's evidence, `evidence_manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceManifest {
    pub bid_id: String,
    #[serde(default)]
    pub generated_at: Option<String>,
    pub documents: Vec<EvidenceDocument>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Artifact for EvidenceManifest {
    fn check(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for doc in &self.documents {
            if !seen.insert(doc.doc_id.as_str()) {
                return Err(TenderFitError::validation(format!(
                    "duplicate doc_id in manifest: {}",
                    doc.doc_id
                )));
            }
        }
        Ok(())
    }
}

/// A file actually materialized on disk by the download step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadedDoc {
    pub doc_id: String,
    pub source_url: String,
    pub local_path: String,
    pub filename: String,
}

// ---------------------------------------------------------------------------
// Text & chunks
// ---------------------------------------------------------------------------

/// Text of a single page, as returned by the PDF-text collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    pub page_num: u32,
    pub text: String,
}

/// A bounded span of page text with a stable identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    /// `p{page}-c{index}` with a 1-based per-page index.
    pub chunk_id: String,
    /// Monotonic position across the whole chunked page set.
    pub chunk_index: usize,
    pub page_start: u32,
    pub page_end: u32,
    pub text: String,
}

/// One row of `extracted/pages.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub doc_id: String,
    pub doc_type: DocType,
    pub source_url: String,
    pub page_num: u32,
    pub text: String,
}

/// One row of `extracted/chunks.jsonl`; also the evidence unit handed to stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    /// Position across every document of the bid, in manifest order.
    pub chunk_index: usize,
    pub doc_id: String,
    pub doc_type: DocType,
    pub source_url: String,
    pub page_start: u32,
    pub page_end: u32,
    pub text: String,
}

// ---------------------------------------------------------------------------
// Verification & arbitration
// ---------------------------------------------------------------------------

/// Verdict for a single requirement from one verifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifierResult {
    pub requirement_id: String,
    pub status: VerdictStatus,
    pub notes: String,
    #[serde(default)]
    pub citations: Option<Vec<Citation>>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Verdict counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VerifierSummary {
    pub passed: u32,
    pub failed: u32,
    pub needs_review: u32,
}

/// One independent verifier's report. Never merged by verifiers themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifierReport {
    pub bid_id: String,
    pub verifier_id: String,
    pub summary: VerifierSummary,
    pub results: Vec<VerifierResult>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Artifact for VerifierReport {}

/// Final status and rationale for one requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityReason {
    pub requirement_id: String,
    pub status: VerdictStatus,
    pub notes: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Eligibility block. Serialized as `pass`, `passed` is accepted on input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Eligibility {
    #[serde(rename = "pass", alias = "passed")]
    pub passed: bool,
    pub reasons: Vec<EligibilityReason>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// The terminal artifact of an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenderFitReport {
    pub bid_id: String,
    pub decision: Decision,
    pub fit_score: f64,
    #[serde(default)]
    pub summary: Option<String>,
    pub eligibility: Eligibility,
    pub gaps: Vec<String>,
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub requirements_reviewed: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Artifact for TenderFitReport {
    fn check(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.fit_score) {
            return Err(TenderFitError::validation(format!(
                "fit_score {} outside [0, 100]",
                self.fit_score
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scouting
// ---------------------------------------------------------------------------

/// A bid record from the discovery collaborator's listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidRecord {
    pub bid_id: String,
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub closing_date: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub keywords: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// A candidate bid as reported by the Scout stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidCandidate {
    pub bid_id: String,
    pub title: String,
    #[serde(default)]
    pub closing_date: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Scout stage output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoutResults {
    pub query: String,
    pub bids: Vec<BidCandidate>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Artifact for ScoutResults {}

/// `artifacts/{bid_id}/listing.json`, written by `scan` and read by `fetch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub query: String,
    pub bid: ListingBid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingBid {
    pub bid_id: String,
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub closing_date: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

// ---------------------------------------------------------------------------
// Company profile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetProfile {
    pub sedan: u32,
    pub suv: u32,
    pub muv: u32,
    pub hatchback: u32,
    pub model_year_min: u32,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocsProfile {
    #[serde(default)]
    pub gst: Option<bool>,
    #[serde(default)]
    pub pan: Option<bool>,
    #[serde(default)]
    pub permits: Option<bool>,
    #[serde(default)]
    pub insurance: Option<bool>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialsProfile {
    pub turnover_last_3y_inr: Vec<f64>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperienceProfile {
    #[serde(default)]
    pub govt_contracts_count: Option<u32>,
    #[serde(default)]
    pub similar_work_years: Option<f64>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationsProfile {
    #[serde(default)]
    pub cities_served: Option<Vec<String>>,
    #[serde(default)]
    pub drivers_available: Option<u32>,
    #[serde(default, rename = "24x7_capable")]
    pub twenty_four_seven_capable: Option<bool>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// The bidding company's capabilities, compared against requirements by the arbiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub company_name: String,
    pub fleet: FleetProfile,
    pub docs: DocsProfile,
    pub financials: FinancialsProfile,
    pub experience: ExperienceProfile,
    pub operations: OperationsProfile,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Artifact for CompanyProfile {}
