//! Shared types, error model, and configuration for TenderFit.
//!
//! This crate is the foundation depended on by all other TenderFit crates.
//! It provides:
//! - [`TenderFitError`]: the unified error type
//! - Domain types ([`EvidenceManifest`], [`TenderRequirements`], [`VerifierReport`],
//!   [`TenderFitReport`], ...)
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ChunkingConfig, FetchConfig, OpenAiConfig, PathsConfig, RetryConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, resolve_api_key,
    validate_config,
};
pub use error::{Result, TenderFitError};
pub use types::{
    Artifact, BidCandidate, BidRecord, ChunkRecord, Citation, CompanyProfile, Decision, DocType,
    DownloadedDoc, Eligibility, EligibilityReason, EvidenceDocument, EvidenceManifest, Extra,
    Listing, ListingBid, PageRecord, PageText, Requirement, RequirementCategory, ScoutResults,
    TenderFitReport, TenderRequirements, TextChunk, VerdictStatus, VerifierId, VerifierReport,
    VerifierResult, VerifierSummary,
};

/// Current UTC time as an RFC 3339 string with second precision.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
