//! Core pipeline orchestration and domain logic for TenderFit.
//!
//! This crate ties together discovery, document fetching, page chunking, and
//! the reasoning stages into end-to-end bid evaluations (see
//! [`orchestrator::Orchestrator::evaluate_bid`]).

pub mod evals;
pub mod events;
pub mod orchestrator;
pub mod reconcile;
pub mod report;
pub mod shortlist;
pub mod stages;

pub use events::{EventSink, PipelineEvent};
pub use orchestrator::{
    ArbitrationOutput, BidEvaluation, BidResult, EvaluationOutcome, Orchestrator, PipelinePaths,
    VERIFIER_QUORUM, load_company_profile,
};
pub use stages::StageCatalog;
