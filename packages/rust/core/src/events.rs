//! Pipeline progress events.
//!
//! The orchestrator never holds presentation state; it emits events on an
//! optional channel and a front end renders them.

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use tenderfit_shared::{Decision, VerdictStatus, VerifierId};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    StageStarted {
        bid_id: String,
        stage: String,
        attempt: u32,
    },
    StageFinished {
        bid_id: String,
        stage: String,
        cache_hit: bool,
        duration_ms: u64,
    },
    DocumentParsed {
        bid_id: String,
        doc_id: String,
        pages: usize,
        chunks: usize,
    },
    VerifierFinished {
        bid_id: String,
        verifier_id: VerifierId,
        /// Counts of PASS / FAIL / NEEDS_REVIEW results.
        tally: [(VerdictStatus, u32); 3],
    },
    EvaluationFinished {
        bid_id: String,
        decision: Decision,
        fit_score: f64,
    },
    EvaluationFailed {
        bid_id: String,
        stage: Option<String>,
        error: String,
    },
}

impl PipelineEvent {
    pub fn bid_id(&self) -> &str {
        match self {
            Self::StageStarted { bid_id, .. }
            | Self::StageFinished { bid_id, .. }
            | Self::DocumentParsed { bid_id, .. }
            | Self::VerifierFinished { bid_id, .. }
            | Self::EvaluationFinished { bid_id, .. }
            | Self::EvaluationFailed { bid_id, .. } => bid_id,
        }
    }

    /// One-line human description, used for spinners and logs.
    pub fn describe(&self) -> String {
        match self {
            Self::StageStarted { bid_id, stage, attempt } if *attempt > 1 => {
                format!("{bid_id}: {stage} (attempt {attempt})")
            }
            Self::StageStarted { bid_id, stage, .. } => format!("{bid_id}: {stage}"),
            Self::StageFinished { bid_id, stage, cache_hit, duration_ms } => {
                let source = if *cache_hit { "cached" } else { "done" };
                format!("{bid_id}: {stage} {source} in {duration_ms}ms")
            }
            Self::DocumentParsed { bid_id, doc_id, pages, chunks } => {
                format!("{bid_id}: parsed {doc_id} ({pages} pages, {chunks} chunks)")
            }
            Self::VerifierFinished { bid_id, verifier_id, tally } => {
                let counts: Vec<String> = tally.iter().map(|(s, n)| format!("{s}={n}")).collect();
                format!("{bid_id}: verifier {verifier_id} {}", counts.join(" "))
            }
            Self::EvaluationFinished { bid_id, decision, fit_score } => {
                format!("{bid_id}: {decision} ({fit_score:.1})")
            }
            Self::EvaluationFailed { bid_id, stage: Some(stage), error } => {
                format!("{bid_id}: failed in {stage}: {error}")
            }
            Self::EvaluationFailed { bid_id, error, .. } => format!("{bid_id}: failed: {error}"),
        }
    }
}

/// Optional sender. Sending never fails the pipeline.
#[derive(Debug, Clone, Default)]
pub struct EventSink(Option<UnboundedSender<PipelineEvent>>);

impl EventSink {
    pub fn new(tx: UnboundedSender<PipelineEvent>) -> Self {
        Self(Some(tx))
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event);
        }
    }
}
