//! Offline eval harness: citation coverage, quote fidelity, and corrigendum
//! precedence over recorded pipeline outputs.
//!
//! Suites are JSONL files, one case per line.

use std::collections::HashMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tenderfit_shared::{Result, TenderFitError};
use tenderfit_text::read_jsonl;

/// Default directory holding `<suite>.jsonl` files.
pub const DEFAULT_EVALS_DIR: &str = "evals";

// ---------------------------------------------------------------------------
// Case format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalCase {
    #[serde(default = "unknown_id")]
    pub id: String,
    #[serde(default)]
    pub requirements: Vec<ExpectedRequirement>,
    #[serde(default)]
    pub chunks: Vec<EvalChunk>,
    #[serde(default)]
    pub output: EvalOutput,
    /// Requirement texts as amended by a corrigendum.
    #[serde(default)]
    pub corrigendum: Vec<CorrigendumUpdate>,
}

fn unknown_id() -> String {
    "unknown".into()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpectedRequirement {
    #[serde(default)]
    pub requirement_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalChunk {
    pub chunk_id: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalOutput {
    #[serde(default)]
    pub resolved_requirements: Vec<ResolvedRequirement>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolvedRequirement {
    pub requirement_id: String,
    #[serde(default)]
    pub text: String,
    /// `null` and a missing field both mean uncited.
    #[serde(default)]
    pub citations: Option<Vec<EvalCitation>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalCitation {
    #[serde(default)]
    pub chunk_id: Option<String>,
    #[serde(default)]
    pub quote: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrigendumUpdate {
    #[serde(default)]
    pub requirement_id: String,
    #[serde(default)]
    pub text: String,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseResult {
    pub case_id: String,
    pub coverage: f64,
    pub covered_count: usize,
    pub total_requirements: usize,
    pub uncited_requirements: Vec<String>,
    /// `REQ:CHUNK` pairs whose quote is not in the chunk text.
    pub quote_errors: Vec<String>,
    pub corrigendum_errors: Vec<String>,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuiteResult {
    pub suite: String,
    pub min_coverage: f64,
    pub overall_coverage: f64,
    pub passed: bool,
    pub cases: Vec<CaseResult>,
}

/// Score one case.
pub fn evaluate_case(case: &EvalCase) -> CaseResult {
    let resolved: HashMap<&str, &ResolvedRequirement> = case
        .output
        .resolved_requirements
        .iter()
        .map(|r| (r.requirement_id.as_str(), r))
        .collect();
    let chunk_text: HashMap<&str, &str> = case
        .chunks
        .iter()
        .map(|c| (c.chunk_id.as_str(), c.text.as_str()))
        .collect();

    let mut covered = 0;
    let mut uncited = Vec::new();
    let mut quote_errors = Vec::new();
    for expected in &case.requirements {
        let req_id = expected.requirement_id.as_str();
        let citations = resolved
            .get(req_id)
            .and_then(|r| r.citations.as_deref())
            .unwrap_or_default();
        if citations.is_empty() {
            uncited.push(req_id.to_string());
        } else {
            covered += 1;
        }
        for citation in citations {
            let chunk_id = citation.chunk_id.as_deref().unwrap_or("None");
            let text = citation
                .chunk_id
                .as_deref()
                .and_then(|id| chunk_text.get(id).copied())
                .unwrap_or("");
            if citation.quote.is_empty() || !text.contains(&citation.quote) {
                quote_errors.push(format!("{req_id}:{chunk_id}"));
            }
        }
    }

    let total = case.requirements.len();
    let coverage = if total == 0 {
        1.0
    } else {
        covered as f64 / total as f64
    };

    let corrigendum_errors: Vec<String> = case
        .corrigendum
        .iter()
        .filter(|update| {
            let actual = resolved
                .get(update.requirement_id.as_str())
                .map(|r| r.text.as_str())
                .unwrap_or("");
            !update.text.is_empty() && actual != update.text
        })
        .map(|update| update.requirement_id.clone())
        .collect();

    let passed = quote_errors.is_empty() && corrigendum_errors.is_empty();
    CaseResult {
        case_id: case.id.clone(),
        coverage,
        covered_count: covered,
        total_requirements: total,
        uncited_requirements: uncited,
        quote_errors,
        corrigendum_errors,
        passed,
    }
}

/// Score every case and aggregate coverage across all requirements.
pub fn run_suite(suite: &str, cases: &[EvalCase], min_coverage: f64) -> SuiteResult {
    let results: Vec<CaseResult> = cases.iter().map(evaluate_case).collect();
    let total: usize = results.iter().map(|r| r.total_requirements).sum();
    let covered: usize = results.iter().map(|r| r.covered_count).sum();
    let overall_coverage = if total == 0 {
        1.0
    } else {
        covered as f64 / total as f64
    };
    let passed = overall_coverage >= min_coverage && results.iter().all(|r| r.passed);

    SuiteResult {
        suite: suite.to_string(),
        min_coverage,
        overall_coverage,
        passed,
        cases: results,
    }
}

/// Resolve a suite name (`quick` ⇒ `<dir>/quick.jsonl`) or an explicit path.
pub fn suite_path(suite: &str, evals_dir: &Path) -> Result<PathBuf> {
    let direct = PathBuf::from(suite);
    if direct.is_file() {
        return Ok(direct);
    }
    if !suite.is_empty() && suite.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        let named = evals_dir.join(format!("{suite}.jsonl"));
        if named.is_file() {
            return Ok(named);
        }
    }
    Err(TenderFitError::validation(format!("Unknown eval suite: {suite}")))
}

pub fn load_suite(suite: &str, evals_dir: &Path) -> Result<Vec<EvalCase>> {
    read_jsonl(&suite_path(suite, evals_dir)?)
}

/// Plain-text summary of a suite run.
pub fn format_report(result: &SuiteResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Suite: {}", result.suite);
    let _ = writeln!(
        out,
        "Coverage: {:.2} (min {:.2})",
        result.overall_coverage, result.min_coverage
    );
    let _ = writeln!(out, "Passed: {}", result.passed);
    for case in &result.cases {
        out.push('\n');
        let status = if case.passed { "PASS" } else { "FAIL" };
        let _ = write!(out, "{}: {status} (coverage {:.2})", case.case_id, case.coverage);
        if !case.uncited_requirements.is_empty() {
            let _ = write!(out, "\n  uncited: {}", case.uncited_requirements.join(", "));
        }
        if !case.quote_errors.is_empty() {
            let _ = write!(out, "\n  quote_errors: {}", case.quote_errors.join(", "));
        }
        if !case.corrigendum_errors.is_empty() {
            let _ = write!(out, "\n  corrigendum_errors: {}", case.corrigendum_errors.join(", "));
        }
    }
    out
}
