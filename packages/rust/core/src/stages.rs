//! Stage identities, instruction texts, and schema locations.

use std::path::{Path, PathBuf};

use tenderfit_reasoning::StageSpec;
use tenderfit_shared::VerifierId;

pub const SCOUT: &str = "ScoutAgent";
pub const COLLECTOR: &str = "CollectorAgent";
pub const EXTRACTOR: &str = "ExtractorAgent";
pub const VERIFIER: &str = "VerifierAgent";
pub const ARBITER: &str = "ArbiterScorerAgent";

const GLOBAL_RULES: &str = "\
Global rules:
- Do not invent requirements.
- Every extracted requirement must include citation with {source_url, doc_type, page, quote, anchor}.
- Corrigendum beats base doc on conflicts.
- If uncertain, output NEEDS_REVIEW rather than guessing.
";

fn scout_instructions() -> String {
    format!(
        "You are {SCOUT}.\n{GLOBAL_RULES}\
You find vehicle-hiring tenders. Prefer recent closing dates.\n\
Return a structured list with bid_id, title, closing_date, and links.\n"
    )
}

fn collector_instructions() -> String {
    format!(
        "You are {COLLECTOR}.\n{GLOBAL_RULES}\
You classify each downloaded document into: base, sla, atc, corrigendum, or other.\n\
Return evidence_manifest.json using the provided document list and paths.\n\
Keep every doc_id exactly as given.\n"
    )
}

fn extractor_instructions() -> String {
    format!(
        "You are {EXTRACTOR}.\n{GLOBAL_RULES}\
Extract tender requirements into tender_requirements.schema.json.\n\
Only extract what is explicitly stated. Include citations for every requirement.\n\
Use chunk_id values as the citation anchor.\n\
When a corrigendum changes a requirement, state the corrected text.\n"
    )
}

/// Each verifier gets the same input but a different primary check.
fn verifier_instructions(id: VerifierId) -> String {
    let focus = match id {
        VerifierId::A => "Focus first on whether every requirement has a citation and the cited chunk exists.",
        VerifierId::B => "Focus first on whether each quote appears verbatim in the cited chunk text.",
        VerifierId::C => {
            "Focus first on whether page numbers are plausible and whether a corrigendum \
             supersedes the cited base text."
        }
    };
    format!(
        "You are {VERIFIER} {id}.\n{GLOBAL_RULES}\
Validate each requirement:\n\
- citation exists\n\
- quote matches parsed text\n\
- page number is plausible\n\
{focus}\n\
Use chunk_id anchors when referencing chunks.\n\
Return PASS/FAIL/NEEDS_REVIEW per requirement + notes.\n"
    )
}

fn arbiter_instructions() -> String {
    format!(
        "You are {ARBITER}.\n{GLOBAL_RULES}\
Use verifier votes to produce final consensus.\n\
Compute FitScore and Go/No-Go using the company profile.\n\
Return tender_fit_report.schema.json and focus on cited evidence.\n"
    )
}

/// Stage specs resolved against a schema directory.
#[derive(Debug, Clone)]
pub struct StageCatalog {
    schemas_dir: PathBuf,
}

impl StageCatalog {
    pub fn new(schemas_dir: impl Into<PathBuf>) -> Self {
        Self {
            schemas_dir: schemas_dir.into(),
        }
    }

    pub fn schemas_dir(&self) -> &Path {
        &self.schemas_dir
    }

    pub fn schema_path(&self, file: &str) -> PathBuf {
        self.schemas_dir.join(file)
    }

    pub fn scout(&self) -> StageSpec {
        self.spec(SCOUT, scout_instructions(), "scout_results.schema.json")
    }

    pub fn collector(&self) -> StageSpec {
        self.spec(COLLECTOR, collector_instructions(), "evidence_manifest.schema.json")
    }

    pub fn extractor(&self) -> StageSpec {
        self.spec(EXTRACTOR, extractor_instructions(), "tender_requirements.schema.json")
    }

    pub fn verifier(&self, id: VerifierId) -> StageSpec {
        self.spec(VERIFIER, verifier_instructions(id), "verifier_report.schema.json")
    }

    pub fn arbiter(&self) -> StageSpec {
        self.spec(ARBITER, arbiter_instructions(), "tender_fit_report.schema.json")
    }

    pub fn company_profile_schema(&self) -> PathBuf {
        self.schema_path("company_profile.schema.json")
    }

    fn spec(&self, name: &str, instructions: String, schema_file: &str) -> StageSpec {
        StageSpec {
            name: name.to_string(),
            instructions,
            schema_path: self.schema_path(schema_file),
        }
    }
}
