//! Per-bid evaluation pipeline: COLLECT → EXTRACT → VERIFY[A,B,C] → ARBITRATE.
//!
//! Scout is a separate entry point over a bid listing. Every stage goes
//! through [`StageRunner`], so outputs are schema-validated and cached. Each
//! bid writes only under its own artifact directory and report files, which
//! lets [`Orchestrator::evaluate_many`] run bids concurrently without locking.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use tenderfit_cache::{ToolCache, sha256_hex};
use tenderfit_discovery::{SearchQuery, search_listing};
use tenderfit_fetcher::{Fetcher, doc_dest_from_url, normalize_source_url};
use tenderfit_reasoning::{ReasoningClient, StageRunner, StageSettings};
use tenderfit_schema::{load_schema, parse_artifact};
use tenderfit_shared::{
    AppConfig, ChunkRecord, ChunkingConfig, CompanyProfile, DownloadedDoc, EvidenceDocument,
    EvidenceManifest, PageRecord, PageText, Result, RetryConfig, ScoutResults, TenderFitError,
    TenderFitReport, TenderRequirements, TextChunk, VerdictStatus, VerifierId, VerifierReport,
    now_rfc3339,
};
use tenderfit_storage::{RunSuccess, StageRunRecord, Storage};
use tenderfit_text::{AutoPageSource, JsonlWriter, PageSource, chunk_pages};

use crate::events::{EventSink, PipelineEvent};
use crate::reconcile::reconcile_manifest;
use crate::report::render_markdown;
use crate::stages::StageCatalog;

/// Number of independent verifier reports arbitration requires.
pub const VERIFIER_QUORUM: usize = VerifierId::ALL.len();

// ---------------------------------------------------------------------------
// Requests and outcomes
// ---------------------------------------------------------------------------

/// Input for one full bid evaluation.
#[derive(Debug, Clone)]
pub struct BidEvaluation {
    pub bid_id: String,
    /// `file://`, plain-path, or `http(s)://` document sources.
    pub doc_urls: Vec<String>,
    pub company_profile: CompanyProfile,
    /// Overrides `{artifacts_dir}/{bid_id}` for this bid.
    pub artifacts_dir: Option<PathBuf>,
}

/// The persisted result of arbitration.
#[derive(Debug, Clone)]
pub struct ArbitrationOutput {
    pub report: TenderFitReport,
    pub markdown: String,
    pub report_json_path: PathBuf,
    pub report_md_path: PathBuf,
}

/// Everything a successful evaluation produced.
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub manifest: EvidenceManifest,
    pub requirements: TenderRequirements,
    pub verifier_reports: Vec<VerifierReport>,
    pub arbitration: ArbitrationOutput,
    /// Ledger run id, when a ledger is attached.
    pub run_id: Option<String>,
}

/// Result of one bid within [`Orchestrator::evaluate_many`].
#[derive(Debug)]
pub struct BidResult {
    pub bid_id: String,
    pub result: Result<EvaluationOutcome>,
}

/// Filesystem roots for artifacts and reports.
#[derive(Debug, Clone)]
pub struct PipelinePaths {
    pub artifacts_dir: PathBuf,
    pub reports_dir: PathBuf,
}

// ---------------------------------------------------------------------------
// Stage payloads
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct CollectPayload<'a> {
    bid_id: &'a str,
    downloaded_docs: &'a [DownloadedDoc],
    errors: &'a [String],
}

#[derive(Serialize)]
struct ExtractPayload<'a> {
    bid_id: &'a str,
    documents: &'a [EvidenceDocument],
    chunks: &'a [ChunkRecord],
}

#[derive(Serialize)]
struct VerifyPayload<'a> {
    bid_id: &'a str,
    verifier_id: VerifierId,
    requirements: &'a TenderRequirements,
    chunks: &'a [ChunkRecord],
}

#[derive(Serialize)]
struct ArbitratePayload<'a> {
    bid_id: &'a str,
    requirements: &'a TenderRequirements,
    verifier_reports: &'a [VerifierReport],
    company_profile: &'a CompanyProfile,
}

/// Ledger context for one evaluation.
struct RunCtx {
    bid_id: String,
    run_id: Option<String>,
}

impl RunCtx {
    fn detached(bid_id: &str) -> Self {
        Self {
            bid_id: bid_id.to_string(),
            run_id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives the stage sequence for one or many bids.
#[derive(Clone)]
pub struct Orchestrator {
    runner: StageRunner,
    stages: StageCatalog,
    fetcher: Arc<Fetcher>,
    pages: Arc<dyn PageSource>,
    cache: Option<ToolCache>,
    force_refresh: bool,
    chunking: ChunkingConfig,
    retry: RetryConfig,
    paths: PipelinePaths,
    ledger: Option<Arc<Storage>>,
    events: EventSink,
}

impl Orchestrator {
    pub fn new(
        runner: StageRunner,
        stages: StageCatalog,
        fetcher: Arc<Fetcher>,
        pages: Arc<dyn PageSource>,
        paths: PipelinePaths,
    ) -> Self {
        Self {
            runner,
            stages,
            fetcher,
            pages,
            cache: None,
            force_refresh: false,
            chunking: ChunkingConfig::default(),
            retry: RetryConfig::default(),
            paths,
            ledger: None,
            events: EventSink::default(),
        }
    }

    /// Wire every collaborator from `config`, caching under `paths.cache_dir`.
    pub fn from_config(
        config: &AppConfig,
        client: Arc<dyn ReasoningClient>,
        force_refresh: bool,
    ) -> Result<Self> {
        let cache = ToolCache::new(&config.paths.cache_dir);
        let settings = StageSettings {
            model: config.openai.model.clone(),
            temperature: config.openai.temperature,
            max_output_tokens: config.openai.max_output_tokens,
        };
        let runner = StageRunner::new(client, settings)
            .with_cache(cache.clone())
            .force_refresh(force_refresh);
        let fetcher = Fetcher::new(&config.fetch)?;
        let paths = PipelinePaths {
            artifacts_dir: PathBuf::from(&config.paths.artifacts_dir),
            reports_dir: PathBuf::from(&config.paths.reports_dir),
        };

        Ok(Self::new(
            runner,
            StageCatalog::new(&config.paths.schemas_dir),
            Arc::new(fetcher),
            Arc::new(AutoPageSource::default()),
            paths,
        )
        .with_cache(cache, force_refresh)
        .with_chunking(config.chunking)
        .with_retry(config.retry))
    }

    /// Cache for collaborator calls (PDF text, chunking, search).
    pub fn with_cache(mut self, cache: ToolCache, force_refresh: bool) -> Self {
        self.cache = Some(cache);
        self.force_refresh = force_refresh;
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<Storage>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn stages(&self) -> &StageCatalog {
        &self.stages
    }

    /// `{artifacts_dir}/{bid_id}` with path separators neutralized.
    pub fn bid_dir(&self, bid_id: &str) -> Result<PathBuf> {
        Ok(self.paths.artifacts_dir.join(bid_path_segment(bid_id)?))
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Rank listing records for `query` and let the scout stage shortlist them.
    #[instrument(skip_all, fields(keywords = %query.keywords))]
    pub async fn scout(&self, query: &SearchQuery, listing: &Path) -> Result<ScoutResults> {
        let search = search_listing(listing, query, self.cache.as_ref(), self.force_refresh)?;
        info!(candidates = search.bids.len(), "scout start");
        let payload = json!({
            "query": query.keywords,
            "candidate_bids": search,
        });
        let spec = &self.stages.scout();
        let payload = &payload;
        let ctx = RunCtx::detached("scout");
        self.stage(&ctx, "scout", || async move {
            let out = self.runner.run::<ScoutResults>(spec, payload).await?;
            Ok((out.artifact, out.cache_hit))
        })
        .await
    }

    /// Download documents and build the reconciled evidence manifest.
    pub async fn collect(
        &self,
        bid_id: &str,
        doc_urls: &[String],
        out_dir: Option<&Path>,
    ) -> Result<EvidenceManifest> {
        let bid_dir = self.resolve_bid_dir(bid_id, out_dir)?;
        self.collect_in(&RunCtx::detached(bid_id), doc_urls, &bid_dir)
            .await
    }

    /// Parse and chunk every manifest document, then extract requirements.
    pub async fn extract(
        &self,
        bid_id: &str,
        manifest: &EvidenceManifest,
        out_dir: Option<&Path>,
    ) -> Result<(TenderRequirements, Vec<ChunkRecord>)> {
        let bid_dir = self.resolve_bid_dir(bid_id, out_dir)?;
        self.extract_in(&RunCtx::detached(bid_id), manifest, &bid_dir)
            .await
    }

    /// Run the three verifiers concurrently over identical input.
    pub async fn verify(
        &self,
        bid_id: &str,
        requirements: &TenderRequirements,
        chunks: &[ChunkRecord],
    ) -> Result<Vec<VerifierReport>> {
        self.verify_in(&RunCtx::detached(bid_id), requirements, chunks)
            .await
    }

    /// Resolve verifier votes into the final report and persist it.
    pub async fn arbitrate(
        &self,
        bid_id: &str,
        requirements: &TenderRequirements,
        verifier_reports: &[VerifierReport],
        company_profile: &CompanyProfile,
    ) -> Result<ArbitrationOutput> {
        self.arbitrate_in(
            &RunCtx::detached(bid_id),
            requirements,
            verifier_reports,
            company_profile,
        )
        .await
    }

    /// Full COLLECT → EXTRACT → VERIFY → ARBITRATE for one bid.
    ///
    /// Any stage failure aborts the bid; no report is written in that case.
    #[instrument(skip_all, fields(bid_id = %request.bid_id))]
    pub async fn evaluate_bid(&self, request: &BidEvaluation) -> Result<EvaluationOutcome> {
        let ctx = RunCtx {
            bid_id: request.bid_id.clone(),
            run_id: self.start_run(&request.bid_id).await,
        };
        let started = Instant::now();

        let result = self.evaluate_in(&ctx, request).await;
        match &result {
            Ok(outcome) => {
                let report = &outcome.arbitration.report;
                info!(
                    decision = %report.decision,
                    fit_score = report.fit_score,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "evaluation complete"
                );
                self.events.emit(PipelineEvent::EvaluationFinished {
                    bid_id: ctx.bid_id.clone(),
                    decision: report.decision,
                    fit_score: report.fit_score,
                });
                self.finish_run(&ctx, Ok(&outcome.arbitration)).await;
            }
            Err(e) => {
                warn!(error = %e, stage = ?e.stage(), "evaluation failed");
                self.events.emit(PipelineEvent::EvaluationFailed {
                    bid_id: ctx.bid_id.clone(),
                    stage: e.stage().map(String::from),
                    error: e.to_string(),
                });
                self.finish_run(&ctx, Err(e)).await;
            }
        }

        result.map(|mut outcome| {
            outcome.run_id = ctx.run_id.clone();
            outcome
        })
    }

    /// Evaluate several bids concurrently. Results keep request order; one
    /// bid failing never affects another.
    pub async fn evaluate_many(&self, requests: Vec<BidEvaluation>) -> Vec<BidResult> {
        let bid_ids: Vec<String> = requests.iter().map(|r| r.bid_id.clone()).collect();
        let mut slots: Vec<Option<Result<EvaluationOutcome>>> =
            (0..requests.len()).map(|_| None).collect();

        let mut tasks = JoinSet::new();
        for (index, request) in requests.into_iter().enumerate() {
            let this = self.clone();
            tasks.spawn(async move { (index, this.evaluate_bid(&request).await) });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!(error = %e, "evaluation task aborted"),
            }
        }

        bid_ids
            .into_iter()
            .zip(slots)
            .map(|(bid_id, slot)| BidResult {
                result: slot.unwrap_or_else(|| {
                    Err(TenderFitError::validation(format!(
                        "evaluation task for {bid_id} did not complete"
                    )))
                }),
                bid_id,
            })
            .collect()
    }

    pub fn load_company_profile(&self, path: &Path) -> Result<CompanyProfile> {
        load_company_profile(path, &self.stages)
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    async fn evaluate_in(&self, ctx: &RunCtx, request: &BidEvaluation) -> Result<EvaluationOutcome> {
        let bid_dir = self.resolve_bid_dir(&request.bid_id, request.artifacts_dir.as_deref())?;

        let manifest = self.collect_in(ctx, &request.doc_urls, &bid_dir).await?;
        let (requirements, chunks) = self.extract_in(ctx, &manifest, &bid_dir).await?;
        let verifier_reports = self.verify_in(ctx, &requirements, &chunks).await?;
        let arbitration = self
            .arbitrate_in(ctx, &requirements, &verifier_reports, &request.company_profile)
            .await?;

        Ok(EvaluationOutcome {
            manifest,
            requirements,
            verifier_reports,
            arbitration,
            run_id: None,
        })
    }

    async fn collect_in(
        &self,
        ctx: &RunCtx,
        doc_urls: &[String],
        bid_dir: &Path,
    ) -> Result<EvidenceManifest> {
        let bid_id = ctx.bid_id.as_str();
        let spec = &self.stages.collector();
        let docs_dir = bid_dir.join("docs");
        let docs_dir = docs_dir.as_path();

        let manifest = self
            .stage(ctx, "collect", || async move {
                let fetch = self.fetcher.fetch_docs(bid_id, doc_urls, docs_dir).await;
                let downloaded = downloaded_docs(doc_urls, docs_dir);
                if downloaded.is_empty() {
                    return Err(TenderFitError::validation(format!(
                        "no documents could be collected for {bid_id}: {}",
                        fetch.errors.join("; ")
                    )));
                }
                info!(doc_count = downloaded.len(), errors = fetch.errors.len(), "collector start");

                let payload = CollectPayload {
                    bid_id,
                    downloaded_docs: &downloaded,
                    errors: &fetch.errors,
                };
                let out = self
                    .runner
                    .run_with_overrides::<EvidenceManifest>(spec, &payload, bid_override(bid_id))
                    .await?;
                let outcome = reconcile_manifest(out.artifact, &downloaded, &now_rfc3339());
                Ok((outcome.manifest, out.cache_hit))
            })
            .await?;

        write_json(&bid_dir.join("evidence_manifest.json"), &manifest)?;
        Ok(manifest)
    }

    async fn extract_in(
        &self,
        ctx: &RunCtx,
        manifest: &EvidenceManifest,
        bid_dir: &Path,
    ) -> Result<(TenderRequirements, Vec<ChunkRecord>)> {
        let bid_id = ctx.bid_id.as_str();
        let spec = &self.stages.extractor();

        let (requirements, chunks) = self
            .stage(ctx, "extract", || async move {
                let chunks = self.parse_and_chunk(bid_id, manifest, &bid_dir.join("extracted")).await?;
                info!(chunk_count = chunks.len(), "extractor start");
                let payload = ExtractPayload {
                    bid_id,
                    documents: &manifest.documents,
                    chunks: &chunks,
                };
                let out = self
                    .runner
                    .run_with_overrides::<TenderRequirements>(spec, &payload, bid_override(bid_id))
                    .await?;
                Ok(((out.artifact, chunks), out.cache_hit))
            })
            .await?;

        write_json(&bid_dir.join("tender_requirements.json"), &requirements)?;
        Ok((requirements, chunks))
    }

    /// Page and chunk logs are rewritten from scratch on every call.
    async fn parse_and_chunk(
        &self,
        bid_id: &str,
        manifest: &EvidenceManifest,
        extracted_dir: &Path,
    ) -> Result<Vec<ChunkRecord>> {
        let mut pages_log = JsonlWriter::create(&extracted_dir.join("pages.jsonl"))?;
        let mut chunks_log = JsonlWriter::create(&extracted_dir.join("chunks.jsonl"))?;
        let mut records = Vec::new();

        for doc in &manifest.documents {
            let pages = self.parse_pages(Path::new(&doc.local_path)).await?;
            for page in &pages {
                pages_log.append(&PageRecord {
                    doc_id: doc.doc_id.clone(),
                    doc_type: doc.doc_type,
                    source_url: doc.source_url.clone(),
                    page_num: page.page_num,
                    text: page.text.clone(),
                })?;
            }

            // Per-document chunking restarts at zero; shift onto the running index.
            let offset = records.len();
            let chunks = self.chunk(&pages)?;
            let chunk_count = chunks.len();
            for chunk in chunks {
                let row = ChunkRecord {
                    chunk_id: chunk.chunk_id,
                    chunk_index: offset + chunk.chunk_index,
                    doc_id: doc.doc_id.clone(),
                    doc_type: doc.doc_type,
                    source_url: doc.source_url.clone(),
                    page_start: chunk.page_start,
                    page_end: chunk.page_end,
                    text: chunk.text,
                };
                chunks_log.append(&row)?;
                records.push(row);
            }

            debug!(doc_id = %doc.doc_id, pages = pages.len(), chunk_count, "document parsed");
            self.events.emit(PipelineEvent::DocumentParsed {
                bid_id: bid_id.to_string(),
                doc_id: doc.doc_id.clone(),
                pages: pages.len(),
                chunks: chunk_count,
            });
        }

        pages_log.finish()?;
        chunks_log.finish()?;
        Ok(records)
    }

    async fn verify_in(
        &self,
        ctx: &RunCtx,
        requirements: &TenderRequirements,
        chunks: &[ChunkRecord],
    ) -> Result<Vec<VerifierReport>> {
        let (a, b, c) = tokio::join!(
            self.verify_one(ctx, VerifierId::A, requirements, chunks),
            self.verify_one(ctx, VerifierId::B, requirements, chunks),
            self.verify_one(ctx, VerifierId::C, requirements, chunks),
        );

        let mut reports = Vec::with_capacity(VERIFIER_QUORUM);
        let mut failures = Vec::new();
        for (id, result) in VerifierId::ALL.into_iter().zip([a, b, c]) {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => failures.push(format!("{id}: {e}")),
            }
        }

        if !failures.is_empty() {
            return Err(TenderFitError::VerifierQuorum {
                required: VERIFIER_QUORUM,
                completed: reports.len(),
                failures,
            }
            .in_stage("verify"));
        }
        Ok(reports)
    }

    async fn verify_one(
        &self,
        ctx: &RunCtx,
        verifier_id: VerifierId,
        requirements: &TenderRequirements,
        chunks: &[ChunkRecord],
    ) -> Result<VerifierReport> {
        let bid_id = ctx.bid_id.as_str();
        let spec = &self.stages.verifier(verifier_id);
        let label = format!("verify/{verifier_id}");
        let payload = &VerifyPayload {
            bid_id,
            verifier_id,
            requirements,
            chunks,
        };
        let mut overrides = bid_override(bid_id);
        overrides.insert("verifier_id".into(), json!(verifier_id.as_str()));
        let overrides = &overrides;

        let report = self
            .stage(ctx, &label, || async move {
                let out = self
                    .runner
                    .run_with_overrides::<VerifierReport>(spec, payload, overrides.clone())
                    .await?;
                Ok((out.artifact, out.cache_hit))
            })
            .await?;

        self.events.emit(PipelineEvent::VerifierFinished {
            bid_id: bid_id.to_string(),
            verifier_id,
            tally: tally(&report),
        });
        Ok(report)
    }

    async fn arbitrate_in(
        &self,
        ctx: &RunCtx,
        requirements: &TenderRequirements,
        verifier_reports: &[VerifierReport],
        company_profile: &CompanyProfile,
    ) -> Result<ArbitrationOutput> {
        let bid_id = ctx.bid_id.as_str();
        let verifier_reports = ordered_quorum(verifier_reports).map_err(|e| e.in_stage("arbitrate"))?;
        let spec = &self.stages.arbiter();
        let payload = &ArbitratePayload {
            bid_id,
            requirements,
            verifier_reports: &verifier_reports,
            company_profile,
        };

        let report = self
            .stage(ctx, "arbitrate", || async move {
                let out = self
                    .runner
                    .run_with_overrides::<TenderFitReport>(spec, payload, bid_override(bid_id))
                    .await?;
                Ok((out.artifact, out.cache_hit))
            })
            .await?;

        let markdown = render_markdown(&report, Utc::now());
        let name = bid_path_segment(bid_id)?;
        let report_json_path = self.paths.reports_dir.join(format!("{name}.json"));
        let report_md_path = self.paths.reports_dir.join(format!("{name}.md"));
        write_json(&report_json_path, &report)?;
        write_text(&report_md_path, &markdown)?;

        Ok(ArbitrationOutput {
            report,
            markdown,
            report_json_path,
            report_md_path,
        })
    }

    // -----------------------------------------------------------------------
    // Collaborators
    // -----------------------------------------------------------------------

    /// Page text for `path`, cached by file content.
    async fn parse_pages(&self, path: &Path) -> Result<Vec<PageText>> {
        let bytes = std::fs::read(path).map_err(|e| TenderFitError::io(path, e))?;
        let key = json!({
            "path": path.display().to_string(),
            "sha256": sha256_hex(&bytes),
            "source": self.pages.name(),
        });
        if let Some(hit) = self.cache_get::<Vec<PageText>>("parse_pdf", &key) {
            return Ok(hit);
        }
        let pages = self.pages.pages(path).await?;
        self.cache_set("parse_pdf", &key, &pages);
        Ok(pages)
    }

    fn chunk(&self, pages: &[PageText]) -> Result<Vec<TextChunk>> {
        let key = json!({
            "pages": pages,
            "chunk_size": self.chunking.chunk_size,
            "overlap": self.chunking.overlap,
        });
        if let Some(hit) = self.cache_get::<Vec<TextChunk>>("chunk_text", &key) {
            return Ok(hit);
        }
        let chunks = chunk_pages(pages, self.chunking.chunk_size, self.chunking.overlap)?;
        self.cache_set("chunk_text", &key, &chunks);
        Ok(chunks)
    }

    fn cache_get<T: serde::de::DeserializeOwned>(&self, op: &str, key: &Value) -> Option<T> {
        if self.force_refresh {
            return None;
        }
        match self.cache.as_ref()?.get_as::<T>(op, key) {
            Ok(hit) => hit,
            Err(e) => {
                warn!(op, error = %e, "cache read failed");
                None
            }
        }
    }

    fn cache_set(&self, op: &str, key: &Value, value: &impl Serialize) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(op, key, value) {
                warn!(op, error = %e, "cache write failed");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Stage bookkeeping
    // -----------------------------------------------------------------------

    /// Run one stage with caller-level retry, events, and ledger rows.
    ///
    /// `op` yields the value and whether it came from cache. Only retryable
    /// errors are retried, up to `retry.max_attempts` attempts in total.
    async fn stage<T, F, Fut>(&self, ctx: &RunCtx, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(T, bool)>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            self.events.emit(PipelineEvent::StageStarted {
                bid_id: ctx.bid_id.clone(),
                stage: label.to_string(),
                attempt,
            });
            let started = Instant::now();
            let result = op().await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let record = StageRunRecord {
                stage: label.to_string(),
                attempt,
                cache_hit: matches!(&result, Ok((_, true))),
                duration_ms,
                error: result.as_ref().err().map(|e| e.to_string()),
            };
            self.record_stage(ctx, &record).await;

            match result {
                Ok((value, cache_hit)) => {
                    info!(bid_id = %ctx.bid_id, stage = label, cache_hit, duration_ms, "stage finished");
                    self.events.emit(PipelineEvent::StageFinished {
                        bid_id: ctx.bid_id.clone(),
                        stage: label.to_string(),
                        cache_hit,
                        duration_ms,
                    });
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(bid_id = %ctx.bid_id, stage = label, attempt, error = %e, "retrying stage");
                    attempt += 1;
                }
                Err(e) => return Err(e.in_stage(label)),
            }
        }
    }

    async fn start_run(&self, bid_id: &str) -> Option<String> {
        let ledger = self.ledger.as_ref()?;
        match ledger.insert_run(bid_id).await {
            Ok(run_id) => Some(run_id),
            Err(e) => {
                warn!(error = %e, "could not record run start");
                None
            }
        }
    }

    async fn record_stage(&self, ctx: &RunCtx, record: &StageRunRecord) {
        let (Some(ledger), Some(run_id)) = (&self.ledger, &ctx.run_id) else {
            return;
        };
        if let Err(e) = ledger.record_stage(run_id, record).await {
            warn!(error = %e, "could not record stage run");
        }
    }

    async fn finish_run(&self, ctx: &RunCtx, outcome: std::result::Result<&ArbitrationOutput, &TenderFitError>) {
        let (Some(ledger), Some(run_id)) = (&self.ledger, &ctx.run_id) else {
            return;
        };
        let written = match outcome {
            Ok(arbitration) => {
                let json_path = arbitration.report_json_path.display().to_string();
                let md_path = arbitration.report_md_path.display().to_string();
                let decision = arbitration.report.decision.to_string();
                ledger
                    .finish_run_success(
                        run_id,
                        RunSuccess {
                            decision: &decision,
                            fit_score: arbitration.report.fit_score,
                            report_json_path: &json_path,
                            report_md_path: &md_path,
                        },
                    )
                    .await
            }
            Err(e) => ledger.finish_run_failure(run_id, &e.to_string()).await,
        };
        if let Err(e) = written {
            warn!(error = %e, "could not record run outcome");
        }
    }

    fn resolve_bid_dir(&self, bid_id: &str, out_dir: Option<&Path>) -> Result<PathBuf> {
        match out_dir {
            Some(dir) => Ok(dir.to_path_buf()),
            None => self.bid_dir(bid_id),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// The authoritative download list: one entry per source that exists on disk,
/// numbered `DOC-001`, `DOC-002`, ... in source order.
pub fn downloaded_docs(doc_urls: &[String], docs_dir: &Path) -> Vec<DownloadedDoc> {
    let mut docs: Vec<DownloadedDoc> = Vec::new();
    for source in doc_urls {
        let dest = doc_dest_from_url(source, docs_dir);
        let local_path = dest.display().to_string();
        if !dest.exists() || docs.iter().any(|d| d.local_path == local_path) {
            continue;
        }
        docs.push(DownloadedDoc {
            doc_id: format!("DOC-{:03}", docs.len() + 1),
            source_url: normalize_source_url(source),
            filename: dest
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            local_path,
        });
    }
    docs
}

/// Read a company profile and validate it against its schema.
pub fn load_company_profile(path: &Path, stages: &StageCatalog) -> Result<CompanyProfile> {
    let content = std::fs::read_to_string(path).map_err(|e| TenderFitError::io(path, e))?;
    let value: Value = serde_json::from_str(&content)
        .map_err(|e| TenderFitError::parse(format!("{}: invalid JSON: {e}", path.display())))?;
    let schema = load_schema(&stages.company_profile_schema())?;
    parse_artifact("CompanyProfile", &schema, value)
}

/// Arbitration needs exactly one report from each of A, B and C.
fn ordered_quorum(reports: &[VerifierReport]) -> Result<Vec<VerifierReport>> {
    let mut ordered = Vec::with_capacity(VERIFIER_QUORUM);
    let mut missing = Vec::new();
    for id in VerifierId::ALL {
        match reports.iter().find(|r| r.verifier_id == id.as_str()) {
            Some(report) => ordered.push(report.clone()),
            None => missing.push(format!("{id}: report missing")),
        }
    }
    if !missing.is_empty() {
        return Err(TenderFitError::VerifierQuorum {
            required: VERIFIER_QUORUM,
            completed: ordered.len(),
            failures: missing,
        });
    }
    Ok(ordered)
}

fn tally(report: &VerifierReport) -> [(VerdictStatus, u32); 3] {
    let count = |status| report.results.iter().filter(|r| r.status == status).count() as u32;
    [
        (VerdictStatus::Pass, count(VerdictStatus::Pass)),
        (VerdictStatus::Fail, count(VerdictStatus::Fail)),
        (VerdictStatus::NeedsReview, count(VerdictStatus::NeedsReview)),
    ]
}

fn bid_override(bid_id: &str) -> Map<String, Value> {
    let mut overrides = Map::new();
    overrides.insert("bid_id".into(), json!(bid_id));
    overrides
}

/// A single path segment for `bid_id` (e.g. `GEM/2025/B/1` → `GEM%2F2025%2FB%2F1`).
///
/// Bytes outside `[A-Za-z0-9._-]` are percent-encoded, `%` included, so
/// distinct ids never share a segment.
pub fn bid_path_segment(bid_id: &str) -> Result<String> {
    if bid_id.trim().is_empty() || bid_id.chars().all(|c| c == '.') {
        return Err(TenderFitError::validation(format!("invalid bid id: {bid_id:?}")));
    }
    let mut segment = String::with_capacity(bid_id.len());
    for byte in bid_id.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            segment.push(char::from(byte));
        } else {
            segment.push_str(&format!("%{byte:02X}"));
        }
    }
    Ok(segment)
}

/// Pretty JSON plus trailing newline, written via temp file and rename.
pub fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let mut text = serde_json::to_string_pretty(value)
        .map_err(|e| TenderFitError::validation(format!("failed to serialize {}: {e}", path.display())))?;
    text.push('\n');
    write_text(path, &text)
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| TenderFitError::io(dir, e))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::now_v7()));
    std::fs::write(&temp, text).map_err(|e| TenderFitError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        TenderFitError::io(path, e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use tenderfit_reasoning::{ReasoningRequest, ReasoningResponse};
    use tenderfit_shared::{Decision, FetchConfig};
    use tenderfit_text::PlainTextSource;

    use crate::stages::{ARBITER, COLLECTOR, EXTRACTOR, VERIFIER};

    /// In-memory reasoning backend answering each stage from its payload.
    #[derive(Default)]
    struct Scripted {
        calls: Mutex<Vec<String>>,
        failing_verifier: Option<&'static str>,
        arbiter_empty_responses: AtomicU32,
        broken_extractor: bool,
    }

    impl Scripted {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, label: &str) -> usize {
            self.calls().iter().filter(|c| c.as_str() == label).count()
        }
    }

    #[async_trait]
    impl ReasoningClient for Scripted {
        async fn invoke(&self, request: ReasoningRequest) -> Result<ReasoningResponse> {
            let payload: Value = serde_json::from_str(&request.user_payload).unwrap();
            let label = match request.stage.as_str() {
                VERIFIER => format!("{VERIFIER}:{}", payload["verifier_id"].as_str().unwrap()),
                other => other.to_string(),
            };
            self.calls.lock().unwrap().push(label.clone());

            match request.stage.as_str() {
                COLLECTOR => {
                    let mut documents: Vec<Value> = payload["downloaded_docs"]
                        .as_array()
                        .unwrap()
                        .iter()
                        .map(|d| {
                            let filename = d["filename"].as_str().unwrap();
                            json!({
                                "doc_id": d["doc_id"],
                                "source_url": "https://wrong.example/doc.pdf",
                                "local_path": "/nowhere/doc.pdf",
                                "doc_type": if filename.contains("corrigendum") { "corrigendum" } else { "base" },
                                "title": filename,
                                "fetched_at": null
                            })
                        })
                        .collect();
                    documents.push(json!({
                        "doc_id": "DOC-999",
                        "source_url": "https://wrong.example/ghost.pdf",
                        "local_path": "/nowhere/ghost.pdf",
                        "doc_type": "atc",
                        "title": null,
                        "fetched_at": null
                    }));
                    Ok(ReasoningResponse::parsed(json!({
                        "bid_id": "model-invented-id",
                        "generated_at": null,
                        "documents": documents
                    })))
                }
                EXTRACTOR if self.broken_extractor => {
                    Ok(ReasoningResponse::text(r#"{"bid_id": "B"}"#))
                }
                EXTRACTOR => {
                    let chunk = &payload["chunks"][0];
                    let requirements = json!({
                        "bid_id": payload["bid_id"],
                        "title": "Hiring of taxi",
                        "closing_date": null,
                        "requirements": [
                            {
                                "id": "REQ-1",
                                "category": "eligibility",
                                "requirement": "Turnover of 50 lakhs",
                                "mandatory": true,
                                "citations": [{
                                    "source_url": chunk["source_url"],
                                    "doc_type": chunk["doc_type"],
                                    "page": chunk["page_start"],
                                    "quote": "Tender",
                                    "anchor": chunk["chunk_id"],
                                    "notes": null
                                }],
                                "notes": null
                            },
                            {
                                "id": "REQ-2",
                                "category": "sla",
                                "requirement": "24x7 availability",
                                "mandatory": null,
                                "citations": [],
                                "notes": null
                            }
                        ]
                    });
                    Ok(ReasoningResponse::text(requirements.to_string()))
                }
                VERIFIER => {
                    let id = payload["verifier_id"].as_str().unwrap();
                    if self.failing_verifier == Some(id) {
                        return Err(TenderFitError::validation(format!("verifier {id} refused")));
                    }
                    Ok(ReasoningResponse::parsed(json!({
                        "bid_id": payload["bid_id"],
                        "verifier_id": "A",
                        "summary": {"passed": 1, "failed": 0, "needs_review": 1},
                        "results": [
                            {"requirement_id": "REQ-1", "status": "PASS", "notes": "quote found", "citations": null},
                            {"requirement_id": "REQ-2", "status": "NEEDS_REVIEW", "notes": "uncited", "citations": null}
                        ]
                    })))
                }
                ARBITER => {
                    let remaining = self.arbiter_empty_responses.load(Ordering::SeqCst);
                    if remaining > 0 {
                        self.arbiter_empty_responses.store(remaining - 1, Ordering::SeqCst);
                        return Ok(ReasoningResponse::default());
                    }
                    assert_eq!(payload["verifier_reports"].as_array().unwrap().len(), 3);
                    Ok(ReasoningResponse::parsed(json!({
                        "bid_id": payload["bid_id"],
                        "decision": "GO",
                        "fit_score": 82,
                        "summary": "Strong fleet match.",
                        "eligibility": {"pass": true, "reasons": [
                            {"requirement_id": "REQ-1", "status": "PASS", "notes": "meets turnover", "citations": []}
                        ]},
                        "gaps": ["24x7 availability unconfirmed"],
                        "citations": [],
                        "requirements_reviewed": ["REQ-1", "REQ-2"]
                    })))
                }
                other => panic!("unexpected stage {other}"),
            }
        }
    }

    struct Fixture {
        root: PathBuf,
        client: Arc<Scripted>,
        orchestrator: Orchestrator,
        doc_urls: Vec<String>,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    fn schemas_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../../schemas")
    }

    fn fixture(client: Scripted) -> Fixture {
        let root = std::env::temp_dir().join(format!("tf-orch-{}", uuid::Uuid::now_v7()));
        let sources = root.join("sources");
        std::fs::create_dir_all(&sources).unwrap();
        std::fs::write(
            sources.join("base.txt"),
            "Tender for hiring of taxi vehicles.\u{c}Bidder turnover must be 50 lakhs.\u{c}",
        )
        .unwrap();
        std::fs::write(sources.join("corrigendum.txt"), "Closing date extended.").unwrap();

        let client = Arc::new(client);
        let settings = StageSettings {
            model: "test-model".into(),
            temperature: 0.0,
            max_output_tokens: None,
        };
        let cache = ToolCache::new(root.join("cache"));
        let runner = StageRunner::new(client.clone(), settings).with_cache(cache.clone());
        let orchestrator = Orchestrator::new(
            runner,
            StageCatalog::new(schemas_dir()),
            Arc::new(Fetcher::new(&FetchConfig::default()).unwrap()),
            Arc::new(PlainTextSource),
            PipelinePaths {
                artifacts_dir: root.join("artifacts"),
                reports_dir: root.join("reports"),
            },
        )
        .with_cache(cache, false);

        let doc_urls = vec![
            sources.join("base.txt").display().to_string(),
            format!("file://{}", sources.join("corrigendum.txt").display()),
        ];
        Fixture {
            root,
            client,
            orchestrator,
            doc_urls,
        }
    }

    fn profile() -> CompanyProfile {
        serde_json::from_value(json!({
            "company_name": "Acme Travels",
            "fleet": {"sedan": 12, "suv": 4, "muv": 2, "hatchback": 6, "model_year_min": 2020},
            "docs": {"gst": true, "pan": true},
            "financials": {"turnover_last_3y_inr": [6000000, 7200000, 8100000]},
            "experience": {"govt_contracts_count": 3},
            "operations": {"cities_served": ["Delhi"], "24x7_capable": false}
        }))
        .unwrap()
    }

    fn request(fx: &Fixture, bid_id: &str) -> BidEvaluation {
        BidEvaluation {
            bid_id: bid_id.into(),
            doc_urls: fx.doc_urls.clone(),
            company_profile: profile(),
            artifacts_dir: None,
        }
    }

    #[tokio::test]
    async fn full_evaluation_persists_every_artifact() {
        let fx = fixture(Scripted::default());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let orchestrator = fx.orchestrator.clone().with_events(EventSink::new(tx));

        let outcome = orchestrator
            .evaluate_bid(&request(&fx, "GEM/2025/B/7"))
            .await
            .unwrap();

        // Manifest: ghost doc dropped, facts restored, classification kept.
        let docs = &outcome.manifest.documents;
        assert_eq!(outcome.manifest.bid_id, "GEM/2025/B/7");
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].doc_id, "DOC-001");
        assert!(docs[0].source_url.starts_with("file:///"));
        assert!(docs[0].local_path.ends_with("docs/base.txt"));
        assert_eq!(docs[1].doc_type, tenderfit_shared::DocType::Corrigendum);
        assert!(docs.iter().all(|d| d.fetched_at.is_some()));

        let bid_dir = fx.root.join("artifacts").join("GEM%2F2025%2FB%2F7");
        assert!(bid_dir.join("evidence_manifest.json").exists());
        assert!(bid_dir.join("tender_requirements.json").exists());
        let pages: Vec<PageRecord> =
            tenderfit_text::read_jsonl(&bid_dir.join("extracted/pages.jsonl")).unwrap();
        assert_eq!(pages.len(), 3);
        let chunks: Vec<ChunkRecord> =
            tenderfit_text::read_jsonl(&bid_dir.join("extracted/chunks.jsonl")).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chunk_id, "p1-c1");
        assert_eq!(chunks[2].doc_id, "DOC-002");
        let indices: Vec<usize> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(chunks[2].chunk_id, "p1-c1");

        let ids: Vec<&str> = outcome
            .verifier_reports
            .iter()
            .map(|r| r.verifier_id.as_str())
            .collect();
        assert_eq!(ids, vec!["A", "B", "C"]);

        let report = &outcome.arbitration.report;
        assert_eq!(report.decision, Decision::Go);
        assert_eq!(report.bid_id, "GEM/2025/B/7");
        assert!(outcome.arbitration.report_json_path.ends_with("GEM%2F2025%2FB%2F7.json"));
        let md = std::fs::read_to_string(&outcome.arbitration.report_md_path).unwrap();
        assert!(md.starts_with("# Tender Fit Report: GEM/2025/B/7\n"));
        assert!(md.contains("## Gaps\n- 24x7 availability unconfirmed"));

        drop(orchestrator);
        let mut parsed = 0;
        let mut verifiers = 0;
        let mut finished = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                PipelineEvent::DocumentParsed { .. } => parsed += 1,
                PipelineEvent::VerifierFinished { .. } => verifiers += 1,
                PipelineEvent::EvaluationFinished { .. } => finished = true,
                _ => {}
            }
        }
        assert_eq!((parsed, verifiers, finished), (2, 3, true));
    }

    #[tokio::test]
    async fn repeated_evaluation_reuses_cached_stages() {
        let fx = fixture(Scripted::default());
        fx.orchestrator.evaluate_bid(&request(&fx, "B1")).await.unwrap();
        fx.orchestrator.evaluate_bid(&request(&fx, "B1")).await.unwrap();
        assert_eq!(fx.client.count(COLLECTOR), 1);
        for id in ["A", "B", "C"] {
            assert!(fx.client.count(&format!("{VERIFIER}:{id}")) >= 1);
        }
    }

    #[tokio::test]
    async fn verifier_failure_blocks_arbitration() {
        let fx = fixture(Scripted {
            failing_verifier: Some("B"),
            ..Default::default()
        });
        let err = fx
            .orchestrator
            .evaluate_bid(&request(&fx, "B2"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "verifier_quorum");
        assert_eq!(err.stage(), Some("verify"));
        assert!(err.violations()[0].starts_with("B: "));
        // The other verifiers still ran to completion.
        assert_eq!(fx.client.count(&format!("{VERIFIER}:A")), 1);
        assert_eq!(fx.client.count(&format!("{VERIFIER}:C")), 1);
        assert_eq!(fx.client.count(ARBITER), 0);
        assert!(!fx.root.join("reports").join("B2.json").exists());
    }

    #[tokio::test]
    async fn arbitration_requires_all_three_reports() {
        let fx = fixture(Scripted::default());
        let outcome = fx.orchestrator.evaluate_bid(&request(&fx, "B3")).await.unwrap();
        let calls_before = fx.client.count(ARBITER);

        let two = &outcome.verifier_reports[..2];
        let err = fx
            .orchestrator
            .arbitrate("B3", &outcome.requirements, two, &profile())
            .await
            .unwrap_err();
        match &err {
            TenderFitError::Stage { source, .. } => match source.as_ref() {
                TenderFitError::VerifierQuorum { required, completed, .. } => {
                    assert_eq!((*required, *completed), (3, 2));
                }
                other => panic!("unexpected inner error {other:?}"),
            },
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(fx.client.count(ARBITER), calls_before);
    }

    #[tokio::test]
    async fn empty_output_is_retried_and_recorded() {
        let fx = fixture(Scripted {
            arbiter_empty_responses: AtomicU32::new(1),
            ..Default::default()
        });
        let db = fx.root.join("ledger.db");
        let ledger = Arc::new(Storage::open(&db).await.unwrap());
        let orchestrator = fx.orchestrator.clone().with_ledger(ledger.clone());

        let outcome = orchestrator.evaluate_bid(&request(&fx, "B4")).await.unwrap();
        assert_eq!(fx.client.count(ARBITER), 2);

        let runs = ledger.list_runs(Some("B4")).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(Some(runs[0].run_id.clone()), outcome.run_id);
        assert_eq!(runs[0].decision.as_deref(), Some("GO"));
        let arbitrate: Vec<_> = runs[0]
            .stages
            .iter()
            .filter(|s| s.stage == "arbitrate")
            .collect();
        assert_eq!(arbitrate.len(), 2);
        assert!(arbitrate[0].error.is_some());
        assert_eq!(arbitrate[1].attempt, 2);
        assert!(arbitrate[1].error.is_none());
    }

    #[tokio::test]
    async fn schema_violation_aborts_before_persisting() {
        let fx = fixture(Scripted {
            broken_extractor: true,
            ..Default::default()
        });
        let err = fx
            .orchestrator
            .evaluate_bid(&request(&fx, "B5"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "schema_validation");
        assert_eq!(err.stage(), Some(EXTRACTOR));
        assert!(!err.violations().is_empty());
        assert_eq!(fx.client.count(EXTRACTOR), 1);
        let bid_dir = fx.root.join("artifacts").join("B5");
        assert!(bid_dir.join("evidence_manifest.json").exists());
        assert!(!bid_dir.join("tender_requirements.json").exists());
        assert!(!fx.root.join("reports").join("B5.json").exists());
    }

    #[tokio::test]
    async fn concurrent_bids_fail_independently() {
        let fx = fixture(Scripted::default());
        let mut missing = request(&fx, "B-missing");
        missing.doc_urls = vec![fx.root.join("nope.pdf").display().to_string()];

        let results = fx
            .orchestrator
            .evaluate_many(vec![request(&fx, "B-ok"), missing])
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].bid_id, "B-ok");
        assert!(results[0].result.is_ok());
        assert_eq!(results[1].bid_id, "B-missing");
        let err = results[1].result.as_ref().unwrap_err();
        assert_eq!(err.stage(), Some("collect"));
    }

    #[test]
    fn download_list_numbers_existing_files_in_order() {
        let dir = std::env::temp_dir().join(format!("tf-dl-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.pdf"), "a").unwrap();
        std::fs::write(dir.join("c.pdf"), "c").unwrap();
        let urls = vec![
            "https://x.org/a.pdf".to_string(),
            "https://x.org/b.pdf".to_string(),
            "/elsewhere/c.pdf".to_string(),
            "https://mirror.org/a.pdf".to_string(),
        ];
        let docs = downloaded_docs(&urls, &dir);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].doc_id, "DOC-001");
        assert_eq!(docs[0].source_url, "https://x.org/a.pdf");
        assert_eq!(docs[1].doc_id, "DOC-002");
        assert_eq!(docs[1].source_url, "file:///elsewhere/c.pdf");
        assert_eq!(docs[1].filename, "c.pdf");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn bid_ids_become_single_segments() {
        assert_eq!(bid_path_segment("GEM/2025/B/1").unwrap(), "GEM%2F2025%2FB%2F1");
        assert_eq!(bid_path_segment("B-1.v2").unwrap(), "B-1.v2");
        assert_eq!(bid_path_segment("a b").unwrap(), "a%20b");
        assert!(bid_path_segment("..").is_err());
        assert!(bid_path_segment("  ").is_err());
    }

    #[test]
    fn concurrent_writes_to_one_file_all_land() {
        let dir = std::env::temp_dir().join(format!("tf-write-{}", uuid::Uuid::now_v7()));
        let target = dir.join("report.json");
        std::thread::scope(|scope| {
            for n in 0..8 {
                let target = &target;
                scope.spawn(move || write_json(target, &json!({ "writer": n })).unwrap());
            }
        });
        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&target).unwrap()).unwrap();
        assert!(written["writer"].is_u64());
        let leftovers = std::fs::read_dir(&dir).unwrap().count();
        assert_eq!(leftovers, 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn distinct_bid_ids_never_share_a_segment() {
        let ids = ["GEM/1", "GEM_1", "GEM%2F1", "GEM 1", "GEM\\1", "₹1", "_1"];
        let segments: std::collections::HashSet<String> =
            ids.iter().map(|id| bid_path_segment(id).unwrap()).collect();
        assert_eq!(segments.len(), ids.len());
        assert!(segments.iter().all(|s| !s.contains('/') && !s.contains('\\')));
    }

    #[tokio::test]
    async fn lookalike_bids_keep_separate_reports() {
        let fx = fixture(Scripted::default());
        let requests = vec![request(&fx, "GEM/1"), request(&fx, "GEM_1")];
        let results = fx.orchestrator.evaluate_many(requests).await;

        let paths: Vec<PathBuf> = results
            .iter()
            .map(|r| r.result.as_ref().unwrap().arbitration.report_json_path.clone())
            .collect();
        assert_ne!(paths[0], paths[1]);
        for (path, bid_id) in paths.iter().zip(["GEM/1", "GEM_1"]) {
            let report: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
            assert_eq!(report["bid_id"], bid_id);
        }
    }

    #[test]
    fn company_profile_is_schema_checked() {
        let fx = fixture(Scripted::default());
        let good = fx.root.join("company.json");
        std::fs::write(&good, serde_json::to_string(&profile()).unwrap()).unwrap();
        let loaded = fx.orchestrator.load_company_profile(&good).unwrap();
        assert_eq!(loaded.company_name, "Acme Travels");

        let bad = fx.root.join("bad.json");
        std::fs::write(&bad, r#"{"company_name": "X"}"#).unwrap();
        let err = fx.orchestrator.load_company_profile(&bad).unwrap_err();
        assert_eq!(err.kind(), "schema_validation");
    }
}
