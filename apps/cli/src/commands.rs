//! CLI command definitions, routing, and tracing setup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Report, Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use tenderfit_cache::ToolCache;
use tenderfit_core::evals::{DEFAULT_EVALS_DIR, format_report, load_suite, run_suite};
use tenderfit_core::orchestrator::{bid_path_segment, downloaded_docs, write_json};
use tenderfit_core::shortlist::{collect_rows, rank, write_csv};
use tenderfit_core::{
    BidEvaluation, BidResult, EventSink, Orchestrator, PipelineEvent, StageCatalog,
    load_company_profile,
};
use tenderfit_discovery::{
    DiscoveryOptions, SearchQuery, default_listing_path, refresh_listing, search_listing,
};
use tenderfit_fetcher::Fetcher;
use tenderfit_reasoning::OpenAiResponsesClient;
use tenderfit_shared::{
    AppConfig, DocType, EvidenceDocument, EvidenceManifest, Listing, ListingBid, TenderFitError,
    init_config, load_config, load_config_from, now_rfc3339, validate_config,
};
use tenderfit_storage::Storage;

/// Crates whose logs follow `-v`.
const LOG_TARGETS: &[&str] = &[
    "tenderfit",
    "tenderfit_core",
    "tenderfit_reasoning",
    "tenderfit_schema",
    "tenderfit_discovery",
    "tenderfit_fetcher",
    "tenderfit_text",
    "tenderfit_cache",
    "tenderfit_storage",
    "tenderfit_shared",
];

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// TenderFit: evaluate procurement tenders against a company profile.
#[derive(Parser)]
#[command(
    name = "tenderfit",
    version,
    about = "Scan bid listings, fetch tender documents, and score bids against a company profile.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.tenderfit/tenderfit.toml).
    #[arg(long, global = true, env = "TENDERFIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Ignore cached results. Fresh results are still cached.
    #[arg(long, global = true)]
    pub force_refresh: bool,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Search the bid listing and record matching bids.
    Scan {
        /// Search terms, matched against title, summary and keywords.
        #[arg(long)]
        keywords: String,

        /// Only bids published within this many days.
        #[arg(long, default_value_t = 14)]
        days: u32,

        /// Maximum number of bids returned.
        #[arg(long, default_value_t = 30)]
        top: usize,

        /// Bid listing file (JSON array or JSONL).
        #[arg(long)]
        data: Option<PathBuf>,

        /// Refresh the listing file from this URL before searching.
        #[arg(long)]
        listing_url: Option<String>,

        /// Let the scout stage shortlist the matches.
        #[arg(long)]
        scout: bool,
    },

    /// Download a bid's documents and write a provisional manifest.
    Fetch {
        #[arg(long)]
        bid_id: String,

        /// Extra document URL or path (repeatable).
        #[arg(long = "url")]
        urls: Vec<String>,
    },

    /// Run the full evaluation pipeline for one or more bids.
    Evaluate {
        /// Bid to evaluate (repeatable; bids run concurrently).
        #[arg(long = "bid-id", required = true)]
        bid_ids: Vec<String>,

        /// Company profile JSON.
        #[arg(long)]
        company: PathBuf,

        /// Document source for a single bid (repeatable). Defaults to the
        /// documents recorded by `fetch`.
        #[arg(long = "doc")]
        docs: Vec<String>,

        /// Also write the results object to this file.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Rank evaluated bids by fit score into a CSV file.
    Shortlist {
        /// Company profile JSON the reports were scored against.
        #[arg(long)]
        company: PathBuf,

        #[arg(long, default_value_t = 10)]
        top: usize,

        /// CSV output path.
        #[arg(long)]
        out: PathBuf,

        /// Restrict to these bids (comma-separated).
        #[arg(long, value_delimiter = ',')]
        bid_ids: Vec<String>,
    },

    /// Score a citation/coverage eval suite.
    Eval {
        /// Suite name under the evals directory, or a JSONL path.
        #[arg(long, default_value = "quick")]
        suite: String,

        #[arg(long, default_value_t = 0.9)]
        min_coverage: f64,

        #[arg(long, default_value = DEFAULT_EVALS_DIR)]
        evals_dir: PathBuf,
    },

    /// List recorded evaluation runs.
    Runs {
        #[arg(long)]
        bid_id: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let directives: Vec<String> = LOG_TARGETS.iter().map(|t| format!("{t}={level}")).collect();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,{}", directives.join(","))));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

pub(crate) fn print_json(value: &Value) {
    println!("{value:#}");
}

/// `{"error": {kind, message, stage?, violations?}}`
pub(crate) fn error_payload(report: &Report) -> Value {
    let body = match report.downcast_ref::<TenderFitError>() {
        Some(err) => error_body(err),
        None => json!({"kind": "internal", "message": format!("{report:#}")}),
    };
    json!({ "error": body })
}

fn error_body(err: &TenderFitError) -> Value {
    let mut body = Map::new();
    body.insert("kind".into(), json!(err.kind()));
    body.insert("message".into(), json!(err.to_string()));
    if let Some(stage) = err.stage() {
        body.insert("stage".into(), json!(stage));
    }
    if !err.violations().is_empty() {
        body.insert("violations".into(), json!(err.violations()));
    }
    Value::Object(body)
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Resolved config plus global flags.
struct Context {
    config: AppConfig,
    force_refresh: bool,
}

impl Context {
    fn load(cli: &Cli) -> Result<Self> {
        let config = match &cli.config {
            Some(path) => load_config_from(path)?,
            None => load_config()?,
        };
        validate_config(&config)?;
        Ok(Self {
            config,
            force_refresh: cli.force_refresh,
        })
    }

    fn cache(&self) -> ToolCache {
        ToolCache::new(&self.config.paths.cache_dir)
    }

    fn stages(&self) -> StageCatalog {
        StageCatalog::new(&self.config.paths.schemas_dir)
    }

    fn bid_dir(&self, bid_id: &str) -> tenderfit_shared::Result<PathBuf> {
        Ok(PathBuf::from(&self.config.paths.artifacts_dir).join(bid_path_segment(bid_id)?))
    }

    fn orchestrator(&self) -> Result<Orchestrator> {
        let client = OpenAiResponsesClient::from_config(&self.config)?;
        Ok(Orchestrator::from_config(
            &self.config,
            Arc::new(client),
            self.force_refresh,
        )?)
    }

    /// Document sources recorded by an earlier `fetch`.
    fn fetched_sources(&self, bid_id: &str) -> tenderfit_shared::Result<Vec<String>> {
        let path = self.bid_dir(bid_id)?.join("evidence_manifest.json");
        if !path.exists() {
            return Err(TenderFitError::validation(format!(
                "no documents fetched for {bid_id}; run `tenderfit fetch --bid-id {bid_id}` or pass --doc"
            )));
        }
        let manifest: EvidenceManifest = read_json(&path)?;
        Ok(manifest.documents.into_iter().map(|d| d.source_url).collect())
    }
}

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<ExitCode> {
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&Context::load(&cli)?),
        };
    }

    let ctx = Context::load(&cli)?;
    match cli.command {
        Command::Scan {
            keywords,
            days,
            top,
            data,
            listing_url,
            scout,
        } => {
            let query = SearchQuery {
                keywords,
                days,
                top_n: top,
            };
            let listing = data.unwrap_or_else(default_listing_path);
            cmd_scan(&ctx, &query, &listing, listing_url.as_deref(), scout).await
        }
        Command::Fetch { bid_id, urls } => cmd_fetch(&ctx, &bid_id, urls).await,
        Command::Evaluate {
            bid_ids,
            company,
            docs,
            out,
        } => cmd_evaluate(&ctx, bid_ids, &company, docs, out.as_deref()).await,
        Command::Shortlist {
            company,
            top,
            out,
            bid_ids,
        } => cmd_shortlist(&ctx, &company, top, &out, bid_ids),
        Command::Eval {
            suite,
            min_coverage,
            evals_dir,
        } => cmd_eval(&suite, min_coverage, &evals_dir),
        Command::Runs { bid_id, limit } => cmd_runs(&ctx, bid_id.as_deref(), limit).await,
        Command::Config { .. } => Ok(ExitCode::SUCCESS),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_scan(
    ctx: &Context,
    query: &SearchQuery,
    listing: &Path,
    listing_url: Option<&str>,
    scout: bool,
) -> Result<ExitCode> {
    if let Some(raw) = listing_url {
        let url = Url::parse(raw).map_err(|e| eyre!("invalid listing URL '{raw}': {e}"))?;
        let opts = DiscoveryOptions {
            timeout_secs: ctx.config.fetch.timeout_secs,
            max_response_bytes: ctx.config.fetch.max_response_bytes,
        };
        refresh_listing(&url, listing, &opts).await?;
    }

    info!(keywords = %query.keywords, listing = %listing.display(), scout, "scanning bids");
    let (bids, notes): (Vec<ListingBid>, Option<String>) = if scout {
        let scouted = ctx.orchestrator()?.scout(query, listing).await?;
        let bids = scouted
            .bids
            .into_iter()
            .map(|b| ListingBid {
                bid_id: b.bid_id,
                title: b.title,
                url: b.links.into_iter().next(),
                closing_date: b.closing_date,
                summary: b.summary,
            })
            .collect();
        (bids, scouted.notes)
    } else {
        let cache = ctx.cache();
        let results = search_listing(listing, query, Some(&cache), ctx.force_refresh)?;
        let bids = results
            .bids
            .into_iter()
            .map(|b| ListingBid {
                bid_id: b.bid_id,
                title: b.title,
                url: b.url,
                closing_date: b.closing_date,
                summary: b.summary,
            })
            .collect();
        (bids, None)
    };

    for bid in &bids {
        let path = ctx.bid_dir(&bid.bid_id)?.join("listing.json");
        let record = Listing {
            query: query.keywords.clone(),
            bid: bid.clone(),
        };
        write_json(&path, &record)?;
    }

    print_json(&json!({
        "query": query.keywords,
        "bids": bids,
        "notes": notes,
    }));
    Ok(ExitCode::SUCCESS)
}

/// Downloads land in `{artifacts_dir}/{bid}`, where `evaluate` looks for them.
async fn cmd_fetch(ctx: &Context, bid_id: &str, extra_urls: Vec<String>) -> Result<ExitCode> {
    let bid_dir = ctx.bid_dir(bid_id)?;
    let fetcher = Fetcher::new(&ctx.config.fetch)?;
    let mut errors = Vec::new();
    let mut sources = Vec::new();

    let listing_path = bid_dir.join("listing.json");
    if listing_path.exists() {
        let listing: Listing = read_json(&listing_path)?;
        if let Some(link) = listing.bid.url {
            match listing_sources(&fetcher, &link).await {
                Ok(found) => sources.extend(found),
                Err(e) => errors.push(format!("{link}: {e}")),
            }
        }
    }
    for url in extra_urls {
        if !sources.contains(&url) {
            sources.push(url);
        }
    }
    if sources.is_empty() {
        return Err(TenderFitError::validation(format!(
            "no document URLs for {bid_id}; run `tenderfit scan` or pass --url"
        ))
        .into());
    }

    let docs_dir = bid_dir.join("docs");
    let report = fetcher.fetch_docs(bid_id, &sources, &docs_dir).await;
    errors.extend(report.errors);

    let fetched_at = now_rfc3339();
    let documents: Vec<EvidenceDocument> = downloaded_docs(&sources, &docs_dir)
        .into_iter()
        .map(|d| EvidenceDocument {
            doc_id: d.doc_id,
            source_url: d.source_url,
            local_path: d.local_path,
            doc_type: DocType::Other,
            title: Some(d.filename),
            fetched_at: Some(fetched_at.clone()),
            extra: Default::default(),
        })
        .collect();
    let manifest = EvidenceManifest {
        bid_id: bid_id.to_string(),
        generated_at: Some(fetched_at),
        documents,
        extra: Default::default(),
    };
    write_json(&bid_dir.join("evidence_manifest.json"), &manifest)?;
    info!(
        bid_id,
        documents = manifest.documents.len(),
        errors = errors.len(),
        "fetch complete"
    );

    print_json(&json!({
        "bid_id": bid_id,
        "documents": manifest.documents,
        "errors": errors,
    }));
    Ok(ExitCode::SUCCESS)
}

/// Direct document links are used as-is; other web pages are searched for
/// PDF links.
async fn listing_sources(fetcher: &Fetcher, link: &str) -> tenderfit_shared::Result<Vec<String>> {
    match Url::parse(link) {
        Ok(url)
            if matches!(url.scheme(), "http" | "https")
                && !url.path().to_ascii_lowercase().ends_with(".pdf") =>
        {
            fetcher.discover_pdf_links(&url).await
        }
        _ => Ok(vec![link.to_string()]),
    }
}

async fn cmd_evaluate(
    ctx: &Context,
    bid_ids: Vec<String>,
    company: &Path,
    docs: Vec<String>,
    out: Option<&Path>,
) -> Result<ExitCode> {
    if !docs.is_empty() && bid_ids.len() > 1 {
        return Err(TenderFitError::validation("--doc applies to a single --bid-id").into());
    }

    let mut orchestrator = ctx.orchestrator()?;
    let company_profile = orchestrator.load_company_profile(company)?;
    match Storage::open(Path::new(&ctx.config.paths.ledger_path)).await {
        Ok(ledger) => orchestrator = orchestrator.with_ledger(Arc::new(ledger)),
        Err(e) => warn!(error = %e, "run ledger unavailable, runs will not be recorded"),
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let orchestrator = orchestrator.with_events(EventSink::new(tx));
    let progress = spawn_progress(rx);

    let mut slots: Vec<Option<Value>> = vec![None; bid_ids.len()];
    let mut positions = Vec::new();
    let mut requests = Vec::new();
    for (index, bid_id) in bid_ids.iter().enumerate() {
        let doc_urls = if docs.is_empty() {
            ctx.fetched_sources(bid_id)
        } else {
            Ok(docs.clone())
        };
        match doc_urls {
            Ok(doc_urls) => {
                positions.push(index);
                requests.push(BidEvaluation {
                    bid_id: bid_id.clone(),
                    doc_urls,
                    company_profile: company_profile.clone(),
                    artifacts_dir: None,
                });
            }
            Err(e) => slots[index] = Some(json!({"bid_id": bid_id, "error": error_body(&e)})),
        }
    }

    info!(bids = requests.len(), "evaluating");
    let outcomes = orchestrator.evaluate_many(requests).await;
    drop(orchestrator);
    if let Err(e) = progress.await {
        warn!(error = %e, "progress display stopped");
    }

    for (index, BidResult { bid_id, result }) in positions.into_iter().zip(outcomes) {
        slots[index] = Some(match result {
            Ok(outcome) => {
                let arbitration = outcome.arbitration;
                json!({
                    "bid_id": bid_id,
                    "decision": arbitration.report.decision,
                    "fit_score": arbitration.report.fit_score,
                    "report_path": arbitration.report_md_path,
                    "report_json_path": arbitration.report_json_path,
                })
            }
            Err(e) => json!({"bid_id": bid_id, "error": error_body(&e)}),
        });
    }

    let results: Vec<Value> = slots.into_iter().flatten().collect();
    let failed = results.iter().any(|r| r.get("error").is_some());
    let payload = json!({ "results": results });
    if let Some(out) = out {
        write_json(out, &payload)?;
    }
    print_json(&payload);
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Spinner on stderr fed by pipeline events; ends when every sender is gone.
fn spawn_progress(mut rx: mpsc::UnboundedReceiver<PipelineEvent>) -> JoinHandle<()> {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        spinner.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    spinner.enable_steady_tick(Duration::from_millis(80));

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                PipelineEvent::EvaluationFinished { .. } | PipelineEvent::EvaluationFailed { .. } => {
                    spinner.println(event.describe());
                }
                _ => spinner.set_message(event.describe()),
            }
        }
        spinner.finish_and_clear();
    })
}

fn cmd_shortlist(
    ctx: &Context,
    company: &Path,
    top: usize,
    out: &Path,
    bid_ids: Vec<String>,
) -> Result<ExitCode> {
    let profile = load_company_profile(company, &ctx.stages())?;
    let allowed: Option<HashSet<String>> = if bid_ids.is_empty() {
        None
    } else {
        Some(bid_ids.into_iter().collect())
    };

    let rows = collect_rows(Path::new(&ctx.config.paths.reports_dir), allowed.as_ref())?;
    let ranked = rank(rows, top);
    write_csv(out, &ranked)?;
    info!(company = %profile.company_name, count = ranked.len(), "shortlist written");

    print_json(&json!({
        "count": ranked.len(),
        "out": out.display().to_string(),
    }));
    Ok(ExitCode::SUCCESS)
}

fn cmd_eval(suite: &str, min_coverage: f64, evals_dir: &Path) -> Result<ExitCode> {
    let cases = load_suite(suite, evals_dir)?;
    let result = run_suite(suite, &cases, min_coverage);
    eprintln!("{}", format_report(&result));
    print_json(&serde_json::to_value(&result)?);
    Ok(if result.passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn cmd_runs(ctx: &Context, bid_id: Option<&str>, limit: usize) -> Result<ExitCode> {
    let ledger = Storage::open(Path::new(&ctx.config.paths.ledger_path)).await?;
    let mut runs = ledger.list_runs(bid_id).await?;
    runs.truncate(limit);
    print_json(&json!({ "runs": runs }));
    Ok(ExitCode::SUCCESS)
}

fn cmd_config_init() -> Result<ExitCode> {
    let path = init_config()?;
    print_json(&json!({ "config": path.display().to_string() }));
    Ok(ExitCode::SUCCESS)
}

fn cmd_config_show(ctx: &Context) -> Result<ExitCode> {
    let toml_str = toml::to_string_pretty(&ctx.config)?;
    println!("{toml_str}");
    Ok(ExitCode::SUCCESS)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> tenderfit_shared::Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| TenderFitError::io(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| TenderFitError::parse(format!("{}: {e}", path.display())))
}
