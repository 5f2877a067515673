//! Bid discovery: keyword and time-window search over a bid listing.
//!
//! The listing is a local JSON / JSONL file of bid records, optionally
//! refreshed from a remote endpoint first. Search is a simple token match over
//! title, summary and keywords, ranked by the number of matching tokens.

mod parser;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;

use tenderfit_cache::{ToolCache, sha256_hex};
use tenderfit_shared::{BidRecord, Result, TenderFitError};

pub use parser::ListingFormat;

/// Default timeout in seconds for fetching a remote listing.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Largest remote listing accepted (20 MB).
const MAX_RESPONSE_SIZE: u64 = 20 * 1024 * 1024;

/// User-Agent string for discovery requests.
const USER_AGENT: &str = concat!("TenderFit/", env!("CARGO_PKG_VERSION"));

/// Listing used when none is given.
pub const DEFAULT_LISTING_PATH: &str = "artifacts/bids.json";

// ---------------------------------------------------------------------------
// Search types
// ---------------------------------------------------------------------------

/// Parameters of one bid search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Whitespace-separated search terms, matched case-insensitively.
    pub keywords: String,
    /// Only bids published within this many days (undated bids always pass).
    pub days: u32,
    /// Maximum number of bids returned.
    pub top_n: usize,
}

impl SearchQuery {
    pub fn new(keywords: impl Into<String>) -> Self {
        Self {
            keywords: keywords.into(),
            days: 14,
            top_n: 30,
        }
    }

    fn tokens(&self) -> Vec<String> {
        self.keywords
            .split_whitespace()
            .map(str::to_lowercase)
            .collect()
    }
}

/// Ranked search output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub query: String,
    pub bids: Vec<BidRecord>,
    /// Matches before truncation to `top_n`.
    pub total: usize,
    #[serde(default)]
    pub cached: bool,
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Rank `records` against `query` relative to `now`.
///
/// With no tokens every in-window bid matches with score 0. Ties keep
/// listing order.
pub fn search_bids(records: &[BidRecord], query: &SearchQuery, now: DateTime<Utc>) -> SearchResults {
    let tokens = query.tokens();
    let cutoff = now - chrono::Duration::days(i64::from(query.days));

    let mut matched: Vec<BidRecord> = records
        .iter()
        .filter_map(|bid| {
            let score = score_bid(bid, &tokens);
            if !tokens.is_empty() && score == 0.0 {
                return None;
            }
            let published = bid.published_at.as_deref().and_then(parser::parse_published_at);
            if published.is_some_and(|p| p < cutoff) {
                return None;
            }
            let mut bid = bid.clone();
            bid.score = Some(score);
            Some(bid)
        })
        .collect();

    matched.sort_by(|a, b| {
        b.score
            .unwrap_or(0.0)
            .total_cmp(&a.score.unwrap_or(0.0))
    });
    let total = matched.len();
    matched.truncate(query.top_n);

    SearchResults {
        query: query.keywords.clone(),
        bids: matched,
        total,
        cached: false,
    }
}

/// Number of tokens found in the bid's title, summary and keywords.
fn score_bid(bid: &BidRecord, tokens: &[String]) -> f64 {
    let haystack = [
        Some(bid.title.as_str()),
        bid.summary.as_deref(),
        bid.keywords.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ")
    .to_lowercase();
    tokens.iter().filter(|t| haystack.contains(t.as_str())).count() as f64
}

/// Load a listing file. A missing file is an empty listing.
pub fn load_listing(path: &Path) -> Result<Vec<BidRecord>> {
    if !path.exists() {
        warn!(path = %path.display(), "bid listing not found, treating as empty");
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path).map_err(|e| TenderFitError::io(path, e))?;
    parser::parse_listing(&content, ListingFormat::from_path(path))
}

/// Search a listing file, memoized in `cache` under `search_bids`.
///
/// The cache key covers the query, the listing path, and the listing's
/// content hash, so editing the listing invalidates earlier results.
#[instrument(skip_all, fields(keywords = %query.keywords, listing = %path.display()))]
pub fn search_listing(
    path: &Path,
    query: &SearchQuery,
    cache: Option<&ToolCache>,
    force_refresh: bool,
) -> Result<SearchResults> {
    let content_hash = match std::fs::read(path) {
        Ok(bytes) => sha256_hex(&bytes),
        Err(_) => String::new(),
    };
    let key = serde_json::json!({
        "query": query,
        "data_path": path.display().to_string(),
        "content_sha256": content_hash,
    });

    if let (Some(cache), false) = (cache, force_refresh) {
        if let Some(mut hit) = cache.get_as::<SearchResults>("search_bids", &key)? {
            debug!("search results served from cache");
            hit.cached = true;
            return Ok(hit);
        }
    }

    let records = load_listing(path)?;
    let results = search_bids(&records, query, Utc::now());
    info!(
        listed = records.len(),
        matched = results.total,
        returned = results.bids.len(),
        "bid search complete"
    );

    if let Some(cache) = cache {
        cache.set("search_bids", &key, &results)?;
    }
    Ok(results)
}

// ---------------------------------------------------------------------------
// Remote listings
// ---------------------------------------------------------------------------

/// Configuration for remote listing fetches.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Timeout for HTTP requests in seconds.
    pub timeout_secs: u64,
    /// Largest body accepted, in bytes.
    pub max_response_bytes: u64,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_response_bytes: MAX_RESPONSE_SIZE,
        }
    }
}

/// Download a remote listing and store it at `dest`, returning its records.
///
/// The body is validated before `dest` is touched, so a bad response never
/// clobbers a good local listing.
#[instrument(skip_all, fields(url = %url))]
pub async fn refresh_listing(url: &Url, dest: &Path, opts: &DiscoveryOptions) -> Result<Vec<BidRecord>> {
    let client = build_client(opts)?;
    let body = fetch_body(&client, url, opts.max_response_bytes).await?;
    let records = parser::parse_listing(&body, ListingFormat::sniff(&body))?;

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| TenderFitError::io(parent, e))?;
    }
    let serialized = match ListingFormat::from_path(dest) {
        ListingFormat::JsonArray => serde_json::to_string_pretty(&records),
        ListingFormat::JsonLines => records
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(|lines| lines.join("\n") + "\n"),
    }
    .map_err(|e| TenderFitError::validation(format!("listing not serializable: {e}")))?;

    let temp = dest.with_extension("tmp");
    std::fs::write(&temp, serialized).map_err(|e| TenderFitError::io(&temp, e))?;
    std::fs::rename(&temp, dest).map_err(|e| TenderFitError::io(dest, e))?;

    info!(bids = records.len(), dest = %dest.display(), "remote listing refreshed");
    Ok(records)
}

/// Default listing path when none is configured.
pub fn default_listing_path() -> PathBuf {
    PathBuf::from(DEFAULT_LISTING_PATH)
}

/// Build a reqwest client with appropriate settings.
fn build_client(opts: &DiscoveryOptions) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(3))
        .timeout(Duration::from_secs(opts.timeout_secs))
        .build()
        .map_err(|e| TenderFitError::Network(format!("failed to build HTTP client: {e}")))
}

async fn fetch_body(client: &Client, url: &Url, max_bytes: u64) -> Result<String> {
    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| TenderFitError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(TenderFitError::Network(format!("{url}: HTTP {status}")));
    }

    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return Err(TenderFitError::validation(format!(
                "{url}: response too large ({len} bytes, max {max_bytes})"
            )));
        }
    }

    response
        .text()
        .await
        .map_err(|e| TenderFitError::Network(format!("{url}: failed to read body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bid(id: &str, title: &str, published_at: Option<&str>) -> BidRecord {
        BidRecord {
            bid_id: id.into(),
            title: title.into(),
            url: None,
            published_at: published_at.map(Into::into),
            closing_date: None,
            summary: None,
            keywords: None,
            score: None,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
    }

    fn fixture_listing() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../../fixtures/bids/listing.json")
    }

    #[test]
    fn ranks_by_token_hits() {
        let mut taxi = bid("B1", "Hiring of taxi", None);
        taxi.summary = Some("monthly basis".into());
        let mut both = bid("B2", "Taxi services", None);
        both.keywords = Some("vehicle hiring".into());
        let other = bid("B3", "Office chairs", None);

        let results = search_bids(&[taxi, both, other], &SearchQuery::new("Taxi HIRING"), now());
        assert_eq!(results.total, 2);
        assert_eq!(results.bids[0].score, Some(2.0));
        assert_eq!(results.bids[0].bid_id, "B1");
        assert_eq!(results.bids[1].bid_id, "B2");
    }

    #[test]
    fn drops_bids_outside_window() {
        let records = vec![
            bid("OLD", "taxi", Some("2025-01-01T00:00:00Z")),
            bid("NEW", "taxi", Some("2025-02-25")),
            bid("UNDATED", "taxi", None),
        ];
        let results = search_bids(&records, &SearchQuery::new("taxi"), now());
        let ids: Vec<&str> = results.bids.iter().map(|b| b.bid_id.as_str()).collect();
        assert_eq!(ids, vec!["NEW", "UNDATED"]);
    }

    #[test]
    fn empty_query_matches_everything_in_window() {
        let records = vec![bid("A", "x", None), bid("B", "y", None)];
        let mut query = SearchQuery::new("  ");
        query.top_n = 1;
        let results = search_bids(&records, &query, now());
        assert_eq!(results.total, 2);
        assert_eq!(results.bids.len(), 1);
        assert_eq!(results.bids[0].score, Some(0.0));
    }

    #[test]
    fn missing_listing_is_empty() {
        let path = std::env::temp_dir().join(format!("tf-none-{}.json", uuid::Uuid::now_v7()));
        assert!(load_listing(&path).unwrap().is_empty());
    }

    #[test]
    fn listing_search_uses_cache() {
        let dir = std::env::temp_dir().join(format!("tf-disc-{}", uuid::Uuid::now_v7()));
        let cache = ToolCache::new(dir.join("cache"));
        let mut query = SearchQuery::new("taxi");
        query.days = 100_000;

        let first = search_listing(&fixture_listing(), &query, Some(&cache), false).unwrap();
        assert!(!first.cached);
        assert!(first.total >= 1);
        let second = search_listing(&fixture_listing(), &query, Some(&cache), false).unwrap();
        assert!(second.cached);
        assert_eq!(second.bids, first.bids);
        let forced = search_listing(&fixture_listing(), &query, Some(&cache), true).unwrap();
        assert!(!forced.cached);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn refreshes_remote_listing() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/bids.jsonl"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(
                "{\"bid_id\": \"R1\", \"title\": \"Taxi\"}\n{\"bid_id\": \"R2\", \"title\": \"Bus\"}\n",
            ))
            .mount(&server)
            .await;

        let dir = std::env::temp_dir().join(format!("tf-remote-{}", uuid::Uuid::now_v7()));
        let dest = dir.join("bids.json");
        let url = Url::parse(&format!("{}/bids.jsonl", server.uri())).unwrap();
        let records = refresh_listing(&url, &dest, &DiscoveryOptions::default())
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(load_listing(&dest).unwrap().len(), 2);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn remote_error_keeps_local_listing() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = std::env::temp_dir().join(format!("tf-remote-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let dest = dir.join("bids.json");
        std::fs::write(&dest, r#"[{"bid_id": "L1", "title": "Local"}]"#).unwrap();

        let url = Url::parse(&server.uri()).unwrap();
        let err = refresh_listing(&url, &dest, &DiscoveryOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "network");
        assert_eq!(load_listing(&dest).unwrap()[0].bid_id, "L1");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
