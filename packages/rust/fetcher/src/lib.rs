//! Document download collaborator.
//!
//! Materializes `file://` / plain-path sources (copy) and `http(s)://` sources
//! (download) into a bid's `docs/` directory, reporting per-URL success or
//! failure. Bid detail pages can be scanned for PDF links first.

mod guard;
mod links;

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;

use tenderfit_shared::{FetchConfig, Result, TenderFitError};

pub use links::harvest_pdf_links;

/// User-Agent string for download requests.
const USER_AGENT: &str = concat!("TenderFit/", env!("CARGO_PKG_VERSION"));

/// Filename used when an http(s) URL has no usable last path segment.
const FALLBACK_FILENAME: &str = "document.pdf";

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A source that was materialized on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedDoc {
    /// The URL as requested.
    pub url: String,
    pub local_path: PathBuf,
}

/// Outcome of one download batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchReport {
    pub downloaded: Vec<FetchedDoc>,
    /// Sources whose destination was already claimed by an earlier source.
    pub skipped: Vec<String>,
    pub errors: Vec<String>,
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Downloads and copies bid documents.
pub struct Fetcher {
    client: Client,
    max_response_bytes: u64,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    allow_private_hosts: bool,
}

impl Fetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TenderFitError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            max_response_bytes: config.max_response_bytes,
            allow_private_hosts: false,
        })
    }

    /// Permit downloads from loopback and private addresses.
    pub fn allow_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self
    }

    /// Materialize every source into `out_dir`, in order.
    ///
    /// A destination that already exists is reused without refetching.
    #[instrument(skip_all, fields(bid_id = %bid_id, sources = urls.len()))]
    pub async fn fetch_docs(&self, bid_id: &str, urls: &[String], out_dir: &Path) -> FetchReport {
        let mut report = FetchReport::default();
        if urls.is_empty() {
            report.errors.push("No document URLs supplied.".into());
            return report;
        }

        for url in urls {
            match self.fetch_one(url, out_dir).await {
                Ok(dest) => {
                    if report.downloaded.iter().any(|d| d.local_path == dest) {
                        report.skipped.push(url.clone());
                    } else {
                        report.downloaded.push(FetchedDoc {
                            url: url.clone(),
                            local_path: dest,
                        });
                    }
                }
                Err(e) => {
                    warn!(%url, error = %e, "document fetch failed");
                    report.errors.push(format!("{url}: {e}"));
                }
            }
        }

        info!(
            downloaded = report.downloaded.len(),
            skipped = report.skipped.len(),
            errors = report.errors.len(),
            "document fetch complete"
        );
        report
    }

    async fn fetch_one(&self, source: &str, out_dir: &Path) -> Result<PathBuf> {
        let dest = doc_dest_from_url(source, out_dir);
        if dest.exists() {
            debug!(dest = %dest.display(), "already materialized");
            return Ok(dest);
        }
        std::fs::create_dir_all(out_dir).map_err(|e| TenderFitError::io(out_dir, e))?;

        match Url::parse(source) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
                let bytes = self.download(&url).await?;
                write_atomic(&dest, &bytes)?;
            }
            Ok(url) if url.scheme() == "file" => {
                let src = url
                    .to_file_path()
                    .map_err(|_| TenderFitError::validation(format!("bad file URL: {source}")))?;
                copy_local(&src, &dest)?;
            }
            Ok(url) if url.scheme().len() > 1 => {
                return Err(TenderFitError::validation(format!(
                    "Unsupported URL scheme: {}",
                    url.scheme()
                )));
            }
            // Plain paths (including Windows drive letters parsed as a scheme).
            _ => copy_local(Path::new(source), &dest)?,
        }
        Ok(dest)
    }

    async fn download(&self, url: &Url) -> Result<Vec<u8>> {
        if !self.allow_private_hosts && guard::is_ssrf_target(url) {
            return Err(TenderFitError::validation(format!(
                "{url}: refusing to fetch from a private address"
            )));
        }

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| TenderFitError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TenderFitError::Network(format!("{url}: HTTP {status}")));
        }
        if let Some(len) = response.content_length() {
            if len > self.max_response_bytes {
                return Err(TenderFitError::validation(format!(
                    "{url}: response too large ({len} bytes, max {})",
                    self.max_response_bytes
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TenderFitError::Network(format!("{url}: body read failed: {e}")))?;
        if bytes.len() as u64 > self.max_response_bytes {
            return Err(TenderFitError::validation(format!(
                "{url}: response too large ({} bytes, max {})",
                bytes.len(),
                self.max_response_bytes
            )));
        }
        Ok(bytes.to_vec())
    }

    /// Fetch a bid detail page and return the PDF links it contains.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn discover_pdf_links(&self, url: &Url) -> Result<Vec<String>> {
        if !self.allow_private_hosts && guard::is_ssrf_target(url) {
            return Err(TenderFitError::validation(format!(
                "{url}: refusing to fetch from a private address"
            )));
        }
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| TenderFitError::Network(format!("{url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TenderFitError::Network(format!("{url}: HTTP {status}")));
        }
        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| TenderFitError::Network(format!("{url}: body read failed: {e}")))?;
        let links = harvest_pdf_links(&body, &final_url);
        info!(count = links.len(), "harvested PDF links");
        Ok(links)
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Destination of `source` inside `out_dir`: the source's file name, or
/// `document.pdf` for http(s) URLs without one.
pub fn doc_dest_from_url(source: &str, out_dir: &Path) -> PathBuf {
    let name = match Url::parse(source) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => url
            .path_segments()
            .and_then(|mut segs| segs.next_back().map(str::to_string))
            .filter(|s| !s.is_empty()),
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned())),
        _ => Path::new(source)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned()),
    };
    out_dir.join(name.unwrap_or_else(|| FALLBACK_FILENAME.to_string()))
}

/// Normalize a source reference: local paths become absolute `file://` URIs,
/// network URLs are returned unchanged.
pub fn normalize_source_url(source: &str) -> String {
    let path = match Url::parse(source) {
        Ok(url) if url.scheme() == "file" => match url.to_file_path() {
            Ok(p) => p,
            Err(_) => return source.to_string(),
        },
        Ok(url) if url.scheme().len() > 1 => return source.to_string(),
        _ => PathBuf::from(source),
    };
    let absolute = std::path::absolute(&path).unwrap_or(path);
    match Url::from_file_path(&absolute) {
        Ok(url) => url.to_string(),
        Err(_) => source.to_string(),
    }
}

fn copy_local(src: &Path, dest: &Path) -> Result<()> {
    if !src.exists() {
        return Err(TenderFitError::io(
            src,
            std::io::Error::new(std::io::ErrorKind::NotFound, "Missing source"),
        ));
    }
    std::fs::copy(src, dest).map_err(|e| TenderFitError::io(dest, e))?;
    Ok(())
}

/// Write to a temp file next to `dest`, then rename into place.
fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let temp = dir.join(format!(".{}.part", uuid::Uuid::now_v7()));
    std::fs::write(&temp, bytes).map_err(|e| TenderFitError::io(&temp, e))?;
    std::fs::rename(&temp, dest).map_err(|e| TenderFitError::io(dest, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tf-fetch-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn fetcher() -> Fetcher {
        Fetcher::new(&FetchConfig::default())
            .unwrap()
            .allow_private_hosts(true)
    }

    #[test]
    fn dest_names() {
        let out = Path::new("/out");
        assert_eq!(doc_dest_from_url("https://x.org/a/b.pdf?v=1", out), out.join("b.pdf"));
        assert_eq!(doc_dest_from_url("https://x.org/", out), out.join("document.pdf"));
        assert_eq!(doc_dest_from_url("file:///tmp/base.pdf", out), out.join("base.pdf"));
        assert_eq!(doc_dest_from_url("docs/sla.pdf", out), out.join("sla.pdf"));
    }

    #[test]
    fn normalizes_local_sources() {
        let normalized = normalize_source_url("fixtures/base.pdf");
        assert!(normalized.starts_with("file:///"));
        assert!(normalized.ends_with("/fixtures/base.pdf"));
        assert_eq!(normalize_source_url("https://x.org/a.pdf"), "https://x.org/a.pdf");
        assert_eq!(normalize_source_url("file:///tmp/a.pdf"), "file:///tmp/a.pdf");
    }

    #[tokio::test]
    async fn copies_local_files_and_reports_missing() {
        let dir = temp_dir();
        let src = dir.join("base.txt");
        std::fs::write(&src, "page one").unwrap();
        let file_url = Url::from_file_path(&src).unwrap().to_string();
        let missing = dir.join("nope.pdf").display().to_string();

        let out = dir.join("docs");
        let report = fetcher()
            .fetch_docs("B1", &[file_url.clone(), missing, file_url], &out)
            .await;
        assert_eq!(report.downloaded.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(std::fs::read_to_string(out.join("base.txt")).unwrap(), "page one");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn downloads_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/docs/base.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 fake".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/docs/gone.pdf"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = temp_dir();
        let urls = vec![
            format!("{}/docs/base.pdf", server.uri()),
            format!("{}/docs/gone.pdf", server.uri()),
        ];
        let report = fetcher().fetch_docs("B1", &urls, &dir).await;
        assert_eq!(report.downloaded.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("404"));
        assert_eq!(std::fs::read(dir.join("base.pdf")).unwrap(), b"%PDF-1.4 fake");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn private_hosts_blocked_by_default() {
        let server = MockServer::start().await;
        let dir = temp_dir();
        let strict = Fetcher::new(&FetchConfig::default()).unwrap();
        let report = strict
            .fetch_docs("B1", &[format!("{}/a.pdf", server.uri())], &dir)
            .await;
        assert!(report.downloaded.is_empty());
        assert!(report.errors[0].contains("private address"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn oversized_downloads_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
            .mount(&server)
            .await;
        let dir = temp_dir();
        let config = FetchConfig {
            timeout_secs: 5,
            max_response_bytes: 16,
        };
        let fetcher = Fetcher::new(&config).unwrap().allow_private_hosts(true);
        let report = fetcher
            .fetch_docs("B1", &[format!("{}/big.pdf", server.uri())], &dir)
            .await;
        assert!(report.errors[0].contains("too large"));
        assert!(!dir.join("big.pdf").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn discovers_links_on_bid_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bid/42"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<a href="/files/base.pdf">Bid</a><a href="/x">x</a>"#),
            )
            .mount(&server)
            .await;
        let url = Url::parse(&format!("{}/bid/42", server.uri())).unwrap();
        let links = fetcher().discover_pdf_links(&url).await.unwrap();
        assert_eq!(links, vec![format!("{}/files/base.pdf", server.uri())]);
    }

    #[tokio::test]
    async fn empty_request_is_an_error_entry() {
        let dir = temp_dir();
        let report = fetcher().fetch_docs("B1", &[], &dir).await;
        assert_eq!(report.errors, vec!["No document URLs supplied.".to_string()]);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
