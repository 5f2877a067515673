//! Page text sources.
//!
//! The PDF-text collaborator is the `pdftotext` binary from poppler-utils.
//! Plain `.txt` evidence is also accepted, with form feeds separating pages.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use tenderfit_shared::{PageText, Result, TenderFitError};

/// Form feed, the page separator emitted by `pdftotext`.
const PAGE_BREAK: char = '\u{000C}';

/// Produces ordered, 1-based page text for a local document.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn pages(&self, path: &Path) -> Result<Vec<PageText>>;

    /// Identifier mixed into cache keys so sources never share entries.
    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// pdftotext
// ---------------------------------------------------------------------------

/// Runs `pdftotext -enc UTF-8 <file> -` and splits the output into pages.
#[derive(Debug, Clone, Default)]
pub struct PdftotextSource {
    /// Stop after this many pages.
    pub max_pages: Option<usize>,
}

#[async_trait]
impl PageSource for PdftotextSource {
    #[instrument(skip_all, fields(path = %path.display()))]
    async fn pages(&self, path: &Path) -> Result<Vec<PageText>> {
        if !path.exists() {
            return Err(TenderFitError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "document not found"),
            ));
        }

        let mut command = Command::new("pdftotext");
        command.arg("-enc").arg("UTF-8").arg("-f").arg("1");
        if let Some(max_pages) = self.max_pages {
            command.arg("-l").arg(max_pages.to_string());
        }
        command.arg(path).arg("-");

        let output = command.output().await.map_err(|e| {
            TenderFitError::Extraction(format!(
                "failed to execute pdftotext for {}: {e}",
                path.display()
            ))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TenderFitError::Extraction(format!(
                "pdftotext returned non-zero exit status for {}: {}",
                path.display(),
                stderr.trim()
            )));
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        let pages = split_pages(&raw, self.max_pages);
        debug!(pages = pages.len(), "pdftotext extracted pages");
        Ok(pages)
    }

    fn name(&self) -> &'static str {
        "pdftotext"
    }
}

// ---------------------------------------------------------------------------
// Plain text
// ---------------------------------------------------------------------------

/// Reads a UTF-8 text file; form feeds separate pages.
#[derive(Debug, Clone, Default)]
pub struct PlainTextSource;

#[async_trait]
impl PageSource for PlainTextSource {
    async fn pages(&self, path: &Path) -> Result<Vec<PageText>> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TenderFitError::io(path, e))?;
        Ok(split_pages(&raw, None))
    }

    fn name(&self) -> &'static str {
        "plain_text"
    }
}

// ---------------------------------------------------------------------------
// Dispatch by extension
// ---------------------------------------------------------------------------

/// Uses [`PlainTextSource`] for `.txt`/`.text` files and pdftotext otherwise.
#[derive(Debug, Clone, Default)]
pub struct AutoPageSource {
    pub pdf: PdftotextSource,
}

#[async_trait]
impl PageSource for AutoPageSource {
    async fn pages(&self, path: &Path) -> Result<Vec<PageText>> {
        if is_plain_text(path) {
            PlainTextSource.pages(path).await
        } else {
            self.pdf.pages(path).await
        }
    }

    fn name(&self) -> &'static str {
        "auto"
    }
}

fn is_plain_text(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("txt") || ext.eq_ignore_ascii_case("text"))
}

/// Split on form feeds, strip NULs, and drop trailing blank pages.
fn split_pages(raw: &str, max_pages: Option<usize>) -> Vec<PageText> {
    let mut pages: Vec<String> = raw
        .split(PAGE_BREAK)
        .map(|chunk| chunk.replace('\u{0000}', ""))
        .collect();

    while pages.last().is_some_and(|p| p.trim().is_empty()) {
        pages.pop();
    }
    if let Some(max) = max_pages {
        pages.truncate(max);
    }

    pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| PageText {
            page_num: (i + 1) as u32,
            text,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_form_feed() {
        let pages = split_pages("one\u{000C}two\u{0000}\u{000C}\n\u{000C}  ", None);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page_num, 1);
        assert_eq!(pages[1].text, "two");
    }

    #[test]
    fn interior_blank_pages_keep_numbering() {
        let pages = split_pages("a\u{000C}\u{000C}c", None);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[2].page_num, 3);
        assert_eq!(pages[2].text, "c");
    }

    #[test]
    fn respects_max_pages() {
        let pages = split_pages("a\u{000C}b\u{000C}c", Some(2));
        assert_eq!(pages.len(), 2);
    }

    #[tokio::test]
    async fn plain_text_source_reads_pages() {
        let dir = std::env::temp_dir().join(format!("tf-pages-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("base.txt");
        std::fs::write(&path, "Eligibility\u{000C}SLA terms").unwrap();

        let pages = AutoPageSource::default().pages(&path).await.unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].text, "SLA terms");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn missing_pdf_is_io_error() {
        let path = std::env::temp_dir().join(format!("tf-missing-{}.pdf", uuid::Uuid::now_v7()));
        let err = PdftotextSource::default().pages(&path).await.unwrap_err();
        assert_eq!(err.kind(), "io");
    }
}
