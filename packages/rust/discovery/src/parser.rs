//! Bid listing parser.
//!
//! A listing is either a JSON array of bid records or JSON Lines (one record
//! per line). Unknown fields on a record are ignored.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use tenderfit_shared::{BidRecord, Result, TenderFitError};

/// Listing encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingFormat {
    JsonArray,
    JsonLines,
}

impl ListingFormat {
    /// `.jsonl` / `.ndjson` are JSON Lines, everything else a JSON array.
    pub fn from_path(path: &std::path::Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("jsonl") | Some("ndjson") => Self::JsonLines,
            _ => Self::JsonArray,
        }
    }

    /// Sniff a body of unknown origin: a leading `[` means a JSON array.
    pub fn sniff(content: &str) -> Self {
        if content.trim_start().starts_with('[') {
            Self::JsonArray
        } else {
            Self::JsonLines
        }
    }
}

/// Parse a listing body into bid records.
pub(crate) fn parse_listing(content: &str, format: ListingFormat) -> Result<Vec<BidRecord>> {
    match format {
        ListingFormat::JsonArray => {
            if content.trim().is_empty() {
                return Ok(Vec::new());
            }
            serde_json::from_str(content)
                .map_err(|e| TenderFitError::parse(format!("invalid bid listing: {e}")))
        }
        ListingFormat::JsonLines => content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).map_err(|e| {
                    TenderFitError::parse(format!("invalid bid listing line {}: {e}", i + 1))
                })
            })
            .collect(),
    }
}

/// Parse a publication timestamp. Accepts RFC 3339, naive datetimes and plain
/// dates (both read as UTC). Unparseable values yield `None`.
pub(crate) fn parse_published_at(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
