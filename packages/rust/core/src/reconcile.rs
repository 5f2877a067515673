//! Manifest reconciliation against what is actually on disk.
//!
//! The collector stage is trusted for document classification only. Paths and
//! URLs always come from the download step's authoritative list.

use std::collections::HashMap;

use tracing::warn;

use tenderfit_shared::{DownloadedDoc, EvidenceManifest};

/// A reconciled manifest and the doc ids that had to be dropped.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub manifest: EvidenceManifest,
    pub dropped: Vec<String>,
}

/// Repair `manifest` against the `authoritative` download list.
///
/// Documents absent from the list are dropped; `source_url` and `local_path`
/// are overwritten; missing `fetched_at` / `generated_at` become `timestamp`.
pub fn reconcile_manifest(
    mut manifest: EvidenceManifest,
    authoritative: &[DownloadedDoc],
    timestamp: &str,
) -> ReconcileOutcome {
    let lookup: HashMap<&str, &DownloadedDoc> = authoritative
        .iter()
        .map(|doc| (doc.doc_id.as_str(), doc))
        .collect();

    let mut dropped = Vec::new();
    manifest.documents.retain(|doc| {
        let keep = lookup.contains_key(doc.doc_id.as_str());
        if !keep {
            dropped.push(doc.doc_id.clone());
        }
        keep
    });

    for doc in &mut manifest.documents {
        if let Some(truth) = lookup.get(doc.doc_id.as_str()) {
            doc.source_url = truth.source_url.clone();
            doc.local_path = truth.local_path.clone();
        }
        if doc.fetched_at.is_none() {
            doc.fetched_at = Some(timestamp.to_string());
        }
    }
    if manifest.generated_at.is_none() {
        manifest.generated_at = Some(timestamp.to_string());
    }

    if !dropped.is_empty() {
        warn!(
            bid_id = %manifest.bid_id,
            dropped = ?dropped,
            "collector claimed documents that were not downloaded"
        );
    }

    ReconcileOutcome { manifest, dropped }
}
