//! Markdown rendering of the final fit report.

use std::fmt::Write;

use chrono::{DateTime, Utc};

use tenderfit_shared::TenderFitReport;

/// Render `report` as Markdown. Section order is fixed.
pub fn render_markdown(report: &TenderFitReport, generated: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Tender Fit Report: {}", report.bid_id);
    out.push('\n');
    let _ = writeln!(out, "- Decision: {}", report.decision);
    let _ = writeln!(out, "- Fit Score: {:.1}", report.fit_score);
    let _ = writeln!(out, "- Generated: {}", generated.format("%Y-%m-%d %H:%M UTC"));
    out.push('\n');

    if let Some(summary) = report.summary.as_deref().filter(|s| !s.is_empty()) {
        out.push_str("## Summary\n");
        let _ = writeln!(out, "{summary}");
        out.push('\n');
    }

    out.push_str("## Eligibility\n");
    let _ = writeln!(out, "- Pass: {}", report.eligibility.passed);
    for reason in &report.eligibility.reasons {
        let _ = writeln!(
            out,
            "- {}: {} - {}",
            reason.requirement_id, reason.status, reason.notes
        );
    }
    out.push('\n');

    if !report.gaps.is_empty() {
        out.push_str("## Gaps\n");
        for gap in &report.gaps {
            let _ = writeln!(out, "- {gap}");
        }
        out.push('\n');
    }

    out.push_str("## Citations\n");
    for c in &report.citations {
        let _ = writeln!(
            out,
            "- [{}] {} p{}: {}",
            c.doc_type, c.source_url, c.page, c.quote
        );
    }
    out
}
