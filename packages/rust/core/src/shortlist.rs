//! Rank stored fit reports into a CSV shortlist.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use tenderfit_shared::{Result, TenderFitError};

const CSV_HEADER: [&str; 5] = ["bid_id", "decision", "fit_score", "summary", "report_json_path"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShortlistRow {
    pub bid_id: String,
    pub decision: Option<String>,
    pub fit_score: f64,
    pub summary: Option<String>,
    pub report_json_path: String,
}

/// Read every `*.json` report under `reports_dir`, optionally restricted to
/// `allowed` bid ids. Unreadable files and reports without `bid_id` or
/// `fit_score` are skipped.
pub fn collect_rows(reports_dir: &Path, allowed: Option<&HashSet<String>>) -> Result<Vec<ShortlistRow>> {
    let mut files = Vec::new();
    walk_json(reports_dir, &mut files)?;
    files.sort();

    let mut rows = Vec::new();
    for path in files {
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let report: Value = match serde_json::from_str(&content) {
            Ok(v) => v,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping unparseable report");
                continue;
            }
        };
        let (Some(bid_id), Some(fit_score)) = (
            report.get("bid_id").and_then(Value::as_str),
            report.get("fit_score").and_then(Value::as_f64),
        ) else {
            continue;
        };
        if allowed.is_some_and(|ids| !ids.contains(bid_id)) {
            continue;
        }
        rows.push(ShortlistRow {
            bid_id: bid_id.to_string(),
            decision: report.get("decision").and_then(Value::as_str).map(String::from),
            fit_score,
            summary: report.get("summary").and_then(Value::as_str).map(String::from),
            report_json_path: path.display().to_string(),
        });
    }
    Ok(rows)
}

fn walk_json(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(TenderFitError::io(dir, e)),
    };
    for entry in entries {
        let path = entry.map_err(|e| TenderFitError::io(dir, e))?.path();
        if path.is_dir() {
            walk_json(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            out.push(path);
        }
    }
    Ok(())
}

/// Highest fit score first, keeping the first `top`. Ties keep file order.
pub fn rank(mut rows: Vec<ShortlistRow>, top: usize) -> Vec<ShortlistRow> {
    rows.sort_by(|a, b| b.fit_score.total_cmp(&a.fit_score));
    rows.truncate(top);
    rows
}

/// Write rows as RFC 4180 CSV with a header line.
pub fn write_csv(path: &Path, rows: &[ShortlistRow]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| TenderFitError::io(parent, e))?;
    }
    let mut out = CSV_HEADER.join(",");
    out.push_str("\r\n");
    for row in rows {
        let fields = [
            csv_field(&row.bid_id),
            csv_field(row.decision.as_deref().unwrap_or("")),
            row.fit_score.to_string(),
            csv_field(row.summary.as_deref().unwrap_or("")),
            csv_field(&row.report_json_path),
        ];
        out.push_str(&fields.join(","));
        out.push_str("\r\n");
    }
    std::fs::write(path, out).map_err(|e| TenderFitError::io(path, e))
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tf-shortlist-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_report(dir: &Path, name: &str, value: Value) {
        std::fs::write(dir.join(name), serde_json::to_string(&value).unwrap()).unwrap();
    }

    #[test]
    fn ranks_filters_and_writes_csv() {
        let dir = temp_dir();
        write_report(&dir, "a.json", json!({"bid_id": "A", "decision": "GO", "fit_score": 71.5, "summary": "ok, mostly"}));
        write_report(&dir, "b.json", json!({"bid_id": "B", "decision": "NO_GO", "fit_score": 20}));
        write_report(&dir, "c.json", json!({"bid_id": "C", "decision": "GO", "fit_score": 90}));
        write_report(&dir, "d.json", json!({"decision": "GO"}));
        std::fs::write(dir.join("broken.json"), "{not json").unwrap();

        let rows = collect_rows(&dir, None).unwrap();
        assert_eq!(rows.len(), 3);
        let ranked = rank(rows, 2);
        assert_eq!(ranked[0].bid_id, "C");
        assert_eq!(ranked[1].bid_id, "A");

        let allowed: HashSet<String> = ["B".to_string()].into();
        let only_b = collect_rows(&dir, Some(&allowed)).unwrap();
        assert_eq!(only_b.len(), 1);

        let out = dir.join("out").join("shortlist.csv");
        write_csv(&out, &ranked).unwrap();
        let csv = std::fs::read_to_string(&out).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("bid_id,decision,fit_score,summary,report_json_path"));
        assert!(lines.next().unwrap().starts_with("C,GO,90,,"));
        assert!(lines.next().unwrap().starts_with("A,GO,71.5,\"ok, mostly\","));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_dir_is_empty() {
        let rows = collect_rows(Path::new("/definitely/not/here"), None).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn csv_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
