//! Append-only JSON Lines logs.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use tenderfit_shared::{Result, TenderFitError};

/// Writes one JSON object per line, in call order.
///
/// A log is truncated when created, so each extraction run starts clean.
pub struct JsonlWriter {
    path: PathBuf,
    out: BufWriter<File>,
    rows: usize,
}

impl JsonlWriter {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TenderFitError::io(parent, e))?;
        }
        let file = File::create(path).map_err(|e| TenderFitError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            rows: 0,
        })
    }

    pub fn append(&mut self, row: &impl Serialize) -> Result<()> {
        let line = serde_json::to_string(row)
            .map_err(|e| TenderFitError::validation(format!("row not serializable: {e}")))?;
        self.out
            .write_all(line.as_bytes())
            .and_then(|_| self.out.write_all(b"\n"))
            .map_err(|e| TenderFitError::io(&self.path, e))?;
        self.rows += 1;
        Ok(())
    }

    /// Flush buffered rows to disk.
    pub fn finish(mut self) -> Result<usize> {
        self.out
            .flush()
            .map_err(|e| TenderFitError::io(&self.path, e))?;
        Ok(self.rows)
    }
}

/// Read every row of a JSONL file. Blank lines are skipped.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).map_err(|e| TenderFitError::io(path, e))?;
    let mut rows = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| TenderFitError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(&line).map_err(|e| {
            TenderFitError::parse(format!("{}:{}: {e}", path.display(), lineno + 1))
        })?;
        rows.push(row);
    }
    Ok(rows)
}
