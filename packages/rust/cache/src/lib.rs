//! Content-addressed cache for deterministic tool and stage results.
//!
//! Entries live at `{base_dir}/{op}/{digest}.json`, where `digest` is the
//! SHA-256 of the canonical JSON encoding of the key. Logically equal keys
//! always map to the same file regardless of field order.

use std::path::PathBuf;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use tenderfit_shared::{Result, TenderFitError};

/// Filesystem-backed, content-addressed cache.
#[derive(Debug, Clone)]
pub struct ToolCache {
    base_dir: PathBuf,
}

impl ToolCache {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Look up a cached value. Unreadable or corrupt entries count as misses.
    pub fn get(&self, op: &str, key: &impl Serialize) -> Result<Option<Value>> {
        let path = self.entry_path(op, key)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cache entry unreadable");
                return Ok(None);
            }
        };
        match serde_json::from_str(&content) {
            Ok(value) => {
                debug!(op, path = %path.display(), "cache hit");
                Ok(Some(value))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cache entry corrupt, ignoring");
                Ok(None)
            }
        }
    }

    /// Typed lookup. A stored value that no longer fits `T` counts as a miss.
    pub fn get_as<T: DeserializeOwned>(&self, op: &str, key: &impl Serialize) -> Result<Option<T>> {
        Ok(self
            .get(op, key)?
            .and_then(|value| serde_json::from_value(value).ok()))
    }

    /// Store a value, replacing any existing entry. Last writer wins.
    pub fn set(&self, op: &str, key: &impl Serialize, value: &impl Serialize) -> Result<PathBuf> {
        let path = self.entry_path(op, key)?;
        let dir = self.base_dir.join(op);
        std::fs::create_dir_all(&dir).map_err(|e| TenderFitError::io(&dir, e))?;

        let body = serde_json::to_string_pretty(value)
            .map_err(|e| TenderFitError::validation(format!("cache value not serializable: {e}")))?;

        // Unique temp name so concurrent writers never share a partial file.
        let temp = dir.join(format!(".{}.tmp", uuid::Uuid::now_v7()));
        std::fs::write(&temp, body).map_err(|e| TenderFitError::io(&temp, e))?;
        std::fs::rename(&temp, &path).map_err(|e| TenderFitError::io(&path, e))?;

        debug!(op, path = %path.display(), "cache write");
        Ok(path)
    }

    /// Path an entry for `(op, key)` is stored at.
    pub fn entry_path(&self, op: &str, key: &impl Serialize) -> Result<PathBuf> {
        Ok(self
            .base_dir
            .join(op)
            .join(format!("{}.json", cache_digest(key)?)))
    }
}

/// SHA-256 hex digest of the canonical JSON encoding of `key`.
pub fn cache_digest(key: &impl Serialize) -> Result<String> {
    let canonical = serde_json_canonicalizer::to_vec(key)
        .map_err(|e| TenderFitError::validation(format!("cache key not serializable: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 hex digest of raw bytes (used to key file contents).
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
