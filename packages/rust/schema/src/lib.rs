//! JSON Schema loading, strict rewriting, and validation.
//!
//! A stage schema is used twice:
//! - the **strict** form constrains the reasoning call (every object closed,
//!   every property required, no `format` keywords)
//! - the **resolved** form (refs inlined, otherwise untouched) validates
//!   whatever comes back
//!
//! [`parse_artifact`] is the only way external JSON becomes a typed artifact.

mod strict;

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use tenderfit_shared::{Artifact, Result, TenderFitError};

pub use strict::{make_strict, resolve_refs, schema_name};

/// A schema file with `$ref`s inlined, plus its strict rewrite.
#[derive(Debug, Clone)]
pub struct LoadedSchema {
    pub path: PathBuf,
    /// Output-format name derived from the schema title.
    pub name: String,
    /// Refs inlined, otherwise as authored. Used for validation.
    pub resolved: Value,
    /// Strict form handed to the reasoning call.
    pub strict: Value,
}

impl LoadedSchema {
    /// Validate `instance` against the resolved schema.
    ///
    /// Returns every violation, not just the first.
    pub fn violations(&self, instance: &Value) -> Result<Vec<String>> {
        validation_errors(&self.resolved, instance)
    }

    /// Fail with [`TenderFitError::SchemaValidation`] if `instance` does not conform.
    pub fn validate(&self, stage: &str, instance: &Value) -> Result<()> {
        let errors = self.violations(instance)?;
        if errors.is_empty() {
            return Ok(());
        }
        debug!(stage, violations = errors.len(), schema = %self.path.display(), "schema validation failed");
        Err(TenderFitError::SchemaValidation {
            stage: stage.to_string(),
            errors,
        })
    }
}

/// Load a schema file, inline local `$ref`s, and build the strict form.
pub fn load_schema(path: &Path) -> Result<LoadedSchema> {
    let raw = read_json(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let resolved = resolve_refs(&raw, base_dir)?;
    let strict = make_strict(&resolved);
    Ok(LoadedSchema {
        path: path.to_path_buf(),
        name: schema_name(&resolved),
        resolved,
        strict,
    })
}

/// Every violation of `instance` against `schema`, as display strings.
pub fn validation_errors(schema: &Value, instance: &Value) -> Result<Vec<String>> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| TenderFitError::validation(format!("invalid JSON schema: {e}")))?;
    Ok(validator
        .iter_errors(instance)
        .map(|e| e.to_string())
        .collect())
}

/// Validate raw external JSON, then build the typed artifact from it.
///
/// Schema violations surface as `SchemaValidation` for `stage`; domain checks
/// beyond the schema surface as `Validation`.
pub fn parse_artifact<T: Artifact>(stage: &str, schema: &LoadedSchema, value: Value) -> Result<T> {
    schema.validate(stage, &value)?;
    let artifact: T = serde_json::from_value(value).map_err(|e| TenderFitError::SchemaValidation {
        stage: stage.to_string(),
        errors: vec![e.to_string()],
    })?;
    artifact.check()?;
    Ok(artifact)
}

pub(crate) fn read_json(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| TenderFitError::io(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| TenderFitError::parse(format!("{}: {e}", path.display())))
}
