//! Error types for TenderFit.
//!
//! Library crates use [`TenderFitError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` and renders it as a JSON error payload.

use std::path::PathBuf;

/// Top-level error type for all TenderFit operations.
#[derive(Debug, thiserror::Error)]
pub enum TenderFitError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error during discovery or download.
    #[error("network error: {0}")]
    Network(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad parameters, invalid artifact, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// JSON or listing parse error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// A stage returned JSON that does not satisfy its schema.
    #[error("stage {stage} failed schema validation ({} violations)", errors.len())]
    SchemaValidation { stage: String, errors: Vec<String> },

    /// The reasoning call returned neither parsed output nor text.
    #[error("stage {stage} returned no output")]
    NoOutput { stage: String },

    /// Reasoning provider error (transport, auth, quota, malformed response).
    #[error("reasoning error: {0}")]
    Reasoning(String),

    /// PDF-text extraction failure.
    #[error("extraction error: {0}")]
    Extraction(String),

    /// Run ledger (libSQL) error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Fewer verifier reports than required were available for arbitration.
    #[error("verifier quorum not met: {completed} of {required} verifiers completed")]
    VerifierQuorum {
        required: usize,
        completed: usize,
        failures: Vec<String>,
    },

    /// Any error raised while a named pipeline stage was running.
    #[error("{stage} failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<TenderFitError>,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TenderFitError>;

impl TenderFitError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach a stage name. Errors that already carry one are returned as-is.
    pub fn in_stage(self, stage: impl Into<String>) -> Self {
        match self {
            Self::Stage { .. } | Self::SchemaValidation { .. } | Self::NoOutput { .. } => self,
            other => Self::Stage {
                stage: stage.into(),
                source: Box::new(other),
            },
        }
    }

    /// Whether repeating the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NoOutput { .. } | Self::Network(_) | Self::Reasoning(_) => true,
            Self::Stage { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Stable machine-readable kind, used in CLI error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Network(_) => "network",
            Self::Io { .. } => "io",
            Self::Validation { .. } => "validation",
            Self::Parse { .. } => "parse",
            Self::SchemaValidation { .. } => "schema_validation",
            Self::NoOutput { .. } => "no_output",
            Self::Reasoning(_) => "reasoning",
            Self::Extraction(_) => "extraction",
            Self::Storage(_) => "storage",
            Self::VerifierQuorum { .. } => "verifier_quorum",
            Self::Stage { source, .. } => source.kind(),
        }
    }

    /// Name of the stage the error was raised in, if known.
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Stage { stage, .. }
            | Self::SchemaValidation { stage, .. }
            | Self::NoOutput { stage } => Some(stage),
            _ => None,
        }
    }

    /// Full violation list for schema failures (looks through stage wrappers).
    pub fn violations(&self) -> &[String] {
        match self {
            Self::SchemaValidation { errors, .. } => errors,
            Self::VerifierQuorum { failures, .. } => failures,
            Self::Stage { source, .. } => source.violations(),
            _ => &[],
        }
    }
}
