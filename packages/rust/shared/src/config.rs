//! Application configuration for TenderFit.
//!
//! User config lives at `~/.tenderfit/tenderfit.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TenderFitError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "tenderfit.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".tenderfit";

// ---------------------------------------------------------------------------
// Config structs (matching tenderfit.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Filesystem locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Reasoning provider settings.
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Chunking parameters.
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Document download settings.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Caller-level retry policy for stage invocations.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Per-bid artifact root (`{artifacts_dir}/{bid_id}/...`).
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: String,

    /// Final report directory (`{reports_dir}/{bid_id}.json|.md`).
    #[serde(default = "default_reports_dir")]
    pub reports_dir: String,

    /// Content-addressed tool cache directory.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Directory holding the stage JSON schemas.
    #[serde(default = "default_schemas_dir")]
    pub schemas_dir: String,

    /// libSQL run ledger file.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: default_artifacts_dir(),
            reports_dir: default_reports_dir(),
            cache_dir: default_cache_dir(),
            schemas_dir: default_schemas_dir(),
            ledger_path: default_ledger_path(),
        }
    }
}

fn default_artifacts_dir() -> String {
    "artifacts".into()
}
fn default_reports_dir() -> String {
    "reports".into()
}
fn default_cache_dir() -> String {
    ".cache/tools".into()
}
fn default_schemas_dir() -> String {
    "schemas".into()
}
fn default_ledger_path() -> String {
    "artifacts/tenderfit.db".into()
}

/// `[openai]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// API base URL (the `/responses` path is appended).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used for every stage.
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature.
    #[serde(default)]
    pub temperature: f32,

    /// Optional output token cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_reasoning_timeout")]
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            model: default_model(),
            temperature: 0.0,
            max_output_tokens: None,
            timeout_secs: default_reasoning_timeout(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4.1-mini".into()
}
fn default_reasoning_timeout() -> u64 {
    180
}

/// `[chunking]` section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Window size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared between consecutive windows.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    800
}
fn default_overlap() -> usize {
    100
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Largest document accepted, in bytes.
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            max_response_bytes: default_max_response_bytes(),
        }
    }
}

fn default_fetch_timeout() -> u64 {
    60
}
fn default_max_response_bytes() -> u64 {
    50 * 1024 * 1024
}

/// `[retry]` section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per stage for retryable failures (1 = no retry).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_max_attempts() -> u32 {
    2
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.tenderfit/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| TenderFitError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.tenderfit/tenderfit.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| TenderFitError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        TenderFitError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| TenderFitError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| TenderFitError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| TenderFitError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject parameter combinations the pipeline cannot run with.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let chunking = &config.chunking;
    if chunking.chunk_size == 0 {
        return Err(TenderFitError::config("chunking.chunk_size must be positive"));
    }
    if chunking.overlap >= chunking.chunk_size {
        return Err(TenderFitError::config(
            "chunking.overlap must be smaller than chunking.chunk_size",
        ));
    }
    if config.retry.max_attempts == 0 {
        return Err(TenderFitError::config("retry.max_attempts must be at least 1"));
    }
    Ok(())
}

/// Read the reasoning API key from the configured env var.
pub fn resolve_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.openai.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(TenderFitError::config(format!(
            "OpenAI API key not found. Set the {var_name} environment variable."
        ))),
    }
}
