//! OpenAI Responses API backend (`POST {base_url}/responses`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use tenderfit_shared::{AppConfig, Result, TenderFitError, resolve_api_key};

use crate::client::{ReasoningClient, ReasoningRequest, ReasoningResponse};

/// User-Agent string for reasoning requests.
const USER_AGENT: &str = concat!("TenderFit/", env!("CARGO_PKG_VERSION"));

/// HTTP client for the Responses API with strict JSON-schema output.
pub struct OpenAiResponsesClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl OpenAiResponsesClient {
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| TenderFitError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/responses", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
        })
    }

    /// Build from `[openai]` config, reading the key from its env var.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api_key = resolve_api_key(config)?;
        Self::new(
            &config.openai.base_url,
            api_key,
            Duration::from_secs(config.openai.timeout_secs),
        )
    }
}

/// Request body for `/responses`.
fn request_body(request: &ReasoningRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "input": [
            {"role": "system", "content": request.system_instructions},
            {
                "role": "user",
                "content": format!(
                    "Return JSON for {} using this input:\n{}",
                    request.stage, request.user_payload
                ),
            },
        ],
        "text": {
            "format": {
                "type": "json_schema",
                "name": request.schema_name,
                "schema": request.schema,
                "strict": true,
            }
        },
        "temperature": request.temperature,
    });
    if let Some(max) = request.max_output_tokens {
        body["max_output_tokens"] = json!(max);
    }
    body
}

#[derive(Debug, Deserialize)]
struct ResponsesBody {
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Concatenate every `output_text` part, falling back to a top-level `output_text`.
fn extract_text(body: ResponsesBody) -> Option<String> {
    let joined: String = body
        .output
        .iter()
        .flat_map(|item| item.content.iter())
        .filter(|part| part.kind == "output_text")
        .filter_map(|part| part.text.as_deref())
        .collect();
    if !joined.trim().is_empty() {
        return Some(joined);
    }
    body.output_text.filter(|t| !t.trim().is_empty())
}

#[async_trait]
impl ReasoningClient for OpenAiResponsesClient {
    #[instrument(skip_all, fields(stage = %request.stage, model = %request.model))]
    async fn invoke(&self, request: ReasoningRequest) -> Result<ReasoningResponse> {
        let body = request_body(&request);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| TenderFitError::Reasoning(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => {
                    TenderFitError::config(format!("reasoning provider rejected credentials: HTTP {status}"))
                }
                400 | 422 => {
                    TenderFitError::validation(format!("reasoning request rejected: HTTP {status}: {detail}"))
                }
                _ => TenderFitError::Reasoning(format!("HTTP {status}: {detail}")),
            });
        }

        let parsed: ResponsesBody = response
            .json()
            .await
            .map_err(|e| TenderFitError::Reasoning(format!("malformed response body: {e}")))?;

        let text = extract_text(parsed);
        debug!(has_text = text.is_some(), "reasoning call returned");
        Ok(ReasoningResponse { parsed: None, text })
    }
}
