//! The reasoning collaborator interface.

use async_trait::async_trait;
use serde_json::Value;

use tenderfit_shared::Result;

/// One schema-constrained reasoning call.
#[derive(Debug, Clone)]
pub struct ReasoningRequest {
    /// Stage identity, also used as the output-format label.
    pub stage: String,
    pub system_instructions: String,
    /// Serialized payload, sent as the user turn.
    pub user_payload: String,
    /// Output-format name for the schema.
    pub schema_name: String,
    /// Strict schema the output must conform to.
    pub schema: Value,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: Option<u32>,
}

/// What the provider returned. Both fields empty means no output.
#[derive(Debug, Clone, Default)]
pub struct ReasoningResponse {
    /// Pre-parsed structured output, when the provider offers one.
    pub parsed: Option<Value>,
    /// Raw output text.
    pub text: Option<String>,
}

impl ReasoningResponse {
    pub fn parsed(value: Value) -> Self {
        Self {
            parsed: Some(value),
            text: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parsed: None,
            text: Some(text.into()),
        }
    }
}

/// Black-box reasoning backend.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn invoke(&self, request: ReasoningRequest) -> Result<ReasoningResponse>;
}
