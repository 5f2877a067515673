//! Reasoning collaborator and the schema-enforcing stage runner.
//!
//! The language model is a black box behind [`ReasoningClient`]: structured
//! input in, schema-conforming JSON (or text) out. [`StageRunner`] wraps it
//! with schema normalization, caching, and validation.

mod client;
mod openai;
mod runner;

pub use client::{ReasoningClient, ReasoningRequest, ReasoningResponse};
pub use openai::OpenAiResponsesClient;
pub use runner::{StageOutput, StageRunner, StageSettings, StageSpec};
