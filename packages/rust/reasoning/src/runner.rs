//! Stage Runner: one schema-constrained reasoning call per invocation.
//!
//! Flow: load + normalize the stage schema, canonicalize the payload, consult
//! the cache, invoke the reasoning client, parse, apply field overrides,
//! validate against the authored schema, then cache. Nothing is written until
//! validation succeeds, so a failed call can be retried as-is.
//!
//! The runner never retries; retry policy belongs to the caller.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};

use tenderfit_cache::ToolCache;
use tenderfit_schema::{LoadedSchema, load_schema, parse_artifact};
use tenderfit_shared::{Artifact, Result, TenderFitError};

use crate::client::{ReasoningClient, ReasoningRequest};

/// Identity, fixed instructions, and output schema of one stage.
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub name: String,
    pub instructions: String,
    pub schema_path: PathBuf,
}

/// Model parameters shared by every stage of a run.
#[derive(Debug, Clone)]
pub struct StageSettings {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: Option<u32>,
}

/// A validated stage result.
#[derive(Debug, Clone)]
pub struct StageOutput<T> {
    pub artifact: T,
    /// The validated JSON the artifact was built from.
    pub raw: Value,
    pub cache_hit: bool,
}

/// Runs stages against a [`ReasoningClient`], with optional caching.
#[derive(Clone)]
pub struct StageRunner {
    client: Arc<dyn ReasoningClient>,
    cache: Option<ToolCache>,
    settings: StageSettings,
    /// Skip cache reads (writes still happen).
    force_refresh: bool,
}

impl StageRunner {
    pub fn new(client: Arc<dyn ReasoningClient>, settings: StageSettings) -> Self {
        Self {
            client,
            cache: None,
            settings,
            force_refresh: false,
        }
    }

    pub fn with_cache(mut self, cache: ToolCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    /// Run `spec` over `payload` and build the validated artifact.
    pub async fn run<T: Artifact>(
        &self,
        spec: &StageSpec,
        payload: &impl Serialize,
    ) -> Result<StageOutput<T>> {
        self.run_with_overrides(spec, payload, Map::new()).await
    }

    /// Like [`run`](Self::run), but top-level fields in `overrides` replace
    /// whatever the model returned before validation.
    #[instrument(skip_all, fields(stage = %spec.name))]
    pub async fn run_with_overrides<T: Artifact>(
        &self,
        spec: &StageSpec,
        payload: &impl Serialize,
        overrides: Map<String, Value>,
    ) -> Result<StageOutput<T>> {
        let schema = load_schema(&spec.schema_path)?;
        let payload = serde_json::to_value(payload)
            .map_err(|e| TenderFitError::validation(format!("payload not serializable: {e}")))?;
        let canonical = canonical_json(&payload)?;

        let op = format!("stage/{}", spec.name);
        let cache_key = json!({
            "stage": spec.name,
            "model": self.settings.model,
            "temperature": self.settings.temperature,
            "max_output_tokens": self.settings.max_output_tokens,
            "instructions": spec.instructions,
            "payload": payload,
            "schema": schema.strict,
            "overrides": overrides,
        });

        if let Some(hit) = self.cached::<T>(&op, &cache_key, spec, &schema) {
            info!(cache_hit = true, "stage completed");
            return Ok(hit);
        }

        let request = ReasoningRequest {
            stage: spec.name.clone(),
            system_instructions: spec.instructions.clone(),
            user_payload: canonical,
            schema_name: schema.name.clone(),
            schema: schema.strict.clone(),
            model: self.settings.model.clone(),
            temperature: self.settings.temperature,
            max_output_tokens: self.settings.max_output_tokens,
        };
        let response = self.client.invoke(request).await?;

        let mut value = match (response.parsed, response.text) {
            (Some(parsed), _) => parsed,
            (None, Some(text)) if !text.trim().is_empty() => {
                serde_json::from_str(&text).map_err(|e| TenderFitError::SchemaValidation {
                    stage: spec.name.clone(),
                    errors: vec![format!("output is not valid JSON: {e}")],
                })?
            }
            _ => {
                return Err(TenderFitError::NoOutput {
                    stage: spec.name.clone(),
                });
            }
        };

        apply_overrides(&mut value, overrides);
        let artifact: T = parse_artifact(&spec.name, &schema, value.clone())?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(&op, &cache_key, &value) {
                warn!(error = %e, "failed to cache stage output");
            }
        }

        info!(cache_hit = false, "stage completed");
        Ok(StageOutput {
            artifact,
            raw: value,
            cache_hit: false,
        })
    }

    /// A cached result that still validates, unless refresh is forced.
    fn cached<T: Artifact>(
        &self,
        op: &str,
        key: &Value,
        spec: &StageSpec,
        schema: &LoadedSchema,
    ) -> Option<StageOutput<T>> {
        if self.force_refresh {
            return None;
        }
        let cache = self.cache.as_ref()?;
        let value = match cache.get(op, key) {
            Ok(Some(v)) => v,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "stage cache lookup failed");
                return None;
            }
        };
        match parse_artifact::<T>(&spec.name, schema, value.clone()) {
            Ok(artifact) => Some(StageOutput {
                artifact,
                raw: value,
                cache_hit: true,
            }),
            Err(e) => {
                debug!(error = %e, "cached stage output no longer validates, ignoring");
                None
            }
        }
    }
}

fn apply_overrides(value: &mut Value, overrides: Map<String, Value>) {
    if let Value::Object(obj) = value {
        for (key, v) in overrides {
            obj.insert(key, v);
        }
    }
}

/// Canonical JSON text of `value`: sorted keys, no insignificant whitespace.
fn canonical_json(value: &Value) -> Result<String> {
    let bytes = serde_json_canonicalizer::to_vec(value)
        .map_err(|e| TenderFitError::validation(format!("payload not canonicalizable: {e}")))?;
    String::from_utf8(bytes).map_err(|e| TenderFitError::validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tenderfit_shared::{ScoutResults, VerifierReport};

    use crate::client::ReasoningResponse;

    /// Replays queued responses and records every request.
    struct Scripted {
        responses: Mutex<Vec<Result<ReasoningResponse>>>,
        calls: AtomicUsize,
        last: Mutex<Option<ReasoningRequest>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<ReasoningResponse>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
                last: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl ReasoningClient for Scripted {
        async fn invoke(&self, request: ReasoningRequest) -> Result<ReasoningResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(request);
            let mut queue = self.responses.lock().unwrap();
            if queue.is_empty() {
                return Ok(ReasoningResponse::default());
            }
            queue.remove(0)
        }
    }

    fn schemas_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../../schemas")
    }

    fn scout_spec() -> StageSpec {
        StageSpec {
            name: "ScoutAgent".into(),
            instructions: "Rank bids.".into(),
            schema_path: schemas_dir().join("scout_results.schema.json"),
        }
    }

    fn settings() -> StageSettings {
        StageSettings {
            model: "test-model".into(),
            temperature: 0.0,
            max_output_tokens: None,
        }
    }

    fn scout_output() -> Value {
        json!({"query": "taxi", "bids": [], "notes": null})
    }

    fn temp_cache() -> (ToolCache, PathBuf) {
        let dir = std::env::temp_dir().join(format!("tf-runner-{}", uuid::Uuid::now_v7()));
        (ToolCache::new(&dir), dir)
    }

    #[tokio::test]
    async fn parses_text_output_and_sends_strict_schema() {
        let client = Scripted::new(vec![Ok(ReasoningResponse::text(scout_output().to_string()))]);
        let runner = StageRunner::new(client.clone(), settings());

        let out: StageOutput<ScoutResults> = runner
            .run(&scout_spec(), &json!({"b": 1, "a": 2}))
            .await
            .unwrap();
        assert_eq!(out.artifact.query, "taxi");
        assert!(!out.cache_hit);

        let request = client.last.lock().unwrap().clone().unwrap();
        assert_eq!(request.user_payload, r#"{"a":2,"b":1}"#);
        assert_eq!(request.schema_name, "ScoutResults");
        assert_eq!(request.schema["additionalProperties"], json!(false));
        let mut required: Vec<&str> = request.schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        required.sort();
        assert_eq!(required, vec!["bids", "notes", "query"]);
    }

    #[tokio::test]
    async fn prefers_parsed_output() {
        let client = Scripted::new(vec![Ok(ReasoningResponse {
            parsed: Some(scout_output()),
            text: Some("not json".into()),
        })]);
        let runner = StageRunner::new(client, settings());
        let out: StageOutput<ScoutResults> = runner.run(&scout_spec(), &json!({})).await.unwrap();
        assert!(out.artifact.bids.is_empty());
    }

    #[tokio::test]
    async fn empty_response_is_no_output() {
        let client = Scripted::new(vec![Ok(ReasoningResponse::text("   "))]);
        let runner = StageRunner::new(client, settings());
        let err = runner
            .run::<ScoutResults>(&scout_spec(), &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "no_output");
        assert_eq!(err.stage(), Some("ScoutAgent"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn invalid_output_lists_violations_and_is_not_cached() {
        let (cache, dir) = temp_cache();
        let client = Scripted::new(vec![
            Ok(ReasoningResponse::parsed(json!({"bids": "nope"}))),
            Ok(ReasoningResponse::parsed(scout_output())),
        ]);
        let runner = StageRunner::new(client.clone(), settings()).with_cache(cache);

        let err = runner
            .run::<ScoutResults>(&scout_spec(), &json!({"q": 1}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "schema_validation");
        assert!(err.violations().len() >= 2);
        assert!(!err.is_retryable());

        let out = runner
            .run::<ScoutResults>(&scout_spec(), &json!({"q": 1}))
            .await
            .unwrap();
        assert!(!out.cache_hit);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn cache_hit_skips_client_unless_forced() {
        let (cache, dir) = temp_cache();
        let client = Scripted::new(vec![
            Ok(ReasoningResponse::parsed(scout_output())),
            Ok(ReasoningResponse::parsed(scout_output())),
        ]);
        let runner = StageRunner::new(client.clone(), settings()).with_cache(cache.clone());

        runner.run::<ScoutResults>(&scout_spec(), &json!({"q": 1})).await.unwrap();
        let second = runner
            .run::<ScoutResults>(&scout_spec(), &json!({"q": 1}))
            .await
            .unwrap();
        assert!(second.cache_hit);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        let forced = StageRunner::new(client.clone(), settings())
            .with_cache(cache)
            .force_refresh(true);
        let third = forced
            .run::<ScoutResults>(&scout_spec(), &json!({"q": 1}))
            .await
            .unwrap();
        assert!(!third.cache_hit);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn overrides_apply_before_validation() {
        let client = Scripted::new(vec![Ok(ReasoningResponse::parsed(json!({
            "bid_id": "B1",
            "verifier_id": "Z",
            "summary": {"passed": 0, "failed": 0, "needs_review": 0},
            "results": []
        })))]);
        let runner = StageRunner::new(client, settings());
        let spec = StageSpec {
            name: "VerifierAgent".into(),
            instructions: "Verify.".into(),
            schema_path: schemas_dir().join("verifier_report.schema.json"),
        };
        let mut overrides = Map::new();
        overrides.insert("verifier_id".into(), json!("B"));
        let out: StageOutput<VerifierReport> = runner
            .run_with_overrides(&spec, &json!({}), overrides)
            .await
            .unwrap();
        assert_eq!(out.artifact.verifier_id, "B");
    }

    #[tokio::test]
    async fn client_errors_propagate_unchanged() {
        let client = Scripted::new(vec![Err(TenderFitError::Reasoning("timeout".into()))]);
        let runner = StageRunner::new(client, settings());
        let err = runner
            .run::<ScoutResults>(&scout_spec(), &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "reasoning");
    }
}
