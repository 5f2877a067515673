//! `$ref` inlining and the strict rewrite for structured-output calls.

use std::path::Path;

use serde_json::{Map, Value};

use tenderfit_shared::{Result, TenderFitError};

use crate::read_json;

/// Nesting limit for file references. Cyclic references are not supported.
const MAX_REF_DEPTH: usize = 32;

/// Replace every `{"$ref": "<file>.json"}` node with the referenced file's
/// content, recursively. Paths resolve against the referencing file's directory.
pub fn resolve_refs(schema: &Value, base_dir: &Path) -> Result<Value> {
    resolve_at_depth(schema, base_dir, 0)
}

fn resolve_at_depth(schema: &Value, base_dir: &Path, depth: usize) -> Result<Value> {
    match schema {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get("$ref") {
                if reference.ends_with(".json") {
                    if depth >= MAX_REF_DEPTH {
                        return Err(TenderFitError::validation(format!(
                            "schema $ref nesting exceeds {MAX_REF_DEPTH} at {reference}"
                        )));
                    }
                    let ref_path = base_dir.join(reference);
                    let mut target = read_json(&ref_path)?;
                    // Root-only keywords are meaningless once inlined.
                    if let Value::Object(obj) = &mut target {
                        obj.remove("$schema");
                        obj.remove("$id");
                    }
                    let ref_base = ref_path.parent().unwrap_or(base_dir);
                    return resolve_at_depth(&target, ref_base, depth + 1);
                }
            }
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), resolve_at_depth(value, base_dir, depth)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_at_depth(item, base_dir, depth))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

/// Rewrite a schema into the strict structured-output form.
///
/// Every object node gets `additionalProperties: false` and lists all of its
/// properties as required; string-valued `format` keywords are removed.
/// Applying this to its own output returns the same schema.
pub fn make_strict(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len() + 2);
            for (key, value) in map {
                if key == "format" && value.is_string() {
                    continue;
                }
                out.insert(key.clone(), make_strict(value));
            }
            if is_object_type(map.get("type")) {
                out.insert("additionalProperties".into(), Value::Bool(false));
                if let Some(Value::Object(props)) = map.get("properties") {
                    let required = props.keys().cloned().map(Value::String).collect();
                    out.insert("required".into(), Value::Array(required));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(make_strict).collect()),
        other => other.clone(),
    }
}

/// `type: "object"` or a type list containing `"object"`.
fn is_object_type(ty: Option<&Value>) -> bool {
    match ty {
        Some(Value::String(t)) => t == "object",
        Some(Value::Array(types)) => types.iter().any(|t| t == "object"),
        _ => false,
    }
}

/// Alphanumeric characters of the schema `title`, or `StructuredOutput`.
pub fn schema_name(schema: &Value) -> String {
    let name: String = schema
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect();
    if name.is_empty() {
        "StructuredOutput".into()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("tf-schema-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn strict_closes_objects_and_requires_all() {
        let schema = json!({
            "type": "object",
            "properties": {
                "a": {"type": "string", "format": "date-time"},
                "b": {"type": ["object", "null"], "properties": {"c": {"type": "integer"}}}
            },
            "required": ["a"]
        });
        let strict = make_strict(&schema);
        assert_eq!(strict["additionalProperties"], json!(false));
        assert_eq!(strict["required"], json!(["a", "b"]));
        assert!(strict["properties"]["a"].get("format").is_none());
        assert_eq!(strict["properties"]["b"]["required"], json!(["c"]));
        assert_eq!(strict["properties"]["b"]["additionalProperties"], json!(false));
    }

    #[test]
    fn strict_is_idempotent() {
        let schema = json!({
            "title": "X",
            "type": "object",
            "additionalProperties": true,
            "properties": {"items": {"type": "array", "items": {"type": "object", "properties": {"k": {"type": "string", "format": "uri"}}}}}
        });
        let once = make_strict(&schema);
        assert_eq!(make_strict(&once), once);
    }

    #[test]
    fn property_named_format_survives() {
        let schema = json!({
            "type": "object",
            "properties": {"format": {"type": "string"}}
        });
        let strict = make_strict(&schema);
        assert!(strict["properties"].get("format").is_some());
        assert_eq!(strict["required"], json!(["format"]));
    }

    #[test]
    fn nested_refs_resolve_relative_to_referrer() {
        let dir = temp_dir();
        std::fs::create_dir_all(dir.join("common")).unwrap();
        std::fs::write(
            dir.join("common/leaf.schema.json"),
            r#"{"$schema": "https://json-schema.org/draft/2020-12/schema", "type": "string"}"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("common/mid.schema.json"),
            r#"{"type": "object", "properties": {"leaf": {"$ref": "leaf.schema.json"}}}"#,
        )
        .unwrap();
        let root = json!({"type": "array", "items": {"$ref": "common/mid.schema.json"}});

        let resolved = resolve_refs(&root, &dir).unwrap();
        assert_eq!(resolved["items"]["properties"]["leaf"], json!({"type": "string"}));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn internal_refs_are_left_alone() {
        let schema = json!({"$defs": {"x": {"type": "string"}}, "items": {"$ref": "#/$defs/x"}});
        let resolved = resolve_refs(&schema, Path::new(".")).unwrap();
        assert_eq!(resolved, schema);
    }

    #[test]
    fn cyclic_refs_terminate() {
        let dir = temp_dir();
        std::fs::write(dir.join("loop.schema.json"), r#"{"items": {"$ref": "loop.schema.json"}}"#)
            .unwrap();
        let err = resolve_refs(&json!({"$ref": "loop.schema.json"}), &dir).unwrap_err();
        assert!(err.to_string().contains("nesting"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn schema_names() {
        assert_eq!(schema_name(&json!({"title": "Tender Fit Report"})), "TenderFitReport");
        assert_eq!(schema_name(&json!({"title": "--"})), "StructuredOutput");
        assert_eq!(schema_name(&json!({})), "StructuredOutput");
    }
}
