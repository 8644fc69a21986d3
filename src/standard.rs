//! Standard JSON Schema validation layer.
//!
//! Wraps the `jsonschema` crate: picks the draft from the schema's
//! `$schema` keyword (Draft-04 through 2020-12), resolves `$ref`s through
//! the [`DocumentStore`], and caches compiled validators per schema id for
//! the lifetime of a run. The extension keywords are unknown to the
//! standard drafts and are ignored by this layer.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;

use crate::models::SchemaDocument;
use crate::store::DocumentStore;

/// One standard-draft violation, forwarded into the report.
#[derive(Debug, Clone)]
pub struct StdIssue {
    /// JSON pointer to the violating position in the instance.
    pub path: String,
    pub message: String,
}

/// Maps a schema's `$schema` URI to the draft the validator should enforce.
/// Unknown or absent `$schema` falls back to the crate's auto-detection.
pub fn draft_for(schema: &Value) -> Option<jsonschema::Draft> {
    let uri = schema.get("$schema")?.as_str()?;
    match uri.trim_end_matches('#') {
        "http://json-schema.org/draft-04/schema"
        | "http://json-schema.org/draft-04/hyper-schema" => Some(jsonschema::Draft::Draft4),
        "http://json-schema.org/draft-06/schema"
        | "http://json-schema.org/draft-06/hyper-schema" => Some(jsonschema::Draft::Draft6),
        "http://json-schema.org/draft-07/schema"
        | "http://json-schema.org/draft-07/hyper-schema" => Some(jsonschema::Draft::Draft7),
        "https://json-schema.org/draft/2019-09/schema" => Some(jsonschema::Draft::Draft201909),
        "https://json-schema.org/draft/2020-12/schema" => Some(jsonschema::Draft::Draft202012),
        _ => None,
    }
}

/// Compiles schemas on first use and keeps them for the run.
#[derive(Default)]
pub struct StandardValidator {
    compiled: HashMap<String, jsonschema::Validator>,
}

impl StandardValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates `instance` against `schema`, returning the draft errors in
    /// instance traversal order.
    ///
    /// # Errors
    ///
    /// Fails when the schema itself cannot be compiled (malformed schema,
    /// unresolvable `$ref`), which the caller reports as a schema problem
    /// rather than an instance problem.
    pub fn check(
        &mut self,
        store: &DocumentStore,
        schema: &SchemaDocument,
        instance: &Value,
    ) -> Result<Vec<StdIssue>> {
        if !self.compiled.contains_key(&schema.schema_id) {
            let mut options = jsonschema::options();
            options.with_retriever(store.retriever());
            if let Some(draft) = draft_for(&schema.raw) {
                options.with_draft(draft);
            }
            let validator = options
                .build(&schema.raw)
                .with_context(|| format!("failed to compile schema '{}'", schema.schema_id))?;
            self.compiled.insert(schema.schema_id.clone(), validator);
        }

        let validator = self
            .compiled
            .get(&schema.schema_id)
            .expect("validator cached above");

        Ok(validator
            .iter_errors(instance)
            .map(|err| StdIssue {
                path: err.instance_path.to_string(),
                message: err.to_string(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with(schemas: &[(&str, Value)]) -> DocumentStore {
        let mut store = DocumentStore::new();
        for (source, raw) in schemas {
            store.insert_schema(source, raw.clone()).unwrap();
        }
        store
    }

    #[test]
    fn draft_mapping_recognizes_known_uris() {
        let v = json!({"$schema": "http://json-schema.org/draft-04/schema#"});
        assert!(matches!(draft_for(&v), Some(jsonschema::Draft::Draft4)));
        let v = json!({"$schema": "https://json-schema.org/draft/2020-12/schema"});
        assert!(matches!(draft_for(&v), Some(jsonschema::Draft::Draft202012)));
        let v = json!({"$schema": "https://example.org/custom"});
        assert!(draft_for(&v).is_none());
        assert!(draft_for(&json!({})).is_none());
    }

    #[test]
    fn valid_instance_has_no_issues() {
        let schema = json!({
            "$id": "https://example.org/s",
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        });
        let store = store_with(&[("s.json", schema)]);
        let schema = store.get_schema("https://example.org/s").unwrap();

        let mut validator = StandardValidator::new();
        let issues = validator
            .check(&store, schema, &json!({"name": "ok"}))
            .unwrap();
        assert!(issues.is_empty());
    }

    #[test]
    fn violations_carry_instance_paths() {
        let schema = json!({
            "$id": "https://example.org/s",
            "type": "object",
            "properties": {"count": {"type": "integer"}}
        });
        let store = store_with(&[("s.json", schema)]);
        let schema = store.get_schema("https://example.org/s").unwrap();

        let mut validator = StandardValidator::new();
        let issues = validator
            .check(&store, schema, &json!({"count": "three"}))
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "/count");
    }

    #[test]
    fn extension_keywords_are_ignored_by_the_draft() {
        let schema = json!({
            "$id": "https://example.org/s",
            "type": "object",
            "properties": {"local_id": {"type": "string", "unique": true}}
        });
        let store = store_with(&[("s.json", schema)]);
        let schema = store.get_schema("https://example.org/s").unwrap();

        let mut validator = StandardValidator::new();
        let issues = validator
            .check(&store, schema, &json!({"local_id": "X"}))
            .unwrap();
        assert!(issues.is_empty());
    }

    #[test]
    fn refs_resolve_through_the_store() {
        let referenced = json!({
            "$id": "https://example.org/leaf",
            "type": "string"
        });
        let referencing = json!({
            "$id": "https://example.org/root",
            "type": "object",
            "properties": {"leaf": {"$ref": "https://example.org/leaf"}}
        });
        let store = store_with(&[("leaf.json", referenced), ("root.json", referencing)]);
        let schema = store.get_schema("https://example.org/root").unwrap();

        let mut validator = StandardValidator::new();
        let ok = validator
            .check(&store, schema, &json!({"leaf": "fine"}))
            .unwrap();
        assert!(ok.is_empty());
        let bad = validator
            .check(&store, schema, &json!({"leaf": 7}))
            .unwrap();
        assert_eq!(bad.len(), 1);
    }
}
