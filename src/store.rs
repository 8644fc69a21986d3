//! Document store: loaded schemas and instance documents.
//!
//! Schemas are keyed by schema id, instances by source URI; both orderings
//! are lexicographic so every later stage sees documents in a deterministic
//! order. The store is read-only once loading finishes, and doubles as the
//! `$ref` retriever for the standard validator.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::models::{InstanceDocument, SchemaDocument};
use crate::report::{ErrorKind, Issue};

/// A document that could not be loaded or registered. Fatal for that
/// document only; the rest of the corpus still validates.
#[derive(Debug)]
pub struct LoadIssue {
    pub source: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl LoadIssue {
    pub fn to_issue(&self) -> Issue {
        Issue::new(self.kind, "", self.message.clone())
    }
}

#[derive(Debug, Default)]
pub struct DocumentStore {
    schemas: BTreeMap<String, SchemaDocument>,
    instances: BTreeMap<String, InstanceDocument>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads one schema file or a directory of them. Returns per-file load
    /// issues; fails only when the path itself cannot be walked.
    pub fn load_schemas(&mut self, path: &Path) -> Result<Vec<LoadIssue>> {
        let mut issues = Vec::new();
        for file in collect_documents(path)? {
            let source = file.display().to_string();
            match parse_document(&file) {
                Ok(raw) => {
                    if let Err(issue) = self.insert_schema(&source, raw) {
                        issues.push(issue);
                    }
                }
                Err(e) => issues.push(LoadIssue {
                    source,
                    kind: ErrorKind::SchemaLoadError,
                    message: format!("{:#}", e),
                }),
            }
        }
        Ok(issues)
    }

    /// Loads one instance file or a directory of them.
    pub fn load_instances(&mut self, path: &Path) -> Result<Vec<LoadIssue>> {
        let mut issues = Vec::new();
        for file in collect_documents(path)? {
            let source = file.display().to_string();
            match parse_document(&file) {
                Ok(raw) => self.insert_instance(&source, raw),
                Err(e) => issues.push(LoadIssue {
                    source,
                    kind: ErrorKind::InstanceLoadError,
                    message: format!("{:#}", e),
                }),
            }
        }
        Ok(issues)
    }

    /// Registers a parsed schema. The id is `$id` (or draft-04 `id`), else
    /// derived from the source path. Duplicate ids reject the newcomer.
    pub fn insert_schema(&mut self, source: &str, raw: Value) -> Result<(), LoadIssue> {
        let schema_id = raw
            .get("$id")
            .or_else(|| raw.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("file://{}", source));

        if let Some(existing) = self.schemas.get(&schema_id) {
            return Err(LoadIssue {
                source: source.to_string(),
                kind: ErrorKind::SchemaLoadError,
                message: format!(
                    "schema id '{}' already loaded from {}",
                    schema_id, existing.source
                ),
            });
        }

        self.schemas.insert(
            schema_id.clone(),
            SchemaDocument {
                schema_id,
                source: source.to_string(),
                raw,
            },
        );
        Ok(())
    }

    pub fn insert_instance(&mut self, source_uri: &str, raw: Value) {
        self.instances.insert(
            source_uri.to_string(),
            InstanceDocument {
                source_uri: source_uri.to_string(),
                raw,
            },
        );
    }

    pub fn schemas(&self) -> impl Iterator<Item = &SchemaDocument> {
        self.schemas.values()
    }

    pub fn schema_ids(&self) -> Vec<&str> {
        self.schemas.keys().map(String::as_str).collect()
    }

    pub fn get_schema(&self, schema_id: &str) -> Option<&SchemaDocument> {
        self.schemas.get(schema_id)
    }

    pub fn schema_count(&self) -> usize {
        self.schemas.len()
    }

    pub fn instances(&self) -> impl Iterator<Item = &InstanceDocument> {
        self.instances.values()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Builds the `$ref` retriever handed to the standard validator. Ids are
    /// registered with and without a trailing `#` so either spelling in a
    /// `$ref` resolves.
    pub fn retriever(&self) -> StoreRetriever {
        let mut map = HashMap::new();
        for schema in self.schemas.values() {
            map.insert(schema.schema_id.clone(), schema.raw.clone());
            let trimmed = schema.schema_id.trim_end_matches('#');
            if trimmed != schema.schema_id {
                map.insert(trimmed.to_string(), schema.raw.clone());
            }
        }
        StoreRetriever { schemas: map }
    }
}

/// Resolves `$ref` URIs against the loaded schema set.
pub struct StoreRetriever {
    schemas: HashMap<String, Value>,
}

impl jsonschema::Retrieve for StoreRetriever {
    fn retrieve(
        &self,
        uri: &jsonschema::Uri<&str>,
    ) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        let uri_str = uri.as_str();
        self.schemas
            .get(uri_str)
            .or_else(|| self.schemas.get(uri_str.trim_end_matches('#')))
            .cloned()
            .ok_or_else(|| format!("schema not found for URI: {uri_str}").into())
    }
}

/// Collects document files beneath `path`: `.json`, `.yaml` and `.yml`,
/// hidden entries skipped, lexicographically sorted.
fn collect_documents(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        return Err(anyhow!("path does not exist: {}", path.display()));
    }
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    // The root itself is exempt from hidden-name filtering; only entries
    // beneath it are skipped.
    let walker = WalkDir::new(path)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()));
    for entry in walker {
        let entry = entry.with_context(|| format!("walking {}", path.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file = entry.path();
        let ext = file
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        if matches!(ext, "json" | "yaml" | "yml") {
            files.push(file.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Parses a document as JSON first, falling back to YAML, so `.json` files
/// holding YAML (and vice versa) still load the way the feeds in the wild do.
fn parse_document(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    match serde_json::from_str(&content) {
        Ok(value) => Ok(value),
        Err(json_err) => serde_yaml::from_str(&content).map_err(|yaml_err| {
            anyhow!(
                "not parseable as JSON ({}) nor as YAML ({})",
                json_err,
                yaml_err
            )
        }),
    }
}
