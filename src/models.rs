//! Core data models shared across the validation pipeline.
//!
//! The data lifecycle is:
//!
//! ```text
//! loader → SchemaDocument / InstanceDocument
//!              ↓ traversal            ↓ phase 1
//!        ExtensionSite …      TupleRecord / RefRecord
//!                                      ↓ phase 2
//!                         pk / index registries → Report
//! ```
//!
//! [`CacheEntry`] is the only type that outlives a run: it is what the key
//! cache persists between invocations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extensions::ExtensionKind;
use crate::keys::KeyTuple;
use crate::report::SourceLocation;

/// A loaded JSON Schema, keyed by its schema id for the run.
#[derive(Debug, Clone)]
pub struct SchemaDocument {
    /// `$id` (or draft-04 `id`) when present, else derived from the path.
    pub schema_id: String,
    /// Where the schema was read from.
    pub source: String,
    pub raw: Value,
}

/// A loaded instance document, not yet paired with a schema.
#[derive(Debug, Clone)]
pub struct InstanceDocument {
    pub source_uri: String,
    pub raw: Value,
}

/// Where a key tuple came from. Uniqueness and reference checks treat the
/// origins differently (`allow_provider_duplicates`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOrigin {
    LocalInstance,
    Inline,
    Provider,
}

/// One persisted cache record: the primary-key tuples obtained from a single
/// origin for one `(schema_id, pk_name)` declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub schema_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pk_name: Option<String>,
    /// Provider URL, or [`CacheEntry::LOCAL_ORIGIN`] for locally gathered keys.
    pub origin: String,
    /// Tuples in their JSON rendition.
    pub tuples: Vec<Value>,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    pub const LOCAL_ORIGIN: &'static str = "local";

    pub fn key_tuples(&self) -> Vec<KeyTuple> {
        self.tuples.iter().map(tuple_from_json).collect()
    }
}

/// Rehydrates a persisted tuple: arrays are n-tuples, scalars 1-tuples.
pub fn tuple_from_json(value: &Value) -> KeyTuple {
    KeyTuple::from_config_value(value)
}

/// One gathered key occurrence from phase 1 (or from an inline / provider
/// source, with a synthetic location).
#[derive(Debug, Clone)]
pub struct TupleRecord {
    pub schema_id: String,
    pub kind: ExtensionKind,
    /// Site identity within the schema (declared name or derived key).
    pub site_key: String,
    pub name: Option<String>,
    pub limit_scope: bool,
    pub tuple: KeyTuple,
    pub location: SourceLocation,
    pub origin: KeyOrigin,
}

/// One foreign-key / join-key occurrence gathered in phase 1, resolved in
/// phase 2.
#[derive(Debug, Clone)]
pub struct RefRecord {
    pub kind: ExtensionKind,
    pub source_schema_id: String,
    pub target_schema_id: String,
    pub refers_to: Option<String>,
    pub tuple: KeyTuple,
    pub location: SourceLocation,
}
