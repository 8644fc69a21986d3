//! Reference resolution: foreign keys against primary keys, join keys
//! against indices.
//!
//! After phase 1 every gathered key lands in one of two registries, both
//! keyed by `(schema_id, name|null)` — names never merge across schema ids:
//!
//! - the **primary key registry**: tuple → origin flags
//! - the **index registry**: tuple → occurrence count
//!
//! A registry key exists as soon as the declaration was discovered, even
//! with no tuples gathered yet. A reference to a key that was never
//! declared is an `UnresolvedReference`; a reference to a declared key
//! whose tuple set lacks the referenced tuple is a dangling reference.

use std::collections::{BTreeMap, HashMap};

use crate::extensions::ExtensionKind;
use crate::keys::KeyTuple;
use crate::models::{KeyOrigin, RefRecord};
use crate::report::{ErrorKind, Issue, ReferencedKey};

/// `(schema_id, name|null)` — the namespace of every declared key.
pub type RegistryKey = (String, Option<String>);

/// Which origins contributed a primary key tuple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OriginFlags {
    pub local: bool,
    pub inline: bool,
    pub provider: bool,
}

impl OriginFlags {
    pub fn mark(&mut self, origin: KeyOrigin) {
        match origin {
            KeyOrigin::LocalInstance => self.local = true,
            KeyOrigin::Inline => self.inline = true,
            KeyOrigin::Provider => self.provider = true,
        }
    }

    pub fn provider_only(&self) -> bool {
        self.provider && !self.local && !self.inline
    }
}

#[derive(Debug, Default)]
pub struct KeyRegistry {
    pk: BTreeMap<RegistryKey, HashMap<KeyTuple, OriginFlags>>,
    index: BTreeMap<RegistryKey, HashMap<KeyTuple, usize>>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a primary key namespace without tuples.
    pub fn declare_pk(&mut self, schema_id: &str, name: Option<&str>) {
        self.pk
            .entry((schema_id.to_string(), name.map(str::to_string)))
            .or_default();
    }

    /// Declares an index namespace without tuples.
    pub fn declare_index(&mut self, schema_id: &str, name: Option<&str>) {
        self.index
            .entry((schema_id.to_string(), name.map(str::to_string)))
            .or_default();
    }

    pub fn register_pk(
        &mut self,
        schema_id: &str,
        name: Option<&str>,
        tuple: KeyTuple,
        origin: KeyOrigin,
    ) {
        self.pk
            .entry((schema_id.to_string(), name.map(str::to_string)))
            .or_default()
            .entry(tuple)
            .or_default()
            .mark(origin);
    }

    pub fn register_index(&mut self, schema_id: &str, name: Option<&str>, tuple: KeyTuple) {
        *self
            .index
            .entry((schema_id.to_string(), name.map(str::to_string)))
            .or_default()
            .entry(tuple)
            .or_default() += 1;
    }

    pub fn pk_declared(&self, schema_id: &str, name: Option<&str>) -> bool {
        self.pk
            .contains_key(&(schema_id.to_string(), name.map(str::to_string)))
    }

    pub fn pk_origins(&self, schema_id: &str, name: Option<&str>, tuple: &KeyTuple) -> Option<OriginFlags> {
        self.pk
            .get(&(schema_id.to_string(), name.map(str::to_string)))
            .and_then(|set| set.get(tuple))
            .copied()
    }

    /// Resolves every gathered reference record, in the given order.
    /// Returns `(document_uri, issue)` pairs for the report.
    pub fn resolve_references(&self, records: &[RefRecord]) -> Vec<(String, Issue)> {
        let mut out = Vec::new();

        for record in records {
            let key = (
                record.target_schema_id.clone(),
                record.refers_to.clone(),
            );
            let referenced = ReferencedKey {
                schema_id: record.target_schema_id.clone(),
                name: record.refers_to.clone(),
                tuple: record.tuple.to_json(),
            };
            let target_desc = match &record.refers_to {
                Some(name) => format!("key '{}' of schema '{}'", name, record.target_schema_id),
                None => format!("schema '{}'", record.target_schema_id),
            };

            let issue = match record.kind {
                ExtensionKind::ForeignKey => match self.pk.get(&key) {
                    None => Some(
                        Issue::new(
                            ErrorKind::UnresolvedReference,
                            record.location.path.clone(),
                            format!("no primary key declared for {}", target_desc),
                        )
                        .with_referenced(referenced),
                    ),
                    Some(tuples) if !tuples.contains_key(&record.tuple) => Some(
                        Issue::new(
                            ErrorKind::DanglingForeignKey,
                            record.location.path.clone(),
                            format!(
                                "foreign key {} has no match in primary {}",
                                record.tuple, target_desc
                            ),
                        )
                        .with_referenced(referenced),
                    ),
                    Some(_) => None,
                },
                ExtensionKind::JoinKey => match self.index.get(&key) {
                    None => Some(
                        Issue::new(
                            ErrorKind::UnresolvedReference,
                            record.location.path.clone(),
                            format!("no index declared for {}", target_desc),
                        )
                        .with_referenced(referenced),
                    ),
                    Some(tuples) if !tuples.contains_key(&record.tuple) => Some(
                        Issue::new(
                            ErrorKind::DanglingJoinKey,
                            record.location.path.clone(),
                            format!(
                                "join key {} has no match in index {}",
                                record.tuple, target_desc
                            ),
                        )
                        .with_referenced(referenced),
                    ),
                    Some(_) => None,
                },
                _ => None,
            };

            if let Some(issue) = issue {
                out.push((record.location.document_uri.clone(), issue));
            }
        }

        out
    }
}
