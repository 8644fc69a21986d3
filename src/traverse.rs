//! Schema traversal: discovering extension sites.
//!
//! Walks every subschema of a loaded schema, accumulating the host path
//! template that later resolves against instances:
//!
//! | Schema keyword | Path contribution |
//! |----------------|-------------------|
//! | `properties.X` | `Key(X)` |
//! | `patternProperties.*` / `additionalProperties` | `AnyKey` |
//! | `items` (single schema) / `additionalItems` | `AnyIndex` |
//! | `items` (tuple form) / `prefixItems[i]` | `Index(i)` |
//! | `allOf` / `anyOf` / `oneOf`, `$defs` / `definitions` | none |
//!
//! Sites under composition keywords are recorded unconditionally; when the
//! branch does not apply to an instance the host path simply fails to
//! resolve and no tuples are gathered (silent miss).

use anyhow::{bail, Context, Result};
use serde_json::Value;

use crate::extensions::{
    parse_key_spec, parse_ref_spec, ExtensionKind, ExtensionSite, PrimaryKeyDecl, SiteSpec,
};
use crate::paths::{PathStep, PathTemplate};

/// Everything discovery learns about one schema.
#[derive(Debug, Default)]
pub struct DiscoveredSchema {
    pub sites: Vec<ExtensionSite>,
    /// Provider wiring found on `primary_key` object forms.
    pub pk_decls: Vec<PrimaryKeyDecl>,
}

/// Walks `schema` and returns every extension site it hosts.
///
/// Fails on malformed extension keyword values and on two `primary_key`
/// declarations sharing the same `(schema_id, name)`.
pub fn discover_sites(schema_id: &str, schema: &Value) -> Result<DiscoveredSchema> {
    let mut discovered = DiscoveredSchema::default();
    walk(schema_id, schema, &PathTemplate::root(), &mut discovered)?;

    let mut seen_pks: Vec<Option<String>> = Vec::new();
    for site in &discovered.sites {
        if site.kind != ExtensionKind::PrimaryKey {
            continue;
        }
        let name = site.meta().and_then(|m| m.name.clone());
        if seen_pks.contains(&name) {
            bail!(
                "schema '{}' declares primary_key '{}' more than once",
                schema_id,
                name.as_deref().unwrap_or("(unnamed)")
            );
        }
        seen_pks.push(name);
    }

    Ok(discovered)
}

fn walk(
    schema_id: &str,
    node: &Value,
    path: &PathTemplate,
    out: &mut DiscoveredSchema,
) -> Result<()> {
    let Value::Object(map) = node else {
        // Boolean schemas and stray values host nothing.
        return Ok(());
    };

    for kind in ExtensionKind::ALL {
        let Some(value) = map.get(kind.keyword()) else {
            continue;
        };
        let spec = if kind.is_reference() {
            SiteSpec::Refs(
                parse_ref_spec(kind, value)
                    .with_context(|| format!("schema '{}' at {}", schema_id, path))?,
            )
        } else {
            let (members, meta, provider) = parse_key_spec(kind, value)
                .with_context(|| format!("schema '{}' at {}", schema_id, path))?;
            if let Some(mut decl) = provider {
                decl.schema_id = schema_id.to_string();
                decl.name = meta.name.clone();
                out.pk_decls.push(decl);
            }
            SiteSpec::Key { members, meta }
        };
        out.sites.push(ExtensionSite {
            schema_id: schema_id.to_string(),
            host_path: path.clone(),
            kind,
            spec,
        });
    }

    if let Some(Value::Object(props)) = map.get("properties") {
        for (name, sub) in props {
            walk(schema_id, sub, &path.child(PathStep::Key(name.clone())), out)?;
        }
    }
    if let Some(Value::Object(patterns)) = map.get("patternProperties") {
        for sub in patterns.values() {
            walk(schema_id, sub, &path.child(PathStep::AnyKey), out)?;
        }
    }
    if let Some(sub @ Value::Object(_)) = map.get("additionalProperties") {
        walk(schema_id, sub, &path.child(PathStep::AnyKey), out)?;
    }
    match map.get("items") {
        Some(sub @ Value::Object(_)) => {
            walk(schema_id, sub, &path.child(PathStep::AnyIndex), out)?;
        }
        // Draft-04 tuple form.
        Some(Value::Array(items)) => {
            for (i, sub) in items.iter().enumerate() {
                walk(schema_id, sub, &path.child(PathStep::Index(i)), out)?;
            }
        }
        _ => {}
    }
    if let Some(Value::Array(items)) = map.get("prefixItems") {
        for (i, sub) in items.iter().enumerate() {
            walk(schema_id, sub, &path.child(PathStep::Index(i)), out)?;
        }
    }
    if let Some(sub @ Value::Object(_)) = map.get("additionalItems") {
        walk(schema_id, sub, &path.child(PathStep::AnyIndex), out)?;
    }
    for combinator in ["allOf", "anyOf", "oneOf"] {
        if let Some(Value::Array(branches)) = map.get(combinator) {
            for sub in branches {
                walk(schema_id, sub, path, out)?;
            }
        }
    }
    for defs in ["$defs", "definitions"] {
        if let Some(Value::Object(entries)) = map.get(defs) {
            for sub in entries.values() {
                walk(schema_id, sub, path, out)?;
            }
        }
    }

    Ok(())
}
