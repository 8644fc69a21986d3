//! The relational extension keyword catalogue.
//!
//! Five schema-level keywords extend standard JSON Schema with constraints
//! that span a whole corpus of documents:
//!
//! | Keyword | Style | Checked in phase 2 as |
//! |---------|-------|-----------------------|
//! | `unique` | key | corpus-wide uniqueness |
//! | `primary_key` | key | uniqueness + referenceable key set |
//! | `index` | key | referenceable key multiset (no uniqueness) |
//! | `foreign_keys` | reference | membership in a primary key set |
//! | `join_keys` | reference | membership in an index |
//!
//! Key-style keywords accept `true`, an array of member names, or an object
//! `{ members, name?, limit_scope? }`; `primary_key` additionally accepts
//! provider wiring (`inline_provider`, `provider`, `schema_prefix`,
//! `accept`, `allow_provider_duplicates`). Reference-style keywords accept
//! an array of `{ schema_id?, refers_to?, members }` declarations.

use anyhow::{bail, Result};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::keys::{KeyTuple, MemberSpec};
use crate::paths::PathTemplate;

pub const DEFAULT_ACCEPT: &str = "text/uri-list";

/// The five extension keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExtensionKind {
    Unique,
    PrimaryKey,
    Index,
    ForeignKey,
    JoinKey,
}

impl ExtensionKind {
    pub const ALL: [ExtensionKind; 5] = [
        ExtensionKind::Unique,
        ExtensionKind::PrimaryKey,
        ExtensionKind::Index,
        ExtensionKind::ForeignKey,
        ExtensionKind::JoinKey,
    ];

    pub fn keyword(&self) -> &'static str {
        match self {
            ExtensionKind::Unique => "unique",
            ExtensionKind::PrimaryKey => "primary_key",
            ExtensionKind::Index => "index",
            ExtensionKind::ForeignKey => "foreign_keys",
            ExtensionKind::JoinKey => "join_keys",
        }
    }

    /// Reference-style keywords point at keys gathered elsewhere; key-style
    /// keywords declare them.
    pub fn is_reference(&self) -> bool {
        matches!(self, ExtensionKind::ForeignKey | ExtensionKind::JoinKey)
    }
}

/// Optional metadata on a key-style site.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteMeta {
    /// Declared name; named keys can be targeted by `refers_to`.
    pub name: Option<String>,
    /// When set, the uniqueness namespace is one document rather than the
    /// whole corpus.
    pub limit_scope: bool,
}

/// One declaration inside a `foreign_keys` / `join_keys` array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefTarget {
    /// Target schema; defaults to the declaring schema.
    pub schema_id: Option<String>,
    /// Target key name; `None` targets the unnamed key of the schema.
    pub refers_to: Option<String>,
    pub members: Vec<String>,
}

/// What a site does with the values found at its host positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteSpec {
    Key { members: MemberSpec, meta: SiteMeta },
    Refs(Vec<RefTarget>),
}

/// A position inside a schema carrying one of the extension keywords,
/// together with the host path template accumulated from the schema root.
#[derive(Debug, Clone)]
pub struct ExtensionSite {
    pub schema_id: String,
    pub host_path: PathTemplate,
    pub kind: ExtensionKind,
    pub spec: SiteSpec,
}

impl ExtensionSite {
    /// Stable identity of the site inside its schema: the declared name when
    /// present, else the keyword anchored at its host path.
    pub fn site_key(&self) -> String {
        if let SiteSpec::Key { meta, .. } = &self.spec {
            if let Some(name) = &meta.name {
                return name.clone();
            }
        }
        format!("{}@{}", self.kind.keyword(), self.host_path)
    }

    pub fn meta(&self) -> Option<&SiteMeta> {
        match &self.spec {
            SiteSpec::Key { meta, .. } => Some(meta),
            SiteSpec::Refs(_) => None,
        }
    }
}

/// Provider wiring for one primary key declaration. Entries from the schema
/// itself and from the run configuration are unioned.
#[derive(Debug, Clone, Default)]
pub struct PrimaryKeyDecl {
    pub schema_id: String,
    pub name: Option<String>,
    pub providers: Vec<String>,
    pub schema_prefix: Option<String>,
    pub accept: Option<String>,
    pub allow_provider_duplicates: bool,
    /// Key tuples supplied inline (configuration or schema), origin `Inline`.
    pub inline: Vec<KeyTuple>,
}

impl PrimaryKeyDecl {
    pub fn accept(&self) -> &str {
        self.accept.as_deref().unwrap_or(DEFAULT_ACCEPT)
    }
}

/// All primary key declarations discovered in a run, keyed by
/// `(schema_id, name)`. Names are never merged across schema ids.
pub type PkDeclTable = BTreeMap<(String, Option<String>), PrimaryKeyDecl>;

/// Parses a key-style keyword value (`unique` / `primary_key` / `index`).
///
/// Returns the member spec, the site metadata, and — for the object form of
/// `primary_key` — any provider wiring found alongside the members.
pub fn parse_key_spec(
    kind: ExtensionKind,
    value: &Value,
) -> Result<(MemberSpec, SiteMeta, Option<PrimaryKeyDecl>)> {
    match value {
        Value::Bool(true) => Ok((MemberSpec::Whole, SiteMeta::default(), None)),
        Value::Bool(false) => bail!("'{}: false' declares nothing", kind.keyword()),
        Value::Array(_) => Ok((
            parse_members(value, kind)?,
            SiteMeta::default(),
            None,
        )),
        Value::Object(map) => {
            let members = map
                .get("members")
                .map(|m| parse_members(m, kind))
                .transpose()?
                .unwrap_or(MemberSpec::Whole);

            let meta = SiteMeta {
                name: match map.get("name") {
                    None => None,
                    Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                    Some(_) => bail!("'{}.name' must be a non-empty string", kind.keyword()),
                },
                limit_scope: match map.get("limit_scope") {
                    None => false,
                    Some(Value::Bool(b)) => *b,
                    Some(_) => bail!("'{}.limit_scope' must be a boolean", kind.keyword()),
                },
            };

            let provider = if kind == ExtensionKind::PrimaryKey {
                parse_provider_fields(map)?
            } else {
                None
            };

            Ok((members, meta, provider))
        }
        other => bail!(
            "'{}' must be true, an array of member names, or an object; got {}",
            kind.keyword(),
            json_type_name(other)
        ),
    }
}

fn parse_members(value: &Value, kind: ExtensionKind) -> Result<MemberSpec> {
    match value {
        Value::Bool(true) => Ok(MemberSpec::Whole),
        Value::Array(items) => {
            let mut names = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) if !s.is_empty() => names.push(s.clone()),
                    _ => bail!(
                        "'{}' member names must be non-empty strings",
                        kind.keyword()
                    ),
                }
            }
            if names.is_empty() {
                bail!("'{}' member list must not be empty", kind.keyword());
            }
            Ok(MemberSpec::Keys(names))
        }
        other => bail!(
            "'{}' members must be true or an array of strings; got {}",
            kind.keyword(),
            json_type_name(other)
        ),
    }
}

fn parse_provider_fields(map: &serde_json::Map<String, Value>) -> Result<Option<PrimaryKeyDecl>> {
    let mut decl = PrimaryKeyDecl::default();
    let mut present = false;

    if let Some(v) = map.get("provider") {
        present = true;
        decl.providers = match v {
            Value::String(s) => vec![s.clone()],
            Value::Array(items) => {
                let mut urls = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => urls.push(s.clone()),
                        _ => bail!("'primary_key.provider' entries must be strings"),
                    }
                }
                urls
            }
            _ => bail!("'primary_key.provider' must be a string or an array of strings"),
        };
    }
    if let Some(v) = map.get("schema_prefix") {
        present = true;
        match v {
            Value::String(s) => decl.schema_prefix = Some(s.clone()),
            _ => bail!("'primary_key.schema_prefix' must be a string"),
        }
    }
    if let Some(v) = map.get("accept") {
        present = true;
        match v {
            Value::String(s) => decl.accept = Some(s.clone()),
            _ => bail!("'primary_key.accept' must be a string"),
        }
    }
    if let Some(v) = map.get("allow_provider_duplicates") {
        present = true;
        match v {
            Value::Bool(b) => decl.allow_provider_duplicates = *b,
            _ => bail!("'primary_key.allow_provider_duplicates' must be a boolean"),
        }
    }
    if let Some(v) = map.get("inline_provider") {
        present = true;
        match v {
            Value::Array(items) => {
                decl.inline = items.iter().map(KeyTuple::from_config_value).collect();
            }
            _ => bail!("'primary_key.inline_provider' must be an array of tuples or strings"),
        }
    }

    Ok(present.then_some(decl))
}

/// Parses a reference-style keyword value (`foreign_keys` / `join_keys`).
pub fn parse_ref_spec(kind: ExtensionKind, value: &Value) -> Result<Vec<RefTarget>> {
    let Value::Array(items) = value else {
        bail!(
            "'{}' must be an array of reference declarations; got {}",
            kind.keyword(),
            json_type_name(value)
        );
    };

    let mut targets = Vec::with_capacity(items.len());
    for item in items {
        let Value::Object(map) = item else {
            bail!("'{}' entries must be objects", kind.keyword());
        };

        let schema_id = match map.get("schema_id") {
            None => None,
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(_) => bail!("'{}.schema_id' must be a non-empty string", kind.keyword()),
        };
        let refers_to = match map.get("refers_to") {
            None => None,
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(_) => bail!("'{}.refers_to' must be a non-empty string", kind.keyword()),
        };
        let members = match map.get("members") {
            Some(m) => match parse_members(m, kind)? {
                MemberSpec::Keys(names) => names,
                MemberSpec::Whole => bail!(
                    "'{}' declarations need an explicit member list",
                    kind.keyword()
                ),
            },
            None => bail!("'{}' declarations require 'members'", kind.keyword()),
        };

        targets.push(RefTarget {
            schema_id,
            refers_to,
            members,
        });
    }

    Ok(targets)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bool_true_is_whole() {
        let (members, meta, provider) =
            parse_key_spec(ExtensionKind::Unique, &json!(true)).unwrap();
        assert_eq!(members, MemberSpec::Whole);
        assert_eq!(meta, SiteMeta::default());
        assert!(provider.is_none());
    }

    #[test]
    fn bool_false_is_rejected() {
        assert!(parse_key_spec(ExtensionKind::Unique, &json!(false)).is_err());
    }

    #[test]
    fn array_form_lists_members() {
        let (members, _, _) =
            parse_key_spec(ExtensionKind::PrimaryKey, &json!(["a", "b"])).unwrap();
        assert_eq!(members, MemberSpec::Keys(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn object_form_absorbs_name_and_scope() {
        let value = json!({"members": ["x"], "name": "pair", "limit_scope": true});
        let (members, meta, _) = parse_key_spec(ExtensionKind::Unique, &value).unwrap();
        assert_eq!(members, MemberSpec::Keys(vec!["x".into()]));
        assert_eq!(meta.name.as_deref(), Some("pair"));
        assert!(meta.limit_scope);
    }

    #[test]
    fn object_form_members_true_is_whole() {
        let (members, _, _) =
            parse_key_spec(ExtensionKind::Index, &json!({"members": true, "name": "n"})).unwrap();
        assert_eq!(members, MemberSpec::Whole);
    }

    #[test]
    fn primary_key_absorbs_provider_fields() {
        let value = json!({
            "members": true,
            "provider": ["https://keys.example.org/"],
            "schema_prefix": "https://schemas.example.org/",
            "accept": "text/csv",
            "allow_provider_duplicates": true,
            "inline_provider": ["X", ["a", 1]]
        });
        let (_, _, provider) = parse_key_spec(ExtensionKind::PrimaryKey, &value).unwrap();
        let decl = provider.unwrap();
        assert_eq!(decl.providers, vec!["https://keys.example.org/"]);
        assert_eq!(decl.schema_prefix.as_deref(), Some("https://schemas.example.org/"));
        assert_eq!(decl.accept(), "text/csv");
        assert!(decl.allow_provider_duplicates);
        assert_eq!(decl.inline.len(), 2);
    }

    #[test]
    fn provider_fields_on_unique_are_ignored() {
        let value = json!({"members": true, "provider": "https://keys.example.org/"});
        let (_, _, provider) = parse_key_spec(ExtensionKind::Unique, &value).unwrap();
        assert!(provider.is_none());
    }

    #[test]
    fn empty_member_list_is_rejected() {
        assert!(parse_key_spec(ExtensionKind::Unique, &json!([])).is_err());
    }

    #[test]
    fn ref_spec_parses_targets() {
        let value = json!([
            {"schema_id": "S1/1.0", "refers_to": "pk", "members": ["ref_a", "ref_b"]},
            {"members": ["self_ref"]}
        ]);
        let targets = parse_ref_spec(ExtensionKind::ForeignKey, &value).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].schema_id.as_deref(), Some("S1/1.0"));
        assert_eq!(targets[0].refers_to.as_deref(), Some("pk"));
        assert_eq!(targets[1].schema_id, None);
        assert_eq!(targets[1].members, vec!["self_ref".to_string()]);
    }

    #[test]
    fn ref_spec_requires_members() {
        let value = json!([{"schema_id": "S1/1.0"}]);
        assert!(parse_ref_spec(ExtensionKind::ForeignKey, &value).is_err());
    }

    #[test]
    fn ref_spec_rejects_non_array() {
        assert!(parse_ref_spec(ExtensionKind::JoinKey, &json!({"members": ["a"]})).is_err());
    }

    #[test]
    fn site_key_prefers_declared_name() {
        let site = ExtensionSite {
            schema_id: "s".into(),
            host_path: PathTemplate::root(),
            kind: ExtensionKind::Unique,
            spec: SiteSpec::Key {
                members: MemberSpec::Whole,
                meta: SiteMeta {
                    name: Some("pair".into()),
                    limit_scope: false,
                },
            },
        };
        assert_eq!(site.site_key(), "pair");
    }

    #[test]
    fn site_key_falls_back_to_keyword_and_path() {
        let site = ExtensionSite {
            schema_id: "s".into(),
            host_path: PathTemplate::root().child(crate::paths::PathStep::Key("id".into())),
            kind: ExtensionKind::Unique,
            spec: SiteSpec::Key {
                members: MemberSpec::Whole,
                meta: SiteMeta::default(),
            },
        };
        assert_eq!(site.site_key(), "unique@/id");
    }
}
