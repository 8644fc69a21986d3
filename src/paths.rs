//! Path templates and their resolution against instance documents.
//!
//! A [`PathTemplate`] is the data-only description of where an extension
//! site lives relative to the document root: a sequence of [`PathStep`]s
//! where wildcard steps stand for "every element" / "every value". Schema
//! traversal produces templates; extraction resolves them against concrete
//! documents, yielding zero or more [`Location`]s.
//!
//! Resolution rules:
//!
//! - `Key(k)` on anything but a mapping is a silent miss (no locations).
//! - `Index(i)` / `AnyIndex` on anything but a sequence is a silent miss.
//! - `AnyKey` on anything but a mapping is a silent miss.
//! - Wildcards expand in encounter order, so the output is the stable
//!   product of expansions. This ordering is what makes error reports
//!   deterministic.

use serde_json::Value;
use std::fmt;

/// One step of a path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    /// Descend into a mapping by key.
    Key(String),
    /// Descend into a sequence at a fixed index.
    Index(usize),
    /// Descend into every element of a sequence.
    AnyIndex,
    /// Descend into every value of a mapping.
    AnyKey,
}

/// An ordered sequence of steps from the document root to a host position.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PathTemplate {
    steps: Vec<PathStep>,
}

/// A concrete position produced by resolving a template: the JSON pointer
/// of the position plus a borrow of the value found there.
#[derive(Debug, Clone)]
pub struct Location<'v> {
    pub pointer: String,
    pub value: &'v Value,
}

impl PathTemplate {
    /// The empty template, matching the document root.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    pub fn is_root(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns a new template with `step` appended. Templates are built
    /// immutably during schema traversal so sibling branches never see
    /// each other's steps.
    pub fn child(&self, step: PathStep) -> Self {
        let mut steps = self.steps.clone();
        steps.push(step);
        Self { steps }
    }

    /// Resolves the template against `value`, depth-first.
    pub fn resolve<'v>(&self, value: &'v Value) -> Vec<Location<'v>> {
        let mut out = Vec::new();
        expand(&self.steps, value, String::new(), &mut out);
        out
    }
}

fn expand<'v>(steps: &[PathStep], value: &'v Value, pointer: String, out: &mut Vec<Location<'v>>) {
    let Some((step, rest)) = steps.split_first() else {
        out.push(Location { pointer, value });
        return;
    };

    match step {
        PathStep::Key(name) => {
            if let Value::Object(map) = value {
                if let Some(child) = map.get(name) {
                    let p = format!("{}/{}", pointer, escape_token(name));
                    expand(rest, child, p, out);
                }
            }
        }
        PathStep::Index(i) => {
            if let Value::Array(items) = value {
                if let Some(child) = items.get(*i) {
                    let p = format!("{}/{}", pointer, i);
                    expand(rest, child, p, out);
                }
            }
        }
        PathStep::AnyIndex => {
            if let Value::Array(items) = value {
                for (i, child) in items.iter().enumerate() {
                    let p = format!("{}/{}", pointer, i);
                    expand(rest, child, p, out);
                }
            }
        }
        PathStep::AnyKey => {
            if let Value::Object(map) = value {
                for (key, child) in map.iter() {
                    let p = format!("{}/{}", pointer, escape_token(key));
                    expand(rest, child, p, out);
                }
            }
        }
    }
}

/// JSON pointer token escaping (RFC 6901): `~` becomes `~0`, `/` becomes `~1`.
fn escape_token(token: &str) -> String {
    if token.contains('~') || token.contains('/') {
        token.replace('~', "~0").replace('/', "~1")
    } else {
        token.to_string()
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return write!(f, "/");
        }
        for step in &self.steps {
            match step {
                PathStep::Key(name) => write!(f, "/{}", escape_token(name))?,
                PathStep::Index(i) => write!(f, "/{}", i)?,
                PathStep::AnyIndex | PathStep::AnyKey => write!(f, "/*")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template(steps: Vec<PathStep>) -> PathTemplate {
        let mut t = PathTemplate::root();
        for s in steps {
            t = t.child(s);
        }
        t
    }

    #[test]
    fn root_template_matches_whole_document() {
        let doc = json!({"a": 1});
        let locs = PathTemplate::root().resolve(&doc);
        assert_eq!(locs.len(), 1);
        assert_eq!(locs[0].pointer, "");
        assert_eq!(locs[0].value, &doc);
    }

    #[test]
    fn key_steps_descend_mappings() {
        let doc = json!({"a": {"b": 42}});
        let t = template(vec![
            PathStep::Key("a".into()),
            PathStep::Key("b".into()),
        ]);
        let locs = t.resolve(&doc);
        assert_eq!(locs.len(), 1);
        assert_eq!(locs[0].pointer, "/a/b");
        assert_eq!(locs[0].value, &json!(42));
    }

    #[test]
    fn key_step_on_non_mapping_is_silent_miss() {
        let doc = json!([1, 2, 3]);
        let t = template(vec![PathStep::Key("a".into())]);
        assert!(t.resolve(&doc).is_empty());
    }

    #[test]
    fn any_index_expands_in_order() {
        let doc = json!({"items": [{"id": "x"}, {"id": "y"}]});
        let t = template(vec![
            PathStep::Key("items".into()),
            PathStep::AnyIndex,
            PathStep::Key("id".into()),
        ]);
        let locs = t.resolve(&doc);
        let pointers: Vec<_> = locs.iter().map(|l| l.pointer.as_str()).collect();
        assert_eq!(pointers, vec!["/items/0/id", "/items/1/id"]);
    }

    #[test]
    fn any_index_on_mapping_is_silent_miss() {
        let doc = json!({"items": {"not": "an array"}});
        let t = template(vec![PathStep::Key("items".into()), PathStep::AnyIndex]);
        assert!(t.resolve(&doc).is_empty());
    }

    #[test]
    fn any_key_expands_every_value() {
        let doc = json!({"m": {"a": 1, "b": 2}});
        let t = template(vec![PathStep::Key("m".into()), PathStep::AnyKey]);
        let locs = t.resolve(&doc);
        assert_eq!(locs.len(), 2);
        assert_eq!(locs[0].pointer, "/m/a");
        assert_eq!(locs[1].pointer, "/m/b");
    }

    #[test]
    fn nested_wildcards_are_a_stable_product() {
        let doc = json!({"rows": [{"cols": [1, 2]}, {"cols": [3]}]});
        let t = template(vec![
            PathStep::Key("rows".into()),
            PathStep::AnyIndex,
            PathStep::Key("cols".into()),
            PathStep::AnyIndex,
        ]);
        let pointers: Vec<_> = t
            .resolve(&doc)
            .into_iter()
            .map(|l| l.pointer)
            .collect();
        assert_eq!(
            pointers,
            vec!["/rows/0/cols/0", "/rows/0/cols/1", "/rows/1/cols/0"]
        );
    }

    #[test]
    fn fixed_index_out_of_bounds_is_silent_miss() {
        let doc = json!({"a": [1]});
        let t = template(vec![PathStep::Key("a".into()), PathStep::Index(3)]);
        assert!(t.resolve(&doc).is_empty());
    }

    #[test]
    fn pointer_tokens_are_escaped() {
        let doc = json!({"a/b": {"c~d": 1}});
        let t = template(vec![
            PathStep::Key("a/b".into()),
            PathStep::Key("c~d".into()),
        ]);
        let locs = t.resolve(&doc);
        assert_eq!(locs[0].pointer, "/a~1b/c~0d");
    }

    #[test]
    fn display_uses_wildcard_marker() {
        let t = template(vec![
            PathStep::Key("items".into()),
            PathStep::AnyIndex,
            PathStep::Key("id".into()),
        ]);
        assert_eq!(t.to_string(), "/items/*/id");
    }
}
