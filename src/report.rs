//! Validation report data model.
//!
//! Findings are data, not process errors: a run that discovers violations
//! still completes and serializes one [`DocumentReport`] per input document.
//! Documents are ordered by source URI; within a document, issues appear in
//! traversal order, which together makes reports byte-identical across runs
//! over unchanged inputs.

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Every finding class a run can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SchemaLoadError,
    InstanceLoadError,
    UnknownSchema,
    StandardValidationError,
    MissingMember,
    UniquenessViolation,
    UnresolvedReference,
    DanglingForeignKey,
    DanglingJoinKey,
    ProviderFetchError,
}

/// A concrete position in a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    pub document_uri: String,
    pub path: String,
}

/// The key a reference issue points at.
#[derive(Debug, Clone, Serialize)]
pub struct ReferencedKey {
    pub schema_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub tuple: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub kind: ErrorKind,
    pub path: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offending_locations: Option<Vec<SourceLocation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referenced: Option<ReferencedKey>,
}

impl Issue {
    pub fn new(kind: ErrorKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
            offending_locations: None,
            referenced: None,
        }
    }

    pub fn with_locations(mut self, locations: Vec<SourceLocation>) -> Self {
        self.offending_locations = Some(locations);
        self
    }

    pub fn with_referenced(mut self, referenced: ReferencedKey) -> Self {
        self.referenced = Some(referenced);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub document_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,
    pub errors: Vec<Issue>,
}

/// The whole run's findings.
#[derive(Debug, Default)]
pub struct Report {
    documents: BTreeMap<String, DocumentReport>,
    warnings: Vec<Issue>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a document so it appears in the report even when clean.
    pub fn touch(&mut self, document_uri: &str, schema_id: Option<&str>) {
        let entry = self
            .documents
            .entry(document_uri.to_string())
            .or_insert_with(|| DocumentReport {
                document_uri: document_uri.to_string(),
                schema_id: None,
                errors: Vec::new(),
            });
        if entry.schema_id.is_none() {
            entry.schema_id = schema_id.map(str::to_string);
        }
    }

    pub fn push(&mut self, document_uri: &str, issue: Issue) {
        self.touch(document_uri, None);
        if let Some(doc) = self.documents.get_mut(document_uri) {
            doc.errors.push(issue);
        }
    }

    /// Warnings do not affect the exit code; they are serialized separately.
    pub fn push_warning(&mut self, issue: Issue) {
        self.warnings.push(issue);
    }

    pub fn has_errors(&self) -> bool {
        self.documents.values().any(|d| !d.errors.is_empty())
    }

    pub fn error_count(&self) -> usize {
        self.documents.values().map(|d| d.errors.len()).sum()
    }

    pub fn documents(&self) -> impl Iterator<Item = &DocumentReport> {
        self.documents.values()
    }

    pub fn warnings(&self) -> &[Issue] {
        &self.warnings
    }

    /// The first error in report order, for fail-fast runs.
    pub fn first_error(&self) -> Option<(&str, &Issue)> {
        self.documents
            .values()
            .find(|d| !d.errors.is_empty())
            .map(|d| (d.document_uri.as_str(), &d.errors[0]))
    }

    pub fn to_json_string(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Rendered<'a> {
            documents: Vec<&'a DocumentReport>,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            warnings: Vec<&'a Issue>,
        }
        let rendered = Rendered {
            documents: self.documents.values().collect(),
            warnings: self.warnings.iter().collect(),
        };
        Ok(serde_json::to_string_pretty(&rendered)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kinds_serialize_in_snake_case() {
        let rendered = serde_json::to_value(ErrorKind::DanglingForeignKey).unwrap();
        assert_eq!(rendered, json!("dangling_foreign_key"));
        let rendered = serde_json::to_value(ErrorKind::UniquenessViolation).unwrap();
        assert_eq!(rendered, json!("uniqueness_violation"));
    }

    #[test]
    fn documents_are_ordered_by_uri() {
        let mut report = Report::new();
        report.push("b.json", Issue::new(ErrorKind::UnknownSchema, "", "no schema"));
        report.push("a.json", Issue::new(ErrorKind::UnknownSchema, "", "no schema"));
        let uris: Vec<_> = report.documents().map(|d| d.document_uri.as_str()).collect();
        assert_eq!(uris, vec!["a.json", "b.json"]);
    }

    #[test]
    fn touch_registers_clean_documents() {
        let mut report = Report::new();
        report.touch("a.json", Some("s/1.0"));
        assert!(!report.has_errors());
        let doc = report.documents().next().unwrap();
        assert_eq!(doc.schema_id.as_deref(), Some("s/1.0"));
        assert!(doc.errors.is_empty());
    }

    #[test]
    fn optional_fields_are_omitted() {
        let issue = Issue::new(ErrorKind::MissingMember, "/a", "gone");
        let rendered = serde_json::to_value(&issue).unwrap();
        assert!(rendered.get("offending_locations").is_none());
        assert!(rendered.get("referenced").is_none());
    }

    #[test]
    fn first_error_follows_report_order() {
        let mut report = Report::new();
        report.touch("a.json", None);
        report.push("c.json", Issue::new(ErrorKind::UnknownSchema, "", "later"));
        report.push("b.json", Issue::new(ErrorKind::UnknownSchema, "", "earlier"));
        let (uri, issue) = report.first_error().unwrap();
        assert_eq!(uri, "b.json");
        assert_eq!(issue.message, "earlier");
    }

    #[test]
    fn warnings_do_not_count_as_errors() {
        let mut report = Report::new();
        report.push_warning(Issue::new(
            ErrorKind::ProviderFetchError,
            "",
            "stale cache copy in use",
        ));
        assert!(!report.has_errors());
        assert_eq!(report.warnings().len(), 1);
    }
}
