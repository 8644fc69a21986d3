use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn xjsv_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("xjsv");
    path
}

/// A scratch corpus: `schemas/`, `instances/`, and a cache directory.
struct Workspace {
    tmp: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("schemas")).unwrap();
        fs::create_dir_all(tmp.path().join("instances")).unwrap();
        Self { tmp }
    }

    fn root(&self) -> &Path {
        self.tmp.path()
    }

    fn schemas_dir(&self) -> PathBuf {
        self.root().join("schemas")
    }

    fn instances_dir(&self) -> PathBuf {
        self.root().join("instances")
    }

    fn cache_dir(&self) -> PathBuf {
        self.root().join("cache")
    }

    fn write_schema(&self, name: &str, schema: &Value) {
        fs::write(
            self.schemas_dir().join(name),
            serde_json::to_string_pretty(schema).unwrap(),
        )
        .unwrap();
    }

    fn write_instance(&self, name: &str, instance: &Value) {
        fs::write(
            self.instances_dir().join(name),
            serde_json::to_string_pretty(instance).unwrap(),
        )
        .unwrap();
    }

    fn run(&self, args: &[&str]) -> (String, String, i32) {
        let output = Command::new(xjsv_binary())
            .args(args)
            .current_dir(self.root())
            .output()
            .unwrap_or_else(|e| panic!("Failed to run xjsv binary: {}", e));
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        (stdout, stderr, output.status.code().unwrap_or(-1))
    }

    /// `xjsv validate` over the whole workspace, report parsed from stdout.
    fn validate(&self, extra: &[&str]) -> (Value, i32) {
        let schemas = self.schemas_dir();
        let instances = self.instances_dir();
        let cache = self.cache_dir();
        let mut args = vec![
            "validate",
            "--schema",
            schemas.to_str().unwrap(),
            "--cache-dir",
            cache.to_str().unwrap(),
        ];
        args.extend_from_slice(extra);
        args.push(instances.to_str().unwrap());

        let (stdout, stderr, code) = self.run(&args);
        let report: Value = serde_json::from_str(&stdout)
            .unwrap_or_else(|e| panic!("report is not JSON ({}): {}\nstderr: {}", e, stdout, stderr));
        (report, code)
    }
}

fn doc_errors<'r>(report: &'r Value, uri_suffix: &str) -> &'r Vec<Value> {
    report["documents"]
        .as_array()
        .unwrap()
        .iter()
        .find(|d| d["document_uri"].as_str().unwrap().ends_with(uri_suffix))
        .unwrap_or_else(|| panic!("no document ending in {} in {}", uri_suffix, report))
        .get("errors")
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("document {} has no errors array", uri_suffix))
}

fn error_kinds(report: &Value, uri_suffix: &str) -> Vec<String> {
    doc_errors(report, uri_suffix)
        .iter()
        .map(|e| e["kind"].as_str().unwrap().to_string())
        .collect()
}

fn total_errors(report: &Value) -> usize {
    report["documents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["errors"].as_array().map(Vec::len).unwrap_or(0))
        .sum()
}

fn unique_schema() -> Value {
    json!({
        "$id": "https://example.org/s1",
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "properties": {
            "@schema": {"type": "string"},
            "local_id": {"type": "string", "unique": true}
        }
    })
}

#[test]
fn test_valid_corpus_exits_zero() {
    let ws = Workspace::new();
    ws.write_schema("s1.json", &unique_schema());
    ws.write_instance("a.json", &json!({"@schema": "https://example.org/s1", "local_id": "X"}));
    ws.write_instance("b.json", &json!({"@schema": "https://example.org/s1", "local_id": "Y"}));

    let (report, code) = ws.validate(&[]);
    assert_eq!(code, 0, "expected success, report: {}", report);
    assert_eq!(total_errors(&report), 0);
    assert_eq!(report["documents"].as_array().unwrap().len(), 2);
}

#[test]
fn test_global_unique_violation() {
    let ws = Workspace::new();
    ws.write_schema("s1.json", &unique_schema());
    ws.write_instance("a.json", &json!({"@schema": "https://example.org/s1", "local_id": "X"}));
    ws.write_instance("b.json", &json!({"@schema": "https://example.org/s1", "local_id": "X"}));

    let (report, code) = ws.validate(&["--continue"]);
    assert_eq!(code, 1);
    assert_eq!(error_kinds(&report, "b.json"), vec!["uniqueness_violation"]);

    let errors = doc_errors(&report, "b.json");
    let locations = errors[0]["offending_locations"].as_array().unwrap();
    assert_eq!(locations.len(), 2);
    assert!(locations[0]["document_uri"].as_str().unwrap().ends_with("a.json"));
    assert!(locations[1]["document_uri"].as_str().unwrap().ends_with("b.json"));
    assert_eq!(errors[0]["path"], "/local_id");
}

#[test]
fn test_named_unique_with_members() {
    let ws = Workspace::new();
    ws.write_schema(
        "s1.json",
        &json!({
            "$id": "https://example.org/s1",
            "type": "object",
            "unique": {"name": "pair", "members": ["local_id", "other_id"]}
        }),
    );
    ws.write_instance("i1.json", &json!({"@schema": "https://example.org/s1", "local_id": "a", "other_id": 1}));
    ws.write_instance("i2.json", &json!({"@schema": "https://example.org/s1", "local_id": "a", "other_id": 2}));
    ws.write_instance("i3.json", &json!({"@schema": "https://example.org/s1", "local_id": "a", "other_id": 1}));

    let (report, code) = ws.validate(&["--continue"]);
    assert_eq!(code, 1);
    assert_eq!(total_errors(&report), 1);

    let errors = doc_errors(&report, "i3.json");
    let locations = errors[0]["offending_locations"].as_array().unwrap();
    let uris: Vec<&str> = locations
        .iter()
        .map(|l| l["document_uri"].as_str().unwrap())
        .collect();
    assert!(uris[0].ends_with("i1.json") && uris[1].ends_with("i3.json"));
}

fn fk_corpus(ws: &Workspace, ref_value: &str) {
    ws.write_schema(
        "s1.json",
        &json!({
            "$id": "https://example.org/s1",
            "type": "object",
            "primary_key": {"name": "pk", "members": ["local_id", "other_id"]}
        }),
    );
    ws.write_schema(
        "s2.json",
        &json!({
            "$id": "https://example.org/s2",
            "type": "object",
            "foreign_keys": [{
                "schema_id": "https://example.org/s1",
                "refers_to": "pk",
                "members": ["ref_local_id", "ref_other_id"]
            }]
        }),
    );
    ws.write_instance("pk.json", &json!({"@schema": "https://example.org/s1", "local_id": "a", "other_id": "b"}));
    ws.write_instance("ref.json", &json!({"@schema": "https://example.org/s2", "ref_local_id": "a", "ref_other_id": ref_value}));
}

#[test]
fn test_foreign_key_match_passes() {
    let ws = Workspace::new();
    fk_corpus(&ws, "b");
    let (report, code) = ws.validate(&["--continue"]);
    assert_eq!(code, 0, "report: {}", report);
}

#[test]
fn test_foreign_key_mismatch_dangles() {
    let ws = Workspace::new();
    fk_corpus(&ws, "c");
    let (report, code) = ws.validate(&["--continue"]);
    assert_eq!(code, 1);
    assert_eq!(error_kinds(&report, "ref.json"), vec!["dangling_foreign_key"]);

    let errors = doc_errors(&report, "ref.json");
    let referenced = &errors[0]["referenced"];
    assert_eq!(referenced["schema_id"], "https://example.org/s1");
    assert_eq!(referenced["name"], "pk");
    assert_eq!(referenced["tuple"], json!(["a", "c"]));
}

#[test]
fn test_inline_provider_from_config() {
    let ws = Workspace::new();
    ws.write_schema(
        "s1.json",
        &json!({
            "$id": "https://example.org/s1",
            "primary_key": {"members": true}
        }),
    );
    ws.write_schema(
        "s2.json",
        &json!({
            "$id": "https://example.org/s2",
            "foreign_keys": [{
                "schema_id": "https://example.org/s1",
                "members": ["ref_id"]
            }]
        }),
    );
    ws.write_instance("ok.json", &json!({"@schema": "https://example.org/s2", "ref_id": "X"}));
    ws.write_instance("bad.json", &json!({"@schema": "https://example.org/s2", "ref_id": "Q"}));

    let config_path = ws.root().join("xjsv.yaml");
    fs::write(
        &config_path,
        r#"
primary_key:
  inline_provider:
    "https://example.org/s1": ["X", "Y"]
"#,
    )
    .unwrap();

    let (report, code) = ws.validate(&["--continue", "--config", config_path.to_str().unwrap()]);
    assert_eq!(code, 1);
    assert!(error_kinds(&report, "ok.json").is_empty());
    assert_eq!(error_kinds(&report, "bad.json"), vec!["dangling_foreign_key"]);
}

fn limit_scope_corpus(ws: &Workspace, limit_scope: bool) {
    ws.write_schema(
        "s1.json",
        &json!({
            "$id": "https://example.org/s1",
            "properties": {
                "local_id": {"primary_key": {"members": true, "limit_scope": limit_scope}}
            }
        }),
    );
    ws.write_instance("a.json", &json!({"@schema": "https://example.org/s1", "local_id": "X"}));
    ws.write_instance("b.json", &json!({"@schema": "https://example.org/s1", "local_id": "X"}));
}

#[test]
fn test_limit_scope_partitions_per_document() {
    let scoped = Workspace::new();
    limit_scope_corpus(&scoped, true);
    let (_, code) = scoped.validate(&["--continue"]);
    assert_eq!(code, 0);

    let global = Workspace::new();
    limit_scope_corpus(&global, false);
    let (report, code) = global.validate(&["--continue"]);
    assert_eq!(code, 1);
    assert_eq!(error_kinds(&report, "b.json"), vec!["uniqueness_violation"]);
}

fn provider_duplicate_corpus(allow: bool) -> Workspace {
    let ws = Workspace::new();
    ws.write_schema(
        "s1.json",
        &json!({
            "$id": "https://example.org/s1",
            "properties": {
                "local_id": {
                    "primary_key": {
                        "members": true,
                        "name": "ids",
                        "allow_provider_duplicates": allow
                    }
                }
            }
        }),
    );
    ws.write_instance("doc.json", &json!({"@schema": "https://example.org/s1", "local_id": "X"}));

    // A provider-origin entry planted in the cache stands in for a remote
    // feed; --read-only consumes it without fetching.
    let cache = xjsv::cache::KeyCache::open(&ws.cache_dir(), false).unwrap();
    cache
        .store(&xjsv::models::CacheEntry {
            schema_id: "https://example.org/s1".into(),
            pk_name: Some("ids".into()),
            origin: "https://keys.example.org/s1".into(),
            tuples: vec![json!("X")],
            fetched_at: chrono::Utc::now(),
        })
        .unwrap();
    ws
}

#[test]
fn test_provider_duplicate_rejected_by_default() {
    let ws = provider_duplicate_corpus(false);
    let (report, code) = ws.validate(&["--continue", "--read-only"]);
    assert_eq!(code, 1);
    assert_eq!(error_kinds(&report, "doc.json"), vec!["uniqueness_violation"]);
}

#[test]
fn test_provider_duplicate_allowed_with_flag() {
    let ws = provider_duplicate_corpus(true);
    let (report, code) = ws.validate(&["--continue", "--read-only"]);
    assert_eq!(code, 0, "report: {}", report);
}

#[test]
fn test_unknown_schema_reported() {
    let ws = Workspace::new();
    ws.write_schema("s1.json", &unique_schema());
    ws.write_instance("stray.json", &json!({"@schema": "https://example.org/other", "x": 1}));

    let (report, code) = ws.validate(&["--continue"]);
    assert_eq!(code, 1);
    assert_eq!(error_kinds(&report, "stray.json"), vec!["unknown_schema"]);
}

#[test]
fn test_fail_fast_stops_at_first_error() {
    let ws = Workspace::new();
    ws.write_schema("s1.json", &unique_schema());
    for name in ["a.json", "b.json", "c.json"] {
        ws.write_instance(name, &json!({"@schema": "https://example.org/s1", "local_id": "X"}));
    }

    let (report, code) = ws.validate(&[]);
    assert_eq!(code, 1);
    assert_eq!(total_errors(&report), 1);

    let (report, _) = ws.validate(&["--continue"]);
    assert_eq!(total_errors(&report), 2);
}

#[test]
fn test_standard_validation_errors_forwarded() {
    let ws = Workspace::new();
    ws.write_schema(
        "s1.json",
        &json!({
            "$id": "https://example.org/s1",
            "type": "object",
            "properties": {"count": {"type": "integer"}}
        }),
    );
    ws.write_instance("bad.json", &json!({"@schema": "https://example.org/s1", "count": "three"}));

    let (report, code) = ws.validate(&["--continue"]);
    assert_eq!(code, 1);
    assert_eq!(
        error_kinds(&report, "bad.json"),
        vec!["standard_validation_error"]
    );
}

#[test]
fn test_yaml_instances_validate() {
    let ws = Workspace::new();
    ws.write_schema("s1.json", &unique_schema());
    fs::write(
        ws.instances_dir().join("a.yaml"),
        "'@schema': https://example.org/s1\nlocal_id: X\n",
    )
    .unwrap();
    fs::write(
        ws.instances_dir().join("b.yaml"),
        "'@schema': https://example.org/s1\nlocal_id: X\n",
    )
    .unwrap();

    let (report, code) = ws.validate(&["--continue"]);
    assert_eq!(code, 1);
    assert_eq!(error_kinds(&report, "b.yaml"), vec!["uniqueness_violation"]);
}

#[test]
fn test_reports_are_deterministic() {
    let ws = Workspace::new();
    ws.write_schema("s1.json", &unique_schema());
    ws.write_instance("a.json", &json!({"@schema": "https://example.org/s1", "local_id": "X"}));
    ws.write_instance("b.json", &json!({"@schema": "https://example.org/s1", "local_id": "X"}));

    let (first, _) = ws.validate(&["--continue"]);
    let (second, _) = ws.validate(&["--continue"]);
    assert_eq!(first, second);
}

#[test]
fn test_sites_listing() {
    let ws = Workspace::new();
    ws.write_schema(
        "s1.json",
        &json!({
            "$id": "https://example.org/s1",
            "properties": {
                "local_id": {"unique": true},
                "rows": {"items": {"properties": {"id": {"index": {"members": true, "name": "row_ids"}}}}}
            },
            "foreign_keys": [{"schema_id": "https://example.org/s1", "members": ["ref"]}]
        }),
    );

    let schemas = ws.schemas_dir();
    let (stdout, stderr, code) = ws.run(&["sites", "--schema", schemas.to_str().unwrap()]);
    assert_eq!(code, 0, "stderr: {}", stderr);
    assert!(stdout.contains("schema https://example.org/s1"));
    assert!(stdout.contains("unique"));
    assert!(stdout.contains("/local_id"));
    assert!(stdout.contains("/rows/*/id"));
    assert!(stdout.contains("name=row_ids"));
    assert!(stdout.contains("foreign_keys"));
}

#[test]
fn test_cache_status_and_clear() {
    let ws = Workspace::new();
    let cache_dir = ws.cache_dir();
    let cache = xjsv::cache::KeyCache::open(&cache_dir, false).unwrap();
    cache
        .store(&xjsv::models::CacheEntry {
            schema_id: "https://example.org/s1".into(),
            pk_name: None,
            origin: "https://keys.example.org/s1".into(),
            tuples: vec![json!("X")],
            fetched_at: chrono::Utc::now(),
        })
        .unwrap();

    let (stdout, _, code) = ws.run(&["cache", "status", "--cache-dir", cache_dir.to_str().unwrap()]);
    assert_eq!(code, 0);
    assert!(stdout.contains("entries: 1"));
    assert!(stdout.contains("https://example.org/s1"));

    let (_, _, code) = ws.run(&["cache", "clear", "--cache-dir", cache_dir.to_str().unwrap()]);
    assert_eq!(code, 0);

    let (stdout, _, _) = ws.run(&["cache", "status", "--cache-dir", cache_dir.to_str().unwrap()]);
    assert!(stdout.contains("entries: 0"));
}

#[test]
fn test_missing_schema_dir_is_internal_failure() {
    let ws = Workspace::new();
    let instances = ws.instances_dir();
    let (_, stderr, code) = ws.run(&[
        "validate",
        "--schema",
        "/definitely/not/here-xjsv",
        instances.to_str().unwrap(),
    ]);
    assert_eq!(code, 2);
    assert!(stderr.contains("error"), "stderr: {}", stderr);
}

#[test]
fn test_report_written_to_file() {
    let ws = Workspace::new();
    ws.write_schema("s1.json", &unique_schema());
    ws.write_instance("a.json", &json!({"@schema": "https://example.org/s1", "local_id": "X"}));

    let report_path = ws.root().join("report.json");
    let schemas = ws.schemas_dir();
    let instances = ws.instances_dir();
    let cache = ws.cache_dir();
    let (stdout, _, code) = ws.run(&[
        "validate",
        "--schema",
        schemas.to_str().unwrap(),
        "--cache-dir",
        cache.to_str().unwrap(),
        "--report",
        report_path.to_str().unwrap(),
        instances.to_str().unwrap(),
    ]);
    assert_eq!(code, 0);
    assert!(stdout.contains("validated 1 documents"));
    assert!(stdout.contains("errors: 0"));

    let report: Value = serde_json::from_str(&fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report["documents"].as_array().unwrap().len(), 1);
}
