//! Two-phase cross-document validation.
//!
//! Orchestrates the full run:
//!
//! 1. **Phase 0 — pairing.** Each instance is matched to a schema via the
//!    configured schema-id keys, an explicit `--use-schemas` list, or
//!    `--guess-schema` trial validation.
//! 2. **Phase 1 — per document.** Standard draft validation, then key-tuple
//!    gathering for every extension site of the paired schema. Inline and
//!    provider tuples are merged into the same record log with their origin
//!    tagged.
//! 3. **Phase 2 — cross document.** Uniqueness checks for `unique` /
//!    `primary_key`, registration of primary keys and indices, and
//!    foreign-key / join-key resolution.
//!
//! Phase 1 completion is a barrier before phase 2. Errors are ordered by
//! source URI across documents and by traversal order within one; fail-fast
//! runs stop at the first error, `--continue` accumulates everything.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::cache::{CacheMode, KeyCache};
use crate::config::Config;
use crate::extensions::{ExtensionKind, ExtensionSite, PkDeclTable, PrimaryKeyDecl, SiteSpec};
use crate::keys::{extract_tuple, KeyTuple, MemberSpec};
use crate::models::{CacheEntry, InstanceDocument, KeyOrigin, RefRecord, TupleRecord};
use crate::provider::{compose_url, FetchJob, ProviderFetcher};
use crate::report::{ErrorKind, Issue, Report, SourceLocation};
use crate::resolver::KeyRegistry;
use crate::standard::StandardValidator;
use crate::store::{DocumentStore, LoadIssue};
use crate::traverse::discover_sites;

/// Synthetic document URI for inline-provider tuples in reports.
const INLINE_URI: &str = "(inline)";

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub guess_schema: bool,
    pub use_schemas: Vec<String>,
    pub continue_on_error: bool,
    pub cache_mode: CacheMode,
    /// Overrides the configured cache directory.
    pub cache_dir: Option<PathBuf>,
}

pub struct CorpusValidator {
    store: DocumentStore,
    config: Config,
    sites: BTreeMap<String, Vec<ExtensionSite>>,
    pk_decls: PkDeclTable,
    /// Loader and discovery findings, replayed into every report.
    upfront_issues: Vec<(String, Issue)>,
}

impl CorpusValidator {
    /// Discovers extension sites in every loaded schema and assembles the
    /// primary key declaration table (schema-level wiring unioned with the
    /// run configuration).
    pub fn new(store: DocumentStore, config: Config, load_issues: Vec<LoadIssue>) -> Self {
        let mut upfront_issues: Vec<(String, Issue)> = load_issues
            .iter()
            .map(|li| (li.source.clone(), li.to_issue()))
            .collect();

        let mut sites: BTreeMap<String, Vec<ExtensionSite>> = BTreeMap::new();
        let mut pk_decls: PkDeclTable = BTreeMap::new();

        for schema in store.schemas() {
            match discover_sites(&schema.schema_id, &schema.raw) {
                Ok(discovered) => {
                    for decl in discovered.pk_decls {
                        merge_decl(&mut pk_decls, decl);
                    }
                    // Every primary key site owns a declaration entry, even
                    // without provider wiring, so config-level settings have
                    // somewhere to land.
                    for site in &discovered.sites {
                        if site.kind == ExtensionKind::PrimaryKey {
                            let name = site.meta().and_then(|m| m.name.clone());
                            pk_decls
                                .entry((schema.schema_id.clone(), name.clone()))
                                .or_insert_with(|| PrimaryKeyDecl {
                                    schema_id: schema.schema_id.clone(),
                                    name,
                                    ..PrimaryKeyDecl::default()
                                });
                        }
                    }
                    sites.insert(schema.schema_id.clone(), discovered.sites);
                }
                Err(e) => {
                    upfront_issues.push((
                        schema.source.clone(),
                        Issue::new(ErrorKind::SchemaLoadError, "", format!("{:#}", e)),
                    ));
                }
            }
        }

        apply_config(&mut pk_decls, &config);

        Self {
            store,
            config,
            sites,
            pk_decls,
            upfront_issues,
        }
    }

    pub fn sites(&self) -> &BTreeMap<String, Vec<ExtensionSite>> {
        &self.sites
    }

    pub fn pk_decls(&self) -> &PkDeclTable {
        &self.pk_decls
    }

    pub async fn run(&self, opts: &RunOptions) -> Result<Report> {
        let mut report = Report::new();
        for (source, issue) in &self.upfront_issues {
            report.push(source, issue.clone());
        }
        if !opts.continue_on_error && report.has_errors() {
            return Ok(report);
        }

        let cache_dir = opts
            .cache_dir
            .clone()
            .unwrap_or_else(|| self.config.cache.dir.clone());
        let cache = KeyCache::open(&cache_dir, opts.cache_mode == CacheMode::ReadOnly)?;
        if opts.cache_mode == CacheMode::Invalidate {
            info!(dir = %cache.dir().display(), "invalidating key cache");
            cache.purge()?;
        }

        let mut provider_records: Vec<TupleRecord> = Vec::new();
        match opts.cache_mode {
            CacheMode::ReadOnly => {
                self.provider_records_from_cache(&cache, &mut provider_records)?;
            }
            CacheMode::WarmUp | CacheMode::Invalidate => {
                self.fetch_providers(&cache, None, &mut provider_records, &mut report)
                    .await?;
            }
            CacheMode::LazyLoad => {
                // Deferred until phase 2 demand is known.
            }
        }
        if !opts.continue_on_error && report.has_errors() {
            return Ok(report);
        }

        // Phase 1: per-document standard validation and tuple gathering.
        let mut std_validator = StandardValidator::new();
        let mut compile_failed: HashSet<String> = HashSet::new();
        let mut tuples: Vec<TupleRecord> = Vec::new();
        let mut refs: Vec<RefRecord> = Vec::new();

        for instance in self.store.instances() {
            let paired = self.pair_instance(opts, &mut std_validator, &mut compile_failed, instance);

            match paired {
                Pairing::Schemas(schema_ids) => {
                    report.touch(&instance.source_uri, schema_ids.first().map(String::as_str));
                    for schema_id in &schema_ids {
                        self.validate_one(
                            &mut std_validator,
                            &mut compile_failed,
                            schema_id,
                            instance,
                            &mut tuples,
                            &mut refs,
                            &mut report,
                        );
                    }
                }
                Pairing::Unknown(issue) => {
                    report.push(&instance.source_uri, issue);
                }
            }

            if !opts.continue_on_error && report.has_errors() {
                return Ok(report);
            }
        }

        // Inline-provider tuples join the record log with their own origin.
        for decl in self.pk_decls.values() {
            for tuple in &decl.inline {
                tuples.push(TupleRecord {
                    schema_id: decl.schema_id.clone(),
                    kind: ExtensionKind::PrimaryKey,
                    site_key: String::new(),
                    name: decl.name.clone(),
                    limit_scope: false,
                    tuple: tuple.clone(),
                    location: SourceLocation {
                        document_uri: INLINE_URI.to_string(),
                        path: String::new(),
                    },
                    origin: KeyOrigin::Inline,
                });
            }
        }

        // The gathered local keys are persisted alongside provider entries,
        // so an invalidated cache rebuilds from both the remote feeds and
        // the corpus itself. A no-op in read-only mode.
        self.cache_local_keys(&cache, &tuples)?;

        if opts.cache_mode == CacheMode::LazyLoad {
            let demanded: BTreeSet<(String, Option<String>)> = refs
                .iter()
                .filter(|r| r.kind == ExtensionKind::ForeignKey)
                .map(|r| (r.target_schema_id.clone(), r.refers_to.clone()))
                .collect();
            self.fetch_providers(&cache, Some(&demanded), &mut provider_records, &mut report)
                .await?;
            if !opts.continue_on_error && report.has_errors() {
                return Ok(report);
            }
        }
        tuples.extend(provider_records);

        // Phase 2: uniqueness, registration, reference resolution.
        for (document_uri, issue) in self.check_uniqueness(&tuples) {
            report.push(&document_uri, issue);
            if !opts.continue_on_error {
                return Ok(report);
            }
        }

        let registry = self.build_registry(&tuples);
        for (document_uri, issue) in registry.resolve_references(&refs) {
            report.push(&document_uri, issue);
            if !opts.continue_on_error {
                return Ok(report);
            }
        }

        Ok(report)
    }

    /// Phase 0: which schemas does this instance validate against?
    fn pair_instance(
        &self,
        opts: &RunOptions,
        std_validator: &mut StandardValidator,
        compile_failed: &mut HashSet<String>,
        instance: &InstanceDocument,
    ) -> Pairing {
        let candidates: Vec<&str> = if opts.use_schemas.is_empty() {
            self.store.schema_ids()
        } else {
            opts.use_schemas
                .iter()
                .map(String::as_str)
                .filter(|id| self.store.get_schema(id).is_some())
                .collect()
        };

        let declared = self
            .config
            .schema_id_path
            .iter()
            .find_map(|key| instance.raw.get(key).and_then(serde_json::Value::as_str));

        if let Some(id) = declared {
            if candidates.contains(&id) {
                return Pairing::Schemas(vec![id.to_string()]);
            }
        }

        if opts.guess_schema || !opts.use_schemas.is_empty() {
            let mut matched = Vec::new();
            for id in &candidates {
                let Some(schema) = self.store.get_schema(id) else {
                    continue;
                };
                if compile_failed.contains(*id) {
                    continue;
                }
                match std_validator.check(&self.store, schema, &instance.raw) {
                    Ok(issues) if issues.is_empty() => matched.push((*id).to_string()),
                    Ok(_) => {}
                    Err(e) => {
                        debug!(schema_id = %id, error = %e, "schema unusable while guessing");
                        compile_failed.insert((*id).to_string());
                    }
                }
            }
            if !matched.is_empty() {
                return Pairing::Schemas(matched);
            }
            return Pairing::Unknown(Issue::new(
                ErrorKind::UnknownSchema,
                "",
                format!(
                    "document validates under none of the {} candidate schema(s)",
                    candidates.len()
                ),
            ));
        }

        match declared {
            Some(id) => Pairing::Unknown(Issue::new(
                ErrorKind::UnknownSchema,
                "",
                format!("no loaded schema has id '{}'", id),
            )),
            None => Pairing::Unknown(Issue::new(
                ErrorKind::UnknownSchema,
                "",
                format!(
                    "document carries none of the schema id keys ({})",
                    self.config.schema_id_path.join(", ")
                ),
            )),
        }
    }

    /// Phase 1 for one (instance, schema) pair: draft errors, then tuples.
    #[allow(clippy::too_many_arguments)]
    fn validate_one(
        &self,
        std_validator: &mut StandardValidator,
        compile_failed: &mut HashSet<String>,
        schema_id: &str,
        instance: &InstanceDocument,
        tuples: &mut Vec<TupleRecord>,
        refs: &mut Vec<RefRecord>,
        report: &mut Report,
    ) {
        let Some(schema) = self.store.get_schema(schema_id) else {
            return;
        };

        report.touch(&instance.source_uri, Some(schema_id));

        if !compile_failed.contains(schema_id) {
            match std_validator.check(&self.store, schema, &instance.raw) {
                Ok(issues) => {
                    for std_issue in issues {
                        report.push(
                            &instance.source_uri,
                            Issue::new(
                                ErrorKind::StandardValidationError,
                                std_issue.path,
                                std_issue.message,
                            ),
                        );
                    }
                }
                Err(e) => {
                    compile_failed.insert(schema_id.to_string());
                    report.push(
                        &schema.source,
                        Issue::new(ErrorKind::SchemaLoadError, "", format!("{:#}", e)),
                    );
                }
            }
        }

        let Some(sites) = self.sites.get(schema_id) else {
            return;
        };

        for site in sites {
            for location in site.host_path.resolve(&instance.raw) {
                match &site.spec {
                    SiteSpec::Key { members, meta } => {
                        match extract_tuple(location.value, members) {
                            Ok(tuple) => tuples.push(TupleRecord {
                                schema_id: schema_id.to_string(),
                                kind: site.kind,
                                site_key: site.site_key(),
                                name: meta.name.clone(),
                                limit_scope: meta.limit_scope,
                                tuple,
                                location: SourceLocation {
                                    document_uri: instance.source_uri.clone(),
                                    path: location.pointer.clone(),
                                },
                                origin: KeyOrigin::LocalInstance,
                            }),
                            Err(missing) => report.push(
                                &instance.source_uri,
                                Issue::new(
                                    ErrorKind::MissingMember,
                                    location.pointer.clone(),
                                    format!("{} for '{}'", missing, site.kind.keyword()),
                                ),
                            ),
                        }
                    }
                    SiteSpec::Refs(targets) => {
                        for target in targets {
                            let spec = MemberSpec::Keys(target.members.clone());
                            match extract_tuple(location.value, &spec) {
                                Ok(tuple) => refs.push(RefRecord {
                                    kind: site.kind,
                                    source_schema_id: schema_id.to_string(),
                                    target_schema_id: target
                                        .schema_id
                                        .clone()
                                        .unwrap_or_else(|| schema_id.to_string()),
                                    refers_to: target.refers_to.clone(),
                                    tuple,
                                    location: SourceLocation {
                                        document_uri: instance.source_uri.clone(),
                                        path: location.pointer.clone(),
                                    },
                                }),
                                Err(missing) => report.push(
                                    &instance.source_uri,
                                    Issue::new(
                                        ErrorKind::MissingMember,
                                        location.pointer.clone(),
                                        format!("{} for '{}'", missing, site.kind.keyword()),
                                    ),
                                ),
                            }
                        }
                    }
                }
            }
        }
    }

    /// Phase 2 uniqueness for `unique` and `primary_key` records.
    ///
    /// Occurrences group by `(schema_id, key identity, scope)`; provider and
    /// inline tuples always live in the global scope. With
    /// `allow_provider_duplicates`, provider-origin occurrences drop out of
    /// the duplicate set (membership is unaffected).
    fn check_uniqueness(&self, records: &[TupleRecord]) -> Vec<(String, Issue)> {
        type GroupKey = (String, String, String);
        let mut groups: BTreeMap<GroupKey, BTreeMap<KeyTuple, Vec<&TupleRecord>>> =
            BTreeMap::new();

        for record in records {
            if !matches!(
                record.kind,
                ExtensionKind::Unique | ExtensionKind::PrimaryKey
            ) {
                continue;
            }
            let identity = match record.kind {
                ExtensionKind::PrimaryKey => {
                    format!("pk:{}", record.name.as_deref().unwrap_or_default())
                }
                _ => record.site_key.clone(),
            };
            let scope = if record.limit_scope {
                record.location.document_uri.clone()
            } else {
                String::new()
            };
            groups
                .entry((record.schema_id.clone(), identity, scope))
                .or_default()
                .entry(record.tuple.clone())
                .or_default()
                .push(record);
        }

        let mut out = Vec::new();
        for ((schema_id, _identity, _scope), by_tuple) in &groups {
            for (tuple, occurrences) in by_tuple {
                if occurrences.len() < 2 {
                    continue;
                }

                let is_pk = occurrences[0].kind == ExtensionKind::PrimaryKey;
                let allow_provider = is_pk
                    && self
                        .pk_decls
                        .get(&(schema_id.clone(), occurrences[0].name.clone()))
                        .map(|d| d.allow_provider_duplicates)
                        .unwrap_or(false);

                let mut effective: Vec<&&TupleRecord> = occurrences
                    .iter()
                    .filter(|r| !(allow_provider && r.origin == KeyOrigin::Provider))
                    .collect();
                if effective.len() < 2 {
                    continue;
                }

                // Provider and inline copies count as the earliest sightings,
                // so the violation lands on the local document.
                effective.sort_by_key(|r| {
                    (
                        origin_rank(r.origin),
                        r.location.document_uri.clone(),
                        r.location.path.clone(),
                    )
                });

                let all_locations: Vec<SourceLocation> =
                    effective.iter().map(|r| r.location.clone()).collect();
                let first = &effective[0];

                for dup in &effective[1..] {
                    let issue = Issue::new(
                        ErrorKind::UniquenessViolation,
                        dup.location.path.clone(),
                        format!(
                            "duplicated {} value {} (first seen in {})",
                            dup.kind.keyword(),
                            tuple,
                            first.location.document_uri
                        ),
                    )
                    .with_locations(all_locations.clone());
                    out.push((dup.location.document_uri.clone(), issue));
                }
            }
        }
        out
    }

    /// Builds the phase-2 registries: declared namespaces first, then every
    /// gathered primary key / index tuple.
    fn build_registry(&self, records: &[TupleRecord]) -> KeyRegistry {
        let mut registry = KeyRegistry::new();

        for sites in self.sites.values() {
            for site in sites {
                let name = site.meta().and_then(|m| m.name.as_deref());
                match site.kind {
                    ExtensionKind::PrimaryKey => registry.declare_pk(&site.schema_id, name),
                    ExtensionKind::Index => registry.declare_index(&site.schema_id, name),
                    _ => {}
                }
            }
        }
        for (schema_id, name) in self.pk_decls.keys() {
            registry.declare_pk(schema_id, name.as_deref());
        }

        for record in records {
            match record.kind {
                ExtensionKind::PrimaryKey => registry.register_pk(
                    &record.schema_id,
                    record.name.as_deref(),
                    record.tuple.clone(),
                    record.origin,
                ),
                ExtensionKind::Index => registry.register_index(
                    &record.schema_id,
                    record.name.as_deref(),
                    record.tuple.clone(),
                ),
                _ => {}
            }
        }

        registry
    }

    /// Persists the primary-key tuples gathered from local instances, one
    /// entry per `(schema_id, pk_name)` under the local origin.
    fn cache_local_keys(&self, cache: &KeyCache, records: &[TupleRecord]) -> Result<()> {
        let mut grouped: BTreeMap<(String, Option<String>), Vec<serde_json::Value>> =
            BTreeMap::new();
        for record in records {
            if record.kind == ExtensionKind::PrimaryKey
                && record.origin == KeyOrigin::LocalInstance
            {
                grouped
                    .entry((record.schema_id.clone(), record.name.clone()))
                    .or_default()
                    .push(record.tuple.to_json());
            }
        }
        for ((schema_id, name), tuples) in grouped {
            cache.store(&CacheEntry {
                schema_id,
                pk_name: name,
                origin: CacheEntry::LOCAL_ORIGIN.to_string(),
                tuples,
                fetched_at: Utc::now(),
            })?;
        }
        Ok(())
    }

    /// Read-only mode: every provider-origin cache entry joins the record
    /// log; nothing is fetched. Local-origin entries are skipped, since the
    /// run re-gathers those keys from the instances themselves and loading
    /// the cached copy would double-count every tuple.
    fn provider_records_from_cache(
        &self,
        cache: &KeyCache,
        out: &mut Vec<TupleRecord>,
    ) -> Result<()> {
        for entry in cache.entries()? {
            if entry.origin == CacheEntry::LOCAL_ORIGIN {
                continue;
            }
            let key = (entry.schema_id.clone(), entry.pk_name.clone());
            if !self.pk_decls.contains_key(&key) {
                continue;
            }
            push_provider_records(out, &entry);
        }
        Ok(())
    }

    /// Fetches provider keys for the declarations that need them, consulting
    /// the cache first. `demanded` narrows the work to the keys phase 2
    /// actually references (lazy-load).
    async fn fetch_providers(
        &self,
        cache: &KeyCache,
        demanded: Option<&BTreeSet<(String, Option<String>)>>,
        out: &mut Vec<TupleRecord>,
        report: &mut Report,
    ) -> Result<()> {
        let mut jobs = Vec::new();

        for ((schema_id, name), decl) in &self.pk_decls {
            if decl.providers.is_empty() {
                continue;
            }
            if let Some(demanded) = demanded {
                if !demanded.contains(&(schema_id.clone(), name.clone())) {
                    continue;
                }
            }
            for provider in &decl.providers {
                let url = compose_url(provider, schema_id, decl.schema_prefix.as_deref());
                match cache.load(schema_id, name.as_deref(), &url)? {
                    Some(entry) => push_provider_records(out, &entry),
                    None => jobs.push(FetchJob {
                        schema_id: schema_id.clone(),
                        pk_name: name.clone(),
                        url,
                        accept: decl.accept().to_string(),
                    }),
                }
            }
        }

        if jobs.is_empty() {
            return Ok(());
        }

        let fetcher =
            ProviderFetcher::new(&self.config.fetch).context("failed to build provider fetcher")?;
        info!(count = jobs.len(), "fetching provider keys");

        for outcome in fetcher.fetch_all(jobs).await {
            match outcome.result {
                Ok(key_tuples) => {
                    let entry = CacheEntry {
                        schema_id: outcome.job.schema_id.clone(),
                        pk_name: outcome.job.pk_name.clone(),
                        origin: outcome.job.url.clone(),
                        tuples: key_tuples.iter().map(KeyTuple::to_json).collect(),
                        fetched_at: Utc::now(),
                    };
                    cache.store(&entry)?;
                    push_provider_records(out, &entry);
                }
                Err(e) => {
                    // A stale cached copy downgrades the failure to a warning.
                    warn!(url = %outcome.job.url, error = %e, "provider fetch failed");
                    let issue = Issue::new(
                        ErrorKind::ProviderFetchError,
                        "",
                        format!("{:#}", e),
                    );
                    match cache.load(
                        &outcome.job.schema_id,
                        outcome.job.pk_name.as_deref(),
                        &outcome.job.url,
                    )? {
                        Some(entry) => {
                            report.push_warning(issue);
                            push_provider_records(out, &entry);
                        }
                        None => report.push(&outcome.job.url, issue),
                    }
                }
            }
        }

        Ok(())
    }
}

enum Pairing {
    Schemas(Vec<String>),
    Unknown(Issue),
}

fn origin_rank(origin: KeyOrigin) -> u8 {
    match origin {
        KeyOrigin::Provider => 0,
        KeyOrigin::Inline => 1,
        KeyOrigin::LocalInstance => 2,
    }
}

fn push_provider_records(out: &mut Vec<TupleRecord>, entry: &CacheEntry) {
    for tuple in entry.key_tuples() {
        out.push(TupleRecord {
            schema_id: entry.schema_id.clone(),
            kind: ExtensionKind::PrimaryKey,
            site_key: String::new(),
            name: entry.pk_name.clone(),
            limit_scope: false,
            tuple,
            location: SourceLocation {
                document_uri: entry.origin.clone(),
                path: String::new(),
            },
            origin: KeyOrigin::Provider,
        });
    }
}

fn merge_decl(table: &mut PkDeclTable, decl: PrimaryKeyDecl) {
    let key = (decl.schema_id.clone(), decl.name.clone());
    let entry = table.entry(key).or_insert_with(|| PrimaryKeyDecl {
        schema_id: decl.schema_id.clone(),
        name: decl.name.clone(),
        ..PrimaryKeyDecl::default()
    });
    entry.providers.extend(decl.providers);
    entry.inline.extend(decl.inline);
    if entry.schema_prefix.is_none() {
        entry.schema_prefix = decl.schema_prefix;
    }
    if entry.accept.is_none() {
        entry.accept = decl.accept;
    }
    entry.allow_provider_duplicates |= decl.allow_provider_duplicates;
}

/// Unions run-configuration provider settings into the declaration table.
fn apply_config(table: &mut PkDeclTable, config: &Config) {
    let pk = &config.primary_key;

    for (schema_id, values) in &pk.inline_provider {
        let tuples: Vec<KeyTuple> = values.iter().map(KeyTuple::from_config_value).collect();
        // A schema with exactly one primary key declaration absorbs the
        // inline tuples; otherwise they land on the unnamed key.
        let existing: Vec<Option<String>> = table
            .keys()
            .filter(|(sid, _)| sid == schema_id)
            .map(|(_, name)| name.clone())
            .collect();
        let name = match existing.as_slice() {
            [only] => only.clone(),
            _ => None,
        };
        let entry = table
            .entry((schema_id.clone(), name.clone()))
            .or_insert_with(|| PrimaryKeyDecl {
                schema_id: schema_id.clone(),
                name,
                ..PrimaryKeyDecl::default()
            });
        entry.inline.extend(tuples);
    }

    for decl in table.values_mut() {
        for provider in &pk.provider {
            if !decl.providers.contains(provider) {
                decl.providers.push(provider.clone());
            }
        }
        if decl.schema_prefix.is_none() {
            decl.schema_prefix = pk.schema_prefix.clone();
        }
        if decl.accept.is_none() {
            decl.accept = pk.accept.clone();
        }
        decl.allow_provider_duplicates |= pk.allow_provider_duplicates;
    }
}
