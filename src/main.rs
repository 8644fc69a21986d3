//! # xjsv CLI
//!
//! The `xjsv` binary validates corpora of JSON/YAML documents against
//! extended JSON Schemas.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `xjsv validate --schema <DIR> <INSTANCES>...` | Run the two-phase validation and emit the JSON report |
//! | `xjsv sites --schema <DIR>` | List the extension sites discovered in the loaded schemas |
//! | `xjsv cache status` | Show the persisted key cache entries |
//! | `xjsv cache clear` | Remove every cached key entry |
//!
//! ## Examples
//!
//! ```bash
//! # Validate a corpus, accumulating every finding
//! xjsv validate --schema ./schemas ./instances --continue
//!
//! # Restrict candidate schemas and write the report to a file
//! xjsv validate --schema ./schemas --use-schemas https://example.org/s1 \
//!     --report report.json ./instances
//!
//! # Refresh remote primary keys before validating
//! xjsv validate --schema ./schemas ./instances --invalidate
//!
//! # Offline run against the existing cache
//! xjsv validate --schema ./schemas ./instances --read-only
//! ```
//!
//! ## Exit codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | every document valid |
//! | 1 | at least one validation error |
//! | 2 | internal failure (loader, fetcher, cache) |

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use xjsv::cache::{CacheMode, KeyCache};
use xjsv::config::{self, Config};
use xjsv::extensions::SiteSpec;
use xjsv::store::DocumentStore;
use xjsv::validator::{CorpusValidator, RunOptions};

/// Cross-document JSON Schema validation with relational extension keywords.
#[derive(Parser)]
#[command(
    name = "xjsv",
    about = "Extended JSON Schema validator — uniqueness and referential integrity across document corpora",
    version
)]
struct Cli {
    /// Path to the YAML configuration file (providers, cache, fetch limits).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate instance documents against the loaded schemas.
    ///
    /// Runs standard draft validation per document, gathers key tuples for
    /// every extension site, then checks uniqueness and referential
    /// integrity across the whole corpus.
    Validate(ValidateArgs),

    /// List the extension sites discovered in the loaded schemas.
    ///
    /// Shows, per schema, every `unique` / `primary_key` / `index` /
    /// `foreign_keys` / `join_keys` position together with its host path.
    Sites {
        /// Schema file or directory (repeatable).
        #[arg(long = "schema", required = true)]
        schemas: Vec<PathBuf>,
    },

    /// Inspect or clear the persistent key cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Args)]
struct ValidateArgs {
    /// Schema file or directory (repeatable).
    #[arg(long = "schema", required = true)]
    schemas: Vec<PathBuf>,

    /// Instance files or directories.
    #[arg(required = true)]
    instances: Vec<PathBuf>,

    /// Pair unmatched instances by trying every loaded schema.
    #[arg(long)]
    guess_schema: bool,

    /// Restrict candidate schemas to these ids (comma separated, repeatable).
    #[arg(long = "use-schemas", conflicts_with = "guess_schema", value_delimiter = ',')]
    use_schemas: Vec<String>,

    /// Accumulate every error instead of stopping at the first.
    #[arg(long = "continue")]
    continue_on_error: bool,

    /// Key cache directory (overrides the configuration).
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Purge the key cache on startup, then rebuild it.
    #[arg(long, conflicts_with_all = ["read_only", "warm_up", "lazy_load"])]
    invalidate: bool,

    /// Use the key cache as-is; never fetch, never write.
    #[arg(long, conflicts_with_all = ["warm_up", "lazy_load"])]
    read_only: bool,

    /// Fetch every missing provider entry before phase 1.
    #[arg(long = "warm-up", conflicts_with = "lazy_load")]
    warm_up: bool,

    /// Fetch provider entries on first demand in phase 2 (default).
    #[arg(long = "lazy-load")]
    lazy_load: bool,

    /// Write the JSON report to this file instead of stdout.
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show the persisted cache entries.
    Status {
        /// Key cache directory (overrides the configuration).
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
    /// Remove every cached key entry.
    Clear {
        /// Key cache directory (overrides the configuration).
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Log filtering driven by -v repetition.
    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let cfg = config::load_config_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Validate(args) => run_validate(cfg, args).await,
        Commands::Sites { schemas } => run_sites(cfg, schemas),
        Commands::Cache { action } => run_cache(cfg, action),
    }
}

async fn run_validate(cfg: Config, args: ValidateArgs) -> Result<ExitCode> {
    let mut store = DocumentStore::new();
    let mut load_issues = Vec::new();

    for path in &args.schemas {
        load_issues.extend(
            store
                .load_schemas(path)
                .with_context(|| format!("loading schemas from {}", path.display()))?,
        );
    }
    if store.schema_count() == 0 {
        bail!("no usable schemas loaded");
    }
    for path in &args.instances {
        load_issues.extend(
            store
                .load_instances(path)
                .with_context(|| format!("loading instances from {}", path.display()))?,
        );
    }

    let cache_mode = if args.invalidate {
        CacheMode::Invalidate
    } else if args.read_only {
        CacheMode::ReadOnly
    } else if args.warm_up {
        CacheMode::WarmUp
    } else {
        CacheMode::LazyLoad
    };

    let opts = RunOptions {
        guess_schema: args.guess_schema,
        use_schemas: args.use_schemas,
        continue_on_error: args.continue_on_error,
        cache_mode,
        cache_dir: args.cache_dir,
    };

    let document_count = store.instance_count();
    let validator = CorpusValidator::new(store, cfg, load_issues);
    let report = validator.run(&opts).await?;

    let rendered = report.to_json_string()?;
    match &args.report {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("writing report to {}", path.display()))?;
            println!("validated {} documents", document_count);
            println!("  errors: {}", report.error_count());
            println!("  warnings: {}", report.warnings().len());
            println!("  report: {}", path.display());
        }
        None => println!("{}", rendered),
    }

    Ok(if report.has_errors() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

fn run_sites(cfg: Config, schemas: Vec<PathBuf>) -> Result<ExitCode> {
    let mut store = DocumentStore::new();
    let mut load_issues = Vec::new();
    for path in &schemas {
        load_issues.extend(store.load_schemas(path)?);
    }
    for issue in &load_issues {
        eprintln!("skipped {}: {}", issue.source, issue.message);
    }
    if store.schema_count() == 0 {
        bail!("no usable schemas loaded");
    }

    let validator = CorpusValidator::new(store, cfg, Vec::new());
    for (schema_id, sites) in validator.sites() {
        println!("schema {}", schema_id);
        if sites.is_empty() {
            println!("  (no extension sites)");
            continue;
        }
        for site in sites {
            let detail = match &site.spec {
                SiteSpec::Key { meta, .. } => {
                    let mut parts = Vec::new();
                    if let Some(name) = &meta.name {
                        parts.push(format!("name={}", name));
                    }
                    if meta.limit_scope {
                        parts.push("limit_scope".to_string());
                    }
                    parts.join(" ")
                }
                SiteSpec::Refs(targets) => format!("{} target(s)", targets.len()),
            };
            println!(
                "  {:<12} {:<24} {}",
                site.kind.keyword(),
                site.host_path.to_string(),
                detail
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_cache(cfg: Config, action: CacheAction) -> Result<ExitCode> {
    match action {
        CacheAction::Status { cache_dir } => {
            let dir = cache_dir.unwrap_or(cfg.cache.dir);
            let cache = KeyCache::open(&dir, true)?;
            let entries = cache.entries()?;
            println!("cache {}", dir.display());
            println!("  entries: {}", entries.len());
            for entry in entries {
                println!(
                    "  {} {} [{}] {} tuple(s), fetched {}",
                    entry.schema_id,
                    entry.pk_name.as_deref().unwrap_or("-"),
                    entry.origin,
                    entry.tuples.len(),
                    entry.fetched_at.to_rfc3339()
                );
            }
        }
        CacheAction::Clear { cache_dir } => {
            let dir = cache_dir.unwrap_or(cfg.cache.dir);
            let cache = KeyCache::open(&dir, false)?;
            cache.purge()?;
            println!("cache cleared: {}", dir.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}
