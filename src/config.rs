use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub primary_key: PrimaryKeyConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default = "default_schema_id_path")]
    pub schema_id_path: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            primary_key: PrimaryKeyConfig::default(),
            cache: CacheConfig::default(),
            fetch: FetchConfig::default(),
            schema_id_path: default_schema_id_path(),
        }
    }
}

fn default_schema_id_path() -> Vec<String> {
    vec![
        "@schema".to_string(),
        "_schema".to_string(),
        "$schema".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PrimaryKeyConfig {
    /// Inline key tuples per schema id; strings are 1-tuples, arrays n-tuples.
    #[serde(default)]
    pub inline_provider: BTreeMap<String, Vec<Value>>,
    /// Provider URL prefixes applied to every primary key declaration.
    #[serde(default)]
    pub provider: Vec<String>,
    #[serde(default)]
    pub allow_provider_duplicates: bool,
    #[serde(default)]
    pub schema_prefix: Option<String>,
    #[serde(default)]
    pub accept: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".xjsv-cache")
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_concurrency() -> usize {
    8
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config =
        serde_yaml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.fetch.concurrency == 0 {
        anyhow::bail!("fetch.concurrency must be > 0");
    }
    if config.schema_id_path.is_empty() {
        anyhow::bail!("schema_id_path must name at least one key");
    }
    if let Some(prefix) = &config.primary_key.schema_prefix {
        if prefix.is_empty() {
            anyhow::bail!("primary_key.schema_prefix must not be empty");
        }
    }

    Ok(config)
}

/// Loads the config when a path is given, else falls back to defaults.
/// An explicitly named but unreadable file is still an error.
pub fn load_config_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => load_config(p),
        None => Ok(Config::default()),
    }
}
