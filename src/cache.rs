//! Persistent key cache.
//!
//! One JSON file per `(schema_id, pk_name, origin)` composite, named by the
//! SHA-256 of the composite key, inside a flat cache directory. Entries are
//! replaced atomically (write to a temp file in the same directory, then
//! rename), so concurrent readers always see a complete entry. There is no
//! TTL; invalidation is user-driven.
//!
//! Within a run the cache has a single writer. In read-only mode writes are
//! skipped entirely and nothing is ever fetched on the cache's behalf.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::models::CacheEntry;

/// How the cache participates in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Purge on startup, then rebuild from providers and local instances.
    Invalidate,
    /// Use the cache as-is; never fetch, never write.
    ReadOnly,
    /// Fetch every missing entry before phase 1.
    WarmUp,
    /// Fetch on first demand in phase 2.
    #[default]
    LazyLoad,
}

#[derive(Debug)]
pub struct KeyCache {
    dir: PathBuf,
    read_only: bool,
}

impl KeyCache {
    /// Opens (creating if absent) the cache directory.
    pub fn open(dir: &Path, read_only: bool) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create cache directory {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            read_only,
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, schema_id: &str, pk_name: Option<&str>, origin: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(schema_id.as_bytes());
        hasher.update([0]);
        hasher.update(pk_name.unwrap_or_default().as_bytes());
        hasher.update([0]);
        hasher.update(origin.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        self.dir.join(format!("{}.json", digest))
    }

    pub fn load(
        &self,
        schema_id: &str,
        pk_name: Option<&str>,
        origin: &str,
    ) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(schema_id, pk_name, origin);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read cache entry {}", path.display()))?;
        let entry = serde_json::from_str(&content)
            .with_context(|| format!("corrupt cache entry {}", path.display()))?;
        Ok(Some(entry))
    }

    /// Persists an entry atomically. A no-op in read-only mode.
    pub fn store(&self, entry: &CacheEntry) -> Result<()> {
        if self.read_only {
            debug!(schema_id = %entry.schema_id, "cache is read-only, skipping write");
            return Ok(());
        }
        let path = self.entry_path(&entry.schema_id, entry.pk_name.as_deref(), &entry.origin);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .context("failed to create cache temp file")?;
        let content = serde_json::to_string_pretty(entry)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&path)
            .with_context(|| format!("failed to persist cache entry {}", path.display()))?;
        Ok(())
    }

    /// Removes every entry. A no-op in read-only mode.
    pub fn purge(&self) -> Result<()> {
        if self.read_only {
            debug!("cache is read-only, skipping purge");
            return Ok(());
        }
        for path in self.entry_files()? {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to remove cache entry {}", path.display()))?;
        }
        Ok(())
    }

    /// All persisted entries, ordered by `(schema_id, pk_name, origin)`.
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        for path in self.entry_files()? {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read cache entry {}", path.display()))?;
            match serde_json::from_str::<CacheEntry>(&content) {
                Ok(entry) => entries.push(entry),
                Err(e) => debug!(path = %path.display(), error = %e, "skipping corrupt cache entry"),
            }
        }
        entries.sort_by(|a, b| {
            (&a.schema_id, &a.pk_name, &a.origin).cmp(&(&b.schema_id, &b.pk_name, &b.origin))
        });
        Ok(entries)
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("failed to list cache directory {}", self.dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}
