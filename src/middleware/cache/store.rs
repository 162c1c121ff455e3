use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use http::HeaderMap;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::CacheEntry;
use super::key::{cache_key, url_hash};

const META_EXTENSION: &str = "json";
const BODY_EXTENSION: &str = "body";
const TEMP_SUFFIX: &str = ".tmp";

/// Flat directory of `{key}.json` metadata and `{key}.body` payloads. In-flight
/// bodies live in `{key}.*.tmp` files until renamed into place.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    /// Creates the directory if needed and clears writes interrupted by a
    /// previous process.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create cache directory {}", dir.display()))?;
        let store = Self { dir };
        store.remove_temp_files()?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn meta_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{META_EXTENSION}"))
    }

    pub fn body_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{BODY_EXTENSION}"))
    }

    /// Finds the stored variant of `url` selected by `request_headers`.
    /// Unreadable or incomplete entries count as misses.
    pub fn lookup(
        &self,
        url: &str,
        request_headers: &HeaderMap,
    ) -> Result<Option<(String, CacheEntry)>> {
        for key in self.keys_for_url(url)? {
            let entry = match self.read_metadata(&key) {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(key = %key, error = %err, "ignoring unreadable cache metadata");
                    continue;
                }
            };
            if entry.url != url || cache_key(url, &entry.vary, request_headers) != key {
                continue;
            }
            let body_len = fs::metadata(self.body_path(&key)).map(|meta| meta.len());
            if body_len.ok() != Some(entry.content_length) {
                debug!(key = %key, "cache body missing or truncated");
                self.remove_entry(&key);
                continue;
            }
            return Ok(Some((key, entry)));
        }
        Ok(None)
    }

    pub fn read_metadata(&self, key: &str) -> Result<CacheEntry> {
        let path = self.meta_path(key);
        let mut file = File::open(&path)
            .with_context(|| format!("failed to open cache metadata {}", path.display()))?;
        file.lock_shared()
            .with_context(|| format!("failed to lock cache metadata {}", path.display()))?;
        let mut raw = Vec::new();
        let read = file.read_to_end(&mut raw);
        let _ = FileExt::unlock(&file);
        read.with_context(|| format!("failed to read cache metadata {}", path.display()))?;
        serde_json::from_slice(&raw)
            .with_context(|| format!("invalid cache metadata {}", path.display()))
    }

    /// Truncation happens only after the exclusive lock is held so readers
    /// never observe a half-written file.
    pub fn write_metadata(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let path = self.meta_path(key);
        let serialized = serde_json::to_vec_pretty(entry)?;

        let mut options = OpenOptions::new();
        options.create(true).write(true).truncate(false);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(&path)
            .with_context(|| format!("failed to open cache metadata {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("failed to lock cache metadata {}", path.display()))?;
        let written = file
            .set_len(0)
            .and_then(|_| file.write_all(&serialized))
            .and_then(|_| file.flush());
        let _ = FileExt::unlock(&file);
        written.with_context(|| format!("failed to write cache metadata {}", path.display()))
    }

    pub fn open_body(&self, key: &str) -> Result<File> {
        let path = self.body_path(key);
        File::open(&path).with_context(|| format!("failed to open cache body {}", path.display()))
    }

    pub(super) fn begin_body(&self, key: &str) -> Result<NamedTempFile> {
        tempfile::Builder::new()
            .prefix(&format!("{key}."))
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.dir)
            .with_context(|| format!("failed to create temp body in {}", self.dir.display()))
    }

    pub(super) fn commit_body(&self, key: &str, body: NamedTempFile) -> Result<()> {
        let path = self.body_path(key);
        body.persist(&path)
            .map_err(|err| err.error)
            .with_context(|| format!("failed to move cache body into {}", path.display()))?;
        Ok(())
    }

    pub fn remove_entry(&self, key: &str) {
        fs::remove_file(self.meta_path(key)).ok();
        fs::remove_file(self.body_path(key)).ok();
    }

    /// Drops every stored variant of `url`.
    pub fn invalidate_url(&self, url: &str) -> Result<usize> {
        let keys = self.keys_for_url(url)?;
        for key in &keys {
            self.remove_entry(key);
        }
        if !keys.is_empty() {
            debug!(url = %url, removed = keys.len(), "invalidated cached responses");
        }
        Ok(keys.len())
    }

    /// Drops variants of `url` other than `keep` that were stored under a
    /// different Vary header set and would otherwise keep matching lookups.
    pub fn remove_superseded(&self, url: &str, keep: &str, vary: &[String]) -> Result<usize> {
        let mut removed = 0;
        for key in self.keys_for_url(url)? {
            if key == keep {
                continue;
            }
            let superseded = match self.read_metadata(&key) {
                Ok(entry) => entry.vary != vary,
                Err(_) => true,
            };
            if superseded {
                self.remove_entry(&key);
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn keys_for_url(&self, url: &str) -> Result<Vec<String>> {
        let prefix = format!("{}_", url_hash(url));
        let mut keys = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)
            .with_context(|| format!("failed to list cache directory {}", self.dir.display()))?
        {
            let path = dir_entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(META_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str())
                && stem.starts_with(&prefix)
            {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn remove_temp_files(&self) -> Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(TEMP_SUFFIX))
            {
                fs::remove_file(&path).ok();
            }
        }
        Ok(())
    }
}
