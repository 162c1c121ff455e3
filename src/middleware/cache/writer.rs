use std::io::Write;

use anyhow::Result;
use blake3::Hasher;
use tempfile::NamedTempFile;
use tracing::trace;

use super::{CacheEntry, CacheStore};

/// Streams one response body into a temp file next to the cache. Nothing is
/// visible to lookups until `commit` renames the body and writes metadata.
/// Dropping an uncommitted writer removes the temp file.
pub struct CacheWriter {
    key: String,
    entry: CacheEntry,
    file: Option<NamedTempFile>,
    hasher: Hasher,
    current_size: u64,
    max_entry_size: u64,
}

impl CacheWriter {
    pub fn new(
        store: &CacheStore,
        key: String,
        entry: CacheEntry,
        max_entry_size: u64,
    ) -> Result<Self> {
        let file = store.begin_body(&key)?;
        Ok(Self {
            key,
            entry,
            file: Some(file),
            hasher: Hasher::new(),
            current_size: 0,
            max_entry_size,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn entry(&self) -> &CacheEntry {
        &self.entry
    }

    pub fn is_discarded(&self) -> bool {
        self.file.is_none()
    }

    pub fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        if self.current_size + chunk.len() as u64 > self.max_entry_size {
            trace!(
                key = %self.key,
                limit = self.max_entry_size,
                "response exceeds cache entry limit; discarding"
            );
            self.file = None;
            return Ok(());
        }
        if let Err(err) = file.write_all(chunk) {
            self.file = None;
            return Err(err.into());
        }
        self.hasher.update(chunk);
        self.current_size += chunk.len() as u64;
        Ok(())
    }

    /// Returns false when the body was discarded and nothing was stored. A
    /// failed metadata write removes the already renamed body again.
    pub fn commit(mut self, store: &CacheStore) -> Result<bool> {
        let Some(mut file) = self.file.take() else {
            return Ok(false);
        };
        file.flush()?;
        self.entry.content_length = self.current_size;
        self.entry.content_hash = self.hasher.finalize().to_hex().to_string();

        store.commit_body(&self.key, file)?;
        if let Err(err) = store.write_metadata(&self.key, &self.entry) {
            store.remove_entry(&self.key);
            return Err(err);
        }
        trace!(
            key = %self.key,
            size = self.current_size,
            status = self.entry.status,
            "stored cache entry"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::SystemTime;

    use super::*;
    use http::{HeaderMap, StatusCode};
    use tempfile::TempDir;

    const URL: &str = "http://example.test/";

    fn entry() -> CacheEntry {
        CacheEntry::from_response(
            URL,
            StatusCode::OK,
            &HeaderMap::new(),
            Vec::new(),
            None,
            SystemTime::now(),
        )
    }

    fn temp_files(dir: &std::path::Path) -> Result<usize> {
        Ok(fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count())
    }

    #[test]
    fn commit_publishes_body_and_metadata() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CacheStore::open(dir.path())?;
        let mut writer = CacheWriter::new(&store, "k_v".into(), entry(), 1024)?;
        writer.write(b"hello ")?;
        writer.write(b"world")?;
        assert_eq!(temp_files(dir.path())?, 1);
        assert!(writer.commit(&store)?);

        assert_eq!(fs::read(store.body_path("k_v"))?, b"hello world");
        let stored = store.read_metadata("k_v")?;
        assert_eq!(stored.content_length, 11);
        assert_eq!(
            stored.content_hash,
            blake3::hash(b"hello world").to_hex().to_string()
        );
        assert_eq!(temp_files(dir.path())?, 0);
        Ok(())
    }

    #[test]
    fn oversized_body_is_discarded() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CacheStore::open(dir.path())?;
        let mut writer = CacheWriter::new(&store, "k_v".into(), entry(), 8)?;
        writer.write(b"12345")?;
        writer.write(b"6789")?;
        assert!(writer.is_discarded());
        assert_eq!(temp_files(dir.path())?, 0);
        assert!(!writer.commit(&store)?);
        assert!(!store.meta_path("k_v").exists());
        Ok(())
    }

    #[test]
    fn dropped_writer_leaves_nothing_behind() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CacheStore::open(dir.path())?;
        let mut writer = CacheWriter::new(&store, "k_v".into(), entry(), 1024)?;
        writer.write(b"partial")?;
        drop(writer);
        assert_eq!(fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }
}
