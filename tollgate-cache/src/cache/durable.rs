//! Durable tier: entries that survive process restarts
//!
//! The tier serializes entries to JSON and hands opaque bytes to a
//! [`DurableBackend`]. Two backends ship with the crate:
//! - [`FileBackend`]: one file per entry under `<dir>/<namespace>/<hash>.json`
//! - [`MemoryBackend`]: a concurrent map, for tests and single-process setups
//!
//! The Durable tier has no TTL. Entries leave only through invalidation,
//! stale-fingerprint discards, or `clear`.

use crate::cache::{
    entry::CacheEntry,
    invalidation::InvalidationEvent,
    tier::TierStore,
    types::{CacheKey, CacheStats, TierKind},
};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key-value boundary of an external durable store
#[async_trait]
pub trait DurableBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &CacheKey, value: Vec<u8>) -> Result<()>;

    /// Delete `key`; returns whether it existed
    async fn delete(&self, key: &CacheKey) -> Result<bool>;

    async fn keys(&self) -> Result<Vec<CacheKey>>;
}

/// In-memory backend
#[derive(Default)]
pub struct MemoryBackend {
    data: DashMap<CacheKey, Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableBackend for MemoryBackend {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        Ok(self.data.get(key).map(|v| v.value().clone()))
    }

    async fn put(&self, key: &CacheKey, value: Vec<u8>) -> Result<()> {
        self.data.insert(key.clone(), value);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.data.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<CacheKey>> {
        Ok(self.data.iter().map(|e| e.key().clone()).collect())
    }
}

/// Directory-backed store, one JSON file per entry
pub struct FileBackend {
    base_dir: PathBuf,
}

impl FileBackend {
    /// Directories are created lazily on first write.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, key: &CacheKey) -> Result<PathBuf> {
        validate_segment(&key.namespace)?;
        validate_segment(&key.content_hash)?;
        Ok(self
            .base_dir
            .join(&key.namespace)
            .join(format!("{}.json", key.content_hash)))
    }
}

fn validate_segment(segment: &str) -> Result<()> {
    let valid = !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CacheError::Other(format!(
            "invalid durable key segment: {:?}",
            segment
        )))
    }
}

#[async_trait]
impl DurableBackend for FileBackend {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::IoError(format!("{}: {}", path.display(), e))),
        }
    }

    async fn put(&self, key: &CacheKey, value: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write then rename, so readers never observe a half-written file
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<CacheKey>> {
        let mut keys = Vec::new();

        let mut namespaces = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(e.into()),
        };

        while let Some(ns_entry) = namespaces.next_entry().await? {
            if !ns_entry.file_type().await?.is_dir() {
                continue;
            }
            let namespace = ns_entry.file_name().to_string_lossy().to_string();

            let mut files = tokio::fs::read_dir(ns_entry.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let name = file.file_name().to_string_lossy().to_string();
                if let Some(hash) = name.strip_suffix(".json") {
                    keys.push(CacheKey::new(namespace.clone(), hash));
                }
            }
        }

        Ok(keys)
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

/// Durable tier over any [`DurableBackend`]
pub struct DurableTier {
    backend: Arc<dyn DurableBackend>,
    counters: Counters,
}

impl DurableTier {
    pub fn new(backend: Arc<dyn DurableBackend>) -> Self {
        Self {
            backend,
            counters: Counters::default(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn on_disk(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        info!("Durable tier at {}", dir.display());
        Self::new(Arc::new(FileBackend::new(dir)))
    }

    async fn read(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let Some(bytes) = self.backend.get(key).await? else {
            return Ok(None);
        };

        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding unreadable durable entry");
                self.backend.delete(key).await?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl TierStore for DurableTier {
    fn kind(&self) -> TierKind {
        TierKind::Durable
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let found = self.read(key).await?;
        if found.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(found)
    }

    async fn put(&self, mut entry: CacheEntry) -> Result<()> {
        entry.expires_at = None;
        let bytes = serde_json::to_vec(&entry)?;
        self.backend.put(&entry.key, bytes).await?;
        debug!(key = %entry.key, "Stored durable entry");
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool> {
        let removed = self.backend.delete(key).await?;
        if removed {
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    async fn remove_if_stale(&self, entry: &CacheEntry) -> Result<bool> {
        match self.read(&entry.key).await? {
            Some(current) if current.source_fingerprint == entry.source_fingerprint => {
                self.remove(&entry.key).await
            }
            _ => Ok(false),
        }
    }

    async fn invalidate(&self, event: &InvalidationEvent) -> Result<usize> {
        let mut removed = 0;
        for key in self.backend.keys().await? {
            let matched = match self.read(&key).await? {
                Some(entry) => event.matches(&entry),
                None => false,
            };
            if matched && self.backend.delete(&key).await? {
                removed += 1;
            }
        }

        self.counters
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        if removed > 0 {
            info!("Invalidated {} durable entries for {}", removed, event);
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for key in self.backend.keys().await? {
            if self.backend.delete(&key).await? {
                removed += 1;
            }
        }
        self.counters
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        info!("Cleared {} entries from durable tier", removed);
        Ok(removed)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.backend.keys().await?.len())
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::invalidation::InvalidationReason;
    use crate::fingerprint::ContentHasher;
    use std::time::Duration;
    use tempfile::TempDir;

    fn entry(name: &str, scopes: &[&str]) -> CacheEntry {
        CacheEntry::new(
            CacheKey::new("answer", name),
            format!("value-{}", name),
            ContentHasher::fingerprint("ctx", ["base"]),
            TierKind::Generation,
        )
        .with_scopes(scopes.iter().map(|s| s.to_string()))
    }

    #[tokio::test]
    async fn test_memory_round_trip() {
        let tier = DurableTier::in_memory();
        let original = entry("k1", &["tenant:acme"]);
        tier.put(original.clone()).await.unwrap();

        let loaded = tier.get(&original.key).await.unwrap().unwrap();
        assert_eq!(loaded.value, original.value);
        assert_eq!(loaded.source_fingerprint, original.source_fingerprint);
        assert_eq!(loaded.scopes, original.scopes);
        assert_eq!(tier.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_put_strips_expiry() {
        let tier = DurableTier::in_memory();
        let original = entry("k1", &[]).with_ttl(Duration::from_millis(1));
        tier.put(original.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        let loaded = tier.get(&original.key).await.unwrap().unwrap();
        assert!(loaded.expires_at.is_none());
    }

    #[tokio::test]
    async fn test_file_backend_survives_new_instance() {
        let tmp = TempDir::new().unwrap();
        let original = entry("k1", &[]);

        DurableTier::on_disk(tmp.path()).put(original.clone()).await.unwrap();

        let reopened = DurableTier::on_disk(tmp.path());
        let loaded = reopened.get(&original.key).await.unwrap().unwrap();
        assert_eq!(loaded.value, "value-k1");
        assert_eq!(reopened.len().await.unwrap(), 1);
        assert!(tmp.path().join("answer").join("k1.json").exists());
    }

    #[tokio::test]
    async fn test_file_backend_missing_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        let backend = FileBackend::new(tmp.path().join("not-created"));
        assert!(backend.keys().await.unwrap().is_empty());
        assert!(backend.get(&CacheKey::new("answer", "x")).await.unwrap().is_none());
        assert!(!backend.delete(&CacheKey::new("answer", "x")).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_backend_rejects_path_segments() {
        let tmp = TempDir::new().unwrap();
        let backend = FileBackend::new(tmp.path());
        let result = backend.put(&CacheKey::new("../etc", "x"), b"{}".to_vec()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_discarded() {
        let backend = Arc::new(MemoryBackend::new());
        let key = CacheKey::new("answer", "bad");
        backend.put(&key, b"not json".to_vec()).await.unwrap();

        let tier = DurableTier::new(backend.clone());
        assert!(tier.get(&key).await.unwrap().is_none());
        assert!(backend.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_tenant_on_disk() {
        let tmp = TempDir::new().unwrap();
        let tier = DurableTier::on_disk(tmp.path());
        tier.put(entry("a", &["tenant:acme", "user:u1"])).await.unwrap();
        tier.put(entry("b", &["tenant:globex"])).await.unwrap();

        let event = InvalidationEvent::tenant("acme", InvalidationReason::PolicyUpdated);
        assert_eq!(tier.invalidate(&event).await.unwrap(), 1);
        assert_eq!(tier.invalidate(&event).await.unwrap(), 0);
        assert_eq!(tier.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove_if_stale_checks_fingerprint() {
        let tier = DurableTier::in_memory();
        let stale = entry("k1", &[]);
        tier.put(stale.clone()).await.unwrap();

        let mut refreshed = stale.clone();
        refreshed.source_fingerprint = ContentHasher::fingerprint("ctx", ["new"]);
        tier.put(refreshed).await.unwrap();

        assert!(!tier.remove_if_stale(&stale).await.unwrap());
        assert_eq!(tier.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let tier = DurableTier::in_memory();
        tier.put(entry("a", &[])).await.unwrap();
        tier.put(entry("b", &[])).await.unwrap();
        assert_eq!(tier.clear().await.unwrap(), 2);
        assert!(tier.is_empty().await.unwrap());
        assert!(!tier.remove(&CacheKey::new("answer", "a")).await.unwrap());
    }
}
