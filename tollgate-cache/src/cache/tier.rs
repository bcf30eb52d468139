//! Uniform contract implemented by every storage tier

use crate::cache::entry::CacheEntry;
use crate::cache::invalidation::InvalidationEvent;
use crate::cache::types::{CacheKey, CacheStats, TierKind};
use crate::error::Result;
use async_trait::async_trait;

/// A storage tier in the cache hierarchy
///
/// At most one live entry exists per key per tier; `put` replaces.
/// Removal of an absent key is a no-op returning `false`.
#[async_trait]
pub trait TierStore: Send + Sync {
    fn kind(&self) -> TierKind;

    /// Fetch the entry for `key`, if any.
    ///
    /// Expired entries are never returned. Fingerprint checks are the
    /// coordinator's job; a tier returns whatever it holds.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    async fn put(&self, entry: CacheEntry) -> Result<()>;

    async fn remove(&self, key: &CacheKey) -> Result<bool>;

    /// Remove `key` only while it still carries `entry`'s fingerprint, so a
    /// concurrent refill is never thrown away by a stale-entry discard.
    async fn remove_if_stale(&self, entry: &CacheEntry) -> Result<bool>;

    /// Remove every entry matched by `event`; returns the number removed
    async fn invalidate(&self, event: &InvalidationEvent) -> Result<usize>;

    async fn clear(&self) -> Result<usize>;

    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Tier-local counters
    fn stats(&self) -> CacheStats;
}
