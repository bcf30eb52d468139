//! In-process Volatile tier with TTL expiry and LRU eviction
//!
//! Entries live in a sharded `DashMap`, so operations on different keys never
//! contend on one lock. Recency is a logical clock stamped on every access;
//! capacity eviction removes the entries with the oldest stamps, trimming a
//! full tier down to a low watermark in one pass so the scan is paid once
//! per batch of inserts rather than on each one.

use crate::cache::{
    config::CacheConfig,
    entry::CacheEntry,
    invalidation::InvalidationEvent,
    tier::TierStore,
    types::{CacheKey, CacheStats, TierKind},
};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A capacity pass frees `max_entries / EVICTION_BATCH_DIVISOR` extra slots
const EVICTION_BATCH_DIVISOR: usize = 10;

struct Slot {
    entry: CacheEntry,
    /// Logical access time for LRU ordering
    tick: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions_capacity: AtomicU64,
    evictions_ttl: AtomicU64,
    invalidations: AtomicU64,
}

/// Volatile tier: memory only, never fails
pub struct VolatileTier {
    config: CacheConfig,
    entries: DashMap<CacheKey, Slot>,
    clock: AtomicU64,
    counters: Counters,
}

impl VolatileTier {
    pub fn new(config: CacheConfig) -> Self {
        info!(
            max_entries = config.max_entries,
            ttl_secs = config.default_ttl.as_secs_f64(),
            "Initializing volatile tier"
        );

        Self {
            config,
            entries: DashMap::new(),
            clock: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Look up a live entry, refreshing its recency
    pub fn get_entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        let tick = self.tick();
        let mut expired = false;

        if let Some(mut slot) = self.entries.get_mut(key) {
            if slot.entry.is_expired() {
                expired = true;
            } else {
                slot.tick = tick;
                slot.entry.mark_accessed();
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Some(slot.entry.clone());
            }
        }

        // The shard guard is released before removal.
        if expired
            && self
                .entries
                .remove_if(key, |_, slot| slot.entry.is_expired())
                .is_some()
        {
            debug!(key = %key, "Volatile entry expired");
            self.counters.evictions_ttl.fetch_add(1, Ordering::Relaxed);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert or replace an entry, stamping a fresh TTL
    pub fn insert(&self, entry: CacheEntry) {
        let ttl = self.config.ttl_with_jitter();
        let entry = entry.with_ttl(ttl);
        let key = entry.key.clone();
        let tick = self.tick();

        if self.entries.insert(key.clone(), Slot { entry, tick }).is_some() {
            debug!(key = %key, "Replaced volatile entry");
        } else {
            debug!(key = %key, "Inserted volatile entry");
        }

        self.evict_if_needed();
    }

    pub fn remove_key(&self, key: &CacheKey) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Remove all expired entries
    pub fn cleanup_expired(&self) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, slot| {
            let expired = slot.entry.is_expired();
            if expired {
                removed += 1;
            }
            !expired
        });

        if removed > 0 {
            self.counters
                .evictions_ttl
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!("Cleaned up {} expired entries", removed);
        }
        removed
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Entries kept after a capacity pass: `max_entries` less a tenth
    fn low_watermark(&self) -> usize {
        let max = self.config.max_entries;
        max - max / EVICTION_BATCH_DIVISOR
    }

    /// Evict least recently used entries once over `max_entries`
    fn evict_if_needed(&self) {
        if self.entries.len() <= self.config.max_entries {
            return;
        }

        let mut candidates: Vec<(u64, CacheKey)> = self
            .entries
            .iter()
            .map(|slot| (slot.tick, slot.key().clone()))
            .collect();
        let excess = candidates.len().saturating_sub(self.low_watermark());
        if excess == 0 {
            return;
        }
        candidates.select_nth_unstable_by_key(excess, |(tick, _)| *tick);
        candidates.truncate(excess);

        let mut evicted = 0u64;
        for (tick, key) in candidates {
            // Skip entries touched after the scan.
            if self
                .entries
                .remove_if(&key, |_, slot| slot.tick == tick)
                .is_some()
            {
                evicted += 1;
            }
        }

        if evicted > 0 {
            debug!(evicted, remaining = self.entries.len(), "Evicted entries due to max_entries limit");
            self.counters
                .evictions_capacity
                .fetch_add(evicted, Ordering::Relaxed);
        }
    }

    /// Spawn the periodic sweep of expired entries
    pub fn spawn_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let tier = Arc::clone(self);
        let interval = tier.config.cleanup_interval;
        info!("Starting volatile cleanup task (interval: {:?})", interval);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = tier.cleanup_expired();
                if removed > 0 {
                    debug!("Auto cleanup removed {} entries", removed);
                }
            }
        })
    }
}

#[async_trait]
impl TierStore for VolatileTier {
    fn kind(&self) -> TierKind {
        TierKind::Volatile
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        Ok(self.get_entry(key))
    }

    async fn put(&self, entry: CacheEntry) -> Result<()> {
        self.insert(entry);
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.remove_key(key))
    }

    async fn remove_if_stale(&self, entry: &CacheEntry) -> Result<bool> {
        let removed = self
            .entries
            .remove_if(&entry.key, |_, slot| {
                slot.entry.source_fingerprint == entry.source_fingerprint
            })
            .is_some();
        if removed {
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    async fn invalidate(&self, event: &InvalidationEvent) -> Result<usize> {
        let mut removed = 0;
        self.entries.retain(|_, slot| {
            let matched = event.matches(&slot.entry);
            if matched {
                removed += 1;
            }
            !matched
        });

        self.counters
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        if removed > 0 {
            info!("Invalidated {} volatile entries for {}", removed, event);
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<usize> {
        let count = self.entries.len();
        self.entries.clear();
        self.counters
            .invalidations
            .fetch_add(count as u64, Ordering::Relaxed);
        info!("Cleared {} entries from volatile tier", count);
        Ok(count)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.len())
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
            evictions_capacity: self.counters.evictions_capacity.load(Ordering::Relaxed),
            evictions_ttl: self.counters.evictions_ttl.load(Ordering::Relaxed),
            stale_discards: 0,
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
        }
    }
}
