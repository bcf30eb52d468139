//! Tiered lookup, promotion, write-back and single-flight generation
//!
//! Lookups walk Volatile then Durable and stop at the first entry whose stored
//! fingerprint equals the caller's current one. A Durable hit is copied into
//! Volatile before returning. Writes go to Durable first, then Volatile.
//!
//! Durable failures never fail a request: reads degrade to misses and writes
//! are skipped, each with a warning. Every Durable call is bounded by
//! `CacheConfig::durable_timeout`.

use crate::bus::InvalidationHandler;
use crate::cache::{
    config::CacheConfig,
    durable::DurableTier,
    entry::CacheEntry,
    flight::{self, InFlight, Role},
    invalidation::InvalidationEvent,
    tier::TierStore,
    types::{CacheKey, CacheStats, CacheValue, Lookup, Resolved, TierKind},
    volatile::VolatileTier,
};
use crate::error::{CacheError, Result};
use crate::fingerprint::Fingerprint;
use crate::telemetry::{self, HitCounters, HitMiss};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Point-in-time view of coordinator activity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub volatile: CacheStats,
    pub durable: Option<CacheStats>,
    /// Entries discarded because their fingerprint no longer matched
    pub stale_discards: u64,
    /// Requests that waited on another caller's generation
    pub singleflight_joins: u64,
    /// Durable failures absorbed as misses or skipped writes
    pub tier_errors: u64,
    pub in_flight: usize,
    /// Hits and misses keyed `"<tier>/<namespace>"`
    pub by_namespace: BTreeMap<String, HitMiss>,
}

/// Front door to the storage tiers
pub struct CacheCoordinator {
    config: CacheConfig,
    volatile: Arc<dyn TierStore>,
    durable: Option<Arc<dyn TierStore>>,
    flights: InFlight,
    counters: HitCounters,
    stale_discards: AtomicU64,
    singleflight_joins: AtomicU64,
    tier_errors: AtomicU64,
}

impl CacheCoordinator {
    pub fn new(
        config: CacheConfig,
        volatile: Arc<dyn TierStore>,
        durable: Option<Arc<dyn TierStore>>,
    ) -> Self {
        let counters = HitCounters::new().with_metrics(config.enable_metrics);
        Self {
            config,
            volatile,
            durable,
            flights: InFlight::new(),
            counters,
            stale_discards: AtomicU64::new(0),
            singleflight_joins: AtomicU64::new(0),
            tier_errors: AtomicU64::new(0),
        }
    }

    /// Volatile tier only
    pub fn volatile_only(config: CacheConfig) -> Self {
        let volatile = Arc::new(VolatileTier::new(config.clone()));
        Self::new(config, volatile, None)
    }

    /// Volatile tier over an in-memory Durable tier
    pub fn in_memory(config: CacheConfig) -> Self {
        let volatile = Arc::new(VolatileTier::new(config.clone()));
        Self::new(config, volatile, Some(Arc::new(DurableTier::in_memory())))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Tiered lookup against the caller's current fingerprint
    pub async fn lookup(&self, key: &CacheKey, fingerprint: &Fingerprint) -> Lookup {
        self.lookup_tiers(key, fingerprint, true).await
    }

    async fn lookup_tiers(&self, key: &CacheKey, fingerprint: &Fingerprint, count: bool) -> Lookup {
        let namespace = key.namespace.as_str();

        match self.volatile.get(key).await {
            Ok(Some(entry)) if entry.matches(fingerprint) => {
                if count {
                    self.counters.hit(TierKind::Volatile, namespace);
                }
                debug!(key = %key, tier = "volatile", "Cache hit");
                return Lookup::Hit {
                    value: entry.value,
                    tier: TierKind::Volatile,
                };
            }
            Ok(Some(stale)) => {
                self.discard_stale(self.volatile.as_ref(), &stale).await;
                if count {
                    self.counters.miss(TierKind::Volatile, namespace);
                }
            }
            Ok(None) => {
                if count {
                    self.counters.miss(TierKind::Volatile, namespace);
                }
            }
            Err(e) => {
                self.absorb(TierKind::Volatile, "get", key, &e);
                if count {
                    self.counters.miss(TierKind::Volatile, namespace);
                }
            }
        }

        let Some(durable) = &self.durable else {
            return Lookup::Miss;
        };

        match self.bounded(durable.get(key)).await {
            Ok(Some(entry)) if entry.matches(fingerprint) => {
                if count {
                    self.counters.hit(TierKind::Durable, namespace);
                }
                debug!(key = %key, tier = "durable", "Cache hit, promoting");
                if let Err(e) = self.volatile.put(entry.promoted(TierKind::Durable)).await {
                    self.absorb(TierKind::Volatile, "promote", key, &e);
                }
                Lookup::Hit {
                    value: entry.value,
                    tier: TierKind::Durable,
                }
            }
            Ok(Some(stale)) => {
                self.discard_stale(durable.as_ref(), &stale).await;
                if count {
                    self.counters.miss(TierKind::Durable, namespace);
                }
                Lookup::Miss
            }
            Ok(None) => {
                if count {
                    self.counters.miss(TierKind::Durable, namespace);
                }
                Lookup::Miss
            }
            Err(e) => {
                self.absorb(TierKind::Durable, "get", key, &e);
                if count {
                    self.counters.miss(TierKind::Durable, namespace);
                }
                Lookup::Miss
            }
        }
    }

    /// Write a freshly produced value to Durable, then Volatile
    pub async fn store(
        &self,
        key: &CacheKey,
        value: CacheValue,
        fingerprint: &Fingerprint,
        scopes: &[String],
    ) {
        let entry = CacheEntry::new(
            key.clone(),
            value,
            fingerprint.clone(),
            TierKind::Generation,
        )
        .with_scopes(scopes.iter().cloned());

        if let Some(durable) = &self.durable {
            if let Err(e) = self.bounded(durable.put(entry.clone())).await {
                self.absorb(TierKind::Durable, "put", key, &e);
            }
        }

        if let Err(e) = self.volatile.put(entry).await {
            self.absorb(TierKind::Volatile, "put", key, &e);
        }
        debug!(key = %key, fingerprint = fingerprint.short(), "Stored entry");
    }

    /// Return the cached value, or produce, store and return it
    ///
    /// Concurrent misses on the same key share one call to `produce`; the
    /// rest wait for its outcome. `produce` runs under the configured
    /// generation timeout.
    pub async fn get_or_generate<F, Fut>(
        &self,
        key: &CacheKey,
        fingerprint: &Fingerprint,
        scopes: &[String],
        produce: F,
    ) -> Result<Resolved>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheValue>>,
    {
        self.get_or_generate_within(
            key,
            fingerprint,
            scopes,
            self.config.generation_timeout,
            produce,
        )
        .await
    }

    /// [`get_or_generate`](Self::get_or_generate) with an explicit time budget
    pub async fn get_or_generate_within<F, Fut>(
        &self,
        key: &CacheKey,
        fingerprint: &Fingerprint,
        scopes: &[String],
        timeout: Duration,
        produce: F,
    ) -> Result<Resolved>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheValue>>,
    {
        if let Lookup::Hit { value, tier } = self.lookup(key, fingerprint).await {
            return Ok(Resolved {
                value,
                served_by: tier,
            });
        }

        let mut produce = Some(produce);
        loop {
            match self.flights.join(key) {
                Role::Leader(guard) => {
                    // Another leader may have filled the key between our miss and
                    // registering; check again without counting.
                    if let Lookup::Hit { value, tier } =
                        self.lookup_tiers(key, fingerprint, false).await
                    {
                        guard.complete(Ok(value.clone()));
                        return Ok(Resolved {
                            value,
                            served_by: tier,
                        });
                    }

                    let Some(produce) = produce.take() else {
                        return Err(CacheError::Other(format!(
                            "producer for {} already consumed",
                            key
                        )));
                    };

                    let outcome = match tokio::time::timeout(timeout, produce()).await {
                        Ok(Ok(value)) => {
                            self.store(key, value.clone(), fingerprint, scopes).await;
                            Ok(value)
                        }
                        Ok(Err(e)) => Err(e),
                        Err(_) => {
                            let timeout_ms = timeout.as_millis() as u64;
                            warn!(key = %key, timeout_ms, "Generation timed out");
                            Err(CacheError::GenerationTimeout {
                                timeout_ms,
                                context: key.to_string(),
                            })
                        }
                    };

                    guard.complete(outcome.clone());
                    return outcome.map(|value| Resolved {
                        value,
                        served_by: TierKind::Generation,
                    });
                }
                Role::Follower(rx) => {
                    self.singleflight_joins.fetch_add(1, Ordering::Relaxed);
                    if self.config.enable_metrics {
                        telemetry::record_singleflight_join(&key.namespace);
                    }
                    debug!(key = %key, "Joining in-flight generation");

                    match tokio::time::timeout(timeout, flight::wait(rx)).await {
                        Ok(Some(outcome)) => {
                            return outcome.map(|value| Resolved {
                                value,
                                served_by: TierKind::Generation,
                            });
                        }
                        // Leader went away without an outcome; race for leadership.
                        Ok(None) => continue,
                        Err(_) => {
                            return Err(CacheError::GenerationTimeout {
                                timeout_ms: timeout.as_millis() as u64,
                                context: key.to_string(),
                            });
                        }
                    }
                }
            }
        }
    }

    /// Remove `key` from every tier; absent keys are a no-op
    pub async fn remove(&self, key: &CacheKey) -> bool {
        let mut removed = match self.volatile.remove(key).await {
            Ok(removed) => removed,
            Err(e) => {
                self.absorb(TierKind::Volatile, "remove", key, &e);
                false
            }
        };
        if let Some(durable) = &self.durable {
            match self.bounded(durable.remove(key)).await {
                Ok(r) => removed |= r,
                Err(e) => self.absorb(TierKind::Durable, "remove", key, &e),
            }
        }
        removed
    }

    /// Apply an invalidation event to every tier
    ///
    /// Fails when the Durable tier cannot be reached, so the bus retries.
    pub async fn invalidate(&self, event: &InvalidationEvent) -> Result<usize> {
        let mut removed = self.volatile.invalidate(event).await?;
        if let Some(durable) = &self.durable {
            removed += self
                .bounded(durable.invalidate(event))
                .await
                .map_err(|e| CacheError::InvalidationDeliveryFailure(e.to_string()))?;
        }
        Ok(removed)
    }

    /// Drop every entry in every tier
    pub async fn clear(&self) -> Result<usize> {
        let mut removed = self.volatile.clear().await?;
        if let Some(durable) = &self.durable {
            removed += self.bounded(durable.clear()).await?;
        }
        Ok(removed)
    }

    pub fn hits(&self, tier: TierKind, namespace: &str) -> HitMiss {
        self.counters.get(tier, namespace)
    }

    pub fn stats(&self) -> CoordinatorStats {
        let mut volatile = self.volatile.stats();
        volatile.stale_discards = self.stale_discards.load(Ordering::Relaxed);

        CoordinatorStats {
            volatile,
            durable: self.durable.as_ref().map(|d| d.stats()),
            stale_discards: self.stale_discards.load(Ordering::Relaxed),
            singleflight_joins: self.singleflight_joins.load(Ordering::Relaxed),
            tier_errors: self.tier_errors.load(Ordering::Relaxed),
            in_flight: self.flights.len(),
            by_namespace: self.counters.snapshot(),
        }
    }

    async fn discard_stale(&self, tier: &dyn TierStore, stale: &CacheEntry) {
        self.stale_discards.fetch_add(1, Ordering::Relaxed);
        if self.config.enable_metrics {
            telemetry::record_stale(tier.kind(), &stale.key.namespace);
        }
        debug!(
            key = %stale.key,
            tier = %tier.kind(),
            stored = stale.source_fingerprint.short(),
            "Discarding stale entry"
        );

        let removal = match tier.kind() {
            TierKind::Durable => self.bounded(tier.remove_if_stale(stale)).await,
            _ => tier.remove_if_stale(stale).await,
        };
        if let Err(e) = removal {
            self.absorb(tier.kind(), "discard", &stale.key, &e);
        }
    }

    async fn bounded<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.durable_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::TierUnavailable {
                tier: TierKind::Durable.to_string(),
                reason: format!(
                    "no response within {}ms",
                    self.config.durable_timeout.as_millis()
                ),
            }),
        }
    }

    fn absorb(&self, tier: TierKind, operation: &'static str, key: &CacheKey, error: &CacheError) {
        self.tier_errors.fetch_add(1, Ordering::Relaxed);
        if self.config.enable_metrics {
            telemetry::record_tier_error(tier, operation);
        }
        warn!(tier = %tier, operation, key = %key, error = %error, "Tier operation failed, continuing");
    }
}

#[async_trait]
impl InvalidationHandler for CacheCoordinator {
    fn name(&self) -> &str {
        "cache-coordinator"
    }

    async fn handle(&self, event: &InvalidationEvent) -> Result<usize> {
        self.invalidate(event).await
    }
}
