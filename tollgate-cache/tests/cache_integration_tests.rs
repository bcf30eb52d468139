//! Integration tests for the tiered cache
//!
//! These tests exercise the public API end to end:
//! - Volatile/Durable round trips and promotion across restarts
//! - Durable failures and slow Durable I/O degrading to misses
//! - Stale fingerprints after a layered source changes
//! - Single-flight collapsing of simultaneous misses
//! - Scoped invalidation through the bus

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tollgate_cache::{
    CacheConfig, CacheCoordinator, CacheError, CacheKey, CallContext, ContentHasher,
    ContextLayers, CostLedger, DurableBackend, DurableTier, Generation, GenerationProvider,
    GenerationTier, InvalidationBus, InvalidationEvent, InvalidationReason, Lookup,
    ResourceTier, Result, TierKind, TierStore, VolatileTier,
};

fn config() -> CacheConfig {
    CacheConfig::builder()
        .default_ttl(Duration::from_secs(60))
        .max_entries(100)
        .ttl_jitter(0.0)
        .durable_timeout(Duration::from_millis(100))
        .build()
}

fn coordinator_with(durable: Arc<dyn TierStore>) -> CacheCoordinator {
    let config = config();
    CacheCoordinator::new(
        config.clone(),
        Arc::new(VolatileTier::new(config)),
        Some(durable),
    )
}

/// Backend that fails every call
struct FailingBackend;

#[async_trait]
impl DurableBackend for FailingBackend {
    async fn get(&self, _key: &CacheKey) -> Result<Option<Vec<u8>>> {
        Err(CacheError::IoError("disk unplugged".to_string()))
    }

    async fn put(&self, _key: &CacheKey, _value: Vec<u8>) -> Result<()> {
        Err(CacheError::IoError("disk unplugged".to_string()))
    }

    async fn delete(&self, _key: &CacheKey) -> Result<bool> {
        Err(CacheError::IoError("disk unplugged".to_string()))
    }

    async fn keys(&self) -> Result<Vec<CacheKey>> {
        Err(CacheError::IoError("disk unplugged".to_string()))
    }
}

/// Backend that never answers in time
struct StalledBackend;

#[async_trait]
impl DurableBackend for StalledBackend {
    async fn get(&self, _key: &CacheKey) -> Result<Option<Vec<u8>>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(None)
    }

    async fn put(&self, _key: &CacheKey, _value: Vec<u8>) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }

    async fn delete(&self, _key: &CacheKey) -> Result<bool> {
        Ok(false)
    }

    async fn keys(&self) -> Result<Vec<CacheKey>> {
        Ok(Vec::new())
    }
}

/// Provider that counts calls and takes a while to answer
struct SlowProvider {
    calls: AtomicUsize,
    delay: Duration,
}

#[async_trait]
impl GenerationProvider for SlowProvider {
    fn name(&self) -> &str {
        "slow"
    }

    async fn generate(&self, prompt: &str, _tier: ResourceTier) -> Result<Generation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(Generation {
            text: format!("answer to {}", prompt),
            units_in: 120,
            units_out: 40,
        })
    }
}

#[tokio::test]
async fn test_store_then_lookup_returns_value_unchanged() {
    let cache = CacheCoordinator::in_memory(config());
    let context = ContextLayers::new("base").with_extra("language", "fr");
    let key = ContentHasher::key("answer", ["bonjour"]);
    let value = "Bonjour !\nComment ça va ?".to_string();

    cache
        .store(&key, value.clone(), &context.fingerprint(), &context.scopes())
        .await;

    assert_eq!(
        cache.lookup(&key, &context.fingerprint()).await,
        Lookup::Hit {
            value,
            tier: TierKind::Volatile
        }
    );
}

#[tokio::test]
async fn test_file_backend_survives_restart() {
    let dir = TempDir::new().unwrap();
    let context = ContextLayers::new("base");
    let key = ContentHasher::key("answer", ["persisted"]);

    {
        let cache = coordinator_with(Arc::new(DurableTier::on_disk(dir.path())));
        cache
            .store(&key, "kept".to_string(), &context.fingerprint(), &[])
            .await;
    }

    let cache = coordinator_with(Arc::new(DurableTier::on_disk(dir.path())));
    let first = cache.lookup(&key, &context.fingerprint()).await;
    assert_eq!(
        first,
        Lookup::Hit {
            value: "kept".to_string(),
            tier: TierKind::Durable
        }
    );

    let second = cache.lookup(&key, &context.fingerprint()).await;
    assert!(matches!(
        second,
        Lookup::Hit {
            tier: TierKind::Volatile,
            ..
        }
    ));
    assert_eq!(cache.hits(TierKind::Durable, "answer").hits, 1);
    assert_eq!(cache.hits(TierKind::Volatile, "answer").hits, 1);
}

#[tokio::test]
async fn test_durable_failure_degrades_to_miss() {
    let cache = coordinator_with(Arc::new(DurableTier::new(Arc::new(FailingBackend))));
    let context = ContextLayers::new("base");
    let key = ContentHasher::key("answer", ["q"]);

    assert_eq!(cache.lookup(&key, &context.fingerprint()).await, Lookup::Miss);

    // The write to Durable is skipped; Volatile still serves the value.
    let resolved = cache
        .get_or_generate(&key, &context.fingerprint(), &[], || async {
            Ok("fresh".to_string())
        })
        .await
        .unwrap();
    assert_eq!(resolved.served_by, TierKind::Generation);
    assert!(cache.lookup(&key, &context.fingerprint()).await.is_hit());
    assert!(cache.stats().tier_errors >= 2);
}

#[tokio::test]
async fn test_durable_timeout_degrades_to_miss() {
    let cache = coordinator_with(Arc::new(DurableTier::new(Arc::new(StalledBackend))));
    let context = ContextLayers::new("base");
    let key = ContentHasher::key("answer", ["q"]);

    let started = std::time::Instant::now();
    let resolved = cache
        .get_or_generate(&key, &context.fingerprint(), &[], || async {
            Ok("fresh".to_string())
        })
        .await
        .unwrap();

    assert_eq!(resolved.value, "fresh");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_changed_source_misses() {
    let cache = CacheCoordinator::in_memory(config());
    let key = ContentHasher::key("answer", ["q"]);
    let before = ContextLayers::new("base").with_user("u1", "be terse");
    let after = ContextLayers::new("base").with_user("u1", "be verbose");

    cache
        .store(&key, "short".to_string(), &before.fingerprint(), &before.scopes())
        .await;

    assert_ne!(before.fingerprint(), after.fingerprint());
    assert_eq!(cache.lookup(&key, &after.fingerprint()).await, Lookup::Miss);
    assert!(cache.stats().stale_discards >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_misses_generate_once() {
    let cache = Arc::new(CacheCoordinator::in_memory(config()));
    let ledger = Arc::new(CostLedger::default());
    let provider = Arc::new(SlowProvider {
        calls: AtomicUsize::new(0),
        delay: Duration::from_millis(100),
    });
    let generation = Arc::new(GenerationTier::new(provider.clone(), ledger.clone()));
    let context = ContextLayers::new("base");
    let key = ContentHasher::key("answer", ["popular question"]);

    let requests = (0..16).map(|i| {
        let cache = cache.clone();
        let generation = generation.clone();
        let fingerprint = context.fingerprint();
        let key = key.clone();
        tokio::spawn(async move {
            cache
                .get_or_generate(&key, &fingerprint, &[], || async move {
                    let call = CallContext::new(format!("req-{}", i));
                    generation
                        .generate("popular question", ResourceTier::Standard, &call)
                        .await
                        .map(|g| g.text)
                })
                .await
        })
    });

    let results: Vec<String> = join_all(requests)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap().value)
        .collect();

    assert_eq!(results.len(), 16);
    assert!(results.iter().all(|r| r == "answer to popular question"));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert_eq!(ledger.len(), 1);
    assert_eq!(cache.stats().in_flight, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_leader_hands_over() {
    let cache = Arc::new(CacheCoordinator::volatile_only(config()));
    let context = ContextLayers::new("base");
    let key = ContentHasher::key("answer", ["q"]);

    let leader = {
        let cache = cache.clone();
        let key = key.clone();
        let fingerprint = context.fingerprint();
        tokio::spawn(async move {
            cache
                .get_or_generate(&key, &fingerprint, &[], || async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok("never".to_string())
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let follower = {
        let cache = cache.clone();
        let key = key.clone();
        let fingerprint = context.fingerprint();
        tokio::spawn(async move {
            cache
                .get_or_generate(&key, &fingerprint, &[], || async {
                    Ok("second".to_string())
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    leader.abort();
    let resolved = follower.await.unwrap().unwrap();
    assert_eq!(resolved.value, "second");
    assert_eq!(cache.stats().in_flight, 0);
}

#[tokio::test]
async fn test_tenant_invalidation_through_bus() {
    let cache = Arc::new(CacheCoordinator::in_memory(config()));
    let bus = InvalidationBus::default();
    bus.subscribe(cache.clone()).await;

    let acme = ContextLayers::new("base").with_tenant("acme", "acme policy");
    let globex = ContextLayers::new("base").with_tenant("globex", "globex policy");
    let acme_key = ContentHasher::key("answer", ["acme", "q"]);
    let globex_key = ContentHasher::key("answer", ["globex", "q"]);

    cache
        .store(&acme_key, "a".to_string(), &acme.fingerprint(), &acme.scopes())
        .await;
    cache
        .store(&globex_key, "g".to_string(), &globex.fingerprint(), &globex.scopes())
        .await;

    let event = InvalidationEvent::tenant("acme", InvalidationReason::PolicyUpdated);
    let report = bus.publish(event.clone()).await;
    assert!(report.is_complete());
    assert_eq!(report.removed, 2);

    // Duplicate delivery is harmless.
    assert_eq!(bus.publish(event).await.removed, 0);

    assert_eq!(cache.lookup(&acme_key, &acme.fingerprint()).await, Lookup::Miss);
    assert!(cache.lookup(&globex_key, &globex.fingerprint()).await.is_hit());

    let report = bus
        .publish(InvalidationEvent::global(InvalidationReason::PolicyUpdated))
        .await;
    assert_eq!(report.removed, 2);
    assert_eq!(cache.lookup(&globex_key, &globex.fingerprint()).await, Lookup::Miss);
}

#[tokio::test]
async fn test_unreachable_durable_reports_delivery_failure() {
    let cache = Arc::new(coordinator_with(Arc::new(DurableTier::new(Arc::new(
        FailingBackend,
    )))));
    let bus = InvalidationBus::new(tollgate_cache::BusConfig {
        max_attempts: 2,
        retry_backoff: Duration::from_millis(1),
        history_size: 8,
    });
    bus.subscribe(cache).await;

    let report = bus
        .publish(InvalidationEvent::user("u1", InvalidationReason::Manual))
        .await;
    assert_eq!(report.delivered, 0);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(bus.recent().await.len(), 1);
}

#[tokio::test]
async fn test_volatile_capacity_is_bounded() {
    let config = CacheConfig::builder().max_entries(3).ttl_jitter(0.0).build();
    let cache = CacheCoordinator::volatile_only(config);
    let context = ContextLayers::new("base");

    for i in 0..10 {
        let key = ContentHasher::key("answer", [format!("q{}", i)]);
        cache
            .store(&key, format!("a{}", i), &context.fingerprint(), &[])
            .await;
    }

    let stats = cache.stats();
    assert_eq!(stats.volatile.entries, 3);
    assert_eq!(stats.volatile.evictions_capacity, 7);
}
