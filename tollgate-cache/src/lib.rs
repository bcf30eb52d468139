//! # Tollgate Cache (tollgate-cache)
//!
//! Cost-control primitives for request-serving agents:
//!
//! - [`fingerprint`]: deterministic SHA-256 keys and layered context fingerprints
//! - [`cache`]: Volatile and Durable tiers behind a [`CacheCoordinator`] with
//!   promotion, stale-entry discard and single-flight generation
//! - [`generation`]: the Generation tier, a provider trait plus cost accounting
//! - [`ledger`]: idempotent, append-only cost records and aggregates
//! - [`bus`]: invalidation events fanned out to every coordinator
//! - [`telemetry`]: counters and histograms through the `metrics` facade
//!
//! ## Tiered lookup
//!
//! ```no_run
//! use std::sync::Arc;
//! use tollgate_cache::{
//!     CacheConfig, CacheCoordinator, ContentHasher, ContextLayers, InvalidationBus,
//!     InvalidationEvent, InvalidationReason,
//! };
//!
//! #[tokio::main]
//! async fn main() -> tollgate_cache::Result<()> {
//!     let cache = Arc::new(CacheCoordinator::in_memory(CacheConfig::default()));
//!     let bus = InvalidationBus::default();
//!     bus.subscribe(cache.clone()).await;
//!
//!     let context = ContextLayers::new("base policy").with_tenant("acme", "tenant policy");
//!     let key = ContentHasher::key("answer", ["What changed?"]);
//!     cache
//!         .store(&key, "Nothing.".to_string(), &context.fingerprint(), &context.scopes())
//!         .await;
//!
//!     // The tenant's policy changed: drop everything derived from it.
//!     bus.publish(InvalidationEvent::tenant("acme", InvalidationReason::PolicyUpdated))
//!         .await;
//!     assert!(!cache.lookup(&key, &context.fingerprint()).await.is_hit());
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod cache;
pub mod error;
pub mod fingerprint;
pub mod generation;
pub mod ledger;
pub mod telemetry;

// Re-export main types for convenience
pub use bus::{BusConfig, DeliveryReport, InvalidationBus, InvalidationHandler, SubscriptionId};
pub use cache::{
    CacheConfig, CacheConfigBuilder, CacheCoordinator, CacheEntry, CacheKey, CacheStats,
    CacheValue, CoordinatorStats, DurableBackend, DurableTier, FileBackend, InvalidationEvent,
    InvalidationReason, InvalidationScope, Lookup, MemoryBackend, Resolved, TierKind, TierStore,
    VolatileTier,
};
pub use error::{CacheError, Result};
pub use fingerprint::{ContentHasher, ContextLayers, Fingerprint, PolicyLayer, CONTEXT_LAYOUT_VERSION};
pub use generation::{CallContext, Generation, GenerationProvider, GenerationTier};
pub use ledger::{
    CostLedger, CostRecord, CostSummary, Invocation, Price, PriceTable, ResourceTier,
};
pub use telemetry::{HitCounters, HitMiss};
