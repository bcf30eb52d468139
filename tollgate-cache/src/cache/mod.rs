//! # Tiered Result Cache
//!
//! Values flow through three tiers ordered by cost:
//! - **Volatile**: in-process, TTL with jitter, LRU capacity eviction
//! - **Durable**: survives restarts, no TTL, pluggable backend
//! - **Generation**: the upstream call that produces a value (see
//!   [`crate::generation`]); it stores nothing
//!
//! Every entry carries the fingerprint of the layered sources it was derived
//! from. A lookup only returns an entry whose fingerprint equals the caller's
//! current one; anything else is discarded as stale.
//!
//! ## Example
//!
//! ```rust
//! use tollgate_cache::cache::{CacheConfig, CacheCoordinator};
//! use tollgate_cache::fingerprint::{ContentHasher, ContextLayers};
//! use std::time::Duration;
//!
//! # async fn example() -> tollgate_cache::Result<()> {
//! let config = CacheConfig::builder()
//!     .default_ttl(Duration::from_secs(3600))
//!     .max_entries(10_000)
//!     .build();
//! let cache = CacheCoordinator::in_memory(config);
//!
//! let context = ContextLayers::new("Answer briefly.").with_tenant("acme", "Use metric units.");
//! let key = ContentHasher::key("answer", ["How far is the moon?"]);
//!
//! let resolved = cache
//!     .get_or_generate(&key, &context.fingerprint(), &context.scopes(), || async {
//!         Ok("About 384,400 km.".to_string())
//!     })
//!     .await?;
//! println!("{} (from {})", resolved.value, resolved.served_by);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod durable;
pub mod entry;
mod flight;
pub mod invalidation;
pub mod tier;
pub mod types;
pub mod volatile;

pub use config::{CacheConfig, CacheConfigBuilder};
pub use coordinator::{CacheCoordinator, CoordinatorStats};
pub use durable::{DurableBackend, DurableTier, FileBackend, MemoryBackend};
pub use entry::CacheEntry;
pub use invalidation::{InvalidationEvent, InvalidationReason, InvalidationScope};
pub use tier::TierStore;
pub use types::{CacheKey, CacheStats, CacheValue, Lookup, Resolved, TierKind};
pub use volatile::VolatileTier;
