//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cache value type - node outputs and final answers are text
pub type CacheValue = String;

/// Cache key: `(namespace, content_hash)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    /// Logical cache namespace (`classify`, `retrieve`, `answer`, ...)
    pub namespace: String,

    /// Hex digest of the inputs that define the value
    pub content_hash: String,
}

impl CacheKey {
    pub fn new(namespace: impl Into<String>, content_hash: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            content_hash: content_hash.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.content_hash)
    }
}

/// Tiers of the cache hierarchy, ordered by increasing latency and cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    /// In-process memory, TTL + LRU
    Volatile,

    /// Survives restarts, no TTL
    Durable,

    /// Upstream text generation (compute, not storage)
    Generation,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Volatile => "volatile",
            TierKind::Durable => "durable",
            TierKind::Generation => "generation",
        }
    }

    pub fn all() -> [TierKind; 3] {
        [TierKind::Volatile, TierKind::Durable, TierKind::Generation]
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics and metrics for cache performance monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total number of cache hits
    pub hits: u64,

    /// Total number of cache misses
    pub misses: u64,

    /// Number of entries currently in the tier
    pub entries: usize,

    /// Number of evictions due to the entry limit
    pub evictions_capacity: u64,

    /// Number of evictions due to TTL expiration
    pub evictions_ttl: u64,

    /// Entries discarded because their fingerprint no longer matched
    pub stale_discards: u64,

    /// Entries removed by invalidation events or manual removal
    pub invalidations: u64,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    /// Calculate total evictions
    pub fn total_evictions(&self) -> u64 {
        self.evictions_capacity + self.evictions_ttl
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, entries: {}, evictions: {}, stale: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.entries,
            self.total_evictions(),
            self.stale_discards
        )
    }
}

/// Where a resolved value came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolved {
    pub value: CacheValue,
    pub served_by: TierKind,
}

/// Outcome of a tiered lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Hit { value: CacheValue, tier: TierKind },
    Miss,
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit { .. })
    }

    pub fn into_value(self) -> Option<CacheValue> {
        match self {
            Lookup::Hit { value, .. } => Some(value),
            Lookup::Miss => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };

        assert_eq!(stats.hit_rate(), 80.0);
        assert_eq!(stats.miss_rate(), 20.0);
    }

    #[test]
    fn test_cache_stats_zero_requests() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
        assert_eq!(stats.miss_rate(), 100.0);
    }

    #[test]
    fn test_cache_stats_display() {
        let stats = CacheStats {
            hits: 100,
            misses: 50,
            entries: 75,
            evictions_capacity: 10,
            evictions_ttl: 5,
            stale_discards: 2,
            invalidations: 3,
        };

        let display = format!("{}", stats);
        assert!(display.contains("hits: 100"));
        assert!(display.contains("evictions: 15"));
    }

    #[test]
    fn test_tier_kind_display_and_order() {
        assert_eq!(TierKind::Volatile.to_string(), "volatile");
        assert_eq!(TierKind::Durable.to_string(), "durable");
        assert_eq!(TierKind::Generation.to_string(), "generation");
        assert!(TierKind::Volatile < TierKind::Durable);
        assert!(TierKind::Durable < TierKind::Generation);
    }

    #[test]
    fn test_cache_key_display() {
        let key = CacheKey::new("answer", "abc123");
        assert_eq!(key.to_string(), "answer:abc123");
    }

    #[test]
    fn test_tier_kind_serde() {
        let json = serde_json::to_string(&TierKind::Volatile).unwrap();
        assert_eq!(json, "\"volatile\"");
    }
}
