//! Cache entry with fingerprint, TTL and scope tags

use crate::cache::types::{CacheKey, CacheValue, TierKind};
use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One cached result at a specific tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cache key
    pub key: CacheKey,

    /// The cached value
    pub value: CacheValue,

    /// Fingerprint of the layered sources the value was derived from
    pub source_fingerprint: Fingerprint,

    /// When the value was first produced
    pub created_at: DateTime<Utc>,

    /// Last access time (for LRU tracking)
    pub last_used_at: DateTime<Utc>,

    /// Tier the value was written from (Generation for fresh values,
    /// Durable for promoted ones)
    pub tier_origin: TierKind,

    /// Expiry; `None` means the entry never expires (Durable tier)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Number of times this entry has been served
    #[serde(default)]
    pub access_count: u64,

    /// Scope tags (`tenant:<id>`, `user:<id>`) for selective invalidation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

impl CacheEntry {
    /// Create a non-expiring entry
    pub fn new(
        key: CacheKey,
        value: CacheValue,
        source_fingerprint: Fingerprint,
        tier_origin: TierKind,
    ) -> Self {
        let now = Utc::now();
        Self {
            key,
            value,
            source_fingerprint,
            created_at: now,
            last_used_at: now,
            tier_origin,
            expires_at: None,
            access_count: 0,
            scopes: Vec::new(),
        }
    }

    /// Set the expiry `ttl` from now
    ///
    /// A TTL past the representable date range leaves the entry without an
    /// expiry; LRU eviction still bounds it.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl));
        self
    }

    /// Attach scope tags, skipping duplicates
    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = String>) -> Self {
        for scope in scopes {
            self.add_scope(scope);
        }
        self
    }

    /// Copy of this entry for a faster tier; the receiving tier sets its TTL
    pub fn promoted(&self, from: TierKind) -> Self {
        let mut entry = self.clone();
        entry.tier_origin = from;
        entry.last_used_at = Utc::now();
        entry
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() > expires_at,
            None => false,
        }
    }

    /// Whether the stored fingerprint equals the caller's current one
    pub fn matches(&self, fingerprint: &Fingerprint) -> bool {
        &self.source_fingerprint == fingerprint
    }

    /// Get time until expiration
    pub fn time_until_expiration(&self) -> Option<Duration> {
        let expires_at = self.expires_at?;
        let now = Utc::now();
        if now > expires_at {
            None
        } else {
            (expires_at - now).to_std().ok()
        }
    }

    /// Mark the entry as accessed (updates access time and count)
    pub fn mark_accessed(&mut self) {
        self.last_used_at = Utc::now();
        self.access_count += 1;
    }

    /// Get the age of the entry
    pub fn age(&self) -> Duration {
        (Utc::now() - self.created_at)
            .to_std()
            .unwrap_or(Duration::from_secs(0))
    }

    pub fn add_scope(&mut self, scope: String) {
        if !self.scopes.contains(&scope) {
            self.scopes.push(scope);
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}
