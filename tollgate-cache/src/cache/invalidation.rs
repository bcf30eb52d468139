//! Invalidation events and scope matching
//!
//! Entries carry scope tags naming the layered sources their fingerprint covered.
//! An event removes every entry whose tags intersect its scope:
//! - Global: everything (base policy changed)
//! - Tenant: entries tagged `tenant:<id>`
//! - User: entries tagged `user:<id>`

use crate::cache::entry::CacheEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Which layered source changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationScope {
    Global,
    Tenant,
    User,
}

impl fmt::Display for InvalidationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationScope::Global => write!(f, "global"),
            InvalidationScope::Tenant => write!(f, "tenant"),
            InvalidationScope::User => write!(f, "user"),
        }
    }
}

impl std::str::FromStr for InvalidationScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "global" => Ok(InvalidationScope::Global),
            "tenant" => Ok(InvalidationScope::Tenant),
            "user" => Ok(InvalidationScope::User),
            other => Err(format!("unknown invalidation scope: {}", other)),
        }
    }
}

/// Reason for cache invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvalidationReason {
    /// A policy layer's text changed
    PolicyUpdated,

    /// Administrative invalidation
    Manual,

    /// Stored fingerprint no longer matches the current sources
    FingerprintMismatch,

    /// Entry expired based on TTL
    Expired,

    /// Evicted by the LRU capacity limit
    Capacity,
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationReason::PolicyUpdated => write!(f, "policy updated"),
            InvalidationReason::Manual => write!(f, "manual invalidation"),
            InvalidationReason::FingerprintMismatch => write!(f, "fingerprint mismatch"),
            InvalidationReason::Expired => write!(f, "TTL expired"),
            InvalidationReason::Capacity => write!(f, "LRU eviction"),
        }
    }
}

/// Event for out-of-band cache invalidation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Unique event id, used to spot duplicate deliveries in logs
    pub id: Uuid,

    pub scope: InvalidationScope,

    /// Tenant or user id; empty for global events
    pub target_id: String,

    pub reason: InvalidationReason,

    pub timestamp: DateTime<Utc>,
}

impl InvalidationEvent {
    pub fn new(
        scope: InvalidationScope,
        target_id: impl Into<String>,
        reason: InvalidationReason,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope,
            target_id: target_id.into(),
            reason,
            timestamp: Utc::now(),
        }
    }

    pub fn global(reason: InvalidationReason) -> Self {
        Self::new(InvalidationScope::Global, "", reason)
    }

    pub fn tenant(tenant_id: impl Into<String>, reason: InvalidationReason) -> Self {
        Self::new(InvalidationScope::Tenant, tenant_id, reason)
    }

    pub fn user(user_id: impl Into<String>, reason: InvalidationReason) -> Self {
        Self::new(InvalidationScope::User, user_id, reason)
    }

    /// The scope tag this event targets; `None` for global events
    pub fn scope_tag(&self) -> Option<String> {
        match self.scope {
            InvalidationScope::Global => None,
            InvalidationScope::Tenant => Some(format!("tenant:{}", self.target_id)),
            InvalidationScope::User => Some(format!("user:{}", self.target_id)),
        }
    }

    /// Whether `entry` falls under this event
    pub fn matches(&self, entry: &CacheEntry) -> bool {
        match self.scope_tag() {
            None => true,
            Some(tag) => entry.has_scope(&tag),
        }
    }
}

impl fmt::Display for InvalidationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            InvalidationScope::Global => write!(f, "global ({})", self.reason),
            _ => write!(f, "{}:{} ({})", self.scope, self.target_id, self.reason),
        }
    }
}
