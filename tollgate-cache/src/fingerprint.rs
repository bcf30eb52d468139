//! Deterministic content fingerprints
//!
//! Every cached value is addressed by `(namespace, content_hash)` and carries the
//! fingerprint of the layered sources it was derived from. Both are SHA-256 digests
//! over length-prefixed parts, so part boundaries can never alias
//! (`["ab", "c"]` and `["a", "bc"]` hash differently) and results are stable across
//! process restarts.

use crate::cache::types::CacheKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Layout tag hashed first into every system-context fingerprint.
///
/// Bump it whenever the order or the set of layered sources changes; doing so
/// invalidates every existing fingerprint of that kind.
pub const CONTEXT_LAYOUT_VERSION: &str = "system-context/v1";

/// Hex-encoded SHA-256 digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}

/// Stateless SHA-256 hasher over ordered parts
pub struct ContentHasher;

impl ContentHasher {
    /// Fingerprint an ordered list of parts within a namespace
    pub fn fingerprint<I, S>(namespace: &str, parts: I) -> Fingerprint
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut hasher = Sha256::new();
        write_part(&mut hasher, namespace);
        for part in parts {
            write_part(&mut hasher, part.as_ref());
        }
        Fingerprint(hex::encode(hasher.finalize()))
    }

    /// Build a cache key whose content hash covers `parts`
    pub fn key<I, S>(namespace: &str, parts: I) -> CacheKey
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        CacheKey::new(namespace, Self::fingerprint(namespace, parts).into_string())
    }
}

fn write_part(hasher: &mut Sha256, part: &str) {
    hasher.update((part.len() as u64).to_be_bytes());
    hasher.update(part.as_bytes());
}

/// A policy layer owned by a tenant or a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyLayer {
    pub owner_id: String,
    pub text: String,
}

impl PolicyLayer {
    pub fn new(owner_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            text: text.into(),
        }
    }
}

/// The layered sources that give a cached value its meaning
///
/// Order is fixed: base policy, tenant policy, user preference, then extra
/// fields (target language, formality, ...) sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextLayers {
    pub base_policy: String,
    pub tenant: Option<PolicyLayer>,
    pub user: Option<PolicyLayer>,
    pub extras: BTreeMap<String, String>,
}

impl ContextLayers {
    pub fn new(base_policy: impl Into<String>) -> Self {
        Self {
            base_policy: base_policy.into(),
            ..Default::default()
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>, text: impl Into<String>) -> Self {
        self.tenant = Some(PolicyLayer::new(tenant_id, text));
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>, text: impl Into<String>) -> Self {
        self.user = Some(PolicyLayer::new(user_id, text));
        self
    }

    pub fn with_extra(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(name.into(), value.into());
        self
    }

    /// Fingerprint of the full composition
    ///
    /// Absent layers are encoded explicitly, so adding or removing a layer changes
    /// the result even when its text is empty. Layer owners are hashed alongside
    /// the text: two tenants with identical policy text still get distinct
    /// fingerprints.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        write_part(&mut hasher, CONTEXT_LAYOUT_VERSION);
        write_part(&mut hasher, &self.base_policy);

        for layer in [&self.tenant, &self.user] {
            match layer {
                Some(layer) => {
                    hasher.update([1u8]);
                    write_part(&mut hasher, &layer.owner_id);
                    write_part(&mut hasher, &layer.text);
                }
                None => hasher.update([0u8]),
            }
        }

        hasher.update((self.extras.len() as u64).to_be_bytes());
        for (name, value) in &self.extras {
            write_part(&mut hasher, name);
            write_part(&mut hasher, value);
        }

        Fingerprint(hex::encode(hasher.finalize()))
    }

    /// Scope tags naming the non-global layers this composition depends on
    pub fn scopes(&self) -> Vec<String> {
        let mut scopes = Vec::new();
        if let Some(tenant) = &self.tenant {
            scopes.push(format!("tenant:{}", tenant.owner_id));
        }
        if let Some(user) = &self.user {
            scopes.push(format!("user:{}", user.owner_id));
        }
        scopes
    }
}
