//! Layered policy sources and their change notifications
//!
//! The store owns the base policy, per-tenant policies and per-user
//! preferences. Every change that alters a layer publishes an invalidation
//! event for that layer's scope.

use crate::config::PolicyConfig;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tollgate_cache::{
    ContextLayers, DeliveryReport, InvalidationBus, InvalidationEvent, InvalidationReason,
};
use tracing::info;

#[derive(Default)]
struct Layers {
    base: String,
    tenants: HashMap<String, String>,
    users: HashMap<String, String>,
}

pub struct PolicyStore {
    layers: RwLock<Layers>,
    /// Meaning-changing request fields (language, formality, ...)
    extras: BTreeMap<String, String>,
    bus: Arc<InvalidationBus>,
}

impl PolicyStore {
    pub fn new(base: impl Into<String>, bus: Arc<InvalidationBus>) -> Self {
        Self {
            layers: RwLock::new(Layers {
                base: base.into(),
                ..Default::default()
            }),
            extras: BTreeMap::new(),
            bus,
        }
    }

    pub fn from_config(config: &PolicyConfig, bus: Arc<InvalidationBus>) -> Self {
        let mut store = Self::new(config.base.clone(), bus);
        if let Some(language) = &config.language {
            store = store.with_extra("language", language.clone());
        }
        if let Some(formality) = &config.formality {
            store = store.with_extra("formality", formality.clone());
        }
        store
    }

    pub fn with_extra(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(name.into(), value.into());
        self
    }

    /// The layered sources a request for `tenant`/`user` depends on
    pub async fn context_for(&self, tenant: Option<&str>, user: Option<&str>) -> ContextLayers {
        let layers = self.layers.read().await;
        let mut context = ContextLayers::new(layers.base.clone());

        if let Some(tenant) = tenant {
            if let Some(text) = layers.tenants.get(tenant) {
                context = context.with_tenant(tenant, text.clone());
            }
        }
        if let Some(user) = user {
            if let Some(text) = layers.users.get(user) {
                context = context.with_user(user, text.clone());
            }
        }
        for (name, value) in &self.extras {
            context = context.with_extra(name.clone(), value.clone());
        }
        context
    }

    pub async fn base(&self) -> String {
        self.layers.read().await.base.clone()
    }

    /// Replace the base policy; `None` if the text did not change
    pub async fn set_base(&self, text: impl Into<String>) -> Option<DeliveryReport> {
        let text = text.into();
        {
            let mut layers = self.layers.write().await;
            if layers.base == text {
                return None;
            }
            layers.base = text;
        }
        info!("Base policy updated");
        Some(
            self.bus
                .publish(InvalidationEvent::global(InvalidationReason::PolicyUpdated))
                .await,
        )
    }

    pub async fn set_tenant(
        &self,
        tenant_id: &str,
        text: impl Into<String>,
    ) -> Option<DeliveryReport> {
        let text = text.into();
        {
            let mut layers = self.layers.write().await;
            if layers.tenants.get(tenant_id) == Some(&text) {
                return None;
            }
            layers.tenants.insert(tenant_id.to_string(), text);
        }
        info!(tenant = tenant_id, "Tenant policy updated");
        Some(
            self.bus
                .publish(InvalidationEvent::tenant(
                    tenant_id,
                    InvalidationReason::PolicyUpdated,
                ))
                .await,
        )
    }

    pub async fn remove_tenant(&self, tenant_id: &str) -> Option<DeliveryReport> {
        if self.layers.write().await.tenants.remove(tenant_id).is_none() {
            return None;
        }
        info!(tenant = tenant_id, "Tenant policy removed");
        Some(
            self.bus
                .publish(InvalidationEvent::tenant(
                    tenant_id,
                    InvalidationReason::PolicyUpdated,
                ))
                .await,
        )
    }

    pub async fn set_user(&self, user_id: &str, text: impl Into<String>) -> Option<DeliveryReport> {
        let text = text.into();
        {
            let mut layers = self.layers.write().await;
            if layers.users.get(user_id) == Some(&text) {
                return None;
            }
            layers.users.insert(user_id.to_string(), text);
        }
        info!(user = user_id, "User preference updated");
        Some(
            self.bus
                .publish(InvalidationEvent::user(
                    user_id,
                    InvalidationReason::PolicyUpdated,
                ))
                .await,
        )
    }

    pub async fn remove_user(&self, user_id: &str) -> Option<DeliveryReport> {
        if self.layers.write().await.users.remove(user_id).is_none() {
            return None;
        }
        info!(user = user_id, "User preference removed");
        Some(
            self.bus
                .publish(InvalidationEvent::user(
                    user_id,
                    InvalidationReason::PolicyUpdated,
                ))
                .await,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_cache::InvalidationScope;

    fn store() -> (PolicyStore, Arc<InvalidationBus>) {
        let bus = Arc::new(InvalidationBus::default());
        (PolicyStore::new("base", bus.clone()), bus)
    }

    #[tokio::test]
    async fn test_context_includes_known_layers_only() {
        let (store, _bus) = store();
        store.set_tenant("acme", "metric units").await;

        let context = store.context_for(Some("acme"), Some("nobody")).await;
        assert_eq!(context.scopes(), vec!["tenant:acme".to_string()]);

        let other = store.context_for(Some("globex"), None).await;
        assert!(other.scopes().is_empty());
        assert_ne!(context.fingerprint(), other.fingerprint());
    }

    #[tokio::test]
    async fn test_changes_publish_scoped_events() {
        let (store, bus) = store();
        assert!(store.set_tenant("acme", "v1").await.is_some());
        assert!(store.set_user("u1", "terse").await.is_some());
        assert!(store.set_base("new base").await.is_some());

        let scopes: Vec<InvalidationScope> = bus.recent().await.iter().map(|e| e.scope).collect();
        assert_eq!(
            scopes,
            vec![
                InvalidationScope::Tenant,
                InvalidationScope::User,
                InvalidationScope::Global
            ]
        );
    }

    #[tokio::test]
    async fn test_unchanged_text_publishes_nothing() {
        let (store, bus) = store();
        store.set_tenant("acme", "v1").await;
        assert!(store.set_tenant("acme", "v1").await.is_none());
        assert!(store.set_base("base").await.is_none());
        assert!(store.remove_user("never-set").await.is_none());
        assert_eq!(bus.recent().await.len(), 1);
    }

    #[tokio::test]
    async fn test_extras_change_fingerprint() {
        let bus = Arc::new(InvalidationBus::default());
        let plain = PolicyStore::new("base", bus.clone());
        let french = PolicyStore::new("base", bus).with_extra("language", "fr");

        assert_ne!(
            plain.context_for(None, None).await.fingerprint(),
            french.context_for(None, None).await.fingerprint()
        );
    }
}
