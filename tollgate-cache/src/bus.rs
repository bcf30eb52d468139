//! Invalidation event bus
//!
//! Policy changes are published as [`InvalidationEvent`]s and fanned out to every
//! subscribed handler (normally one [`CacheCoordinator`] per process). Delivery is
//! best-effort: each handler gets a bounded number of attempts, and a handler that
//! keeps failing is logged and skipped. Handlers must be idempotent; the same
//! event may arrive twice or out of order.
//!
//! Entries also self-invalidate through fingerprint mismatch, so a lost event
//! only delays reclaiming space.
//!
//! [`CacheCoordinator`]: crate::cache::CacheCoordinator

use crate::cache::invalidation::InvalidationEvent;
use crate::error::{CacheError, Result};
use crate::telemetry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Receiver of invalidation events
#[async_trait]
pub trait InvalidationHandler: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Apply the event, returning how many entries were removed
    async fn handle(&self, event: &InvalidationEvent) -> Result<usize>;
}

/// Handle returned by [`InvalidationBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Delivery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Attempts per handler per event
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles afterwards
    pub retry_backoff: Duration,

    /// Number of recent events kept for inspection
    pub history_size: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(50),
            history_size: 256,
        }
    }
}

/// Outcome of one publish
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    /// Handlers that applied the event
    pub delivered: usize,

    /// Entries removed across all handlers
    pub removed: usize,

    /// One message per handler that gave up
    pub failures: Vec<String>,
}

impl DeliveryReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Subscription {
    id: SubscriptionId,
    handler: Arc<dyn InvalidationHandler>,
}

/// Fan-out of invalidation events to subscribed handlers
pub struct InvalidationBus {
    config: BusConfig,
    subscriptions: RwLock<Vec<Subscription>>,
    history: Mutex<VecDeque<InvalidationEvent>>,
    next_id: AtomicU64,
    emit_metrics: bool,
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl InvalidationBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            subscriptions: RwLock::new(Vec::new()),
            history: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            emit_metrics: true,
        }
    }

    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.emit_metrics = enable;
        self
    }

    pub async fn subscribe(&self, handler: Arc<dyn InvalidationHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        info!(subscription = %id, handler = handler.name(), "Subscribed invalidation handler");
        self.subscriptions
            .write()
            .await
            .push(Subscription { id, handler });
        id
    }

    /// Remove a subscription; unknown ids are ignored
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write().await;
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        before != subscriptions.len()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Deliver `event` to every handler
    ///
    /// Never fails; undeliverable events are reported and logged.
    pub async fn publish(&self, event: InvalidationEvent) -> DeliveryReport {
        self.remember(&event).await;

        // Snapshot so handlers run without holding the subscription lock.
        let handlers: Vec<(SubscriptionId, Arc<dyn InvalidationHandler>)> = self
            .subscriptions
            .read()
            .await
            .iter()
            .map(|s| (s.id, Arc::clone(&s.handler)))
            .collect();

        debug!(event = %event, id = %event.id, handlers = handlers.len(), "Publishing invalidation");

        let mut report = DeliveryReport::default();
        for (id, handler) in handlers {
            match self.deliver(handler.as_ref(), &event).await {
                Ok(removed) => {
                    report.delivered += 1;
                    report.removed += removed;
                }
                Err(e) => {
                    let failure = CacheError::InvalidationDeliveryFailure(format!(
                        "{} ({}) gave up on {}: {}",
                        handler.name(),
                        id,
                        event,
                        e
                    ));
                    warn!("{}", failure);
                    report.failures.push(failure.to_string());
                }
            }
        }

        if self.emit_metrics {
            telemetry::record_invalidation(&event.scope.to_string(), report.removed);
        }
        report
    }

    async fn deliver(
        &self,
        handler: &dyn InvalidationHandler,
        event: &InvalidationEvent,
    ) -> Result<usize> {
        let attempts = self.config.max_attempts.max(1);
        let mut backoff = self.config.retry_backoff;
        let mut attempt = 1;

        loop {
            match handler.handle(event).await {
                Ok(removed) => return Ok(removed),
                Err(e) if attempt < attempts => {
                    debug!(
                        handler = handler.name(),
                        attempt,
                        error = %e,
                        "Invalidation handler failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn remember(&self, event: &InvalidationEvent) {
        if self.config.history_size == 0 {
            return;
        }
        let mut history = self.history.lock().await;
        if history.len() >= self.config.history_size {
            history.pop_front();
        }
        history.push_back(event.clone());
    }

    /// Recent events, oldest first
    pub async fn recent(&self) -> Vec<InvalidationEvent> {
        self.history.lock().await.iter().cloned().collect()
    }
}
