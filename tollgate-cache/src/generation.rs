//! The Generation tier: upstream text generation with cost accounting
//!
//! Generation is the last tier of the hierarchy but stores nothing. Every
//! completed call is charged to the [`CostLedger`] exactly once under a fresh
//! invocation id.

use crate::error::Result;
use crate::ledger::{CostLedger, Invocation, ResourceTier};
use crate::telemetry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Provider output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub units_in: u64,
    pub units_out: u64,
}

/// Upstream generation service
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, tier: ResourceTier) -> Result<Generation>;
}

/// Who a generation call is charged to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    pub request_id: String,
    pub tenant_id: Option<String>,
    pub node: Option<String>,
}

impl CallContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Default::default()
        }
    }

    pub fn with_tenant(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }
}

/// Provider plus ledger
pub struct GenerationTier {
    provider: Arc<dyn GenerationProvider>,
    ledger: Arc<CostLedger>,
    calls: AtomicU64,
    emit_metrics: bool,
}

impl GenerationTier {
    pub fn new(provider: Arc<dyn GenerationProvider>, ledger: Arc<CostLedger>) -> Self {
        Self {
            provider,
            ledger,
            calls: AtomicU64::new(0),
            emit_metrics: true,
        }
    }

    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.emit_metrics = enable;
        self
    }

    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Completed provider calls so far
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Call the provider and charge the result
    ///
    /// Failed calls are not charged.
    pub async fn generate(
        &self,
        prompt: &str,
        tier: ResourceTier,
        context: &CallContext,
    ) -> Result<Generation> {
        let invocation_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        debug!(
            provider = self.provider.name(),
            tier = %tier,
            request = %context.request_id,
            node = context.node.as_deref().unwrap_or("-"),
            "Calling generation provider"
        );

        let generation = match self.provider.generate(prompt, tier).await {
            Ok(generation) => generation,
            Err(e) => {
                warn!(provider = self.provider.name(), tier = %tier, error = %e, "Generation failed");
                return Err(e);
            }
        };
        self.calls.fetch_add(1, Ordering::Relaxed);

        let cost = self
            .ledger
            .record(Invocation {
                invocation_id,
                request_id: context.request_id.clone(),
                tenant_id: context.tenant_id.clone(),
                node: context.node.clone(),
                tier,
                units_in: generation.units_in,
                units_out: generation.units_out,
            })
            .await
            .map(|record| record.cost_estimate)
            .unwrap_or_default();

        if self.emit_metrics {
            telemetry::record_generation(tier.as_str(), cost, started.elapsed());
        }
        Ok(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;

    struct Echo;

    #[async_trait]
    impl GenerationProvider for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, prompt: &str, _tier: ResourceTier) -> Result<Generation> {
            if prompt == "fail" {
                return Err(CacheError::GenerationFailed("refused".to_string()));
            }
            Ok(Generation {
                text: prompt.to_uppercase(),
                units_in: prompt.len() as u64,
                units_out: prompt.len() as u64,
            })
        }
    }

    #[tokio::test]
    async fn test_each_call_is_charged_once() {
        let ledger = Arc::new(CostLedger::default());
        let tier = GenerationTier::new(Arc::new(Echo), ledger.clone());
        let context = CallContext::new("req-1")
            .with_tenant(Some("acme".to_string()))
            .with_node("summarize");

        let first = tier
            .generate("hello", ResourceTier::Economy, &context)
            .await
            .unwrap();
        tier.generate("hello", ResourceTier::Economy, &context)
            .await
            .unwrap();

        assert_eq!(first.text, "HELLO");
        assert_eq!(tier.calls(), 2);
        let records = ledger.for_request("req-1");
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].invocation_id, records[1].invocation_id);
        assert_eq!(records[0].node.as_deref(), Some("summarize"));
        assert_eq!(records[0].tenant_id.as_deref(), Some("acme"));
    }

    #[tokio::test]
    async fn test_failed_call_is_not_charged() {
        let ledger = Arc::new(CostLedger::default());
        let tier = GenerationTier::new(Arc::new(Echo), ledger.clone());

        let err = tier
            .generate("fail", ResourceTier::Premium, &CallContext::new("req-2"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(ledger.is_empty());
        assert_eq!(tier.calls(), 0);
    }

    #[tokio::test]
    async fn test_metrics_toggle() {
        let recorder = crate::telemetry::testing::RecordingRecorder::default();
        let _guard = metrics::set_default_local_recorder(&recorder);
        let context = CallContext::new("req-3");

        let quiet = GenerationTier::new(Arc::new(Echo), Arc::new(CostLedger::default()))
            .with_metrics(false);
        quiet.generate("hi", ResourceTier::Economy, &context).await.unwrap();
        assert!(recorder.names().is_empty());
        assert_eq!(quiet.calls(), 1);

        let loud = GenerationTier::new(Arc::new(Echo), Arc::new(CostLedger::default()));
        loud.generate("hi", ResourceTier::Economy, &context).await.unwrap();
        assert!(recorder
            .names()
            .contains(&crate::telemetry::names::GENERATION_CALLS_TOTAL.to_string()));
    }
}
