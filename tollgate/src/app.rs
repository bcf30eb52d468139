//! Wiring of tiers, ledger, policy store and router into one service

use crate::bench::BenchmarkHarness;
use crate::config::TollgateConfig;
use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::policy::PolicyStore;
use crate::provider;
use crate::retriever::{Retriever, StaticRetriever};
use crate::workflow::WorkflowRouter;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tollgate_cache::{
    CacheCoordinator, CostLedger, DurableTier, GenerationProvider, GenerationTier,
    InvalidationBus, TierStore, VolatileTier,
};
use tracing::info;

/// A fully wired service
pub struct Tollgate {
    pub config: TollgateConfig,
    pub cache: Arc<CacheCoordinator>,
    pub bus: Arc<InvalidationBus>,
    pub ledger: Arc<CostLedger>,
    pub generation: Arc<GenerationTier>,
    pub policy: Arc<PolicyStore>,
    pub pipeline: Arc<Pipeline>,
    cleanup: Option<JoinHandle<()>>,
}

impl Tollgate {
    /// Build with the provider named in `config`
    pub async fn build(config: TollgateConfig) -> Result<Self> {
        let provider = provider::from_config(&config.generation);
        let retriever: Arc<dyn Retriever> = Arc::new(StaticRetriever::from_config(&config.documents)?);
        Self::with_parts(config, provider, retriever).await
    }

    /// Build around an explicit provider and retriever
    pub async fn with_parts(
        config: TollgateConfig,
        provider: Arc<dyn GenerationProvider>,
        retriever: Arc<dyn Retriever>,
    ) -> Result<Self> {
        config.validate()?;

        let volatile = Arc::new(VolatileTier::new(config.cache.clone()));
        let cleanup = config
            .cache
            .enable_auto_cleanup
            .then(|| volatile.spawn_cleanup());

        let durable: Arc<dyn TierStore> = if config.persist {
            Arc::new(DurableTier::on_disk(config.durable_dir()))
        } else {
            Arc::new(DurableTier::in_memory())
        };
        let cache = Arc::new(CacheCoordinator::new(
            config.cache.clone(),
            volatile,
            Some(durable),
        ));

        let metrics = config.cache.enable_metrics;
        let bus = Arc::new(InvalidationBus::new(config.bus.clone()).with_metrics(metrics));
        bus.subscribe(cache.clone()).await;

        let ledger = if config.persist {
            Arc::new(CostLedger::with_journal(config.prices.clone(), config.journal_path()).await?)
        } else {
            Arc::new(CostLedger::new(config.prices.clone()))
        };
        let generation = Arc::new(GenerationTier::new(provider, ledger.clone()).with_metrics(metrics));
        let policy = Arc::new(PolicyStore::from_config(&config.policy, bus.clone()));

        let router = Arc::new(
            WorkflowRouter::new(
                cache.clone(),
                generation.clone(),
                retriever,
                config.generation.tiers.clone(),
            )
            .with_profile(&config.generation.profile()),
        );
        let pipeline = Arc::new(Pipeline::new(
            cache.clone(),
            policy.clone(),
            router.clone(),
            config.workflow_timeout,
        ));

        info!(
            persist = config.persist,
            provider = generation.provider_name(),
            revision = router.revision().short(),
            "Tollgate ready"
        );

        Ok(Self {
            config,
            cache,
            bus,
            ledger,
            generation,
            policy,
            pipeline,
            cleanup,
        })
    }

    pub fn harness(&self) -> BenchmarkHarness {
        BenchmarkHarness::new(self.pipeline.clone())
    }
}

impl Drop for Tollgate {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.abort();
        }
    }
}
