//! Shared fixtures for the router and pipeline tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tollgate::classifier::{PROMPT_HEADER, REQUEST_MARKER};
use tollgate::{StaticRetriever, Tollgate, TollgateConfig};
use tollgate_cache::{CacheConfig, CacheError, Generation, GenerationProvider, ResourceTier};

/// Provider that answers from a script and counts its calls
pub struct ScriptedProvider {
    labels: Vec<(String, String)>,
    default_label: String,
    calls: AtomicUsize,
    prompts: Mutex<Vec<(ResourceTier, String)>>,
    failing: AtomicBool,
    delay: Duration,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            labels: Vec::new(),
            default_label: "trivial".to_string(),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            delay: Duration::ZERO,
        }
    }

    /// Requests containing `needle` get `label` from the classifier
    pub fn label(mut self, needle: &str, label: &str) -> Self {
        self.labels.push((needle.to_string(), label.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<(ResourceTier, String)> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str, tier: ResourceTier) -> tollgate_cache::Result<Generation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push((tier, prompt.to_string()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::GenerationFailed("provider offline".to_string()));
        }

        let text = if prompt.starts_with(PROMPT_HEADER) {
            let request = prompt.split_once(REQUEST_MARKER).map(|(_, r)| r).unwrap_or(prompt);
            self.labels
                .iter()
                .find(|(needle, _)| request.contains(needle.as_str()))
                .map(|(_, label)| label.clone())
                .unwrap_or_else(|| self.default_label.clone())
        } else {
            let role = prompt.lines().next().unwrap_or_default();
            format!("{} output ({})", role.trim_start_matches("# Role: "), tier)
        };

        Ok(Generation {
            units_in: prompt.len() as u64,
            units_out: text.len() as u64,
            text,
        })
    }
}

pub fn test_config() -> TollgateConfig {
    let mut config = TollgateConfig::default();
    config.persist = false;
    config.cache = CacheConfig::builder().enable_auto_cleanup(false).build();
    config
}

pub fn retriever() -> Arc<StaticRetriever> {
    corpus("Refunds are issued within 14 days of purchase.")
}

/// The standard two documents with `refunds` text swapped in
pub fn corpus(refunds: &str) -> Arc<StaticRetriever> {
    Arc::new(
        StaticRetriever::new([
            ("refunds", refunds),
            ("plans", "The Pro plan includes priority support; Basic does not."),
        ])
        .unwrap(),
    )
}

pub async fn app_with(config: TollgateConfig, provider: Arc<ScriptedProvider>) -> Tollgate {
    app_with_retriever(config, provider, retriever()).await
}

pub async fn app_with_retriever(
    config: TollgateConfig,
    provider: Arc<ScriptedProvider>,
    retriever: Arc<StaticRetriever>,
) -> Tollgate {
    Tollgate::with_parts(config, provider, retriever)
        .await
        .unwrap()
}

pub async fn app(provider: Arc<ScriptedProvider>) -> Tollgate {
    app_with(test_config(), provider).await
}
