//! Application configuration
//!
//! Loaded from a YAML file, then overridden by `TOLLGATE_*` environment
//! variables (a `.env` file is read first by the binary).

use crate::error::{Result, TollgateError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tollgate_cache::{BusConfig, CacheConfig, ContentHasher, Fingerprint, PriceTable, ResourceTier};
use tracing::{debug, info};

/// Which generation backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Spawn an external CLI per call
    Command,
    /// Deterministic local responses, no network
    Offline,
}

impl std::str::FromStr for ProviderKind {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "command" => Ok(ProviderKind::Command),
            "offline" => Ok(ProviderKind::Offline),
            other => Err(TollgateError::Config(format!("unknown provider: {}", other))),
        }
    }
}

/// Resource tier used by each workflow node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeTiers {
    pub classify: ResourceTier,
    pub retrieve: ResourceTier,
    pub reason: ResourceTier,
    pub summarize: ResourceTier,
}

impl Default for NodeTiers {
    fn default() -> Self {
        Self {
            classify: ResourceTier::Economy,
            retrieve: ResourceTier::Economy,
            reason: ResourceTier::Premium,
            summarize: ResourceTier::Standard,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: ProviderKind,

    /// Executable for the command provider
    pub command: PathBuf,

    /// Working directory for spawned commands
    pub working_dir: Option<PathBuf>,

    /// Model name passed to the command for each resource tier
    pub models: BTreeMap<ResourceTier, String>,

    pub tiers: NodeTiers,
}

impl GenerationConfig {
    /// Digest of the settings that change what the provider returns
    pub fn profile(&self) -> Fingerprint {
        let provider = match self.provider {
            ProviderKind::Command => "command",
            ProviderKind::Offline => "offline",
        };
        let mut parts = vec![provider.to_string(), self.command.display().to_string()];
        for (tier, model) in &self.models {
            parts.push(tier.to_string());
            parts.push(model.clone());
        }
        ContentHasher::fingerprint("generation", parts)
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        let models = BTreeMap::from([
            (ResourceTier::Economy, "haiku".to_string()),
            (ResourceTier::Standard, "sonnet".to_string()),
            (ResourceTier::Premium, "opus".to_string()),
        ]);
        Self {
            provider: ProviderKind::Command,
            command: PathBuf::from("claude"),
            working_dir: None,
            models,
            tiers: NodeTiers::default(),
        }
    }
}

/// Global policy layer and meaning-changing request fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub base: String,
    pub language: Option<String>,
    pub formality: Option<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            base: "Answer accurately and concisely.".to_string(),
            language: None,
            formality: None,
        }
    }
}

/// A document served by the built-in keyword retriever
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentConfig {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TollgateConfig {
    pub cache: CacheConfig,
    pub bus: BusConfig,
    pub generation: GenerationConfig,
    pub prices: PriceTable,
    pub policy: PolicyConfig,
    pub documents: Vec<DocumentConfig>,

    /// Upper bound for one full workflow run
    pub workflow_timeout: Duration,

    /// Keep Durable entries and the cost journal on disk
    pub persist: bool,

    /// Defaults to the platform data directory
    pub data_dir: Option<PathBuf>,
}

impl Default for TollgateConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            bus: BusConfig::default(),
            generation: GenerationConfig::default(),
            prices: PriceTable::default(),
            policy: PolicyConfig::default(),
            documents: Vec::new(),
            workflow_timeout: Duration::from_secs(180),
            persist: true,
            data_dir: None,
        }
    }
}

impl TollgateConfig {
    /// Load from `path`, or defaults when no path is given; env overrides apply
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                info!("Loaded configuration from {}", path.display());
                Self::from_yaml(&content)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = var("TOLLGATE_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(provider) = var("TOLLGATE_PROVIDER") {
            self.generation.provider = provider.parse()?;
        }
        if let Some(command) = var("TOLLGATE_COMMAND") {
            self.generation.command = PathBuf::from(command);
        }
        if let Some(base) = var("TOLLGATE_BASE_POLICY") {
            self.policy.base = base;
        }
        if let Some(language) = var("TOLLGATE_LANGUAGE") {
            self.policy.language = Some(language);
        }
        if let Some(ttl) = var("TOLLGATE_CACHE_TTL_SECS") {
            self.cache.default_ttl = Duration::from_secs(parse_number("TOLLGATE_CACHE_TTL_SECS", &ttl)?);
        }
        if let Some(max) = var("TOLLGATE_CACHE_MAX_ENTRIES") {
            self.cache.max_entries = parse_number("TOLLGATE_CACHE_MAX_ENTRIES", &max)? as usize;
        }
        if let Some(timeout) = var("TOLLGATE_WORKFLOW_TIMEOUT_SECS") {
            self.workflow_timeout =
                Duration::from_secs(parse_number("TOLLGATE_WORKFLOW_TIMEOUT_SECS", &timeout)?);
        }
        if let Some(persist) = var("TOLLGATE_PERSIST") {
            self.persist = matches!(persist.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        debug!("Applied environment overrides");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.cache
            .validate()
            .map_err(|e| TollgateError::Config(e.to_string()))?;
        if self.workflow_timeout.is_zero() {
            return Err(TollgateError::Config(
                "workflow_timeout must be greater than 0".to_string(),
            ));
        }
        if self.generation.provider == ProviderKind::Command {
            for tier in ResourceTier::all() {
                if !self.generation.models.contains_key(&tier) {
                    return Err(TollgateError::Config(format!(
                        "no model configured for resource tier {}",
                        tier
                    )));
                }
            }
        }
        Ok(())
    }

    /// Resolved data directory
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|dir| dir.join("tollgate"))
                .unwrap_or_else(|| PathBuf::from("./data"))
        })
    }

    pub fn durable_dir(&self) -> PathBuf {
        self.data_dir().join("cache")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir().join("ledger").join("costs.jsonl")
    }
}

fn parse_number(name: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| TollgateError::Config(format!("{} must be a number, got {:?}", name, value)))
}
