//! Configuration for the tiered cache

use crate::error::{CacheError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest accepted `default_ttl`
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Configuration for the cache coordinator and its Volatile tier
///
/// - Default TTL: 1 hour
/// - Jitter: spreads expiry so a burst of fills does not expire at once
/// - Generation timeout bounds how long a single-flight slot can be held
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default time-to-live for Volatile entries
    pub default_ttl: Duration,

    /// Maximum number of Volatile entries, enforced by LRU eviction
    pub max_entries: usize,

    /// TTL jitter factor (0.0 - 1.0)
    pub ttl_jitter: f64,

    /// Enable the background sweep of expired Volatile entries
    pub enable_auto_cleanup: bool,

    /// Interval for the background sweep
    pub cleanup_interval: Duration,

    /// Upper bound for a single Durable-tier read or write
    pub durable_timeout: Duration,

    /// Upper bound for one Generation-tier call
    pub generation_timeout: Duration,

    /// Emit counters through the `metrics` facade
    pub enable_metrics: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            max_entries: 10_000,
            ttl_jitter: 0.1,
            enable_auto_cleanup: true,
            cleanup_interval: Duration::from_secs(300),
            durable_timeout: Duration::from_secs(2),
            generation_timeout: Duration::from_secs(60),
            enable_metrics: true,
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(CacheError::ConfigError(
                "max_entries must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err(CacheError::ConfigError(
                "ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.default_ttl.is_zero() {
            return Err(CacheError::ConfigError(
                "default_ttl must be greater than 0".to_string(),
            ));
        }

        if self.default_ttl > MAX_TTL {
            return Err(CacheError::ConfigError(format!(
                "default_ttl must be at most {}s",
                MAX_TTL.as_secs()
            )));
        }

        if self.generation_timeout.is_zero() || self.durable_timeout.is_zero() {
            return Err(CacheError::ConfigError(
                "timeouts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// TTL for a new entry, spread by up to `ttl_jitter` either way
    pub fn ttl_with_jitter(&self) -> Duration {
        if self.ttl_jitter == 0.0 {
            return self.default_ttl;
        }
        let base = self.default_ttl.as_secs_f64();
        let offset = rand::thread_rng().gen_range(-1.0..=1.0) * base * self.ttl_jitter;
        // Never below one second, unless the TTL itself is shorter.
        Duration::try_from_secs_f64((base + offset).max(base.min(1.0))).unwrap_or(self.default_ttl)
    }
}

/// Chained setters over [`CacheConfig::default`]
#[derive(Debug, Default)]
pub struct CacheConfigBuilder(CacheConfig);

impl CacheConfigBuilder {
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.0.default_ttl = ttl;
        self
    }

    pub fn max_entries(mut self, max: usize) -> Self {
        self.0.max_entries = max;
        self
    }

    /// Fraction of the TTL, `0.0..=1.0`
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.0.ttl_jitter = jitter;
        self
    }

    pub fn enable_auto_cleanup(mut self, enable: bool) -> Self {
        self.0.enable_auto_cleanup = enable;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.0.cleanup_interval = interval;
        self
    }

    pub fn durable_timeout(mut self, timeout: Duration) -> Self {
        self.0.durable_timeout = timeout;
        self
    }

    pub fn generation_timeout(mut self, timeout: Duration) -> Self {
        self.0.generation_timeout = timeout;
        self
    }

    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.0.enable_metrics = enable;
        self
    }

    pub fn build(self) -> CacheConfig {
        self.0
    }
}

/// Preset configurations for common deployments
impl CacheConfig {
    /// Short TTL for rapidly changing policies
    pub fn realtime() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            max_entries: 5_000,
            ttl_jitter: 0.15,
            generation_timeout: Duration::from_secs(30),
            ..Default::default()
        }
    }

    /// Policies updated about once a day
    pub fn daily() -> Self {
        Self {
            default_ttl: Duration::from_secs(23 * 3600),
            max_entries: 50_000,
            ttl_jitter: 0.10,
            ..Default::default()
        }
    }

    /// Memory-constrained environments
    pub fn small() -> Self {
        Self {
            default_ttl: Duration::from_secs(1800),
            max_entries: 1_000,
            ttl_jitter: 0.15,
            ..Default::default()
        }
    }

    /// Large-scale deployments
    pub fn large() -> Self {
        Self {
            default_ttl: Duration::from_secs(7200),
            max_entries: 1_000_000,
            ttl_jitter: 0.10,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.default_ttl, Duration::from_secs(3600));
        assert_eq!(config.max_entries, 10_000);
        assert!(config.enable_auto_cleanup);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut invalid_config = CacheConfig::default();
        invalid_config.max_entries = 0;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = CacheConfig::default();
        invalid_config.ttl_jitter = 1.5;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = CacheConfig::default();
        invalid_config.default_ttl = Duration::from_secs(u64::MAX / 2);
        assert!(invalid_config.validate().is_err());

        let mut at_limit = CacheConfig::default();
        at_limit.default_ttl = MAX_TTL;
        assert!(at_limit.validate().is_ok());

        let mut invalid_config = CacheConfig::default();
        invalid_config.generation_timeout = Duration::ZERO;
        assert!(matches!(
            invalid_config.validate(),
            Err(CacheError::ConfigError(_))
        ));
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::builder()
            .default_ttl(Duration::from_secs(600))
            .max_entries(5000)
            .generation_timeout(Duration::from_secs(5))
            .build();

        assert_eq!(config.default_ttl, Duration::from_secs(600));
        assert_eq!(config.max_entries, 5000);
        assert_eq!(config.generation_timeout, Duration::from_secs(5));
        assert_eq!(config.durable_timeout, CacheConfig::default().durable_timeout);
    }

    #[test]
    fn test_ttl_with_jitter() {
        let config = CacheConfig {
            default_ttl: Duration::from_secs(3600),
            ttl_jitter: 0.1,
            ..Default::default()
        };

        let ttl = config.ttl_with_jitter();
        assert!(ttl.as_secs_f64() >= 3600.0 - 360.0);
        assert!(ttl.as_secs_f64() <= 3600.0 + 360.0);
    }

    #[test]
    fn test_ttl_without_jitter_is_exact() {
        let config = CacheConfig::builder()
            .default_ttl(Duration::from_millis(50))
            .ttl_jitter(0.0)
            .build();
        assert_eq!(config.ttl_with_jitter(), Duration::from_millis(50));
    }

    #[test]
    fn test_preset_configs() {
        assert_eq!(CacheConfig::realtime().default_ttl, Duration::from_secs(300));
        assert_eq!(CacheConfig::daily().default_ttl, Duration::from_secs(23 * 3600));
        assert_eq!(CacheConfig::small().max_entries, 1_000);
        assert_eq!(CacheConfig::large().max_entries, 1_000_000);
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: CacheConfig = serde_json::from_str(r#"{"max_entries": 42}"#).unwrap();
        assert_eq!(config.max_entries, 42);
        assert_eq!(config.default_ttl, Duration::from_secs(3600));
    }
}
