//! Counters and histograms for cache and generation activity
//!
//! Everything is emitted through the `metrics` facade; without an installed
//! recorder the calls are no-ops. [`HitCounters`] keeps the same hit/miss
//! numbers in-process so callers and tests can read them back, and forwards
//! them to the facade only while metrics are enabled.

use crate::cache::types::TierKind;
use dashmap::DashMap;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "tollgate_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "tollgate_cache_misses_total";
    pub const CACHE_STALE_TOTAL: &str = "tollgate_cache_stale_total";
    pub const CACHE_TIER_ERRORS_TOTAL: &str = "tollgate_cache_tier_errors_total";
    pub const SINGLEFLIGHT_JOINS_TOTAL: &str = "tollgate_singleflight_joins_total";
    pub const GENERATION_CALLS_TOTAL: &str = "tollgate_generation_calls_total";
    pub const GENERATION_COST_TOTAL: &str = "tollgate_generation_cost_total";
    pub const GENERATION_DURATION_SECONDS: &str = "tollgate_generation_duration_seconds";
    pub const INVALIDATIONS_TOTAL: &str = "tollgate_invalidations_total";
}

pub fn record_hit(tier: TierKind, namespace: &str) {
    counter!(
        names::CACHE_HITS_TOTAL,
        "tier" => tier.as_str(),
        "namespace" => namespace.to_string()
    )
    .increment(1);
}

pub fn record_miss(tier: TierKind, namespace: &str) {
    counter!(
        names::CACHE_MISSES_TOTAL,
        "tier" => tier.as_str(),
        "namespace" => namespace.to_string()
    )
    .increment(1);
}

pub fn record_stale(tier: TierKind, namespace: &str) {
    counter!(
        names::CACHE_STALE_TOTAL,
        "tier" => tier.as_str(),
        "namespace" => namespace.to_string()
    )
    .increment(1);
}

pub fn record_tier_error(tier: TierKind, operation: &'static str) {
    counter!(
        names::CACHE_TIER_ERRORS_TOTAL,
        "tier" => tier.as_str(),
        "operation" => operation
    )
    .increment(1);
}

pub fn record_singleflight_join(namespace: &str) {
    counter!(
        names::SINGLEFLIGHT_JOINS_TOTAL,
        "namespace" => namespace.to_string()
    )
    .increment(1);
}

pub fn record_generation(resource_tier: &str, cost: f64, duration: Duration) {
    counter!(
        names::GENERATION_CALLS_TOTAL,
        "tier" => resource_tier.to_string()
    )
    .increment(1);
    // Counters are integral; cost is tracked in micro-units.
    counter!(
        names::GENERATION_COST_TOTAL,
        "tier" => resource_tier.to_string()
    )
    .increment((cost * 1_000_000.0).round().max(0.0) as u64);
    histogram!(
        names::GENERATION_DURATION_SECONDS,
        "tier" => resource_tier.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn record_invalidation(scope: &str, removed: usize) {
    counter!(names::INVALIDATIONS_TOTAL, "scope" => scope.to_string()).increment(removed as u64);
}

#[derive(Default)]
struct Pair {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Hit/miss snapshot for one `(tier, namespace)` label set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitMiss {
    pub hits: u64,
    pub misses: u64,
}

/// In-process hit/miss counters labelled by tier and namespace
pub struct HitCounters {
    counters: DashMap<(TierKind, String), Pair>,
    emit: bool,
}

impl Default for HitCounters {
    fn default() -> Self {
        Self {
            counters: DashMap::new(),
            emit: true,
        }
    }
}

impl HitCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep counting in-process but stop forwarding to the facade
    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.emit = enable;
        self
    }

    pub fn metrics_enabled(&self) -> bool {
        self.emit
    }

    pub fn hit(&self, tier: TierKind, namespace: &str) {
        self.counters
            .entry((tier, namespace.to_string()))
            .or_default()
            .hits
            .fetch_add(1, Ordering::Relaxed);
        if self.emit {
            record_hit(tier, namespace);
        }
    }

    pub fn miss(&self, tier: TierKind, namespace: &str) {
        self.counters
            .entry((tier, namespace.to_string()))
            .or_default()
            .misses
            .fetch_add(1, Ordering::Relaxed);
        if self.emit {
            record_miss(tier, namespace);
        }
    }

    pub fn get(&self, tier: TierKind, namespace: &str) -> HitMiss {
        self.counters
            .get(&(tier, namespace.to_string()))
            .map(|pair| HitMiss {
                hits: pair.hits.load(Ordering::Relaxed),
                misses: pair.misses.load(Ordering::Relaxed),
            })
            .unwrap_or_default()
    }

    /// Snapshot keyed `"<tier>/<namespace>"`
    pub fn snapshot(&self) -> BTreeMap<String, HitMiss> {
        self.counters
            .iter()
            .map(|e| {
                let (tier, namespace) = e.key();
                (
                    format!("{}/{}", tier, namespace),
                    HitMiss {
                        hits: e.value().hits.load(Ordering::Relaxed),
                        misses: e.value().misses.load(Ordering::Relaxed),
                    },
                )
            })
            .collect()
    }
}

/// Recorder that counts metric registrations, for asserting what was emitted
#[cfg(test)]
pub(crate) mod testing {
    use metrics::{
        Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
    };
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingRecorder {
        names: Mutex<Vec<String>>,
    }

    impl RecordingRecorder {
        /// Names of every counter or histogram touched, in order
        pub fn names(&self) -> Vec<String> {
            self.names.lock().map(|n| n.clone()).unwrap_or_default()
        }

        fn push(&self, key: &Key) {
            if let Ok(mut names) = self.names.lock() {
                names.push(key.name().to_string());
            }
        }
    }

    impl Recorder for RecordingRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            self.push(key);
            Counter::noop()
        }

        fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
            self.push(key);
            Gauge::noop()
        }

        fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
            self.push(key);
            Histogram::noop()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingRecorder;
    use super::*;

    #[test]
    fn test_counters_are_labelled() {
        let counters = HitCounters::new();
        counters.hit(TierKind::Volatile, "answer");
        counters.hit(TierKind::Volatile, "answer");
        counters.miss(TierKind::Volatile, "classify");
        counters.miss(TierKind::Durable, "answer");

        assert_eq!(
            counters.get(TierKind::Volatile, "answer"),
            HitMiss { hits: 2, misses: 0 }
        );
        assert_eq!(counters.get(TierKind::Volatile, "classify").misses, 1);
        assert_eq!(counters.get(TierKind::Durable, "answer").misses, 1);
        assert_eq!(counters.get(TierKind::Durable, "classify"), HitMiss::default());
    }

    #[test]
    fn test_snapshot_keys() {
        let counters = HitCounters::new();
        counters.hit(TierKind::Durable, "retrieve");
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.get("durable/retrieve").map(|h| h.hits), Some(1));
    }

    #[test]
    fn test_disabled_counters_still_count_in_process() {
        let recorder = RecordingRecorder::default();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let silent = HitCounters::new().with_metrics(false);
        silent.hit(TierKind::Volatile, "answer");
        silent.miss(TierKind::Durable, "answer");
        assert_eq!(silent.get(TierKind::Volatile, "answer").hits, 1);
        assert_eq!(silent.get(TierKind::Durable, "answer").misses, 1);
        assert!(recorder.names().is_empty());

        let loud = HitCounters::new();
        loud.hit(TierKind::Volatile, "answer");
        assert_eq!(recorder.names(), vec![names::CACHE_HITS_TOTAL.to_string()]);
    }
}
