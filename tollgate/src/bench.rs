//! Repeated-request benchmark over one pipeline

use crate::error::RequestError;
use crate::pipeline::{Pipeline, Request, Response};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tollgate_cache::TierKind;
use tracing::{debug, info};

/// One run of the benchmark
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub served_by: TierKind,
    pub elapsed: Duration,
}

/// Summary printed by `tollgate bench`
///
/// Field names are part of the output format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkSummary {
    pub last_result: Option<String>,
    /// Wall time over all runs, in milliseconds
    pub total_elapsed: f64,
    pub hits_by_tier: BTreeMap<TierKind, u64>,
    pub misses_by_tier: BTreeMap<TierKind, u64>,
    #[serde(skip)]
    pub runs: Vec<RunRecord>,
}

impl BenchmarkSummary {
    fn empty() -> Self {
        let zeroed: BTreeMap<TierKind, u64> = TierKind::all().into_iter().map(|t| (t, 0)).collect();
        Self {
            last_result: None,
            total_elapsed: 0.0,
            hits_by_tier: zeroed.clone(),
            misses_by_tier: zeroed,
            runs: Vec::new(),
        }
    }

    fn record(&mut self, response: &Response, elapsed: Duration) {
        let counts = if response.served_by == TierKind::Generation {
            &mut self.misses_by_tier
        } else {
            &mut self.hits_by_tier
        };
        *counts.entry(response.served_by).or_default() += 1;
        self.runs.push(RunRecord {
            served_by: response.served_by,
            elapsed,
        });
        self.last_result = Some(response.text.clone());
    }

    pub fn hits(&self, tier: TierKind) -> u64 {
        self.hits_by_tier.get(&tier).copied().unwrap_or_default()
    }

    pub fn misses(&self, tier: TierKind) -> u64 {
        self.misses_by_tier.get(&tier).copied().unwrap_or_default()
    }
}

pub struct BenchmarkHarness {
    pipeline: Arc<Pipeline>,
}

impl BenchmarkHarness {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    /// Send `request` `repeat` times, one after another
    pub async fn run(
        &self,
        request: &Request,
        repeat: usize,
    ) -> Result<BenchmarkSummary, RequestError> {
        let mut summary = BenchmarkSummary::empty();
        let started = Instant::now();

        for run in 1..=repeat {
            let run_started = Instant::now();
            let response = self.pipeline.handle(request.clone()).await?;
            let elapsed = run_started.elapsed();
            let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
            debug!(run, served_by = %response.served_by, elapsed_ms, "Benchmark run");
            summary.record(&response, elapsed);
        }

        summary.total_elapsed = started.elapsed().as_secs_f64() * 1000.0;
        info!(
            repeat,
            total_elapsed_ms = summary.total_elapsed,
            volatile_hits = summary.hits(TierKind::Volatile),
            generated = summary.misses(TierKind::Generation),
            "Benchmark complete"
        );
        Ok(summary)
    }
}
