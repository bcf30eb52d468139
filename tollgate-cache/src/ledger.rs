//! Append-only cost accounting for generation calls
//!
//! One [`CostRecord`] per generation invocation, keyed by invocation id so a
//! repeated `record` for the same invocation is a no-op. The ledger observes
//! spend; it never feeds back into routing.

use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Price/capability class of a generation call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceTier {
    Economy,
    Standard,
    Premium,
}

impl ResourceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceTier::Economy => "economy",
            ResourceTier::Standard => "standard",
            ResourceTier::Premium => "premium",
        }
    }

    pub fn all() -> [ResourceTier; 3] {
        [
            ResourceTier::Economy,
            ResourceTier::Standard,
            ResourceTier::Premium,
        ]
    }
}

impl Default for ResourceTier {
    fn default() -> Self {
        ResourceTier::Standard
    }
}

impl fmt::Display for ResourceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for ResourceTier {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "economy" => Ok(ResourceTier::Economy),
            "standard" => Ok(ResourceTier::Standard),
            "premium" => Ok(ResourceTier::Premium),
            other => Err(CacheError::ConfigError(format!(
                "unknown resource tier: {}",
                other
            ))),
        }
    }
}

/// Price per 1,000 units in each direction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl Price {
    pub fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    pub fn estimate(&self, units_in: u64, units_out: u64) -> f64 {
        (units_in as f64 / 1_000.0) * self.input_per_1k
            + (units_out as f64 / 1_000.0) * self.output_per_1k
    }
}

/// Per-tier prices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceTable(BTreeMap<ResourceTier, Price>);

impl Default for PriceTable {
    fn default() -> Self {
        Self::new()
            .with(ResourceTier::Economy, Price::new(0.00025, 0.00125))
            .with(ResourceTier::Standard, Price::new(0.003, 0.015))
            .with(ResourceTier::Premium, Price::new(0.015, 0.075))
    }
}

impl PriceTable {
    /// Empty table; every tier prices at zero until set
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, tier: ResourceTier, price: Price) -> Self {
        self.0.insert(tier, price);
        self
    }

    pub fn set(&mut self, tier: ResourceTier, price: Price) {
        self.0.insert(tier, price);
    }

    pub fn get(&self, tier: ResourceTier) -> Option<Price> {
        self.0.get(&tier).copied()
    }

    pub fn estimate(&self, tier: ResourceTier, units_in: u64, units_out: u64) -> f64 {
        match self.0.get(&tier) {
            Some(price) => price.estimate(units_in, units_out),
            None => {
                warn!(tier = %tier, "No price configured, recording zero cost");
                0.0
            }
        }
    }
}

/// One generation call, as reported to [`CostLedger::record`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub invocation_id: String,
    pub request_id: String,
    pub tenant_id: Option<String>,
    /// Workflow node that issued the call
    pub node: Option<String>,
    pub tier: ResourceTier,
    pub units_in: u64,
    pub units_out: u64,
}

/// Immutable accounting record for one generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostRecord {
    pub invocation_id: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    pub tier: ResourceTier,
    pub units_in: u64,
    pub units_out: u64,
    pub cost_estimate: f64,
    pub created_at: DateTime<Utc>,
}

/// Totals over a set of records
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub calls: u64,
    pub units_in: u64,
    pub units_out: u64,
    pub cost: f64,
}

impl CostSummary {
    fn add(&mut self, record: &CostRecord) {
        self.calls += 1;
        self.units_in += record.units_in;
        self.units_out += record.units_out;
        self.cost += record.cost_estimate;
    }

    pub fn of<'a>(records: impl IntoIterator<Item = &'a CostRecord>) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.add(record);
        }
        summary
    }
}

impl fmt::Display for CostSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} calls, {} in / {} out, ${:.6}",
            self.calls, self.units_in, self.units_out, self.cost
        )
    }
}

/// Key used for records without a tenant
pub const UNASSIGNED_TENANT: &str = "-";

pub fn summarize_by_tier<'a>(
    records: impl IntoIterator<Item = &'a CostRecord>,
) -> BTreeMap<ResourceTier, CostSummary> {
    let mut totals: BTreeMap<ResourceTier, CostSummary> = BTreeMap::new();
    for record in records {
        totals.entry(record.tier).or_default().add(record);
    }
    totals
}

pub fn summarize_by_tenant<'a>(
    records: impl IntoIterator<Item = &'a CostRecord>,
) -> BTreeMap<String, CostSummary> {
    let mut totals: BTreeMap<String, CostSummary> = BTreeMap::new();
    for record in records {
        let tenant = record
            .tenant_id
            .clone()
            .unwrap_or_else(|| UNASSIGNED_TENANT.to_string());
        totals.entry(tenant).or_default().add(record);
    }
    totals
}

/// Records created in `[start, end)`
pub fn summarize_window<'a>(
    records: impl IntoIterator<Item = &'a CostRecord>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> CostSummary {
    CostSummary::of(
        records
            .into_iter()
            .filter(|r| r.created_at >= start && r.created_at < end),
    )
}

/// Read a JSON-lines journal written by [`CostLedger::with_journal`]
///
/// Unparseable lines are skipped with a warning.
pub async fn load_journal(path: impl AsRef<Path>) -> Result<Vec<CostRecord>> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path).await?;

    let mut records = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<CostRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                path = %path.display(),
                line = line_no + 1,
                error = %e,
                "Skipping malformed ledger line"
            ),
        }
    }
    Ok(records)
}

struct Journal {
    path: PathBuf,
    file: Mutex<File>,
}

/// Concurrent, idempotent cost ledger
pub struct CostLedger {
    prices: PriceTable,
    records: DashMap<String, (u64, CostRecord)>,
    seq: AtomicU64,
    journal: Option<Journal>,
}

impl Default for CostLedger {
    fn default() -> Self {
        Self::new(PriceTable::default())
    }
}

impl CostLedger {
    pub fn new(prices: PriceTable) -> Self {
        Self {
            prices,
            records: DashMap::new(),
            seq: AtomicU64::new(0),
            journal: None,
        }
    }

    /// Ledger that also appends every new record to a JSON-lines file
    pub async fn with_journal(prices: PriceTable, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        info!(path = %path.display(), "Cost journal opened");

        let mut ledger = Self::new(prices);
        ledger.journal = Some(Journal {
            path,
            file: Mutex::new(file),
        });
        Ok(ledger)
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    /// Account for one invocation
    ///
    /// Returns the new record, or `None` if this invocation was already
    /// recorded. Journal failures are logged; the in-memory record stands.
    pub async fn record(&self, invocation: Invocation) -> Option<CostRecord> {
        let record = match self.records.entry(invocation.invocation_id.clone()) {
            Entry::Occupied(_) => {
                debug!(invocation = %invocation.invocation_id, "Duplicate cost record ignored");
                return None;
            }
            Entry::Vacant(slot) => {
                let record = CostRecord {
                    cost_estimate: self.prices.estimate(
                        invocation.tier,
                        invocation.units_in,
                        invocation.units_out,
                    ),
                    invocation_id: invocation.invocation_id,
                    request_id: invocation.request_id,
                    tenant_id: invocation.tenant_id,
                    node: invocation.node,
                    tier: invocation.tier,
                    units_in: invocation.units_in,
                    units_out: invocation.units_out,
                    created_at: Utc::now(),
                };
                let seq = self.seq.fetch_add(1, Ordering::Relaxed);
                slot.insert((seq, record.clone()));
                record
            }
        };

        debug!(
            invocation = %record.invocation_id,
            request = %record.request_id,
            tier = %record.tier,
            cost = record.cost_estimate,
            "Cost recorded"
        );

        if let Some(journal) = &self.journal {
            if let Err(e) = Self::append(journal, &record).await {
                warn!(path = %journal.path.display(), error = %e, "Failed to journal cost record");
            }
        }
        Some(record)
    }

    async fn append(journal: &Journal, record: &CostRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = journal.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, invocation_id: &str) -> bool {
        self.records.contains_key(invocation_id)
    }

    /// All records in the order they were accepted
    pub fn records(&self) -> Vec<CostRecord> {
        let mut ordered: Vec<(u64, CostRecord)> =
            self.records.iter().map(|e| e.value().clone()).collect();
        ordered.sort_by_key(|(seq, _)| *seq);
        ordered.into_iter().map(|(_, record)| record).collect()
    }

    pub fn for_request(&self, request_id: &str) -> Vec<CostRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.request_id == request_id)
            .collect()
    }

    pub fn total(&self) -> CostSummary {
        CostSummary::of(&self.records())
    }

    pub fn by_tier(&self) -> BTreeMap<ResourceTier, CostSummary> {
        summarize_by_tier(&self.records())
    }

    pub fn by_tenant(&self) -> BTreeMap<String, CostSummary> {
        summarize_by_tenant(&self.records())
    }

    pub fn in_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> CostSummary {
        summarize_window(&self.records(), start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn invocation(id: &str, tenant: Option<&str>, tier: ResourceTier) -> Invocation {
        Invocation {
            invocation_id: id.to_string(),
            request_id: "req-1".to_string(),
            tenant_id: tenant.map(String::from),
            node: Some("summarize".to_string()),
            tier,
            units_in: 2_000,
            units_out: 1_000,
        }
    }

    #[test]
    fn test_price_estimate() {
        let price = Price::new(0.003, 0.015);
        let cost = price.estimate(2_000, 1_000);
        assert!((cost - 0.021).abs() < 1e-12);
    }

    #[test]
    fn test_missing_price_is_zero() {
        let table = PriceTable::new();
        assert_eq!(table.estimate(ResourceTier::Premium, 1_000, 1_000), 0.0);
    }

    #[test]
    fn test_resource_tier_parse() {
        assert_eq!("Economy".parse::<ResourceTier>().unwrap(), ResourceTier::Economy);
        assert!("gold".parse::<ResourceTier>().is_err());
    }

    #[tokio::test]
    async fn test_duplicate_invocation_is_noop() {
        let ledger = CostLedger::default();
        assert!(ledger
            .record(invocation("inv-1", None, ResourceTier::Standard))
            .await
            .is_some());
        assert!(ledger
            .record(invocation("inv-1", None, ResourceTier::Standard))
            .await
            .is_none());
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_aggregates() {
        let ledger = CostLedger::default();
        ledger
            .record(invocation("a", Some("acme"), ResourceTier::Economy))
            .await;
        ledger
            .record(invocation("b", Some("acme"), ResourceTier::Premium))
            .await;
        ledger
            .record(invocation("c", None, ResourceTier::Premium))
            .await;

        let total = ledger.total();
        assert_eq!(total.calls, 3);
        assert_eq!(total.units_in, 6_000);

        let by_tier = ledger.by_tier();
        assert_eq!(by_tier[&ResourceTier::Premium].calls, 2);
        assert_eq!(by_tier[&ResourceTier::Economy].calls, 1);
        assert!(!by_tier.contains_key(&ResourceTier::Standard));

        let by_tenant = ledger.by_tenant();
        assert_eq!(by_tenant["acme"].calls, 2);
        assert_eq!(by_tenant[UNASSIGNED_TENANT].calls, 1);

        let sum: f64 = by_tier.values().map(|s| s.cost).sum();
        assert!((sum - total.cost).abs() < 1e-12);

        let now = Utc::now();
        let hour = chrono::Duration::hours(1);
        assert_eq!(ledger.in_window(now - hour, now + hour).calls, 3);
        assert_eq!(ledger.in_window(now + hour, now + hour * 2).calls, 0);
    }

    #[tokio::test]
    async fn test_records_keep_insertion_order() {
        let ledger = CostLedger::default();
        for id in ["z", "a", "m"] {
            ledger
                .record(invocation(id, None, ResourceTier::Economy))
                .await;
        }
        let ids: Vec<String> = ledger.records().into_iter().map(|r| r.invocation_id).collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_records() {
        let ledger = Arc::new(CostLedger::default());
        let mut handles = Vec::new();
        for i in 0..32 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                // Every invocation id is reported twice.
                let id = format!("inv-{}", i % 16);
                ledger
                    .record(invocation(&id, None, ResourceTier::Standard))
                    .await
            }));
        }
        let accepted = futures::future::join_all(handles)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(Some(_))))
            .count();

        assert_eq!(accepted, 16);
        assert_eq!(ledger.len(), 16);
    }

    #[tokio::test]
    async fn test_journal_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger").join("costs.jsonl");

        let ledger = CostLedger::with_journal(PriceTable::default(), &path)
            .await
            .unwrap();
        ledger
            .record(invocation("a", Some("acme"), ResourceTier::Economy))
            .await;
        ledger
            .record(invocation("a", Some("acme"), ResourceTier::Economy))
            .await;
        ledger
            .record(invocation("b", None, ResourceTier::Premium))
            .await;

        let loaded = load_journal(&path).await.unwrap();
        let ids: Vec<&str> = loaded.iter().map(|r| r.invocation_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(loaded[0].tenant_id.as_deref(), Some("acme"));
        assert_eq!(summarize_by_tier(&loaded).len(), 2);
    }

    #[tokio::test]
    async fn test_journal_skips_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("costs.jsonl");
        tokio::fs::write(&path, "not json\n\n").await.unwrap();
        assert!(load_journal(&path).await.unwrap().is_empty());
    }
}
