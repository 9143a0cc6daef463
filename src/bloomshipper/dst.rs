//! Deterministic Simulation Testing for the Bloom Shipper
//!
//! Shadow-state harness that drives a compactor/query workload against a
//! fault-injecting object store:
//! - Compact: archive a new block, upload it, write a meta that tombstones
//!   the live blocks it covers
//! - Query: fetch metas through the store, select blocks, iterate them and
//!   compare against the shadow selection and contents
//! - Reclaim: delete tombstoned blocks
//!
//! ## Design (FoundationDB-style DST with shadow state)
//!
//! ```text
//! for seed in 0..N {
//!     let mut harness = BloomDSTHarness::new(BloomDSTConfig::chaos(seed));
//!     harness.run(200).await;
//!     harness.check_invariants().await;   // violations carry the seed
//! }
//! ```

use crate::bloomshipper::block::{Block, BlockMetadata};
use crate::bloomshipper::client::BloomClient;
use crate::bloomshipper::config::PeriodConfig;
use crate::bloomshipper::model::{FingerprintBounds, Interval, Time, TsdbIdentifier};
use crate::bloomshipper::object_store::{InMemoryObjectStore, ObjectStore};
use crate::bloomshipper::refs::{BlockRef, Meta, MetaRef, MetaSearchParams};
use crate::bloomshipper::resolver::KeyResolver;
use crate::bloomshipper::shipper::{blocks_for_metas, Shipper};
use crate::bloomshipper::simulated_store::{
    SimulatedObjectStore, SimulatedStoreConfig, SimulatedStoreStats,
};
use crate::bloomshipper::store::{BloomStore, Store};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Block time ranges start below this (all within the first day table)
const TIME_MAX: i64 = 1_000_000;
/// Longest block time range
const SPAN_MAX: i64 = 100_000;
/// File every simulated block carries
const BLOOM_FILE: &str = "bloom";

static HARNESS_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Configuration for bloom shipper DST
#[derive(Debug, Clone)]
pub struct BloomDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Object store fault configuration
    pub store_config: SimulatedStoreConfig,
    /// Client concurrency limit
    pub workers: usize,
    pub tenant: String,
    /// Fingerprints are drawn from `0..keyspace_max`
    pub keyspace_max: u64,
    /// Probability of a compaction (vs query)
    pub compact_probability: f64,
    /// Probability of reclaiming tombstoned blocks
    pub reclaim_probability: f64,
}

impl Default for BloomDSTConfig {
    fn default() -> Self {
        BloomDSTConfig {
            seed: 0,
            store_config: SimulatedStoreConfig {
                latency_range_us: (0, 200),
                ..SimulatedStoreConfig::default()
            },
            workers: 4,
            tenant: "dst-tenant".to_string(),
            keyspace_max: 1 << 20,
            compact_probability: 0.4,
            reclaim_probability: 0.05,
        }
    }
}

impl BloomDSTConfig {
    pub fn new(seed: u64) -> Self {
        BloomDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Calm mode - no fault injection
    pub fn calm(seed: u64) -> Self {
        BloomDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::latency_only(0, 200),
            ..Default::default()
        }
    }

    /// Moderate fault injection
    pub fn moderate(seed: u64) -> Self {
        BloomDSTConfig::new(seed)
    }

    /// Chaos mode - aggressive fault injection
    pub fn chaos(seed: u64) -> Self {
        BloomDSTConfig {
            seed,
            store_config: SimulatedStoreConfig {
                latency_range_us: (0, 200),
                ..SimulatedStoreConfig::high_chaos()
            },
            ..Default::default()
        }
    }

    fn fault_free(&self) -> bool {
        let c = &self.store_config;
        c.put_fail_prob == 0.0
            && c.get_fail_prob == 0.0
            && c.get_corrupt_prob == 0.0
            && c.delete_fail_prob == 0.0
            && c.timeout_prob == 0.0
    }
}

/// Bloom shipper operation type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BloomOperation {
    /// Build and upload a block plus its meta
    Compact,
    /// Select and iterate blocks for a random interval and keyspace
    Query,
    /// Delete tombstoned blocks
    Reclaim,
}

/// Outcome of an operation
#[derive(Debug, Clone)]
pub enum OperationOutcome {
    Success,
    /// Operation failed (expected under fault injection)
    Failed(String),
}

/// Recorded operation for history tracking
#[derive(Debug, Clone)]
pub struct RecordedOperation {
    pub id: u64,
    pub operation: BloomOperation,
    pub outcome: OperationOutcome,
}

/// Result of a DST run
#[derive(Debug, Clone)]
pub struct BloomDSTResult {
    pub seed: u64,
    pub total_operations: u64,
    pub successful_operations: u64,
    /// Failed operations (expected under faults)
    pub failed_operations: u64,
    pub compactions: u64,
    pub queries: u64,
    pub reclaims: u64,
    /// Blocks iterated across all successful queries
    pub blocks_visited: u64,
    pub store_stats: SimulatedStoreStats,
    pub invariant_violations: Vec<String>,
    pub history: Vec<RecordedOperation>,
}

impl BloomDSTResult {
    pub fn new(seed: u64) -> Self {
        BloomDSTResult {
            seed,
            total_operations: 0,
            successful_operations: 0,
            failed_operations: 0,
            compactions: 0,
            queries: 0,
            reclaims: 0,
            blocks_visited: 0,
            store_stats: SimulatedStoreStats::default(),
            invariant_violations: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops ({} ok, {} failed), {} compactions, {} queries, {} reclaims, {} blocks visited, {} violations",
            self.seed,
            self.total_operations,
            self.successful_operations,
            self.failed_operations,
            self.compactions,
            self.queries,
            self.reclaims,
            self.blocks_visited,
            self.invariant_violations.len()
        )
    }
}

type DSTStore = Arc<SimulatedObjectStore<InMemoryObjectStore>>;

/// Main DST harness for the bloom shipper
pub struct BloomDSTHarness {
    config: BloomDSTConfig,
    rng: ChaCha8Rng,
    store: DSTStore,
    shipper: Shipper<BloomStore<DSTStore>>,
    work_dir: PathBuf,
    table: String,
    /// Metas successfully written (ground truth)
    metas: Vec<Meta>,
    /// Archived contents of every uploaded block
    contents: HashMap<BlockRef, Vec<u8>>,
    /// Tombstoned blocks confirmed deleted
    deleted: HashSet<BlockRef>,
    next_block_id: u32,
    result: BloomDSTResult,
}

impl BloomDSTHarness {
    pub fn new(config: BloomDSTConfig) -> Self {
        let work_dir = std::env::temp_dir().join(format!(
            "bloom-dst-{}-{}-{}",
            std::process::id(),
            config.seed,
            HARNESS_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        // Different seed for the store than for the workload
        let store = Arc::new(SimulatedObjectStore::new(
            InMemoryObjectStore::new(),
            config.seed.wrapping_add(1),
            config.store_config.clone(),
        ));

        let periods = vec![PeriodConfig::default()];
        let table = periods[0].table_name(Time(0));
        let client = BloomClient::new(work_dir.join("blocks"), config.workers, store.clone());
        let shipper = Shipper::new(BloomStore::new(client, periods));

        BloomDSTHarness {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            result: BloomDSTResult::new(config.seed),
            config,
            store,
            shipper,
            work_dir,
            table,
            metas: Vec::new(),
            contents: HashMap::new(),
            deleted: HashSet::new(),
            next_block_id: 0,
        }
    }

    fn client(&self) -> &BloomClient<DSTStore> {
        self.shipper.store().client()
    }

    /// Run the workload for a specified number of operations
    pub async fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            let op = self.next_operation();
            self.execute_operation(op).await;
        }
    }

    fn next_operation(&mut self) -> BloomOperation {
        let roll: f64 = self.rng.gen();
        if roll < self.config.reclaim_probability {
            BloomOperation::Reclaim
        } else if roll < self.config.reclaim_probability + self.config.compact_probability {
            BloomOperation::Compact
        } else {
            BloomOperation::Query
        }
    }

    async fn execute_operation(&mut self, op: BloomOperation) {
        self.result.total_operations += 1;
        let id = self.result.total_operations;

        let outcome = match op {
            BloomOperation::Compact => {
                self.result.compactions += 1;
                self.execute_compact().await
            }
            BloomOperation::Query => {
                self.result.queries += 1;
                self.execute_query().await
            }
            BloomOperation::Reclaim => {
                self.result.reclaims += 1;
                self.execute_reclaim().await
            }
        };

        match outcome {
            OperationOutcome::Success => self.result.successful_operations += 1,
            OperationOutcome::Failed(_) => self.result.failed_operations += 1,
        }
        self.result.history.push(RecordedOperation {
            id,
            operation: op,
            outcome,
        });

        let live = self.client().directories().live_directories();
        if live != 0 {
            self.result.invariant_violations.push(format!(
                "op {}: {} block directories still referenced",
                id, live
            ));
        }
    }

    fn random_bounds(&mut self) -> FingerprintBounds {
        let min = self.rng.gen_range(0..self.config.keyspace_max);
        let width = self.rng.gen_range(0..self.config.keyspace_max / 4);
        FingerprintBounds::new(min, min.saturating_add(width))
    }

    fn random_interval(&mut self) -> Interval {
        let start = self.rng.gen_range(0..TIME_MAX);
        let len = self.rng.gen_range(1..SPAN_MAX);
        Interval::new(Time(start), Time(start + len))
    }

    async fn execute_compact(&mut self) -> OperationOutcome {
        self.next_block_id += 1;
        let id = self.next_block_id;
        let bounds = self.random_bounds();
        let interval = self.random_interval();
        let len = self.rng.gen_range(1..512);
        let data: Vec<u8> = (0..len).map(|_| self.rng.gen()).collect();

        let src = self.work_dir.join("src").join(id.to_string());
        let metadata = BlockMetadata {
            bounds,
            from: interval.start,
            through: interval.end,
            checksum: id,
        };
        let block = std::fs::create_dir_all(&src)
            .and_then(|()| std::fs::write(src.join(BLOOM_FILE), &data))
            .and_then(|()| {
                Block::from_directory(&self.config.tenant, &self.table, &metadata, &src)
            });
        let _ = std::fs::remove_dir_all(&src);
        let block = match block {
            Ok(block) => block,
            Err(e) => return OperationOutcome::Failed(format!("build block: {}", e)),
        };

        let block_ref = block.block_ref.clone();
        if let Err(e) = self.client().put_block(block).await {
            return OperationOutcome::Failed(e.to_string());
        }
        self.contents.insert(block_ref.clone(), data);

        // Supersede live blocks inside the new block's keyspace at any time,
        // including ones outside the new block's own interval
        let everything = Interval::new(Time(0), Time(TIME_MAX + SPAN_MAX));
        let tombstones: Vec<BlockRef> = blocks_for_metas(&self.metas, everything, &[bounds])
            .into_iter()
            .filter(|b| b.bounds.min >= bounds.min && b.bounds.max <= bounds.max)
            .collect();

        let sources = vec![TsdbIdentifier {
            ts: i64::from(id),
            from: interval.start,
            through: interval.end,
            checksum: id,
        }];
        let blocks = vec![block_ref];
        let meta_ref = MetaRef::from_parts(
            self.client().hashers(),
            &self.config.tenant,
            &self.table,
            bounds,
            &sources,
            &blocks,
        );
        let meta = Meta {
            meta_ref,
            sources,
            block_tombstones: tombstones,
            blocks,
        };

        match self.client().put_meta(&meta).await {
            Ok(()) => {
                self.metas.push(meta);
                OperationOutcome::Success
            }
            Err(e) => OperationOutcome::Failed(e.to_string()),
        }
    }

    async fn execute_query(&mut self) -> OperationOutcome {
        let interval = self.random_interval();
        let keyspace = self.random_bounds();
        let params = MetaSearchParams {
            tenant_id: self.config.tenant.clone(),
            interval,
            keyspace,
        };

        let expected = blocks_for_metas(&self.metas, interval, &[keyspace]);

        let metas = match self.shipper.store().fetch_metas(&params).await {
            Ok(metas) => metas,
            Err(e) => return OperationOutcome::Failed(e.to_string()),
        };
        let selected = blocks_for_metas(&metas, interval, &[keyspace]);
        if selected != expected {
            self.result.invariant_violations.push(format!(
                "query {} {}: selected {} blocks, expected {}",
                interval,
                keyspace,
                selected.len(),
                expected.len()
            ));
        }

        let contents = &self.contents;
        let mut mismatched = Vec::new();
        let mut visited = 0u64;
        let iterated = self
            .shipper
            .for_each(&selected, |querier, bounds| {
                visited += 1;
                let block_ref = querier.block_ref();
                let data = querier.read(BLOOM_FILE)?;
                if block_ref.bounds != bounds || contents.get(block_ref) != Some(&data) {
                    mismatched.push(block_ref.to_string());
                }
                Ok(())
            })
            .await;

        for block in mismatched {
            self.result
                .invariant_violations
                .push(format!("block {} contents do not match upload", block));
        }

        match iterated {
            Ok(()) => {
                self.result.blocks_visited += visited;
                OperationOutcome::Success
            }
            Err(e) => OperationOutcome::Failed(e.to_string()),
        }
    }

    async fn execute_reclaim(&mut self) -> OperationOutcome {
        let pending: HashSet<&BlockRef> = self
            .metas
            .iter()
            .flat_map(|m| m.block_tombstones.iter())
            .filter(|b| !self.deleted.contains(*b))
            .collect();
        let mut refs: Vec<BlockRef> = pending.into_iter().cloned().collect();
        refs.sort_by_key(|b| b.checksum);

        match self.client().delete_blocks(&refs).await {
            Ok(()) => {
                self.deleted.extend(refs);
                OperationOutcome::Success
            }
            Err(e) => OperationOutcome::Failed(e.to_string()),
        }
    }

    /// Check invariants after the run
    pub async fn check_invariants(&mut self) {
        self.result.store_stats = self.store.stats();

        // Invariant 1: concurrency never exceeds the configured limit
        if self.result.store_stats.max_in_flight > self.config.workers {
            self.result.invariant_violations.push(format!(
                "{} concurrent requests exceed limit {}",
                self.result.store_stats.max_in_flight, self.config.workers
            ));
        }

        // Invariant 2: without faults nothing fails
        if self.config.fault_free() && self.result.failed_operations > 0 {
            self.result.invariant_violations.push(format!(
                "{} operations failed without fault injection",
                self.result.failed_operations
            ));
        }

        // Invariant 3: every written meta reads back unchanged
        let verifier = BloomClient::new(
            self.work_dir.join("verify"),
            self.config.workers,
            self.store.inner().clone(),
        );
        let refs: Vec<MetaRef> = self.metas.iter().map(|m| m.meta_ref.clone()).collect();
        match verifier.get_metas(&refs).await {
            Ok(read) if read == self.metas => {}
            Ok(_) => self
                .result
                .invariant_violations
                .push("stored metas differ from written metas".to_string()),
            Err(e) => self
                .result
                .invariant_violations
                .push(format!("written meta unreadable: {}", e)),
        }

        // Invariant 4: live blocks exist, reclaimed blocks do not
        let everything = blocks_for_metas(
            &self.metas,
            Interval::new(Time(0), Time(TIME_MAX + SPAN_MAX)),
            &[FingerprintBounds::new(0, u64::MAX)],
        );
        for block in &everything {
            let key = verifier.key_resolver().block(block).addr;
            if !matches!(self.store.inner().exists(&key).await, Ok(true)) {
                self.result
                    .invariant_violations
                    .push(format!("live block {} missing from store", key));
            }
            if self.deleted.contains(block) {
                self.result
                    .invariant_violations
                    .push(format!("live block {} was reclaimed", key));
            }
        }
        for block in &self.deleted {
            let key = verifier.key_resolver().block(block).addr;
            if matches!(self.store.inner().exists(&key).await, Ok(true)) {
                self.result
                    .invariant_violations
                    .push(format!("reclaimed block {} still stored", key));
            }
        }
    }

    pub fn result(&self) -> &BloomDSTResult {
        &self.result
    }

    pub fn into_result(mut self) -> BloomDSTResult {
        std::mem::replace(&mut self.result, BloomDSTResult::new(self.config.seed))
    }
}

impl Drop for BloomDSTHarness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.work_dir);
    }
}

/// Run a batch of seeds, one fresh harness per seed
pub async fn run_dst_batch(
    start_seed: u64,
    count: usize,
    ops_per_run: usize,
    config_fn: fn(u64) -> BloomDSTConfig,
) -> Vec<BloomDSTResult> {
    let mut results = Vec::with_capacity(count);

    for i in 0..count {
        let seed = start_seed + i as u64;
        let mut harness = BloomDSTHarness::new(config_fn(seed));
        harness.run(ops_per_run).await;
        harness.check_invariants().await;
        results.push(harness.into_result());
    }

    results
}

/// Summary of batch results
pub fn summarize_batch(results: &[BloomDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();

    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();
    let total_failed: u64 = results.iter().map(|r| r.failed_operations).sum();
    let total_visited: u64 = results.iter().map(|r| r.blocks_visited).sum();

    let mut summary = format!(
        "Batch: {}/{} passed, {} total ops, {} failed ops, {} blocks visited",
        passed, total, total_ops, total_failed, total_visited
    );

    if !failed_seeds.is_empty() {
        summary.push_str(&format!("\nFailed seeds: {:?}", failed_seeds));
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dst_harness_calm() {
        let mut harness = BloomDSTHarness::new(BloomDSTConfig::calm(42));

        harness.run(60).await;
        harness.check_invariants().await;

        let result = harness.result();
        assert!(
            result.is_success(),
            "Calm mode should not have invariant violations: {:?}",
            result.invariant_violations
        );
        assert_eq!(result.failed_operations, 0);
        assert!(result.compactions > 0);
    }

    #[tokio::test]
    async fn test_dst_harness_with_faults() {
        let mut harness = BloomDSTHarness::new(BloomDSTConfig::chaos(123));

        harness.run(80).await;
        harness.check_invariants().await;

        let result = harness.result();
        assert_eq!(result.total_operations, 80);
        assert!(
            result.is_success(),
            "Faults must not break invariants: {:?}",
            result.invariant_violations
        );
    }

    #[test]
    fn test_workload_generator_mix() {
        let mut harness = BloomDSTHarness::new(BloomDSTConfig::new(7));

        let mut counts = HashMap::new();
        for _ in 0..1000 {
            *counts.entry(harness.next_operation()).or_insert(0) += 1;
        }

        assert!(counts[&BloomOperation::Compact] > 300);
        assert!(counts[&BloomOperation::Query] > 400);
        assert!(counts[&BloomOperation::Reclaim] > 0);
    }
}
