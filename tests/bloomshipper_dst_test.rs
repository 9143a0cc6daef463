//! Bloom Shipper DST Tests
//!
//! Seed-based simulation of compactors and queriers sharing one object
//! store. Each run interleaves compactions (block + meta upload with
//! tombstones), queries (selection + iteration) and reclaims (block
//! deletion) against a fault-injecting store, then checks the shadow model.
//!
//! ## Test Categories
//!
//! - **Calm tests**: Latency only, every operation must succeed
//! - **Moderate tests**: Some faults, verify resilience
//! - **Chaos tests**: Many faults, stress test

use bloom_shipper::bloomshipper::dst::{
    run_dst_batch, summarize_batch, BloomDSTConfig, BloomDSTHarness,
};
use bloom_shipper::bloomshipper::SimulatedStoreConfig;

// =============================================================================
// Single Seed Tests
// =============================================================================

#[tokio::test]
async fn test_bloom_dst_single_calm() {
    let mut harness = BloomDSTHarness::new(BloomDSTConfig::calm(12345));

    harness.run(300).await;
    harness.check_invariants().await;

    let result = harness.result();
    println!("{}", result.summary());

    assert!(
        result.is_success(),
        "Calm mode should not violate invariants: {:?}",
        result.invariant_violations
    );
    assert_eq!(result.total_operations, 300);
    assert_eq!(result.failed_operations, 0);
    assert!(result.queries > 0);
}

#[tokio::test]
async fn test_bloom_dst_single_moderate() {
    let mut harness = BloomDSTHarness::new(BloomDSTConfig::moderate(54321));

    harness.run(200).await;
    harness.check_invariants().await;

    let result = harness.result();
    println!("{}", result.summary());

    assert_eq!(result.total_operations, 200);
}

#[tokio::test]
async fn test_bloom_dst_single_chaos() {
    let mut harness = BloomDSTHarness::new(BloomDSTConfig::chaos(99999));

    harness.run(150).await;
    harness.check_invariants().await;

    let result = harness.result();
    println!("{}", result.summary());
    println!("Store stats: {:?}", result.store_stats);

    assert_eq!(result.total_operations, 150);
    assert!(result.failed_operations > 0, "chaos run saw no failures");
}

// =============================================================================
// Multi-Seed Batch Tests
// =============================================================================

#[tokio::test]
async fn test_bloom_dst_50_seeds_calm() {
    let results = run_dst_batch(0, 50, 60, BloomDSTConfig::calm).await;

    let summary = summarize_batch(&results);
    println!("50 Seeds Calm:\n{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(
        passed,
        results.len(),
        "All calm runs should pass. Failed seeds: {:?}",
        results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| r.seed)
            .collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_bloom_dst_50_seeds_moderate() {
    let results = run_dst_batch(1000, 50, 60, BloomDSTConfig::moderate).await;

    let summary = summarize_batch(&results);
    println!("50 Seeds Moderate:\n{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert!(
        passed >= 40,
        "At least 80% of moderate runs should pass. Passed: {}/{}",
        passed,
        results.len()
    );
}

#[tokio::test]
async fn test_bloom_dst_25_seeds_chaos() {
    let results = run_dst_batch(2000, 25, 60, BloomDSTConfig::chaos).await;

    let summary = summarize_batch(&results);
    println!("25 Seeds Chaos:\n{}", summary);

    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();
    assert_eq!(total_ops, 25 * 60, "Should complete all operations");
}

// =============================================================================
// Stress Tests
// =============================================================================

#[tokio::test]
async fn test_bloom_dst_reclaim_heavy() {
    let mut config = BloomDSTConfig::calm(7777);
    config.compact_probability = 0.6;
    config.reclaim_probability = 0.2;
    // Narrow keyspace so compactions supersede each other often
    config.keyspace_max = 1 << 10;

    let mut harness = BloomDSTHarness::new(config);
    harness.run(400).await;
    harness.check_invariants().await;

    let result = harness.result();
    println!("Reclaim heavy:\n{}", result.summary());

    assert!(result.is_success(), "{:?}", result.invariant_violations);
    assert!(result.reclaims > 0);
}

// =============================================================================
// Determinism Verification
// =============================================================================

#[tokio::test]
async fn test_bloom_dst_determinism() {
    // Sequential requests keep the fault rolls in a fixed order
    async fn run_seed(seed: u64) -> (u64, u64, u64, u64) {
        let mut config = BloomDSTConfig::moderate(seed);
        config.workers = 1;
        config.store_config = SimulatedStoreConfig {
            latency_range_us: (0, 0),
            ..config.store_config
        };

        let mut harness = BloomDSTHarness::new(config);
        harness.run(100).await;
        harness.check_invariants().await;
        let result = harness.result();
        (
            result.successful_operations,
            result.failed_operations,
            result.compactions,
            result.blocks_visited,
        )
    }

    let seed = 42424242;
    let run1 = run_seed(seed).await;
    let run2 = run_seed(seed).await;

    assert_eq!(
        run1, run2,
        "Same seed should produce identical results: {:?} vs {:?}",
        run1, run2
    );
}
