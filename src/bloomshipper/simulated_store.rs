//! Simulated Object Store with Fault Injection
//!
//! Wraps another store and injects failures, corruption and latency from a
//! seeded RNG, so a failing run can be replayed from its seed. Also records
//! how many requests were in flight at once, which lets tests check the
//! client's concurrency limit.

use crate::bloomshipper::object_store::{ListResult, ObjectMeta, ObjectStore, StoreFuture};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::io::{Error as IoError, ErrorKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    /// Probability of PUT operation failure
    pub put_fail_prob: f64,
    /// Probability of GET operation failure
    pub get_fail_prob: f64,
    /// Probability of GET returning corrupted data
    pub get_corrupt_prob: f64,
    /// Probability of DELETE failure
    pub delete_fail_prob: f64,
    /// Probability of operation timeout
    pub timeout_prob: f64,
    /// Simulated latency range in microseconds (min, max)
    pub latency_range_us: (u64, u64),
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            put_fail_prob: 0.01,             // 1%
            get_fail_prob: 0.01,             // 1%
            get_corrupt_prob: 0.001,         // 0.1%
            delete_fail_prob: 0.01,          // 1%
            timeout_prob: 0.005,             // 0.5%
            latency_range_us: (100, 10_000), // 0.1ms - 10ms
        }
    }
}

impl SimulatedStoreConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            put_fail_prob: 0.05,
            get_fail_prob: 0.05,
            get_corrupt_prob: 0.01,
            delete_fail_prob: 0.05,
            timeout_prob: 0.02,
            latency_range_us: (100, 2_000),
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            put_fail_prob: 0.0,
            get_fail_prob: 0.0,
            get_corrupt_prob: 0.0,
            delete_fail_prob: 0.0,
            timeout_prob: 0.0,
            latency_range_us: (0, 0),
        }
    }

    /// No faults, only latency - for concurrency testing
    pub fn latency_only(min_us: u64, max_us: u64) -> Self {
        SimulatedStoreConfig {
            latency_range_us: (min_us, max_us),
            ..Self::no_faults()
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default)]
pub struct SimulatedStoreStats {
    pub put_attempts: u64,
    pub put_failures: u64,
    pub get_attempts: u64,
    pub get_failures: u64,
    pub get_corruptions: u64,
    pub delete_attempts: u64,
    pub delete_failures: u64,
    pub timeouts: u64,
    /// Highest number of concurrently outstanding requests observed
    pub max_in_flight: usize,
}

struct SimulatedStoreInner {
    rng: ChaCha8Rng,
    stats: SimulatedStoreStats,
}

/// Simulated object store that wraps another store and injects faults
#[derive(Clone)]
pub struct SimulatedObjectStore<S: ObjectStore> {
    inner_store: S,
    config: SimulatedStoreConfig,
    state: Arc<Mutex<SimulatedStoreInner>>,
    in_flight: Arc<AtomicUsize>,
}

/// Decrements the in-flight counter when a request finishes
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Clone, Copy)]
enum Op {
    Put,
    Get,
    Delete,
}

impl<S: ObjectStore> SimulatedObjectStore<S> {
    /// Create a new simulated store seeded for reproducibility
    pub fn new(inner_store: S, seed: u64, config: SimulatedStoreConfig) -> Self {
        SimulatedObjectStore {
            inner_store,
            config,
            state: Arc::new(Mutex::new(SimulatedStoreInner {
                rng: ChaCha8Rng::seed_from_u64(seed),
                stats: SimulatedStoreStats::default(),
            })),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get current statistics
    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    /// Reset statistics
    pub fn reset_stats(&self) {
        self.state.lock().stats = SimulatedStoreStats::default();
    }

    /// Access the wrapped store
    pub fn inner(&self) -> &S {
        &self.inner_store
    }

    fn enter(&self) -> InFlightGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        let mut state = self.state.lock();
        state.stats.max_in_flight = state.stats.max_in_flight.max(now);
        InFlightGuard(&self.in_flight)
    }

    /// Roll the dice for an operation. Returns the latency to apply or the
    /// injected error.
    fn roll(&self, op: Op) -> Result<Duration, IoError> {
        let mut state = self.state.lock();
        let SimulatedStoreInner { rng, stats } = &mut *state;

        let fail_prob = match op {
            Op::Put => {
                stats.put_attempts += 1;
                self.config.put_fail_prob
            }
            Op::Get => {
                stats.get_attempts += 1;
                self.config.get_fail_prob
            }
            Op::Delete => {
                stats.delete_attempts += 1;
                self.config.delete_fail_prob
            }
        };

        if self.config.timeout_prob > 0.0 && rng.gen_bool(self.config.timeout_prob) {
            stats.timeouts += 1;
            return Err(IoError::new(ErrorKind::TimedOut, "simulated timeout"));
        }

        if fail_prob > 0.0 && rng.gen_bool(fail_prob) {
            match op {
                Op::Put => stats.put_failures += 1,
                Op::Get => stats.get_failures += 1,
                Op::Delete => stats.delete_failures += 1,
            }
            return Err(IoError::new(ErrorKind::Other, "simulated failure"));
        }

        let (min, max) = self.config.latency_range_us;
        let latency_us = if max > min { rng.gen_range(min..max) } else { min };
        Ok(Duration::from_micros(latency_us))
    }

    async fn delay(latency: Duration) {
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

impl<S: ObjectStore> ObjectStore for SimulatedObjectStore<S> {
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let _guard = self.enter();
            let latency = self.roll(Op::Put)?;
            Self::delay(latency).await;
            self.inner_store.put(key, data).await
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let _guard = self.enter();
            let latency = self.roll(Op::Get)?;
            Self::delay(latency).await;

            let mut data = self.inner_store.get(key).await?;

            let mut state = self.state.lock();
            let SimulatedStoreInner { rng, stats } = &mut *state;
            if self.config.get_corrupt_prob > 0.0
                && !data.is_empty()
                && rng.gen_bool(self.config.get_corrupt_prob)
            {
                stats.get_corruptions += 1;
                let idx = rng.gen_range(0..data.len());
                data[idx] ^= 0xFF;
            }

            Ok(data)
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        self.inner_store.exists(key)
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let _guard = self.enter();
            let latency = self.roll(Op::Delete)?;
            Self::delay(latency).await;
            self.inner_store.delete(key).await
        })
    }

    fn list<'a>(
        &'a self,
        prefix: &'a str,
        continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListResult> {
        self.inner_store.list(prefix, continuation_token)
    }

    fn head<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectMeta> {
        self.inner_store.head(key)
    }

    fn is_object_not_found_err(&self, err: &IoError) -> bool {
        self.inner_store.is_object_not_found_err(err)
    }

    fn stop(&self) {
        self.inner_store.stop()
    }
}
