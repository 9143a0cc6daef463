//! Bloom Store
//!
//! Query-side facade over the storage client. Resolves the daily index
//! tables covering a time range, lists the metas stored for a tenant in
//! each table, and narrows them down by keyspace and interval before
//! fetching their bodies.
//!
//! ```text
//! MetaSearchParams
//!       │ interval ──► find_period ──► index_<day> tables
//!       ▼
//! list bloom/metas/<tenant>/<table>/ ──► parse keys ──► filter ──► get_metas
//! ```

use crate::bloomshipper::block::BlockDirectory;
use crate::bloomshipper::client::{BloomClient, ClientError};
use crate::bloomshipper::config::{self, ConfigError, PeriodConfig};
use crate::bloomshipper::model::{Interval, Time, MILLIS_PER_DAY};
use crate::bloomshipper::object_store::ObjectStore;
use crate::bloomshipper::refs::{BlockRef, Meta, MetaRef, MetaSearchParams};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

/// Error type for store operations
#[derive(Debug)]
pub enum StoreError {
    /// Storage client failure
    Client(ClientError),
    /// No schema period covers part of the requested range
    Period(ConfigError),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Client(e) => write!(f, "{}", e),
            StoreError::Period(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Client(e) => Some(e),
            StoreError::Period(e) => Some(e),
        }
    }
}

impl From<ClientError> for StoreError {
    fn from(e: ClientError) -> Self {
        StoreError::Client(e)
    }
}

impl From<ConfigError> for StoreError {
    fn from(e: ConfigError) -> Self {
        StoreError::Period(e)
    }
}

/// Boxed future returned by store operations
pub type StoreResult<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Source of metas and blocks for the shipper
pub trait Store: Send + Sync {
    /// Metas of a tenant relevant to an interval and keyspace
    fn fetch_metas<'a>(&'a self, params: &'a MetaSearchParams) -> StoreResult<'a, Vec<Meta>>;

    /// Extracted blocks, index-aligned with `refs`
    fn fetch_blocks<'a>(&'a self, refs: &'a [BlockRef]) -> StoreResult<'a, Vec<BlockDirectory>>;

    fn stop(&self);
}

/// `Store` backed by a `BloomClient`
pub struct BloomStore<S: ObjectStore> {
    client: BloomClient<S>,
    periods: Vec<PeriodConfig>,
}

impl<S: ObjectStore> BloomStore<S> {
    pub fn new(client: BloomClient<S>, periods: Vec<PeriodConfig>) -> Self {
        debug_assert!(!periods.is_empty(), "Precondition: at least one period");
        BloomStore { client, periods }
    }

    pub fn client(&self) -> &BloomClient<S> {
        &self.client
    }

    /// Index tables touched by `interval`, one per day, oldest first
    pub fn tables_for_range(&self, interval: Interval) -> Result<Vec<String>, ConfigError> {
        let first = interval.start.day();
        let last = interval.end.day();

        let mut tables = Vec::with_capacity((last - first + 1).max(0) as usize);
        for day in first..=last {
            let ts = Time(day * MILLIS_PER_DAY).max(interval.start);
            let table = config::table_for(&self.periods, ts)?;
            if tables.last() != Some(&table) {
                tables.push(table);
            }
        }
        Ok(tables)
    }

    /// Refs of all metas of a tenant whose bounds overlap the keyspace, in the
    /// tables covering the interval
    pub async fn resolve_metas(&self, params: &MetaSearchParams) -> Result<Vec<MetaRef>, StoreError> {
        let mut refs = Vec::new();
        let resolver = self.client.key_resolver();

        for table in self.tables_for_range(params.interval)? {
            let prefix = resolver.meta_prefix(&params.tenant_id, &table);
            let keys = self.client.list_meta_keys(&prefix).await?;

            for key in keys {
                let meta_ref = resolver.parse_meta_key(&key).map_err(ClientError::from)?;
                // A meta's span only covers the blocks it produced, not its
                // tombstones, so time is filtered per block later
                if meta_ref.bounds.overlaps(params.keyspace) {
                    refs.push(meta_ref);
                }
            }
        }

        debug!(
            tenant = %params.tenant_id,
            interval = %params.interval,
            keyspace = %params.keyspace,
            metas = refs.len(),
            "resolved metas"
        );
        Ok(refs)
    }
}

impl<S: ObjectStore> Store for BloomStore<S> {
    fn fetch_metas<'a>(&'a self, params: &'a MetaSearchParams) -> StoreResult<'a, Vec<Meta>> {
        Box::pin(async move {
            let refs = self.resolve_metas(params).await?;
            Ok(self.client.get_metas(&refs).await?)
        })
    }

    fn fetch_blocks<'a>(&'a self, refs: &'a [BlockRef]) -> StoreResult<'a, Vec<BlockDirectory>> {
        Box::pin(async move { Ok(self.client.get_blocks(refs).await?) })
    }

    fn stop(&self) {
        self.client.stop()
    }
}
