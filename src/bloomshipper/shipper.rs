//! Shipper
//!
//! Block selection for a query and callback-driven iteration over the
//! selected blocks. Selection is pure: it resolves tombstones across all
//! metas and keeps the live blocks overlapping the query, sorted by
//! fingerprint bounds.

use crate::bloomshipper::block::BlockQuerier;
use crate::bloomshipper::model::{FingerprintBounds, Interval};
use crate::bloomshipper::refs::{BlockRef, Meta};
use crate::bloomshipper::store::{Store, StoreError};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Error returned by a `for_each` callback
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Error type for shipper operations
#[derive(Debug)]
pub enum ShipperError {
    /// Fetching blocks failed
    Store(StoreError),
    /// The store returned a different number of blocks than requested
    CountMismatch { requested: usize, fetched: usize },
    /// The callback failed; iteration stopped
    Callback(CallbackError),
}

impl fmt::Display for ShipperError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShipperError::Store(e) => write!(f, "{}", e),
            ShipperError::CountMismatch { requested, fetched } => write!(
                f,
                "number of response ({}) does not match number of requests ({})",
                fetched, requested
            ),
            ShipperError::Callback(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ShipperError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ShipperError::Store(e) => Some(e),
            ShipperError::CountMismatch { .. } => None,
            ShipperError::Callback(e) => Some(e.as_ref()),
        }
    }
}

impl From<StoreError> for ShipperError {
    fn from(e: StoreError) -> Self {
        ShipperError::Store(e)
    }
}

/// Iterates fetched blocks on behalf of the query path
pub struct Shipper<S: Store> {
    store: S,
}

impl<S: Store> Shipper<S> {
    pub fn new(store: S) -> Self {
        Shipper { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fetch `refs` and run `callback` on each block in order.
    ///
    /// Each directory is released right after its callback returns. The
    /// first callback error stops the iteration; blocks not yet visited are
    /// released when the batch is dropped.
    pub async fn for_each<F>(&self, refs: &[BlockRef], mut callback: F) -> Result<(), ShipperError>
    where
        F: FnMut(&BlockQuerier<'_>, FingerprintBounds) -> Result<(), CallbackError>,
    {
        let directories = self.store.fetch_blocks(refs).await?;

        if directories.len() != refs.len() {
            return Err(ShipperError::CountMismatch {
                requested: refs.len(),
                fetched: directories.len(),
            });
        }

        for (idx, directory) in directories.into_iter().enumerate() {
            let result = callback(&directory.querier(), directory.bounds());
            directory.close();
            if let Err(e) = result {
                debug!(block = idx, of = refs.len(), error = %e, "stopping block iteration");
                return Err(ShipperError::Callback(e));
            }
        }

        Ok(())
    }

    pub fn stop(&self) {
        self.store.stop()
    }
}

/// Live blocks from `metas` overlapping `interval` and any of `keyspaces`,
/// sorted by fingerprint bounds.
///
/// A ref tombstoned by any meta is excluded, regardless of which metas also
/// list it as produced.
pub fn blocks_for_metas(
    metas: &[Meta],
    interval: Interval,
    keyspaces: &[FingerprintBounds],
) -> Vec<BlockRef> {
    // block -> is tombstoned
    let mut blocks: HashMap<&BlockRef, bool> = HashMap::new();

    for meta in metas {
        for tombstone in &meta.block_tombstones {
            blocks.insert(tombstone, true);
        }
        for block in &meta.blocks {
            blocks.entry(block).or_insert(false);
        }
    }

    let mut refs: Vec<BlockRef> = blocks
        .into_iter()
        .filter(|(block, tombstoned)| !tombstoned && !is_outside_range(block, interval, keyspaces))
        .map(|(block, _)| block.clone())
        .collect();

    refs.sort_by(block_order);
    refs
}

/// Whether `block` lies outside the time interval or all of the keyspaces.
/// Keyspaces are expected in ascending order.
pub fn is_outside_range(
    block: &BlockRef,
    interval: Interval,
    keyspaces: &[FingerprintBounds],
) -> bool {
    if !interval.overlaps(block.interval()) {
        return true;
    }

    !keyspaces
        .iter()
        .any(|keyspace| keyspace.overlaps(block.bounds))
}

/// Bounds first; the remaining fields only break ties so that the output
/// does not depend on map iteration order
fn block_order(a: &BlockRef, b: &BlockRef) -> Ordering {
    (a.bounds.min, a.bounds.max)
        .cmp(&(b.bounds.min, b.bounds.max))
        .then_with(|| a.start_timestamp.cmp(&b.start_timestamp))
        .then_with(|| a.end_timestamp.cmp(&b.end_timestamp))
        .then_with(|| a.checksum.cmp(&b.checksum))
        .then_with(|| a.tenant_id.cmp(&b.tenant_id))
        .then_with(|| a.table_name.cmp(&b.table_name))
}
