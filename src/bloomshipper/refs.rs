//! Block and Meta References
//!
//! A `Ref` is the logical identity of a stored artifact. Its checksum-bearing
//! hash deliberately leaves out the tenant so that artifacts can move between
//! tenants without being re-addressed.
//!
//! `Meta` is the JSON record written once per compaction unit: the index
//! files it was built from, the blocks it produced and the blocks it
//! supersedes (tombstones).

use crate::bloomshipper::checksum::{Crc32c, HasherPool};
use crate::bloomshipper::model::{BoundsCheck, FingerprintBounds, Interval, Time, TsdbIdentifier};
use crate::bloomshipper::resolver::{DefaultKeyResolver, KeyResolver};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::ops::Deref;

/// Logical identity of a block or meta
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ref {
    #[serde(rename = "TenantID")]
    pub tenant_id: String,
    #[serde(rename = "TableName")]
    pub table_name: String,
    #[serde(rename = "Bounds")]
    pub bounds: FingerprintBounds,
    #[serde(rename = "StartTimestamp")]
    pub start_timestamp: Time,
    #[serde(rename = "EndTimestamp")]
    pub end_timestamp: Time,
    #[serde(rename = "Checksum")]
    pub checksum: u32,
}

impl Ref {
    pub fn new(
        tenant_id: impl Into<String>,
        table_name: impl Into<String>,
        bounds: FingerprintBounds,
        start_timestamp: Time,
        end_timestamp: Time,
        checksum: u32,
    ) -> Self {
        let r = Ref {
            tenant_id: tenant_id.into(),
            table_name: table_name.into(),
            bounds,
            start_timestamp,
            end_timestamp,
            checksum,
        };

        #[cfg(debug_assertions)]
        r.verify_invariants();

        r
    }

    /// Write the ref's identity into a running CRC32.
    ///
    /// Encoding: bounds, table name bytes, start (BE u64), end (BE u64),
    /// checksum (BE u32). The tenant is not part of the hash.
    pub fn hash(&self, hasher: &mut Crc32c) {
        self.bounds.hash(hasher);
        hasher.update(self.table_name.as_bytes());
        hasher.update(&(self.start_timestamp.0 as u64).to_be_bytes());
        hasher.update(&(self.end_timestamp.0 as u64).to_be_bytes());
        hasher.update(&self.checksum.to_be_bytes());
    }

    /// Position of a fingerprint relative to the ref's bounds
    pub fn cmp_fingerprint(&self, fp: u64) -> BoundsCheck {
        self.bounds.cmp(fp)
    }

    pub fn interval(&self) -> Interval {
        Interval::new(self.start_timestamp, self.end_timestamp)
    }

    /// TigerStyle: Verify all invariants hold
    ///
    /// # Invariants
    /// - start_timestamp <= end_timestamp
    /// - bounds.min <= bounds.max
    #[cfg(debug_assertions)]
    pub fn verify_invariants(&self) {
        debug_assert!(
            !self.end_timestamp.before(self.start_timestamp),
            "Invariant violated: ref end ({}) before start ({})",
            self.end_timestamp,
            self.start_timestamp
        );
        debug_assert!(
            self.bounds.min <= self.bounds.max,
            "Invariant violated: ref bounds {} are inverted",
            self.bounds
        );
    }
}

/// Ref of a block archive
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockRef(pub Ref);

impl Deref for BlockRef {
    type Target = Ref;

    fn deref(&self) -> &Ref {
        &self.0
    }
}

impl From<Ref> for BlockRef {
    fn from(r: Ref) -> Self {
        BlockRef(r)
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&DefaultKeyResolver.block(self).addr)
    }
}

/// Ref of a meta object
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetaRef(pub Ref);

impl Deref for MetaRef {
    type Target = Ref;

    fn deref(&self) -> &Ref {
        &self.0
    }
}

impl From<Ref> for MetaRef {
    fn from(r: Ref) -> Self {
        MetaRef(r)
    }
}

impl fmt::Display for MetaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&DefaultKeyResolver.meta(self).addr)
    }
}

impl MetaRef {
    /// Derive the ref of a meta from its contents.
    ///
    /// The checksum covers the bounds, every source in order and every
    /// produced block in order. The time span is the min start / max end
    /// over the produced blocks; the first block initializes it.
    pub fn from_parts(
        pool: &HasherPool,
        tenant: &str,
        table: &str,
        bounds: FingerprintBounds,
        sources: &[TsdbIdentifier],
        blocks: &[BlockRef],
    ) -> MetaRef {
        let mut hasher = pool.acquire();

        bounds.hash(&mut hasher);
        for source in sources {
            source.hash(&mut hasher);
        }

        let mut start = Time::default();
        let mut end = Time::default();
        for (i, block) in blocks.iter().enumerate() {
            if i == 0 || block.start_timestamp.before(start) {
                start = block.start_timestamp;
            }
            if i == 0 || block.end_timestamp.after(end) {
                end = block.end_timestamp;
            }
            block.hash(&mut hasher);
        }

        MetaRef(Ref::new(tenant, table, bounds, start, end, hasher.sum32()))
    }
}

/// Record of one compaction unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// Identity of the meta itself; never serialized, rebuilt from the key
    #[serde(skip)]
    pub meta_ref: MetaRef,

    /// Index files used to generate the blocks
    #[serde(rename = "Sources", default, deserialize_with = "nullable_vec")]
    pub sources: Vec<TsdbIdentifier>,

    /// Blocks from previous compaction rounds superseded by this one
    #[serde(rename = "BlockTombstones", default, deserialize_with = "nullable_vec")]
    pub block_tombstones: Vec<BlockRef>,

    /// Blocks produced by this compaction
    #[serde(rename = "Blocks", default, deserialize_with = "nullable_vec")]
    pub blocks: Vec<BlockRef>,
}

/// Accept `null` for an empty list
fn nullable_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parameters for looking up the metas relevant to a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaSearchParams {
    pub tenant_id: String,
    pub interval: Interval,
    pub keyspace: FingerprintBounds,
}
