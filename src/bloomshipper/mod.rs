//! Bloom Block Shipper
//!
//! Storage layer for bloom filter blocks and the metas that describe them.
//! Compactors write blocks and metas; the query path selects live blocks
//! from metas and iterates them locally.
//!
//! ## Architecture
//!
//! ```text
//!  query ─► Store::fetch_metas ─► blocks_for_metas ─► Shipper::for_each
//!                 │                                        │
//!                 ▼                                        ▼
//!            BloomClient ◄──────── fetch_blocks ───────────┘
//!                 │
//!        KeyResolver + ObjectStore ─► working dir ─► BlockDirectory
//! ```
//!
//! ## Key Layout
//!
//! ```text
//! bloom/metas/<tenant>/<table>/<min>-<max>-<start>-<end>-<checksum>
//! bloom/blooms/<tenant>/<table>/<min>-<max>-<start>-<end>-<checksum>
//! ```
//!
//! All numeric fields are fixed-width lowercase hex, so keys sort the same
//! way lexically and numerically.

pub mod archive;
pub mod block;
pub mod checksum;
pub mod client;
pub mod concurrency;
pub mod config;
pub mod dst;
pub mod model;
pub mod object_store;
pub mod refs;
pub mod resolver;
#[cfg(feature = "s3")]
pub mod s3_store;
pub mod shipper;
pub mod simulated_store;
pub mod store;

pub use block::{
    Block, BlockDirectory, BlockMetadata, BlockQuerier, ClosableReadSeekerAdapter,
    DirectoryRegistry, ReadSeekClose,
};
pub use checksum::{crc32c, Crc32c, HasherPool};
pub use client::{BloomClient, ClientError};
pub use config::{
    build_object_store, find_period, BloomStoreConfig, ConfigError, DayTime, LoggingConfig,
    ObjectStoreType, PeriodConfig,
};
pub use model::{BoundsCheck, FingerprintBounds, Interval, Time, TsdbIdentifier};
pub use object_store::{InMemoryObjectStore, ListResult, LocalFsObjectStore, ObjectMeta, ObjectStore};
pub use refs::{BlockRef, Meta, MetaRef, MetaSearchParams, Ref};
pub use resolver::{DefaultKeyResolver, KeyError, KeyResolver, Location, PrefixedResolver};
#[cfg(feature = "s3")]
pub use s3_store::S3ObjectStore;
pub use shipper::{blocks_for_metas, is_outside_range, CallbackError, Shipper, ShipperError};
pub use simulated_store::{SimulatedObjectStore, SimulatedStoreConfig, SimulatedStoreStats};
pub use store::{BloomStore, Store, StoreError};
