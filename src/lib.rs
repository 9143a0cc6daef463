pub mod bloomshipper;
pub mod observability;

pub use bloomshipper::{
    blocks_for_metas, BlockRef, BloomClient, BloomStore, BloomStoreConfig, Meta, MetaRef,
    ObjectStore, Shipper, Store,
};
