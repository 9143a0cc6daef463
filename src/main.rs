use bloom_shipper::bloomshipper::{
    blocks_for_metas, build_object_store, BloomClient, BloomStore, BloomStoreConfig,
    FingerprintBounds, Interval, MetaSearchParams, Store, Time,
};
use bloom_shipper::observability::{init_tracing, InitError};
use std::path::Path;
use tracing::info;

const USAGE: &str = "usage: bloom-shipper <config.toml> <tenant> <start_ms> <end_ms>";

/// Print the live blocks of a tenant for a time range
#[tokio::main]
async fn main() -> Result<(), InitError> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 5 {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    }

    let config = BloomStoreConfig::from_file(Path::new(&args[1]))?;
    init_tracing(&config.logging)?;

    let tenant = args[2].clone();
    let start: i64 = args[3].parse()?;
    let end: i64 = args[4].parse()?;
    if end < start {
        return Err(format!("end ({}) before start ({})", end, start).into());
    }

    let object_store = build_object_store(&config).await?;
    let client = BloomClient::from_config(&config, object_store);
    let store = BloomStore::new(client, config.periods.clone());

    let params = MetaSearchParams {
        tenant_id: tenant,
        interval: Interval::new(Time(start), Time(end)),
        keyspace: FingerprintBounds::new(0, u64::MAX),
    };

    let metas = store.fetch_metas(&params).await?;
    let blocks = blocks_for_metas(&metas, params.interval, &[params.keyspace]);

    for block in &blocks {
        println!("{}", block);
    }
    info!(
        tenant = %params.tenant_id,
        metas = metas.len(),
        blocks = blocks.len(),
        "listed live blocks"
    );

    store.stop();
    Ok(())
}
