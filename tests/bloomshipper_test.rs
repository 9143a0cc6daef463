//! Bloom Shipper Integration Tests
//!
//! End-to-end scenarios through the public API: compactor-side writes,
//! query-side block selection and iteration, concurrency bounds and
//! failure semantics.

use bloom_shipper::bloomshipper::{
    blocks_for_metas, build_object_store, Block, BlockMetadata, BlockRef, BloomClient,
    BloomStore, BloomStoreConfig, FingerprintBounds, InMemoryObjectStore, Interval,
    LocalFsObjectStore, Meta, MetaRef, MetaSearchParams, ObjectStore, PeriodConfig, Ref,
    Shipper, ShipperError, SimulatedObjectStore, SimulatedStoreConfig, Store, Time,
    TsdbIdentifier,
};
use std::path::Path;
use std::sync::Arc;

const TENANT: &str = "fake";
const TABLE: &str = "index_0";

fn write_block_dir(root: &Path, name: &str, files: &[(&str, &[u8])]) -> std::path::PathBuf {
    let dir = root.join("build").join(name);
    for (file, contents) in files {
        let path = dir.join(file);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }
    dir
}

fn build_block(root: &Path, min: u64, max: u64, from: i64, through: i64, checksum: u32) -> Block {
    let dir = write_block_dir(
        root,
        &format!("{}-{}", min, checksum),
        &[("bloom", format!("bloom-{}", checksum).as_bytes()), ("series", b"series")],
    );
    let metadata = BlockMetadata {
        bounds: FingerprintBounds::new(min, max),
        from: Time(from),
        through: Time(through),
        checksum,
    };
    Block::from_directory(TENANT, TABLE, &metadata, &dir).unwrap()
}

fn meta_for<S: ObjectStore>(
    client: &BloomClient<S>,
    bounds: FingerprintBounds,
    blocks: Vec<BlockRef>,
    tombstones: Vec<BlockRef>,
) -> Meta {
    let sources = vec![TsdbIdentifier {
        ts: 1_700_000_000,
        from: Time(0),
        through: Time(100),
        checksum: 1,
    }];
    Meta {
        meta_ref: MetaRef::from_parts(client.hashers(), TENANT, TABLE, bounds, &sources, &blocks),
        sources,
        block_tombstones: tombstones,
        blocks,
    }
}

// =============================================================================
// Compactor -> query round trip
// =============================================================================

#[tokio::test]
async fn test_tombstoned_block_not_served_end_to_end() {
    let root = tempfile::tempdir().unwrap();
    let config = BloomStoreConfig::local(root.path().join("objects"), root.path().join("work"));
    let object_store = build_object_store(&config).await.unwrap();
    let client = BloomClient::from_config(&config, object_store);

    // Meta A produces b1; meta B tombstones b1 and produces b2
    let b1 = build_block(root.path(), 0, 50, 10, 20, 1);
    let b2 = build_block(root.path(), 0, 50, 15, 25, 2);
    let b1_ref = b1.block_ref.clone();
    let b2_ref = b2.block_ref.clone();
    client.put_block(b1).await.unwrap();
    client.put_block(b2).await.unwrap();

    let meta_a = meta_for(&client, FingerprintBounds::new(0, 100), vec![b1_ref.clone()], vec![]);
    let meta_b = meta_for(&client, FingerprintBounds::new(0, 100), vec![b2_ref.clone()], vec![b1_ref]);
    client.put_meta(&meta_a).await.unwrap();
    client.put_meta(&meta_b).await.unwrap();

    let store = BloomStore::new(client, config.periods.clone());
    let params = MetaSearchParams {
        tenant_id: TENANT.to_string(),
        interval: Interval::new(Time(0), Time(30)),
        keyspace: FingerprintBounds::new(0, 100),
    };
    let metas = store.fetch_metas(&params).await.unwrap();
    assert_eq!(metas.len(), 2);

    let refs = blocks_for_metas(&metas, params.interval, &[params.keyspace]);
    assert_eq!(refs, vec![b2_ref]);

    let shipper = Shipper::new(store);
    let mut seen = Vec::new();
    shipper
        .for_each(&refs, |querier, bounds| {
            seen.push((bounds, querier.read("bloom")?));
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(seen, vec![(FingerprintBounds::new(0, 50), b"bloom-2".to_vec())]);
    assert_eq!(shipper.store().client().directories().live_directories(), 0);
}

#[tokio::test]
async fn test_tombstone_outside_query_still_applies() {
    let root = tempfile::tempdir().unwrap();
    let config = BloomStoreConfig::local(root.path().join("objects"), root.path().join("work"));
    let object_store = build_object_store(&config).await.unwrap();
    let client = BloomClient::from_config(&config, object_store);

    // Meta B's own blocks lie after the query window, its tombstone inside it
    let b1 = build_block(root.path(), 0, 50, 10, 20, 1);
    let b2 = build_block(root.path(), 0, 50, 25, 35, 2);
    let b1_ref = b1.block_ref.clone();
    let b2_ref = b2.block_ref.clone();
    client.put_block(b1).await.unwrap();
    client.put_block(b2).await.unwrap();

    let meta_a = meta_for(&client, FingerprintBounds::new(0, 100), vec![b1_ref.clone()], vec![]);
    let meta_b = meta_for(&client, FingerprintBounds::new(0, 100), vec![b2_ref], vec![b1_ref]);
    client.put_meta(&meta_a).await.unwrap();
    client.put_meta(&meta_b).await.unwrap();
    assert_eq!(meta_b.meta_ref.interval(), Interval::new(Time(25), Time(35)));

    let store = BloomStore::new(client, config.periods.clone());
    let params = MetaSearchParams {
        tenant_id: TENANT.to_string(),
        interval: Interval::new(Time(0), Time(22)),
        keyspace: FingerprintBounds::new(0, 100),
    };
    let metas = store.fetch_metas(&params).await.unwrap();
    assert_eq!(metas.len(), 2);
    assert!(metas.contains(&meta_b));

    let refs = blocks_for_metas(&metas, params.interval, &[params.keyspace]);
    assert!(refs.is_empty(), "tombstoned block selected: {:?}", refs);
}

#[tokio::test]
async fn test_put_block_then_get_block_matches_archive() {
    let root = tempfile::tempdir().unwrap();
    let client = BloomClient::new(
        root.path().join("work"),
        4,
        LocalFsObjectStore::new(root.path().join("objects")),
    );

    let dir = write_block_dir(
        root.path(),
        "src",
        &[("bloom", b"\x00\x01bits"), ("series", b"s"), ("nested/index", b"idx")],
    );
    let metadata = BlockMetadata {
        bounds: FingerprintBounds::new(0x10, 0xff),
        from: Time(1_000),
        through: Time(2_000),
        checksum: 0xdead,
    };
    let block = Block::from_directory(TENANT, TABLE, &metadata, &dir).unwrap();
    let block_ref = block.block_ref.clone();
    client.put_block(block).await.unwrap();

    let stored = root.path().join("objects").join(format!(
        "bloom/blooms/{}/{}/{}",
        TENANT,
        TABLE,
        "0000000000000010-00000000000000ff-00000000000003e8-00000000000007d0-0000dead"
    ));
    assert!(stored.exists());

    let extracted = client.get_block(block_ref.clone()).await.unwrap();
    let querier = extracted.querier();
    assert_eq!(querier.entries().unwrap(), vec!["bloom", "nested/index", "series"]);
    assert_eq!(querier.read("bloom").unwrap(), b"\x00\x01bits");
    assert_eq!(querier.read("nested/index").unwrap(), b"idx");

    // Second handle on the same block shares the directory
    let again = client.get_block(block_ref).await.unwrap();
    assert_eq!(again.path(), extracted.path());
    assert_eq!(again.ref_count(), 2);

    let path = extracted.path().to_path_buf();
    extracted.close();
    assert!(path.exists());
    again.close();
    assert!(!path.exists());
}

// =============================================================================
// Shipper iteration
// =============================================================================

#[tokio::test]
async fn test_for_each_stops_on_second_of_three() {
    let root = tempfile::tempdir().unwrap();
    let client = BloomClient::new(root.path().join("work"), 2, InMemoryObjectStore::new());

    let mut refs = Vec::new();
    for i in 0..3u64 {
        let block = build_block(root.path(), i * 100, i * 100 + 99, 0, 10, i as u32);
        refs.push(block.block_ref.clone());
        client.put_block(block).await.unwrap();
    }

    let shipper = Shipper::new(BloomStore::new(client, vec![PeriodConfig::default()]));
    let mut calls = 0;
    let err = shipper
        .for_each(&refs, |_, _| {
            calls += 1;
            if calls == 2 {
                return Err("second block rejected".into());
            }
            Ok(())
        })
        .await
        .unwrap_err();

    assert_eq!(calls, 2);
    assert!(matches!(err, ShipperError::Callback(_)));
    assert_eq!(err.to_string(), "second block rejected");
    assert_eq!(shipper.store().client().directories().live_directories(), 0);

    let work = root.path().join("work/bloom/blooms");
    let leftovers: Vec<_> = std::fs::read_dir(work.join(TENANT).join(TABLE))
        .map(|entries| entries.collect())
        .unwrap_or_default();
    assert!(leftovers.is_empty(), "extracted directories left behind");
}

#[tokio::test]
async fn test_for_each_missing_block_fails_before_callbacks() {
    let root = tempfile::tempdir().unwrap();
    let client = BloomClient::new(root.path().join("work"), 2, InMemoryObjectStore::new());
    let present = build_block(root.path(), 0, 10, 0, 10, 1);
    let present_ref = present.block_ref.clone();
    client.put_block(present).await.unwrap();

    let missing = BlockRef(Ref::new(
        TENANT,
        TABLE,
        FingerprintBounds::new(11, 20),
        Time(0),
        Time(10),
        2,
    ));

    let shipper = Shipper::new(BloomStore::new(client, vec![PeriodConfig::default()]));
    let mut calls = 0;
    let err = shipper
        .for_each(&[present_ref, missing], |_, _| {
            calls += 1;
            Ok(())
        })
        .await
        .unwrap_err();

    assert_eq!(calls, 0);
    assert!(matches!(err, ShipperError::Store(_)));
    assert_eq!(shipper.store().client().directories().live_directories(), 0);
}

// =============================================================================
// Concurrency bounds and failure semantics
// =============================================================================

#[tokio::test]
async fn test_get_metas_bounded_and_aligned() {
    let root = tempfile::tempdir().unwrap();
    let sim = Arc::new(SimulatedObjectStore::new(
        InMemoryObjectStore::new(),
        7,
        SimulatedStoreConfig::latency_only(500, 3_000),
    ));
    let client = BloomClient::new(root.path(), 3, sim.clone());

    let mut metas = Vec::new();
    for i in 0..24u64 {
        let block = BlockRef(Ref::new(
            TENANT,
            TABLE,
            FingerprintBounds::new(i * 10, i * 10 + 9),
            Time(0),
            Time(10),
            i as u32,
        ));
        let meta = meta_for(&client, block.bounds, vec![block], vec![]);
        client.put_meta(&meta).await.unwrap();
        metas.push(meta);
    }
    sim.reset_stats();

    // Reverse so request order differs from key order
    metas.reverse();
    let refs: Vec<MetaRef> = metas.iter().map(|m| m.meta_ref.clone()).collect();
    let fetched = client.get_metas(&refs).await.unwrap();

    assert_eq!(fetched, metas);
    let stats = sim.stats();
    assert_eq!(stats.get_attempts, 24);
    assert!(
        stats.max_in_flight <= 3,
        "{} requests in flight with a limit of 3",
        stats.max_in_flight
    );
}

#[tokio::test]
async fn test_get_blocks_bounded_and_aligned() {
    let root = tempfile::tempdir().unwrap();
    let sim = Arc::new(SimulatedObjectStore::new(
        InMemoryObjectStore::new(),
        11,
        SimulatedStoreConfig::latency_only(500, 3_000),
    ));
    let client = BloomClient::new(root.path().join("work"), 3, sim.clone());

    let mut refs = Vec::new();
    for i in 0..12u64 {
        let block = build_block(root.path(), i * 10, i * 10 + 9, 0, 10, i as u32);
        refs.push(block.block_ref.clone());
        client.put_block(block).await.unwrap();
    }
    sim.reset_stats();

    // Reverse so request order differs from key order
    refs.reverse();
    let dirs = client.get_blocks(&refs).await.unwrap();

    assert_eq!(dirs.len(), refs.len());
    for (i, dir) in dirs.iter().enumerate() {
        assert_eq!(dir.block_ref(), &refs[i], "directory {} out of order", i);
        assert_eq!(
            dir.querier().read("bloom").unwrap(),
            format!("bloom-{}", refs[i].checksum).into_bytes()
        );
    }
    let stats = sim.stats();
    assert_eq!(stats.get_attempts, 12);
    assert!(
        stats.max_in_flight <= 3,
        "{} requests in flight with a limit of 3",
        stats.max_in_flight
    );

    drop(dirs);
    assert_eq!(client.directories().live_directories(), 0);
}

#[tokio::test]
async fn test_get_metas_fails_fast_on_missing() {
    let root = tempfile::tempdir().unwrap();
    let client = BloomClient::new(root.path(), 2, InMemoryObjectStore::new());

    let stored = meta_for(&client, FingerprintBounds::new(0, 10), vec![], vec![]);
    client.put_meta(&stored).await.unwrap();
    let absent = meta_for(&client, FingerprintBounds::new(20, 30), vec![], vec![]);

    let err = client
        .get_metas(&[stored.meta_ref.clone(), absent.meta_ref.clone()])
        .await
        .unwrap_err();
    assert!(client.is_object_not_found_err(&err));
    assert!(err.to_string().contains(&absent.meta_ref.to_string()));
}

#[tokio::test]
async fn test_delete_is_not_transactional() {
    let root = tempfile::tempdir().unwrap();
    let config = SimulatedStoreConfig {
        delete_fail_prob: 0.5,
        ..SimulatedStoreConfig::no_faults()
    };
    let sim = SimulatedObjectStore::new(InMemoryObjectStore::new(), 3, config);
    let client = BloomClient::new(root.path(), 1, sim.clone());

    let mut refs = Vec::new();
    for i in 0..16u64 {
        let meta = meta_for(&client, FingerprintBounds::new(i, i), vec![], vec![]);
        client.put_meta(&meta).await.unwrap();
        refs.push(meta.meta_ref);
    }

    let result = client.delete_metas(&refs).await;
    let remaining = sim.inner().len();
    match result {
        Ok(()) => assert_eq!(remaining, 0),
        // Deletions before the failure stay deleted
        Err(_) => assert!(remaining > 0 && remaining <= 16),
    }
}

#[tokio::test]
async fn test_stopped_client_rejects_batches() {
    let root = tempfile::tempdir().unwrap();
    let store = BloomStore::new(
        BloomClient::new(root.path(), 2, InMemoryObjectStore::new()),
        vec![PeriodConfig::default()],
    );
    let shipper = Shipper::new(store);
    shipper.stop();
    shipper.stop();

    let refs = vec![BlockRef(Ref::new(
        TENANT,
        TABLE,
        FingerprintBounds::new(0, 1),
        Time(0),
        Time(1),
        0,
    ))];
    let err = shipper.for_each(&refs, |_, _| Ok(())).await.unwrap_err();
    assert!(err.to_string().contains("stopped"));
}

#[tokio::test]
async fn test_config_from_toml_drives_store() {
    let root = tempfile::tempdir().unwrap();
    let toml = format!(
        r#"
        working_directory = "{work}"
        workers = 2
        store_type = "LocalFs"
        local_path = "{objects}"

        [[periods]]
        from = 0
        index_prefix = "index_"
        "#,
        work = root.path().join("work").display(),
        objects = root.path().join("objects").display(),
    );
    let config = BloomStoreConfig::from_toml_str(&toml).unwrap();
    let client = BloomClient::from_config(&config, build_object_store(&config).await.unwrap());
    assert_eq!(client.concurrency(), 2);

    let meta = meta_for(&client, FingerprintBounds::new(0, 10), vec![], vec![]);
    client.put_meta(&meta).await.unwrap();

    let store = BloomStore::new(client, config.periods);
    let metas = store
        .fetch_metas(&MetaSearchParams {
            tenant_id: TENANT.to_string(),
            interval: Interval::new(Time(0), Time(1)),
            keyspace: FingerprintBounds::new(0, 5),
        })
        .await
        .unwrap();
    assert_eq!(metas, vec![meta]);
}
