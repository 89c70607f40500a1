//! Black-box scenario tests exercising whole components together through
//! public API only (no internal module paths), the way the teacher's own
//! `io-engine` integration suite drives a `Nexus` through its external
//! surface rather than reaching into bdev internals.

use std::{sync::Arc, time::Duration};

use assert_matches::assert_matches;
use tokio_util::sync::CancellationToken;

use remap_engine::{
    core::{FaultKind, InjectedFault, MemBackend, Op, Request},
    device::{status::DeviceMode, ConstructParams, Device},
    metadata::{MainDeviceFingerprint, MetadataEngine, TargetConfig},
    remap::RemapState,
    BackingDevice, RemapEngineConfig,
};

const MAIN_SECTORS: u64 = 200_000;
const SPARE_SECTORS: u64 = 300_000;

fn construct_params() -> ConstructParams {
    ConstructParams {
        start_sector: 0,
        length_sectors: MAIN_SECTORS,
        target_type_name: "remap".to_string(),
        main_device_path: "main-demo".to_string(),
        spare_device_path: "spare-demo".to_string(),
        main_device_id: None,
    }
}

async fn fresh_device() -> Device {
    let main: Arc<dyn remap_engine::BackingDevice> =
        Arc::new(MemBackend::new("main", MAIN_SECTORS, 512));
    let spare: Arc<dyn remap_engine::BackingDevice> =
        Arc::new(MemBackend::new("spare", SPARE_SECTORS, 512));
    Device::construct(
        main,
        spare,
        construct_params(),
        RemapEngineConfig::default(),
        DeviceMode::Demo,
    )
    .await
    .expect("construct")
}

/// S1 — cold start, no metadata: a zeroed spare initializes a fresh,
/// empty metadata set at version 1.
#[tokio::test]
async fn s1_cold_start_no_metadata() {
    let spare = Arc::new(MemBackend::new("spare", SPARE_SECTORS, 512));
    let engine = MetadataEngine::new(spare.clone(), Duration::from_secs(1));

    assert_matches!(
        engine.load().await,
        Err(remap_engine::metadata::MetadataError::NoValidMetadata)
    );

    let fingerprint = MainDeviceFingerprint::new(uuid::Uuid::nil(), MAIN_SECTORS, 512, 512);
    let target_config = TargetConfig {
        sector_size: 512,
        flags: 0,
    };
    let cancelled = CancellationToken::new();
    let version = engine
        .persist(&[], fingerprint, target_config, &cancelled)
        .await
        .expect("fresh persist");
    assert_eq!(version, 1);

    let loaded = engine.load().await.expect("load after fresh persist");
    assert!(loaded.entries.is_empty());
    assert_eq!(loaded.header.version_counter, 1);
}

/// S2 — a write error on main creates a remap, suppresses the error, and
/// durably advances the metadata version before the entry is observable.
#[tokio::test]
async fn s2_write_error_triggers_remap() {
    let main = Arc::new(MemBackend::new("main", MAIN_SECTORS, 512));
    main.inject_fault(InjectedFault {
        sector: 100,
        write_class: true,
        kind: FaultKind::Medium,
    });
    let spare = Arc::new(MemBackend::new("spare", SPARE_SECTORS, 512));
    let device = Device::construct(
        main.clone(),
        spare,
        construct_params(),
        RemapEngineConfig::default(),
        DeviceMode::Demo,
    )
    .await
    .expect("construct");

    let mut buf = vec![0u8; 512];
    let request = Request::new(Op::Write, 100, 1);
    let result = device.handle_request(request, &mut buf).await;
    assert!(result.is_ok(), "write error must be suppressed: {result:?}");

    let entry = device.index().find(100).expect("remap created");
    assert_eq!(entry.main_sector, 100);
    assert_matches!(entry.state(), RemapState::Pending | RemapState::Active);
    assert!(entry.spare_sector >= remap_engine::metadata::SpareDeviceLayout::data_region_start());
    assert!(device.metadata_version() >= 2);

    // state settles to ACTIVE once the write-ahead persist completes,
    // which for an in-memory spare is synchronous with the call above.
    assert_eq!(device.index().find(100).unwrap().state(), RemapState::Active);

    device.destruct().await;
}

/// S3 — a read error is never suppressed and never creates a remap.
#[tokio::test]
async fn s3_read_error_is_not_suppressed() {
    let main = Arc::new(MemBackend::new("main", MAIN_SECTORS, 512));
    main.inject_fault(InjectedFault {
        sector: 100,
        write_class: false,
        kind: FaultKind::Medium,
    });
    let spare = Arc::new(MemBackend::new("spare", SPARE_SECTORS, 512));
    let device = Device::construct(
        main,
        spare,
        construct_params(),
        RemapEngineConfig::default(),
        DeviceMode::Demo,
    )
    .await
    .expect("construct");

    let mut buf = vec![0u8; 512];
    let request = Request::new(Op::Read, 100, 1);
    let result = device.handle_request(request, &mut buf).await;
    assert!(result.is_err());
    assert!(device.index().find(100).is_none());

    device.destruct().await;
}

/// S4 — the metadata engine survives four of five copies being corrupted,
/// recovering exactly the persisted index.
#[tokio::test]
async fn s4_survives_four_of_five_corruption() {
    let spare = Arc::new(MemBackend::new("spare", SPARE_SECTORS, 512));
    let engine = MetadataEngine::new(spare.clone(), Duration::from_secs(1));
    let fingerprint = MainDeviceFingerprint::new(uuid::Uuid::nil(), MAIN_SECTORS, 512, 512);
    let target_config = TargetConfig {
        sector_size: 512,
        flags: 0,
    };
    let cancelled = CancellationToken::new();

    let entry = remap_engine::RemapEntry::new(50, 5000, 1);
    entry.set_state(RemapState::Active);
    let snapshot = vec![entry.snapshot()];
    engine
        .persist(&snapshot, fingerprint, target_config, &cancelled)
        .await
        .expect("persist");

    // Corrupt four of the five fixed copy slots by scribbling over their
    // first sector (breaks the header's magic/CRC immediately).
    let garbage = vec![0xFFu8; 512];
    for &sector in &[0u64, 1024, 2048, 4096] {
        spare.write_at(sector, 1, &garbage).await.expect("corrupt copy");
    }

    let loaded = engine.load().await.expect("load survives corruption");
    assert_eq!(loaded.valid_copies, 1);
    assert_eq!(loaded.entries.len(), 1);
    assert_eq!(loaded.entries[0].main_sector, 50);
    assert_eq!(loaded.entries[0].spare_sector, 5000);
}

/// S5 — the index grows under load and every previously inserted entry
/// remains findable across the resize, driven through the public
/// `RemapIndex` surface rather than the internal resize-trigger helpers.
#[tokio::test]
async fn s5_resize_grows_and_preserves_entries() {
    let index = remap_engine::RemapIndex::new();
    for i in 0..97u64 {
        let entry = Arc::new(remap_engine::RemapEntry::new(
            i * 10,
            remap_engine::metadata::SpareDeviceLayout::data_region_start() + i,
            1,
        ));
        index.insert(entry).expect("insert");
        if let Some(direction) = index.check_resize_needed() {
            index.resize(direction);
        }
        for j in 0..=i {
            assert!(index.find(j * 10).is_some(), "sector {} lost after insert {}", j * 10, i);
        }
    }
    assert_eq!(index.len(), 97);
}

/// S6 — teardown completes within a bounded timeout even with an I/O and
/// a metadata persist having just been issued.
#[tokio::test]
async fn s6_teardown_is_bounded() {
    let device = fresh_device().await;

    let mut buf = vec![0u8; 512];
    let request = Request::new(Op::Write, 10, 1);
    device
        .handle_request(request, &mut buf)
        .await
        .expect("write completes");
    device.force_save().await.expect("persist issued");

    let result = tokio::time::timeout(Duration::from_secs(10), device.destruct()).await;
    assert!(result.is_ok(), "destruct must return within a bounded timeout");
}

/// A message-driven `add_remap` must reserve its spare range in the
/// free-map the same way a loaded or error-pipeline-created remap does,
/// so a second `add_remap` can't be handed the same spare range, and
/// `remove_remap` hands the range back cleanly.
#[tokio::test]
async fn add_remap_reserves_and_remove_remap_releases_spare_range() {
    let device = fresh_device().await;
    let before = device.status().spare_capacity_remaining_sectors;

    device
        .add_remap(10, 20_000, 4)
        .await
        .expect("add_remap succeeds");
    assert_eq!(
        device.status().spare_capacity_remaining_sectors,
        before - 4,
        "add_remap must reserve its spare range"
    );

    // The same spare range can't be handed out twice.
    let err = device.add_remap(50, 20_000, 4).await;
    assert!(err.is_err(), "overlapping spare range must be rejected");

    device.remove_remap(10).await.expect("remove_remap succeeds");
    assert_eq!(
        device.status().spare_capacity_remaining_sectors,
        before,
        "remove_remap must release the range add_remap reserved"
    );

    device.destruct().await;
}
