use std::{fs, io::Read, path::Path, sync::Arc, time::Duration};

use assert_matches::assert_matches;
use slabd_api::{CommitmentEngine, SlabTarget};
use slabd_commitment::ReferenceEngine;
use slabd_discovery::{DiscoveryConfig, ProviderDiscovery};
use slabd_ingest::{ErasureIngest, IngestConfig, IngestError, IngestRequest, PlainIngest};
use slabd_primitives::{
    DealId, ErrorKind, StripeParams,
    constants::{MDU_PAYLOAD_CAPACITY, MDU_SIZE},
};
use slabd_slab::{SlabDirs, SlabIndex, layout, resolve_segment};
use slabd_test_utils::{LocalProviderNetwork, MemoryLedger, fixtures};
use tempfile::tempdir;

const DEAL: DealId = DealId(1);

fn engine() -> Arc<dyn CommitmentEngine> {
    Arc::new(ReferenceEngine::new())
}

fn config() -> IngestConfig {
    IngestConfig { parallelism: 4, timeout: Duration::from_secs(120) }
}

fn read(dir: &Path, path: &str, start: u64, len: u64) -> Vec<u8> {
    let index = SlabIndex::load(dir).unwrap();
    let mut segment = resolve_segment(dir, &index, path, start, len).unwrap();
    let mut out = Vec::new();
    segment.reader.read_to_end(&mut out).unwrap();
    out
}

/// Directory names in the deal scope other than published slabs.
fn leftovers(dirs: &SlabDirs) -> Vec<String> {
    match fs::read_dir(dirs.deal_scope(DEAL)) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(layout::STAGING_PREFIX))
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[tokio::test]
async fn test_plain_hello_slab() {
    let tmp = tempdir().unwrap();
    let dirs = SlabDirs::new(tmp.path());
    let ingest = PlainIngest::new(engine(), dirs.clone(), config());

    let result = ingest
        .ingest(DEAL, IngestRequest::new(fixtures::HELLO_PATH, fixtures::HELLO))
        .await
        .unwrap();

    assert_eq!(result.witness_count, 1);
    assert_eq!(result.user_units, 1);
    assert_eq!(result.dir, dirs.canonical(&result.commitment, Some(DEAL)));
    assert!(!result.already_published);
    for n in 0..3 {
        assert_eq!(fs::metadata(layout::unit_path(&result.dir, n)).unwrap().len(), MDU_SIZE as u64);
    }
    assert!(layout::manifest_path(&result.dir).is_file());
    assert!(leftovers(&dirs).is_empty());

    let index = SlabIndex::load(&result.dir).unwrap();
    assert_eq!(index.roots().len(), 2);
    assert_eq!(index.witness_count(), 1);

    assert_eq!(read(&result.dir, fixtures::HELLO_PATH, 0, 0), fixtures::HELLO);
    assert_eq!(read(&result.dir, fixtures::HELLO_PATH, 6, 5), b"World");
}

#[tokio::test]
async fn test_plain_ingest_is_deterministic() {
    let tmp = tempdir().unwrap();
    let ingest = PlainIngest::new(engine(), SlabDirs::new(tmp.path()), config());
    let request = IngestRequest::new("a.txt", &b"same bytes"[..]).with_timestamp(1_700_000_000);

    let first = ingest.ingest(DEAL, request.clone()).await.unwrap();
    let second = ingest.ingest(DEAL, request.clone()).await.unwrap();
    assert_eq!(first.commitment, second.commitment);
    assert!(second.already_published);

    let other = ingest.ingest(DEAL, request.with_timestamp(1_700_000_001)).await.unwrap();
    assert_ne!(other.commitment, first.commitment);
}

#[tokio::test]
async fn test_append_creates_new_slab() {
    let tmp = tempdir().unwrap();
    let dirs = SlabDirs::new(tmp.path());
    let ingest = PlainIngest::new(engine(), dirs.clone(), config());

    let base = ingest
        .ingest(DEAL, IngestRequest::new(fixtures::HELLO_PATH, fixtures::HELLO))
        .await
        .unwrap();
    let base_unit0 = fs::read(layout::unit_path(&base.dir, 0)).unwrap();
    let base_user = fs::read(layout::unit_path(&base.dir, 2)).unwrap();

    let appended = ingest
        .append(DEAL, &base.commitment, IngestRequest::new("b.txt", &b"second file"[..]))
        .await
        .unwrap();

    assert_ne!(appended.commitment, base.commitment);
    assert_ne!(appended.dir, base.dir);
    // 22 bytes round up to 31.
    assert_eq!(appended.file.start, 31);

    let listed: Vec<_> = SlabIndex::load(&appended.dir)
        .unwrap()
        .list()
        .into_iter()
        .map(|f| f.path.clone())
        .collect();
    assert_eq!(listed, ["b.txt", "hello.txt"]);
    assert_eq!(read(&appended.dir, "b.txt", 0, 0), b"second file");
    assert_eq!(read(&appended.dir, fixtures::HELLO_PATH, 0, 0), fixtures::HELLO);

    // The base slab is untouched.
    assert_eq!(fs::read(layout::unit_path(&base.dir, 0)).unwrap(), base_unit0);
    assert_eq!(fs::read(layout::unit_path(&base.dir, 2)).unwrap(), base_user);
    let base_files = SlabIndex::load(&base.dir).unwrap();
    assert_eq!(base_files.list().len(), 1);
}

#[tokio::test]
async fn test_append_to_missing_slab() {
    let tmp = tempdir().unwrap();
    let ingest = PlainIngest::new(engine(), SlabDirs::new(tmp.path()), config());
    let stray = ReferenceEngine::new().aggregate(&[slabd_primitives::Root::repeat_byte(3)]).unwrap();

    let err = ingest
        .append(DEAL, &stray.commitment, IngestRequest::new("b.txt", &b"x"[..]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_plain_file_spanning_units() {
    let tmp = tempdir().unwrap();
    let ingest = PlainIngest::new(engine(), SlabDirs::new(tmp.path()), config());
    let data = fixtures::pattern(MDU_PAYLOAD_CAPACITY as usize + 1000);

    let result = ingest.ingest(DEAL, IngestRequest::new("big.bin", data.clone())).await.unwrap();
    assert_eq!(result.user_units, 2);
    assert_eq!(result.witness_count, 1);

    let tail_start = MDU_PAYLOAD_CAPACITY - 10;
    assert_eq!(read(&result.dir, "big.bin", tail_start, 0), &data[tail_start as usize..]);
}

#[tokio::test]
async fn test_empty_path_rejected() {
    let tmp = tempdir().unwrap();
    let ingest = PlainIngest::new(engine(), SlabDirs::new(tmp.path()), config());
    let err = ingest.ingest(DEAL, IngestRequest::new("", &b"x"[..])).await.unwrap_err();
    assert_matches!(err, IngestError::InvalidRequest(_));
}

#[tokio::test]
async fn test_timeout_publishes_nothing() {
    let tmp = tempdir().unwrap();
    let dirs = SlabDirs::new(tmp.path());
    let ingest = PlainIngest::new(
        engine(),
        dirs.clone(),
        IngestConfig { parallelism: 1, timeout: Duration::ZERO },
    );

    let data = fixtures::pattern(3 * MDU_PAYLOAD_CAPACITY as usize);
    let err = ingest.ingest(DEAL, IngestRequest::new("slow.bin", data)).await.unwrap_err();
    assert_matches!(err, IngestError::Timeout(_));
    assert_eq!(err.kind(), ErrorKind::Timeout);

    let published = fs::read_dir(dirs.deal_scope(DEAL))
        .map(|entries| {
            entries
                .filter(|e| {
                    let name = e.as_ref().unwrap().file_name();
                    !name.to_string_lossy().starts_with(layout::STAGING_PREFIX)
                })
                .count()
        })
        .unwrap_or(0);
    assert_eq!(published, 0);
}

struct ErasureSetup {
    _tmp: tempfile::TempDir,
    dirs: SlabDirs,
    network: Arc<LocalProviderNetwork>,
    ingest: ErasureIngest,
    params: StripeParams,
}

fn erasure_setup() -> ErasureSetup {
    let tmp = tempdir().unwrap();
    let dirs = SlabDirs::new(tmp.path().join("local"));
    let ledger = Arc::new(MemoryLedger::new());
    let network = Arc::new(LocalProviderNetwork::new(&tmp.path().join("providers"), 12));
    network.register(&ledger);
    ledger.insert_deal(fixtures::deal(DEAL.0, fixtures::RS_8_4, network.addresses()));

    let discovery = Arc::new(ProviderDiscovery::new(
        ledger,
        DiscoveryConfig { initial_backoff: Duration::from_millis(1), ..Default::default() },
    ));
    let ingest = ErasureIngest::new(engine(), dirs.clone(), discovery, network.clone(), config());
    let params = StripeParams::from_service_params(fixtures::RS_8_4).unwrap();
    ErasureSetup { _tmp: tmp, dirs, network, ingest, params }
}

#[tokio::test]
async fn test_erasure_layout_and_distribution() {
    let s = erasure_setup();
    let data = fixtures::pattern(200_000);

    let result = s.ingest.ingest(DEAL, &s.params, IngestRequest::new("blob.bin", data)).await.unwrap();
    assert_eq!(result.user_units, 1);
    assert_eq!(result.witness_count, 1);

    // Local slab: unit #0, one witness unit, shards only for the user unit.
    assert!(layout::unit_path(&result.dir, 0).is_file());
    assert!(layout::unit_path(&result.dir, 1).is_file());
    assert!(!layout::unit_path(&result.dir, 2).exists());
    for slot in 0..12 {
        let shard = fs::read(layout::shard_path(&result.dir, 2, slot)).unwrap();
        assert_eq!(shard.len(), MDU_SIZE / 8);
    }
    assert_eq!(SlabIndex::load(&result.dir).unwrap().witness_count(), 1);

    // Every provider has the metadata and exactly its own shard.
    let target = SlabTarget::new(DEAL, result.commitment);
    for slot in 0..12 {
        let inbox = s.network.inbox(slot);
        let dir = inbox.dirs().canonical(&result.commitment, Some(DEAL));
        assert!(layout::unit_path(&dir, 0).is_file());
        assert!(layout::unit_path(&dir, 1).is_file());
        assert!(layout::manifest_path(&dir).is_file());
        assert!(inbox.fetch_shard(&target, 2, slot).is_ok());
        assert!(inbox.fetch_shard(&target, 2, (slot + 1) % 12).is_err());
    }
    assert!(leftovers(&s.dirs).is_empty());
}

#[tokio::test]
async fn test_erasure_ingest_is_idempotent() {
    let s = erasure_setup();
    let request = IngestRequest::new("blob.bin", fixtures::pattern(50_000)).with_timestamp(42);

    let first = s.ingest.ingest(DEAL, &s.params, request.clone()).await.unwrap();
    let unit0 = layout::unit_path(&first.dir, 0);
    let before = fs::read(&unit0).unwrap();
    let mtime = fs::metadata(&unit0).unwrap().modified().unwrap();
    let uploads: Vec<_> = (0..12).map(|i| s.network.upload_count(i)).collect();

    let second = s.ingest.ingest(DEAL, &s.params, request).await.unwrap();
    assert_eq!(second.commitment, first.commitment);
    assert_eq!(second.dir, first.dir);
    assert!(second.already_published);

    assert_eq!(fs::read(&unit0).unwrap(), before);
    assert_eq!(fs::metadata(&unit0).unwrap().modified().unwrap(), mtime);
    assert_eq!((0..12).map(|i| s.network.upload_count(i)).collect::<Vec<_>>(), uploads);
    assert!(leftovers(&s.dirs).is_empty());
}

#[tokio::test]
async fn test_erasure_upload_failure_publishes_nothing() {
    let s = erasure_setup();
    s.network.set_offline(5, true);

    let err = s
        .ingest
        .ingest(DEAL, &s.params, IngestRequest::new("blob.bin", fixtures::pattern(10_000)))
        .await
        .unwrap_err();
    assert_matches!(err, IngestError::Upload { slot: 5, .. });
    assert_eq!(err.kind(), ErrorKind::Unavailable);

    let scope = s.dirs.deal_scope(DEAL);
    let entries: Vec<_> = fs::read_dir(&scope).map(|e| e.collect()).unwrap_or_default();
    assert!(entries.is_empty(), "unexpected entries in {}", scope.display());
}

#[tokio::test]
async fn test_erasure_rejects_plain_params() {
    let s = erasure_setup();
    let err = s
        .ingest
        .ingest(DEAL, &StripeParams::plain(), IngestRequest::new("a", &b"x"[..]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}
