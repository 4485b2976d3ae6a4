use std::{fs, sync::Arc, time::Duration};

use alloy_primitives::B256;
use alloy_signer::SignerSync;
use assert_matches::assert_matches;
use slabd_api::{CommitmentEngine, OnChainSession, OnChainSessionStatus};
use slabd_commitment::ReferenceEngine;
use slabd_discovery::{DiscoveryConfig, ProviderDiscovery};
use slabd_erasure::{ReconstructConfig, Reconstructor};
use slabd_ingest::{ErasureIngest, IngestConfig, IngestRequest, IngestResult, PlainIngest};
use slabd_primitives::{
    DealId, ErrorKind, Root, StripeParams,
    constants::{BLOB_SIZE, SCALAR_PAYLOAD, SCALARS_PER_BLOB},
};
use slabd_retrieval::{
    ChunkRecord, DownloadReceipt, FetchReceipt, FetchRequest, FetchResponse, OpenDownload,
    RetrievalConfig, RetrievalDeps, RetrievalError, RetrievalService, SessionRef, SignedRange,
    headers, merkle, unix_now,
};
use slabd_slab::{SlabDirs, layout};
use slabd_storage::{KvStore, MemoryKvStore};
use slabd_storage_redb::RedbKvStore;
use slabd_test_utils::{LocalProviderNetwork, MemoryLedger, fixtures};
use tempfile::{TempDir, tempdir};

const DEAL: DealId = DealId(11);

/// File bytes carried by one blob.
const BLOB_PAYLOAD: u64 = (SCALARS_PER_BLOB * SCALAR_PAYLOAD) as u64;

struct Harness {
    tmp: TempDir,
    ledger: Arc<MemoryLedger>,
    network: Arc<LocalProviderNetwork>,
    discovery: Arc<ProviderDiscovery>,
    reconstructor: Arc<Reconstructor>,
    engine: Arc<dyn CommitmentEngine>,
    dirs: SlabDirs,
    slab: IngestResult,
}

impl Harness {
    async fn new(service_params: &str, path: &str, data: Vec<u8>) -> Self {
        let tmp = tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::new());
        let network = Arc::new(LocalProviderNetwork::new(&tmp.path().join("providers"), 12));
        network.register(&ledger);
        ledger.insert_deal(fixtures::deal(DEAL.0, service_params, network.addresses()));
        ledger.set_epoch(12);

        let discovery = Arc::new(ProviderDiscovery::new(
            ledger.clone(),
            DiscoveryConfig { initial_backoff: Duration::from_millis(1), ..Default::default() },
        ));
        let engine: Arc<dyn CommitmentEngine> = Arc::new(ReferenceEngine::new());
        let dirs = SlabDirs::new(tmp.path().join("node"));
        let config = IngestConfig { parallelism: 4, timeout: Duration::from_secs(120) };
        let request = IngestRequest::new(path, data);

        let params = StripeParams::from_service_params(service_params).unwrap();
        let slab = if params.is_erasure() {
            ErasureIngest::new(engine.clone(), dirs.clone(), discovery.clone(), network.clone(), config)
                .ingest(DEAL, &params, request)
                .await
                .unwrap()
        } else {
            PlainIngest::new(engine.clone(), dirs.clone(), config).ingest(DEAL, request).await.unwrap()
        };
        ledger.set_content_root(DEAL, slab.commitment);

        let reconstructor = Arc::new(Reconstructor::new(
            engine.clone(),
            network.clone(),
            discovery.clone(),
            ReconstructConfig { max_retries: 1, initial_backoff: Duration::from_millis(1) },
        ));
        Self { tmp, ledger, network, discovery, reconstructor, engine, dirs, slab }
    }

    async fn hello() -> Self {
        Self::new("General", fixtures::HELLO_PATH, fixtures::HELLO.to_vec()).await
    }

    fn service(&self, config: RetrievalConfig) -> RetrievalService {
        self.service_with(config, Arc::new(MemoryKvStore::new()))
    }

    fn service_with(&self, config: RetrievalConfig, store: Arc<dyn KvStore>) -> RetrievalService {
        RetrievalService::new(
            RetrievalDeps {
                engine: self.engine.clone(),
                dirs: self.dirs.clone(),
                discovery: self.discovery.clone(),
                reconstructor: self.reconstructor.clone(),
                store,
                provider: fixtures::provider_address(0),
            },
            config,
        )
    }

    fn request(&self, path: &str) -> FetchRequest {
        FetchRequest::new(
            self.slab.commitment.to_string(),
            DEAL,
            fixtures::owner_signer().address(),
            path,
        )
    }

    fn user_unit(&self) -> u64 {
        1 + self.slab.witness_count
    }

    /// The proof must tie the blob holding the range to the slab commitment.
    fn assert_proof(&self, response: &FetchResponse) {
        let unit = fs::read(layout::unit_path(&self.slab.dir, response.unit_index)).unwrap();
        let blob = &unit[response.blob_index * BLOB_SIZE..(response.blob_index + 1) * BLOB_SIZE];
        assert!(self.engine.verify_chain(&response.commitment, &response.proof, blob).unwrap());
    }
}

fn unsigned() -> RetrievalConfig {
    RetrievalConfig { require_signatures: false, ..Default::default() }
}

fn sign(service: &RetrievalService, request: &FetchRequest, nonce: u64) -> SignedRange {
    let expires_at = unix_now() + 300;
    let hash = service.authorizer().signing_hash(&request.typed(nonce, expires_at));
    SignedRange::new(nonce, expires_at, fixtures::owner_signer().sign_hash_sync(&hash).unwrap())
}

fn receipt(request: &FetchRequest, response: &FetchResponse) -> FetchReceipt {
    FetchReceipt {
        session_id: response.fetch_session.unwrap(),
        deal: request.deal,
        epoch: 12,
        provider: fixtures::provider_address(0),
        file_path: request.file_path.clone(),
        range_start: request.range_start,
        range_len: request.range_len,
        bytes_served: response.served_len,
        proof_hash: response.proof_hash,
    }
}

#[tokio::test]
async fn test_plain_signed_fetch_and_ticket() {
    let h = Harness::hello().await;
    let service = h.service(RetrievalConfig::default());
    let request = h.request(fixtures::HELLO_PATH).with_range(6, 5);
    let request = request.clone().with_signature(sign(&service, &request, 1));

    let response = service.fetch(request.clone()).await.unwrap();
    assert_eq!(&response.data[..], b"World");
    assert_eq!(response.served_len, 5);
    assert_eq!(response.file_len, fixtures::HELLO.len() as u64);
    assert_eq!(response.unit_index, h.user_unit());
    assert_eq!(response.download_session, None);
    h.assert_proof(&response);

    let meta = response.headers();
    assert!(meta.contains(&(headers::SERVED_LEN, "5".to_string())));
    assert!(meta.iter().any(|(name, _)| *name == headers::FETCH_SESSION));

    let now = unix_now();
    let ticket = service.submit_fetch_receipt(&receipt(&request, &response), now).unwrap();
    assert_eq!(ticket.epoch, 12);
    assert_eq!(ticket.bytes_served, 5);

    let again = service.submit_fetch_receipt(&receipt(&request, &response), now).unwrap_err();
    assert_eq!(again.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_whole_file_fetch() {
    let h = Harness::hello().await;
    let service = h.service(unsigned());

    let response = service.fetch(h.request(fixtures::HELLO_PATH)).await.unwrap();
    assert_eq!(&response.data[..], fixtures::HELLO);
    assert_eq!(response.range_start, 0);
    h.assert_proof(&response);
}

#[tokio::test]
async fn test_authorization_gate() {
    let h = Harness::hello().await;
    let service = h.service(RetrievalConfig::default());
    let request = h.request(fixtures::HELLO_PATH).with_range(0, 5);

    let unsigned = service.fetch(request.clone()).await.unwrap_err();
    assert_eq!(unsigned.kind(), ErrorKind::Unauthorized);

    let mut stranger = request.clone().with_signature(sign(&service, &request, 1));
    stranger.owner = fixtures::stranger_signer().address();
    assert_matches!(service.fetch(stranger).await, Err(RetrievalError::Unauthorized(_)));

    let expires_at = unix_now() + 300;
    let hash = service.authorizer().signing_hash(&request.typed(2, expires_at));
    let forged = SignedRange::new(
        2,
        expires_at,
        fixtures::stranger_signer().sign_hash_sync(&hash).unwrap(),
    );
    assert_matches!(
        service.fetch(request.clone().with_signature(forged)).await,
        Err(RetrievalError::Unauthorized(_))
    );

    // The forged attempt did not burn nonce 2.
    let genuine = request.clone().with_signature(sign(&service, &request, 2));
    service.fetch(genuine).await.unwrap();
}

#[tokio::test]
async fn test_replay_rejected() {
    let h = Harness::hello().await;
    let service = h.service(RetrievalConfig::default());
    let request = h.request(fixtures::HELLO_PATH).with_range(6, 5);
    let request = request.clone().with_signature(sign(&service, &request, 7));

    service.fetch(request.clone()).await.unwrap();
    let replayed = service.fetch(request).await.unwrap_err();
    assert_eq!(replayed.kind(), ErrorKind::ReplayRejected);
}

#[tokio::test]
async fn test_stale_content_root_conflicts() {
    let h = Harness::hello().await;
    let service = h.service(unsigned());
    let newer = ReferenceEngine::new().aggregate(&[Root::repeat_byte(1)]).unwrap().commitment;
    h.ledger.set_content_root(DEAL, newer);

    let err = service.fetch(h.request(fixtures::HELLO_PATH)).await.unwrap_err();
    assert_matches!(err, RetrievalError::Conflict { expected: Some(root), .. } if root == newer);
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn test_invalid_identifier_and_missing_file() {
    let h = Harness::hello().await;
    let service = h.service(unsigned());

    let mut bad = h.request(fixtures::HELLO_PATH);
    bad.commitment = "0xnot-a-point".into();
    assert_eq!(service.fetch(bad).await.unwrap_err().kind(), ErrorKind::InvalidIdentifier);

    let missing = service.fetch(h.request("nope.txt")).await.unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);

    let past_end = h.request(fixtures::HELLO_PATH).with_range(22, 1);
    assert_eq!(service.fetch(past_end).await.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_cross_blob_range_rejected() {
    let data = fixtures::pattern(300_000);
    let h = Harness::new("General", "big.bin", data.clone()).await;
    let service = h.service(unsigned());

    let crossing = h.request("big.bin").with_range(BLOB_PAYLOAD - 6, 10);
    let err = service.fetch(crossing).await.unwrap_err();
    assert_matches!(err, RetrievalError::Slab(_));
    assert_eq!(err.kind(), ErrorKind::RangeCrossesBoundary);

    let whole = service.fetch(h.request("big.bin")).await.unwrap_err();
    assert_eq!(whole.kind(), ErrorKind::RangeCrossesBoundary);

    let inside = service.fetch(h.request("big.bin").with_range(BLOB_PAYLOAD, 10)).await.unwrap();
    assert_eq!(inside.blob_index, 1);
    assert_eq!(&inside.data[..], &data[BLOB_PAYLOAD as usize..][..10]);
    h.assert_proof(&inside);
}

#[tokio::test]
async fn test_erasure_fetch_with_deleted_data_shard() {
    let data = fixtures::pattern(200_000);
    let h = Harness::new(fixtures::RS_8_4, "data.bin", data.clone()).await;
    let service = h.service(unsigned());
    let unit = h.user_unit();
    fs::remove_file(layout::shard_path(&h.slab.dir, unit, 0)).unwrap();
    assert!(!layout::unit_path(&h.slab.dir, unit).exists());

    let response = service.fetch(h.request("data.bin").with_range(1000, 100)).await.unwrap();
    assert_eq!(&response.data[..], &data[1000..1100]);
    assert_eq!(response.unit_index, unit);
    assert!(layout::unit_path(&h.slab.dir, unit).is_file());
    assert_eq!((0..12).map(|i| h.network.fetch_count(i)).sum::<usize>(), 0);
    h.assert_proof(&response);
}

#[tokio::test]
async fn test_erasure_fetch_from_peers() {
    let data = fixtures::pattern(200_000);
    let h = Harness::new(fixtures::RS_8_4, "data.bin", data.clone()).await;
    let service = h.service(unsigned());
    let unit = h.user_unit();
    for slot in 0..12 {
        fs::remove_file(layout::shard_path(&h.slab.dir, unit, slot)).unwrap();
    }

    let response = service.fetch(h.request("data.bin").with_range(0, 31)).await.unwrap();
    assert_eq!(&response.data[..], &data[..31]);
    assert_eq!((0..12).map(|i| h.network.fetch_count(i)).sum::<usize>(), 8);
    h.assert_proof(&response);
}

#[tokio::test]
async fn test_download_session_close() {
    let data = fixtures::pattern(300_000);
    let h = Harness::new("General", "big.bin", data.clone()).await;
    let service = h.service(unsigned());
    let now = unix_now();

    let session = service
        .open_download(
            OpenDownload {
                commitment: h.slab.commitment.to_string(),
                deal: DEAL,
                owner: fixtures::owner_signer().address(),
                file_path: "big.bin".into(),
                window_start: 0,
                window_len: 0,
                signed: None,
            },
            now,
        )
        .await
        .unwrap();

    let mut chunks = Vec::new();
    for start in [0, BLOB_PAYLOAD, 2 * BLOB_PAYLOAD] {
        let request = h
            .request("big.bin")
            .with_range(start, 4096)
            .with_session(SessionRef::Download(session.id));
        let response = service.fetch(request).await.unwrap();
        assert_eq!(response.download_session, Some(session.id));
        assert_eq!(response.fetch_session, None);
        assert_eq!(&response.data[..], &data[start as usize..][..response.served_len as usize]);
        chunks.push(ChunkRecord {
            range_start: start,
            range_len: response.served_len,
            proof_hash: response.proof_hash,
        });
    }
    assert_eq!(service.fetch_sessions().evict_expired(now).unwrap(), 0);

    let total_bytes = chunks.iter().map(|c| c.range_len).sum();
    let wrong = DownloadReceipt { session_id: session.id, total_bytes, chunk_root: B256::ZERO };
    assert_matches!(service.close_download(&wrong, now), Err(RetrievalError::ReceiptMismatch(_)));

    let receipt =
        DownloadReceipt { session_id: session.id, total_bytes, chunk_root: merkle::chunk_root(&chunks) };
    let closed = service.close_download(&receipt, now).unwrap();
    assert_eq!(closed.chunks, chunks);
    assert_eq!(service.close_download(&receipt, now).unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_onchain_session_validated_before_serving() {
    let h = Harness::hello().await;
    let service = h.service(unsigned());
    let mut onchain = OnChainSession {
        id: B256::repeat_byte(0x42),
        deal: DEAL,
        owner: fixtures::owner_signer().address(),
        provider: fixtures::provider_address(0),
        content_root: h.slab.commitment,
        file_path: fixtures::HELLO_PATH.into(),
        range_start: 0,
        range_len: 0,
        expires_at: unix_now() + 300,
        status: OnChainSessionStatus::Open,
    };
    h.ledger.insert_session(onchain.clone());

    let request = h
        .request(fixtures::HELLO_PATH)
        .with_range(6, 5)
        .with_session(SessionRef::OnChain(onchain.id));
    let response = service.fetch(request.clone()).await.unwrap();
    assert_eq!(response.download_session, Some(onchain.id));
    assert_eq!(service.downloads().onchain_chunks(&onchain.id).unwrap().len(), 1);

    onchain.status = OnChainSessionStatus::Completed;
    h.ledger.insert_session(onchain.clone());
    assert_eq!(service.fetch(request).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(service.downloads().onchain_chunks(&onchain.id).unwrap().len(), 1);

    let unknown = h
        .request(fixtures::HELLO_PATH)
        .with_session(SessionRef::OnChain(B256::repeat_byte(0x43)));
    assert_eq!(service.fetch(unknown).await.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_out_of_window_chunk_rejected_before_rebuild() {
    let data = fixtures::pattern(200_000);
    let h = Harness::new(fixtures::RS_8_4, "data.bin", data).await;
    let service = h.service(unsigned());
    let unit = h.user_unit();
    let unit_path = layout::unit_path(&h.slab.dir, unit);
    fs::remove_file(layout::shard_path(&h.slab.dir, unit, 0)).unwrap();
    let now = unix_now();

    let session = service
        .open_download(
            OpenDownload {
                commitment: h.slab.commitment.to_string(),
                deal: DEAL,
                owner: fixtures::owner_signer().address(),
                file_path: "data.bin".into(),
                window_start: 0,
                window_len: 100,
                signed: None,
            },
            now,
        )
        .await
        .unwrap();
    for (start, len) in [(1000, 100), (50, 100)] {
        let request = h
            .request("data.bin")
            .with_range(start, len)
            .with_session(SessionRef::Download(session.id));
        assert_matches!(service.fetch(request).await, Err(RetrievalError::InvalidRequest(_)));
    }
    assert!(!unit_path.exists());
    assert!(service.downloads().get(&session.id, now).unwrap().chunks.is_empty());

    let onchain = OnChainSession {
        id: B256::repeat_byte(0x44),
        deal: DEAL,
        owner: fixtures::owner_signer().address(),
        provider: fixtures::provider_address(0),
        content_root: h.slab.commitment,
        file_path: "data.bin".into(),
        range_start: 0,
        range_len: 100,
        expires_at: now + 300,
        status: OnChainSessionStatus::Open,
    };
    h.ledger.insert_session(onchain.clone());
    let request = h
        .request("data.bin")
        .with_range(1000, 100)
        .with_session(SessionRef::OnChain(onchain.id));
    assert_matches!(service.fetch(request).await, Err(RetrievalError::InvalidRequest(_)));
    assert!(!unit_path.exists());
    assert!(service.downloads().onchain_chunks(&onchain.id).unwrap().is_empty());

    let inside = h
        .request("data.bin")
        .with_range(10, 20)
        .with_session(SessionRef::Download(session.id));
    service.fetch(inside).await.unwrap();
    assert!(unit_path.is_file());
}

#[tokio::test]
async fn test_rejected_range_keeps_nonce() {
    let data = fixtures::pattern(300_000);
    let h = Harness::new("General", "big.bin", data).await;
    let service = h.service(RetrievalConfig::default());

    let crossing = h.request("big.bin").with_range(BLOB_PAYLOAD - 6, 10);
    let signed = crossing.clone().with_signature(sign(&service, &crossing, 9));
    assert_eq!(service.fetch(signed).await.unwrap_err().kind(), ErrorKind::RangeCrossesBoundary);

    let inside = h.request("big.bin").with_range(0, 10);
    let signed = inside.clone().with_signature(sign(&service, &inside, 9));
    service.fetch(signed.clone()).await.unwrap();
    assert_eq!(service.fetch(signed).await.unwrap_err().kind(), ErrorKind::ReplayRejected);
}

#[tokio::test]
async fn test_tickets_survive_restart_with_redb() {
    let h = Harness::hello().await;
    let db = h.tmp.path().join("sessions.redb");
    let request = h.request(fixtures::HELLO_PATH).with_range(6, 5);

    let response = {
        let store: Arc<dyn KvStore> = Arc::new(RedbKvStore::open(&db).unwrap());
        let service = h.service_with(unsigned(), store);
        service.fetch(request.clone()).await.unwrap()
    };

    let store: Arc<dyn KvStore> = Arc::new(RedbKvStore::open(&db).unwrap());
    let restarted = h.service_with(unsigned(), store);
    restarted.submit_fetch_receipt(&receipt(&request, &response), unix_now()).unwrap();
}
