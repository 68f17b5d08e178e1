//! The mailbox that turns [`EngineState`] into the single-owner actor
//! described in §5: one task owns the state and drains a channel of
//! [`EngineMessage`]s in order; every other task (periodic schedulers,
//! fetch workers, the host's own API calls) only ever sends a message and
//! awaits its reply.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use paris::Logger;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use weave_sync_types::{Hash256, Offset, Result};

use crate::config::Config;
use crate::disk_space::DiskSpaceMonitor;
use crate::engine::{BlockDescriptor, BlockIndexEntry, ChunkSubmission, EngineState, SizeTaggedTx};
use crate::peer::{PeerClient, PeerId};
use weave_sync_indexes::KVStore;
use weave_sync_storage::ChunkBlobStore;

type Reply<T> = oneshot::Sender<T>;

pub enum EngineMessage {
    Join(Vec<BlockIndexEntry>, Reply<Result<()>>),
    AddTipBlock(BlockDescriptor, Vec<SizeTaggedTx>, Reply<Result<()>>),
    AddBlock(Offset, BlockDescriptor, Vec<SizeTaggedTx>, Reply<()>),
    AddChunk(ChunkSubmission, Reply<Result<()>>),
    AddDataRootToDiskPool(Hash256, Offset, Hash256, Reply<()>),
    MaybeDropDataRootFromDiskPool(Hash256, Offset, Hash256, Reply<()>),
    GetTxData(Hash256, Reply<Result<Vec<u8>>>),
    GetTxOffset(Hash256, Reply<Result<Offset>>),
    GetSyncRecordEtf(Reply<Vec<u8>>),
    GetSyncRecordJson(Reply<serde_json::Value>),
    ProcessOneDiskPoolChunk,
    ExpireDiskPoolDataRoots,
    RunCompaction,
    FetchOne,
    RefreshPeerRecords,
    ExportState(Reply<crate::persist::PersistedState>),
}

fn now_us() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_micros()
}

/// Handle to a running engine actor: `Clone`-able, safe to share across
/// tasks, every method round-trips through the mailbox.
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<EngineMessage>,
}

impl EngineHandle {
    /// Spawns the actor task and returns a handle to it. `kv`/`blobs` are
    /// also published to [`crate::registry`] so `get_chunk_by_offset` and
    /// `get_tx_root_at_offset` work without going through this handle.
    pub fn spawn(kv: Arc<dyn KVStore>, blobs: Arc<dyn ChunkBlobStore>, disk: Arc<dyn DiskSpaceMonitor>, peer_client: Arc<dyn PeerClient>, config: Config) -> Self {
        Self::spawn_with_state(kv, blobs, disk, peer_client, config, None)
    }

    /// Like [`Self::spawn`], but seeds the engine from a previously
    /// persisted state blob (§6 "Persisted state blob"), e.g. on restart.
    pub fn spawn_with_state(
        kv: Arc<dyn KVStore>,
        blobs: Arc<dyn ChunkBlobStore>,
        disk: Arc<dyn DiskSpaceMonitor>,
        peer_client: Arc<dyn PeerClient>,
        config: Config,
        persisted: Option<crate::persist::PersistedState>,
    ) -> Self {
        crate::registry::publish(kv.clone(), blobs.clone());
        let (tx, rx) = mpsc::channel(256);
        let mut state = EngineState::with_disk_monitor(kv, blobs, config, disk);
        if let Some(persisted) = persisted {
            let _ = state.import_state(persisted);
        }
        tokio::spawn(run(state, rx, peer_client));
        Self { sender: tx }
    }

    /// Snapshots `(sync_record, block_index, disk_pool_data_roots,
    /// disk_pool_size)` for the host to persist to disk.
    pub async fn export_state(&self) -> crate::persist::PersistedState {
        let (reply, rx) = oneshot::channel();
        let _ = self.sender.send(EngineMessage::ExportState(reply)).await;
        rx.await.unwrap_or(crate::persist::PersistedState { sync_record: Vec::new(), block_index: Vec::new(), disk_pool: Vec::new(), disk_pool_size: 0 })
    }

    pub async fn join(&self, block_index: Vec<BlockIndexEntry>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        let _ = self.sender.send(EngineMessage::Join(block_index, reply)).await;
        rx.await.unwrap_or(Err(weave_sync_types::SyncError::NotJoined))
    }

    pub async fn add_tip_block(&self, block: BlockDescriptor, txs: Vec<SizeTaggedTx>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        let _ = self.sender.send(EngineMessage::AddTipBlock(block, txs, reply)).await;
        rx.await.unwrap_or(Err(weave_sync_types::SyncError::NotJoined))
    }

    /// Indexes a single block's transactions without touching `weave_size`
    /// or `block_index` — used to replay a range of blocks one at a time
    /// (e.g. while backfilling behind a `join`).
    pub async fn add_block(&self, block_start: Offset, block: BlockDescriptor, txs: Vec<SizeTaggedTx>) {
        let (reply, rx) = oneshot::channel();
        let _ = self.sender.send(EngineMessage::AddBlock(block_start, block, txs, reply)).await;
        let _ = rx.await;
    }

    /// Admits a chunk with a caller-supplied timeout (§5 "Timeouts"):
    /// exceeding it returns `TimedOut` without affecting engine state,
    /// since the mailbox send/reply round trip never mutates state until
    /// the actor itself processes the message.
    pub async fn add_chunk(&self, submission: ChunkSubmission, admit_timeout: std::time::Duration) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        let _ = self.sender.send(EngineMessage::AddChunk(submission, reply)).await;
        match timeout(admit_timeout, rx).await {
            Ok(inner) => inner.unwrap_or(Err(weave_sync_types::SyncError::TimedOut)),
            Err(_) => Err(weave_sync_types::SyncError::TimedOut),
        }
    }

    pub async fn add_data_root_to_disk_pool(&self, data_root: Hash256, tx_size: Offset, tx_id: Hash256) {
        let (reply, rx) = oneshot::channel();
        let _ = self.sender.send(EngineMessage::AddDataRootToDiskPool(data_root, tx_size, tx_id, reply)).await;
        let _ = rx.await;
    }

    pub async fn maybe_drop_data_root_from_disk_pool(&self, data_root: Hash256, tx_size: Offset, tx_id: Hash256) {
        let (reply, rx) = oneshot::channel();
        let _ = self.sender.send(EngineMessage::MaybeDropDataRootFromDiskPool(data_root, tx_size, tx_id, reply)).await;
        let _ = rx.await;
    }

    pub async fn get_tx_data(&self, tx_id: Hash256) -> Result<Vec<u8>> {
        let (reply, rx) = oneshot::channel();
        let _ = self.sender.send(EngineMessage::GetTxData(tx_id, reply)).await;
        rx.await.unwrap_or(Err(weave_sync_types::SyncError::NotFound))
    }

    pub async fn get_tx_offset(&self, tx_id: Hash256) -> Result<Offset> {
        let (reply, rx) = oneshot::channel();
        let _ = self.sender.send(EngineMessage::GetTxOffset(tx_id, reply)).await;
        rx.await.unwrap_or(Err(weave_sync_types::SyncError::NotFound))
    }

    pub async fn get_sync_record_etf(&self) -> Vec<u8> {
        let (reply, rx) = oneshot::channel();
        let _ = self.sender.send(EngineMessage::GetSyncRecordEtf(reply)).await;
        rx.await.unwrap_or_default()
    }

    pub async fn get_sync_record_json(&self) -> serde_json::Value {
        let (reply, rx) = oneshot::channel();
        let _ = self.sender.send(EngineMessage::GetSyncRecordJson(reply)).await;
        rx.await.unwrap_or(serde_json::Value::Array(Vec::new()))
    }

    /// Self-rescheduling periodic ticks (§5 "periodic tasks are
    /// self-rescheduled"); the host's own timer loop fires these at the
    /// frequencies named in `Config`.
    pub async fn tick_fetch_one(&self) {
        let _ = self.sender.send(EngineMessage::FetchOne).await;
    }

    pub async fn tick_refresh_peer_records(&self) {
        let _ = self.sender.send(EngineMessage::RefreshPeerRecords).await;
    }

    pub async fn tick_disk_pool(&self) {
        let _ = self.sender.send(EngineMessage::ProcessOneDiskPoolChunk).await;
    }

    pub async fn tick_expire_disk_pool(&self) {
        let _ = self.sender.send(EngineMessage::ExpireDiskPoolDataRoots).await;
    }

    pub async fn tick_compaction(&self) {
        let _ = self.sender.send(EngineMessage::RunCompaction).await;
    }
}

/// Peer-records refresh (§4.4 second paragraph): sample
/// `pick_peers_out_of_random_n`, shuffle, keep `consult_peer_records_count`,
/// fetch each one's advertised sync record, replace `PeerSyncRecords`
/// atomically.
async fn refresh_peer_records(state: &mut EngineState, peer_client: &Arc<dyn PeerClient>, log: &mut Logger<'_>) {
    let sample = state.peer_records.pick_random(state.config.consult_peer_records_count, state.config.pick_peers_out_of_random_n, &mut rand::thread_rng());

    for peer in sample {
        match peer_client.get_sync_record(&peer).await {
            Ok(record) => state.peer_records.update(peer, record),
            Err(_) => {
                log.warn(format!("peer {peer} failed to answer get_sync_record"));
                state.peer_records.mark_recently_failed(peer);
            }
        }
    }
}

/// One "sync-one" cycle (§4.4 steps 1-9): pick a peer and a sub-interval of
/// bytes it claims to have that we're missing, then walk that sub-interval
/// one chunk at a time, verifying and folding each one in, until it's
/// exhausted. A transport error or a failed proof stops the walk early
/// rather than retrying the same peer in the same tick; the next
/// `RefreshPeerRecords`/`FetchOne` tick naturally excludes it, since
/// `mark_recently_failed`/`drop_peer` already mutated `PeerSyncRecords`.
async fn fetch_one(state: &mut EngineState, peer_client: &Arc<dyn PeerClient>, log: &mut Logger<'_>) {
    if !state.has_disk_space() {
        return;
    }
    let Some((target, next_cursor)) = crate::fetch::pick_target(state, &[], &mut rand::thread_rng()) else {
        return;
    };
    if let Some(cursor) = next_cursor {
        state.missing_cursor = cursor;
    }

    let mut left_bound = target.left_bound;
    while left_bound < target.right_bound {
        match peer_client.get_chunk(&target.peer, left_bound + 1).await {
            Ok(proof) => match crate::fetch::apply_fetched_chunk(state, left_bound + 1, proof) {
                Ok(chunk_size) => left_bound += chunk_size.max(1),
                Err(err) => {
                    log.warn(format!("dropping peer {} after a failed proof: {err}", target.peer));
                    state.peer_records.drop_peer(&target.peer);
                    break;
                }
            },
            Err(_) => {
                state.peer_records.mark_recently_failed(target.peer.clone());
                break;
            }
        }
    }
}

async fn run(mut state: EngineState, mut rx: mpsc::Receiver<EngineMessage>, peer_client: Arc<dyn PeerClient>) {
    let mut log = Logger::new();
    log.info("sync engine actor started");

    while let Some(message) = rx.recv().await {
        match message {
            EngineMessage::Join(block_index, reply) => {
                let outcome = state.join(block_index);
                if let Err(err) = &outcome {
                    log.error(format!("join failed: {err}"));
                }
                let _ = reply.send(outcome);
            }
            EngineMessage::AddTipBlock(block, txs, reply) => {
                let _ = reply.send(state.add_tip_block(block, txs));
            }
            EngineMessage::AddBlock(block_start, block, txs, reply) => {
                state.add_block(block_start, &block, &txs);
                let _ = reply.send(());
            }
            EngineMessage::AddChunk(submission, reply) => {
                let _ = reply.send(state.add_chunk(submission));
            }
            EngineMessage::AddDataRootToDiskPool(data_root, tx_size, tx_id, reply) => {
                state.add_data_root_to_disk_pool(data_root, tx_size, tx_id, now_us());
                let _ = reply.send(());
            }
            EngineMessage::MaybeDropDataRootFromDiskPool(data_root, tx_size, tx_id, reply) => {
                state.maybe_drop_data_root_from_disk_pool(data_root, tx_size, tx_id);
                let _ = reply.send(());
            }
            EngineMessage::GetTxData(tx_id, reply) => {
                let _ = reply.send(state.get_tx_data(tx_id));
            }
            EngineMessage::GetTxOffset(tx_id, reply) => {
                let _ = reply.send(state.get_tx_offset(tx_id));
            }
            EngineMessage::GetSyncRecordEtf(reply) => {
                let _ = reply.send(state.get_sync_record_etf());
            }
            EngineMessage::GetSyncRecordJson(reply) => {
                let _ = reply.send(state.get_sync_record_json());
            }
            EngineMessage::ProcessOneDiskPoolChunk => {
                if state.has_disk_space() {
                    let _ = state.process_one_disk_pool_chunk();
                }
            }
            EngineMessage::ExpireDiskPoolDataRoots => {
                state.expire_disk_pool_data_roots(now_us());
            }
            EngineMessage::RunCompaction => {
                state.run_compaction();
            }
            EngineMessage::FetchOne => {
                fetch_one(&mut state, &peer_client, &mut log).await;
            }
            EngineMessage::RefreshPeerRecords => {
                refresh_peer_records(&mut state, &peer_client, &mut log).await;
            }
            EngineMessage::ExportState(reply) => {
                let _ = reply.send(state.export_state());
            }
        }
    }

    log.info("sync engine actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk_space::UnboundedDiskSpaceMonitor;
    use crate::peer::PeerChunkProof;
    use weave_sync_indexes::MemoryKVStore;
    use weave_sync_intervals::IntervalSet;
    use weave_sync_storage::FsChunkBlobStore;

    struct NullPeerClient;

    #[async_trait::async_trait]
    impl PeerClient for NullPeerClient {
        async fn get_chunk(&self, _peer: &PeerId, _absolute_offset: u128) -> Result<PeerChunkProof> {
            Err(weave_sync_types::SyncError::TimedOut)
        }
        async fn get_sync_record(&self, _peer: &PeerId) -> Result<IntervalSet> {
            Err(weave_sync_types::SyncError::TimedOut)
        }
    }

    fn spawn_test_handle(dir: &std::path::Path) -> EngineHandle {
        let kv: Arc<dyn KVStore> = Arc::new(MemoryKVStore::new());
        let blobs: Arc<dyn ChunkBlobStore> = Arc::new(FsChunkBlobStore::new(dir).unwrap());
        let disk: Arc<dyn DiskSpaceMonitor> = Arc::new(UnboundedDiskSpaceMonitor::new(dir));
        let peer_client: Arc<dyn PeerClient> = Arc::new(NullPeerClient);
        EngineHandle::spawn(kv, blobs, disk, peer_client, Config::default())
    }

    #[tokio::test]
    async fn join_then_no_intersection_reports_fatal_through_the_mailbox() {
        let dir = tempfile::tempdir().unwrap();
        let handle = spawn_test_handle(dir.path());

        let mut h1 = Hash256::zero();
        h1.as_bytes_mut()[0] = 1;
        handle.join(vec![BlockIndexEntry { block_hash: h1, cumulative_weave_size: 80, tx_root: h1 }]).await.unwrap();

        let mut h2 = Hash256::zero();
        h2.as_bytes_mut()[0] = 99;
        let err = handle.join(vec![BlockIndexEntry { block_hash: h2, cumulative_weave_size: 120, tx_root: h2 }]).await.unwrap_err();
        assert_eq!(err, weave_sync_types::SyncError::FatalJoinNoIntersection);
    }

    #[tokio::test]
    async fn add_chunk_without_data_root_returns_through_the_timeout_path_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let handle = spawn_test_handle(dir.path());

        let submission = ChunkSubmission { data_root: Hash256::zero(), tx_size: 100, data_path: vec![1], chunk: vec![2], offset_in_tx: 1 };
        let err = handle.add_chunk(submission, std::time::Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err, weave_sync_types::SyncError::DataRootNotFound);
    }

    #[tokio::test]
    async fn fetch_one_tick_is_a_silent_no_op_with_no_known_peers() {
        let dir = tempfile::tempdir().unwrap();
        let handle = spawn_test_handle(dir.path());
        handle.tick_fetch_one().await;
        handle.tick_refresh_peer_records().await;
        // No peers registered: both ticks must return without panicking and
        // without blocking the mailbox for later messages.
        let err = handle.get_tx_offset(Hash256::zero()).await.unwrap_err();
        assert_eq!(err, weave_sync_types::SyncError::NotFound);
    }
}
