//! Ties the engine actor to a data directory: loads the persisted state
//! blob on startup, rewrites it after every `join`/`add_tip_block` and on
//! shutdown (§6), and drives the periodic tasks named in §4.4, §4.7, and
//! §4.8 at the frequencies `Config` gives them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use paris::Logger;
use weave_sync_core::{
    BlockDescriptor, BlockIndexEntry, Config, EngineHandle, PeerClient, SizeTaggedTx,
};
use weave_sync_indexes::KVStore;
use weave_sync_storage::ChunkBlobStore;
use weave_sync_types::Result;

use crate::persistence;

pub struct Node {
    handle: EngineHandle,
    data_dir: PathBuf,
    config: Config,
}

impl Node {
    /// Opens (or creates) the node's data directory, replays any persisted
    /// state blob found there, and spawns the engine actor on top of it.
    pub fn spawn(
        data_dir: impl AsRef<Path>,
        kv: Arc<dyn KVStore>,
        blobs: Arc<dyn ChunkBlobStore>,
        disk: Arc<dyn weave_sync_core::DiskSpaceMonitor>,
        peer_client: Arc<dyn PeerClient>,
        config: Config,
    ) -> eyre::Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let persisted = persistence::load(&data_dir)?;
        let handle = EngineHandle::spawn_with_state(kv, blobs, disk, peer_client, config.clone(), persisted);
        Ok(Self { handle, data_dir, config })
    }

    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    /// Joins a block index and rewrites the persisted state blob, per §6
    /// ("rewritten on every join").
    pub async fn join(&self, block_index: Vec<BlockIndexEntry>) -> Result<()> {
        let outcome = self.handle.join(block_index).await;
        self.persist_best_effort().await;
        outcome
    }

    /// Extends the weave with a new tip block and rewrites the persisted
    /// state blob, per §6 ("rewritten on every ... add_tip_block").
    pub async fn add_tip_block(&self, block: BlockDescriptor, txs: Vec<SizeTaggedTx>) -> Result<()> {
        let outcome = self.handle.add_tip_block(block, txs).await;
        self.persist_best_effort().await;
        outcome
    }

    /// Runs the periodic self-rescheduling tasks until `shutdown` resolves,
    /// then rewrites the persisted state blob one last time (§6 "rewritten
    /// ... on shutdown") before returning.
    pub async fn run_until(&self, shutdown: impl std::future::Future<Output = ()>) {
        let mut log = Logger::new();
        log.info("weave sync node running");

        tokio::pin!(shutdown);
        let mut fetch_tick = tokio::time::interval(self.config.scan_missing_chunks_frequency);
        let mut peer_tick = tokio::time::interval(self.config.peer_sync_records_frequency);
        let mut disk_pool_tick = tokio::time::interval(self.config.disk_pool_scan_frequency);
        let mut expire_tick = tokio::time::interval(self.config.remove_expired_data_roots_frequency);
        let mut compaction_tick = tokio::time::interval(self.config.disk_space_check_frequency);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = fetch_tick.tick() => self.handle.tick_fetch_one().await,
                _ = peer_tick.tick() => self.handle.tick_refresh_peer_records().await,
                _ = disk_pool_tick.tick() => self.handle.tick_disk_pool().await,
                _ = expire_tick.tick() => self.handle.tick_expire_disk_pool().await,
                _ = compaction_tick.tick() => self.handle.tick_compaction().await,
            }
        }

        log.info("weave sync node shutting down");
        self.persist_best_effort().await;
    }

    async fn persist_best_effort(&self) {
        let state = self.handle.export_state().await;
        if let Err(err) = persistence::save(&self.data_dir, &state) {
            let mut log = Logger::new();
            log.error(format!("failed to persist sync state: {err}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_sync_core::{PeerChunkProof, PeerId};
    use weave_sync_indexes::MemoryKVStore;
    use weave_sync_intervals::IntervalSet;
    use weave_sync_storage::FsChunkBlobStore;
    use weave_sync_types::{Hash256, SyncError};

    struct NullPeerClient;

    #[async_trait::async_trait]
    impl PeerClient for NullPeerClient {
        async fn get_chunk(&self, _peer: &PeerId, _absolute_offset: u128) -> weave_sync_types::Result<PeerChunkProof> {
            Err(SyncError::TimedOut)
        }
        async fn get_sync_record(&self, _peer: &PeerId) -> weave_sync_types::Result<IntervalSet> {
            Err(SyncError::TimedOut)
        }
    }

    fn spawn_test_node(data_dir: &Path) -> Node {
        let kv: Arc<dyn KVStore> = Arc::new(MemoryKVStore::new());
        let blobs: Arc<dyn ChunkBlobStore> = Arc::new(FsChunkBlobStore::new(data_dir.join("chunks")).unwrap());
        let disk = Arc::new(weave_sync_core::UnboundedDiskSpaceMonitor::new(data_dir));
        let peer_client: Arc<dyn PeerClient> = Arc::new(NullPeerClient);
        Node::spawn(data_dir, kv, blobs, disk, peer_client, Config::default()).unwrap()
    }

    #[tokio::test]
    async fn join_persists_a_state_blob_that_a_fresh_node_can_resume_from() {
        let dir = tempfile::tempdir().unwrap();
        let node = spawn_test_node(dir.path());

        let mut h = Hash256::zero();
        h.as_bytes_mut()[0] = 7;
        node.join(vec![BlockIndexEntry { block_hash: h, cumulative_weave_size: 100, tx_root: h }]).await.unwrap();

        assert!(crate::persistence::state_path(dir.path()).exists());

        let resumed = spawn_test_node(dir.path());
        let state = resumed.handle().export_state().await;
        assert_eq!(state.block_index.len(), 1);
        assert_eq!(state.block_index[0].cumulative_weave_size, 100);
    }

    #[tokio::test]
    async fn run_until_stops_promptly_when_the_shutdown_future_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let node = spawn_test_node(dir.path());
        let (tx, rx) = tokio::sync::oneshot::channel();
        tx.send(()).unwrap();
        node.run_until(async { rx.await.unwrap_or(()) }).await;
        assert!(crate::persistence::state_path(dir.path()).exists());
    }
}
