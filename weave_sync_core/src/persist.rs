//! The persisted state blob (§6): `(sync_record, block_index,
//! disk_pool_data_roots, disk_pool_size)`, rewritten on every `join` and
//! `add_tip_block` and on shutdown so a restart can resume without a full
//! resync.

use weave_sync_intervals::IntervalSet;
use weave_sync_types::{Result, SyncError};

use crate::disk_pool::{DiskPoolManager, DiskPoolSnapshotEntry};
use crate::engine::{BlockIndexEntry, EngineState};

#[derive(Debug, Clone, borsh::BorshSerialize, borsh::BorshDeserialize)]
pub struct PersistedState {
    pub sync_record: Vec<u8>,
    pub block_index: Vec<BlockIndexEntry>,
    pub disk_pool: Vec<DiskPoolSnapshotEntry>,
    pub disk_pool_size: u64,
}

impl EngineState {
    pub fn export_state(&self) -> PersistedState {
        PersistedState {
            sync_record: self.sync_record.to_binary(self.sync_record.count()),
            block_index: self.block_index.clone(),
            disk_pool: self.disk_pool.snapshot(),
            disk_pool_size: self.disk_pool.disk_pool_size(),
        }
    }

    pub fn import_state(&mut self, state: PersistedState) -> Result<()> {
        self.sync_record = IntervalSet::from_binary(&state.sync_record).map_err(|_| SyncError::Invalid)?;
        self.weave_size = state.block_index.last().map(|b| b.cumulative_weave_size).unwrap_or(0);
        self.block_index = state.block_index;
        self.disk_pool = DiskPoolManager::restore(state.disk_pool);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use weave_sync_indexes::MemoryKVStore;
    use weave_sync_storage::FsChunkBlobStore;
    use weave_sync_types::Hash256;

    #[test]
    fn export_then_import_restores_sync_record_and_block_index() {
        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(MemoryKVStore::new());
        let blobs = Arc::new(FsChunkBlobStore::new(dir.path()).unwrap());
        let mut state = EngineState::new(kv, blobs, crate::config::Config::default());

        let mut h = Hash256::zero();
        h.as_bytes_mut()[0] = 1;
        state.join(vec![crate::engine::BlockIndexEntry { block_hash: h, cumulative_weave_size: 100, tx_root: h }]).unwrap();
        state.sync_record.add(40, 0);

        let blob = state.export_state();
        let bytes = borsh::to_vec(&blob).unwrap();
        let restored_blob: PersistedState = borsh::from_slice(&bytes).unwrap();

        let kv2 = Arc::new(MemoryKVStore::new());
        let blobs2 = Arc::new(FsChunkBlobStore::new(dir.path()).unwrap());
        let mut state2 = EngineState::new(kv2, blobs2, crate::config::Config::default());
        state2.import_state(restored_blob).unwrap();

        assert_eq!(state2.weave_size, 100);
        assert!(state2.sync_record.is_inside(40));
        assert_eq!(state2.block_index.len(), 1);
    }
}
