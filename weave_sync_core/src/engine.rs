//! The Sync Engine: a single-owner state machine (§4.4-4.8) driven either
//! directly (as plain method calls, used by tests and by [`crate::actor`]'s
//! mailbox loop) or through the actor wrapper for concurrent callers.

use std::sync::Arc;

use weave_sync_indexes::index::{chunks_index, data_root_index, data_root_offset_index, disk_pool_chunks_index, missing_chunks_index, tx_index, tx_offset_index};
use weave_sync_indexes::values::{BlockOffsetRecord, ChunkRecord, DataRootPlacement, DiskPoolChunkRecord, TxRecord};
use weave_sync_indexes::{Cursor, KVStore};
use weave_sync_intervals::IntervalSet;
use weave_sync_storage::ChunkBlobStore;
use weave_sync_types::{DataRootKey, Hash256, Offset, Result, SyncError};

use crate::config::Config;
use crate::disk_pool::DiskPoolManager;
use crate::disk_space::DiskSpaceMonitor;
use crate::peer::PeerSyncRecords;

/// One entry of the externally-maintained chain of recent blocks (§3
/// `BlockIndex`): used only to detect reorg intersections on join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, borsh::BorshSerialize, borsh::BorshDeserialize)]
pub struct BlockIndexEntry {
    pub block_hash: Hash256,
    pub cumulative_weave_size: Offset,
    pub tx_root: Hash256,
}

/// One transaction confirmed in a block, with the proof placing it against
/// the block's `tx_root` (built by the host's Merkle component, §6).
#[derive(Debug, Clone)]
pub struct SizeTaggedTx {
    pub tx_id: Hash256,
    pub data_root: Hash256,
    pub tx_size: Offset,
    pub tx_path: Vec<u8>,
}

/// A block ready to be indexed: its own `tx_root`/size and the transactions
/// it confirms.
#[derive(Debug, Clone)]
pub struct BlockDescriptor {
    pub tx_root: Hash256,
    pub block_size: Offset,
    pub weave_size_after: Offset,
}

/// What a user submits when admitting a chunk (§4.5 "Admission").
#[derive(Debug, Clone)]
pub struct ChunkSubmission {
    pub data_root: Hash256,
    pub tx_size: Offset,
    pub data_path: Vec<u8>,
    pub chunk: Vec<u8>,
    pub offset_in_tx: Offset,
}

/// Outcome of an `update-chunks-index` call (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    NotUpdated,
}

pub struct EngineState {
    pub kv: Arc<dyn KVStore>,
    pub blobs: Arc<dyn ChunkBlobStore>,
    pub config: Config,
    pub disk: Arc<dyn DiskSpaceMonitor>,

    pub sync_record: IntervalSet,
    pub block_index: Vec<BlockIndexEntry>,
    pub weave_size: Offset,
    pub peer_records: PeerSyncRecords,
    pub disk_pool: DiskPoolManager,

    pub(crate) missing_cursor: Cursor,
    disk_pool_cursor: Cursor,
}

impl EngineState {
    pub fn new(kv: Arc<dyn KVStore>, blobs: Arc<dyn ChunkBlobStore>, config: Config) -> Self {
        Self::with_disk_monitor(kv, blobs, config, Arc::new(crate::disk_space::UnboundedDiskSpaceMonitor::new(".")))
    }

    pub fn with_disk_monitor(kv: Arc<dyn KVStore>, blobs: Arc<dyn ChunkBlobStore>, config: Config, disk: Arc<dyn DiskSpaceMonitor>) -> Self {
        Self {
            kv,
            blobs,
            config,
            disk,
            sync_record: IntervalSet::new(),
            block_index: Vec::new(),
            weave_size: 0,
            peer_records: PeerSyncRecords::default(),
            disk_pool: DiskPoolManager::new(),
            missing_cursor: Cursor::First,
            disk_pool_cursor: Cursor::First,
        }
    }

    /// §5 "resource shared with outside world": every write path checks
    /// this before proceeding.
    fn require_disk_space(&self) -> Result<()> {
        if self.has_disk_space() {
            Ok(())
        } else {
            Err(SyncError::DiskFull)
        }
    }

    /// Used by periodic tasks (§5) to reschedule rather than error outright.
    pub fn has_disk_space(&self) -> bool {
        self.disk.free_bytes() > self.config.disk_data_buffer
    }

    fn require_joined(&self) -> Result<()> {
        if self.block_index.is_empty() {
            Err(SyncError::NotJoined)
        } else {
            Ok(())
        }
    }

    // ---------------------------------------------------------------
    // §4.5 update-chunks-index
    // ---------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn update_chunks_index(
        &mut self,
        absolute_end: Offset,
        relative_end_in_tx: Offset,
        data_path_hash: Hash256,
        tx_root: Hash256,
        data_root: Hash256,
        tx_path: Vec<u8>,
        chunk_size: Offset,
        tx_size: Offset,
    ) -> Result<UpdateOutcome> {
        let already_indexed = chunks_index::get(self.kv.as_ref(), absolute_end).map_err(|_| SyncError::Invalid)?.is_some();
        let chunk_is_new = !self.sync_record.is_inside(absolute_end) || !already_indexed;
        if !chunk_is_new {
            return Ok(UpdateOutcome::NotUpdated);
        }

        let record = ChunkRecord { data_path_hash, tx_root, data_root, tx_path, chunk_relative_offset: relative_end_in_tx, chunk_size };
        chunks_index::put(self.kv.as_ref(), absolute_end, &record);

        let pool_key = DataRootKey::new(data_root, tx_size);
        if let Some(entry) = self.disk_pool.get(&pool_key) {
            let timestamp_us = entry.timestamp_us;
            disk_pool_chunks_index::put(
                self.kv.as_ref(),
                timestamp_us,
                data_path_hash,
                &DiskPoolChunkRecord { relative_end_offset: relative_end_in_tx, chunk_size, data_root, tx_size },
            );
        }

        self.sync_record.add(absolute_end, absolute_end - chunk_size);

        if self.sync_record.count() > self.config.max_shared_intervals + self.config.extra_before_compaction {
            self.run_compaction();
        }

        Ok(UpdateOutcome::Updated)
    }

    // ---------------------------------------------------------------
    // §4.5 admission (add_chunk)
    // ---------------------------------------------------------------

    pub fn add_chunk(&mut self, submission: ChunkSubmission) -> Result<()> {
        self.require_disk_space()?;
        let key = DataRootKey::new(submission.data_root, submission.tx_size);

        let placements = data_root_index::get(self.kv.as_ref(), &key).map_err(|_| SyncError::Invalid)?;
        if !placements.placements.is_empty() {
            let chunk_end = weave_sync_proof::validate_data_path(
                submission.data_root,
                submission.offset_in_tx,
                submission.tx_size,
                &submission.data_path,
                &submission.chunk,
            )?;
            let data_path_hash = weave_sync_proof::sha256(&submission.data_path);
            let chunk_start = chunk_end - submission.chunk.len() as Offset;
            self.blobs.write(data_path_hash, &submission.chunk, &submission.data_path)?;

            for placement in &placements.placements {
                let absolute_end = placement.absolute_tx_start_offset + chunk_end;
                self.update_chunks_index(
                    absolute_end,
                    chunk_end,
                    data_path_hash,
                    placement.tx_root,
                    submission.data_root,
                    placement.tx_path.clone(),
                    chunk_end - chunk_start,
                    submission.tx_size,
                )?;
            }
            return Ok(());
        }

        if self.disk_pool.contains(&key) {
            self.disk_pool.check_size_caps(&key, submission.chunk.len() as u64, self.config.max_disk_pool_data_root_buffer, self.config.max_disk_pool_buffer)?;

            let chunk_end = weave_sync_proof::validate_data_path(
                submission.data_root,
                submission.offset_in_tx,
                submission.tx_size,
                &submission.data_path,
                &submission.chunk,
            )?;
            let data_path_hash = weave_sync_proof::sha256(&submission.data_path);
            let chunk_start = chunk_end - submission.chunk.len() as Offset;

            let timestamp_us = self.disk_pool.get(&key).map(|e| e.timestamp_us).unwrap_or(0);
            self.blobs.write(data_path_hash, &submission.chunk, &submission.data_path)?;
            disk_pool_chunks_index::put(
                self.kv.as_ref(),
                timestamp_us,
                data_path_hash,
                &DiskPoolChunkRecord { relative_end_offset: chunk_end, chunk_size: chunk_end - chunk_start, data_root: submission.data_root, tx_size: submission.tx_size },
            );
            self.disk_pool.bump_accumulated_size(&key, submission.chunk.len() as u64);
            return Ok(());
        }

        Err(SyncError::DataRootNotFound)
    }

    // ---------------------------------------------------------------
    // §4.6 join / reorg
    // ---------------------------------------------------------------

    pub fn join(&mut self, new_block_index: Vec<BlockIndexEntry>) -> Result<()> {
        if self.block_index.is_empty() {
            let mut start = 0u128;
            for entry in &new_block_index {
                let block_size = entry.cumulative_weave_size - start;
                data_root_offset_index::put(self.kv.as_ref(), start, &BlockOffsetRecord { tx_root: entry.tx_root, block_size, data_root_keys: Vec::new() });
                start = entry.cumulative_weave_size;
            }
            self.weave_size = start;
            self.block_index = new_block_index;
            return Ok(());
        }

        let intersection = self
            .block_index
            .iter()
            .rev()
            .find(|old| new_block_index.iter().any(|new| new.block_hash == old.block_hash))
            .copied();

        let Some(intersection) = intersection else {
            return Err(SyncError::FatalJoinNoIntersection);
        };

        let cut_point = intersection.cumulative_weave_size;
        self.remove_orphans(cut_point, self.weave_size);
        self.sync_record.cut(cut_point);

        let mut start = cut_point;
        for entry in new_block_index.iter().filter(|e| e.cumulative_weave_size > cut_point) {
            let block_size = entry.cumulative_weave_size - start;
            data_root_offset_index::put(self.kv.as_ref(), start, &BlockOffsetRecord { tx_root: entry.tx_root, block_size, data_root_keys: Vec::new() });
            start = entry.cumulative_weave_size;
        }
        self.weave_size = start.max(self.weave_size);
        self.block_index = new_block_index;
        Ok(())
    }

    /// `remove_orphans`: deletes every index entry above `cut_point` left
    /// over from the chain being abandoned, returning the set of data-root
    /// keys whose confirmed placements were fully emptied.
    fn remove_orphans(&mut self, cut_point: Offset, previous_weave_size: Offset) -> Vec<DataRootKey> {
        if previous_weave_size <= cut_point {
            return Vec::new();
        }

        chunks_index::delete_range(self.kv.as_ref(), cut_point, previous_weave_size);

        let orphaned_tx_offsets = tx_offset_index::range(self.kv.as_ref(), cut_point, previous_weave_size).unwrap_or_default();
        for (_, tx_id) in &orphaned_tx_offsets {
            tx_index::delete(self.kv.as_ref(), *tx_id);
        }
        tx_offset_index::delete_range(self.kv.as_ref(), cut_point, previous_weave_size);

        let orphaned_blocks = data_root_offset_index::range(self.kv.as_ref(), cut_point, previous_weave_size + 1).unwrap_or_default();
        data_root_offset_index::delete_range(self.kv.as_ref(), cut_point, previous_weave_size);

        let mut orphaned_data_roots = Vec::new();
        for (_, block) in &orphaned_blocks {
            for key in &block.data_root_keys {
                let mut placements = data_root_index::get(self.kv.as_ref(), key).unwrap_or_default();
                placements.retain_below(cut_point);
                let now_empty = placements.placements.is_empty();
                data_root_index::put(self.kv.as_ref(), key, &placements);
                if now_empty {
                    orphaned_data_roots.push(*key);
                }
            }
        }

        for key in &orphaned_data_roots {
            self.disk_pool.refresh_timestamp(key, 0);
        }

        orphaned_data_roots
    }

    /// `add_block`: indexes one block's transactions at `block_start`,
    /// confirming any disk-pool data roots they reference. Used both by
    /// `add_tip_block` (for the weave-extending case) and directly by a host
    /// that wants to index a single block without touching `block_index` or
    /// `weave_size` (e.g. while replaying a join's block range one at a time).
    pub fn add_block(&mut self, block_start: Offset, block: &BlockDescriptor, txs: &[SizeTaggedTx]) {
        let mut data_root_keys = Vec::new();
        for tx in txs {
            let key = DataRootKey::new(tx.data_root, tx.tx_size);
            data_root_keys.push(key);

            let tx_start = block_start;
            tx_offset_index::put(self.kv.as_ref(), tx_start, tx.tx_id);
            tx_index::put(self.kv.as_ref(), tx.tx_id, &TxRecord { absolute_tx_end_offset: tx_start + tx.tx_size, tx_size: tx.tx_size });

            let mut placements = data_root_index::get(self.kv.as_ref(), &key).unwrap_or_default();
            placements.insert_sorted(DataRootPlacement { tx_root: block.tx_root, absolute_tx_start_offset: tx_start, tx_path: tx.tx_path.clone() });
            data_root_index::put(self.kv.as_ref(), &key, &placements);

            if self.disk_pool.contains(&key) {
                self.disk_pool.confirm(&key);
            }
        }

        data_root_offset_index::put(self.kv.as_ref(), block_start, &BlockOffsetRecord { tx_root: block.tx_root, block_size: block.block_size, data_root_keys });
    }

    /// `add_tip_block`: indexes one newly-announced block incrementally,
    /// extending `weave_size` and `block_index`.
    pub fn add_tip_block(&mut self, block: BlockDescriptor, txs: Vec<SizeTaggedTx>) -> Result<()> {
        let block_start = self.weave_size;
        if block.weave_size_after <= block_start {
            // A replacement block at or below our current tip: treat as a
            // reorg cutting back to this block's start.
            self.remove_orphans(block_start.min(block.weave_size_after), self.weave_size);
            self.sync_record.cut(block.weave_size_after);
            self.weave_size = block.weave_size_after;
            return Ok(());
        }

        self.add_block(block_start, &block, &txs);

        self.weave_size = block.weave_size_after;
        if let Some(last) = self.block_index.last().copied() {
            if last.cumulative_weave_size != block_start {
                // Diverges from our recorded tip: the caller should have
                // called join() instead. We still index the block but leave
                // block_index reconciliation to the next join.
            }
        }
        self.block_index.push(BlockIndexEntry { block_hash: Hash256::zero(), cumulative_weave_size: self.weave_size, tx_root: block.tx_root });

        Ok(())
    }

    // ---------------------------------------------------------------
    // §4.7 disk-pool periodic tasks
    // ---------------------------------------------------------------

    /// Periodic "process one pending chunk" (§4.7). Purely cursor-driven —
    /// nothing here keys off the current time.
    pub fn process_one_disk_pool_chunk(&mut self) -> Result<()> {
        let Some((key, record, next_cursor)) = disk_pool_chunks_index::cyclic_next(self.kv.as_ref(), &self.disk_pool_cursor).map_err(|_| SyncError::Invalid)? else {
            return Ok(());
        };
        let (timestamp_us, data_path_hash) = key;
        let data_root_key = DataRootKey::new(record.data_root, record.tx_size);
        let placements = data_root_index::get(self.kv.as_ref(), &data_root_key).unwrap_or_default();
        let in_disk_pool = self.disk_pool.contains(&data_root_key);

        if placements.placements.is_empty() {
            if in_disk_pool {
                self.disk_pool_cursor = disk_pool_chunks_index::skip_timestamp(timestamp_us);
            } else {
                disk_pool_chunks_index::delete(self.kv.as_ref(), timestamp_us, data_path_hash);
                let _ = self.blobs.delete(data_path_hash);
                self.disk_pool_cursor = next_cursor;
            }
            return Ok(());
        }

        for placement in &placements.placements {
            let absolute_end = placement.absolute_tx_start_offset + record.relative_end_offset;
            self.update_chunks_index(
                absolute_end,
                record.relative_end_offset,
                data_path_hash,
                placement.tx_root,
                record.data_root,
                placement.tx_path.clone(),
                record.chunk_size,
                record.tx_size,
            )?;
        }
        if !in_disk_pool {
            disk_pool_chunks_index::delete(self.kv.as_ref(), timestamp_us, data_path_hash);
        }
        self.disk_pool_cursor = next_cursor;
        Ok(())
    }

    /// Periodic "expire disk-pool data roots" (§4.7).
    pub fn expire_disk_pool_data_roots(&mut self, now_us: u128) {
        self.disk_pool.expire(now_us, self.config.disk_pool_data_root_expiration.as_micros());
    }

    // ---------------------------------------------------------------
    // §4.8 compaction
    // ---------------------------------------------------------------

    pub fn run_compaction(&mut self) {
        let gaps = self.sync_record.compact(self.config.max_shared_intervals);
        let mut first_absorbed_start = None;
        for gap in &gaps {
            missing_chunks_index::put(self.kv.as_ref(), gap.end, gap.start);
            if first_absorbed_start.is_none() {
                first_absorbed_start = Some(gap.start);
            }
        }
        if let Some(start) = first_absorbed_start {
            self.missing_cursor = Cursor::After(weave_sync_types::keys::encode_offset(start).to_vec());
        }
    }

    // ---------------------------------------------------------------
    // §6 exposed reads
    // ---------------------------------------------------------------

    pub fn get_chunk(&self, absolute_offset: Offset) -> Result<(Vec<u8>, Vec<u8>)> {
        self.require_joined()?;
        let (_, record) = chunks_index::get_covering(self.kv.as_ref(), absolute_offset).map_err(|_| SyncError::FailedToReadChunk)?.ok_or(SyncError::ChunkNotFound)?;
        self.blobs.read(record.data_path_hash)
    }

    pub fn get_tx_root(&self, absolute_offset: Offset) -> Result<(Hash256, Offset, Offset)> {
        self.require_joined()?;
        let (block_start, record) = data_root_offset_index::get_containing(self.kv.as_ref(), absolute_offset).map_err(|_| SyncError::FailedToReadChunk)?.ok_or(SyncError::NotFound)?;
        Ok((record.tx_root, block_start, record.block_size))
    }

    pub fn get_tx_offset(&self, tx_id: Hash256) -> Result<Offset> {
        let record = tx_index::get(self.kv.as_ref(), tx_id).map_err(|_| SyncError::Invalid)?.ok_or(SyncError::NotFound)?;
        Ok(record.absolute_tx_end_offset - record.tx_size)
    }

    /// `get_tx_data`: rejects if the transaction is bigger than
    /// `MAX_SERVED_TX_DATA_SIZE`, otherwise concatenates its chunks.
    pub fn get_tx_data(&self, tx_id: Hash256) -> Result<Vec<u8>> {
        let record = tx_index::get(self.kv.as_ref(), tx_id).map_err(|_| SyncError::Invalid)?.ok_or(SyncError::NotFound)?;
        if record.tx_size > self.config.max_served_tx_data_size as Offset {
            return Err(SyncError::TxDataTooBig);
        }

        let tx_start = record.absolute_tx_end_offset - record.tx_size;
        let mut data = Vec::with_capacity(record.tx_size as usize);
        let mut cursor = tx_start;
        while cursor < record.absolute_tx_end_offset {
            let (_, chunk_record) = chunks_index::get_covering(self.kv.as_ref(), cursor + 1).map_err(|_| SyncError::FailedToReadChunk)?.ok_or(SyncError::ChunkNotFound)?;
            let (chunk, _) = self.blobs.read(chunk_record.data_path_hash)?;
            data.extend_from_slice(&chunk);
            cursor += chunk_record.chunk_size;
        }
        Ok(data)
    }

    pub fn get_sync_record_etf(&self) -> Vec<u8> {
        self.sync_record.to_binary(self.config.max_shared_intervals)
    }

    pub fn get_sync_record_json(&self) -> serde_json::Value {
        self.sync_record.to_json(self.config.max_shared_intervals)
    }

    pub fn add_data_root_to_disk_pool(&mut self, data_root: Hash256, tx_size: Offset, tx_id: Hash256, now_us: u128) {
        self.disk_pool.add_data_root(DataRootKey::new(data_root, tx_size), tx_id, now_us);
    }

    pub fn maybe_drop_data_root_from_disk_pool(&mut self, data_root: Hash256, tx_size: Offset, tx_id: Hash256) {
        self.disk_pool.maybe_drop_data_root(&DataRootKey::new(data_root, tx_size), tx_id);
    }
}
