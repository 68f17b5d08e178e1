//! Process-wide registry publishing the two read-only fast-path handles
//! (§5, §9): `get_chunk_by_offset` and `get_tx_root_at_offset` read straight
//! through the KV store and blob store without going through the actor
//! mailbox. A `lazy_static!` global is the simplest way to publish a
//! process-wide singleton that outlives any one actor handle.

use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;
use weave_sync_indexes::index::{chunks_index, data_root_offset_index};
use weave_sync_indexes::KVStore;
use weave_sync_storage::ChunkBlobStore;
use weave_sync_types::{Hash256, Offset, Result, SyncError};

struct Handles {
    kv: Arc<dyn KVStore>,
    blobs: Arc<dyn ChunkBlobStore>,
}

lazy_static! {
    static ref HANDLES: RwLock<Option<Handles>> = RwLock::new(None);
}

/// Publishes the handles the fast paths need. Called once by the engine
/// during startup; safe to call again (e.g. in tests) to swap handles.
pub fn publish(kv: Arc<dyn KVStore>, blobs: Arc<dyn ChunkBlobStore>) {
    *HANDLES.write().unwrap() = Some(Handles { kv, blobs });
}

fn handles() -> Result<(Arc<dyn KVStore>, Arc<dyn ChunkBlobStore>)> {
    let guard = HANDLES.read().unwrap();
    let h = guard.as_ref().ok_or(SyncError::NotJoined)?;
    Ok((h.kv.clone(), h.blobs.clone()))
}

/// Lock-free read of the chunk covering `absolute_offset`: the chunk, and
/// the `data_path` proving it against its `data_root`.
pub fn get_chunk_by_offset(absolute_offset: Offset) -> Result<(Vec<u8>, Vec<u8>)> {
    let (kv, blobs) = handles()?;
    let (_, record) = chunks_index::get_covering(kv.as_ref(), absolute_offset)
        .map_err(|_| SyncError::FailedToReadChunk)?
        .ok_or(SyncError::ChunkNotFound)?;
    blobs.read(record.data_path_hash)
}

/// Lock-free read of the `(tx_root, block_start, block_size)` for the block
/// containing `absolute_offset`.
pub fn get_tx_root_at_offset(absolute_offset: Offset) -> Result<(Hash256, Offset, Offset)> {
    let (kv, _) = handles()?;
    let (block_start, record) = data_root_offset_index::get_containing(kv.as_ref(), absolute_offset)
        .map_err(|_| SyncError::FailedToReadChunk)?
        .ok_or(SyncError::NotFound)?;
    Ok((record.tx_root, block_start, record.block_size))
}
