//! The "sync-one" fetch loop (§4.4's nine steps): pick a peer and a
//! sub-interval of bytes it claims to have that we're missing, fetch
//! adjacent chunks across that sub-interval, verify each proof, and fold
//! the result into the indexes the same way `add_chunk` does for a
//! locally-submitted chunk.

use rand::Rng;

use weave_sync_indexes::index::{data_root_offset_index, missing_chunks_index};
use weave_sync_indexes::values::DataRootPlacement;
use weave_sync_indexes::{Cursor, KVStore};
use weave_sync_intervals::IntervalSet;
use weave_sync_types::{DataRootKey, Offset, Result, SyncError};

use crate::engine::EngineState;
use crate::peer::{PeerChunkProof, PeerId, PeerSyncRecords};

/// A peer to ask, and the sub-interval of bytes to fetch from it, one
/// chunk at a time, left bound first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    pub peer: PeerId,
    pub left_bound: Offset,
    pub right_bound: Offset,
}

/// §4.4 step 1: for each peer (first match wins), compute
/// `outerjoin(sync_record, cut(peer_record, weave_size))`. The first peer
/// with a non-empty result wins; a uniformly random byte inside it picks a
/// `window`-wide sub-interval around itself to sync.
pub fn pick_target_by_peer_record(sync_record: &IntervalSet, weave_size: Offset, peers: &PeerSyncRecords, exclude: &[PeerId], max_shared_intervals: usize, rng: &mut impl Rng) -> Option<FetchTarget> {
    if weave_size == 0 {
        return None;
    }
    let window = (weave_size / max_shared_intervals.max(1) as Offset).max(1);

    for (peer, peer_record) in peers.candidates(exclude) {
        let mut bounded_peer_record = peer_record.clone();
        bounded_peer_record.cut(weave_size);

        let missing = IntervalSet::outerjoin(sync_record, &bounded_peer_record);
        if missing.is_empty() {
            continue;
        }

        let n = rng.gen_range(0..missing.sum());
        let Ok(point) = missing.get_interval_by_nth_inner_number(n) else { continue };

        let left_bound = point.byte.saturating_sub(window / 2).max(point.start);
        let right_bound = (left_bound + window).min(point.end);
        return Some(FetchTarget { peer: peer.clone(), left_bound, right_bound });
    }
    None
}

/// §4.4 step 2: the fallback used once every peer's own interval is empty.
/// Advances the `MissingChunksIndex` cyclic cursor by one entry, picks a
/// byte inside the gap it names, and asks for it as a single-chunk
/// interval from any peer that claims to have it.
pub fn pick_target_via_missing_chunks_index(kv: &dyn KVStore, cursor: &Cursor, peers: &PeerSyncRecords, exclude: &[PeerId]) -> Option<(FetchTarget, Cursor)> {
    let (_end, start, next_cursor) = missing_chunks_index::cyclic_next(kv, cursor)?;
    let byte = start + 1;
    let peer = peers.peers_with_byte(byte, exclude).into_iter().next()?;
    Some((FetchTarget { peer, left_bound: byte - 1, right_bound: byte }, next_cursor))
}

/// Runs step 1, falling back to step 2 if no peer's own record has
/// anything to offer.
pub fn pick_target(state: &EngineState, exclude: &[PeerId], rng: &mut impl Rng) -> Option<(FetchTarget, Option<Cursor>)> {
    if let Some(target) = pick_target_by_peer_record(&state.sync_record, state.weave_size, &state.peer_records, exclude, state.config.max_shared_intervals, rng) {
        return Some((target, None));
    }
    let (target, next_cursor) = pick_target_via_missing_chunks_index(state.kv.as_ref(), &state.missing_cursor, &state.peer_records, exclude)?;
    Some((target, Some(next_cursor)))
}

/// Verifies a fetched proof and, if it checks out, indexes the chunk.
/// Returns the chunk's byte length so step 9's batch continuation can
/// advance `left_bound` by it.
pub fn apply_fetched_chunk(state: &mut EngineState, offset: Offset, proof: PeerChunkProof) -> Result<Offset> {
    if !weave_sync_proof::proof_ratio_is_attractive(&proof.data_path, &proof.chunk) {
        return Err(SyncError::InvalidProof);
    }

    let (block_start, block) = data_root_offset_index::get_containing(state.kv.as_ref(), offset).map_err(|_| SyncError::Invalid)?.ok_or(SyncError::NotFound)?;
    if block.tx_root != proof.tx_root {
        return Err(SyncError::InvalidProof);
    }
    let offset_in_block = offset - block_start;

    let result = weave_sync_proof::validate_proof(proof.tx_root, &proof.tx_path, &proof.data_path, offset_in_block, &proof.chunk, block.block_size)?;

    let data_root_key = DataRootKey::new(result.data_root, result.tx_size);
    let mut placements = weave_sync_indexes::index::data_root_index::get(state.kv.as_ref(), &data_root_key).map_err(|_| SyncError::Invalid)?;
    let absolute_tx_start_offset = block_start + result.tx_start;
    placements.insert_sorted(DataRootPlacement { tx_root: proof.tx_root, absolute_tx_start_offset, tx_path: proof.tx_path.clone() });
    weave_sync_indexes::index::data_root_index::put(state.kv.as_ref(), &data_root_key, &placements);

    let data_path_hash = weave_sync_proof::sha256(&proof.data_path);
    state.blobs.write(data_path_hash, &proof.chunk, &proof.data_path)?;

    let chunk_size = proof.chunk.len() as Offset;
    let absolute_end = absolute_tx_start_offset + result.chunk_end;
    state.update_chunks_index(absolute_end, result.chunk_end, data_path_hash, proof.tx_root, result.data_root, proof.tx_path, chunk_size, result.tx_size)?;
    Ok(chunk_size)
}
