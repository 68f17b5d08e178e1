//! Typed accessors over [`KVStore`]: one module-level set of functions per
//! column family, so the engine never hand-encodes a key or calls
//! `borsh::to_vec` itself. Each function is a thin encode/decode shim; the
//! KV semantics (ordering, ranges, cyclic iteration) live in the store.

use borsh::BorshDeserialize;
use weave_sync_types::keys::{decode_data_root_key, encode_data_root_key, encode_disk_pool_chunk_key, decode_offset, encode_offset};
use weave_sync_types::{DataRootKey, Hash256, Offset};

use crate::kv::{ColumnFamily, Cursor, KVStore};
use crate::values::{BlockOffsetRecord, ChunkRecord, DataRootPlacements, DiskPoolChunkRecord, TxRecord};

fn decode<T: BorshDeserialize>(bytes: Vec<u8>) -> eyre::Result<T> {
    T::try_from_slice(&bytes).map_err(|e| eyre::eyre!("corrupt index record: {e}"))
}

pub mod chunks_index {
    use super::*;

    pub fn get(store: &dyn KVStore, absolute_end: Offset) -> eyre::Result<Option<ChunkRecord>> {
        store
            .get(ColumnFamily::ChunksIndex, &encode_offset(absolute_end))
            .map(decode)
            .transpose()
    }

    /// The chunk whose `(end - size, end]` range covers `offset`, if any —
    /// the "get-next returns the covering chunk" rule from §3.
    pub fn get_covering(store: &dyn KVStore, offset: Offset) -> eyre::Result<Option<(Offset, ChunkRecord)>> {
        let key = encode_offset(offset.saturating_add(1));
        match store.get_next(ColumnFamily::ChunksIndex, &key) {
            None => Ok(None),
            Some((k, v)) => {
                let end = decode_offset(&k).ok_or_else(|| eyre::eyre!("corrupt chunks index key"))?;
                Ok(Some((end, decode(v)?)))
            }
        }
    }

    pub fn put(store: &dyn KVStore, absolute_end: Offset, record: &ChunkRecord) {
        store.put(ColumnFamily::ChunksIndex, &encode_offset(absolute_end), &borsh::to_vec(record).expect("borsh encode"));
    }

    pub fn delete_range(store: &dyn KVStore, lo: Offset, hi_inclusive: Offset) {
        store.delete_range(ColumnFamily::ChunksIndex, &encode_offset(lo), &encode_offset(hi_inclusive.saturating_add(1)));
    }
}

pub mod missing_chunks_index {
    use super::*;

    pub fn put(store: &dyn KVStore, end: Offset, start: Offset) {
        store.put(ColumnFamily::MissingChunksIndex, &encode_offset(end), &encode_offset(start));
    }

    pub fn cyclic_next(store: &dyn KVStore, cursor: &Cursor) -> Option<(Offset, Offset, Cursor)> {
        let (k, v, next) = store.cyclic_iterator_move(ColumnFamily::MissingChunksIndex, cursor)?;
        Some((decode_offset(&k)?, decode_offset(&v)?, next))
    }
}

pub mod data_root_index {
    use super::*;

    pub fn get(store: &dyn KVStore, key: &DataRootKey) -> eyre::Result<DataRootPlacements> {
        match store.get(ColumnFamily::DataRootIndex, &encode_data_root_key(key)) {
            None => Ok(DataRootPlacements::default()),
            Some(bytes) => decode(bytes),
        }
    }

    pub fn put(store: &dyn KVStore, key: &DataRootKey, value: &DataRootPlacements) {
        if value.placements.is_empty() {
            store.delete(ColumnFamily::DataRootIndex, &encode_data_root_key(key));
        } else {
            store.put(ColumnFamily::DataRootIndex, &encode_data_root_key(key), &borsh::to_vec(value).expect("borsh encode"));
        }
    }

    pub fn delete(store: &dyn KVStore, key: &DataRootKey) {
        store.delete(ColumnFamily::DataRootIndex, &encode_data_root_key(key));
    }
}

pub mod data_root_offset_index {
    use super::*;

    pub fn get(store: &dyn KVStore, block_start: Offset) -> eyre::Result<Option<BlockOffsetRecord>> {
        store
            .get(ColumnFamily::DataRootOffsetIndex, &encode_offset(block_start))
            .map(decode)
            .transpose()
    }

    /// `get_prev`: recovers the block that contains `offset`.
    pub fn get_containing(store: &dyn KVStore, offset: Offset) -> eyre::Result<Option<(Offset, BlockOffsetRecord)>> {
        match store.get_prev(ColumnFamily::DataRootOffsetIndex, &encode_offset(offset)) {
            None => Ok(None),
            Some((k, v)) => {
                let start = decode_offset(&k).ok_or_else(|| eyre::eyre!("corrupt data root offset index key"))?;
                Ok(Some((start, decode(v)?)))
            }
        }
    }

    pub fn put(store: &dyn KVStore, block_start: Offset, record: &BlockOffsetRecord) {
        store.put(ColumnFamily::DataRootOffsetIndex, &encode_offset(block_start), &borsh::to_vec(record).expect("borsh encode"));
    }

    pub fn range(store: &dyn KVStore, lo: Offset, hi_exclusive: Offset) -> eyre::Result<Vec<(Offset, BlockOffsetRecord)>> {
        store
            .get_range(ColumnFamily::DataRootOffsetIndex, &encode_offset(lo), &encode_offset(hi_exclusive))
            .into_iter()
            .map(|(k, v)| Ok((decode_offset(&k).ok_or_else(|| eyre::eyre!("corrupt key"))?, decode(v)?)))
            .collect()
    }

    pub fn delete_range(store: &dyn KVStore, lo: Offset, hi_inclusive: Offset) {
        store.delete_range(ColumnFamily::DataRootOffsetIndex, &encode_offset(lo), &encode_offset(hi_inclusive.saturating_add(1)));
    }
}

pub mod tx_index {
    use super::*;

    pub fn get(store: &dyn KVStore, tx_id: Hash256) -> eyre::Result<Option<TxRecord>> {
        store.get(ColumnFamily::TxIndex, tx_id.as_bytes()).map(decode).transpose()
    }

    pub fn put(store: &dyn KVStore, tx_id: Hash256, record: &TxRecord) {
        store.put(ColumnFamily::TxIndex, tx_id.as_bytes(), &borsh::to_vec(record).expect("borsh encode"));
    }

    pub fn delete(store: &dyn KVStore, tx_id: Hash256) {
        store.delete(ColumnFamily::TxIndex, tx_id.as_bytes());
    }
}

pub mod tx_offset_index {
    use super::*;

    pub fn put(store: &dyn KVStore, absolute_tx_start: Offset, tx_id: Hash256) {
        store.put(ColumnFamily::TxOffsetIndex, &encode_offset(absolute_tx_start), tx_id.as_bytes());
    }

    pub fn range(store: &dyn KVStore, lo: Offset, hi_inclusive: Offset) -> eyre::Result<Vec<(Offset, Hash256)>> {
        store
            .get_range(ColumnFamily::TxOffsetIndex, &encode_offset(lo), &encode_offset(hi_inclusive.saturating_add(1)))
            .into_iter()
            .map(|(k, v)| {
                let start = decode_offset(&k).ok_or_else(|| eyre::eyre!("corrupt key"))?;
                if v.len() != 32 {
                    return Err(eyre::eyre!("corrupt tx_offset_index value"));
                }
                Ok((start, Hash256::from_slice(&v)))
            })
            .collect()
    }

    pub fn delete_range(store: &dyn KVStore, lo: Offset, hi_inclusive: Offset) {
        store.delete_range(ColumnFamily::TxOffsetIndex, &encode_offset(lo), &encode_offset(hi_inclusive.saturating_add(1)));
    }
}

pub mod disk_pool_chunks_index {
    use super::*;

    pub fn put(store: &dyn KVStore, timestamp_us: u128, data_path_hash: Hash256, record: &DiskPoolChunkRecord) {
        store.put(
            ColumnFamily::DiskPoolChunksIndex,
            &encode_disk_pool_chunk_key(timestamp_us, data_path_hash),
            &borsh::to_vec(record).expect("borsh encode"),
        );
    }

    pub fn delete(store: &dyn KVStore, timestamp_us: u128, data_path_hash: Hash256) {
        store.delete(ColumnFamily::DiskPoolChunksIndex, &encode_disk_pool_chunk_key(timestamp_us, data_path_hash));
    }

    pub fn cyclic_next(store: &dyn KVStore, cursor: &Cursor) -> eyre::Result<Option<((u128, Hash256), DiskPoolChunkRecord, Cursor)>> {
        match store.cyclic_iterator_move(ColumnFamily::DiskPoolChunksIndex, cursor) {
            None => Ok(None),
            Some((k, v, next)) => {
                let key = weave_sync_types::keys::decode_disk_pool_chunk_key(&k).ok_or_else(|| eyre::eyre!("corrupt key"))?;
                Ok(Some((key, decode(v)?, next)))
            }
        }
    }

    /// Seeks the cursor past every key at `timestamp_us` — the "jump to the
    /// next timestamp" skip used when a data root is still unconfirmed.
    /// Anchored at the highest possible hash for this timestamp so `After`
    /// lands on the first key of the *next* timestamp, not a sibling of this
    /// one.
    pub fn skip_timestamp(timestamp_us: u128) -> Cursor {
        Cursor::After(weave_sync_types::keys::encode_disk_pool_chunk_key(timestamp_us, Hash256::repeat_byte(0xff)))
    }
}
