//! Typed values stored in each column family (§3, §6). Keys are fixed-width
//! big-endian offsets or hash/offset composites encoded by
//! `weave_sync_types::keys`; the bytes on the value side of every entry here
//! are a `borsh` encoding of one of these structs.

use borsh::{BorshDeserialize, BorshSerialize};
use weave_sync_types::{Hash256, Offset, DataRootKey};

/// `ChunksIndex` value: everything needed to serve the chunk ending at the
/// key offset and re-derive its two-level Merkle proof.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChunkRecord {
    pub data_path_hash: Hash256,
    pub tx_root: Hash256,
    pub data_root: Hash256,
    pub tx_path: Vec<u8>,
    /// Offset of this chunk's end relative to the start of its transaction.
    pub chunk_relative_offset: Offset,
    pub chunk_size: Offset,
}

/// One confirmed placement of a `(data_root, tx_size)` pair: which block's
/// transaction carries it, and the tx_path proving it against that block's
/// block-level Merkle root.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct DataRootPlacement {
    pub tx_root: Hash256,
    pub absolute_tx_start_offset: Offset,
    pub tx_path: Vec<u8>,
}

/// `DataRootIndex` value: the full flattened set of placements for a given
/// `(data_root, tx_size)` key, kept tx_root-major / tx_start-minor as the
/// nested map it stands in for would iterate (§9 design note).
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct DataRootPlacements {
    pub placements: Vec<DataRootPlacement>,
}

impl DataRootPlacements {
    pub fn insert_sorted(&mut self, placement: DataRootPlacement) {
        let pos = self
            .placements
            .binary_search_by(|p| {
                (p.tx_root, p.absolute_tx_start_offset)
                    .cmp(&(placement.tx_root, placement.absolute_tx_start_offset))
            })
            .unwrap_or_else(|e| e);
        if self
            .placements
            .get(pos)
            .map(|p| p.tx_root == placement.tx_root && p.absolute_tx_start_offset == placement.absolute_tx_start_offset)
            != Some(true)
        {
            self.placements.insert(pos, placement);
        }
    }

    /// Drops every placement whose `absolute_tx_start_offset >= cut_point`,
    /// the reorg rule of §4.6.
    pub fn retain_below(&mut self, cut_point: Offset) {
        self.placements.retain(|p| p.absolute_tx_start_offset < cut_point);
    }
}

/// `DataRootOffsetIndex` value: the block that starts at the key offset, and
/// which `(data_root, tx_size)` keys it introduced into `DataRootIndex`.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockOffsetRecord {
    pub tx_root: Hash256,
    pub block_size: Offset,
    pub data_root_keys: Vec<DataRootKey>,
}

/// `TXIndex` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TxRecord {
    pub absolute_tx_end_offset: Offset,
    pub tx_size: Offset,
}

/// `DiskPoolChunksIndex` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct DiskPoolChunkRecord {
    pub relative_end_offset: Offset,
    pub chunk_size: Offset,
    pub data_root: Hash256,
    pub tx_size: Offset,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placements_insert_sorted_dedups_and_orders() {
        let mut set = DataRootPlacements::default();
        let root_a = Hash256::zero();
        let mut root_b = Hash256::zero();
        root_b.as_bytes_mut()[0] = 1;

        set.insert_sorted(DataRootPlacement { tx_root: root_b, absolute_tx_start_offset: 10, tx_path: vec![] });
        set.insert_sorted(DataRootPlacement { tx_root: root_a, absolute_tx_start_offset: 20, tx_path: vec![] });
        set.insert_sorted(DataRootPlacement { tx_root: root_a, absolute_tx_start_offset: 20, tx_path: vec![1] });

        assert_eq!(set.placements.len(), 2);
        assert_eq!(set.placements[0].tx_root, root_a);
        assert_eq!(set.placements[1].tx_root, root_b);
    }

    #[test]
    fn retain_below_drops_orphaned_placements() {
        let mut set = DataRootPlacements::default();
        let root = Hash256::zero();
        set.insert_sorted(DataRootPlacement { tx_root: root, absolute_tx_start_offset: 5, tx_path: vec![] });
        set.insert_sorted(DataRootPlacement { tx_root: root, absolute_tx_start_offset: 50, tx_path: vec![] });
        set.retain_below(10);
        assert_eq!(set.placements.len(), 1);
        assert_eq!(set.placements[0].absolute_tx_start_offset, 5);
    }

    #[test]
    fn chunk_record_roundtrips_through_borsh() {
        let rec = ChunkRecord {
            data_path_hash: Hash256::zero(),
            tx_root: Hash256::zero(),
            data_root: Hash256::zero(),
            tx_path: vec![1, 2, 3],
            chunk_relative_offset: 256 * 1024,
            chunk_size: 256 * 1024,
        };
        let bytes = borsh::to_vec(&rec).unwrap();
        let back: ChunkRecord = borsh::from_slice(&bytes).unwrap();
        assert_eq!(rec, back);
    }
}
