//! Fixed-width big-endian key encodings for the index column families.
//!
//! Every offset key is `NOTE_SIZE` bytes, big-endian, so that lexicographic
//! order on the bytes equals numeric order on the value (§3, §6) — a single
//! encode/decode pair shared by every index that needs an ordered offset
//! key.

use crate::{DataRootKey, Hash256, Offset, NOTE_SIZE};

/// Encodes an [`Offset`] as a `NOTE_SIZE`-byte big-endian key.
pub fn encode_offset(offset: Offset) -> [u8; NOTE_SIZE] {
    let mut out = [0u8; NOTE_SIZE];
    let be = offset.to_be_bytes();
    out[NOTE_SIZE - be.len()..].copy_from_slice(&be);
    out
}

/// Decodes a `NOTE_SIZE`-byte big-endian key back into an [`Offset`].
///
/// Returns `None` if `bytes` isn't exactly `NOTE_SIZE` long or if it encodes a
/// value wider than fits in a `u128` (the top bytes beyond `u128`'s width must
/// be zero — this crate only ever writes keys that satisfy that).
pub fn decode_offset(bytes: &[u8]) -> Option<Offset> {
    if bytes.len() != NOTE_SIZE {
        return None;
    }
    let (high, low) = bytes.split_at(NOTE_SIZE - 16);
    if high.iter().any(|b| *b != 0) {
        return None;
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(low);
    Some(u128::from_be_bytes(buf))
}

/// Encodes a `(data_root, tx_size)` pair as the `DataRootIndex` /
/// `DiskPoolDataRoots` / `DiskPoolChunksIndex` key component: the data root's
/// 32 bytes followed by the tx_size encoded as a `NOTE_SIZE`-byte big-endian
/// integer.
pub fn encode_data_root_key(key: &DataRootKey) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + NOTE_SIZE);
    out.extend_from_slice(key.data_root.as_bytes());
    out.extend_from_slice(&encode_offset(key.tx_size));
    out
}

pub fn decode_data_root_key(bytes: &[u8]) -> Option<DataRootKey> {
    if bytes.len() != 32 + NOTE_SIZE {
        return None;
    }
    let (root, size) = bytes.split_at(32);
    let mut data_root = Hash256::zero();
    data_root.as_bytes_mut().copy_from_slice(root);
    let tx_size = decode_offset(size)?;
    Some(DataRootKey::new(data_root, tx_size))
}

/// Encodes a `DiskPoolChunksIndex` key: `timestamp_us ‖ data_path_hash`,
/// ordered so that the oldest pending chunks sort first.
pub fn encode_disk_pool_chunk_key(timestamp_us: u128, data_path_hash: Hash256) -> Vec<u8> {
    let mut out = Vec::with_capacity(NOTE_SIZE + 32);
    out.extend_from_slice(&encode_offset(timestamp_us));
    out.extend_from_slice(data_path_hash.as_bytes());
    out
}

pub fn decode_disk_pool_chunk_key(bytes: &[u8]) -> Option<(u128, Hash256)> {
    if bytes.len() != NOTE_SIZE + 32 {
        return None;
    }
    let (ts, hash) = bytes.split_at(NOTE_SIZE);
    let timestamp_us = decode_offset(ts)?;
    let mut data_path_hash = Hash256::zero();
    data_path_hash.as_bytes_mut().copy_from_slice(hash);
    Some((timestamp_us, data_path_hash))
}
