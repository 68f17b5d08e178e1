//! Two-level Merkle proof validation (§4.3): a `tx_path` proves a
//! transaction's placement against a block's `tx_root`, and a `data_path`
//! proves a chunk's placement against that transaction's `data_root`. Both
//! levels share the same single-level path verification, so one routine is
//! used twice rather than duplicated.

use borsh::BorshDeserialize;
use openssl::sha;
use weave_sync_types::{Hash256, Result, SyncError};

pub const HASH_SIZE: usize = 32;
const NOTE_SIZE: usize = 32;

/// Upper bound on a single chunk's byte length (§4.3's `DATA_CHUNK_SIZE`).
pub const DATA_CHUNK_SIZE: usize = 256 * 1024;

/// Outcome of verifying one level of a Merkle path: the leaf's own hash
/// (`data_hash` for a data_path, `data_root`-equivalent id for a tx_path)
/// and the `(left_bound, right_bound]` range it was proven to occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathResult {
    pub leaf_id: Hash256,
    pub left_bound: u128,
    pub right_bound: u128,
}

#[derive(BorshDeserialize)]
struct LeafProof {
    data_hash: [u8; HASH_SIZE],
    #[allow(dead_code)]
    notepad: [u8; NOTE_SIZE - 8],
    offset: [u8; 8],
}

#[derive(BorshDeserialize)]
struct BranchProof {
    left_id: [u8; HASH_SIZE],
    right_id: [u8; HASH_SIZE],
    #[allow(dead_code)]
    notepad: [u8; NOTE_SIZE - 8],
    offset: [u8; 8],
}

impl LeafProof {
    fn offset(&self) -> u128 {
        u64::from_be_bytes(self.offset) as u128
    }
}

impl BranchProof {
    fn offset(&self) -> u128 {
        u64::from_be_bytes(self.offset) as u128
    }
}

fn hash_sha256(message: &[u8]) -> [u8; HASH_SIZE] {
    let mut hasher = sha::Sha256::new();
    hasher.update(message);
    hasher.finish()
}

fn hash_all_sha256(messages: &[&[u8]]) -> [u8; HASH_SIZE] {
    let concatenated: Vec<u8> = messages.iter().flat_map(|m| hash_sha256(m)).collect();
    hash_sha256(&concatenated)
}

fn to_note_vec(offset: u128) -> [u8; NOTE_SIZE] {
    let mut note = [0u8; NOTE_SIZE];
    note[NOTE_SIZE - 8..].copy_from_slice(&(offset as u64).to_be_bytes());
    note
}

/// The hash a leaf node's `data_hash` must equal for a chunk's bytes: the
/// plain SHA-256 digest of the chunk.
pub fn chunk_id_of(chunk: &[u8]) -> Hash256 {
    Hash256::from_slice(&hash_sha256(chunk))
}

/// Plain SHA-256 over arbitrary bytes, exposed for callers that need the
/// same digest outside a proof (e.g. deriving a blob store key from a
/// `data_path`).
pub fn sha256(bytes: &[u8]) -> Hash256 {
    Hash256::from_slice(&hash_sha256(bytes))
}

/// Verifies `path` proves some leaf lies under `root_id`, and that
/// `target_offset` falls within the proven leaf's bound. One level of the
/// two-level scheme; `validate_proof` calls this twice.
fn verify_path(root_id: Hash256, path: &[u8], target_offset: u128) -> Result<PathResult> {
    if path.len() < HASH_SIZE + NOTE_SIZE {
        return Err(SyncError::InvalidProof);
    }
    let (branches, leaf) = path.split_at(path.len() - HASH_SIZE - NOTE_SIZE);
    if branches.len() % (HASH_SIZE * 2 + NOTE_SIZE) != 0 {
        return Err(SyncError::InvalidProof);
    }

    let branch_proofs: Vec<BranchProof> = branches
        .chunks(HASH_SIZE * 2 + NOTE_SIZE)
        .map(BranchProof::try_from_slice)
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| SyncError::InvalidProof)?;
    let leaf_proof = LeafProof::try_from_slice(leaf).map_err(|_| SyncError::InvalidProof)?;

    let mut left_bound: u128 = 0;
    let mut expected = root_id;

    // Every node's "offset" is the END of its left child's range, and ranges
    // are (left_bound, right_bound] — a byte exactly on the boundary belongs
    // to the left side, not the right, matching the source's strict `>`.
    for branch in &branch_proofs {
        let path_hash = hash_all_sha256(&[&branch.left_id, &branch.right_id, &to_note_vec(branch.offset())]);
        if Hash256::from_slice(&path_hash) != expected {
            return Err(SyncError::InvalidProof);
        }

        let offset = branch.offset();
        let goes_right = target_offset > offset;
        expected = Hash256::from_slice(if goes_right { &branch.right_id } else { &branch.left_id });
        if goes_right {
            left_bound = offset;
        }
    }

    let leaf_id = Hash256::from_slice(&leaf_proof.data_hash);
    let right_bound = leaf_proof.offset();
    if target_offset <= left_bound || target_offset > right_bound {
        return Err(SyncError::InvalidProof);
    }

    Ok(PathResult { leaf_id, left_bound, right_bound })
}

/// Outcome of `validate_proof`: the confirmed `data_root`, where its
/// transaction starts in the weave, where the requested chunk ends, and the
/// transaction's total size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofResult {
    pub data_root: Hash256,
    pub tx_start: u128,
    pub chunk_end: u128,
    pub tx_size: u128,
}

/// Verifies a chunk's full two-level proof against a block (§4.3).
#[allow(clippy::too_many_arguments)]
pub fn validate_proof(
    tx_root: Hash256,
    tx_path: &[u8],
    data_path: &[u8],
    offset_in_block: u128,
    chunk: &[u8],
    block_size: u128,
) -> Result<ProofResult> {
    if offset_in_block == 0 || offset_in_block > block_size {
        return Err(SyncError::InvalidProof);
    }

    let tx_level = verify_path(tx_root, tx_path, offset_in_block)?;
    let tx_start = tx_level.left_bound;
    let tx_end = tx_level.right_bound;
    let tx_size = tx_end - tx_start;
    let data_root = tx_level.leaf_id;

    let chunk_offset_in_tx = offset_in_block - tx_start;
    let chunk_end = validate_data_path(data_root, chunk_offset_in_tx, tx_size, data_path, chunk)?;

    Ok(ProofResult { data_root, tx_start, chunk_end, tx_size })
}

/// Verifies a chunk's `data_path` against a transaction's `data_root`
/// (§4.3's single-transaction variant, also used standalone for disk-pool
/// admission before a data root has confirmed placements).
pub fn validate_data_path(data_root: Hash256, offset_in_tx: u128, tx_size: u128, data_path: &[u8], chunk: &[u8]) -> Result<u128> {
    if offset_in_tx == 0 || offset_in_tx > tx_size {
        return Err(SyncError::InvalidProof);
    }
    if chunk.len() > DATA_CHUNK_SIZE {
        return Err(SyncError::InvalidProof);
    }

    let data_level = verify_path(data_root, data_path, offset_in_tx)?;
    let chunk_start = data_level.left_bound;
    let chunk_end = data_level.right_bound;

    if chunk_end - chunk_start != chunk.len() as u128 {
        return Err(SyncError::InvalidProof);
    }
    if data_level.leaf_id != chunk_id_of(chunk) {
        return Err(SyncError::InvalidProof);
    }

    Ok(chunk_end)
}

/// The "proof ratio not attractive" heuristic preserved verbatim from the
/// source's fetch loop (§4.4, §9): reject proofs that are bigger than the
/// chunk they prove, a red flag for a misbehaving or malicious peer.
pub fn proof_ratio_is_attractive(data_path: &[u8], chunk: &[u8]) -> bool {
    !data_path.is_empty() && data_path.len() <= chunk.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a two-leaf Merkle tree over `leaves` (each `(data_hash, end_offset)`)
    /// and returns `(root, data_path_for(leaf_index))`.
    fn build_tree(leaves: &[([u8; 32], u128)]) -> (Hash256, Vec<Vec<u8>>) {
        assert_eq!(leaves.len(), 2, "test helper only builds 2-leaf trees");

        let leaf_paths: Vec<Vec<u8>> = leaves
            .iter()
            .map(|(hash, end)| {
                let mut path = Vec::new();
                path.extend_from_slice(hash);
                path.extend_from_slice(&to_note_vec(*end));
                path
            })
            .collect();

        let (left_hash, left_end) = leaves[0];
        let (right_hash, _) = leaves[1];

        let branch_hash = hash_all_sha256(&[&left_hash, &right_hash, &to_note_vec(left_end)]);
        let branch_prefix = branch_hash_bytes(left_hash, right_hash, left_end);

        let mut left_full = branch_prefix.clone();
        left_full.extend_from_slice(&leaf_paths[0]);

        let mut right_full = branch_prefix;
        right_full.extend_from_slice(&leaf_paths[1]);

        (Hash256::from_slice(&branch_hash), vec![left_full, right_full])
    }

    fn branch_hash_bytes(left_id: [u8; 32], right_id: [u8; 32], offset: u128) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&left_id);
        out.extend_from_slice(&right_id);
        out.extend_from_slice(&[0u8; NOTE_SIZE - 8]);
        out.extend_from_slice(&to_note_vec(offset)[NOTE_SIZE - 8..]);
        out
    }

    #[test]
    fn validate_data_path_accepts_a_correctly_built_proof() {
        let left_chunk = b"left-chunk-bytes".to_vec();
        let right_chunk = b"right-chunk-bytes!".to_vec();
        let left_id = chunk_id_of(&left_chunk).to_fixed_bytes();
        let right_id = chunk_id_of(&right_chunk).to_fixed_bytes();

        let left_end = left_chunk.len() as u128;
        let tx_size = (left_chunk.len() + right_chunk.len()) as u128;

        let (root, paths) = build_tree(&[(left_id, left_end), (right_id, tx_size)]);

        let chunk_end = validate_data_path(root, 1, tx_size, &paths[0], &left_chunk).unwrap();
        assert_eq!(chunk_end, left_end);

        let chunk_end = validate_data_path(root, tx_size, tx_size, &paths[1], &right_chunk).unwrap();
        assert_eq!(chunk_end, tx_size);
    }

    #[test]
    fn validate_data_path_rejects_tampered_chunk() {
        let left_chunk = b"left-chunk-bytes".to_vec();
        let right_chunk = b"right-chunk-bytes!".to_vec();
        let left_id = chunk_id_of(&left_chunk).to_fixed_bytes();
        let right_id = chunk_id_of(&right_chunk).to_fixed_bytes();
        let left_end = left_chunk.len() as u128;
        let tx_size = (left_chunk.len() + right_chunk.len()) as u128;
        let (root, paths) = build_tree(&[(left_id, left_end), (right_id, tx_size)]);

        let tampered = b"tampered-chunk!!".to_vec();
        let err = validate_data_path(root, 1, tx_size, &paths[0], &tampered).unwrap_err();
        assert_eq!(err, SyncError::InvalidProof);
    }

    #[test]
    fn validate_data_path_rejects_offset_outside_tx() {
        let left_chunk = b"left-chunk-bytes".to_vec();
        let right_chunk = b"right-chunk-bytes!".to_vec();
        let left_id = chunk_id_of(&left_chunk).to_fixed_bytes();
        let right_id = chunk_id_of(&right_chunk).to_fixed_bytes();
        let left_end = left_chunk.len() as u128;
        let tx_size = (left_chunk.len() + right_chunk.len()) as u128;
        let (root, paths) = build_tree(&[(left_id, left_end), (right_id, tx_size)]);

        let err = validate_data_path(root, tx_size + 1, tx_size, &paths[0], &left_chunk).unwrap_err();
        assert_eq!(err, SyncError::InvalidProof);
    }

    #[test]
    fn proof_ratio_heuristic_matches_source() {
        assert!(proof_ratio_is_attractive(&[1, 2, 3], &[0u8; 10]));
        assert!(!proof_ratio_is_attractive(&[], &[0u8; 10]));
        assert!(!proof_ratio_is_attractive(&[0u8; 20], &[0u8; 10]));
    }
}
