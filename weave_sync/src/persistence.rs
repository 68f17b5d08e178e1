//! Disk-backed home for the persisted state blob (§6 "Persisted state
//! blob"): a thin borsh read/write over a single file path, so `node.rs`
//! doesn't have to know the encoding.

use std::path::{Path, PathBuf};

use weave_sync_core::PersistedState;

/// Where the state blob lives under a node's data directory.
pub fn state_path(data_dir: &Path) -> PathBuf {
    data_dir.join("data_sync_state")
}

/// Loads a previously written blob, if any. A missing file is not an error —
/// it just means this is the node's first run — but a present, unreadable
/// one is, since silently discarding corrupt state would throw away a
/// restart's whole point.
pub fn load(data_dir: &Path) -> eyre::Result<Option<PersistedState>> {
    let path = state_path(data_dir);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(&path)?;
    let state: PersistedState = borsh::from_slice(&bytes)?;
    Ok(Some(state))
}

/// Rewrites the blob. Written to a temp file first and renamed into place so
/// a crash mid-write can't leave a truncated file behind.
pub fn save(data_dir: &Path, state: &PersistedState) -> eyre::Result<()> {
    std::fs::create_dir_all(data_dir)?;
    let path = state_path(data_dir);
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, borsh::to_vec(state)?)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let state = PersistedState { sync_record: vec![1, 2, 3], block_index: Vec::new(), disk_pool: Vec::new(), disk_pool_size: 7 };
        save(dir.path(), &state).unwrap();
        let loaded = load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.sync_record, vec![1, 2, 3]);
        assert_eq!(loaded.disk_pool_size, 7);
    }
}
