//! The chunk blob store (§4.5, §6): on-disk storage for raw chunk bytes and
//! the two-level Merkle proof material (`data_path`) that proves them. Keyed
//! by `data_path_hash`, one file per chunk — plain `File`, `OpenOptions`, and
//! explicit `Read`/`Write`, no embedded database needed for content that's
//! already addressed by its own hash.

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

use weave_sync_types::{Hash256, SyncError};

/// Contract for reading and writing chunk bodies plus their proof material.
/// A chunk is identified by the hash of its `data_path` (`data_path_hash`),
/// which is stable across reorgs and disk-pool promotion since neither
/// changes the bytes, only which index points at them.
pub trait ChunkBlobStore: Send + Sync {
    fn write(&self, data_path_hash: Hash256, chunk: &[u8], data_path: &[u8]) -> weave_sync_types::Result<()>;
    fn read(&self, data_path_hash: Hash256) -> weave_sync_types::Result<(Vec<u8>, Vec<u8>)>;
    fn has(&self, data_path_hash: Hash256) -> bool;
    fn delete(&self, data_path_hash: Hash256) -> weave_sync_types::Result<()>;
}

/// One file per chunk under `root/`, named by the hex of `data_path_hash`,
/// storing `[4-byte LE data_path len][data_path][chunk bytes]`.
pub struct FsChunkBlobStore {
    root: PathBuf,
}

impl FsChunkBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> eyre::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, data_path_hash: Hash256) -> PathBuf {
        self.root.join(hex_encode(data_path_hash.as_bytes()))
    }
}

impl ChunkBlobStore for FsChunkBlobStore {
    fn write(&self, data_path_hash: Hash256, chunk: &[u8], data_path: &[u8]) -> weave_sync_types::Result<()> {
        let path = self.path_for(data_path_hash);
        let mut file = fs::File::create(&path).map_err(|_| SyncError::DiskFull)?;
        let len = data_path.len() as u32;
        file.write_all(&len.to_le_bytes()).map_err(|_| SyncError::DiskFull)?;
        file.write_all(data_path).map_err(|_| SyncError::DiskFull)?;
        file.write_all(chunk).map_err(|_| SyncError::DiskFull)?;
        Ok(())
    }

    fn read(&self, data_path_hash: Hash256) -> weave_sync_types::Result<(Vec<u8>, Vec<u8>)> {
        let path = self.path_for(data_path_hash);
        let mut file = fs::File::open(&path).map_err(|_| SyncError::ChunkNotFound)?;

        let mut len_bytes = [0u8; 4];
        file.read_exact(&mut len_bytes).map_err(|_| SyncError::FailedToReadChunk)?;
        let data_path_len = u32::from_le_bytes(len_bytes) as usize;

        let mut data_path = vec![0u8; data_path_len];
        file.read_exact(&mut data_path).map_err(|_| SyncError::FailedToReadChunk)?;

        let mut chunk = Vec::new();
        file.read_to_end(&mut chunk).map_err(|_| SyncError::FailedToReadChunk)?;

        Ok((chunk, data_path))
    }

    fn has(&self, data_path_hash: Hash256) -> bool {
        self.path_for(data_path_hash).is_file()
    }

    fn delete(&self, data_path_hash: Hash256) -> weave_sync_types::Result<()> {
        let path = self.path_for(data_path_hash);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(_) => Err(SyncError::FailedToReadChunk),
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{:02x}", b).expect("writing to a String never fails");
    }
    out
}
