//! Common types shared across the weave sync engine crates: a single place
//! where the cross-cutting primitives (hashes, offsets, the error taxonomy)
//! live so every other crate can depend on them without depending on each
//! other.

use fixed_hash::construct_fixed_hash;
use serde::{Deserialize, Serialize};

pub mod keys;

/// Width, in bytes, of every fixed big-endian offset key written to an index.
/// Called "note size" in the glossary: the deployment-wide width used for all
/// offset keys. 32 bytes is enough to hold a 256-bit offset.
pub const NOTE_SIZE: usize = 32;

/// An absolute (or relative) byte offset into the weave.
///
/// 256-bit offsets are used on the wire; in memory a `u128` is more than
/// enough for any realistic weave size. [`keys::encode_offset`] pads it out
/// to the full [`NOTE_SIZE`]-byte big-endian key used by every index.
pub type Offset = u128;

construct_fixed_hash! {
    /// A 256-bit hash: used for `data_root`, `tx_root`, `data_path_hash`,
    /// `chunk_id`, and block hashes alike. A single width covers every use
    /// here, so there's no need for a second hash type (see DESIGN.md).
    pub struct Hash256(32);
}

impl Hash256 {
    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl Serialize for Hash256 {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(base64_url::encode(self.as_bytes()).as_str())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        let bytes = base64_url::decode(&s).map_err(serde::de::Error::custom)?;
        if bytes.len() != 32 {
            return Err(serde::de::Error::custom("expected a 32 byte hash"));
        }
        let mut out = Hash256::zero();
        out.as_bytes_mut().copy_from_slice(&bytes);
        Ok(out)
    }
}

/// Manual `borsh` impls, since `Hash256` comes from `fixed_hash`'s macro and
/// doesn't derive `borsh` traits itself. Every index value that embeds a hash
/// relies on these to round-trip through the on-disk encodings.
impl borsh::BorshSerialize for Hash256 {
    fn serialize<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(self.as_bytes())
    }
}

impl borsh::BorshDeserialize for Hash256 {
    fn deserialize_reader<R: std::io::Read>(reader: &mut R) -> std::io::Result<Self> {
        let mut buf = [0u8; 32];
        reader.read_exact(&mut buf)?;
        Ok(Hash256::from_slice(&buf))
    }
}

/// Identifies a transaction. Arweave transaction ids are themselves 256-bit
/// hashes, so this is a thin alias rather than a new type.
pub type TxId = Hash256;

/// `(data_root, tx_size)` composite, the natural key for
/// `DataRootIndex` / `DiskPoolDataRoots` / `DiskPoolChunksIndex` entries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, borsh::BorshSerialize, borsh::BorshDeserialize,
)]
pub struct DataRootKey {
    pub data_root: Hash256,
    pub tx_size: Offset,
}

impl DataRootKey {
    pub fn new(data_root: Hash256, tx_size: Offset) -> Self {
        Self { data_root, tx_size }
    }
}

/// The error taxonomy of §7. Every fallible engine operation returns one of
/// these kinds so a caller can match on `kind()` instead of parsing a message,
/// the way `eyre`/eyre-flavored code elsewhere in the pack never needs to but
/// an admission API that backs off and retries does.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("engine has not completed its initial join")]
    NotJoined,

    #[error("chunk not found")]
    ChunkNotFound,

    #[error("not found")]
    NotFound,

    #[error("failed to read chunk from blob store")]
    FailedToReadChunk,

    #[error("invalid input")]
    Invalid,

    #[error("insufficient free disk space")]
    DiskFull,

    #[error("disk pool size limit exceeded")]
    ExceedsDiskPoolSizeLimit,

    #[error("data root size limit exceeded")]
    ExceedsDataRootSizeLimit,

    #[error("data root not found")]
    DataRootNotFound,

    #[error("proof failed verification")]
    InvalidProof,

    #[error("transaction data exceeds the maximum servable size")]
    TxDataTooBig,

    #[error("request timed out")]
    TimedOut,

    #[error("join found no intersection with the existing chain: engine cannot continue")]
    FatalJoinNoIntersection,
}

impl SyncError {
    /// True for the single error kind that should terminate the actor rather
    /// than simply fail the in-flight request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::FatalJoinNoIntersection)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
