//! The `KVStore` contract (§4.2, §6). The real embedded ordered key-value
//! store is an external collaborator per §1 — "a host integrator supplies
//! these" — so this module only defines the trait and the column-family
//! names every implementation must expose, plus a reference in-memory
//! implementation good enough to drive the engine in tests.

/// The seven column families the core requires, named exactly as §6's
/// "opens a named database with seven column families" lists them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ColumnFamily {
    ChunksIndex,
    MissingChunksIndex,
    DataRootIndex,
    DataRootOffsetIndex,
    TxIndex,
    TxOffsetIndex,
    DiskPoolChunksIndex,
}

impl ColumnFamily {
    pub const ALL: [ColumnFamily; 7] = [
        ColumnFamily::ChunksIndex,
        ColumnFamily::MissingChunksIndex,
        ColumnFamily::DataRootIndex,
        ColumnFamily::DataRootOffsetIndex,
        ColumnFamily::TxIndex,
        ColumnFamily::TxOffsetIndex,
        ColumnFamily::DiskPoolChunksIndex,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ColumnFamily::ChunksIndex => "chunks_index",
            ColumnFamily::MissingChunksIndex => "missing_chunks_index",
            ColumnFamily::DataRootIndex => "data_root_index",
            ColumnFamily::DataRootOffsetIndex => "data_root_offset_index",
            ColumnFamily::TxIndex => "tx_index",
            ColumnFamily::TxOffsetIndex => "tx_offset_index",
            ColumnFamily::DiskPoolChunksIndex => "disk_pool_chunks_index",
        }
    }
}

/// Cursor for [`KVStore::cyclic_iterator_move`]: either the sentinel "start
/// at the smallest key" or "resume strictly after this key".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    First,
    After(Vec<u8>),
}

/// Ordered key-value store contract required by the core (§4.2). All offset
/// keys passed through this trait are already encoded as fixed-width
/// big-endian bytes by the typed index wrappers in [`crate::index`]; this
/// trait itself is encoding-agnostic.
pub trait KVStore: Send + Sync {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> Option<Vec<u8>>;
    fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]);
    fn delete(&self, cf: ColumnFamily, key: &[u8]);

    /// Smallest key `>= key`, with its value.
    fn get_next(&self, cf: ColumnFamily, key: &[u8]) -> Option<(Vec<u8>, Vec<u8>)>;

    /// Greatest key `<= key`, with its value.
    fn get_prev(&self, cf: ColumnFamily, key: &[u8]) -> Option<(Vec<u8>, Vec<u8>)>;

    /// All entries with key in `[lo, hi)`, in ascending key order.
    fn get_range(&self, cf: ColumnFamily, lo: &[u8], hi: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;

    /// Deletes every entry with key in `[lo, hi)`.
    fn delete_range(&self, cf: ColumnFamily, lo: &[u8], hi: &[u8]);

    /// Advances `cursor` once, wrapping back to the smallest key after the
    /// last one. Returns `None` only when the column family is empty — it
    /// must never loop forever on an empty store.
    fn cyclic_iterator_move(&self, cf: ColumnFamily, cursor: &Cursor) -> Option<(Vec<u8>, Vec<u8>, Cursor)>;
}
