//! The seven ordered-map indices the sync engine reads and writes (§3, §4.2,
//! §6), and the [`KVStore`] contract they're built on.
//!
//! This crate only knows about bytes and the shapes stored under each
//! column family; it has no opinion on fetching, proof validation, or the
//! actor that serializes mutations — those live in `weave_sync_proof` and
//! `weave_sync_core`.

pub mod index;
pub mod kv;
pub mod memory;
pub mod values;

pub use kv::{ColumnFamily, Cursor, KVStore};
pub use memory::MemoryKVStore;
