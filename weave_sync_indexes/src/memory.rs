//! In-memory reference [`KVStore`] (§1: the real embedded store is external;
//! this is what drives the engine's own unit and integration tests, and what
//! `weave_sync`'s binary falls back to when no backing store is configured).

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::kv::{ColumnFamily, Cursor, KVStore};

#[derive(Default)]
struct Family {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
}

pub struct MemoryKVStore {
    families: [Mutex<Family>; 7],
}

impl Default for MemoryKVStore {
    fn default() -> Self {
        Self { families: std::array::from_fn(|_| Mutex::new(Family::default())) }
    }
}

impl MemoryKVStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn idx(cf: ColumnFamily) -> usize {
        ColumnFamily::ALL.iter().position(|c| *c == cf).expect("exhaustive")
    }
}

impl KVStore for MemoryKVStore {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> Option<Vec<u8>> {
        self.families[Self::idx(cf)].lock().unwrap().map.get(key).cloned()
    }

    fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) {
        self.families[Self::idx(cf)].lock().unwrap().map.insert(key.to_vec(), value.to_vec());
    }

    fn delete(&self, cf: ColumnFamily, key: &[u8]) {
        self.families[Self::idx(cf)].lock().unwrap().map.remove(key);
    }

    fn get_next(&self, cf: ColumnFamily, key: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
        self.families[Self::idx(cf)]
            .lock()
            .unwrap()
            .map
            .range(key.to_vec()..)
            .next()
            .map(|(k, v)| (k.clone(), v.clone()))
    }

    fn get_prev(&self, cf: ColumnFamily, key: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
        self.families[Self::idx(cf)]
            .lock()
            .unwrap()
            .map
            .range(..=key.to_vec())
            .next_back()
            .map(|(k, v)| (k.clone(), v.clone()))
    }

    fn get_range(&self, cf: ColumnFamily, lo: &[u8], hi: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.families[Self::idx(cf)]
            .lock()
            .unwrap()
            .map
            .range(lo.to_vec()..hi.to_vec())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn delete_range(&self, cf: ColumnFamily, lo: &[u8], hi: &[u8]) {
        let mut fam = self.families[Self::idx(cf)].lock().unwrap();
        let keys: Vec<Vec<u8>> = fam.map.range(lo.to_vec()..hi.to_vec()).map(|(k, _)| k.clone()).collect();
        for k in keys {
            fam.map.remove(&k);
        }
    }

    fn cyclic_iterator_move(&self, cf: ColumnFamily, cursor: &Cursor) -> Option<(Vec<u8>, Vec<u8>, Cursor)> {
        let fam = self.families[Self::idx(cf)].lock().unwrap();
        if fam.map.is_empty() {
            return None;
        }
        let entry = match cursor {
            Cursor::First => fam.map.iter().next(),
            Cursor::After(last) => {
                let mut after = fam.map.range((std::ops::Bound::Excluded(last.clone()), std::ops::Bound::Unbounded));
                after.next().or_else(|| fam.map.iter().next())
            }
        };
        entry.map(|(k, v)| (k.clone(), v.clone(), Cursor::After(k.clone())))
    }
}
