//! The Disk-Pool Manager (§4.7): admission buffer for chunks whose data
//! root hasn't confirmed on chain yet, plus `DiskPoolDataRoots`, the one
//! piece of engine state that is explicitly in-memory-only rather than a
//! `KVStore` column family (§3).

use std::collections::{HashMap, HashSet};

use weave_sync_types::{DataRootKey, Hash256};

/// `tx_id_set_or_sentinel`: pending submissions track which tx ids
/// referenced this data root so a later join can tell whether they landed;
/// once confirmed on chain the set is replaced by the sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxIdSet {
    Pending(HashSet<Hash256>),
    Confirmed,
}

#[derive(Debug, Clone)]
pub struct DiskPoolDataRootEntry {
    pub accumulated_size: u64,
    pub timestamp_us: u128,
    pub tx_ids: TxIdSet,
}

#[derive(Default)]
pub struct DiskPoolManager {
    data_roots: HashMap<DataRootKey, DiskPoolDataRootEntry>,
    disk_pool_size: u64,
}

impl DiskPoolManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disk_pool_size(&self) -> u64 {
        self.disk_pool_size
    }

    pub fn get(&self, key: &DataRootKey) -> Option<&DiskPoolDataRootEntry> {
        self.data_roots.get(key)
    }

    pub fn contains(&self, key: &DataRootKey) -> bool {
        self.data_roots.contains_key(key)
    }

    /// `add_data_root_to_disk_pool`: registers that a tx referencing
    /// `(data_root, tx_size)` has been submitted to the mempool.
    pub fn add_data_root(&mut self, key: DataRootKey, tx_id: Hash256, timestamp_us: u128) {
        let entry = self.data_roots.entry(key).or_insert_with(|| DiskPoolDataRootEntry {
            accumulated_size: 0,
            timestamp_us,
            tx_ids: TxIdSet::Pending(HashSet::new()),
        });
        if let TxIdSet::Pending(ids) = &mut entry.tx_ids {
            ids.insert(tx_id);
        }
    }

    /// `maybe_drop_data_root_from_disk_pool`: a previously-submitted tx was
    /// dropped from the mempool; remove it only if no other pending tx (and
    /// no confirmed placement) still references this data root.
    pub fn maybe_drop_data_root(&mut self, key: &DataRootKey, tx_id: Hash256) {
        if let Some(entry) = self.data_roots.get_mut(key) {
            if let TxIdSet::Pending(ids) = &mut entry.tx_ids {
                ids.remove(&tx_id);
                if ids.is_empty() {
                    self.disk_pool_size -= entry.accumulated_size;
                    self.data_roots.remove(key);
                }
            }
        }
    }

    /// Enforces the per-data-root and global disk-pool size caps (§4.5
    /// admission rule) before accepting `additional_bytes`.
    pub fn check_size_caps(&self, key: &DataRootKey, additional_bytes: u64, max_data_root_buffer: u64, max_total_buffer: u64) -> weave_sync_types::Result<()> {
        let current = self.data_roots.get(key).map(|e| e.accumulated_size).unwrap_or(0);
        if current + additional_bytes > max_data_root_buffer {
            return Err(weave_sync_types::SyncError::ExceedsDataRootSizeLimit);
        }
        if self.disk_pool_size + additional_bytes > max_total_buffer {
            return Err(weave_sync_types::SyncError::ExceedsDiskPoolSizeLimit);
        }
        Ok(())
    }

    pub fn bump_accumulated_size(&mut self, key: &DataRootKey, additional_bytes: u64) {
        if let Some(entry) = self.data_roots.get_mut(key) {
            entry.accumulated_size += additional_bytes;
            self.disk_pool_size += additional_bytes;
        }
    }

    /// Replaces a data root's size in place once its bytes are confirmed on
    /// chain, shrinking `disk_pool_size` by the amount now accounted for
    /// elsewhere (§4.6 `add_tip_block`).
    pub fn confirm(&mut self, key: &DataRootKey) {
        if let Some(entry) = self.data_roots.get_mut(key) {
            self.disk_pool_size -= entry.accumulated_size;
            entry.accumulated_size = 0;
            entry.tx_ids = TxIdSet::Confirmed;
        }
    }

    /// Refreshes a data root's timestamp after a reorg orphans its
    /// placement, giving users a fresh expiration window to resubmit.
    pub fn refresh_timestamp(&mut self, key: &DataRootKey, now_us: u128) {
        if let Some(entry) = self.data_roots.get_mut(key) {
            entry.timestamp_us = now_us;
        } else {
            self.data_roots.insert(
                *key,
                DiskPoolDataRootEntry { accumulated_size: 0, timestamp_us: now_us, tx_ids: TxIdSet::Confirmed },
            );
        }
    }

    /// Periodic "expire disk-pool data roots": drops any entry whose
    /// `timestamp + expiration_time_us < now`, recomputing `disk_pool_size`.
    pub fn expire(&mut self, now_us: u128, expiration_us: u128) {
        self.data_roots.retain(|_, entry| entry.timestamp_us + expiration_us >= now_us);
        self.disk_pool_size = self.data_roots.values().map(|e| e.accumulated_size).sum();
    }

    /// A flat, `borsh`-serializable snapshot of the in-memory-only
    /// `DiskPoolDataRoots` map, for the persisted state blob (§6).
    pub fn snapshot(&self) -> Vec<DiskPoolSnapshotEntry> {
        self.data_roots
            .iter()
            .map(|(key, entry)| {
                let tx_ids = match &entry.tx_ids {
                    TxIdSet::Pending(ids) => ids.iter().copied().collect(),
                    TxIdSet::Confirmed => Vec::new(),
                };
                DiskPoolSnapshotEntry {
                    key: *key,
                    accumulated_size: entry.accumulated_size,
                    timestamp_us: entry.timestamp_us,
                    confirmed: matches!(entry.tx_ids, TxIdSet::Confirmed),
                    tx_ids,
                }
            })
            .collect()
    }

    pub fn restore(entries: Vec<DiskPoolSnapshotEntry>) -> Self {
        let mut manager = Self::new();
        for entry in entries {
            let tx_ids = if entry.confirmed { TxIdSet::Confirmed } else { TxIdSet::Pending(entry.tx_ids.into_iter().collect()) };
            manager.disk_pool_size += entry.accumulated_size;
            manager.data_roots.insert(entry.key, DiskPoolDataRootEntry { accumulated_size: entry.accumulated_size, timestamp_us: entry.timestamp_us, tx_ids });
        }
        manager
    }
}

/// Borsh-encodable row of [`DiskPoolManager::snapshot`].
#[derive(Debug, Clone, borsh::BorshSerialize, borsh::BorshDeserialize)]
pub struct DiskPoolSnapshotEntry {
    pub key: DataRootKey,
    pub accumulated_size: u64,
    pub timestamp_us: u128,
    pub confirmed: bool,
    pub tx_ids: Vec<Hash256>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_sync_types::Hash256;

    fn key(n: u8) -> DataRootKey {
        let mut root = Hash256::zero();
        root.as_bytes_mut()[0] = n;
        DataRootKey::new(root, 1000)
    }

    #[test]
    fn disk_pool_size_tracks_accumulated_size_across_entries() {
        let mut pool = DiskPoolManager::new();
        let k1 = key(1);
        let k2 = key(2);
        pool.add_data_root(k1, Hash256::zero(), 0);
        pool.add_data_root(k2, Hash256::zero(), 0);
        pool.bump_accumulated_size(&k1, 100);
        pool.bump_accumulated_size(&k2, 50);
        assert_eq!(pool.disk_pool_size(), 150);
    }

    #[test]
    fn confirm_zeroes_accumulated_size_and_shrinks_pool() {
        let mut pool = DiskPoolManager::new();
        let k = key(1);
        pool.add_data_root(k, Hash256::zero(), 0);
        pool.bump_accumulated_size(&k, 100);
        pool.confirm(&k);
        assert_eq!(pool.disk_pool_size(), 0);
        assert_eq!(pool.get(&k).unwrap().tx_ids, TxIdSet::Confirmed);
    }

    #[test]
    fn snapshot_then_restore_preserves_size_and_pending_tx_ids() {
        let mut pool = DiskPoolManager::new();
        let pending = key(1);
        let confirmed = key(2);
        let mut tx_a = Hash256::zero();
        tx_a.as_bytes_mut()[1] = 7;
        pool.add_data_root(pending, tx_a, 10);
        pool.bump_accumulated_size(&pending, 30);
        pool.add_data_root(confirmed, Hash256::zero(), 20);
        pool.bump_accumulated_size(&confirmed, 5);
        pool.confirm(&confirmed);

        let restored = DiskPoolManager::restore(pool.snapshot());
        assert_eq!(restored.disk_pool_size(), pool.disk_pool_size());
        assert_eq!(restored.get(&pending).unwrap().tx_ids, TxIdSet::Pending([tx_a].into_iter().collect()));
        assert_eq!(restored.get(&confirmed).unwrap().tx_ids, TxIdSet::Confirmed);
    }

    #[test]
    fn maybe_drop_only_removes_when_no_pending_tx_remains() {
        let mut pool = DiskPoolManager::new();
        let k = key(1);
        let mut tx_a = Hash256::zero();
        tx_a.as_bytes_mut()[1] = 1;
        let mut tx_b = Hash256::zero();
        tx_b.as_bytes_mut()[1] = 2;
        pool.add_data_root(k, tx_a, 0);
        pool.add_data_root(k, tx_b, 0);
        pool.bump_accumulated_size(&k, 10);

        pool.maybe_drop_data_root(&k, tx_a);
        assert!(pool.contains(&k), "still referenced by tx_b");

        pool.maybe_drop_data_root(&k, tx_b);
        assert!(!pool.contains(&k));
        assert_eq!(pool.disk_pool_size(), 0);
    }

    #[test]
    fn expire_drops_stale_entries_and_recomputes_size() {
        let mut pool = DiskPoolManager::new();
        let stale = key(1);
        let fresh = key(2);
        pool.refresh_timestamp(&stale, 0);
        pool.refresh_timestamp(&fresh, 1000);
        pool.bump_accumulated_size(&fresh, 25);

        pool.expire(2000, 500);

        assert!(!pool.contains(&stale));
        assert!(pool.contains(&fresh));
        assert_eq!(pool.disk_pool_size(), 25);
    }

    #[test]
    fn size_caps_reject_over_limit_admission() {
        let mut pool = DiskPoolManager::new();
        let k = key(1);
        pool.add_data_root(k, Hash256::zero(), 0);
        pool.bump_accumulated_size(&k, 90);
        assert!(pool.check_size_caps(&k, 5, 100, 1_000_000).is_ok());
        assert!(pool.check_size_caps(&k, 50, 100, 1_000_000).is_err());
    }
}
