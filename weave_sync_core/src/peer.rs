//! Peer transport (§6: `get_chunk(peer, absolute_offset) -> Proof | Error`,
//! `get_sync_record(peer) -> IntervalSet | Error`) and the
//! `PeerSyncRecords` bookkeeping the fetch loop consults to pick a peer that
//! actually has the byte it wants.
//!
//! `HttpPeerClient`'s retry loop follows the usual shape for a flaky HTTP
//! collaborator: fixed retry budget, a short sleep between attempts, and a
//! single `Result` collapsing both transport and protocol failures.

use std::collections::HashMap;
use std::time::Duration;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use weave_sync_intervals::IntervalSet;
use weave_sync_types::{Hash256, SyncError};

/// A fetched chunk's proof material, as returned by a peer's `get_chunk`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerChunkProof {
    pub chunk: Vec<u8>,
    pub data_path: Vec<u8>,
    pub tx_path: Vec<u8>,
    pub tx_root: Hash256,
}

/// Opaque peer identity; the host supplies whatever addressing scheme it
/// uses (URL, multiaddr, …) — this crate only needs it as a map key.
pub type PeerId = String;

#[async_trait::async_trait]
pub trait PeerClient: Send + Sync {
    async fn get_chunk(&self, peer: &PeerId, absolute_offset: u128) -> weave_sync_types::Result<PeerChunkProof>;
    async fn get_sync_record(&self, peer: &PeerId) -> weave_sync_types::Result<IntervalSet>;
}

/// Peers' most recently fetched advertised sync records, possibly stale.
#[derive(Default)]
pub struct PeerSyncRecords {
    records: HashMap<PeerId, IntervalSet>,
    recently_failed: HashMap<PeerId, ()>,
}

impl PeerSyncRecords {
    pub fn update(&mut self, peer: PeerId, record: IntervalSet) {
        self.recently_failed.remove(&peer);
        self.records.insert(peer, record);
    }

    pub fn drop_peer(&mut self, peer: &PeerId) {
        self.records.remove(peer);
    }

    pub fn mark_recently_failed(&mut self, peer: PeerId) {
        self.recently_failed.insert(peer, ());
    }

    pub fn clear_recently_failed(&mut self) {
        self.recently_failed.clear();
    }

    /// Peers (excluding `exclude` and anyone marked recently-failed this
    /// cycle) whose advertised record contains `byte`.
    pub fn peers_with_byte(&self, byte: u128, exclude: &[PeerId]) -> Vec<PeerId> {
        self.records
            .iter()
            .filter(|(peer, record)| {
                !exclude.contains(peer) && !self.recently_failed.contains_key(*peer) && record.is_inside(byte)
            })
            .map(|(peer, _)| peer.clone())
            .collect()
    }

    /// Every peer's own advertised record, excluding anyone recently-failed
    /// or named in `exclude`. Iteration order is whatever the underlying map
    /// gives, matching §4.4 step 1's "iteration order unspecified".
    pub fn candidates<'a>(&'a self, exclude: &'a [PeerId]) -> impl Iterator<Item = (&'a PeerId, &'a IntervalSet)> {
        self.records.iter().filter(move |(peer, _)| !exclude.contains(peer) && !self.recently_failed.contains_key(*peer))
    }

    /// Picks up to `count` peers uniformly at random out of a random sample
    /// of up to `out_of_random_n` known peers (§6 `PICK_PEERS_OUT_OF_RANDOM_N`).
    pub fn pick_random(&self, count: usize, out_of_random_n: usize, rng: &mut impl rand::Rng) -> Vec<PeerId> {
        let mut known: Vec<PeerId> = self.records.keys().cloned().collect();
        known.shuffle(rng);
        known.truncate(out_of_random_n);
        known.truncate(count);
        known
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// `reqwest`-backed [`PeerClient`]: peer ids are base URLs, endpoints follow
/// a `/block_index/<start>/<end>`-style convention.
pub struct HttpPeerClient {
    client: reqwest::Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpPeerClient {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new(), max_retries: 3, retry_delay: Duration::from_millis(500) }
    }
}

impl Default for HttpPeerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PeerClient for HttpPeerClient {
    async fn get_chunk(&self, peer: &PeerId, absolute_offset: u128) -> weave_sync_types::Result<PeerChunkProof> {
        let url = format!("{peer}/chunk/{absolute_offset}");
        let mut attempts = 0;
        loop {
            let result = self.client.get(&url).send().await;
            match result {
                Ok(res) if res.status().is_success() => {
                    return res.json::<PeerChunkProof>().await.map_err(|_| SyncError::InvalidProof);
                }
                _ => {
                    attempts += 1;
                    if attempts >= self.max_retries {
                        return Err(SyncError::TimedOut);
                    }
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    async fn get_sync_record(&self, peer: &PeerId) -> weave_sync_types::Result<IntervalSet> {
        let url = format!("{peer}/data_sync_record");
        let mut attempts = 0;
        loop {
            let result = self.client.get(&url).send().await;
            match result {
                Ok(res) if res.status().is_success() => {
                    let entries: Vec<(u128, u128)> = res.json().await.map_err(|_| SyncError::Invalid)?;
                    let mut set = IntervalSet::new();
                    for (end, start) in entries {
                        set.add(end, start);
                    }
                    return Ok(set);
                }
                _ => {
                    attempts += 1;
                    if attempts >= self.max_retries {
                        return Err(SyncError::TimedOut);
                    }
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peers_with_byte_excludes_failed_and_named_peers() {
        let mut records = PeerSyncRecords::default();
        let mut a = IntervalSet::new();
        a.add(100, 0);
        let mut b = IntervalSet::new();
        b.add(100, 0);
        records.update("a".to_string(), a);
        records.update("b".to_string(), b);
        records.mark_recently_failed("b".to_string());

        let found = records.peers_with_byte(50, &[]);
        assert_eq!(found, vec!["a".to_string()]);

        let found = records.peers_with_byte(50, &["a".to_string()]);
        assert!(found.is_empty());
    }
}
