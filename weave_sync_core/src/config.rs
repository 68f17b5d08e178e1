//! Engine configuration (§6 "Configuration (enumerated)"), gathered into one
//! struct with a `Default` impl so every magic number lives in one named
//! home instead of being scattered through the code.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub consult_peer_records_count: usize,
    pub pick_peers_out_of_random_n: usize,
    pub peer_sync_records_frequency: Duration,
    pub track_confirmations: u64,
    pub max_shared_intervals: usize,
    pub extra_before_compaction: usize,
    pub scan_missing_chunks_frequency: Duration,
    pub disk_pool_scan_frequency: Duration,
    pub remove_expired_data_roots_frequency: Duration,
    pub disk_pool_data_root_expiration: Duration,
    pub max_disk_pool_data_root_buffer: u64,
    pub max_disk_pool_buffer: u64,
    pub max_served_tx_data_size: u64,
    pub disk_data_buffer: u64,
    pub disk_space_check_frequency: Duration,
    pub admit_chunk_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let store_blocks_behind_current = 50;
        Self {
            consult_peer_records_count: 5,
            pick_peers_out_of_random_n: 20,
            peer_sync_records_frequency: Duration::from_secs(120),
            track_confirmations: 2 * store_blocks_behind_current,
            max_shared_intervals: 10_000,
            extra_before_compaction: 100,
            scan_missing_chunks_frequency: Duration::from_secs(2),
            disk_pool_scan_frequency: Duration::from_secs(120),
            remove_expired_data_roots_frequency: Duration::from_secs(60),
            disk_pool_data_root_expiration: Duration::from_secs(2 * 3600),
            max_disk_pool_data_root_buffer: 50 * 1024 * 1024,
            max_disk_pool_buffer: 2000 * 1024 * 1024,
            max_served_tx_data_size: 12 * 1024 * 1024,
            disk_data_buffer: 1024 * 1024 * 1024,
            disk_space_check_frequency: Duration::from_secs(30),
            admit_chunk_timeout: Duration::from_secs(5),
        }
    }
}
