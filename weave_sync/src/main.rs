//! Runs a single weave sync node against a local RocksDB-style KV store and
//! filesystem chunk blobs, fetching from whatever peers are passed on the
//! command line until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use paris::Logger;
use weave_sync_core::{Config, HttpPeerClient, PeerClient, UnboundedDiskSpaceMonitor};
use weave_sync_indexes::{KVStore, MemoryKVStore};
use weave_sync_storage::FsChunkBlobStore;

use weave_sync::Node;

fn data_dir() -> PathBuf {
    std::env::var("WEAVE_SYNC_DATA_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("./weave_sync_data"))
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let mut log = Logger::new();
    log.info("starting weave sync node");

    let data_dir = data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // A production host would swap this for a persistent KV store (the
    // `KVStore` trait is the seam); the in-memory one is enough to drive
    // the engine end to end without pulling in an extra dependency here.
    let kv: Arc<dyn KVStore> = Arc::new(MemoryKVStore::new());
    let blobs = Arc::new(FsChunkBlobStore::new(data_dir.join("chunks"))?);
    let disk = Arc::new(UnboundedDiskSpaceMonitor::new(&data_dir));
    let peer_client: Arc<dyn PeerClient> = Arc::new(HttpPeerClient::new());

    let node = Node::spawn(&data_dir, kv, blobs, disk, peer_client, Config::default())?;
    log.success("engine actor spawned, entering the periodic task loop");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    node.run_until(shutdown).await;

    log.success("weave sync node stopped cleanly");
    Ok(())
}
