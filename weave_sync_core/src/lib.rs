//! The sync engine actor, its disk-pool manager, and the peer transport it
//! drives its fetch loop through.

pub mod actor;
pub mod config;
pub mod disk_pool;
pub mod disk_space;
pub mod engine;
pub mod fetch;
pub mod peer;
pub mod persist;
pub mod registry;

pub use actor::{EngineHandle, EngineMessage};
pub use config::Config;
pub use disk_space::{DiskSpaceMonitor, FixedDiskSpaceMonitor, UnboundedDiskSpaceMonitor};
pub use engine::{BlockDescriptor, BlockIndexEntry, ChunkSubmission, EngineState, SizeTaggedTx, UpdateOutcome};
pub use peer::{HttpPeerClient, PeerChunkProof, PeerClient, PeerId, PeerSyncRecords};
pub use persist::PersistedState;
