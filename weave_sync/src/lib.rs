//! Wires the sync engine crates into a runnable node: loads the persisted
//! state blob, spawns the engine actor, and runs the periodic tasks of §4.4,
//! §4.7, and §4.8 on their configured frequencies.

pub mod node;
pub mod persistence;

pub use node::Node;
