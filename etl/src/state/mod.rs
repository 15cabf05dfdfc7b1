//! Replication progress: per-table phases and change stream checkpoints.

pub mod checkpoint;
pub mod memory;
pub mod table;

pub use checkpoint::{CheckpointStore, lease_key};
pub use memory::MemoryCheckpointStore;
pub use table::TableReplicationPhase;
