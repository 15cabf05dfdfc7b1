//! Readers turning source pages into schema deltas, row batches and table modifications.

pub mod snapshot;
pub mod stream;

pub use snapshot::{ScannedBatch, SnapshotReader};
pub use stream::{ChangeStreamReader, StreamedBatch};
