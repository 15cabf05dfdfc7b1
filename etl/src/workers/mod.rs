//! Background workers loading snapshots and applying change stream partitions.

pub mod base;
pub mod pool;
pub mod snapshot;
pub mod stream;
