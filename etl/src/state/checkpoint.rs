use std::future::Future;

use crate::error::EtlResult;

/// Builds the lease key under which the checkpoints of a table are stored.
pub fn lease_key(prefix: &str, table_name: &str) -> String {
    format!("{prefix}{table_name}")
}

/// Durable store of change stream positions.
///
/// A checkpoint is the sequence number of the last record of a partition whose modification was
/// applied to the destination. Checkpoints of one table share a lease key, see [`lease_key`].
pub trait CheckpointStore {
    /// Returns the checkpoint of a partition, `None` if it was never checkpointed.
    fn get_checkpoint(
        &self,
        lease_key: &str,
        partition_id: &str,
    ) -> impl Future<Output = EtlResult<Option<String>>> + Send;

    /// Records `sequence_number` as the checkpoint of a partition, replacing the previous one.
    fn store_checkpoint(
        &self,
        lease_key: &str,
        partition_id: &str,
        sequence_number: &str,
    ) -> impl Future<Output = EtlResult<()>> + Send;
}
