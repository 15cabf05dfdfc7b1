use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::state::checkpoint::CheckpointStore;

#[derive(Debug, Default)]
struct Inner {
    checkpoints: HashMap<(String, String), String>,
    fail_writes: bool,
}

/// Checkpoint store keeping positions in memory, lost on restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes following writes fail when `fail` is set.
    pub async fn fail_writes(&self, fail: bool) {
        self.inner.lock().await.fail_writes = fail;
    }

    /// Returns every stored checkpoint as `(lease_key, partition_id) -> sequence_number`.
    pub async fn checkpoints(&self) -> HashMap<(String, String), String> {
        self.inner.lock().await.checkpoints.clone()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    async fn get_checkpoint(
        &self,
        lease_key: &str,
        partition_id: &str,
    ) -> EtlResult<Option<String>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .checkpoints
            .get(&(lease_key.to_owned(), partition_id.to_owned()))
            .cloned())
    }

    async fn store_checkpoint(
        &self,
        lease_key: &str,
        partition_id: &str,
        sequence_number: &str,
    ) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.fail_writes {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Injected checkpoint failure",
                lease_key
            );
        }

        inner.checkpoints.insert(
            (lease_key.to_owned(), partition_id.to_owned()),
            sequence_number.to_owned(),
        );

        Ok(())
    }
}
