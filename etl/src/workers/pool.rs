use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::workers::base::WorkerType;

/// Set of spawned workers, each identified by a key.
///
/// A key is spawned at most once over the lifetime of the pool, so a finished worker is never
/// started again.
#[derive(Debug)]
pub struct WorkerPool {
    spawned: HashSet<String>,
    active: HashSet<String>,
    join_set: JoinSet<(String, WorkerType, EtlResult<()>)>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self {
            spawned: HashSet::new(),
            active: HashSet::new(),
            join_set: JoinSet::new(),
        }
    }

    /// Spawns `future` under `key`. Returns `false` without spawning if `key` was spawned before.
    ///
    /// A panic of the worker is turned into an error of the worker type's panic kind.
    pub fn spawn<F>(&mut self, key: impl Into<String>, worker_type: WorkerType, future: F) -> bool
    where
        F: Future<Output = EtlResult<()>> + Send + 'static,
    {
        let key = key.into();
        if !self.spawned.insert(key.clone()) {
            return false;
        }

        debug!(%worker_type, "spawned worker");

        self.active.insert(key.clone());
        self.join_set.spawn(async move {
            let result = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(etl_error!(
                    worker_type.panic_kind(),
                    "Worker panicked",
                    worker_type
                )),
            };

            (key, worker_type, result)
        });

        true
    }

    pub fn is_spawned(&self, key: &str) -> bool {
        self.spawned.contains(key)
    }

    /// Whether the worker spawned under `key` is still running.
    pub fn is_active(&self, key: &str) -> bool {
        self.active.contains(key)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Waits for the next worker to finish and returns its result.
    ///
    /// Returns `None` when no worker is running.
    pub async fn join_next(&mut self) -> Option<EtlResult<()>> {
        let joined = self.join_set.join_next().await?;

        Some(match joined {
            Ok((key, worker_type, result)) => {
                self.active.remove(&key);
                match &result {
                    Ok(()) => debug!(%worker_type, "worker completed"),
                    Err(err) => error!(%worker_type, error = %err, "worker completed with error"),
                }
                result
            }
            Err(join_err) => Err(etl_error!(
                ErrorKind::InvalidState,
                "Worker task did not complete",
                join_err
            )),
        })
    }

    /// Waits for every worker and aggregates their errors.
    pub async fn wait_all(&mut self) -> EtlResult<()> {
        let mut errors = Vec::new();
        while let Some(result) = self.join_next().await {
            if let Err(err) = result {
                errors.push(err);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}
