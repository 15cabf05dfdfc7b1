use std::collections::HashSet;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::concurrency::retry::{RetryPolicy, retry_with_backoff};
use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use crate::conversions::TypeMapper;
use crate::destination::{ConcurrentSink, Sink};
use crate::error::{EtlError, EtlResult};
use crate::replication::ChangeStreamReader;
use crate::schema::SharedTableSchema;
use crate::source::{CursorPosition, PartitionDescription, SourceReader, StreamHandle};
use crate::state::CheckpointStore;
use crate::workers::base::WorkerType;
use crate::workers::pool::WorkerPool;

/// Settings shared by the stream workers of a table.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub table_name: String,
    pub lease_key: String,
    pub poll_interval: Duration,
    pub discovery_interval: Duration,
    pub retry_policy: RetryPolicy,
    pub mapper: TypeMapper,
}

/// Applies one partition of a change stream until it is drained or shutdown is requested.
#[derive(Debug)]
pub struct PartitionWorker<R, S, C> {
    reader: ChangeStreamReader<R>,
    settings: StreamSettings,
    schema: SharedTableSchema,
    sink: ConcurrentSink<S>,
    checkpoints: C,
    shutdown_rx: ShutdownRx,
}

impl<R, S, C> PartitionWorker<R, S, C>
where
    R: SourceReader + Send + Sync,
    S: Sink + Send + Sync,
    C: CheckpointStore + Send + Sync,
{
    pub fn new(
        reader: ChangeStreamReader<R>,
        settings: StreamSettings,
        schema: SharedTableSchema,
        sink: ConcurrentSink<S>,
        checkpoints: C,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            reader,
            settings,
            schema,
            sink,
            checkpoints,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) -> EtlResult<()> {
        let table_name = self.settings.table_name.clone();
        let partition_id = self.reader.partition_id().to_owned();

        info!(%table_name, %partition_id, "applying stream partition");

        while !self.shutdown_rx.is_shutdown() {
            if !self.reader.has_more() {
                info!(%table_name, %partition_id, "stream partition closed and drained");
                return Ok(());
            }

            let batch = self.reader.next_batch().await?;

            self.schema
                .evolve(&self.sink, |schema| batch.apply_schema_delta(schema))
                .await?;

            let modifications = batch.modifications(&self.schema.snapshot())?;
            for modification in &modifications {
                self.sink.apply(modification).await?;
            }

            if let Some(sequence_number) = batch.last_sequence_number() {
                debug!(
                    %table_name,
                    %partition_id,
                    modifications = modifications.len(),
                    sequence_number,
                    "applied stream batch"
                );

                if let Err(err) = self
                    .checkpoints
                    .store_checkpoint(&self.settings.lease_key, &partition_id, sequence_number)
                    .await
                {
                    warn!(
                        %table_name,
                        %partition_id,
                        error = %err,
                        "failed to store checkpoint, a restart will replay from the previous one"
                    );
                }
            }

            if batch.is_empty() && batch.has_more() {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.poll_interval) => {}
                    _ = self.shutdown_rx.wait_for_shutdown() => {}
                }
            }
        }

        info!(%table_name, %partition_id, "stream partition stopped by shutdown");

        Ok(())
    }
}

/// Runs a worker per partition of a table's change stream.
///
/// The stream is described periodically so partitions created by re-sharding are picked up. A
/// child partition is started only once its parent is no longer applied, which keeps the order of
/// writes to a key that moved from the parent to the child. When one partition worker fails, the
/// others are stopped and the errors are returned together.
#[derive(Debug)]
pub struct StreamCoordinator<R, S, C> {
    source: R,
    stream: StreamHandle,
    settings: StreamSettings,
    schema: SharedTableSchema,
    sink: ConcurrentSink<S>,
    checkpoints: C,
    shutdown_rx: ShutdownRx,
}

impl<R, S, C> StreamCoordinator<R, S, C>
where
    R: SourceReader + Clone + Send + Sync + 'static,
    S: Sink + Send + Sync + 'static,
    C: CheckpointStore + Clone + Send + Sync + 'static,
{
    pub fn new(
        source: R,
        stream: StreamHandle,
        settings: StreamSettings,
        schema: SharedTableSchema,
        sink: ConcurrentSink<S>,
        checkpoints: C,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            source,
            stream,
            settings,
            schema,
            sink,
            checkpoints,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) -> EtlResult<()> {
        let (workers_tx, _) = create_shutdown_channel();
        let mut pool = WorkerPool::new();

        let mut discovery = tokio::time::interval(self.settings.discovery_interval);
        discovery.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut shutdown_rx = self.shutdown_rx.clone();
        let result = loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.wait_for_shutdown() => break Ok(()),
                _ = discovery.tick() => {
                    if let Err(err) = self.discover(&mut pool, &workers_tx).await {
                        break Err(err);
                    }
                }
                Some(result) = pool.join_next() => {
                    if let Err(err) = result {
                        break Err(err);
                    }
                }
            }
        };

        workers_tx.shutdown();
        let drained = pool.wait_all().await;

        match (result, drained) {
            (Ok(()), drained) => drained,
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(others)) => Err(vec![err, others].into()),
        }
    }

    async fn discover(&mut self, pool: &mut WorkerPool, workers_tx: &ShutdownTx) -> EtlResult<()> {
        let partitions = retry_with_backoff(
            self.settings.retry_policy,
            EtlError::is_transient,
            || self.source.describe_stream(&self.stream),
        )
        .await?;

        let listed = partitions
            .iter()
            .map(|partition| partition.partition_id.clone())
            .collect::<HashSet<_>>();

        // Starting a partition never makes another one startable in the same pass, since its
        // children wait until it finishes. One pass in any listing order is enough.
        for partition in partitions {
            if pool.is_spawned(&partition.partition_id)
                || !parent_done(&partition, &listed, pool)
            {
                continue;
            }

            let position = self.start_position(&partition.partition_id).await;
            let worker_type = WorkerType::Stream {
                table_name: self.settings.table_name.clone(),
                partition_id: partition.partition_id.clone(),
            };

            let source = self.source.clone();
            let stream = self.stream.clone();
            let settings = self.settings.clone();
            let schema = self.schema.clone();
            let sink = self.sink.clone();
            let checkpoints = self.checkpoints.clone();
            let shutdown_rx = workers_tx.subscribe();
            let partition_id = partition.partition_id.clone();

            pool.spawn(partition.partition_id, worker_type, async move {
                let reader = ChangeStreamReader::open(
                    source,
                    &stream,
                    partition_id,
                    position,
                    settings.retry_policy,
                    settings.mapper,
                )
                .await?;

                PartitionWorker::new(reader, settings, schema, sink, checkpoints, shutdown_rx)
                    .run()
                    .await
            });
        }

        Ok(())
    }

    /// Resumes after the partition's checkpoint, or replays it from the trim horizon.
    async fn start_position(&self, partition_id: &str) -> CursorPosition {
        match self
            .checkpoints
            .get_checkpoint(&self.settings.lease_key, partition_id)
            .await
        {
            Ok(Some(sequence_number)) => CursorPosition::AfterSequenceNumber(sequence_number),
            Ok(None) => CursorPosition::TrimHorizon,
            Err(err) => {
                warn!(
                    table_name = %self.settings.table_name,
                    partition_id,
                    error = %err,
                    "failed to read checkpoint, replaying partition from the trim horizon"
                );
                CursorPosition::TrimHorizon
            }
        }
    }
}

/// Whether the parent of `partition` has nothing left to apply.
///
/// A parent missing from the stream description is past the stream's retention. A listed parent
/// is done only once its worker has finished, so a chain of listed partitions is applied one
/// generation at a time.
fn parent_done(
    partition: &PartitionDescription,
    listed: &HashSet<String>,
    pool: &WorkerPool,
) -> bool {
    partition
        .parent_partition_id
        .as_deref()
        .is_none_or(|parent| {
            !listed.contains(parent) || (pool.is_spawned(parent) && !pool.is_active(parent))
        })
}
