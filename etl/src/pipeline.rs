use std::sync::Arc;
use std::time::Duration;

use config::shared::{PipelineConfig, TableSelection};
use tracing::{error, info, warn};

use crate::bail;
use crate::concurrency::rate_limiter::RateLimiter;
use crate::concurrency::retry::{RetryPolicy, retry_with_backoff};
use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use crate::conversions::TypeMapper;
use crate::destination::{ConcurrentSink, Sink};
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::replication::SnapshotReader;
use crate::schema::{SharedTableSchema, TableName, TableSchema};
use crate::source::{SourceReader, TableDescription};
use crate::state::{CheckpointStore, TableReplicationPhase, lease_key};
use crate::workers::base::WorkerType;
use crate::workers::pool::WorkerPool;
use crate::workers::snapshot::{SnapshotOutcome, SnapshotWorker};
use crate::workers::stream::{StreamCoordinator, StreamSettings};

/// Drives the selected phases of one table: schema, snapshot and change stream.
#[derive(Debug)]
pub struct TableReplicator<R, S, C> {
    table_name: String,
    config: Arc<PipelineConfig>,
    source: R,
    sink: ConcurrentSink<S>,
    checkpoints: C,
    shutdown_rx: ShutdownRx,
}

impl<R, S, C> TableReplicator<R, S, C>
where
    R: SourceReader + Clone + Send + Sync + 'static,
    S: Sink + Send + Sync + 'static,
    C: CheckpointStore + Clone + Send + Sync + 'static,
{
    pub fn new(
        table_name: impl Into<String>,
        config: Arc<PipelineConfig>,
        source: R,
        sink: ConcurrentSink<S>,
        checkpoints: C,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            config,
            source,
            sink,
            checkpoints,
            shutdown_rx,
        }
    }

    pub async fn run(self) -> EtlResult<()> {
        let mut phase = TableReplicationPhase::default();

        let result = self.replicate(&mut phase).await;
        if let Err(err) = &result {
            error!(
                table_name = %self.table_name,
                %phase,
                error = %err,
                "table replication failed"
            );
        }

        result
    }

    async fn replicate(&self, phase: &mut TableReplicationPhase) -> EtlResult<()> {
        let mapper = TypeMapper::new(self.config.column_naming, self.config.conversion_mode);
        let retry_policy = RetryPolicy::from(&self.config.retry);

        let description = retry_with_backoff(retry_policy, EtlError::is_transient, || {
            self.source.describe_table(&self.table_name)
        })
        .await?;

        let schema = SharedTableSchema::new(self.table_schema(&mapper, &description, phase).await?);

        if self.config.phases.data {
            if self.config.truncate_before_snapshot {
                self.sink.truncate_table(&schema.snapshot()).await?;
            }

            let reader = SnapshotReader::new(
                self.source.clone(),
                self.table_name.clone(),
                self.config.scan.page_size,
                retry_policy,
                mapper,
            );
            let rate_limiter = Arc::new(RateLimiter::new(self.config.scan.max_rate)?);

            let outcome = SnapshotWorker::new(
                reader,
                schema.clone(),
                self.sink.clone(),
                rate_limiter,
                self.shutdown_rx.clone(),
            )
            .run()
            .await?;

            if let SnapshotOutcome::Interrupted { .. } = outcome {
                return Ok(());
            }
            phase.advance(TableReplicationPhase::SnapshotLoaded)?;
        }

        if self.config.phases.changes && !self.shutdown_rx.is_shutdown() {
            let Some(stream) = description.stream.clone() else {
                bail!(
                    ErrorKind::ChangeStreamNotEnabled,
                    "Change stream is not enabled on the source table",
                    self.table_name.clone()
                );
            };
            phase.advance(TableReplicationPhase::StreamingChanges)?;

            info!(table_name = %self.table_name, %stream, "streaming changes");

            let settings = StreamSettings {
                table_name: self.table_name.clone(),
                lease_key: lease_key(&self.config.checkpoint_lease_prefix, &self.table_name),
                poll_interval: Duration::from_millis(self.config.stream.poll_interval_ms),
                discovery_interval: Duration::from_millis(
                    self.config.stream.partition_discovery_interval_ms,
                ),
                retry_policy,
                mapper,
            };

            StreamCoordinator::new(
                self.source.clone(),
                stream,
                settings,
                schema,
                self.sink.clone(),
                self.checkpoints.clone(),
                self.shutdown_rx.clone(),
            )
            .run()
            .await?;
        }

        info!(table_name = %self.table_name, %phase, "table replication finished");

        Ok(())
    }

    /// Creates the destination table when the schema phase runs, otherwise reuses the existing
    /// destination table and falls back to the schema derived from the source.
    async fn table_schema(
        &self,
        mapper: &TypeMapper,
        description: &TableDescription,
        phase: &mut TableReplicationPhase,
    ) -> EtlResult<TableSchema> {
        let table_name = TableName::new(None, self.table_name.clone());

        if self.config.phases.schema {
            let schema = mapper.base_schema(table_name, description, self.config.distributed)?;
            self.sink.create_table(&schema).await?;
            phase.advance(TableReplicationPhase::SchemaReplicated)?;

            info!(table_name = %self.table_name, columns = schema.columns().len(), "replicated schema");

            return Ok(schema);
        }

        match self.sink.fetch_schema(&table_name).await? {
            Some(schema) => Ok(schema),
            None => mapper.base_schema(table_name, description, self.config.distributed),
        }
    }
}

#[derive(Debug)]
enum PipelineState {
    NotStarted,
    Started { pool: WorkerPool },
}

/// Replicates a set of source tables into one destination.
///
/// Each table runs independently: a table whose replication fails stops alone while the other
/// tables keep going. Their errors are returned together by [`Pipeline::wait`].
#[derive(Debug)]
pub struct Pipeline<R, S, C> {
    config: Arc<PipelineConfig>,
    source: R,
    sink: ConcurrentSink<S>,
    checkpoints: C,
    state: PipelineState,
    shutdown_tx: ShutdownTx,
}

impl<R, S, C> Pipeline<R, S, C>
where
    R: SourceReader + Clone + Send + Sync + 'static,
    S: Sink + Send + Sync + 'static,
    C: CheckpointStore + Clone + Send + Sync + 'static,
{
    pub fn new(config: PipelineConfig, source: R, sink: ConcurrentSink<S>, checkpoints: C) -> Self {
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            config: Arc::new(config),
            source,
            sink,
            checkpoints,
            state: PipelineState::NotStarted,
            shutdown_tx,
        }
    }

    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Starts one table worker per selected table.
    pub async fn start(&mut self, tables: &TableSelection) -> EtlResult<()> {
        let table_names = match tables {
            TableSelection::Names(names) => names.clone(),
            TableSelection::All => {
                retry_with_backoff(
                    RetryPolicy::from(&self.config.retry),
                    EtlError::is_transient,
                    || self.source.list_tables(),
                )
                .await?
            }
        };

        if table_names.is_empty() {
            warn!("no source tables selected, nothing to replicate");
        }

        let mut pool = WorkerPool::new();
        for table_name in table_names {
            let replicator = TableReplicator::new(
                table_name.clone(),
                self.config.clone(),
                self.source.clone(),
                self.sink.clone(),
                self.checkpoints.clone(),
                self.shutdown_tx.subscribe(),
            );
            let worker_type = WorkerType::Table {
                table_name: table_name.clone(),
            };

            if !pool.spawn(table_name.clone(), worker_type, replicator.run()) {
                warn!(%table_name, "table selected more than once, replicating it once");
            }
        }

        info!(tables = pool.active_count(), "started pipeline");

        self.state = PipelineState::Started { pool };

        Ok(())
    }

    /// Waits for every table worker, then closes the sink.
    pub async fn wait(self) -> EtlResult<()> {
        let PipelineState::Started { mut pool } = self.state else {
            info!("pipeline was not started, nothing to wait for");

            return Ok(());
        };

        let mut errors = Vec::new();

        if let Err(err) = pool.wait_all().await {
            info!(failed_tables = err.kinds().len(), "table workers failed with an error");

            errors.push(err);
        }

        if let Err(err) = self.sink.close().await {
            error!(error = %err, "failed to close the sink");

            errors.push(err);
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        Ok(())
    }

    pub fn shutdown(&self) {
        info!("shutting down the pipeline");

        self.shutdown_tx.shutdown();
    }

    pub async fn shutdown_and_wait(self) -> EtlResult<()> {
        self.shutdown();
        self.wait().await
    }
}
