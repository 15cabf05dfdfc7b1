use std::sync::Arc;

use tracing::{debug, info};

use crate::concurrency::rate_limiter::RateLimiter;
use crate::concurrency::shutdown::ShutdownRx;
use crate::destination::{ConcurrentSink, Sink};
use crate::error::EtlResult;
use crate::replication::SnapshotReader;
use crate::schema::SharedTableSchema;
use crate::source::SourceReader;

/// How a snapshot load ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// Every page was loaded.
    Completed { rows: u64 },
    /// Shutdown was requested before the last page.
    Interrupted { rows: u64 },
}

impl SnapshotOutcome {
    pub fn rows(&self) -> u64 {
        match self {
            SnapshotOutcome::Completed { rows } | SnapshotOutcome::Interrupted { rows } => *rows,
        }
    }
}

/// Loads the snapshot of one table, one page at a time.
///
/// For each page the schema is evolved first, so the destination has every column before the
/// page's rows are bulk loaded. The scan cost of a page is taken from the rate limiter before the
/// next page is requested.
#[derive(Debug)]
pub struct SnapshotWorker<R, S> {
    reader: SnapshotReader<R>,
    schema: SharedTableSchema,
    sink: ConcurrentSink<S>,
    rate_limiter: Arc<RateLimiter>,
    shutdown_rx: ShutdownRx,
}

impl<R, S> SnapshotWorker<R, S>
where
    R: SourceReader + Send + Sync,
    S: Sink + Send + Sync,
{
    pub fn new(
        reader: SnapshotReader<R>,
        schema: SharedTableSchema,
        sink: ConcurrentSink<S>,
        rate_limiter: Arc<RateLimiter>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            reader,
            schema,
            sink,
            rate_limiter,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) -> EtlResult<SnapshotOutcome> {
        let table_name = self.reader.table_name().to_owned();
        let mut rows = 0;

        loop {
            if self.shutdown_rx.is_shutdown() {
                info!(%table_name, rows, "snapshot interrupted by shutdown");
                return Ok(SnapshotOutcome::Interrupted { rows });
            }

            let batch = self.reader.next_batch().await?;

            self.schema
                .evolve(&self.sink, |schema| batch.apply_schema_delta(schema))
                .await?;

            let row_batch = batch.rows(&self.schema.snapshot())?;
            if !row_batch.is_empty() {
                rows += self.sink.bulk_load(&row_batch).await?;
            }

            debug!(%table_name, rows, "loaded snapshot page");

            if !batch.has_more() {
                break;
            }

            self.rate_limiter.acquire(batch.throttle_permits()).await;
        }

        info!(%table_name, rows, "snapshot loaded");

        Ok(SnapshotOutcome::Completed { rows })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::concurrency::retry::RetryPolicy;
    use crate::concurrency::shutdown::create_shutdown_channel;
    use crate::conversions::TypeMapper;
    use crate::destination::memory::MemorySink;
    use crate::schema::TableName;
    use crate::source::memory::MemorySource;
    use crate::test_utils::item::{item, number, text};
    use crate::test_utils::table::keyed_table_description;

    async fn setup(items: usize) -> (MemorySource, MemorySink, SharedTableSchema) {
        let source = MemorySource::new();
        let description = keyed_table_description("users", "id", None);
        source.add_table(description.clone()).await;
        source
            .put_items(
                "users",
                (0..items)
                    .map(|i| item(&[("id", number(i)), ("name", text("n"))]))
                    .collect(),
            )
            .await;

        let schema = TypeMapper::default()
            .base_schema(TableName::new(None, "users"), &description, false)
            .unwrap();
        let sink = MemorySink::new();
        sink.create_table(&schema).await.unwrap();

        (source, sink, SharedTableSchema::new(schema))
    }

    fn worker(
        source: MemorySource,
        sink: MemorySink,
        schema: SharedTableSchema,
        rate: f64,
        shutdown_rx: ShutdownRx,
    ) -> SnapshotWorker<MemorySource, MemorySink> {
        let reader = SnapshotReader::new(
            source,
            "users",
            2,
            RetryPolicy::default(),
            TypeMapper::default(),
        );

        SnapshotWorker::new(
            reader,
            schema,
            ConcurrentSink::new(vec![sink]).unwrap(),
            Arc::new(RateLimiter::new(rate).unwrap()),
            shutdown_rx,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn loads_every_page_at_the_configured_rate() {
        let (source, sink, schema) = setup(5).await;
        source.set_page_cost("users", 6.0).await;
        let (_tx, shutdown_rx) = create_shutdown_channel();
        let start = Instant::now();

        let outcome = worker(source, sink.clone(), schema.clone(), 5.0, shutdown_rx)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome, SnapshotOutcome::Completed { rows: 5 });
        assert_eq!(
            sink.table_rows(&TableName::new(None, "users")).await.len(),
            5
        );
        assert!(schema.snapshot().has_column("name"));
        // Three pages: the full bucket pays the first 5 permits, the second 5 wait one second.
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn stops_before_next_page_on_shutdown() {
        let (source, sink, schema) = setup(5).await;
        let (tx, shutdown_rx) = create_shutdown_channel();
        tx.shutdown();

        let outcome = worker(source, sink, schema, 100.0, shutdown_rx)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome, SnapshotOutcome::Interrupted { rows: 0 });
    }

    #[tokio::test]
    async fn destination_errors_abort_the_load() {
        let (source, sink, schema) = setup(3).await;
        sink.fail_writes_to(TableName::new(None, "users")).await;
        let (_tx, shutdown_rx) = create_shutdown_channel();

        let result = worker(source, sink, schema, 100.0, shutdown_rx).run().await;

        assert!(result.is_err());
    }
}
