use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::debug;

use crate::bail;
use crate::destination::base::Sink;
use crate::error::{ErrorKind, EtlResult};
use crate::schema::{TableColumn, TableName, TableSchema};
use crate::types::{PrimaryKeyValue, RowBatch, TableColumnValue, TableModification, TableRow};

#[derive(Debug)]
struct Inner<S> {
    members: Vec<Mutex<S>>,
    lock: RwLock<()>,
}

/// A pool of sinks writing in parallel while keeping per-key order.
///
/// Single-row writes share a read lock and are routed to the member chosen by hashing the
/// distribution column value, where they are serialized by the member's mutex. Writes to the same
/// key therefore always go through the same connection in the order they were issued, and writes
/// to different keys proceed in parallel on different connections.
///
/// Schema changes, truncation and bulk loads take the write lock and run on the first member, so
/// they never overlap with each other or with any single-row write.
#[derive(Debug)]
pub struct ConcurrentSink<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for ConcurrentSink<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> ConcurrentSink<S>
where
    S: Sink + Send + Sync,
{
    /// Creates a pool from its members. The pool cannot be empty.
    pub fn new(members: Vec<S>) -> EtlResult<Self> {
        if members.is_empty() {
            bail!(
                ErrorKind::ConfigError,
                "Sink pool must have at least one member"
            );
        }

        Ok(Self {
            inner: Arc::new(Inner {
                members: members.into_iter().map(Mutex::new).collect(),
                lock: RwLock::new(()),
            }),
        })
    }

    pub fn pool_size(&self) -> usize {
        self.inner.members.len()
    }

    /// Returns the index of the member handling writes for `distribution_value`.
    ///
    /// Rows without a distribution value go to the first member.
    pub fn route(&self, distribution_value: Option<&TableColumnValue>) -> usize {
        let Some(value) = distribution_value else {
            return 0;
        };

        let mut hasher = DefaultHasher::new();
        value.to_string().hash(&mut hasher);

        (hasher.finish() % self.pool_size() as u64) as usize
    }

    /// Applies a change stream modification.
    pub async fn apply(&self, modification: &TableModification) -> EtlResult<()> {
        match modification {
            TableModification::Upsert(row) => self.upsert(row).await,
            TableModification::Delete(key) => self.delete(key).await,
        }
    }

    async fn primary(&self) -> MutexGuard<'_, S> {
        self.inner.members[0].lock().await
    }

    async fn member(&self, distribution_value: Option<&TableColumnValue>) -> MutexGuard<'_, S> {
        let index = self.route(distribution_value);
        self.inner.members[index].lock().await
    }
}

impl<S> Sink for ConcurrentSink<S>
where
    S: Sink + Send + Sync,
{
    fn name() -> &'static str {
        S::name()
    }

    async fn fetch_schema(&self, table_name: &TableName) -> EtlResult<Option<TableSchema>> {
        let _exclusive = self.inner.lock.write().await;
        self.primary().await.fetch_schema(table_name).await
    }

    async fn create_table(&self, schema: &TableSchema) -> EtlResult<()> {
        let _exclusive = self.inner.lock.write().await;
        self.primary().await.create_table(schema).await
    }

    async fn create_column(&self, schema: &TableSchema, column: &TableColumn) -> EtlResult<()> {
        let _exclusive = self.inner.lock.write().await;
        self.primary().await.create_column(schema, column).await
    }

    async fn truncate_table(&self, schema: &TableSchema) -> EtlResult<()> {
        let _exclusive = self.inner.lock.write().await;
        self.primary().await.truncate_table(schema).await
    }

    async fn bulk_load(&self, batch: &RowBatch) -> EtlResult<u64> {
        let _exclusive = self.inner.lock.write().await;
        self.primary().await.bulk_load(batch).await
    }

    async fn upsert(&self, row: &TableRow) -> EtlResult<()> {
        let _shared = self.inner.lock.read().await;
        self.member(row.distribution_value()).await.upsert(row).await
    }

    async fn delete(&self, key: &PrimaryKeyValue) -> EtlResult<()> {
        let _shared = self.inner.lock.read().await;
        self.member(key.distribution_value()).await.delete(key).await
    }

    async fn close(&self) -> EtlResult<()> {
        let _exclusive = self.inner.lock.write().await;

        let mut errors = Vec::new();
        for member in &self.inner.members {
            if let Err(err) = member.lock().await.close().await {
                errors.push(err);
            }
        }

        debug!(pool_size = self.pool_size(), "closed sink pool");

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::etl_error;
    use crate::schema::TableColumnType;

    #[derive(Debug, Default)]
    struct Tracker {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        overlapping_exclusive: AtomicUsize,
    }

    #[derive(Debug)]
    struct TrackingSink {
        tracker: Arc<Tracker>,
        fail_bulk_loads: bool,
    }

    impl TrackingSink {
        async fn write(&self) {
            let now = self.tracker.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.tracker.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.tracker.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        async fn exclusive(&self) {
            if self.tracker.in_flight.load(Ordering::SeqCst) != 0 {
                self.tracker.overlapping_exclusive.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.tracker.in_flight.load(Ordering::SeqCst) != 0 {
                self.tracker.overlapping_exclusive.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    impl Sink for TrackingSink {
        fn name() -> &'static str {
            "tracker"
        }

        async fn fetch_schema(&self, _table_name: &TableName) -> EtlResult<Option<TableSchema>> {
            Ok(None)
        }

        async fn create_table(&self, _schema: &TableSchema) -> EtlResult<()> {
            self.exclusive().await;
            Ok(())
        }

        async fn create_column(
            &self,
            _schema: &TableSchema,
            _column: &TableColumn,
        ) -> EtlResult<()> {
            self.exclusive().await;
            Ok(())
        }

        async fn truncate_table(&self, _schema: &TableSchema) -> EtlResult<()> {
            self.exclusive().await;
            Ok(())
        }

        async fn bulk_load(&self, batch: &RowBatch) -> EtlResult<u64> {
            self.exclusive().await;
            if self.fail_bulk_loads {
                return Err(etl_error!(ErrorKind::DestinationQueryFailed, "copy failed"));
            }
            Ok(batch.len() as u64)
        }

        async fn upsert(&self, _row: &TableRow) -> EtlResult<()> {
            self.write().await;
            Ok(())
        }

        async fn delete(&self, _key: &PrimaryKeyValue) -> EtlResult<()> {
            self.write().await;
            Ok(())
        }
    }

    fn pool(size: usize, fail_bulk_loads: bool) -> (ConcurrentSink<TrackingSink>, Arc<Tracker>) {
        let tracker = Arc::new(Tracker::default());
        let members = (0..size)
            .map(|_| TrackingSink {
                tracker: tracker.clone(),
                fail_bulk_loads,
            })
            .collect();

        (ConcurrentSink::new(members).unwrap(), tracker)
    }

    fn schema() -> Arc<TableSchema> {
        let mut schema = TableSchema::new(TableName::new(None, "t"));
        schema.add_column("k", TableColumnType::Text).unwrap();
        schema.set_primary_key(vec!["k".to_owned()]).unwrap();
        schema.set_distribution_column("k").unwrap();
        Arc::new(schema)
    }

    fn row(schema: &Arc<TableSchema>, key: &str) -> TableRow {
        let mut row = TableRow::new(schema.clone());
        row.set_value("k", TableColumnValue::Text(key.to_owned()))
            .unwrap();
        row
    }

    /// Returns two keys routed to different members.
    fn keys_on_distinct_members(sink: &ConcurrentSink<TrackingSink>) -> (String, String) {
        let first = "key-0".to_owned();
        let first_index = sink.route(Some(&TableColumnValue::Text(first.clone())));
        let second = (1..)
            .map(|i| format!("key-{i}"))
            .find(|key| sink.route(Some(&TableColumnValue::Text(key.clone()))) != first_index)
            .unwrap();

        (first, second)
    }

    #[test]
    fn empty_pool_is_rejected() {
        let err = ConcurrentSink::<TrackingSink>::new(vec![]).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn routing_is_stable() {
        let (sink, _) = pool(16, false);

        for i in 0..100 {
            let value = TableColumnValue::Numeric(i.to_string());
            let index = sink.route(Some(&value));

            assert!(index < 16);
            for _ in 0..5 {
                assert_eq!(sink.route(Some(&value)), index);
            }
        }
        assert_eq!(sink.route(None), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_write_in_parallel() {
        let (sink, tracker) = pool(8, false);
        let schema = schema();
        let (first, second) = keys_on_distinct_members(&sink);

        let first_row = row(&schema, &first);
        let second_row = row(&schema, &second);
        let (a, b) = tokio::join!(sink.upsert(&first_row), sink.upsert(&second_row));
        a.unwrap();
        b.unwrap();

        assert_eq!(tracker.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_writes_are_serialized() {
        let (sink, tracker) = pool(8, false);
        let schema = schema();

        let first_row = row(&schema, "same");
        let second_row = row(&schema, "same");
        let (a, b) = tokio::join!(sink.upsert(&first_row), sink.upsert(&second_row));
        a.unwrap();
        b.unwrap();

        assert_eq!(tracker.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn modifications_of_one_key_are_applied_in_order() {
        let (sink, tracker) = pool(8, false);
        let schema = schema();
        let upsert = TableModification::Upsert(row(&schema, "same"));
        let mut key = PrimaryKeyValue::new(schema.clone());
        key.set_value("k", TableColumnValue::Text("same".to_owned()))
            .unwrap();
        let delete = TableModification::Delete(key);

        let (a, b) = tokio::join!(sink.apply(&upsert), sink.apply(&delete));
        a.unwrap();
        b.unwrap();

        assert_eq!(tracker.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exclusive_operations_never_overlap_writes() {
        let (sink, tracker) = pool(4, false);
        let schema = schema();
        let column = TableColumn::new("extra", TableColumnType::Text);

        let rows = (0..8).map(|i| row(&schema, &format!("k{i}"))).collect::<Vec<_>>();
        let writes = futures::future::join_all(rows.iter().map(|row| sink.upsert(row)));
        let schema_change = sink.create_column(&schema, &column);
        let batch = RowBatch::new(schema.clone());
        let bulk = sink.bulk_load(&batch);

        let (writes, schema_change, bulk) = tokio::join!(writes, schema_change, bulk);
        assert!(writes.into_iter().all(|result| result.is_ok()));
        schema_change.unwrap();
        bulk.unwrap();

        assert_eq!(tracker.overlapping_exclusive.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_propagate_and_release_the_lock() {
        let (sink, _) = pool(2, true);
        let schema = schema();

        let err = sink
            .bulk_load(&RowBatch::new(schema.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationQueryFailed);

        sink.upsert(&row(&schema, "after")).await.unwrap();
        sink.close().await.unwrap();
    }
}
