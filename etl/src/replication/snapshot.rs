use std::sync::Arc;

use tracing::debug;

use crate::bail;
use crate::concurrency::retry::{RetryPolicy, retry_with_backoff};
use crate::conversions::TypeMapper;
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::schema::{TableColumn, TableSchema};
use crate::source::{ScanCursor, SourceReader};
use crate::types::{Item, RowBatch};

/// Sequential, paginated scan of one source table.
///
/// Only one page is in flight at a time since each page's cursor comes from the previous one.
#[derive(Debug)]
pub struct SnapshotReader<R> {
    source: R,
    table_name: String,
    page_size: usize,
    retry_policy: RetryPolicy,
    mapper: TypeMapper,
    cursor: Option<ScanCursor>,
    finished: bool,
}

impl<R> SnapshotReader<R>
where
    R: SourceReader,
{
    pub fn new(
        source: R,
        table_name: impl Into<String>,
        page_size: usize,
        retry_policy: RetryPolicy,
        mapper: TypeMapper,
    ) -> Self {
        Self {
            source,
            table_name: table_name.into(),
            page_size,
            retry_policy,
            mapper,
            cursor: None,
            finished: false,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Whether the last page has been read.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Reads the next page, retrying throttled and transient failures.
    pub async fn next_batch(&mut self) -> EtlResult<ScannedBatch> {
        if self.finished {
            bail!(
                ErrorKind::InvalidState,
                "Snapshot scan already completed",
                self.table_name.clone()
            );
        }

        let page = retry_with_backoff(self.retry_policy, EtlError::is_transient, || {
            self.source
                .scan_page(&self.table_name, self.cursor.as_ref(), self.page_size)
        })
        .await?;

        debug!(
            table_name = %self.table_name,
            items = page.items.len(),
            consumed_capacity = page.consumed_capacity,
            "scanned page"
        );

        self.cursor = page.next_cursor;
        self.finished = self.cursor.is_none();

        Ok(ScannedBatch {
            items: page.items,
            consumed_capacity: page.consumed_capacity,
            has_more: !self.finished,
            mapper: self.mapper,
        })
    }
}

/// One page of scanned items.
#[derive(Debug, Clone)]
pub struct ScannedBatch {
    items: Vec<Item>,
    consumed_capacity: f64,
    has_more: bool,
    mapper: TypeMapper,
}

impl ScannedBatch {
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Evolves `schema` for every item of the page and returns the columns added by this call.
    pub fn apply_schema_delta(&self, schema: &mut TableSchema) -> EtlResult<Vec<TableColumn>> {
        let mut new_columns = Vec::new();
        for item in &self.items {
            new_columns.extend(self.mapper.evolve(schema, item)?);
        }

        Ok(new_columns)
    }

    /// Builds the rows of the page against `schema`.
    pub fn rows(&self, schema: &Arc<TableSchema>) -> EtlResult<RowBatch> {
        let mut batch = RowBatch::new(schema.clone());
        for item in &self.items {
            batch.push(self.mapper.row_from_item(schema, item)?);
        }

        Ok(batch)
    }

    /// Read capacity units the source charged for the page.
    pub fn consumed_capacity(&self) -> f64 {
        self.consumed_capacity
    }

    /// Units to take from the rate limiter before reading the next page.
    ///
    /// One unit is paid up front by issuing the request, so the rounded cost is reduced by one,
    /// never going below one.
    pub fn throttle_permits(&self) -> u64 {
        (self.consumed_capacity.round() as i64 - 1).max(1) as u64
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }
}
