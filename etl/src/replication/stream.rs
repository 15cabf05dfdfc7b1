use std::sync::Arc;

use tracing::debug;

use crate::{bail, etl_error};
use crate::concurrency::retry::{RetryPolicy, retry_with_backoff};
use crate::conversions::TypeMapper;
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::schema::{TableColumn, TableSchema};
use crate::source::{
    ChangeKind, ChangeRecord, CursorPosition, PartitionCursor, SourceReader, StreamHandle,
};
use crate::types::{Item, TableModification};

/// Ordered reader of one change stream partition.
#[derive(Debug)]
pub struct ChangeStreamReader<R> {
    source: R,
    partition_id: String,
    next_cursor: Option<PartitionCursor>,
    retry_policy: RetryPolicy,
    mapper: TypeMapper,
}

impl<R> ChangeStreamReader<R>
where
    R: SourceReader,
{
    /// Opens a reader on `partition_id` starting at `position`.
    pub async fn open(
        source: R,
        stream: &StreamHandle,
        partition_id: impl Into<String>,
        position: CursorPosition,
        retry_policy: RetryPolicy,
        mapper: TypeMapper,
    ) -> EtlResult<Self> {
        let partition_id = partition_id.into();

        let cursor = retry_with_backoff(retry_policy, EtlError::is_transient, || {
            source.open_partition_cursor(stream, &partition_id, position.clone())
        })
        .await?;

        debug!(%stream, partition_id = %partition_id, ?position, "opened partition cursor");

        Ok(Self {
            source,
            partition_id,
            next_cursor: Some(cursor),
            retry_policy,
            mapper,
        })
    }

    pub fn partition_id(&self) -> &str {
        &self.partition_id
    }

    /// Whether the partition may still return records. False once it is closed and drained.
    pub fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }

    /// Reads the next page of records, retrying throttled and transient failures.
    pub async fn next_batch(&mut self) -> EtlResult<StreamedBatch> {
        let Some(cursor) = &self.next_cursor else {
            bail!(
                ErrorKind::InvalidState,
                "Stream partition already drained",
                self.partition_id.clone()
            );
        };

        let page = retry_with_backoff(self.retry_policy, EtlError::is_transient, || {
            self.source.read_change_page(cursor)
        })
        .await?;

        self.next_cursor = page.next_cursor;

        Ok(StreamedBatch {
            records: page.records,
            has_more: self.next_cursor.is_some(),
            mapper: self.mapper,
        })
    }
}

/// One page of change records, in partition order.
#[derive(Debug, Clone)]
pub struct StreamedBatch {
    records: Vec<ChangeRecord>,
    has_more: bool,
    mapper: TypeMapper,
}

impl StreamedBatch {
    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Evolves `schema` for the new image of every insert and modify record.
    ///
    /// Removals carry only key attributes and never add columns.
    pub fn apply_schema_delta(&self, schema: &mut TableSchema) -> EtlResult<Vec<TableColumn>> {
        let mut new_columns = Vec::new();
        for record in &self.records {
            if record.kind == ChangeKind::Remove {
                continue;
            }

            new_columns.extend(self.mapper.evolve(schema, new_image(record)?)?);
        }

        Ok(new_columns)
    }

    /// Builds one modification per record, in record order.
    pub fn modifications(&self, schema: &Arc<TableSchema>) -> EtlResult<Vec<TableModification>> {
        self.records
            .iter()
            .map(|record| match record.kind {
                ChangeKind::Remove => Ok(TableModification::Delete(
                    self.mapper.key_from_item(schema, &record.keys)?,
                )),
                ChangeKind::Insert | ChangeKind::Modify => Ok(TableModification::Upsert(
                    self.mapper.row_from_item(schema, new_image(record)?)?,
                )),
            })
            .collect()
    }

    /// Sequence number of the last record, the position to checkpoint once the batch is applied.
    pub fn last_sequence_number(&self) -> Option<&str> {
        self.records
            .last()
            .map(|record| record.sequence_number.as_str())
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }
}

fn new_image(record: &ChangeRecord) -> EtlResult<&Item> {
    match &record.new_image {
        Some(image) => Ok(image),
        None => Err(etl_error!(
            ErrorKind::InvalidData,
            "Change record carries no new image",
            format!(
                "record {} must be streamed with new images enabled",
                record.sequence_number
            )
        )),
    }
}
