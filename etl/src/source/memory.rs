use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{ErrorKind, EtlResult};
use crate::source::base::{
    ChangeKind, ChangePage, ChangeRecord, CursorPosition, PartitionCursor,
    PartitionDescription, ScanCursor, ScanPage, SourceReader, StreamHandle, TableDescription,
};
use crate::types::{AttributeValue, Item};
use crate::{bail, etl_error};

/// Attribute of the in-memory scan cursor holding the next item offset.
const CURSOR_OFFSET_ATTRIBUTE: &str = "offset";

/// Number of change records returned per page.
const CHANGE_PAGE_SIZE: usize = 100;

#[derive(Debug)]
struct MemoryTable {
    description: TableDescription,
    items: Vec<Item>,
    page_cost: f64,
}

#[derive(Debug)]
struct MemoryPartition {
    description: PartitionDescription,
    records: Vec<ChangeRecord>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: Vec<String>,
    table_data: HashMap<String, MemoryTable>,
    streams: HashMap<StreamHandle, Vec<MemoryPartition>>,
    pending_failures: VecDeque<ErrorKind>,
    next_sequence_number: u64,
    scan_calls: usize,
}

/// In-memory source store for tests.
///
/// Holds tables with items, change streams made of partitions, and a queue of failures that
/// the next calls to [`SourceReader::scan_page`] or [`SourceReader::read_change_page`] return.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table. Its change stream, if any, starts without partitions.
    pub async fn add_table(&self, description: TableDescription) {
        let mut inner = self.inner.lock().await;
        if let Some(stream) = &description.stream {
            inner.streams.entry(stream.clone()).or_default();
        }
        inner.tables.push(description.table_name.clone());
        inner.table_data.insert(
            description.table_name.clone(),
            MemoryTable {
                description,
                items: Vec::new(),
                page_cost: 1.0,
            },
        );
    }

    pub async fn put_items(&self, table_name: &str, items: Vec<Item>) {
        let mut inner = self.inner.lock().await;
        if let Some(table) = inner.table_data.get_mut(table_name) {
            table.items.extend(items);
        }
    }

    /// Sets the capacity reported as consumed by every scan page of the table.
    pub async fn set_page_cost(&self, table_name: &str, page_cost: f64) {
        let mut inner = self.inner.lock().await;
        if let Some(table) = inner.table_data.get_mut(table_name) {
            table.page_cost = page_cost;
        }
    }

    pub async fn add_partition(
        &self,
        stream: &StreamHandle,
        partition_id: &str,
        parent_partition_id: Option<&str>,
    ) {
        let mut inner = self.inner.lock().await;
        inner
            .streams
            .entry(stream.clone())
            .or_default()
            .push(MemoryPartition {
                description: PartitionDescription {
                    partition_id: partition_id.to_owned(),
                    parent_partition_id: parent_partition_id.map(str::to_owned),
                    closed: false,
                },
                records: Vec::new(),
            });
    }

    /// Marks a partition as closed: once its records are read its cursor ends.
    pub async fn close_partition(&self, stream: &StreamHandle, partition_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(partition) = inner
            .streams
            .get_mut(stream)
            .and_then(|partitions| find_partition(partitions, partition_id))
        {
            partition.description.closed = true;
        }
    }

    /// Appends a change record to a partition and returns its sequence number.
    pub async fn push_record(
        &self,
        stream: &StreamHandle,
        partition_id: &str,
        kind: ChangeKind,
        keys: Item,
        new_image: Option<Item>,
    ) -> String {
        let mut inner = self.inner.lock().await;
        inner.next_sequence_number += 1;
        let sequence_number = format!("{:021}", inner.next_sequence_number);

        if let Some(partition) = inner
            .streams
            .get_mut(stream)
            .and_then(|partitions| find_partition(partitions, partition_id))
        {
            partition.records.push(ChangeRecord {
                kind,
                keys,
                new_image,
                sequence_number: sequence_number.clone(),
            });
        }

        sequence_number
    }

    /// Makes the next `count` page reads fail with an error of `kind`.
    pub async fn fail_next_reads(&self, count: usize, kind: ErrorKind) {
        let mut inner = self.inner.lock().await;
        inner.pending_failures.extend(std::iter::repeat_n(kind, count));
    }

    /// Returns how many scan requests were issued, failed ones included.
    pub async fn scan_calls(&self) -> usize {
        self.inner.lock().await.scan_calls
    }

    fn take_failure(inner: &mut Inner) -> EtlResult<()> {
        match inner.pending_failures.pop_front() {
            Some(kind) => Err(etl_error!(kind, "Injected source failure")),
            None => Ok(()),
        }
    }
}

fn find_partition<'a>(
    partitions: &'a mut [MemoryPartition],
    partition_id: &str,
) -> Option<&'a mut MemoryPartition> {
    partitions
        .iter_mut()
        .find(|partition| partition.description.partition_id == partition_id)
}

fn encode_cursor(stream: &StreamHandle, partition_id: &str, position: usize) -> PartitionCursor {
    PartitionCursor(format!("{stream}|{partition_id}|{position}"))
}

fn decode_cursor(cursor: &PartitionCursor) -> EtlResult<(StreamHandle, String, usize)> {
    let mut parts = cursor.0.rsplitn(3, '|');
    let (Some(position), Some(partition_id), Some(stream)) =
        (parts.next(), parts.next(), parts.next())
    else {
        bail!(
            ErrorKind::InvalidData,
            "Malformed partition cursor",
            cursor.0.clone()
        );
    };

    Ok((
        StreamHandle(stream.to_owned()),
        partition_id.to_owned(),
        position.parse()?,
    ))
}

impl SourceReader for MemorySource {
    async fn list_tables(&self) -> EtlResult<Vec<String>> {
        Ok(self.inner.lock().await.tables.clone())
    }

    async fn describe_table(&self, table_name: &str) -> EtlResult<TableDescription> {
        let inner = self.inner.lock().await;
        match inner.table_data.get(table_name) {
            Some(table) => Ok(table.description.clone()),
            None => Err(etl_error!(
                ErrorKind::SourceTableMissing,
                "Source table not found",
                table_name
            )),
        }
    }

    async fn scan_page(
        &self,
        table_name: &str,
        cursor: Option<&ScanCursor>,
        limit: usize,
    ) -> EtlResult<ScanPage> {
        let mut inner = self.inner.lock().await;
        inner.scan_calls += 1;
        Self::take_failure(&mut inner)?;

        let Some(table) = inner.table_data.get(table_name) else {
            bail!(
                ErrorKind::SourceTableMissing,
                "Source table not found",
                table_name
            );
        };

        let start = match cursor.and_then(|cursor| cursor.0.get(CURSOR_OFFSET_ATTRIBUTE)) {
            Some(AttributeValue::N(offset)) => offset.parse::<usize>()?,
            _ => 0,
        };
        let end = (start + limit).min(table.items.len());
        let items = table.items[start.min(end)..end].to_vec();

        let next_cursor = (end < table.items.len()).then(|| {
            ScanCursor(Item::from([(
                CURSOR_OFFSET_ATTRIBUTE.to_owned(),
                AttributeValue::N(end.to_string()),
            )]))
        });

        debug!(table_name, start, end, "served scan page");

        Ok(ScanPage {
            items,
            next_cursor,
            consumed_capacity: table.page_cost,
        })
    }

    async fn describe_stream(&self, stream: &StreamHandle) -> EtlResult<Vec<PartitionDescription>> {
        let inner = self.inner.lock().await;
        let Some(partitions) = inner.streams.get(stream) else {
            bail!(
                ErrorKind::ChangeStreamNotEnabled,
                "Change stream not found",
                stream
            );
        };

        Ok(partitions
            .iter()
            .map(|partition| partition.description.clone())
            .collect())
    }

    async fn open_partition_cursor(
        &self,
        stream: &StreamHandle,
        partition_id: &str,
        position: CursorPosition,
    ) -> EtlResult<PartitionCursor> {
        let mut inner = self.inner.lock().await;
        let Some(partition) = inner
            .streams
            .get_mut(stream)
            .and_then(|partitions| find_partition(partitions, partition_id))
        else {
            bail!(
                ErrorKind::SourceQueryFailed,
                "Stream partition not found",
                partition_id
            );
        };

        let offset = match position {
            CursorPosition::TrimHorizon => 0,
            CursorPosition::AfterSequenceNumber(sequence_number) => partition
                .records
                .iter()
                .position(|record| record.sequence_number == sequence_number)
                .map(|index| index + 1)
                .ok_or_else(|| {
                    etl_error!(
                        ErrorKind::SourceQueryFailed,
                        "Sequence number not found in partition",
                        sequence_number
                    )
                })?,
        };

        Ok(encode_cursor(stream, partition_id, offset))
    }

    async fn read_change_page(&self, cursor: &PartitionCursor) -> EtlResult<ChangePage> {
        let (stream, partition_id, start) = decode_cursor(cursor)?;

        let mut inner = self.inner.lock().await;
        Self::take_failure(&mut inner)?;

        let Some(partition) = inner
            .streams
            .get_mut(&stream)
            .and_then(|partitions| find_partition(partitions, &partition_id))
        else {
            bail!(
                ErrorKind::SourceQueryFailed,
                "Stream partition not found",
                partition_id
            );
        };

        let end = (start + CHANGE_PAGE_SIZE).min(partition.records.len());
        let records = partition.records[start.min(end)..end].to_vec();

        let next_cursor = if partition.description.closed && end == partition.records.len() {
            None
        } else {
            Some(encode_cursor(&stream, &partition_id, end))
        };

        Ok(ChangePage {
            records,
            next_cursor,
        })
    }
}
