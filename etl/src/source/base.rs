use std::fmt;
use std::future::Future;

use crate::error::EtlResult;
use crate::types::Item;

/// Scalar type declared for a key attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarAttributeType {
    /// String.
    S,
    /// Number.
    N,
    /// Binary.
    B,
}

/// An attribute declared in the table definition, i.e. a key attribute of the table or of one
/// of its indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDefinition {
    pub name: String,
    pub attribute_type: ScalarAttributeType,
}

/// Role of an attribute in a key schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// Partition key.
    Hash,
    /// Sort key.
    Range,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchemaElement {
    pub attribute_name: String,
    pub key_type: KeyType,
}

/// A global secondary index of a source table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryIndex {
    pub name: String,
    pub key_schema: Vec<KeySchemaElement>,
}

/// Opaque handle of a table's change stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub String);

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata of a source table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescription {
    pub table_name: String,
    pub attribute_definitions: Vec<AttributeDefinition>,
    pub key_schema: Vec<KeySchemaElement>,
    pub secondary_indexes: Vec<SecondaryIndex>,
    /// The change stream, `None` when streaming is not enabled on the table.
    pub stream: Option<StreamHandle>,
}

/// Continuation token of a paginated scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanCursor(pub Item);

/// One page of a table scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPage {
    pub items: Vec<Item>,
    /// `None` once the last page was returned.
    pub next_cursor: Option<ScanCursor>,
    /// Read capacity units consumed by the request.
    pub consumed_capacity: f64,
}

/// A partition ("shard") of a change stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDescription {
    pub partition_id: String,
    pub parent_partition_id: Option<String>,
    /// Whether the partition no longer receives records.
    pub closed: bool,
}

/// Where a partition cursor starts reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorPosition {
    /// The oldest record still retained by the stream.
    TrimHorizon,
    /// The record right after the given sequence number.
    AfterSequenceNumber(String),
}

/// Opaque read position inside a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionCursor(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Modify,
    Remove,
}

/// One record of a change stream partition.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    /// Key attributes of the changed item.
    pub keys: Item,
    /// Full item after the change, absent for removals.
    pub new_image: Option<Item>,
    pub sequence_number: String,
}

/// One page of change records.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangePage {
    pub records: Vec<ChangeRecord>,
    /// `None` once the partition is closed and fully read.
    pub next_cursor: Option<PartitionCursor>,
}

/// Read access to a schemaless source store and its change streams.
///
/// Implementations report throttling as [`crate::error::ErrorKind::SourceThrottled`] and
/// transient server faults as [`crate::error::ErrorKind::SourceServerError`] so that callers
/// can retry them.
pub trait SourceReader {
    /// Lists the names of every table of the source.
    fn list_tables(&self) -> impl Future<Output = EtlResult<Vec<String>>> + Send;

    /// Describes a table's key schema, declared attributes, indexes and change stream.
    fn describe_table(
        &self,
        table_name: &str,
    ) -> impl Future<Output = EtlResult<TableDescription>> + Send;

    /// Reads one strongly consistent page of at most `limit` items.
    fn scan_page(
        &self,
        table_name: &str,
        cursor: Option<&ScanCursor>,
        limit: usize,
    ) -> impl Future<Output = EtlResult<ScanPage>> + Send;

    /// Lists the partitions of a change stream.
    fn describe_stream(
        &self,
        stream: &StreamHandle,
    ) -> impl Future<Output = EtlResult<Vec<PartitionDescription>>> + Send;

    /// Opens a cursor into one partition of a change stream.
    fn open_partition_cursor(
        &self,
        stream: &StreamHandle,
        partition_id: &str,
        position: CursorPosition,
    ) -> impl Future<Output = EtlResult<PartitionCursor>> + Send;

    /// Reads the next page of change records at `cursor`.
    fn read_change_page(
        &self,
        cursor: &PartitionCursor,
    ) -> impl Future<Output = EtlResult<ChangePage>> + Send;
}
