use std::future::Future;

use crate::error::EtlResult;
use crate::schema::{TableColumn, TableName, TableSchema};
use crate::types::{PrimaryKeyValue, RowBatch, TableRow};

/// A relational destination receiving replicated tables.
///
/// Bulk loads are append-only. Single-row writes must be idempotent: applying the same upsert or
/// delete twice leaves the destination as if it was applied once, since change streams are
/// delivered at least once.
///
/// Errors are returned unchanged to the caller. Sinks do not retry.
pub trait Sink {
    /// Returns the name of the sink.
    fn name() -> &'static str;

    /// Reads the schema of an existing destination table, `None` if the table does not exist.
    fn fetch_schema(
        &self,
        table_name: &TableName,
    ) -> impl Future<Output = EtlResult<Option<TableSchema>>> + Send;

    /// Creates the table with its indexes and distribution.
    fn create_table(&self, schema: &TableSchema) -> impl Future<Output = EtlResult<()>> + Send;

    /// Appends `column` to the table described by `schema`.
    fn create_column(
        &self,
        schema: &TableSchema,
        column: &TableColumn,
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// Removes every row of the table.
    fn truncate_table(&self, schema: &TableSchema) -> impl Future<Output = EtlResult<()>> + Send;

    /// Bulk loads a batch of rows and returns the number of rows written.
    fn bulk_load(&self, batch: &RowBatch) -> impl Future<Output = EtlResult<u64>> + Send;

    /// Inserts the row or replaces the row with the same primary key.
    fn upsert(&self, row: &TableRow) -> impl Future<Output = EtlResult<()>> + Send;

    /// Deletes the row with the given primary key, if present.
    fn delete(&self, key: &PrimaryKeyValue) -> impl Future<Output = EtlResult<()>> + Send;

    /// Releases the sink's resources. The default implementation does nothing.
    fn close(&self) -> impl Future<Output = EtlResult<()>> + Send {
        async { Ok(()) }
    }
}
