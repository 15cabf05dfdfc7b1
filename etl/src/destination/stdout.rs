use std::io::Write;

use crate::destination::base::Sink;
use crate::error::EtlResult;
use crate::schema::{TableColumn, TableName, TableSchema};
use crate::types::{PrimaryKeyValue, RowBatch, TableRow};

/// Sink printing the SQL it would execute, as a script `psql` can replay.
///
/// It never knows any table, so the schema is always derived from the source.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl StdoutSink {
    pub fn new() -> Self {
        Self
    }

    fn emit(&self, text: &str) -> EtlResult<()> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{text}")?;
        stdout.flush()?;

        Ok(())
    }
}

impl Sink for StdoutSink {
    fn name() -> &'static str {
        "stdout"
    }

    async fn fetch_schema(&self, _table_name: &TableName) -> EtlResult<Option<TableSchema>> {
        Ok(None)
    }

    async fn create_table(&self, schema: &TableSchema) -> EtlResult<()> {
        let script = schema
            .to_ddl_list()
            .iter()
            .map(|statement| format!("{statement};"))
            .collect::<Vec<_>>()
            .join("\n");

        self.emit(&script)
    }

    async fn create_column(&self, schema: &TableSchema, column: &TableColumn) -> EtlResult<()> {
        self.emit(&format!("{};", schema.add_column_ddl(column)))
    }

    async fn truncate_table(&self, schema: &TableSchema) -> EtlResult<()> {
        self.emit(&format!("{};", schema.truncate_ddl()))
    }

    async fn bulk_load(&self, batch: &RowBatch) -> EtlResult<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        self.emit(&format!(
            "{};\n{}\\.",
            batch.schema().copy_from_stdin(),
            batch.to_copy_input()
        ))?;

        Ok(batch.len() as u64)
    }

    async fn upsert(&self, row: &TableRow) -> EtlResult<()> {
        self.emit(&format!("{};", row.to_upsert()))
    }

    async fn delete(&self, key: &PrimaryKeyValue) -> EtlResult<()> {
        self.emit(&format!("{};", key.to_delete()))
    }
}
