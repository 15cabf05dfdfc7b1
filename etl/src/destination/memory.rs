use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::destination::base::Sink;
use crate::error::{ErrorKind, EtlResult};
use crate::schema::{TableColumn, TableName, TableSchema};
use crate::types::{PrimaryKeyValue, RowBatch, TableRow, decode_copy_field};
use crate::{bail, etl_error};

/// A stored row: column name to the value's text form. Absent columns are `NULL`.
pub type MemoryRow = BTreeMap<String, String>;

#[derive(Debug)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<MemoryRow>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<TableName, MemoryTable>,
    failing_tables: HashSet<TableName>,
    closed: bool,
}

impl Inner {
    fn table_mut(&mut self, table_name: &TableName) -> EtlResult<&mut MemoryTable> {
        if self.failing_tables.contains(table_name) {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Injected destination failure",
                table_name
            );
        }

        self.tables.get_mut(table_name).ok_or_else(|| {
            etl_error!(
                ErrorKind::DestinationTableMissing,
                "Destination table does not exist",
                table_name
            )
        })
    }
}

/// In-memory relational destination for tests and development.
///
/// Bulk loads decode the bulk-copy text produced for the batch, upserts replace rows by primary
/// key and deletes remove them, mirroring what a Postgres destination stores.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the rows of a table, in storage order.
    pub async fn table_rows(&self, table_name: &TableName) -> Vec<MemoryRow> {
        let inner = self.inner.lock().await;
        inner
            .tables
            .get(table_name)
            .map(|table| table.rows.clone())
            .unwrap_or_default()
    }

    pub async fn table_schema(&self, table_name: &TableName) -> Option<TableSchema> {
        let inner = self.inner.lock().await;
        inner.tables.get(table_name).map(|table| table.schema.clone())
    }

    /// Makes every following write to the table fail.
    pub async fn fail_writes_to(&self, table_name: TableName) {
        self.inner.lock().await.failing_tables.insert(table_name);
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }
}

fn matches_key(row: &MemoryRow, key_columns: &[String], key: &MemoryRow) -> bool {
    key_columns
        .iter()
        .all(|column| row.get(column).is_some() && row.get(column) == key.get(column))
}

fn row_to_memory(row: &TableRow) -> MemoryRow {
    row.schema()
        .columns()
        .iter()
        .filter_map(|column| {
            row.value(column.name())
                .map(|value| (column.name().to_owned(), value.to_string()))
        })
        .collect()
}

impl Sink for MemorySink {
    fn name() -> &'static str {
        "memory"
    }

    async fn fetch_schema(&self, table_name: &TableName) -> EtlResult<Option<TableSchema>> {
        Ok(self.table_schema(table_name).await)
    }

    async fn create_table(&self, schema: &TableSchema) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.tables.contains_key(schema.name()) {
            bail!(
                ErrorKind::DestinationTableAlreadyExists,
                "Destination table already exists",
                schema.name()
            );
        }

        info!(table_name = %schema.name(), "created table in memory");

        inner.tables.insert(
            schema.name().clone(),
            MemoryTable {
                schema: schema.clone(),
                rows: Vec::new(),
            },
        );

        Ok(())
    }

    async fn create_column(&self, schema: &TableSchema, column: &TableColumn) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        let table = inner.table_mut(schema.name())?;
        table.schema.push_column(column.clone())
    }

    async fn truncate_table(&self, schema: &TableSchema) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(table) = inner.tables.get_mut(schema.name()) {
            table.rows.clear();
        }

        Ok(())
    }

    async fn bulk_load(&self, batch: &RowBatch) -> EtlResult<u64> {
        let copy_input = batch.to_copy_input();
        let columns = batch.schema().columns();

        let mut inner = self.inner.lock().await;
        let table = inner.table_mut(batch.schema().name())?;

        let mut written = 0;
        for line in copy_input.lines() {
            let fields = line.split('\t').collect::<Vec<_>>();
            if fields.len() != columns.len() {
                bail!(
                    ErrorKind::InvalidData,
                    "Copy row does not match the table columns",
                    format!("expected {} fields, got {}", columns.len(), fields.len())
                );
            }

            let row = columns
                .iter()
                .zip(fields)
                .filter_map(|(column, field)| {
                    decode_copy_field(field).map(|value| (column.name().to_owned(), value))
                })
                .collect();
            table.rows.push(row);
            written += 1;
        }

        Ok(written)
    }

    async fn upsert(&self, row: &TableRow) -> EtlResult<()> {
        let new_row = row_to_memory(row);
        let key_columns = row.schema().primary_key().to_vec();

        let mut inner = self.inner.lock().await;
        let table = inner.table_mut(row.schema().name())?;

        if !key_columns.is_empty()
            && let Some(existing) = table
                .rows
                .iter_mut()
                .find(|existing| matches_key(existing, &key_columns, &new_row))
        {
            *existing = new_row;
            return Ok(());
        }

        table.rows.push(new_row);

        Ok(())
    }

    async fn delete(&self, key: &PrimaryKeyValue) -> EtlResult<()> {
        let key_columns = key.schema().primary_key().to_vec();
        let key_row = key_columns
            .iter()
            .filter_map(|column| {
                key.value(column)
                    .map(|value| (column.clone(), value.to_string()))
            })
            .collect::<MemoryRow>();

        let mut inner = self.inner.lock().await;
        let table = inner.table_mut(key.schema().name())?;
        table
            .rows
            .retain(|row| !matches_key(row, &key_columns, &key_row));

        Ok(())
    }

    async fn close(&self) -> EtlResult<()> {
        self.inner.lock().await.closed = true;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableColumnType;
    use crate::types::TableColumnValue;

    fn schema() -> Arc<TableSchema> {
        let mut schema = TableSchema::new(TableName::new(None, "users"));
        schema.add_column("id", TableColumnType::Numeric).unwrap();
        schema.add_column("name", TableColumnType::Text).unwrap();
        schema.set_primary_key(vec!["id".to_owned()]).unwrap();
        Arc::new(schema)
    }

    fn row(schema: &Arc<TableSchema>, id: &str, name: &str) -> TableRow {
        let mut row = TableRow::new(schema.clone());
        row.set_value("id", TableColumnValue::Numeric(id.to_owned()))
            .unwrap();
        row.set_value("name", TableColumnValue::Text(name.to_owned()))
            .unwrap();
        row
    }

    #[tokio::test]
    async fn create_table_twice_fails() {
        let sink = MemorySink::new();
        sink.create_table(&schema()).await.unwrap();

        let err = sink.create_table(&schema()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationTableAlreadyExists);
    }

    #[tokio::test]
    async fn bulk_load_decodes_copy_rows() {
        let sink = MemorySink::new();
        let schema = schema();
        sink.create_table(&schema).await.unwrap();

        let mut batch = RowBatch::new(schema.clone());
        batch.push(row(&schema, "1", "tab\tand\\slash"));
        batch.push(TableRow::new(schema.clone()));

        assert_eq!(sink.bulk_load(&batch).await.unwrap(), 2);

        let rows = sink.table_rows(schema.name()).await;
        assert_eq!(rows[0]["name"], "tab\tand\\slash");
        assert!(rows[1].is_empty());
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let sink = MemorySink::new();
        let schema = schema();
        sink.create_table(&schema).await.unwrap();

        let upsert = row(&schema, "1", "a");
        sink.upsert(&upsert).await.unwrap();
        let once = sink.table_rows(schema.name()).await;
        sink.upsert(&upsert).await.unwrap();
        let twice = sink.table_rows(schema.name()).await;

        assert_eq!(once, twice);
        assert_eq!(twice.len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_matching_row() {
        let sink = MemorySink::new();
        let schema = schema();
        sink.create_table(&schema).await.unwrap();
        sink.upsert(&row(&schema, "1", "a")).await.unwrap();
        sink.upsert(&row(&schema, "2", "b")).await.unwrap();

        let mut key = PrimaryKeyValue::new(schema.clone());
        key.set_value("id", TableColumnValue::Numeric("1".to_owned()))
            .unwrap();
        sink.delete(&key).await.unwrap();
        sink.delete(&key).await.unwrap();

        let rows = sink.table_rows(schema.name()).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "2");
    }
}
