use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tracing::info;

use crate::destination::Sink;
use crate::error::EtlResult;
use crate::schema::column::TableColumn;
use crate::schema::table::TableSchema;

/// Append-only [`TableSchema`] shared by every worker of one table.
///
/// Readers take a cheap [`Arc`] snapshot and never block on writers. Appends are serialized by an
/// async mutex and published only after the destination accepted the matching DDL, so a column
/// visible to readers always exists in the destination. A reader holding an older snapshot drops
/// values of columns it has not seen yet.
#[derive(Debug, Clone)]
pub struct SharedTableSchema {
    current: Arc<RwLock<Arc<TableSchema>>>,
    evolution: Arc<Mutex<()>>,
}

impl SharedTableSchema {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(schema))),
            evolution: Arc::new(Mutex::new(())),
        }
    }

    /// Returns the latest published schema.
    pub fn snapshot(&self) -> Arc<TableSchema> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Evolves the schema with `delta` and creates every new column in `sink`.
    ///
    /// `delta` runs against a private copy of the latest schema and returns the columns it added.
    /// Each column is created in the destination before it becomes visible to readers. When a
    /// column fails to be created, the columns created before it stay published and the error is
    /// returned.
    pub async fn evolve<S, F>(&self, sink: &S, delta: F) -> EtlResult<Vec<TableColumn>>
    where
        S: Sink,
        F: FnOnce(&mut TableSchema) -> EtlResult<Vec<TableColumn>>,
    {
        let _guard = self.evolution.lock().await;

        let base = self.snapshot();
        let mut working = (*base).clone();
        let new_columns = delta(&mut working)?;
        if new_columns.is_empty() {
            return Ok(new_columns);
        }

        let mut published = (*base).clone();
        for column in &new_columns {
            sink.create_column(&published, column).await?;
            published.push_column(column.clone())?;
            self.publish(published.clone());

            info!(
                table_name = %published.name(),
                column_name = column.name(),
                column_type = %column.column_type(),
                "added destination column"
            );
        }

        Ok(new_columns)
    }

    fn publish(&self, schema: TableSchema) {
        let schema = Arc::new(schema);
        match self.current.write() {
            Ok(mut guard) => *guard = schema,
            Err(poisoned) => *poisoned.into_inner() = schema,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::memory::MemorySink;
    use crate::schema::column::TableColumnType;
    use crate::schema::table::TableName;

    #[tokio::test]
    async fn evolve_creates_columns_before_publishing() {
        let sink = MemorySink::new();
        let mut schema = TableSchema::new(TableName::new(None, "users"));
        schema.add_column("id", TableColumnType::Numeric).unwrap();
        sink.create_table(&schema).await.unwrap();

        let shared = SharedTableSchema::new(schema);
        let before = shared.snapshot();

        let added = shared
            .evolve(&sink, |schema| {
                let column = schema.add_column("email", TableColumnType::Text)?.clone();
                Ok(vec![column])
            })
            .await
            .unwrap();

        assert_eq!(added.len(), 1);
        assert!(!before.has_column("email"));
        assert!(shared.snapshot().has_column("email"));

        let destination = sink.table_schema(&TableName::new(None, "users")).await;
        assert!(destination.unwrap().has_column("email"));
    }

    #[tokio::test]
    async fn failed_delta_publishes_nothing() {
        let sink = MemorySink::new();
        let mut schema = TableSchema::new(TableName::new(None, "users"));
        schema.add_column("id", TableColumnType::Numeric).unwrap();
        sink.create_table(&schema).await.unwrap();

        let shared = SharedTableSchema::new(schema);
        let result = shared
            .evolve(&sink, |schema| {
                schema.add_column("id", TableColumnType::Text)?;
                Ok(vec![])
            })
            .await;

        assert!(result.is_err());
        assert_eq!(shared.snapshot().columns().len(), 1);
    }
}
