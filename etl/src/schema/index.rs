use crate::schema::identifier::quote_identifier;
use crate::schema::table::TableName;

/// A secondary index on a destination table.
///
/// The physical index name is prefixed with the table name so that indexes of different tables
/// never collide in the destination namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableIndex {
    table_name: TableName,
    index_name: String,
    columns: Vec<String>,
}

impl TableIndex {
    pub fn new(table_name: TableName, index_name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table_name,
            index_name: index_name.into(),
            columns,
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the index name as created in the destination, `<table>_<index>`.
    pub fn physical_name(&self) -> String {
        format!("{}_{}", self.table_name.name, self.index_name)
    }

    /// Returns the `CREATE INDEX` statement for this index.
    pub fn to_ddl(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|column| quote_identifier(column))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "CREATE INDEX {} ON {} ({})",
            quote_identifier(&self.physical_name()),
            self.table_name.as_quoted_identifier(),
            columns
        )
    }
}
