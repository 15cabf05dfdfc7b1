use std::collections::HashMap;
use std::fmt;

use pg_escape::quote_literal;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::schema::column::{TableColumn, TableColumnType};
use crate::schema::identifier::quote_identifier;
use crate::schema::index::TableIndex;

/// A possibly schema-qualified destination table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableName {
    /// Destination schema, `None` meaning the default search path.
    pub schema: Option<String>,
    /// Unqualified table name.
    pub name: String,
}

impl TableName {
    pub fn new(schema: Option<String>, name: impl Into<String>) -> TableName {
        Self {
            schema,
            name: name.into(),
        }
    }

    /// Returns the table name quoted and qualified for use in SQL.
    pub fn as_quoted_identifier(&self) -> String {
        match &self.schema {
            Some(schema) => format!(
                "{}.{}",
                quote_identifier(schema),
                quote_identifier(&self.name)
            ),
            None => quote_identifier(&self.name),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Relational schema of one replicated table.
///
/// Columns keep insertion order, which is also the destination column order. The schema only
/// grows: columns are appended and never removed or retyped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: TableName,
    columns: Vec<TableColumn>,
    positions: HashMap<String, usize>,
    distribution_column: Option<String>,
    primary_key: Vec<String>,
    indexes: Vec<TableIndex>,
}

impl TableSchema {
    pub fn new(name: TableName) -> Self {
        Self {
            name,
            columns: Vec::new(),
            positions: HashMap::new(),
            distribution_column: None,
            primary_key: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn name(&self) -> &TableName {
        &self.name
    }

    pub fn columns(&self) -> &[TableColumn] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&TableColumn> {
        self.positions.get(name).map(|&index| &self.columns[index])
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    /// Appends a new column.
    ///
    /// Fails with [`ErrorKind::ColumnExists`] when a column with the same name is present.
    pub fn add_column(
        &mut self,
        name: impl Into<String>,
        column_type: TableColumnType,
    ) -> EtlResult<&TableColumn> {
        let name = name.into();
        if self.positions.contains_key(&name) {
            bail!(
                ErrorKind::ColumnExists,
                "Column already exists",
                format!("column `{name}` already exists in table `{}`", self.name)
            );
        }

        let index = self.columns.len();
        self.columns.push(TableColumn::new(name.clone(), column_type));
        self.positions.insert(name, index);

        Ok(&self.columns[index])
    }

    /// Marks an existing column as `NOT NULL`.
    pub fn set_not_null(&mut self, name: &str) -> EtlResult<()> {
        let Some(&index) = self.positions.get(name) else {
            bail!(
                ErrorKind::ColumnMissing,
                "Column does not exist",
                format!("column `{name}` does not exist in table `{}`", self.name)
            );
        };

        self.columns[index].set_not_null(true);

        Ok(())
    }

    pub fn distribution_column(&self) -> Option<&TableColumn> {
        self.distribution_column
            .as_deref()
            .and_then(|name| self.column(name))
    }

    /// Sets the column whose value shards the destination table.
    pub fn set_distribution_column(&mut self, name: &str) -> EtlResult<()> {
        self.ensure_column_exists(name)?;

        if let Some(existing) = &self.distribution_column {
            bail!(
                ErrorKind::DistributionColumnExists,
                "Distribution column already set",
                format!(
                    "table `{}` is already distributed by `{existing}`",
                    self.name
                )
            );
        }

        self.distribution_column = Some(name.to_owned());

        Ok(())
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn is_primary_key(&self, name: &str) -> bool {
        self.primary_key.iter().any(|column| column == name)
    }

    /// Sets the ordered primary key. Every named column must exist.
    pub fn set_primary_key(&mut self, columns: Vec<String>) -> EtlResult<()> {
        for column in &columns {
            self.ensure_column_exists(column)?;
        }

        self.primary_key = columns;

        Ok(())
    }

    pub fn indexes(&self) -> &[TableIndex] {
        &self.indexes
    }

    /// Adds a secondary index. Column existence is not checked.
    pub fn add_index(&mut self, index_name: impl Into<String>, columns: Vec<String>) {
        self.indexes
            .push(TableIndex::new(self.name.clone(), index_name, columns));
    }

    /// Returns the `CREATE TABLE` statement with an inline primary key.
    pub fn create_table_ddl(&self) -> String {
        let mut definitions = self
            .columns
            .iter()
            .map(TableColumn::to_ddl)
            .collect::<Vec<_>>();

        if !self.primary_key.is_empty() {
            definitions.push(format!("PRIMARY KEY({})", self.quoted_primary_key()));
        }

        let body = definitions
            .iter()
            .map(|definition| format!("  {definition}"))
            .collect::<Vec<_>>()
            .join(",\n");

        format!(
            "CREATE TABLE {} (\n{}\n)",
            self.name.as_quoted_identifier(),
            body
        )
    }

    /// Returns every statement needed to create the table in the destination.
    ///
    /// That is the table itself, one statement per index and, when a distribution column is set,
    /// the Citus `create_distributed_table` call.
    pub fn to_ddl_list(&self) -> Vec<String> {
        let mut statements = vec![self.create_table_ddl()];
        statements.extend(self.indexes.iter().map(TableIndex::to_ddl));

        if let Some(column) = self.distribution_column() {
            statements.push(format!(
                "SELECT create_distributed_table({}, {})",
                quote_literal(&self.name.as_quoted_identifier()),
                quote_literal(column.name())
            ));
        }

        statements
    }

    /// Returns the statement appending `column` to the destination table.
    pub fn add_column_ddl(&self, column: &TableColumn) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.name.as_quoted_identifier(),
            column.to_ddl()
        )
    }

    /// Returns the bulk-copy statement for this table.
    pub fn copy_from_stdin(&self) -> String {
        format!("COPY {} FROM STDIN", self.name.as_quoted_identifier())
    }

    pub fn truncate_ddl(&self) -> String {
        format!("TRUNCATE {}", self.name.as_quoted_identifier())
    }

    pub(crate) fn quoted_primary_key(&self) -> String {
        self.primary_key
            .iter()
            .map(|column| quote_identifier(column))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Appends a column created elsewhere, keeping its `NOT NULL` flag.
    pub(crate) fn push_column(&mut self, column: TableColumn) -> EtlResult<()> {
        let not_null = column.not_null();
        self.add_column(column.name().to_owned(), column.column_type())?;
        if not_null {
            self.set_not_null(column.name())?;
        }

        Ok(())
    }

    fn ensure_column_exists(&self, name: &str) -> EtlResult<()> {
        if !self.positions.contains_key(name) {
            bail!(
                ErrorKind::ColumnMissing,
                "Column does not exist",
                format!("column `{name}` does not exist in table `{}`", self.name)
            );
        }

        Ok(())
    }
}

impl fmt::Display for TableSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ddl_list().join(";\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders_schema() -> TableSchema {
        let mut schema = TableSchema::new(TableName::new(None, "orders"));
        schema
            .add_column("customer_id", TableColumnType::Text)
            .unwrap();
        schema.add_column("orderId", TableColumnType::Numeric).unwrap();
        schema.add_column("total", TableColumnType::Numeric).unwrap();
        schema.set_not_null("customer_id").unwrap();
        schema.set_not_null("orderId").unwrap();
        schema
            .set_primary_key(vec!["customer_id".to_owned(), "orderId".to_owned()])
            .unwrap();
        schema.set_distribution_column("customer_id").unwrap();
        schema.add_index("by_total", vec!["total".to_owned()]);
        schema
    }

    #[test]
    fn add_column_rejects_duplicates() {
        let mut schema = orders_schema();
        let err = schema.add_column("total", TableColumnType::Text).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ColumnExists);
        assert_eq!(schema.columns().len(), 3);
    }

    #[test]
    fn distribution_column_must_exist_and_be_unique() {
        let mut schema = TableSchema::new(TableName::new(None, "t"));
        let err = schema.set_distribution_column("id").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ColumnMissing);

        schema.add_column("id", TableColumnType::Text).unwrap();
        schema.set_distribution_column("id").unwrap();
        let err = schema.set_distribution_column("id").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DistributionColumnExists);
    }

    #[test]
    fn primary_key_columns_must_exist() {
        let mut schema = TableSchema::new(TableName::new(None, "t"));
        schema.add_column("id", TableColumnType::Text).unwrap();

        let err = schema
            .set_primary_key(vec!["id".to_owned(), "sk".to_owned()])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ColumnMissing);
        assert!(schema.primary_key().is_empty());
    }

    #[test]
    fn index_on_missing_column_is_accepted() {
        let mut schema = TableSchema::new(TableName::new(None, "t"));
        schema.add_index("gsi", vec!["nope".to_owned()]);

        assert_eq!(schema.indexes().len(), 1);
    }

    #[test]
    fn create_table_ddl() {
        insta::assert_snapshot!(orders_schema().create_table_ddl(), @r#"
        CREATE TABLE orders (
          customer_id text NOT NULL,
          "orderId" numeric NOT NULL,
          total numeric,
          PRIMARY KEY(customer_id, "orderId")
        )
        "#);
    }

    #[test]
    fn ddl_list_includes_indexes_and_distribution() {
        let statements = orders_schema().to_ddl_list();

        assert_eq!(statements.len(), 3);
        assert_eq!(
            statements[1],
            "CREATE INDEX orders_by_total ON orders (total)"
        );
        assert_eq!(
            statements[2],
            "SELECT create_distributed_table('orders', 'customer_id')"
        );
    }

    #[test]
    fn qualified_statements() {
        let mut schema = TableSchema::new(TableName::new(Some("Sales".to_owned()), "orders"));
        let column = schema
            .add_column("note", TableColumnType::Jsonb)
            .unwrap()
            .clone();

        assert_eq!(schema.copy_from_stdin(), "COPY \"Sales\".orders FROM STDIN");
        assert_eq!(
            schema.add_column_ddl(&column),
            "ALTER TABLE \"Sales\".orders ADD COLUMN note jsonb"
        );
        assert_eq!(schema.truncate_ddl(), "TRUNCATE \"Sales\".orders");
    }
}
