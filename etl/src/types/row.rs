use std::collections::HashMap;
use std::sync::Arc;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::schema::{TableSchema, quote_identifier};
use crate::types::value::{COPY_NULL, TableColumnValue};

/// A sparse row bound to the schema it was built against.
///
/// Columns without a value render as `NULL` in statements and as `\N` in bulk-copy rows.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    schema: Arc<TableSchema>,
    values: HashMap<String, TableColumnValue>,
}

impl TableRow {
    pub fn new(schema: Arc<TableSchema>) -> Self {
        Self {
            schema,
            values: HashMap::new(),
        }
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    pub fn value(&self, column_name: &str) -> Option<&TableColumnValue> {
        self.values.get(column_name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sets the value of an existing column.
    pub fn set_value(
        &mut self,
        column_name: impl Into<String>,
        value: TableColumnValue,
    ) -> EtlResult<()> {
        let column_name = column_name.into();
        if !self.schema.has_column(&column_name) {
            bail!(
                ErrorKind::ColumnMissing,
                "Column does not exist",
                format!(
                    "column `{column_name}` does not exist in table `{}`",
                    self.schema.name()
                )
            );
        }

        self.values.insert(column_name, value);

        Ok(())
    }

    /// Returns the value of the distribution column, if the table has one and it is set.
    pub fn distribution_value(&self) -> Option<&TableColumnValue> {
        let column = self.schema.distribution_column()?;
        self.values.get(column.name())
    }

    /// Renders the row as one bulk-copy line, without the trailing newline.
    pub fn to_copy_row(&self) -> String {
        self.schema
            .columns()
            .iter()
            .map(|column| match self.values.get(column.name()) {
                Some(value) => value.to_copy_value(),
                None => COPY_NULL.to_owned(),
            })
            .collect::<Vec<_>>()
            .join("\t")
    }

    /// Returns an `INSERT` listing every column of the schema.
    pub fn to_insert(&self) -> String {
        let columns = self
            .schema
            .columns()
            .iter()
            .map(|column| column.quoted_name())
            .collect::<Vec<_>>()
            .join(", ");

        let values = self
            .schema
            .columns()
            .iter()
            .map(|column| match self.values.get(column.name()) {
                Some(value) => value.to_sql_expression(),
                None => "NULL".to_owned(),
            })
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.schema.name().as_quoted_identifier(),
            columns,
            values
        )
    }

    /// Returns an idempotent insert-or-replace statement keyed on the primary key.
    ///
    /// Non-key columns are overwritten with the row's values, including `NULL` for columns the
    /// row does not carry.
    pub fn to_upsert(&self) -> String {
        let insert = self.to_insert();
        if self.schema.primary_key().is_empty() {
            return insert;
        }

        let assignments = self
            .schema
            .columns()
            .iter()
            .filter(|column| !self.schema.is_primary_key(column.name()))
            .map(|column| {
                let name = column.quoted_name();
                format!("{name} = EXCLUDED.{name}")
            })
            .collect::<Vec<_>>();

        let conflict_action = if assignments.is_empty() {
            "DO NOTHING".to_owned()
        } else {
            format!("DO UPDATE SET {}", assignments.join(", "))
        };

        format!(
            "{insert} ON CONFLICT ({}) {conflict_action}",
            self.schema.quoted_primary_key()
        )
    }
}

/// The primary key of a row, used to address deletes.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryKeyValue {
    schema: Arc<TableSchema>,
    values: HashMap<String, TableColumnValue>,
}

impl PrimaryKeyValue {
    pub fn new(schema: Arc<TableSchema>) -> Self {
        Self {
            schema,
            values: HashMap::new(),
        }
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    pub fn value(&self, column_name: &str) -> Option<&TableColumnValue> {
        self.values.get(column_name)
    }

    /// Sets the value of a primary key column.
    ///
    /// Setting any other column is a policy violation reported as
    /// [`ErrorKind::NonPrimaryKeyColumn`].
    pub fn set_value(
        &mut self,
        column_name: impl Into<String>,
        value: TableColumnValue,
    ) -> EtlResult<()> {
        let column_name = column_name.into();
        if !self.schema.is_primary_key(&column_name) {
            bail!(
                ErrorKind::NonPrimaryKeyColumn,
                "Column is not part of the primary key",
                format!(
                    "column `{column_name}` is not a primary key column of table `{}`",
                    self.schema.name()
                )
            );
        }

        self.values.insert(column_name, value);

        Ok(())
    }

    /// Returns `true` when every primary key column has a value.
    pub fn is_complete(&self) -> bool {
        self.schema
            .primary_key()
            .iter()
            .all(|column| self.values.contains_key(column))
    }

    pub fn distribution_value(&self) -> Option<&TableColumnValue> {
        let column = self.schema.distribution_column()?;
        self.values.get(column.name())
    }

    /// Returns the `DELETE` statement addressing this key.
    pub fn to_delete(&self) -> String {
        let conditions = self
            .schema
            .primary_key()
            .iter()
            .map(|column| {
                let name = quote_identifier(column);
                match self.values.get(column) {
                    Some(value) => format!("{name} = {}", value.to_sql_expression()),
                    None => format!("{name} IS NULL"),
                }
            })
            .collect::<Vec<_>>()
            .join(" AND ");

        format!(
            "DELETE FROM {} WHERE {}",
            self.schema.name().as_quoted_identifier(),
            conditions
        )
    }
}

/// Rows of one table destined for a single bulk load.
#[derive(Debug, Clone)]
pub struct RowBatch {
    schema: Arc<TableSchema>,
    rows: Vec<TableRow>,
}

impl RowBatch {
    pub fn new(schema: Arc<TableSchema>) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn push(&mut self, row: TableRow) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the bulk-copy payload, one newline-terminated line per row.
    pub fn to_copy_input(&self) -> String {
        let mut input = String::new();
        for row in &self.rows {
            input.push_str(&row.to_copy_row());
            input.push('\n');
        }

        input
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{TableColumnType, TableName};
    use crate::types::value::decode_copy_field;

    fn users_schema() -> Arc<TableSchema> {
        let mut schema = TableSchema::new(TableName::new(None, "users"));
        schema.add_column("id", TableColumnType::Numeric).unwrap();
        schema.add_column("name", TableColumnType::Text).unwrap();
        schema.add_column("avatar", TableColumnType::Bytea).unwrap();
        schema.set_not_null("id").unwrap();
        schema.set_primary_key(vec!["id".to_owned()]).unwrap();
        schema.set_distribution_column("id").unwrap();
        Arc::new(schema)
    }

    #[test]
    fn upsert_overwrites_non_key_columns() {
        let mut row = TableRow::new(users_schema());
        row.set_value("id", TableColumnValue::Numeric("7".to_owned()))
            .unwrap();
        row.set_value("name", TableColumnValue::Text("o'neil".to_owned()))
            .unwrap();

        insta::assert_snapshot!(row.to_upsert(), @r#"INSERT INTO users (id, "name", avatar) VALUES ('7'::numeric, 'o''neil'::text, NULL) ON CONFLICT (id) DO UPDATE SET "name" = EXCLUDED."name", avatar = EXCLUDED.avatar"#);
    }

    #[test]
    fn upsert_of_key_only_table_does_nothing_on_conflict() {
        let mut schema = TableSchema::new(TableName::new(None, "keys"));
        schema.add_column("k", TableColumnType::Text).unwrap();
        schema.set_primary_key(vec!["k".to_owned()]).unwrap();

        let mut row = TableRow::new(Arc::new(schema));
        row.set_value("k", TableColumnValue::Text("a".to_owned()))
            .unwrap();

        assert_eq!(
            row.to_upsert(),
            "INSERT INTO keys (k) VALUES ('a'::text) ON CONFLICT (k) DO NOTHING"
        );
    }

    #[test]
    fn setting_unknown_column_fails() {
        let mut row = TableRow::new(users_schema());
        let err = row
            .set_value("missing", TableColumnValue::Bool(true))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ColumnMissing);
    }

    #[test]
    fn copy_row_round_trips() {
        let mut row = TableRow::new(users_schema());
        row.set_value("id", TableColumnValue::Numeric("1".to_owned()))
            .unwrap();
        row.set_value("name", TableColumnValue::Text("a\tb\nc\\d".to_owned()))
            .unwrap();

        let line = row.to_copy_row();
        let fields = line.split('\t').map(decode_copy_field).collect::<Vec<_>>();

        assert_eq!(
            fields,
            vec![Some("1".to_owned()), Some("a\tb\nc\\d".to_owned()), None]
        );
    }

    #[test]
    fn primary_key_rejects_non_key_columns() {
        let mut key = PrimaryKeyValue::new(users_schema());
        let err = key
            .set_value("name", TableColumnValue::Text("x".to_owned()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NonPrimaryKeyColumn);

        key.set_value("id", TableColumnValue::Numeric("3".to_owned()))
            .unwrap();
        assert!(key.is_complete());
        assert_eq!(
            key.to_delete(),
            "DELETE FROM users WHERE id = '3'::numeric"
        );
        assert_eq!(
            key.distribution_value(),
            Some(&TableColumnValue::Numeric("3".to_owned()))
        );
    }

    #[test]
    fn delete_quotes_reserved_key_columns() {
        let mut schema = TableSchema::new(TableName::new(None, "tags"));
        schema.add_column("user", TableColumnType::Text).unwrap();
        schema.add_column("order", TableColumnType::Numeric).unwrap();
        schema
            .set_primary_key(vec!["user".to_owned(), "order".to_owned()])
            .unwrap();

        let mut key = PrimaryKeyValue::new(Arc::new(schema));
        key.set_value("user", TableColumnValue::Text("ann".to_owned()))
            .unwrap();

        insta::assert_snapshot!(key.to_delete(), @r#"DELETE FROM tags WHERE "user" = 'ann'::text AND "order" IS NULL"#);
    }

    #[test]
    fn batch_copy_input_is_newline_terminated() {
        let schema = users_schema();
        let mut batch = RowBatch::new(schema.clone());
        for id in ["1", "2"] {
            let mut row = TableRow::new(schema.clone());
            row.set_value("id", TableColumnValue::Numeric(id.to_owned()))
                .unwrap();
            batch.push(row);
        }

        assert_eq!(batch.to_copy_input(), "1\t\\N\t\\N\n2\t\\N\t\\N\n");
    }
}
