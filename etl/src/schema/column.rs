use std::fmt;

use crate::schema::identifier::quote_identifier;

/// Destination column types produced by the type mapper.
///
/// Types are compared only for equality. A value whose type differs from an existing column is
/// never coerced into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableColumnType {
    Text,
    Numeric,
    Bytea,
    Jsonb,
    Boolean,
}

impl TableColumnType {
    /// Returns the canonical Postgres type name.
    pub fn name(&self) -> &'static str {
        match self {
            TableColumnType::Text => "text",
            TableColumnType::Numeric => "numeric",
            TableColumnType::Bytea => "bytea",
            TableColumnType::Jsonb => "jsonb",
            TableColumnType::Boolean => "boolean",
        }
    }

    /// Parses a type name as reported by the destination catalog.
    ///
    /// Unknown names map to [`TableColumnType::Text`].
    pub fn from_name(name: &str) -> TableColumnType {
        match name.to_ascii_lowercase().as_str() {
            "numeric" | "decimal" => TableColumnType::Numeric,
            "bytea" => TableColumnType::Bytea,
            "jsonb" | "json" => TableColumnType::Jsonb,
            "boolean" | "bool" => TableColumnType::Boolean,
            _ => TableColumnType::Text,
        }
    }
}

impl fmt::Display for TableColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A column of a [`crate::schema::TableSchema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
    name: String,
    column_type: TableColumnType,
    not_null: bool,
}

impl TableColumn {
    pub fn new(name: impl Into<String>, column_type: TableColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            not_null: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> TableColumnType {
        self.column_type
    }

    pub fn not_null(&self) -> bool {
        self.not_null
    }

    pub(crate) fn set_not_null(&mut self, not_null: bool) {
        self.not_null = not_null;
    }

    /// Returns the column's name quoted for use in SQL.
    pub fn quoted_name(&self) -> String {
        quote_identifier(&self.name)
    }

    /// Returns the column definition used inside `CREATE TABLE` and `ADD COLUMN`.
    pub fn to_ddl(&self) -> String {
        let mut ddl = format!("{} {}", self.quoted_name(), self.column_type);
        if self.not_null {
            ddl.push_str(" NOT NULL");
        }

        ddl
    }
}
