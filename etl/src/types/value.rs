use std::fmt;

use pg_escape::quote_literal;

use crate::schema::TableColumnType;

/// Marker written for absent values in the bulk-copy text format.
pub const COPY_NULL: &str = "\\N";

/// A typed value destined for one column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableColumnValue {
    Text(String),
    /// A number kept in its exact textual form.
    Numeric(String),
    Bytes(Vec<u8>),
    /// JSON document text.
    Json(String),
    Bool(bool),
}

impl TableColumnValue {
    pub fn column_type(&self) -> TableColumnType {
        match self {
            TableColumnValue::Text(_) => TableColumnType::Text,
            TableColumnValue::Numeric(_) => TableColumnType::Numeric,
            TableColumnValue::Bytes(_) => TableColumnType::Bytea,
            TableColumnValue::Json(_) => TableColumnType::Jsonb,
            TableColumnValue::Bool(_) => TableColumnType::Boolean,
        }
    }

    /// Returns the value as a SQL string literal.
    pub fn to_quoted_string(&self) -> String {
        quote_literal(&self.to_string()).to_string()
    }

    /// Returns the value as a typed SQL expression, e.g. `'1'::numeric`.
    pub fn to_sql_expression(&self) -> String {
        format!("{}::{}", self.to_quoted_string(), self.column_type())
    }

    /// Returns the value escaped for one field of a bulk-copy row.
    ///
    /// Backslash and the control characters with a copy escape sequence are escaped. NUL
    /// characters cannot be stored in Postgres text and are dropped.
    pub fn to_copy_value(&self) -> String {
        let text = self.to_string();
        let mut escaped = String::with_capacity(text.len());

        for c in text.chars() {
            match c {
                '\\' => escaped.push_str("\\\\"),
                '\u{8}' => escaped.push_str("\\b"),
                '\u{c}' => escaped.push_str("\\f"),
                '\n' => escaped.push_str("\\n"),
                '\r' => escaped.push_str("\\r"),
                '\t' => escaped.push_str("\\t"),
                '\u{b}' => escaped.push_str("\\v"),
                '\0' => {}
                c => escaped.push(c),
            }
        }

        escaped
    }
}

impl fmt::Display for TableColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableColumnValue::Text(value)
            | TableColumnValue::Numeric(value)
            | TableColumnValue::Json(value) => f.write_str(value),
            TableColumnValue::Bytes(bytes) => {
                f.write_str("\\x")?;
                for byte in bytes {
                    write!(f, "{byte:02X}")?;
                }
                Ok(())
            }
            TableColumnValue::Bool(value) => write!(f, "{value}"),
        }
    }
}

/// Decodes one field of a bulk-copy row, returning `None` for [`COPY_NULL`].
pub fn decode_copy_field(field: &str) -> Option<String> {
    if field == COPY_NULL {
        return None;
    }

    let mut decoded = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            decoded.push(c);
            continue;
        }

        match chars.next() {
            Some('b') => decoded.push('\u{8}'),
            Some('f') => decoded.push('\u{c}'),
            Some('n') => decoded.push('\n'),
            Some('r') => decoded.push('\r'),
            Some('t') => decoded.push('\t'),
            Some('v') => decoded.push('\u{b}'),
            Some(other) => decoded.push(other),
            None => decoded.push('\\'),
        }
    }

    Some(decoded)
}
