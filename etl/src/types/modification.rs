use std::sync::Arc;

use crate::schema::TableSchema;
use crate::types::row::{PrimaryKeyValue, TableRow};
use crate::types::value::TableColumnValue;

/// A single change read from a change stream partition.
#[derive(Debug, Clone, PartialEq)]
pub enum TableModification {
    /// Insert the row or replace the row with the same primary key.
    Upsert(TableRow),
    /// Delete the row with this primary key.
    Delete(PrimaryKeyValue),
}

impl TableModification {
    pub fn schema(&self) -> &Arc<TableSchema> {
        match self {
            TableModification::Upsert(row) => row.schema(),
            TableModification::Delete(key) => key.schema(),
        }
    }

    /// Returns the value used to route the modification to a sink connection.
    pub fn distribution_value(&self) -> Option<&TableColumnValue> {
        match self {
            TableModification::Upsert(row) => row.distribution_value(),
            TableModification::Delete(key) => key.distribution_value(),
        }
    }

    /// Returns the SQL statement applying this modification.
    pub fn to_sql(&self) -> String {
        match self {
            TableModification::Upsert(row) => row.to_upsert(),
            TableModification::Delete(key) => key.to_delete(),
        }
    }
}
