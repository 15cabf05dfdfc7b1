//! Relational schema model of replicated tables and its SQL projections.

pub mod column;
pub mod identifier;
pub mod index;
pub mod shared;
pub mod table;

pub use column::{TableColumn, TableColumnType};
pub use identifier::{quote_identifier, requires_quotes, unquote_identifier};
pub use index::TableIndex;
pub use shared::SharedTableSchema;
pub use table::{TableName, TableSchema};
