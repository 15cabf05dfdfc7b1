//! Conversion of source items into relational rows.

pub mod mapper;

pub use mapper::{
    ColumnResolution, DATA_COLUMN_NAME, TypeMapper, classify, resolve_column, to_column_value,
};
