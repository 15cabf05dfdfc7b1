//! Continuous replication of a schemaless source store into a relational destination.
//!
//! A table is replicated in up to three phases: its schema is derived from the source description
//! and created in the destination, its items are bulk loaded from a paginated scan, then the
//! partitions of its change stream are applied as upserts and deletes. Columns are appended to
//! the destination whenever a new value shape is observed.

pub mod concurrency;
pub mod conversions;
pub mod destination;
pub mod error;
mod macros;
pub mod pipeline;
pub mod replication;
pub mod schema;
pub mod source;
pub mod state;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
