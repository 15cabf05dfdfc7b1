//! Postgres and Citus adapters: the destination [`etl::destination::Sink`] and a checkpoint store
//! keeping change stream positions in the destination database.

pub mod checkpoint;
pub mod sink;
mod tls;

pub use checkpoint::PostgresCheckpointStore;
pub use sink::PostgresSink;
