use std::fmt;

use crate::error::ErrorKind;

/// Kind of a replication worker, used to label logs and failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerType {
    /// Drives every selected phase of one table.
    Table { table_name: String },
    /// Applies one partition of a table's change stream.
    Stream {
        table_name: String,
        partition_id: String,
    },
}

impl WorkerType {
    /// Error kind reported when a worker of this type panics.
    pub fn panic_kind(&self) -> ErrorKind {
        match self {
            WorkerType::Table { .. } => ErrorKind::TableWorkerPanic,
            WorkerType::Stream { .. } => ErrorKind::StreamWorkerPanic,
        }
    }
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerType::Table { table_name } => write!(f, "table worker for `{table_name}`"),
            WorkerType::Stream {
                table_name,
                partition_id,
            } => write!(
                f,
                "stream worker for `{table_name}` partition `{partition_id}`"
            ),
        }
    }
}
