use std::fmt;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};

/// Progress of one table through the replication phases.
///
/// Phases only move forward. Any of them may be skipped when the run does not select it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TableReplicationPhase {
    /// Nothing has been done for the table yet.
    #[default]
    Uninitialized,
    /// The destination table was created from the derived schema.
    SchemaReplicated,
    /// Every item of the source table was bulk loaded.
    SnapshotLoaded,
    /// The table's change stream is being applied.
    StreamingChanges,
}

impl TableReplicationPhase {
    /// Moves to `next`, which must come after the current phase.
    pub fn advance(&mut self, next: TableReplicationPhase) -> EtlResult<()> {
        if next <= *self {
            bail!(
                ErrorKind::InvalidState,
                "Table replication phases can only move forward",
                format!("cannot move from {self} to {next}")
            );
        }

        *self = next;

        Ok(())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TableReplicationPhase::Uninitialized => "uninitialized",
            TableReplicationPhase::SchemaReplicated => "schema_replicated",
            TableReplicationPhase::SnapshotLoaded => "snapshot_loaded",
            TableReplicationPhase::StreamingChanges => "streaming_changes",
        }
    }
}

impl fmt::Display for TableReplicationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
