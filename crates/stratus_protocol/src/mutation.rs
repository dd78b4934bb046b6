//! Row mutations.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Framing overhead charged per encoded field (tag plus length prefix).
const FIELD_OVERHEAD: usize = 2;

/// Timestamp attached to a written cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellTimestamp {
    /// The server picks the timestamp when the write is applied.
    ///
    /// Replaying such a write creates a second cell version, so it is not
    /// idempotent.
    ServerAssigned,
    /// Explicit timestamp in microseconds since the Unix epoch.
    Micros(i64),
}

/// A single cell-level change inside a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    /// Writes a value into a cell.
    SetCell {
        /// Column family.
        family: String,
        /// Column qualifier.
        column: Bytes,
        /// Cell timestamp.
        timestamp: CellTimestamp,
        /// Cell value.
        value: Bytes,
    },
    /// Adds `delta` to a big-endian 64-bit counter cell.
    Increment {
        /// Column family.
        family: String,
        /// Column qualifier.
        column: Bytes,
        /// Amount to add.
        delta: i64,
    },
    /// Deletes every version of one column.
    DeleteFromColumn {
        /// Column family.
        family: String,
        /// Column qualifier.
        column: Bytes,
    },
    /// Deletes every column of one family.
    DeleteFromFamily {
        /// Column family.
        family: String,
    },
    /// Deletes the whole row.
    DeleteFromRow,
}

impl Mutation {
    /// Creates a `SetCell` mutation with an explicit timestamp.
    pub fn set_cell(
        family: impl Into<String>,
        column: impl Into<Bytes>,
        timestamp_micros: i64,
        value: impl Into<Bytes>,
    ) -> Self {
        Mutation::SetCell {
            family: family.into(),
            column: column.into(),
            timestamp: CellTimestamp::Micros(timestamp_micros),
            value: value.into(),
        }
    }

    /// Creates a `SetCell` mutation whose timestamp is assigned by the server.
    pub fn set_cell_server_time(
        family: impl Into<String>,
        column: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Self {
        Mutation::SetCell {
            family: family.into(),
            column: column.into(),
            timestamp: CellTimestamp::ServerAssigned,
            value: value.into(),
        }
    }

    /// Creates an `Increment` mutation.
    pub fn increment(family: impl Into<String>, column: impl Into<Bytes>, delta: i64) -> Self {
        Mutation::Increment {
            family: family.into(),
            column: column.into(),
            delta,
        }
    }

    /// Creates a `DeleteFromColumn` mutation.
    pub fn delete_from_column(family: impl Into<String>, column: impl Into<Bytes>) -> Self {
        Mutation::DeleteFromColumn {
            family: family.into(),
            column: column.into(),
        }
    }

    /// Creates a `DeleteFromFamily` mutation.
    pub fn delete_from_family(family: impl Into<String>) -> Self {
        Mutation::DeleteFromFamily {
            family: family.into(),
        }
    }

    /// Returns true if applying this mutation twice has the same effect as once.
    pub fn is_idempotent(&self) -> bool {
        match self {
            Mutation::SetCell { timestamp, .. } => *timestamp != CellTimestamp::ServerAssigned,
            Mutation::Increment { .. } => false,
            Mutation::DeleteFromColumn { .. }
            | Mutation::DeleteFromFamily { .. }
            | Mutation::DeleteFromRow => true,
        }
    }

    /// Estimated encoded size in bytes.
    pub fn wire_size(&self) -> usize {
        match self {
            Mutation::SetCell {
                family,
                column,
                value,
                ..
            } => family.len() + column.len() + value.len() + 8 + 4 * FIELD_OVERHEAD,
            Mutation::Increment { family, column, .. } => {
                family.len() + column.len() + 8 + 3 * FIELD_OVERHEAD
            }
            Mutation::DeleteFromColumn { family, column } => {
                family.len() + column.len() + 2 * FIELD_OVERHEAD
            }
            Mutation::DeleteFromFamily { family } => family.len() + FIELD_OVERHEAD,
            Mutation::DeleteFromRow => FIELD_OVERHEAD,
        }
    }
}

/// All changes to apply atomically to one row.
///
/// This is one entry of a bulk request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowMutation {
    /// Row key.
    pub row_key: Bytes,
    /// Cell-level changes, applied in order.
    pub mutations: Vec<Mutation>,
}

impl RowMutation {
    /// Creates a row mutation.
    pub fn new(row_key: impl Into<Bytes>, mutations: Vec<Mutation>) -> Self {
        Self {
            row_key: row_key.into(),
            mutations,
        }
    }

    /// Appends a mutation.
    pub fn with(mut self, mutation: Mutation) -> Self {
        self.mutations.push(mutation);
        self
    }

    /// Number of cell-level mutations.
    pub fn mutation_count(&self) -> usize {
        self.mutations.len()
    }

    /// Returns true if there is nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Returns true if every contained mutation is idempotent.
    pub fn is_idempotent(&self) -> bool {
        self.mutations.iter().all(Mutation::is_idempotent)
    }

    /// Estimated encoded size in bytes.
    pub fn wire_size(&self) -> usize {
        self.row_key.len()
            + FIELD_OVERHEAD
            + self
                .mutations
                .iter()
                .map(|m| m.wire_size() + FIELD_OVERHEAD)
                .sum::<usize>()
    }
}
