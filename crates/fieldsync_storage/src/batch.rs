//! Atomic write batches.

use serde::{Deserialize, Serialize};

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOp {
    /// Inserts or replaces a row.
    Put {
        /// Table name.
        table: String,
        /// Row key.
        key: String,
        /// Row bytes.
        value: Vec<u8>,
    },
    /// Removes a row. Removing an absent row is not an error.
    Delete {
        /// Table name.
        table: String,
        /// Row key.
        key: String,
    },
    /// Removes every row of a table.
    Clear {
        /// Table name.
        table: String,
    },
}

/// A condition checked before any operation of the batch is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precondition {
    /// Table name.
    pub table: String,
    /// Row key.
    pub key: String,
    /// Expected current bytes, `None` meaning "row must be absent".
    pub expected: Option<Vec<u8>>,
}

/// A group of mutations applied atomically.
///
/// Either every precondition holds and every operation is applied, or
/// nothing changes. Operations are applied in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    pub(crate) preconditions: Vec<Precondition>,
    pub(crate) ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a put.
    pub fn put(&mut self, table: &str, key: &str, value: Vec<u8>) -> &mut Self {
        self.ops.push(BatchOp::Put {
            table: table.to_string(),
            key: key.to_string(),
            value,
        });
        self
    }

    /// Adds a delete.
    pub fn delete(&mut self, table: &str, key: &str) -> &mut Self {
        self.ops.push(BatchOp::Delete {
            table: table.to_string(),
            key: key.to_string(),
        });
        self
    }

    /// Adds a whole-table clear.
    pub fn clear(&mut self, table: &str) -> &mut Self {
        self.ops.push(BatchOp::Clear {
            table: table.to_string(),
        });
        self
    }

    /// Requires the row to hold exactly `expected` (or be absent for `None`).
    pub fn expect(&mut self, table: &str, key: &str, expected: Option<Vec<u8>>) -> &mut Self {
        self.preconditions.push(Precondition {
            table: table.to_string(),
            key: key.to_string(),
            expected,
        });
        self
    }

    /// Returns true if the batch has no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns the operations of this batch.
    #[must_use]
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Returns the preconditions of this batch.
    #[must_use]
    pub fn preconditions(&self) -> &[Precondition] {
        &self.preconditions
    }
}
