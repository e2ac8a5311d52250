//! Error types for FieldSync core.

use crate::status::SyncStatus;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core table operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] fieldsync_storage::StorageError),

    /// A stored row could not be encoded or decoded.
    #[error("row codec error in table {table}: {message}")]
    Codec {
        /// Table holding the row.
        table: String,
        /// Description of the failure.
        message: String,
    },

    /// Record not found (or tombstoned).
    #[error("record not found: {id:?} in table {table}")]
    NotFound {
        /// The table searched.
        table: String,
        /// The record id that was not found.
        id: String,
    },

    /// A record with the same id already exists.
    #[error("record already exists: {id:?} in table {table}")]
    AlreadyExists {
        /// The table written to.
        table: String,
        /// The conflicting id.
        id: String,
    },

    /// The record's sync status forbids the operation.
    #[error("invalid state for {id:?} in table {table}: cannot go from {from} to {to}")]
    InvalidState {
        /// The table holding the record.
        table: String,
        /// The record id.
        id: String,
        /// Current status.
        from: SyncStatus,
        /// Attempted status.
        to: SyncStatus,
    },

    /// The row changed between read and write.
    #[error("concurrent write on {id:?} in table {table}")]
    Conflict {
        /// The table holding the record.
        table: String,
        /// The record id.
        id: String,
    },

    /// Payload rejected by the entity's own validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Remote payload did not match the entity's wire shape.
    #[error("mapping failed: {0}")]
    Mapping(#[from] crate::models::MappingError),
}

impl CoreError {
    /// Returns true for usage errors that retrying cannot fix.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            CoreError::NotFound { .. }
                | CoreError::AlreadyExists { .. }
                | CoreError::InvalidState { .. }
                | CoreError::Validation(_)
        )
    }
}
