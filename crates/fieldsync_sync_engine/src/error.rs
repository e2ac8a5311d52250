//! Error types for the sync engine.

use fieldsync_core::CoreError;
use std::fmt;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Coarse classification of a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorKind {
    /// The remote object does not exist.
    NotFound,
    /// The service could not be reached or timed out.
    Unavailable,
    /// The service refused the request (validation, authorization, ...).
    Rejected,
    /// Anything else, including adapter panics and malformed responses.
    Other,
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemoteErrorKind::NotFound => "not found",
            RemoteErrorKind::Unavailable => "unavailable",
            RemoteErrorKind::Rejected => "rejected",
            RemoteErrorKind::Other => "failed",
        };
        f.write_str(name)
    }
}

/// A failed remote call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    /// Failure class.
    pub kind: RemoteErrorKind,
    /// Service or adapter message.
    pub message: String,
}

impl RemoteError {
    /// Creates a remote error.
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The remote object does not exist.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::NotFound, message)
    }

    /// The service could not be reached.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Unavailable, message)
    }

    /// The service refused the request.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Rejected, message)
    }

    /// Any other failure.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Other, message)
    }

    /// Returns true for `NotFound`.
    pub fn is_not_found(&self) -> bool {
        self.kind == RemoteErrorKind::NotFound
    }

    /// Returns true if repeating the call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, RemoteErrorKind::Unavailable | RemoteErrorKind::Other)
    }
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A remote call that aborts the pass (the pull) failed.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The device reported no connectivity before the pass started.
    #[error("not online")]
    Offline,

    /// Another execution context holds the table's sync lease.
    #[error("sync lease for table {table} is held by {holder}")]
    LeaseHeld {
        /// Entity table.
        table: String,
        /// Owner of the lease.
        holder: String,
    },

    /// Local store error.
    #[error("local store error: {0}")]
    Core(#[from] CoreError),

    /// The background bridge was invoked with a tag it does not handle.
    #[error("unknown background sync tag: {0}")]
    UnknownTag(String),

    /// Asset store failure not covered by the other variants.
    #[error("asset {path}: {message}")]
    Asset {
        /// Asset path.
        path: String,
        /// What went wrong.
        message: String,
    },
}

impl SyncError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.is_retryable(),
            SyncError::Offline => true,
            SyncError::LeaseHeld { .. } => true,
            SyncError::Core(CoreError::Conflict { .. }) => true,
            _ => false,
        }
    }

    /// Returns true if another pass already covers this request.
    pub fn is_contention(&self) -> bool {
        matches!(self, SyncError::LeaseHeld { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::Remote(RemoteError::unavailable("timeout")).is_retryable());
        assert!(!SyncError::Remote(RemoteError::rejected("bad input")).is_retryable());
        assert!(SyncError::Offline.is_retryable());
        assert!(SyncError::LeaseHeld {
            table: "surveys".into(),
            holder: "bg".into()
        }
        .is_retryable());
        assert!(!SyncError::UnknownTag("x".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::Offline.to_string(), "not online");
        assert_eq!(
            RemoteError::not_found("survey s-1").to_string(),
            "not found: survey s-1"
        );
        let err = SyncError::from(RemoteError::unavailable("503"));
        assert_eq!(err.to_string(), "remote error: unavailable: 503");
    }

    #[test]
    fn not_found_is_detected() {
        assert!(RemoteError::not_found("gone").is_not_found());
        assert!(!RemoteError::other("gone").is_not_found());
    }
}
