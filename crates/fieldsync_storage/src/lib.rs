//! # FieldSync Storage
//!
//! Physical local store for FieldSync.
//!
//! This crate provides the lowest-level storage abstraction. A backend is a
//! set of named tables, each mapping string keys to **opaque byte rows**.
//! Backends do not interpret the rows they store.
//!
//! ## Design Principles
//!
//! - Rows are opaque bytes; record encoding belongs to `fieldsync_core`
//! - Every mutation goes through an atomic [`WriteBatch`]
//! - Batches may carry preconditions, which gives per-record
//!   compare-and-swap without any cross-table transaction support
//! - Must be `Send + Sync` so several execution contexts can share one handle
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - Persistent storage, append-only batch log compacted on open
//!
//! ## Example
//!
//! ```rust
//! use fieldsync_storage::{InMemoryBackend, StorageBackend, WriteBatch};
//!
//! let backend = InMemoryBackend::new();
//! let mut batch = WriteBatch::new();
//! batch.put("surveys", "s-1", b"row".to_vec());
//! assert!(backend.apply(batch).unwrap());
//! assert_eq!(backend.get("surveys", "s-1").unwrap(), Some(b"row".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod batch;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use batch::{BatchOp, Precondition, WriteBatch};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
