//! # FieldSync Core
//!
//! Local entity tables for the FieldSync offline-first sync engine.
//!
//! This crate provides:
//! - Typed entity tables with soft deletes and live, hydration-aware lists
//! - The per-record sync status lifecycle and its legal transitions
//! - Index-backed queries (tombstones, status, modification time)
//! - Cross-context sync leases stored next to the data
//! - Survey-domain entities with strict remote mappers
//!
//! ## Key Invariants
//!
//! - Every local mutation is a single atomic storage batch
//! - Tombstoned records never appear in reads
//! - `updated_at` strictly increases on every local mutation
//! - Status changes are checked against [`SyncStatus::can_transition_to`]

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod codec;
mod entity_table;
mod error;
mod hook;
mod lease;
mod live;
pub mod models;
mod record;
mod status;
mod table;

pub use change_feed::ChangeFeed;
pub use entity_table::EntityTable;
pub use error::{CoreError, CoreResult};
pub use hook::{MutationHook, MutationKind, NoopHook};
pub use lease::{LeaseGuard, LeaseHolder, SyncLease, LEASE_TABLE};
pub use live::{ListSnapshot, LiveList};
pub use models::{MappingError, RemoteMapping};
pub use record::{next_timestamp, Entity, LocalRow, Record, RemoteRecord, Timestamp};
pub use status::SyncStatus;
pub use table::{TableHandle, VersionedRow};
