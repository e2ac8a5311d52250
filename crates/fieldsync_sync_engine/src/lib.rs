//! # FieldSync Sync Engine
//!
//! Reconciles local entity tables with a remote API.
//!
//! This crate provides:
//! - The remote adapter contract and a GraphQL implementation
//! - Per-table orchestration with in-process and cross-context exclusion
//! - Debounced mutation triggers, interval sync and reconnect sync
//! - A background bridge that runs passes from a worker context
//! - Binary asset storage with local-first reads and upload replay
//!
//! ## Architecture
//!
//! Each pass is **delete-then-pull-then-push**:
//! 1. Send pending deletes and drop the tombstones the server accepted
//! 2. Pull the remote listing and merge it (newer `updated_at` wins)
//! 3. Push queued and failed records, creating or updating as needed
//! 4. Mark every record that failed as `Failed` and keep going
//!
//! ## Key Invariants
//!
//! - At most one pass per table at a time, across every context sharing storage
//! - A failing record never blocks the rest of its table
//! - Nothing is sent while offline
//! - Adapter panics are contained to the record that caused them

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod assets;
mod bridge;
mod config;
mod connectivity;
mod debounce;
mod error;
mod graphql;
mod orchestrator;
mod reconcile;
mod scheduler;
mod trigger;

pub use adapter::{MockAdapter, RemoteAdapter, RemoteOp, Reply};
pub use assets::{
    Asset, AssetMetadata, AssetStore, MemoryObjectStore, ObjectInfo, ObjectStore, PendingAsset,
    UploadHandle, UploadReport,
};
pub use bridge::{
    BackgroundRegistrar, BackgroundSyncBridge, BridgeOutcome, NoopRegistrar, TagQueue,
    ASSET_SYNC_TAG, DATA_SYNC_TAG,
};
pub use config::SyncConfig;
pub use connectivity::Connectivity;
pub use debounce::Debouncer;
pub use error::{RemoteError, RemoteErrorKind, SyncError, SyncResult};
pub use graphql::{GraphqlAdapter, GraphqlClient, StaticTenant, TenantResolver};
pub use orchestrator::{SyncOrchestrator, SyncOutcome, SyncStats, TableSync};
pub use reconcile::{reconcile, reconcile_leased, PassReport};
pub use scheduler::{SchedulerHandle, SyncScheduler};
pub use trigger::SyncTrigger;
