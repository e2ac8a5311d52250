//! Mutation hooks.

/// What kind of local mutation happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// `add`
    Add,
    /// `update` or `retry`
    Update,
    /// `remove` or `remove_all(true)`
    Remove,
}

/// Receives a notification after every local mutation of a table.
///
/// The sync engine implements this to debounce a reconciliation pass and
/// register a background sync tag. Implementations must not block; the
/// call happens inline with the write.
pub trait MutationHook: Send + Sync {
    /// Called after a mutation has been committed.
    fn mutated(&self, table: &'static str, kind: MutationKind);
}

/// A hook that ignores every mutation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl MutationHook for NoopHook {
    fn mutated(&self, _table: &'static str, _kind: MutationKind) {}
}
