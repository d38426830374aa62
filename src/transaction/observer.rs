//! Hooks a transaction manager exposes to components that must stay in
//! step with its commit decisions.

use super::id::RowId;

/// The kind of row-level change reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    Other,
}

impl ChangeKind {
    /// Returns true for changes that write row content.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Insert | Self::Update)
    }
}

/// Observer of a transaction's lifecycle.
///
/// Per transaction the callbacks arrive in this order: any number of
/// [`on_row_changed`](Self::on_row_changed), then at most one
/// [`prepare_commit`](Self::prepare_commit), then exactly one of
/// [`finalize_commit`](Self::finalize_commit) or
/// [`finalize_rollback`](Self::finalize_rollback).
///
/// The manager creates one `Context` when the transaction begins and hands
/// it back by value to the finalize hook, so per-transaction state can never
/// outlive or leak across transactions.
pub trait TransactionObserver: Send + Sync {
    /// State carried through one transaction.
    type Context: Default + Send;
    /// Error reported back to the manager.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Called for every row change made within the transaction.
    fn on_row_changed(
        &self,
        ctx: &mut Self::Context,
        row: RowId,
        kind: ChangeKind,
    ) -> Result<(), Self::Error>;

    /// Called before the transaction commits. An error aborts the commit.
    fn prepare_commit(&self, ctx: &mut Self::Context) -> Result<(), Self::Error>;

    /// Called after the transaction committed.
    fn finalize_commit(&self, ctx: Self::Context);

    /// Called after the transaction rolled back. An error here means the
    /// observer could not undo its side effects.
    fn finalize_rollback(&self, ctx: Self::Context) -> Result<(), Self::Error>;
}

/// Observer that ignores every event.
impl TransactionObserver for () {
    type Context = ();
    type Error = std::convert::Infallible;

    fn on_row_changed(
        &self,
        _ctx: &mut (),
        _row: RowId,
        _kind: ChangeKind,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    fn prepare_commit(&self, _ctx: &mut ()) -> Result<(), Self::Error> {
        Ok(())
    }

    fn finalize_commit(&self, _ctx: ()) {}

    fn finalize_rollback(&self, _ctx: ()) -> Result<(), Self::Error> {
        Ok(())
    }
}
