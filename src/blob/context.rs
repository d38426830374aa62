//! Per-transaction blob bookkeeping.

use std::collections::BTreeMap;

use super::handle::BlobHandle;
use crate::transaction::RowId;

/// Where a transaction stands from the coordinator's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Collecting pending writes; nothing waits for a row identity.
    Collecting,
    /// A save was announced and the store has not reported its row yet.
    AwaitingRowIdentity,
    /// Prepare succeeded; the filesystem holds the new blobs.
    Staged,
    /// Prepare failed part way; rollback must restore the filesystem.
    Aborted,
}

/// A blob location touched during prepare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedBlob {
    pub row: RowId,
    pub name: String,
}

/// Filesystem mutations performed by prepare, in the order they happened.
#[derive(Debug, Default)]
pub struct StageJournal {
    /// Previous versions moved into the temporary tree.
    pub moved_away: Vec<StagedBlob>,
    /// Pending writes applied to their storage path.
    pub stored: Vec<StagedBlob>,
}

impl StageJournal {
    pub fn is_empty(&self) -> bool {
        self.moved_away.is_empty() && self.stored.is_empty()
    }
}

/// Blob state of one transaction.
///
/// Created empty when the transaction begins and consumed by the commit or
/// rollback hook, so nothing survives into the next transaction.
#[derive(Debug, Default)]
pub struct TransactionContext {
    /// The announced save still waiting for its row identity.
    pub(super) waiting: Option<BlobHandle>,
    /// Last write per row, iterated in ascending row order.
    pub(super) pending: BTreeMap<RowId, BlobHandle>,
    pub(super) journal: StageJournal,
    pub(super) restore_pending: bool,
    pub(super) staged: bool,
    pub(super) aborted: bool,
}

impl TransactionContext {
    pub fn phase(&self) -> Phase {
        if self.aborted {
            Phase::Aborted
        } else if self.staged {
            Phase::Staged
        } else if self.waiting.is_some() {
            Phase::AwaitingRowIdentity
        } else {
            Phase::Collecting
        }
    }

    /// Rows with a pending write, ascending.
    pub fn pending_rows(&self) -> Vec<RowId> {
        self.pending.keys().copied().collect()
    }

    /// The pending write of `row`, if any.
    pub fn pending(&self, row: RowId) -> Option<&BlobHandle> {
        self.pending.get(&row)
    }

    pub fn journal(&self) -> &StageJournal {
        &self.journal
    }

    /// True once prepare has started mutating the filesystem.
    pub fn restore_pending(&self) -> bool {
        self.restore_pending
    }

    /// Withdraws an announced save whose row write never reached the store.
    pub fn discard_waiting(&mut self) -> Option<BlobHandle> {
        self.waiting.take()
    }
}
