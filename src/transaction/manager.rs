//! Transaction manager for coordinating transaction lifecycle.
//!
//! The manager doubles as a small in-memory row store: row writes made
//! inside a [`Transaction`] are buffered and only become visible to
//! [`TransactionManager::get`] once the commit succeeds.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};

use super::id::{IdGenerator, RowId, TransactionId};
use super::observer::{ChangeKind, TransactionObserver};
use super::state::{TransactionInfo, TransactionState};

/// Boxed error reported by an observer.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error types for transaction operations.
#[derive(Debug)]
pub enum TransactionError {
    /// The transaction was not found.
    NotFound(TransactionId),
    /// Another transaction is still in flight.
    Busy(TransactionId),
    /// The row does not exist.
    RowNotFound(RowId),
    /// An observer refused a row change.
    Observer(BoxError),
    /// The pre-commit hooks failed and the transaction was rolled back.
    /// `rollback` is set when the observer could not undo its work either.
    CommitAborted {
        id: TransactionId,
        source: BoxError,
        rollback: Option<BoxError>,
    },
    /// The transaction rolled back but an observer could not undo its work.
    RollbackIncomplete { id: TransactionId, source: BoxError },
}

impl TransactionError {
    /// Returns the observer error carried by this error, if it has type `E`.
    ///
    /// For an aborted commit this is the error that stopped the prepare.
    pub fn observer_error<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::Observer(source)
            | Self::CommitAborted { source, .. }
            | Self::RollbackIncomplete { source, .. } => source.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Returns the error of a rollback that left observer work behind.
    pub fn rollback_error<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::CommitAborted {
                rollback: Some(source),
                ..
            }
            | Self::RollbackIncomplete { source, .. } => source.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "Transaction {} not found", id),
            Self::Busy(id) => write!(f, "Transaction {} is still in flight", id),
            Self::RowNotFound(row) => write!(f, "Row {} not found", row),
            Self::Observer(err) => write!(f, "Row change rejected: {}", err),
            Self::CommitAborted {
                id,
                source,
                rollback: None,
            } => write!(f, "Transaction {} aborted during commit: {}", id, source),
            Self::CommitAborted {
                id,
                source,
                rollback: Some(rollback),
            } => write!(
                f,
                "Transaction {} aborted during commit: {}; rollback incomplete: {}",
                id, source, rollback
            ),
            Self::RollbackIncomplete { id, source } => {
                write!(f, "Transaction {} rolled back incompletely: {}", id, source)
            }
        }
    }
}

impl std::error::Error for TransactionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Observer(source)
            | Self::CommitAborted { source, .. }
            | Self::RollbackIncomplete { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Result type for transaction operations.
pub type Result<T> = std::result::Result<T, TransactionError>;

#[derive(Debug, Clone)]
enum RowWrite {
    Put(Vec<u8>),
    Delete,
}

/// The transaction manager handles the lifecycle of all transactions and
/// owns the committed rows.
///
/// At most one transaction is in flight at a time.
pub struct TransactionManager<O: TransactionObserver> {
    observer: Arc<O>,
    /// Generator for unique transaction IDs.
    id_generator: IdGenerator,
    /// Generator for row identities; values are never reused, even after a
    /// rollback.
    row_ids: IdGenerator,
    rows: RwLock<BTreeMap<RowId, Vec<u8>>>,
    /// Map of active and recently finished transactions.
    transactions: RwLock<HashMap<TransactionId, TransactionInfo>>,
    active: Mutex<Option<TransactionId>>,
}

impl<O: TransactionObserver> TransactionManager<O> {
    /// Creates a new transaction manager reporting to `observer`.
    pub fn new(observer: Arc<O>) -> Self {
        Self {
            observer,
            id_generator: IdGenerator::new(),
            row_ids: IdGenerator::new(),
            rows: RwLock::new(BTreeMap::new()),
            transactions: RwLock::new(HashMap::new()),
            active: Mutex::new(None),
        }
    }

    /// Returns the observer driven by this manager.
    pub fn observer(&self) -> &Arc<O> {
        &self.observer
    }

    /// Begins a new transaction.
    pub fn begin(&self) -> Result<Transaction<'_, O>> {
        let mut active = self.active.lock();
        if let Some(current) = *active {
            return Err(TransactionError::Busy(current));
        }

        let id = TransactionId::new(self.id_generator.next());
        *active = Some(id);
        self.transactions.write().insert(id, TransactionInfo::new(id));
        debug!("{} started", id);

        Ok(Transaction {
            manager: self,
            id,
            writes: BTreeMap::new(),
            context: O::Context::default(),
            finished: false,
        })
    }

    /// Gets the state of a transaction.
    pub fn get_state(&self, id: TransactionId) -> Result<TransactionState> {
        self.transactions
            .read()
            .get(&id)
            .map(|info| info.state)
            .ok_or(TransactionError::NotFound(id))
    }

    /// Gets information about a transaction.
    pub fn get_info(&self, id: TransactionId) -> Result<TransactionInfo> {
        self.transactions
            .read()
            .get(&id)
            .cloned()
            .ok_or(TransactionError::NotFound(id))
    }

    /// Returns the transaction currently in flight, if any.
    pub fn active_transaction(&self) -> Option<TransactionId> {
        *self.active.lock()
    }

    /// Returns the total number of transactions (active and finished).
    pub fn transaction_count(&self) -> usize {
        self.transactions.read().len()
    }

    /// Removes finished transactions from the manager.
    pub fn cleanup_finished(&self) -> usize {
        let mut transactions = self.transactions.write();
        let initial_count = transactions.len();
        transactions.retain(|_, info| !info.state.is_finished());
        initial_count - transactions.len()
    }

    /// Reads a committed row.
    pub fn get(&self, row: RowId) -> Option<Vec<u8>> {
        self.rows.read().get(&row).cloned()
    }

    /// Returns the number of committed rows.
    pub fn row_count(&self) -> usize {
        self.rows.read().len()
    }

    fn update_info(&self, id: TransactionId, f: impl FnOnce(&mut TransactionInfo)) {
        if let Some(info) = self.transactions.write().get_mut(&id) {
            f(info);
        }
    }

    fn elapsed(&self, id: TransactionId) -> Duration {
        self.get_info(id)
            .map(|info| info.duration())
            .unwrap_or_default()
    }

    fn release(&self, id: TransactionId) {
        let mut active = self.active.lock();
        if *active == Some(id) {
            *active = None;
        }
    }
}

/// A handle to the transaction in flight. Rolls back on drop if it was
/// neither committed nor rolled back explicitly.
pub struct Transaction<'m, O: TransactionObserver> {
    manager: &'m TransactionManager<O>,
    id: TransactionId,
    writes: BTreeMap<RowId, RowWrite>,
    context: O::Context,
    finished: bool,
}

impl<'m, O: TransactionObserver> Transaction<'m, O> {
    /// Gets the transaction ID.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// The observer state of this transaction.
    pub fn context_mut(&mut self) -> &mut O::Context {
        &mut self.context
    }

    /// Inserts a new row and returns its freshly assigned identity.
    pub fn insert(&mut self, data: impl Into<Vec<u8>>) -> Result<RowId> {
        let row = RowId::new(self.manager.row_ids.next());
        self.notify(row, ChangeKind::Insert)?;
        self.writes.insert(row, RowWrite::Put(data.into()));
        Ok(row)
    }

    /// Replaces the content of an existing row.
    pub fn update(&mut self, row: RowId, data: impl Into<Vec<u8>>) -> Result<()> {
        if !self.exists(row) {
            return Err(TransactionError::RowNotFound(row));
        }
        self.notify(row, ChangeKind::Update)?;
        self.writes.insert(row, RowWrite::Put(data.into()));
        Ok(())
    }

    /// Writes a row under an explicit identity, inserting it if needed.
    pub fn put(&mut self, row: RowId, data: impl Into<Vec<u8>>) -> Result<()> {
        let kind = if self.exists(row) {
            ChangeKind::Update
        } else {
            ChangeKind::Insert
        };
        self.manager.row_ids.observe(row.value());
        self.notify(row, kind)?;
        self.writes.insert(row, RowWrite::Put(data.into()));
        Ok(())
    }

    /// Deletes an existing row.
    pub fn delete(&mut self, row: RowId) -> Result<()> {
        if !self.exists(row) {
            return Err(TransactionError::RowNotFound(row));
        }
        self.notify(row, ChangeKind::Delete)?;
        self.writes.insert(row, RowWrite::Delete);
        Ok(())
    }

    /// Reads a row as seen by this transaction.
    pub fn get(&self, row: RowId) -> Option<Vec<u8>> {
        match self.writes.get(&row) {
            Some(RowWrite::Put(data)) => Some(data.clone()),
            Some(RowWrite::Delete) => None,
            None => self.manager.get(row),
        }
    }

    /// Returns true if the row is visible to this transaction.
    pub fn exists(&self, row: RowId) -> bool {
        match self.writes.get(&row) {
            Some(RowWrite::Put(_)) => true,
            Some(RowWrite::Delete) => false,
            None => self.manager.rows.read().contains_key(&row),
        }
    }

    /// Commits the transaction.
    ///
    /// If the observer's pre-commit hook fails, the transaction is rolled
    /// back instead and the hook's error is returned.
    pub fn commit(mut self) -> Result<()> {
        let manager = self.manager;
        let id = self.id;
        self.finished = true;
        manager.update_info(id, |info| info.prepare());

        let mut context = std::mem::take(&mut self.context);
        if let Err(err) = manager.observer.prepare_commit(&mut context) {
            warn!("{} aborted during prepare: {}", id, err);
            self.writes.clear();
            manager.update_info(id, |info| info.abort());
            let rollback = manager.observer.finalize_rollback(context);
            manager.release(id);
            let rollback = rollback.err().map(|restore_err| -> BoxError {
                error!("{} could not be fully rolled back: {}", id, restore_err);
                Box::new(restore_err)
            });
            return Err(TransactionError::CommitAborted {
                id,
                source: Box::new(err),
                rollback,
            });
        }

        let writes = std::mem::take(&mut self.writes);
        let changes = writes.len();
        {
            let mut rows = manager.rows.write();
            for (row, write) in writes {
                match write {
                    RowWrite::Put(data) => {
                        rows.insert(row, data);
                    }
                    RowWrite::Delete => {
                        rows.remove(&row);
                    }
                }
            }
        }
        manager.update_info(id, |info| info.commit());
        manager.observer.finalize_commit(context);
        manager.release(id);
        info!(
            "{} committed ({} row changes) in {:?}",
            id,
            changes,
            manager.elapsed(id)
        );
        Ok(())
    }

    /// Rolls the transaction back.
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.abort()
    }

    fn abort(&mut self) -> Result<()> {
        let manager = self.manager;
        self.writes.clear();
        manager.update_info(self.id, |info| info.abort());
        let context = std::mem::take(&mut self.context);
        let result = manager.observer.finalize_rollback(context);
        manager.release(self.id);
        info!("{} rolled back after {:?}", self.id, manager.elapsed(self.id));
        result.map_err(|err| {
            error!("{} could not be fully rolled back: {}", self.id, err);
            TransactionError::RollbackIncomplete {
                id: self.id,
                source: Box::new(err),
            }
        })
    }

    fn notify(&mut self, row: RowId, kind: ChangeKind) -> Result<()> {
        self.manager
            .observer
            .on_row_changed(&mut self.context, row, kind)
            .map_err(|err| TransactionError::Observer(Box::new(err)))
    }
}

impl<O: TransactionObserver> Drop for Transaction<'_, O> {
    fn drop(&mut self) {
        if !self.finished {
            self.finished = true;
            // Failures are already logged by abort.
            let _ = self.abort();
        }
    }
}
