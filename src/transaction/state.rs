//! Transaction state management.

use std::time::{Duration, Instant};

use super::id::TransactionId;

/// The possible states of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// The transaction is currently active and can perform operations.
    Active,
    /// The pre-commit hooks are running.
    Preparing,
    /// The transaction has been successfully committed.
    Committed,
    /// The transaction has been aborted (rolled back).
    Aborted,
}

impl TransactionState {
    /// Returns true if the transaction is active.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns true if the transaction is finished (committed or aborted).
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Preparing => write!(f, "Preparing"),
            Self::Committed => write!(f, "Committed"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Information about a transaction.
#[derive(Debug, Clone)]
pub struct TransactionInfo {
    /// The unique identifier of the transaction.
    pub id: TransactionId,
    /// The current state of the transaction.
    pub state: TransactionState,
    /// The timestamp when the transaction started.
    pub start_time: Instant,
    /// The timestamp when the transaction ended (if finished).
    pub end_time: Option<Instant>,
}

impl TransactionInfo {
    /// Creates a new transaction info for an active transaction.
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            start_time: Instant::now(),
            end_time: None,
        }
    }

    /// Returns the duration for which the transaction has been running.
    pub fn duration(&self) -> Duration {
        match self.end_time {
            Some(end) => end.duration_since(self.start_time),
            None => self.start_time.elapsed(),
        }
    }

    /// Moves the transaction into its pre-commit phase.
    pub fn prepare(&mut self) {
        assert!(
            self.state.is_active(),
            "Can only prepare active transactions"
        );
        self.state = TransactionState::Preparing;
    }

    /// Marks the transaction as committed.
    pub fn commit(&mut self) {
        assert!(
            self.state == TransactionState::Preparing,
            "Can only commit prepared transactions"
        );
        self.state = TransactionState::Committed;
        self.end_time = Some(Instant::now());
    }

    /// Marks the transaction as aborted.
    pub fn abort(&mut self) {
        assert!(!self.state.is_finished(), "Transaction already finished");
        self.state = TransactionState::Aborted;
        self.end_time = Some(Instant::now());
    }
}
