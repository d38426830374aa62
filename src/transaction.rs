//! Transaction management module.
//!
//! This module provides the transactional row store the blob coordinator
//! plugs into:
//! - Transaction lifecycle management (begin, commit, rollback)
//! - Row-level change notifications to a [`TransactionObserver`]
//! - Pre-commit, post-commit and post-rollback hooks
//! - Transaction state tracking

pub mod id;
pub mod manager;
pub mod observer;
pub mod state;

// Re-export commonly used types
pub use id::{IdGenerator, RowId, TransactionId};
pub use manager::{Transaction, TransactionError, TransactionManager};
pub use observer::{ChangeKind, TransactionObserver};
pub use state::{TransactionInfo, TransactionState};
