//! External blob storage.
//!
//! Large field payloads live as plain files next to the row store:
//!
//! - **PathLayout**: maps a row identity and a logical name to a file path
//! - **BlobHandle**: lazily loaded, copy-on-write reference to one blob
//! - **TransactionContext**: pending writes and the stage journal of one transaction
//! - **StorageCoordinator**: transaction observer that stages, commits and
//!   reverts the files so they always match the committed rows

pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod handle;
pub mod layout;
pub mod validator;

pub use config::StorageConfig;
pub use context::{Phase, StageJournal, StagedBlob, TransactionContext};
pub use coordinator::StorageCoordinator;
pub use error::{BlobError, BlobResult};
pub use handle::BlobHandle;
pub use layout::PathLayout;
pub use validator::{AcceptAll, BlobValidator, MaxSize};
