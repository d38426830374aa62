//! Blob storage error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::transaction::RowId;

/// Errors that can occur while staging, committing or reading blobs.
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Blob '{name}' of row {row} rejected: {reason}")]
    ValidationRejected {
        row: RowId,
        name: String,
        reason: String,
    },

    #[error("Failed to {op} {}: {source}", path.display())]
    Filesystem {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Invalid blob name: {0:?}")]
    InvalidName(String),

    #[error(
        "Failed to restore {} blob file(s) during rollback: {}",
        failures.len(),
        describe(failures)
    )]
    RestoreFailed { failures: Vec<(PathBuf, std::io::Error)> },

    #[error("Storage coordinator no longer exists")]
    CoordinatorDropped,
}

impl BlobError {
    pub(crate) fn fs(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::ValidationRejected { .. })
    }

    pub fn is_filesystem(&self) -> bool {
        matches!(self, Self::Filesystem { .. })
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}

fn describe(failures: &[(PathBuf, std::io::Error)]) -> String {
    failures
        .iter()
        .map(|(path, err)| format!("{} ({})", path.display(), err))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for blob operations.
pub type BlobResult<T> = Result<T, BlobError>;
