//! Lazily loaded references to external blobs.

use std::fmt;
use std::sync::Weak;

use bytes::Bytes;
use parking_lot::Mutex;

use super::context::TransactionContext;
use super::coordinator::StorageCoordinator;
use super::error::{BlobError, BlobResult};
use crate::transaction::RowId;

/// A reference to the blob stored under one logical name of one row.
///
/// Handles are values: "setting" a blob produces a new handle through
/// [`BlobHandle::with_payload`] and never mutates a handle another record
/// might be looking at. The only interior state is the payload cache, which
/// is filled at most once from committed storage.
pub struct BlobHandle {
    name: String,
    row: Option<RowId>,
    /// `None` until resolved; `Some(None)` means no blob.
    cache: Mutex<Option<Option<Bytes>>>,
    coordinator: Weak<StorageCoordinator>,
}

impl BlobHandle {
    pub(crate) fn new(
        coordinator: Weak<StorageCoordinator>,
        name: String,
        row: Option<RowId>,
        cache: Option<Option<Bytes>>,
    ) -> Self {
        Self {
            name,
            row,
            cache: Mutex::new(cache),
            coordinator,
        }
    }

    /// The logical name of the blob.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The identity of the owning row, once it is known.
    pub fn row(&self) -> Option<RowId> {
        self.row
    }

    /// Returns true once the payload is held in memory.
    pub fn is_resolved(&self) -> bool {
        self.cache.lock().is_some()
    }

    /// Returns the payload, loading it from committed storage on first use.
    ///
    /// A handle without a row identity never touches storage.
    pub fn resolve(&self) -> BlobResult<Option<Bytes>> {
        let mut cache = self.cache.lock();
        if let Some(payload) = cache.as_ref() {
            return Ok(payload.clone());
        }

        let payload = match self.row {
            Some(row) => self.coordinator()?.load_bytes(Some(row), &self.name)?,
            None => None,
        };
        *cache = Some(payload.clone());
        Ok(payload)
    }

    /// Returns a copy of this handle carrying `payload` instead.
    ///
    /// `None` clears the blob once the copy is saved.
    pub fn with_payload(&self, payload: Option<Bytes>) -> Self {
        Self::new(
            self.coordinator.clone(),
            self.name.clone(),
            self.row,
            Some(payload),
        )
    }

    /// Announces that the owning row is about to be written within the
    /// transaction owning `ctx`.
    ///
    /// Must be called once per save, right before the row reaches the store.
    pub fn prepare_for_save(&self, ctx: &mut TransactionContext) -> BlobResult<()> {
        self.coordinator()?.register_pending_save(ctx, self)
    }

    /// Assigns the owning row identity. A handle can only ever belong to
    /// one row.
    pub fn bind_row(&mut self, row: RowId) -> BlobResult<()> {
        match self.row {
            Some(bound) if bound != row => Err(BlobError::InvariantViolation(format!(
                "blob '{}' belongs to row {} but was written as row {}",
                self.name, bound, row
            ))),
            _ => {
                self.row = Some(row);
                Ok(())
            }
        }
    }

    /// The payload held in memory without loading, `None` if unresolved.
    pub(crate) fn cached_payload(&self) -> Option<Option<Bytes>> {
        self.cache.lock().clone()
    }

    fn coordinator(&self) -> BlobResult<std::sync::Arc<StorageCoordinator>> {
        self.coordinator
            .upgrade()
            .ok_or(BlobError::CoordinatorDropped)
    }
}

impl Clone for BlobHandle {
    fn clone(&self) -> Self {
        Self::new(
            self.coordinator.clone(),
            self.name.clone(),
            self.row,
            self.cached_payload(),
        )
    }
}

impl fmt::Debug for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let payload = match self.cached_payload() {
            None => "unresolved".to_string(),
            Some(None) => "empty".to_string(),
            Some(Some(bytes)) => format!("{} bytes", bytes.len()),
        };
        f.debug_struct("BlobHandle")
            .field("name", &self.name)
            .field("row", &self.row)
            .field("payload", &payload)
            .finish()
    }
}
