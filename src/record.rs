//! Records with an external blob field.
//!
//! A minimal record layer on top of [`TransactionManager`]: the row keeps
//! the inline bytes and the blob lives in the coordinator's file tree.

use std::sync::Arc;

use bytes::Bytes;

use crate::blob::{BlobHandle, BlobResult, StorageCoordinator};
use crate::transaction::{RowId, Transaction, TransactionError, TransactionManager};

/// Row store driving a [`StorageCoordinator`].
pub type BlobStore = TransactionManager<StorageCoordinator>;

/// Transaction of a [`BlobStore`].
pub type BlobTransaction<'m> = Transaction<'m, StorageCoordinator>;

/// A row with inline data and one external blob.
#[derive(Debug, Clone)]
pub struct BlobRecord {
    id: Option<RowId>,
    data: Vec<u8>,
    blob: BlobHandle,
}

impl BlobRecord {
    /// Creates an unsaved record with an empty blob named `name`.
    pub fn new(
        coordinator: &Arc<StorageCoordinator>,
        name: &str,
        data: impl Into<Vec<u8>>,
    ) -> BlobResult<Self> {
        Ok(Self {
            id: None,
            data: data.into(),
            blob: coordinator.handle(name)?,
        })
    }

    /// Loads a committed record. The blob is read on first access.
    pub fn fetch(store: &BlobStore, row: RowId, name: &str) -> BlobResult<Option<Self>> {
        let Some(data) = store.get(row) else {
            return Ok(None);
        };
        Ok(Some(Self {
            id: Some(row),
            data,
            blob: store.observer().persisted_handle(row, name)?,
        }))
    }

    pub fn id(&self) -> Option<RowId> {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn set_data(&mut self, data: impl Into<Vec<u8>>) {
        self.data = data.into();
    }

    pub fn blob(&self) -> &BlobHandle {
        &self.blob
    }

    /// Replaces the blob. `None` removes it once saved.
    pub fn set_blob(&mut self, payload: Option<Bytes>) {
        self.blob = self.blob.with_payload(payload);
    }

    /// Writes the record within `txn`, inserting it on first save.
    pub fn save(&mut self, txn: &mut BlobTransaction<'_>) -> Result<RowId, TransactionError> {
        self.blob
            .prepare_for_save(txn.context_mut())
            .map_err(|err| TransactionError::Observer(Box::new(err)))?;

        let result = match self.id {
            Some(row) => txn.update(row, self.data.clone()).map(|()| row),
            None => txn.insert(self.data.clone()),
        };
        let row = match result {
            Ok(row) => row,
            Err(err) => {
                txn.context_mut().discard_waiting();
                return Err(err);
            }
        };

        self.blob
            .bind_row(row)
            .map_err(|err| TransactionError::Observer(Box::new(err)))?;
        self.id = Some(row);
        Ok(row)
    }
}
