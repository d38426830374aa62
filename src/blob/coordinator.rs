//! Keeps blob files in step with the transactions that write them.
//!
//! Saves are announced through [`BlobHandle::prepare_for_save`] and tied to
//! a row by the store's next row-change notification. Nothing reaches the
//! filesystem until the pre-commit hook, which for every pending write (in
//! ascending row order) moves the committed file out of the way into the
//! temporary tree and writes the new payload in its place. A commit then
//! drops the moved-away copies; a rollback deletes the new files and moves
//! the old ones back.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, error, info, warn};

use super::config::StorageConfig;
use super::context::{StageJournal, StagedBlob, TransactionContext};
use super::error::{BlobError, BlobResult};
use super::handle::BlobHandle;
use super::layout::{validate_name, PathLayout};
use super::validator::{AcceptAll, BlobValidator, MaxSize};
use crate::transaction::{ChangeKind, RowId, TransactionObserver};

/// Transaction observer owning the blob directory tree.
pub struct StorageCoordinator {
    config: StorageConfig,
    layout: PathLayout,
    validator: Box<dyn BlobValidator>,
}

impl StorageCoordinator {
    /// Opens the blob tree under `config.base_dir`, accepting any payload.
    pub fn open(config: StorageConfig) -> BlobResult<Arc<Self>> {
        Self::with_validator(config, AcceptAll)
    }

    /// Opens the blob tree, checking every pending write with `validator`.
    pub fn with_validator(
        config: StorageConfig,
        validator: impl BlobValidator + 'static,
    ) -> BlobResult<Arc<Self>> {
        let layout = PathLayout::new(&config.base_dir);
        create_dir(layout.base_dir())?;
        create_dir(&layout.temporary_root())?;
        info!("Blob storage opened at {}", layout.base_dir().display());

        Ok(Arc::new(Self {
            config,
            layout,
            validator: Box::new(validator),
        }))
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn layout(&self) -> &PathLayout {
        &self.layout
    }

    /// A handle for a row that has not been saved yet.
    pub fn handle(self: &Arc<Self>, name: &str) -> BlobResult<BlobHandle> {
        validate_name(name)?;
        Ok(BlobHandle::new(
            Arc::downgrade(self),
            name.to_string(),
            None,
            Some(None),
        ))
    }

    /// A handle reading the committed blob of `row` on demand.
    pub fn persisted_handle(self: &Arc<Self>, row: RowId, name: &str) -> BlobResult<BlobHandle> {
        validate_name(name)?;
        Ok(BlobHandle::new(
            Arc::downgrade(self),
            name.to_string(),
            Some(row),
            None,
        ))
    }

    /// Remembers `handle` as the save the next row change belongs to.
    pub fn register_pending_save(
        &self,
        ctx: &mut TransactionContext,
        handle: &BlobHandle,
    ) -> BlobResult<()> {
        if ctx.staged || ctx.aborted {
            return Err(BlobError::InvariantViolation(format!(
                "save of blob '{}' announced after prepare",
                handle.name()
            )));
        }
        if let Some(waiting) = &ctx.waiting {
            return Err(BlobError::InvariantViolation(format!(
                "save of blob '{}' announced while '{}' still awaits its row identity",
                handle.name(),
                waiting.name()
            )));
        }

        debug!("Save of blob '{}' announced", handle.name());
        ctx.waiting = Some(handle.clone());
        Ok(())
    }

    /// Ties the waiting save, if any, to `row`.
    pub fn row_changed(
        &self,
        ctx: &mut TransactionContext,
        row: RowId,
        kind: ChangeKind,
    ) -> BlobResult<()> {
        let Some(mut handle) = ctx.waiting.take() else {
            return Ok(());
        };
        if !kind.is_write() {
            debug!(
                "Dropping save of blob '{}': row {} change was {:?}",
                handle.name(),
                row,
                kind
            );
            return Ok(());
        }

        handle.bind_row(row)?;
        if ctx.pending.insert(row, handle).is_some() {
            debug!("Pending blob write of row {} replaced", row);
        }
        Ok(())
    }

    /// Applies every pending write to the filesystem.
    ///
    /// Stops at the first failure; whatever was already moved or written
    /// is undone by [`finalize_rollback`](Self::finalize_rollback).
    pub fn prepare_commit(&self, ctx: &mut TransactionContext) -> BlobResult<()> {
        if let Some(waiting) = &ctx.waiting {
            return Err(BlobError::InvariantViolation(format!(
                "blob '{}' has no row identity at commit",
                waiting.name()
            )));
        }
        if ctx.staged || ctx.aborted {
            return Err(BlobError::InvariantViolation(
                "transaction prepared twice".to_string(),
            ));
        }

        if !ctx.pending.is_empty() {
            ctx.restore_pending = true;
        }
        for (row, handle) in &ctx.pending {
            if let Err(err) = self.stage(*row, handle, &mut ctx.journal) {
                warn!("Staging blob '{}' of row {} failed: {}", handle.name(), row, err);
                ctx.aborted = true;
                return Err(err);
            }
        }

        ctx.staged = true;
        debug!(
            "Staged {} blob write(s), {} previous version(s) held",
            ctx.journal.stored.len(),
            ctx.journal.moved_away.len()
        );
        Ok(())
    }

    /// Drops the previous versions held for the committed transaction.
    pub fn finalize_commit(&self, ctx: TransactionContext) {
        for blob in &ctx.journal.moved_away {
            let temporary = self.layout.temporary_path(blob.row, &blob.name);
            match fs::remove_file(&temporary) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!(
                    "Failed to remove {} after commit: {}",
                    temporary.display(),
                    err
                ),
            }
        }
        if !ctx.journal.is_empty() {
            info!("Committed {} blob write(s)", ctx.journal.stored.len());
        }
    }

    /// Puts the filesystem back the way it was before prepare started.
    ///
    /// Only a previous version that cannot be moved back is an error; any
    /// other cleanup failure is logged.
    pub fn finalize_rollback(&self, ctx: TransactionContext) -> BlobResult<()> {
        if !ctx.restore_pending {
            return Ok(());
        }

        // New files go first so a restored file is never deleted again.
        for blob in &ctx.journal.stored {
            let storage = self.layout.storage_path(blob.row, &blob.name);
            match fs::remove_file(&storage) {
                Ok(()) => debug!("Removed {}", storage.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!(
                    "Failed to remove {} during rollback: {}",
                    storage.display(),
                    err
                ),
            }
        }

        let mut failures = Vec::new();
        for blob in &ctx.journal.moved_away {
            if let Err((path, err)) = self.restore(blob) {
                error!("Failed to restore {}: {}", path.display(), err);
                failures.push((path, err));
            }
        }

        if !failures.is_empty() {
            return Err(BlobError::RestoreFailed { failures });
        }
        info!(
            "Rolled back {} blob write(s), restored {} previous version(s)",
            ctx.journal.stored.len(),
            ctx.journal.moved_away.len()
        );
        Ok(())
    }

    /// Reads the committed blob of `row`. Unsaved rows have no blob.
    pub fn load_bytes(&self, row: Option<RowId>, name: &str) -> BlobResult<Option<Bytes>> {
        validate_name(name)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let path = self.layout.storage_path(row, name);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(BlobError::fs("read", path, err)),
        }
    }

    /// Files currently held in the temporary tree.
    ///
    /// Outside of a transaction this is empty unless a previous process died
    /// between prepare and finalize.
    pub fn leftover_temporary_files(&self) -> BlobResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        collect_files(&self.layout.temporary_root(), &mut files)?;
        files.sort();
        Ok(files)
    }

    fn stage(&self, row: RowId, handle: &BlobHandle, journal: &mut StageJournal) -> BlobResult<()> {
        let Some(payload) = handle.cached_payload() else {
            debug!("Blob '{}' of row {} unchanged", handle.name(), row);
            return Ok(());
        };
        let name = handle.name();
        self.check(row, name, payload.as_deref())?;

        let storage = self.layout.storage_path(row, name);
        let exists = storage
            .try_exists()
            .map_err(|err| BlobError::fs("inspect", &storage, err))?;
        if exists {
            let temporary = self.layout.temporary_path(row, name);
            create_parent(&temporary)?;
            fs::rename(&storage, &temporary).map_err(|err| BlobError::fs("move", &storage, err))?;
            debug!("Moved {} to {}", storage.display(), temporary.display());
            journal.moved_away.push(StagedBlob {
                row,
                name: name.to_string(),
            });
        }

        if let Some(bytes) = payload {
            create_parent(&storage)?;
            self.write_file(&storage, &bytes)?;
            debug!("Wrote {} bytes to {}", bytes.len(), storage.display());
        }
        journal.stored.push(StagedBlob {
            row,
            name: name.to_string(),
        });
        Ok(())
    }

    fn check(&self, row: RowId, name: &str, payload: Option<&[u8]>) -> BlobResult<()> {
        let size_limit = self.config.max_blob_size.map(MaxSize);
        let result = match size_limit {
            Some(limit) => limit.validate(row, name, payload),
            None => Ok(()),
        }
        .and_then(|()| self.validator.validate(row, name, payload));

        result.map_err(|reason| BlobError::ValidationRejected {
            row,
            name: name.to_string(),
            reason,
        })
    }

    fn write_file(&self, path: &Path, bytes: &[u8]) -> BlobResult<()> {
        let result = File::create(path).and_then(|mut file| {
            file.write_all(bytes)?;
            if self.config.sync_writes {
                file.sync_all()?;
            }
            Ok(())
        });
        result.map_err(|err| {
            // Never leave a torn file behind at the storage path.
            let _ = fs::remove_file(path);
            BlobError::fs("write", path, err)
        })
    }

    fn restore(&self, blob: &StagedBlob) -> Result<(), (PathBuf, std::io::Error)> {
        let temporary = self.layout.temporary_path(blob.row, &blob.name);
        let storage = self.layout.storage_path(blob.row, &blob.name);
        match temporary.try_exists() {
            Ok(true) => {}
            Ok(false) => {
                warn!("Nothing to restore at {}", temporary.display());
                return Ok(());
            }
            Err(err) => return Err((temporary, err)),
        }

        if let Some(parent) = storage.parent() {
            fs::create_dir_all(parent).map_err(|err| (storage.clone(), err))?;
        }
        fs::rename(&temporary, &storage).map_err(|err| (storage.clone(), err))?;
        debug!("Restored {}", storage.display());
        Ok(())
    }
}

impl TransactionObserver for StorageCoordinator {
    type Context = TransactionContext;
    type Error = BlobError;

    fn on_row_changed(
        &self,
        ctx: &mut TransactionContext,
        row: RowId,
        kind: ChangeKind,
    ) -> BlobResult<()> {
        self.row_changed(ctx, row, kind)
    }

    fn prepare_commit(&self, ctx: &mut TransactionContext) -> BlobResult<()> {
        StorageCoordinator::prepare_commit(self, ctx)
    }

    fn finalize_commit(&self, ctx: TransactionContext) {
        StorageCoordinator::finalize_commit(self, ctx)
    }

    fn finalize_rollback(&self, ctx: TransactionContext) -> BlobResult<()> {
        StorageCoordinator::finalize_rollback(self, ctx)
    }
}

fn create_dir(path: &Path) -> BlobResult<()> {
    fs::create_dir_all(path).map_err(|err| BlobError::fs("create directory", path, err))
}

fn create_parent(path: &Path) -> BlobResult<()> {
    match path.parent() {
        Some(parent) => create_dir(parent),
        None => Ok(()),
    }
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> BlobResult<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(BlobError::fs("list", dir, err)),
    };
    for entry in entries {
        let path = entry.map_err(|err| BlobError::fs("list", dir, err))?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::context::Phase;
    use tempfile::{tempdir, TempDir};

    fn setup() -> (TempDir, Arc<StorageCoordinator>) {
        let dir = tempdir().unwrap();
        let coordinator = StorageCoordinator::open(StorageConfig::new(dir.path())).unwrap();
        (dir, coordinator)
    }

    fn reject_invalid(_row: RowId, _name: &str, payload: Option<&[u8]>) -> Result<(), String> {
        match payload {
            Some(b"invalid") => Err("disallowed value".to_string()),
            _ => Ok(()),
        }
    }

    /// Announces a save of `payload` and reports the row change for it.
    fn save(
        coordinator: &Arc<StorageCoordinator>,
        ctx: &mut TransactionContext,
        row: u64,
        payload: Option<&'static [u8]>,
    ) {
        let handle = coordinator
            .handle("data")
            .unwrap()
            .with_payload(payload.map(Bytes::from_static));
        handle.prepare_for_save(ctx).unwrap();
        coordinator
            .row_changed(ctx, RowId::new(row), ChangeKind::Update)
            .unwrap();
    }

    fn commit(coordinator: &Arc<StorageCoordinator>, row: u64, payload: &'static [u8]) {
        let mut ctx = TransactionContext::default();
        save(coordinator, &mut ctx, row, Some(payload));
        coordinator.prepare_commit(&mut ctx).unwrap();
        coordinator.finalize_commit(ctx);
    }

    fn read(coordinator: &StorageCoordinator, row: u64) -> Option<Bytes> {
        coordinator.load_bytes(Some(RowId::new(row)), "data").unwrap()
    }

    #[test]
    fn test_open_creates_trees() {
        let (dir, _coordinator) = setup();
        assert!(dir.path().is_dir());
        assert!(dir.path().join("tmp").is_dir());
    }

    #[test]
    fn test_commit_round_trip() {
        let (dir, coordinator) = setup();
        commit(&coordinator, 1, b"foo");

        assert_eq!(fs::read(dir.path().join("1/data")).unwrap(), b"foo");
        assert_eq!(read(&coordinator, 1), Some(Bytes::from_static(b"foo")));
        assert!(coordinator.leftover_temporary_files().unwrap().is_empty());
    }

    #[test]
    fn test_load_without_row() {
        let (_dir, coordinator) = setup();
        assert_eq!(coordinator.load_bytes(None, "data").unwrap(), None);
        assert_eq!(read(&coordinator, 5), None);
    }

    #[test]
    fn test_commit_replaces_previous_version() {
        let (_dir, coordinator) = setup();
        commit(&coordinator, 1, b"foo");
        commit(&coordinator, 1, b"bar");

        assert_eq!(read(&coordinator, 1), Some(Bytes::from_static(b"bar")));
        assert!(coordinator.leftover_temporary_files().unwrap().is_empty());
    }

    #[test]
    fn test_last_write_wins() {
        let (_dir, coordinator) = setup();
        let mut ctx = TransactionContext::default();
        save(&coordinator, &mut ctx, 1, Some(b"first"));
        save(&coordinator, &mut ctx, 1, Some(b"second"));
        assert_eq!(ctx.pending_rows(), vec![RowId::new(1)]);

        coordinator.prepare_commit(&mut ctx).unwrap();
        assert_eq!(ctx.journal().stored.len(), 1);
        coordinator.finalize_commit(ctx);

        assert_eq!(read(&coordinator, 1), Some(Bytes::from_static(b"second")));
    }

    #[test]
    fn test_rollback_restores_previous_version() {
        let (dir, coordinator) = setup();
        commit(&coordinator, 1, b"foo");

        let mut ctx = TransactionContext::default();
        save(&coordinator, &mut ctx, 1, Some(b"bar"));
        coordinator.prepare_commit(&mut ctx).unwrap();
        assert_eq!(ctx.phase(), Phase::Staged);
        assert_eq!(read(&coordinator, 1), Some(Bytes::from_static(b"bar")));
        assert!(dir.path().join("tmp/1/data").exists());

        // The store may still decide to roll back after a successful prepare.
        coordinator.finalize_rollback(ctx).unwrap();
        assert_eq!(read(&coordinator, 1), Some(Bytes::from_static(b"foo")));
        assert!(coordinator.leftover_temporary_files().unwrap().is_empty());
    }

    #[test]
    fn test_rollback_removes_new_blob() {
        let (dir, coordinator) = setup();
        let mut ctx = TransactionContext::default();
        save(&coordinator, &mut ctx, 3, Some(b"new"));
        coordinator.prepare_commit(&mut ctx).unwrap();
        assert!(dir.path().join("3/data").exists());

        coordinator.finalize_rollback(ctx).unwrap();
        assert!(!dir.path().join("3/data").exists());
    }

    #[test]
    fn test_clearing_blob() {
        let (dir, coordinator) = setup();
        commit(&coordinator, 1, b"foo");

        let mut ctx = TransactionContext::default();
        save(&coordinator, &mut ctx, 1, None);
        coordinator.prepare_commit(&mut ctx).unwrap();
        assert_eq!(read(&coordinator, 1), None);
        coordinator.finalize_commit(ctx);

        assert_eq!(read(&coordinator, 1), None);
        assert!(!dir.path().join("tmp/1/data").exists());
    }

    #[test]
    fn test_validation_failure_stops_in_row_order() {
        let dir = tempdir().unwrap();
        let coordinator =
            StorageCoordinator::with_validator(StorageConfig::new(dir.path()), reject_invalid)
                .unwrap();
        commit(&coordinator, 1, b"one");

        let mut ctx = TransactionContext::default();
        // Submitted out of order; processed 1, 2, 3.
        save(&coordinator, &mut ctx, 3, Some(b"three"));
        save(&coordinator, &mut ctx, 1, Some(b"uno"));
        save(&coordinator, &mut ctx, 2, Some(b"invalid"));

        let err = coordinator.prepare_commit(&mut ctx).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(ctx.phase(), Phase::Aborted);
        assert!(ctx.restore_pending());
        assert_eq!(ctx.journal().stored.len(), 1);
        assert_eq!(read(&coordinator, 1), Some(Bytes::from_static(b"uno")));
        // Row 3 comes after the failure and is never touched.
        assert!(!dir.path().join("3/data").exists());

        coordinator.finalize_rollback(ctx).unwrap();
        assert_eq!(read(&coordinator, 1), Some(Bytes::from_static(b"one")));
        assert_eq!(read(&coordinator, 2), None);
        assert!(coordinator.leftover_temporary_files().unwrap().is_empty());
    }

    #[test]
    fn test_size_limit() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path()).with_max_blob_size(4);
        let coordinator = StorageCoordinator::open(config).unwrap();

        let mut ctx = TransactionContext::default();
        save(&coordinator, &mut ctx, 1, Some(b"too long"));
        let err = coordinator.prepare_commit(&mut ctx).unwrap_err();
        assert!(matches!(err, BlobError::ValidationRejected { row, .. } if row == RowId::new(1)));
        coordinator.finalize_rollback(ctx).unwrap();
        assert_eq!(read(&coordinator, 1), None);
    }

    #[test]
    fn test_filesystem_failure_aborts_prepare() {
        let (dir, coordinator) = setup();
        commit(&coordinator, 1, b"one");
        // A plain file where row 2's directory belongs.
        fs::write(dir.path().join("2"), b"in the way").unwrap();

        let mut ctx = TransactionContext::default();
        save(&coordinator, &mut ctx, 1, Some(b"uno"));
        save(&coordinator, &mut ctx, 2, Some(b"dos"));

        let err = coordinator.prepare_commit(&mut ctx).unwrap_err();
        assert!(err.is_filesystem());

        coordinator.finalize_rollback(ctx).unwrap();
        assert_eq!(read(&coordinator, 1), Some(Bytes::from_static(b"one")));
    }

    #[test]
    fn test_rollback_without_prepare_is_noop() {
        let (_dir, coordinator) = setup();
        commit(&coordinator, 1, b"foo");

        let mut ctx = TransactionContext::default();
        save(&coordinator, &mut ctx, 1, Some(b"bar"));
        assert!(!ctx.restore_pending());
        coordinator.finalize_rollback(ctx).unwrap();

        assert_eq!(read(&coordinator, 1), Some(Bytes::from_static(b"foo")));
    }

    #[test]
    fn test_restore_failure_is_reported() {
        let (dir, coordinator) = setup();
        commit(&coordinator, 1, b"foo");

        let mut ctx = TransactionContext::default();
        save(&coordinator, &mut ctx, 1, Some(b"bar"));
        coordinator.prepare_commit(&mut ctx).unwrap();

        // Make the row directory unusable so the old version cannot go back.
        fs::remove_dir_all(dir.path().join("1")).unwrap();
        fs::write(dir.path().join("1"), b"in the way").unwrap();

        let err = coordinator.finalize_rollback(ctx).unwrap_err();
        assert!(matches!(err, BlobError::RestoreFailed { ref failures } if failures.len() == 1));
        // The previous version is still held in the temporary tree.
        assert!(dir.path().join("tmp/1/data").exists());
    }

    #[test]
    fn test_delete_notification_drops_waiting_save() {
        let (_dir, coordinator) = setup();
        let mut ctx = TransactionContext::default();

        let handle = coordinator
            .handle("data")
            .unwrap()
            .with_payload(Some(Bytes::from_static(b"x")));
        handle.prepare_for_save(&mut ctx).unwrap();
        coordinator
            .row_changed(&mut ctx, RowId::new(1), ChangeKind::Delete)
            .unwrap();

        assert_eq!(ctx.phase(), Phase::Collecting);
        assert!(ctx.pending_rows().is_empty());
    }

    #[test]
    fn test_notification_without_waiting_save_is_ignored() {
        let (_dir, coordinator) = setup();
        let mut ctx = TransactionContext::default();
        coordinator
            .row_changed(&mut ctx, RowId::new(1), ChangeKind::Insert)
            .unwrap();
        assert!(ctx.pending_rows().is_empty());
    }

    #[test]
    fn test_second_announcement_is_rejected() {
        let (_dir, coordinator) = setup();
        let mut ctx = TransactionContext::default();
        let handle = coordinator.handle("data").unwrap();

        handle.prepare_for_save(&mut ctx).unwrap();
        let err = handle.prepare_for_save(&mut ctx).unwrap_err();
        assert!(err.is_invariant_violation());
        assert_eq!(ctx.phase(), Phase::AwaitingRowIdentity);
    }

    #[test]
    fn test_prepare_with_unbound_save_fails() {
        let (dir, coordinator) = setup();
        let mut ctx = TransactionContext::default();
        save(&coordinator, &mut ctx, 1, Some(b"foo"));
        coordinator
            .handle("data")
            .unwrap()
            .prepare_for_save(&mut ctx)
            .unwrap();

        let err = coordinator.prepare_commit(&mut ctx).unwrap_err();
        assert!(err.is_invariant_violation());
        // Nothing was written.
        assert!(!dir.path().join("1/data").exists());
        assert!(!ctx.restore_pending());
    }

    #[test]
    fn test_row_mismatch_is_invariant_violation() {
        let (_dir, coordinator) = setup();
        let mut ctx = TransactionContext::default();
        let handle = coordinator.persisted_handle(RowId::new(1), "data").unwrap();

        handle.prepare_for_save(&mut ctx).unwrap();
        let err = coordinator
            .row_changed(&mut ctx, RowId::new(2), ChangeKind::Update)
            .unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn test_unresolved_handle_leaves_blob_alone() {
        let (_dir, coordinator) = setup();
        commit(&coordinator, 1, b"foo");

        let mut ctx = TransactionContext::default();
        let handle = coordinator.persisted_handle(RowId::new(1), "data").unwrap();
        handle.prepare_for_save(&mut ctx).unwrap();
        coordinator
            .row_changed(&mut ctx, RowId::new(1), ChangeKind::Update)
            .unwrap();
        coordinator.prepare_commit(&mut ctx).unwrap();
        assert!(ctx.journal().is_empty());
        coordinator.finalize_commit(ctx);

        assert_eq!(read(&coordinator, 1), Some(Bytes::from_static(b"foo")));
    }

    #[test]
    fn test_registration_after_prepare_is_rejected() {
        let (_dir, coordinator) = setup();
        let mut ctx = TransactionContext::default();
        coordinator.prepare_commit(&mut ctx).unwrap();

        let handle = coordinator.handle("data").unwrap();
        assert!(handle.prepare_for_save(&mut ctx).unwrap_err().is_invariant_violation());
        assert!(coordinator
            .prepare_commit(&mut ctx)
            .unwrap_err()
            .is_invariant_violation());
    }

    #[test]
    fn test_invalid_names() {
        let (_dir, coordinator) = setup();
        assert!(matches!(
            coordinator.handle("../escape"),
            Err(BlobError::InvalidName(_))
        ));
        assert!(matches!(
            coordinator.persisted_handle(RowId::new(1), ""),
            Err(BlobError::InvalidName(_))
        ));
    }

    #[test]
    fn test_load_rejects_invalid_names() {
        let (dir, coordinator) = setup();
        commit(&coordinator, 1, b"foo");
        fs::write(dir.path().join("secret"), b"outside").unwrap();

        for bad in ["", "..", "../secret", "../../x", "a/b"] {
            assert!(
                matches!(
                    coordinator.load_bytes(Some(RowId::new(1)), bad),
                    Err(BlobError::InvalidName(_))
                ),
                "{:?} should be rejected",
                bad
            );
        }
        assert!(matches!(
            coordinator.load_bytes(None, ""),
            Err(BlobError::InvalidName(_))
        ));
    }

    #[test]
    fn test_restore_continues_after_failure() {
        let (dir, coordinator) = setup();
        commit(&coordinator, 1, b"one");
        commit(&coordinator, 2, b"two");
        commit(&coordinator, 3, b"three");

        let mut ctx = TransactionContext::default();
        for row in [1, 2, 3] {
            save(&coordinator, &mut ctx, row, Some(b"new"));
        }
        coordinator.prepare_commit(&mut ctx).unwrap();
        assert_eq!(ctx.journal().moved_away.len(), 3);

        // Only row 1 can no longer be restored.
        fs::remove_dir_all(dir.path().join("1")).unwrap();
        fs::write(dir.path().join("1"), b"in the way").unwrap();

        let err = coordinator.finalize_rollback(ctx).unwrap_err();
        match err {
            BlobError::RestoreFailed { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, dir.path().join("1/data"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(read(&coordinator, 2), Some(Bytes::from_static(b"two")));
        assert_eq!(read(&coordinator, 3), Some(Bytes::from_static(b"three")));
        assert_eq!(
            coordinator.leftover_temporary_files().unwrap(),
            vec![dir.path().join("tmp/1/data")]
        );
    }

    #[test]
    fn test_commit_cleanup_failure_is_not_fatal() {
        let (dir, coordinator) = setup();
        commit(&coordinator, 1, b"one");
        commit(&coordinator, 2, b"two");

        let mut ctx = TransactionContext::default();
        save(&coordinator, &mut ctx, 1, Some(b"uno"));
        save(&coordinator, &mut ctx, 2, Some(b"dos"));
        coordinator.prepare_commit(&mut ctx).unwrap();

        // A directory cannot be removed as a file.
        let held = dir.path().join("tmp/1/data");
        fs::remove_file(&held).unwrap();
        fs::create_dir_all(held.join("nested")).unwrap();

        coordinator.finalize_commit(ctx);
        assert!(held.is_dir());
        assert!(!dir.path().join("tmp/2/data").exists());
        assert_eq!(read(&coordinator, 1), Some(Bytes::from_static(b"uno")));
        assert_eq!(read(&coordinator, 2), Some(Bytes::from_static(b"dos")));
    }

    #[test]
    fn test_synced_writes() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path()).with_sync_writes(true);
        let coordinator = StorageCoordinator::open(config).unwrap();

        commit(&coordinator, 1, b"durable");
        commit(&coordinator, 1, b"more durable");
        assert_eq!(
            read(&coordinator, 1),
            Some(Bytes::from_static(b"more durable"))
        );
        assert!(coordinator.leftover_temporary_files().unwrap().is_empty());
    }

    #[test]
    fn test_stale_temporary_file_is_replaced() {
        let (dir, coordinator) = setup();
        commit(&coordinator, 1, b"foo");
        fs::create_dir_all(dir.path().join("tmp/1")).unwrap();
        fs::write(dir.path().join("tmp/1/data"), b"stale").unwrap();

        let mut ctx = TransactionContext::default();
        save(&coordinator, &mut ctx, 1, Some(b"bar"));
        coordinator.prepare_commit(&mut ctx).unwrap();
        assert_eq!(fs::read(dir.path().join("tmp/1/data")).unwrap(), b"foo");
        coordinator.finalize_rollback(ctx).unwrap();

        assert_eq!(read(&coordinator, 1), Some(Bytes::from_static(b"foo")));
    }
}
