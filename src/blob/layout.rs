//! Mapping from (row, name) to blob file locations.
//!
//! ```text
//! <base>/<row>/<name>        committed blob
//! <base>/tmp/<row>/<name>    previous version held during prepare
//! ```
//!
//! Both trees share the base directory so that moving a file between them
//! never crosses a device boundary.

use std::path::{Component, Path, PathBuf};

use super::config::TEMPORARY_DIR;
use super::error::{BlobError, BlobResult};
use crate::transaction::RowId;

/// Pure path computations for one base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathLayout {
    base_dir: PathBuf,
}

impl PathLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Root of the temporary tree.
    pub fn temporary_root(&self) -> PathBuf {
        self.base_dir.join(TEMPORARY_DIR)
    }

    /// `<base>/<row>/<name>`
    pub fn storage_path(&self, row: RowId, name: &str) -> PathBuf {
        self.base_dir.join(row.to_string()).join(name)
    }

    /// `<base>/tmp/<row>/<name>`
    pub fn temporary_path(&self, row: RowId, name: &str) -> PathBuf {
        self.temporary_root().join(row.to_string()).join(name)
    }
}

/// Checks that `name` is a single, normal path component.
pub fn validate_name(name: &str) -> BlobResult<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == name => Ok(()),
        _ => Err(BlobError::InvalidName(name.to_string())),
    }
}
