//! Storage coordinator configuration.

use std::path::PathBuf;

/// Name of the rollback staging tree below the base directory.
pub const TEMPORARY_DIR: &str = "tmp";

/// Storage coordinator configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory owning both the committed and the temporary blob trees.
    pub base_dir: PathBuf,
    /// Whether to fsync every blob written during prepare.
    pub sync_writes: bool,
    /// Largest payload accepted, in bytes.
    pub max_blob_size: Option<usize>,
}

impl StorageConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        StorageConfig {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    pub fn with_max_blob_size(mut self, max_blob_size: usize) -> Self {
        self.max_blob_size = Some(max_blob_size);
        self
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            base_dir: PathBuf::from("extstore_data"),
            sync_writes: false,
            max_blob_size: None,
        }
    }
}
