//! extstore - transactional external blob storage

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser as ClapParser, Subcommand};
use extstore::blob::{StorageConfig, StorageCoordinator};
use extstore::transaction::{RowId, TransactionManager};

/// extstore - blobs stored next to a transactional row store
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Blob storage directory
    #[arg(short = 'D', long, default_value = "./extstore_data")]
    base_dir: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Fsync every blob written
    #[arg(long)]
    sync: bool,

    /// Reject blobs larger than this many bytes
    #[arg(long)]
    max_size: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store or clear a blob in one transaction
    Put {
        #[arg(short, long)]
        row: u64,
        #[arg(short, long)]
        name: String,
        /// File whose content becomes the blob
        #[arg(short, long, conflicts_with = "clear")]
        file: Option<PathBuf>,
        /// Remove the blob instead
        #[arg(long)]
        clear: bool,
    },
    /// Print a committed blob
    Get {
        #[arg(short, long)]
        row: u64,
        #[arg(short, long)]
        name: String,
        /// Write the blob here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List files left behind in the temporary tree
    Check,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let mut config = StorageConfig::new(&args.base_dir).with_sync_writes(args.sync);
    if let Some(limit) = args.max_size {
        config = config.with_max_blob_size(limit);
    }
    let coordinator = StorageCoordinator::open(config).context("Failed to open blob storage")?;

    match args.command {
        Command::Put {
            row,
            name,
            file,
            clear,
        } => {
            let payload = match (file, clear) {
                (Some(path), false) => Some(Bytes::from(
                    std::fs::read(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?,
                )),
                (None, true) => None,
                _ => bail!("Pass either --file or --clear"),
            };

            let row = RowId::new(row);
            let handle = coordinator
                .persisted_handle(row, &name)?
                .with_payload(payload);
            let store = TransactionManager::new(coordinator.clone());
            let mut txn = store.begin()?;
            handle.prepare_for_save(txn.context_mut())?;
            txn.put(row, Vec::new())?;
            txn.commit().context("Failed to commit blob")?;
            println!("Stored blob '{}' of row {}", name, row);
        }
        Command::Get { row, name, output } => {
            let bytes = coordinator
                .load_bytes(Some(RowId::new(row)), &name)?
                .with_context(|| format!("Row {} has no blob '{}'", row, name))?;
            match output {
                Some(path) => std::fs::write(&path, &bytes)
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => std::io::stdout().write_all(&bytes)?,
            }
        }
        Command::Check => {
            let leftovers = coordinator.leftover_temporary_files()?;
            if leftovers.is_empty() {
                println!("Temporary tree is clean");
            } else {
                for path in &leftovers {
                    println!("{}", path.display());
                }
                bail!("{} file(s) left in the temporary tree", leftovers.len());
            }
        }
    }

    Ok(())
}
