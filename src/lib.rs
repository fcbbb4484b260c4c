//! Houston: git-backed asset stores.
//!
//! A **git store** is a directory holding a local git repository plus a fixed
//! layout (`_uploads/`, `_assets/`, `_derived/`, `_metadata/`, `metadata.json`).
//! Uploaded files land in `_uploads/` under stable stored names; the
//! reconciler turns every whitelisted file into an **asset** record and a
//! symlink `_assets/<asset_id>.<ext>`, then the tree is committed.
//!
//! # Identity
//!
//! - **Filesystem id**: derived from the file's xxHash64 digest.
//! - **Semantic id**: derived from `(store id, filesystem id)`; identical
//!   content inside one store collapses into one asset.
//! - **Recycling**: an asset id survives a rebuild of the catalog through the
//!   basename of the symlink that still points at its file.
//!
//! # Persistence
//!
//! Two SQLite bins under the project database path: `houston.db` (git stores,
//! assets) and `progress.db` (progress records polled by callers).
//!
//! # Examples
//!
//! ```bash
//! houston init
//! houston store create --owner 01J... ./photos/a.jpg ./photos/b.jpg
//! houston store commit 01J... --message "Add survey"
//! houston progress show 01J...
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: configuration, errors, ids, persistence, progress
//! - [`gitstore`]: repository ensuring, upload materialization, reconciliation,
//!   commits and job dispatch

pub mod core;
pub mod gitstore;

use crate::core::catalog::{Catalog, SqliteCatalog};
use crate::core::config::{self, HoustonConfig};
use crate::core::error::HoustonError;
use crate::core::store::StoreKind;
use crate::core::time::command_envelope;
use crate::gitstore::archive::Inspection;
use crate::gitstore::commit::CommitOptions;
use crate::gitstore::dispatch::{Dispatcher, ExecutionStrategy};
use crate::gitstore::upload::UploadSource;
use crate::gitstore::{CreateRequest, GitStoreService};

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(
    name = "houston",
    version = env!("CARGO_PKG_VERSION"),
    about = "Git-backed asset stores"
)]
struct Cli {
    /// Configuration file (defaults to $HOUSTON_CONFIG, then ./houston.toml).
    #[clap(long, global = true)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the databases and the MIME whitelist manifest
    Init,
    /// Git store lifecycle
    Store(StoreCli),
    /// Progress records
    Progress(ProgressCli),
}

#[derive(clap::Args, Debug)]
struct StoreCli {
    #[clap(subcommand)]
    command: StoreCommand,
}

#[derive(Subcommand, Debug)]
enum StoreCommand {
    /// Create a store from local files or a staged upload transaction
    Create {
        #[clap(long)]
        owner: String,
        #[clap(long)]
        submitter: Option<String>,
        #[clap(long)]
        description: Option<String>,
        /// Store kind: 'asset_group' or 'mission_collection'.
        #[clap(long, default_value = "asset_group")]
        kind: String,
        /// Staged upload transaction to materialize instead of local files.
        #[clap(long)]
        transaction: Option<String>,
        /// Restrict the transaction to these original filenames.
        #[clap(long = "file")]
        files: Vec<String>,
        /// Run the commit on the background worker and report its job id.
        #[clap(long)]
        queued: bool,
        paths: Vec<PathBuf>,
    },
    /// Reconcile and commit a store
    Commit {
        id: String,
        #[clap(long, default_value = "Houston commit")]
        message: String,
        /// Skip the git commit regardless of configuration.
        #[clap(long, conflicts_with = "force_commit")]
        no_commit: bool,
        /// Commit even when `uploads_git_commit` is off.
        #[clap(long)]
        force_commit: bool,
    },
    /// Show a store and its assets
    Show { id: String },
    /// Delete a store, its assets and its directory
    Delete { id: String },
}

#[derive(clap::Args, Debug)]
struct ProgressCli {
    #[clap(subcommand)]
    command: ProgressCommand,
}

#[derive(Subcommand, Debug)]
enum ProgressCommand {
    /// Show a progress record
    Show { id: String },
}

fn load_cli_config(path: Option<PathBuf>) -> Result<HoustonConfig, HoustonError> {
    let config = match path {
        Some(path) => config::load_config_file(&path)?,
        None => config::load_config(&std::env::current_dir()?)?,
    };
    Ok(config)
}

fn print_envelope(cmd: &str, extra: serde_json::Value) -> Result<(), HoustonError> {
    println!(
        "{}",
        serde_json::to_string_pretty(&command_envelope(cmd, "ok", extra))?
    );
    Ok(())
}

pub fn run() -> Result<(), HoustonError> {
    let cli = Cli::parse();
    let config = Arc::new(load_cli_config(cli.config)?);
    let catalog: Arc<dyn Catalog> = Arc::new(SqliteCatalog::open(&config.project_database_path)?);

    match cli.command {
        Command::Init => {
            let manifest = config.write_mime_whitelist_manifest()?;
            print_envelope(
                "init",
                serde_json::json!({
                    "project_database_path": config.project_database_path,
                    "mime_whitelist_manifest": manifest,
                }),
            )
        }
        Command::Store(store_cli) => {
            config.validate()?;
            let service = Arc::new(GitStoreService::new(config.clone(), catalog.clone()));
            run_store_command(store_cli.command, service)
        }
        Command::Progress(progress_cli) => match progress_cli.command {
            ProgressCommand::Show { id } => {
                let progress = catalog
                    .get_progress(&id)?
                    .ok_or_else(|| HoustonError::NotFound(format!("progress {}", id)))?;
                print_envelope("progress.show", serde_json::json!({ "progress": progress }))
            }
        },
    }
}

fn run_store_command(
    command: StoreCommand,
    service: Arc<GitStoreService>,
) -> Result<(), HoustonError> {
    match command {
        StoreCommand::Create {
            owner,
            submitter,
            description,
            kind,
            transaction,
            files,
            queued,
            paths,
        } => {
            let kind: StoreKind = kind.parse().map_err(HoustonError::ValidationError)?;
            let source = match transaction {
                Some(id) => UploadSource::Transaction {
                    id,
                    filenames: (!files.is_empty()).then_some(files),
                },
                None if paths.is_empty() => {
                    return Err(HoustonError::ValidationError(
                        "provide local paths or --transaction".to_string(),
                    ));
                }
                None => UploadSource::Files(paths),
            };
            let strategy = if queued {
                ExecutionStrategy::Queued
            } else {
                ExecutionStrategy::Inline
            };
            let dispatcher = Dispatcher::new(service.clone())?;
            let created = service.create_from_upload(
                CreateRequest {
                    kind,
                    owner_id: owner,
                    submitter_id: submitter,
                    description,
                    source,
                },
                &dispatcher,
                strategy,
            )?;
            let job_id = created.job.job_id().to_string();
            let outcome = created.job.wait()?;
            print_envelope(
                "store.create",
                serde_json::json!({
                    "store": outcome.store,
                    "job_id": job_id,
                    "commit": outcome.commit_id,
                    "assets": outcome.report.assets.len(),
                    "original_filenames": created.upload.original_filenames,
                }),
            )
        }
        StoreCommand::Commit {
            id,
            message,
            no_commit,
            force_commit,
        } => {
            let commit = match (no_commit, force_commit) {
                (true, _) => Some(false),
                (_, true) => Some(true),
                _ => None,
            };
            let outcome = service.commit(&id, CommitOptions::new(&message).with_commit(commit))?;
            print_envelope(
                "store.commit",
                serde_json::json!({
                    "store": outcome.store,
                    "commit": outcome.commit_id,
                    "assets": outcome.report.assets.len(),
                    "skipped": outcome.report.skipped_count(),
                    "errors": outcome.report.error_count(),
                    "orphans_deleted": outcome.report.orphans_deleted(),
                    "deferred_archives": outcome
                        .deferred_archives
                        .iter()
                        .map(|a| {
                            let inspection = match &a.inspection {
                                Inspection::Listed { entries, expanded_bytes } => serde_json::json!({
                                    "entries": entries,
                                    "expanded_bytes": expanded_bytes,
                                }),
                                Inspection::Unlisted => serde_json::json!("unlisted"),
                                Inspection::Rejected(reason) => serde_json::json!({ "rejected": reason }),
                            };
                            serde_json::json!({
                                "path": a.path.display().to_string(),
                                "mime_type": a.mime_type,
                                "inspection": inspection,
                            })
                        })
                        .collect::<Vec<_>>(),
                }),
            )
        }
        StoreCommand::Show { id } => {
            let store = service.get_store(&id)?;
            let assets = service.catalog().list_store_assets(&id)?;
            print_envelope(
                "store.show",
                serde_json::json!({ "store": store, "assets": assets }),
            )
        }
        StoreCommand::Delete { id } => {
            let deleted = service.delete_store(&id)?;
            if !deleted {
                return Err(HoustonError::NotFound(format!("git store {}", id)));
            }
            print_envelope("store.delete", serde_json::json!({ "id": id }))
        }
    }
}
