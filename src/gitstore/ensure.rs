//! Repository ensurer: brings a store directory to a usable state.
//!
//! Idempotent. An existing repository with an `origin` is pulled (failures are
//! logged and swallowed); a missing repository is cloned from the remote when
//! the provider knows the project, otherwise initialized fresh. The directory
//! skeleton and manifest are then created as needed.

use crate::core::config::HoustonConfig;
use crate::core::error::HoustonError;
use crate::gitstore::git;
use crate::gitstore::layout::{self, StoreLayout};
use crate::gitstore::remote::RemoteProvider;
use std::fs;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Ensures slower than this are reported.
pub const ENSURE_LATENCY_WARNING: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// Repository existed and has no remote.
    Existing,
    Pulled,
    /// Repository existed but the pull failed; the local state is used as is.
    PullFailed,
    Cloned,
    Initialized,
}

#[derive(Debug, Clone)]
pub struct EnsuredRepository {
    pub layout: StoreLayout,
    pub outcome: EnsureOutcome,
}

pub fn ensure_repository(
    config: &HoustonConfig,
    remote: &dyn RemoteProvider,
    store_id: &str,
) -> Result<EnsuredRepository, HoustonError> {
    let started = Instant::now();
    let layout = StoreLayout::new(&config.git_store_database_path, store_id);
    let root = layout.root();

    let outcome = if git::is_repository(root) {
        if git::has_remote(root, "origin") {
            match git::pull(root) {
                Ok(()) => EnsureOutcome::Pulled,
                Err(e) => {
                    warn!(store = %store_id, error = %e, "Pull failed, continuing with local state");
                    EnsureOutcome::PullFailed
                }
            }
        } else {
            EnsureOutcome::Existing
        }
    } else {
        let (name, email) = config.git_identity()?;
        let outcome = match remote.get_project(store_id)? {
            Some(project) => {
                info!(store = %store_id, url = %project.ssh_url, "Cloning git store from remote");
                git::clone(&project.ssh_url, root)?;
                info!(store = %store_id, "Clone finished");
                EnsureOutcome::Cloned
            }
            None => {
                debug!(store = %store_id, "Initializing new git store repository");
                git::init(root)?;
                EnsureOutcome::Initialized
            }
        };
        git::configure_identity(root, name, email)?;
        outcome
    };

    ensure_layout(&layout)?;

    let elapsed = started.elapsed();
    if elapsed > ENSURE_LATENCY_WARNING {
        warn!(
            store = %store_id,
            elapsed_ms = elapsed.as_millis() as u64,
            "Ensuring the git store repository was slow"
        );
    }

    Ok(EnsuredRepository { layout, outcome })
}

/// Create the store directories, sentinels and manifest; migrate legacy
/// derived content.
pub fn ensure_layout(layout: &StoreLayout) -> Result<(), HoustonError> {
    for dir in [
        layout.uploads(),
        layout.assets(),
        layout.derived(),
        layout.metadata(),
    ] {
        layout::ensure_dir_with_sentinel(&dir)?;
    }

    migrate_legacy_derived(layout)?;

    let manifest = layout.manifest();
    if !manifest.exists() {
        fs::write(&manifest, b"{}")?;
    }
    Ok(())
}

/// Move `_assets/derived/*` into `_derived/` and remove the old directory.
/// Entries already present in `_derived/` win.
fn migrate_legacy_derived(layout: &StoreLayout) -> Result<(), HoustonError> {
    let legacy = layout.legacy_derived();
    let is_real_dir = fs::symlink_metadata(&legacy)
        .map(|meta| meta.is_dir())
        .unwrap_or(false);
    if !is_real_dir {
        return Ok(());
    }

    let derived = layout.derived();
    let mut moved = 0usize;
    for entry in fs::read_dir(&legacy)? {
        let entry = entry?;
        let destination = derived.join(entry.file_name());
        if destination.exists() {
            continue;
        }
        fs::rename(entry.path(), &destination)?;
        moved += 1;
    }
    fs::remove_dir_all(&legacy)?;
    info!(moved, root = %layout.root().display(), "Migrated legacy derived directory");
    Ok(())
}
