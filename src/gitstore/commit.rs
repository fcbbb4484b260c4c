//! Commit pipeline and the `metadata.json` manifest.
//!
//! A commit ensures the repository, stamps the manifest, looks for archives,
//! reconciles `_uploads/` into assets, commits the tree and records the commit
//! on the store, then pushes it to the remote. Reconciliation and the
//! behavior's manifest rewrite only run with `update`. Progress: 1 after
//! ensure, 90 after reconcile, 99 after the git commit, 100 once the behavior
//! hooks ran. Committed git state is never rolled back on a later failure.

use crate::core::config::HoustonConfig;
use crate::core::error::HoustonError;
use crate::core::progress::ProgressReporter;
use crate::core::store::GitStore;
use crate::gitstore::archive::{self, DeferredArchive};
use crate::gitstore::behavior::behavior_for;
use crate::gitstore::ensure::EnsureOutcome;
use crate::gitstore::git;
use crate::gitstore::layout::{COMMITTED_PATHS, StoreLayout};
use crate::gitstore::reconcile::{ReconcileReport, Reconciler, RecyclingMap};
use crate::gitstore::GitStoreService;
use serde_json::{Map, Value};
use std::fs;
use tracing::{info, warn};

pub const MANIFEST_WHITELIST_KEY: &str = "commit_mime_whitelist_guid";
pub const MANIFEST_VERSION_KEY: &str = "commit_houston_api_version";

pub const ENSURED: f64 = 1.0;
pub const COMMITTED: f64 = 99.0;
pub const PREPARED: f64 = 100.0;

#[derive(Debug, Clone)]
pub struct CommitOptions {
    pub message: String,
    /// Scan `_uploads/` for archives before reconciling.
    pub realize: bool,
    /// Reconcile `_uploads/` into assets, and rewrite the manifest through the
    /// store behavior after committing.
    pub update: bool,
    /// Force (`Some(true)`) or suppress (`Some(false)`) the git commit;
    /// `None` follows `uploads_git_commit`.
    pub commit: Option<bool>,
    /// Original filenames of the uploaded files, used as display paths.
    pub input_filenames: Vec<String>,
    pub recycling: RecyclingMap,
}

impl CommitOptions {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            realize: true,
            update: true,
            commit: None,
            input_filenames: Vec::new(),
            recycling: RecyclingMap::default(),
        }
    }

    pub fn with_realize(mut self, realize: bool) -> Self {
        self.realize = realize;
        self
    }

    pub fn with_update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }

    pub fn with_commit(mut self, commit: Option<bool>) -> Self {
        self.commit = commit;
        self
    }

    pub fn with_input_filenames(mut self, filenames: Vec<String>) -> Self {
        self.input_filenames = filenames;
        self
    }

    fn should_commit(&self, config: &HoustonConfig) -> bool {
        self.commit.unwrap_or(config.uploads_git_commit)
    }
}

#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub store: GitStore,
    pub report: ReconcileReport,
    /// New HEAD, when a git commit was made.
    pub commit_id: Option<String>,
    pub deferred_archives: Vec<DeferredArchive>,
}

pub fn read_manifest(layout: &StoreLayout) -> Result<Map<String, Value>, HoustonError> {
    let path = layout.manifest();
    if !path.exists() {
        return Ok(Map::new());
    }
    let content = fs::read_to_string(&path)?;
    if content.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(&content)? {
        Value::Object(map) => Ok(map),
        _ => Err(HoustonError::ValidationError(format!(
            "{} is not a JSON object",
            path.display()
        ))),
    }
}

pub fn write_manifest(layout: &StoreLayout, manifest: &Map<String, Value>) -> Result<(), HoustonError> {
    fs::write(layout.manifest(), serde_json::to_string_pretty(manifest)?)?;
    Ok(())
}

/// Stamp the whitelist id and software version into the manifest and make
/// sure the whitelist manifest exists.
pub fn init_metadata(config: &HoustonConfig, layout: &StoreLayout) -> Result<(), HoustonError> {
    config.write_mime_whitelist_manifest()?;
    let mut manifest = read_manifest(layout)?;
    manifest.insert(
        MANIFEST_WHITELIST_KEY.to_string(),
        Value::String(config.mime_whitelist_id()),
    );
    manifest.insert(
        MANIFEST_VERSION_KEY.to_string(),
        Value::String(config.software_version.clone()),
    );
    write_manifest(layout, &manifest)
}

pub(crate) fn commit(
    service: &GitStoreService,
    store_id: &str,
    options: CommitOptions,
) -> Result<CommitOutcome, HoustonError> {
    let store = service.get_store(store_id)?;
    let progress = service.reporter_for(&store)?;
    match run_commit(service, store, &options, &progress) {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            progress.fail();
            Err(e)
        }
    }
}

fn run_commit(
    service: &GitStoreService,
    mut store: GitStore,
    options: &CommitOptions,
    progress: &ProgressReporter,
) -> Result<CommitOutcome, HoustonError> {
    let config = service.config();

    let ensured = service.ensure_repository(&store.id)?;
    if ensured.outcome == EnsureOutcome::Pulled {
        store = service.get_store(&store.id)?;
    }
    let layout = ensured.layout;
    init_metadata(config, &layout)?;
    progress.set(ENSURED);

    let deferred_archives = if options.realize {
        archive::realize_archives(&layout)?
    } else {
        Vec::new()
    };
    progress.set(ENSURED);

    let report = if options.update {
        Reconciler::new(config, service.catalog(), progress).run(
            &store.id,
            &layout,
            options.recycling.clone(),
            &options.input_filenames,
        )?
    } else {
        ReconcileReport::default()
    };

    let mut commit_id = None;
    if options.should_commit(config) {
        git::add(layout.root(), &COMMITTED_PATHS)?;
        let head = git::commit(layout.root(), &options.message)?;
        info!(store = %store.id, commit = %head, "Committed git store");
        service.update_metadata_from_commit(&mut store, &head)?;
        if let Err(e) = service.remote().push(&store.id, layout.root()) {
            warn!(store = %store.id, error = %e, "Push to remote failed, local commit kept");
        }
        commit_id = Some(head);
        progress.set(COMMITTED);
    }

    let behavior = behavior_for(store.kind);
    if options.update {
        let mut manifest = read_manifest(&layout)?;
        behavior.commit_metadata_hook(&store, &mut manifest);
        write_manifest(&layout, &manifest)?;
    }
    behavior.post_preparation_hook(&mut store);
    service.catalog().update_store(&store)?;
    progress.set(PREPARED);

    Ok(CommitOutcome {
        store,
        report,
        commit_id,
        deferred_archives,
    })
}
