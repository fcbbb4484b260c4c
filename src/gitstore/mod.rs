//! Git-backed asset stores.
//!
//! [`GitStoreService`] owns the collaborators a store preparation needs
//! (configuration, catalog, remote provider, upload staging) and exposes the
//! store lifecycle: creation from an upload, repository ensuring, commits that
//! reconcile `_uploads/` into assets, and deletion.

pub mod archive;
pub mod behavior;
pub mod commit;
pub mod dispatch;
pub mod ensure;
pub mod fingerprint;
pub mod git;
pub mod layout;
pub mod reconcile;
pub mod remote;
pub mod sniff;
pub mod upload;

use crate::core::asset::Asset;
use crate::core::catalog::Catalog;
use crate::core::config::HoustonConfig;
use crate::core::error::HoustonError;
use crate::core::ids;
use crate::core::progress::{ProgressObserver, ProgressReporter};
use crate::core::store::{GitStore, MajorType, StoreKind};
use crate::core::time::now_epoch_z;
use crate::gitstore::commit::{CommitOptions, CommitOutcome};
use crate::gitstore::dispatch::{CommitJob, Dispatcher, ExecutionStrategy, JobHandle};
use crate::gitstore::ensure::{EnsureOutcome, EnsuredRepository};
use crate::gitstore::layout::StoreLayout;
use crate::gitstore::reconcile::{ReconcileReport, Reconciler, RecyclingMap};
use crate::gitstore::remote::{NoRemote, Project, RemoteProvider};
use crate::gitstore::upload::{DirStaging, MaterializedUpload, UploadSource, UploadStaging};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Input for [`GitStoreService::create_from_upload`].
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub kind: StoreKind,
    pub owner_id: String,
    pub submitter_id: Option<String>,
    pub description: Option<String>,
    pub source: UploadSource,
}

#[derive(Debug)]
pub struct CreatedStore {
    pub store: GitStore,
    pub upload: MaterializedUpload,
    /// Commit job; already finished for the inline strategy.
    pub job: JobHandle,
}

pub struct GitStoreService {
    config: Arc<HoustonConfig>,
    catalog: Arc<dyn Catalog>,
    remote: Arc<dyn RemoteProvider>,
    staging: Arc<dyn UploadStaging>,
    observer: Option<ProgressObserver>,
}

impl GitStoreService {
    pub fn new(config: Arc<HoustonConfig>, catalog: Arc<dyn Catalog>) -> Self {
        let staging = Arc::new(DirStaging::new(config.upload_staging_path.clone()));
        Self {
            config,
            catalog,
            remote: Arc::new(NoRemote),
            staging,
            observer: None,
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteProvider>) -> Self {
        self.remote = remote;
        self
    }

    pub fn with_staging(mut self, staging: Arc<dyn UploadStaging>) -> Self {
        self.staging = staging;
        self
    }

    /// Observe every progress change made by this service.
    pub fn with_progress_observer(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &HoustonConfig {
        &self.config
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    pub fn remote(&self) -> &dyn RemoteProvider {
        self.remote.as_ref()
    }

    pub fn layout(&self, store_id: &str) -> StoreLayout {
        StoreLayout::new(&self.config.git_store_database_path, store_id)
    }

    pub fn get_store(&self, store_id: &str) -> Result<GitStore, HoustonError> {
        self.catalog
            .get_store(store_id)?
            .ok_or_else(|| HoustonError::NotFound(format!("git store {}", store_id)))
    }

    /// Ensure the store's repository. After a successful pull the store row,
    /// when there is one, adopts the pulled HEAD.
    pub fn ensure_repository(&self, store_id: &str) -> Result<EnsuredRepository, HoustonError> {
        let ensured = ensure::ensure_repository(&self.config, self.remote.as_ref(), store_id)?;
        if ensured.outcome == EnsureOutcome::Pulled
            && let Some(mut store) = self.catalog.get_store(store_id)?
        {
            self.update_metadata_from_repo(&mut store)?;
        }
        Ok(ensured)
    }

    /// Return the store, creating it from the remote when only the remote
    /// knows it. `None` when neither side has it.
    pub fn ensure_store(
        &self,
        store_id: &str,
        owner_id: &str,
    ) -> Result<Option<GitStore>, HoustonError> {
        if self.catalog.store_exists(store_id)? {
            self.ensure_repository(store_id)?;
            return self.catalog.get_store(store_id);
        }
        let Some(project) = self.remote.get_project(store_id)? else {
            return Ok(None);
        };

        let mut store = GitStore::new(store_id.to_string(), StoreKind::AssetGroup, owner_id);
        self.catalog.insert_store(&store)?;
        let ensured = self.ensure_repository(store_id)?;
        self.update_metadata_from_project(&mut store, &project)?;
        self.update_metadata_from_repo(&mut store)?;
        if ensured.outcome == EnsureOutcome::Cloned {
            let report = self.reconcile(store_id, RecyclingMap::default(), &[])?;
            info!(store = %store_id, assets = report.assets.len(), "Git store restored from remote");
        }
        Ok(Some(store))
    }

    /// Create a store, receive its files and prepare it according to `strategy`.
    /// A store whose upload cannot be materialized is deleted again.
    pub fn create_from_upload(
        &self,
        request: CreateRequest,
        dispatcher: &Dispatcher,
        strategy: ExecutionStrategy,
    ) -> Result<CreatedStore, HoustonError> {
        self.config.git_identity()?;

        let mut store = GitStore::new(ids::new_id(), request.kind, &request.owner_id);
        store.submitter_id = request.submitter_id;
        store.description = request.description;
        store.major_type = MajorType::Filesystem;
        self.catalog.insert_store(&store)?;

        let upload = match self.materialize_upload(&store.id, &request.source) {
            Ok(upload) => upload,
            Err(e) => {
                if let Err(cleanup) = self.delete_store(&store.id) {
                    warn!(store = %store.id, error = %cleanup, "Failed to delete half-created store");
                }
                return Err(e);
            }
        };

        let job_id = ids::new_id();
        if strategy == ExecutionStrategy::Queued {
            let reporter = self.init_progress_preparation(&mut store, true)?;
            reporter.set_job_id(&job_id);
        }
        let job = dispatcher.dispatch(
            CommitJob {
                job_id,
                store_id: store.id.clone(),
                message: "Initial commit via create_from_upload".to_string(),
                input_filenames: upload.original_filenames.clone(),
            },
            strategy,
        )?;
        Ok(CreatedStore { store, upload, job })
    }

    fn materialize_upload(
        &self,
        store_id: &str,
        source: &UploadSource,
    ) -> Result<MaterializedUpload, HoustonError> {
        let ensured = self.ensure_repository(store_id)?;
        upload::materialize(
            &ensured.layout,
            self.staging.as_ref(),
            source,
            self.config.purge_upload_transactions,
        )
    }

    /// Attach a fresh progress record to `store`. An existing record is kept
    /// unless `overwrite` is set.
    pub fn init_progress_preparation(
        &self,
        store: &mut GitStore,
        overwrite: bool,
    ) -> Result<ProgressReporter, HoustonError> {
        if let Some(existing) = store.progress_id.as_deref()
            && !overwrite
            && let Some(reporter) = ProgressReporter::load(self.catalog.clone(), existing)?
        {
            warn!(store = %store.id, progress = %existing, "Git store already has a progress record");
            return Ok(reporter.with_observer(self.observer.clone()));
        }
        let reporter = ProgressReporter::create(
            self.catalog.clone(),
            &format!("Preparing git store {}", store.id),
        )?
        .with_observer(self.observer.clone());
        store.progress_id = Some(reporter.id());
        store.updated_at = now_epoch_z();
        self.catalog.update_store(store)?;
        Ok(reporter)
    }

    /// Reporter for the store's attached record, if any.
    fn progress_reporter(&self, store: &GitStore) -> Result<Option<ProgressReporter>, HoustonError> {
        let Some(id) = store.progress_id.as_deref() else {
            return Ok(None);
        };
        Ok(ProgressReporter::load(self.catalog.clone(), id)?
            .map(|r| r.with_observer(self.observer.clone())))
    }

    /// The store's attached reporter, or a detached one.
    pub(crate) fn reporter_for(&self, store: &GitStore) -> Result<ProgressReporter, HoustonError> {
        Ok(match self.progress_reporter(store)? {
            Some(reporter) => reporter,
            None => ProgressReporter::detached(&format!("Preparing git store {}", store.id))
                .with_observer(self.observer.clone()),
        })
    }

    /// Reconcile a store's uploads without committing.
    pub fn reconcile(
        &self,
        store_id: &str,
        recycling: RecyclingMap,
        hints: &[String],
    ) -> Result<ReconcileReport, HoustonError> {
        let store = self.get_store(store_id)?;
        let progress = self.reporter_for(&store)?;
        let ensured = match self.ensure_repository(store_id) {
            Ok(ensured) => ensured,
            Err(e) => {
                progress.fail();
                return Err(e);
            }
        };
        Reconciler::new(&self.config, self.catalog.as_ref(), &progress).run(
            store_id,
            &ensured.layout,
            recycling,
            hints,
        )
    }

    pub fn commit(&self, store_id: &str, options: CommitOptions) -> Result<CommitOutcome, HoustonError> {
        commit::commit(self, store_id, options)
    }

    pub fn copy_file_add(&self, store_id: &str, path: &Path) -> Result<String, HoustonError> {
        let ensured = self.ensure_repository(store_id)?;
        let (stored, _) = upload::copy_file_add(&ensured.layout, path)?;
        Ok(stored)
    }

    pub fn copy_path(&self, store_id: &str, source_dir: &Path) -> Result<usize, HoustonError> {
        let ensured = self.ensure_repository(store_id)?;
        upload::copy_path(&ensured.layout, source_dir)
    }

    /// Delete the store row (and its assets), its progress record and its
    /// directory. Returns false when the store did not exist.
    pub fn delete_store(&self, store_id: &str) -> Result<bool, HoustonError> {
        let store = self.catalog.get_store(store_id)?;
        if let Some(store) = &store {
            self.catalog.delete_store(store_id)?;
            if let Some(progress_id) = store.progress_id.as_deref() {
                self.catalog.delete_progress(progress_id)?;
            }
        }
        let root = self.layout(store_id).root().to_path_buf();
        if root.exists() {
            fs::remove_dir_all(&root)?;
        }
        if store.is_some() {
            info!(store = %store_id, "Deleted git store");
            if let Err(e) = self.remote.delete_project(store_id) {
                warn!(store = %store_id, error = %e, "Failed to delete remote project");
            }
        }
        Ok(store.is_some())
    }

    /// Delete a store that holds no assets. Returns whether the store remains.
    pub fn justify_existence(&self, store_id: &str) -> Result<bool, HoustonError> {
        if self.catalog.list_store_assets(store_id)?.is_empty() {
            info!(store = %store_id, "Deleting git store without assets");
            self.delete_store(store_id)?;
            return Ok(false);
        }
        Ok(true)
    }

    pub fn get_asset_for_file(
        &self,
        store_id: &str,
        filename: &str,
    ) -> Result<Option<Asset>, HoustonError> {
        Ok(self
            .catalog
            .list_store_assets(store_id)?
            .into_iter()
            .find(|asset| asset.path == filename))
    }

    /// Adopt the description and a `type:<major type>` tag from the remote
    /// project. Both parts of the tag are case-insensitive; an unknown type
    /// becomes `unknown`.
    pub fn update_metadata_from_project(
        &self,
        store: &mut GitStore,
        project: &Project,
    ) -> Result<(), HoustonError> {
        for tag in &project.tag_list {
            let Some((key, value)) = tag.split_once(':') else {
                continue;
            };
            if key.trim().eq_ignore_ascii_case("type") {
                store.major_type = value.parse::<MajorType>().unwrap_or_else(|e| {
                    warn!(store = %store.id, tag = %tag, error = %e, "Unknown major type tag");
                    MajorType::Unknown
                });
            }
        }
        if project.description.is_some() {
            store.description = project.description.clone();
        }
        store.updated_at = now_epoch_z();
        self.catalog.update_store(store)
    }

    /// Adopt the repository HEAD when it differs from the recorded commit.
    pub fn update_metadata_from_repo(&self, store: &mut GitStore) -> Result<(), HoustonError> {
        let layout = self.layout(&store.id);
        match git::head(layout.root()) {
            Some(head) if store.commit.as_deref() != Some(head.as_str()) => {
                self.update_metadata_from_commit(store, &head)
            }
            _ => Ok(()),
        }
    }

    /// Record `commit_id` and the manifest's commit metadata on the store.
    pub fn update_metadata_from_commit(
        &self,
        store: &mut GitStore,
        commit_id: &str,
    ) -> Result<(), HoustonError> {
        let manifest = commit::read_manifest(&self.layout(&store.id))?;
        store.commit = Some(commit_id.to_string());
        store.commit_mime_whitelist_id = manifest
            .get(commit::MANIFEST_WHITELIST_KEY)
            .and_then(|v| v.as_str())
            .map(str::to_string);
        store.commit_houston_api_version = manifest
            .get(commit::MANIFEST_VERSION_KEY)
            .and_then(|v| v.as_str())
            .map(str::to_string);
        store.updated_at = now_epoch_z();
        self.catalog.update_store(store)
    }
}
