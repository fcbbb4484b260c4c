//! Shared fixtures for the git store integration tests.
#![allow(dead_code)]

use houston::core::asset::Asset;
use houston::core::catalog::{AssetWriter, Catalog, SqliteCatalog};
use houston::core::config::HoustonConfig;
use houston::core::error::HoustonError;
use houston::core::ids;
use houston::core::progress::{Progress, ProgressObserver};
use houston::core::store::{GitStore, StoreKind};
use houston::gitstore::GitStoreService;
use houston::gitstore::remote::RemoteProvider;
use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub struct Harness {
    pub tmp: TempDir,
    pub config: Arc<HoustonConfig>,
    pub catalog: Arc<dyn Catalog>,
    pub service: Arc<GitStoreService>,
    pub progress: Arc<Mutex<Vec<Progress>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(|_| {}, None, None)
    }

    pub fn with_config(tweak: impl FnOnce(&mut HoustonConfig)) -> Self {
        Self::build(tweak, None, None)
    }

    pub fn with_remote(remote: Arc<dyn RemoteProvider>) -> Self {
        Self::build(|_| {}, None, Some(remote))
    }

    pub fn build(
        tweak: impl FnOnce(&mut HoustonConfig),
        catalog: Option<Arc<dyn Catalog>>,
        remote: Option<Arc<dyn RemoteProvider>>,
    ) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = HoustonConfig::rooted_at(tmp.path());
        config.fingerprint_workers = 2;
        tweak(&mut config);
        let config = Arc::new(config);
        let catalog = catalog.unwrap_or_else(|| {
            Arc::new(SqliteCatalog::open(&config.project_database_path).unwrap())
        });
        Self::assemble(tmp, config, catalog, remote)
    }

    /// Same directories and databases, different catalog implementation.
    pub fn rebuild_with_catalog(&self, catalog: Arc<dyn Catalog>) -> Arc<GitStoreService> {
        let (service, _) = service_for(self.config.clone(), catalog, None, self.progress.clone());
        service
    }

    fn assemble(
        tmp: TempDir,
        config: Arc<HoustonConfig>,
        catalog: Arc<dyn Catalog>,
        remote: Option<Arc<dyn RemoteProvider>>,
    ) -> Self {
        let progress = Arc::new(Mutex::new(Vec::new()));
        let (service, progress) = service_for(config.clone(), catalog.clone(), remote, progress);
        Self {
            tmp,
            config,
            catalog,
            service,
            progress,
        }
    }

    pub fn root(&self) -> &Path {
        self.tmp.path()
    }

    /// Insert a store row and ensure its repository.
    pub fn create_store(&self, kind: StoreKind) -> GitStore {
        let store = GitStore::new(ids::new_id(), kind, "owner-1");
        self.catalog.insert_store(&store).unwrap();
        self.service.ensure_repository(&store.id).unwrap();
        store
    }

    /// Write a local file and copy it into the store's uploads. Returns the stored name.
    pub fn upload(&self, store_id: &str, name: &str, content: &[u8]) -> String {
        let source_dir = self.root().join("incoming").join(store_id);
        fs::create_dir_all(&source_dir).unwrap();
        let path = source_dir.join(name);
        fs::write(&path, content).unwrap();
        self.service.copy_file_add(store_id, &path).unwrap()
    }

    pub fn link_names(&self, store_id: &str) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.service.layout(store_id).assets())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| !n.starts_with('.'))
            .collect();
        names.sort();
        names
    }

    pub fn trajectory(&self) -> Vec<f64> {
        self.progress
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.percentage)
            .collect()
    }

    pub fn last_progress(&self) -> Option<Progress> {
        self.progress.lock().unwrap().last().cloned()
    }

    pub fn clear_progress(&self) {
        self.progress.lock().unwrap().clear();
    }
}

fn service_for(
    config: Arc<HoustonConfig>,
    catalog: Arc<dyn Catalog>,
    remote: Option<Arc<dyn RemoteProvider>>,
    progress: Arc<Mutex<Vec<Progress>>>,
) -> (Arc<GitStoreService>, Arc<Mutex<Vec<Progress>>>) {
    let sink = progress.clone();
    let observer: ProgressObserver = Arc::new(move |p: &Progress| {
        sink.lock().unwrap().push(p.clone());
    });
    let mut service = GitStoreService::new(config, catalog).with_progress_observer(observer);
    if let Some(remote) = remote {
        service = service.with_remote(remote);
    }
    (Arc::new(service), progress)
}

/// Minimal JPEG-looking content; `seed` makes it unique.
pub fn jpeg(seed: &str) -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];
    bytes.extend_from_slice(seed.as_bytes());
    bytes
}

pub fn png(seed: &str) -> Vec<u8> {
    let mut bytes = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR".to_vec();
    bytes.extend_from_slice(seed.as_bytes());
    bytes
}

pub fn assert_monotonic(trajectory: &[f64]) {
    for pair in trajectory.windows(2) {
        assert!(pair[0] <= pair[1], "progress went backwards: {:?}", trajectory);
    }
}

pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=Remote", "-c", "user.email=remote@localhost"])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A repository at `<remotes>/<id>` with one commit holding `_uploads/<name>`.
pub fn seed_remote(remotes: &Path, id: &str, name: &str, content: &[u8]) -> PathBuf {
    let repo = remotes.join(id);
    fs::create_dir_all(repo.join("_uploads")).unwrap();
    fs::write(repo.join("_uploads").join(name), content).unwrap();
    git(&repo, &["init", "--quiet"]);
    git(&repo, &["add", "--all"]);
    git(&repo, &["commit", "--quiet", "-m", "seed"]);
    repo
}

/// Catalog whose bulk writer fails on the `fail_on`-th insert of a pass.
pub struct FlakyCatalog {
    pub inner: SqliteCatalog,
    pub fail_on: usize,
}

struct FlakyWriter<'a> {
    inner: &'a dyn AssetWriter,
    inserts: Cell<usize>,
    fail_on: usize,
}

impl AssetWriter for FlakyWriter<'_> {
    fn store_exists(&self, store_id: &str) -> Result<bool, HoustonError> {
        self.inner.store_exists(store_id)
    }

    fn find_by_id(&self, id: &str) -> Result<Option<Asset>, HoustonError> {
        self.inner.find_by_id(id)
    }

    fn find_by_semantic_id(&self, semantic_id: &str) -> Result<Option<Asset>, HoustonError> {
        self.inner.find_by_semantic_id(semantic_id)
    }

    fn insert_asset(&self, asset: &Asset) -> Result<(), HoustonError> {
        let n = self.inserts.get() + 1;
        self.inserts.set(n);
        if n == self.fail_on {
            return Err(HoustonError::ValidationError("injected insert failure".to_string()));
        }
        self.inner.insert_asset(asset)
    }

    fn update_asset(&self, asset: &Asset) -> Result<(), HoustonError> {
        self.inner.update_asset(asset)
    }
}

impl Catalog for FlakyCatalog {
    fn insert_store(&self, store: &GitStore) -> Result<(), HoustonError> {
        self.inner.insert_store(store)
    }

    fn get_store(&self, id: &str) -> Result<Option<GitStore>, HoustonError> {
        self.inner.get_store(id)
    }

    fn update_store(&self, store: &GitStore) -> Result<(), HoustonError> {
        self.inner.update_store(store)
    }

    fn delete_store(&self, id: &str) -> Result<(), HoustonError> {
        self.inner.delete_store(id)
    }

    fn list_stores(&self) -> Result<Vec<GitStore>, HoustonError> {
        self.inner.list_stores()
    }

    fn get_asset(&self, id: &str) -> Result<Option<Asset>, HoustonError> {
        self.inner.get_asset(id)
    }

    fn list_store_assets(&self, store_id: &str) -> Result<Vec<Asset>, HoustonError> {
        self.inner.list_store_assets(store_id)
    }

    fn delete_asset(&self, id: &str) -> Result<(), HoustonError> {
        self.inner.delete_asset(id)
    }

    fn write_assets(
        &self,
        f: &mut dyn FnMut(&dyn AssetWriter) -> Result<(), HoustonError>,
    ) -> Result<(), HoustonError> {
        let fail_on = self.fail_on;
        self.inner.write_assets(&mut |writer: &dyn AssetWriter| {
            let flaky = FlakyWriter {
                inner: writer,
                inserts: Cell::new(0),
                fail_on,
            };
            f(&flaky)
        })
    }

    fn insert_progress(&self, progress: &Progress) -> Result<(), HoustonError> {
        self.inner.insert_progress(progress)
    }

    fn get_progress(&self, id: &str) -> Result<Option<Progress>, HoustonError> {
        self.inner.get_progress(id)
    }

    fn update_progress(&self, progress: &Progress) -> Result<(), HoustonError> {
        self.inner.update_progress(progress)
    }

    fn delete_progress(&self, id: &str) -> Result<(), HoustonError> {
        self.inner.delete_progress(id)
    }
}
