//! Asset symlink reconciler.
//!
//! Brings the catalog and `_assets/` in line with the files present in a
//! store's `_uploads/`. Progress checkpoints:
//!
//! | stage                               | progress  |
//! |-------------------------------------|-----------|
//! | walk and classify `_uploads/`       | 0 -> 10   |
//! | fingerprint                         | 10 -> 19  |
//! | clear stale links, build recycling  | 19 -> 20  |
//! | catalog upsert (one transaction)    | 20 -> 80  |
//! | symlinks and reload                 | 80 -> 89  |
//! | orphan cleanup                      | 89 -> 90  |
//!
//! Asset ids survive a rebuild through the symlink basenames: a link
//! `_assets/<id>.<ext>` that still resolves to a file hands `<id>` to whatever
//! new asset is created for that file.

use crate::core::asset::Asset;
use crate::core::catalog::{AssetWriter, Catalog};
use crate::core::config::HoustonConfig;
use crate::core::error::HoustonError;
use crate::core::ids;
use crate::core::progress::ProgressReporter;
use crate::core::time::now_epoch_z;
use crate::gitstore::fingerprint::{self, FingerprintOutcome};
use crate::gitstore::layout::{self, StoreLayout};
use crate::gitstore::sniff;
use crate::gitstore::upload::stored_filename;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const WALKED: f64 = 10.0;
pub const FINGERPRINTED: f64 = 19.0;
pub const LINKS_CLEARED: f64 = 20.0;
pub const CATALOG_DONE: f64 = 80.0;
pub const LINKS_CREATED: f64 = 89.0;
pub const RECONCILED: f64 = 90.0;

/// Resolved upload path -> asset id to reuse for a file at that path.
pub type RecyclingMap = FxHashMap<PathBuf, String>;

/// Fingerprints `paths` for a store with the given worker count, in input order.
pub type Fingerprinter =
    fn(&[PathBuf], &str, usize) -> Result<Vec<FingerprintOutcome>, HoustonError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Hidden,
    Symlink,
    NotWhitelisted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Reconciled { path: PathBuf, asset_id: String },
    Skipped { path: PathBuf, reason: SkipReason },
    Unreadable { path: PathBuf, error: String },
    FingerprintFailed { path: PathBuf, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrphanOutcome {
    Deleted(String),
    Failed { asset_id: String, error: String },
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub outcomes: Vec<FileOutcome>,
    /// Skipped files per lowercased extension (`""` for none).
    pub skipped_extensions: BTreeMap<String, usize>,
    /// Asset id per reconciled file, in discovery order. Files with identical
    /// content repeat the same id.
    pub touched: Vec<String>,
    /// Reconciled assets as reloaded from the catalog, one per id.
    pub assets: Vec<Asset>,
    pub stale_links_removed: usize,
    pub recycled: usize,
    pub orphans: Vec<OrphanOutcome>,
}

impl ReconcileReport {
    pub fn reconciled_count(&self) -> usize {
        self.touched.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, FileOutcome::Skipped { .. }))
            .count()
    }

    pub fn error_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| {
                matches!(
                    o,
                    FileOutcome::Unreadable { .. } | FileOutcome::FingerprintFailed { .. }
                )
            })
            .count()
    }

    pub fn orphans_deleted(&self) -> Vec<&str> {
        self.orphans
            .iter()
            .filter_map(|o| match o {
                OrphanOutcome::Deleted(id) => Some(id.as_str()),
                OrphanOutcome::Failed { .. } => None,
            })
            .collect()
    }

    fn skip(&mut self, path: &Path, reason: SkipReason) {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        *self.skipped_extensions.entry(ext).or_insert(0) += 1;
        self.outcomes.push(FileOutcome::Skipped {
            path: path.to_path_buf(),
            reason,
        });
    }
}

/// A whitelisted file found in `_uploads/`.
#[derive(Debug, Clone)]
struct WalkedFile {
    path: PathBuf,
    stored_path: String,
    display_path: String,
    mime_type: String,
    signature: String,
    size_bytes: u64,
}

/// State that outlives a failed pass so cleanup can still run.
#[derive(Default)]
struct PassState {
    historical: Option<Vec<Asset>>,
    touched: Vec<String>,
}

pub struct Reconciler<'a> {
    config: &'a HoustonConfig,
    catalog: &'a dyn Catalog,
    progress: &'a ProgressReporter,
    fingerprinter: Fingerprinter,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        config: &'a HoustonConfig,
        catalog: &'a dyn Catalog,
        progress: &'a ProgressReporter,
    ) -> Self {
        Self {
            config,
            catalog,
            progress,
            fingerprinter: fingerprint::fingerprint_files,
        }
    }

    pub fn with_fingerprinter(mut self, fingerprinter: Fingerprinter) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    /// Reconcile one ensured store. `recycling` entries supplied by the caller
    /// win over ids recovered from stale links; `hints` are original filenames
    /// used as display paths.
    ///
    /// On error the progress record is marked failed and the error returned.
    pub fn run(
        &self,
        store_id: &str,
        layout: &StoreLayout,
        recycling: RecyclingMap,
        hints: &[String],
    ) -> Result<ReconcileReport, HoustonError> {
        let mut state = PassState::default();
        match self.run_pass(store_id, layout, recycling, hints, &mut state) {
            Ok(report) => Ok(report),
            Err(e) => {
                self.progress.fail();
                warn!(store = %store_id, error = %e, "Reconciliation failed");
                if matches!(e, HoustonError::StoreVanished(_)) {
                    return Err(e);
                }
                if let Some(historical) = state.historical.as_deref() {
                    let outcomes = self.clean_orphans_after_failure(layout, historical, &state.touched);
                    debug!(store = %store_id, attempted = outcomes.len(), "Post-failure orphan cleanup");
                }
                Err(e)
            }
        }
    }

    fn run_pass(
        &self,
        store_id: &str,
        layout: &StoreLayout,
        recycling: RecyclingMap,
        hints: &[String],
        state: &mut PassState,
    ) -> Result<ReconcileReport, HoustonError> {
        let mut report = ReconcileReport::default();

        let walked = self.walk(layout, hints, &mut report)?;
        info!(
            store = %store_id,
            files = walked.len(),
            skipped = report.skipped_count(),
            errors = report.error_count(),
            skipped_extensions = ?report.skipped_extensions,
            "Walked uploads"
        );
        self.progress.set(WALKED);

        info!(store = %store_id, files = walked.len(), workers = self.config.fingerprint_workers, "Fingerprinting uploads");
        let paths: Vec<PathBuf> = walked.iter().map(|f| f.path.clone()).collect();
        let fingerprints = (self.fingerprinter)(&paths, store_id, self.config.fingerprint_workers)?;
        let mut hashed = Vec::with_capacity(walked.len());
        for (file, outcome) in walked.into_iter().zip(fingerprints) {
            match outcome {
                FingerprintOutcome::Hashed(fp) => hashed.push((file, fp)),
                FingerprintOutcome::Failed { path, error } => {
                    warn!(path = %path.display(), error = %error, "Fingerprint failed, skipping file");
                    report
                        .outcomes
                        .push(FileOutcome::FingerprintFailed { path, error });
                }
            }
        }
        self.progress.set(FINGERPRINTED);

        let mut recycling: RecyclingMap = recycling
            .into_iter()
            .map(|(path, id)| (layout::normalize(&path), id))
            .collect();
        report.stale_links_removed = clear_stale_links(layout, &mut recycling)?;
        self.progress.set(LINKS_CLEARED);

        state.historical = Some(self.catalog.list_store_assets(store_id)?);

        let total = hashed.len();
        let now = now_epoch_z();
        let progress = self.progress;
        let touched = &mut state.touched;
        let mut claimed: FxHashSet<String> = FxHashSet::default();
        let mut recycled = 0usize;
        self.catalog.write_assets(&mut |writer: &dyn AssetWriter| {
            if !writer.store_exists(store_id)? {
                return Err(HoustonError::StoreVanished(store_id.to_string()));
            }
            for (index, (file, fp)) in hashed.iter().enumerate() {
                let observed = Asset {
                    id: String::new(),
                    git_store_id: store_id.to_string(),
                    path: file.display_path.clone(),
                    stored_path: file.stored_path.clone(),
                    mime_type: file.mime_type.clone(),
                    magic_signature: file.signature.clone(),
                    size_bytes: file.size_bytes,
                    filesystem_xxhash64: fp.xxhash64.clone(),
                    filesystem_id: fp.filesystem_id.clone(),
                    semantic_id: fp.semantic_id.clone(),
                    created_at: now.clone(),
                    updated_at: now.clone(),
                };
                let id = match writer.find_by_semantic_id(&fp.semantic_id)? {
                    Some(mut existing) => {
                        existing.apply_update(&observed);
                        writer.update_asset(&existing)?;
                        existing.id
                    }
                    None => {
                        let mut recycled_id = None;
                        if let Some(id) = recycling.get(&layout::normalize(&file.path))
                            && !claimed.contains(id)
                            && writer.find_by_id(id)?.is_none()
                        {
                            recycled_id = Some(id.clone());
                        }
                        if recycled_id.is_some() {
                            recycled += 1;
                        }
                        let asset = Asset {
                            id: recycled_id.unwrap_or_else(ids::new_id),
                            ..observed
                        };
                        writer.insert_asset(&asset)?;
                        asset.id
                    }
                };
                claimed.insert(id.clone());
                touched.push(id);
                progress.set(LINKS_CLEARED + (CATALOG_DONE - LINKS_CLEARED) * (index + 1) as f64 / total as f64);
            }
            Ok(())
        })?;
        report.recycled = recycled;
        self.progress.set(CATALOG_DONE);

        let mut seen = FxHashSet::default();
        for (file_index, id) in state.touched.iter().enumerate() {
            report.outcomes.push(FileOutcome::Reconciled {
                path: hashed[file_index].0.path.clone(),
                asset_id: id.clone(),
            });
            if !seen.insert(id.clone()) {
                continue;
            }
            match self.catalog.get_asset(id)? {
                Some(asset) => {
                    create_link(layout, &asset, self.config)?;
                    report.assets.push(asset);
                }
                None => warn!(asset = %id, "Asset disappeared before its link was created"),
            }
        }
        report.touched = state.touched.clone();
        self.progress.set(LINKS_CREATED);

        let reconciled_paths: FxHashSet<&str> =
            hashed.iter().map(|(file, _)| file.stored_path.as_str()).collect();
        let unreached = unreached_paths(layout, &report);
        let historical = state.historical.as_deref().unwrap_or_default();
        let orphans: Vec<&Asset> = historical
            .iter()
            .filter(|a| !seen.contains(&a.id))
            .filter(|a| is_orphan(layout, a, &reconciled_paths, &unreached))
            .collect();
        info!(store = %store_id, orphans = orphans.len(), "Deleting orphaned assets");
        report.orphans = self.delete_orphans(orphans);
        self.progress.set(RECONCILED);

        Ok(report)
    }

    fn walk(
        &self,
        layout: &StoreLayout,
        hints: &[String],
        report: &mut ReconcileReport,
    ) -> Result<Vec<WalkedFile>, HoustonError> {
        let whitelist = self.config.mime_type_whitelist();
        let hint_by_stored: FxHashMap<String, &str> = hints
            .iter()
            .map(|h| (stored_filename(h), h.as_str()))
            .collect();

        let mut walked = Vec::new();
        for entry in WalkDir::new(layout.uploads()).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => return Err(e.into()),
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                    report.outcomes.push(FileOutcome::Unreadable {
                        path,
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }
            let path = entry.path();
            if file_type.is_symlink() {
                report.skip(path, SkipReason::Symlink);
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == layout::SENTINEL_FILE {
                continue;
            }
            if layout::is_hidden(&name) {
                report.skip(path, SkipReason::Hidden);
                continue;
            }

            let classified = entry
                .metadata()
                .map_err(|e| e.to_string())
                .and_then(|meta| {
                    sniff::sniff_file(path)
                        .map(|sniffed| (meta.len(), sniffed))
                        .map_err(|e| e.to_string())
                });
            let (size_bytes, sniffed) = match classified {
                Ok(found) => found,
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "Unreadable upload, skipping");
                    report.outcomes.push(FileOutcome::Unreadable {
                        path: path.to_path_buf(),
                        error,
                    });
                    continue;
                }
            };
            if !whitelist.contains(&sniffed.mime_type) {
                report.skip(path, SkipReason::NotWhitelisted(sniffed.mime_type));
                continue;
            }

            let display_path = hint_by_stored
                .get(&name)
                .map(|h| h.to_string())
                .unwrap_or_else(|| name.clone());
            walked.push(WalkedFile {
                path: path.to_path_buf(),
                stored_path: layout.stored_path_of(path)?,
                display_path,
                mime_type: sniffed.mime_type,
                signature: sniffed.signature,
                size_bytes,
            });
        }
        Ok(walked)
    }

    fn delete_orphans(&self, orphans: Vec<&Asset>) -> Vec<OrphanOutcome> {
        orphans
            .into_iter()
            .map(|asset| match self.catalog.delete_asset(&asset.id) {
                Ok(()) => OrphanOutcome::Deleted(asset.id.clone()),
                Err(e) => {
                    warn!(asset = %asset.id, error = %e, "Failed to delete orphaned asset");
                    OrphanOutcome::Failed {
                        asset_id: asset.id.clone(),
                        error: e.to_string(),
                    }
                }
            })
            .collect()
    }

    /// After a failed pass only assets whose backing file is gone are removed;
    /// the rest may still be reached by a later pass.
    fn clean_orphans_after_failure(
        &self,
        layout: &StoreLayout,
        historical: &[Asset],
        touched: &[String],
    ) -> Vec<OrphanOutcome> {
        let touched: FxHashSet<&str> = touched.iter().map(String::as_str).collect();
        let orphans: Vec<&Asset> = historical
            .iter()
            .filter(|a| !touched.contains(a.id.as_str()))
            .filter(|a| !layout.uploads().join(&a.stored_path).exists())
            .collect();
        self.delete_orphans(orphans)
    }
}

/// Stored paths of files this pass could not read or fingerprint.
fn unreached_paths(layout: &StoreLayout, report: &ReconcileReport) -> FxHashSet<String> {
    report
        .outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            FileOutcome::Unreadable { path, .. } | FileOutcome::FingerprintFailed { path, .. } => {
                layout.stored_path_of(path).ok()
            }
            _ => None,
        })
        .collect()
}

/// An untouched asset is an orphan when its file is gone, or when its file
/// was reconciled into a different asset (the content changed). Assets whose
/// file could not be read this pass are never orphans.
fn is_orphan(
    layout: &StoreLayout,
    asset: &Asset,
    reconciled_paths: &FxHashSet<&str>,
    unreached: &FxHashSet<String>,
) -> bool {
    if unreached.contains(&asset.stored_path) {
        return false;
    }
    reconciled_paths.contains(asset.stored_path.as_str())
        || !layout.uploads().join(&asset.stored_path).exists()
}

/// Remove every symlink in `_assets/` except the reserved entries. Links
/// still resolving to a file seed `recycling` (existing entries win).
fn clear_stale_links(
    layout: &StoreLayout,
    recycling: &mut RecyclingMap,
) -> Result<usize, HoustonError> {
    let assets_dir = layout.assets();
    let mut removed = 0usize;
    let mut entries: Vec<_> = fs::read_dir(&assets_dir)?
        .filter_map(|e| e.ok())
        .collect();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == layout::SENTINEL_FILE
            || name == layout::LEGACY_DERIVED_DIR
            || name == layout::DERIVED_DIR
        {
            continue;
        }
        let path = entry.path();
        let is_link = fs::symlink_metadata(&path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if !is_link {
            continue;
        }
        if let Ok(target) = fs::read_link(&path) {
            let resolved = layout::normalize(&assets_dir.join(target));
            let stem = Path::new(&name)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            if resolved.exists()
                && let Some(id) = ids::parse_id(&stem)
            {
                recycling.entry(resolved).or_insert(id);
            }
        }
        fs::remove_file(&path)?;
        removed += 1;
    }
    Ok(removed)
}

/// Name of the link for `asset`: `<id>.<ext>` with the display extension, else
/// the whitelist extension of its MIME type.
pub fn link_name(asset: &Asset, config: &HoustonConfig) -> String {
    let ext = asset
        .extension()
        .or_else(|| config.extension_for_mime(&asset.mime_type).map(str::to_string));
    match ext {
        Some(ext) => format!("{}.{}", asset.id, ext),
        None => asset.id.clone(),
    }
}

fn create_link(
    layout: &StoreLayout,
    asset: &Asset,
    config: &HoustonConfig,
) -> Result<PathBuf, HoustonError> {
    let link = layout.assets().join(link_name(asset, config));
    if fs::symlink_metadata(&link).is_ok() {
        fs::remove_file(&link)?;
    }
    std::os::unix::fs::symlink(StoreLayout::link_target(&asset.stored_path), &link)?;
    Ok(link)
}
