//! Upload staging and materialization into a store's `_uploads/`.
//!
//! Received files are stored under a collision-resistant name derived from
//! their original filename; the original is kept in a JSON sidecar under
//! `_metadata/` and handed to the reconciler as a display-path hint.

use crate::core::error::HoustonError;
use crate::core::ids;
use crate::gitstore::layout::{self, StoreLayout};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const TRANSACTION_PREFIX: &str = "trans-";
const SIDECAR_SUFFIX: &str = ".metadata.json";

/// Stored name for an original filename: SHA-256 hex of the name.
pub fn stored_filename(original: &str) -> String {
    let digest = Sha256::digest(original.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: PathBuf,
    pub metadata: UploadMetadata,
}

/// Source of a transaction's received files.
pub trait UploadStaging: Send + Sync {
    /// Files of `transaction_id`, restricted to `filenames` when given. Fails
    /// with `UploadMissing` when a requested filename was never received.
    fn collect(
        &self,
        transaction_id: &str,
        filenames: Option<&[String]>,
    ) -> Result<Vec<StagedFile>, HoustonError>;

    fn purge(&self, transaction_id: &str) -> Result<(), HoustonError>;
}

/// Staging area on disk: `<root>/trans-<id>/<file>` plus `<file>.metadata.json`.
#[derive(Debug, Clone)]
pub struct DirStaging {
    root: PathBuf,
}

impl DirStaging {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn transaction_dir(&self, transaction_id: &str) -> PathBuf {
        self.root
            .join(format!("{}{}", TRANSACTION_PREFIX, transaction_id))
    }

    /// Receive one file into a transaction. Returns the staged path.
    pub fn stage_file(
        &self,
        transaction_id: &str,
        filename: &str,
        content: &[u8],
    ) -> Result<PathBuf, HoustonError> {
        let dir = self.transaction_dir(transaction_id);
        fs::create_dir_all(&dir)?;
        let path = dir.join(ids::new_id());
        fs::write(&path, content)?;
        let metadata = UploadMetadata {
            filename: filename.to_string(),
        };
        fs::write(sidecar_for(&path), serde_json::to_vec(&metadata)?)?;
        Ok(path)
    }
}

fn sidecar_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(SIDECAR_SUFFIX);
    path.with_file_name(name)
}

impl UploadStaging for DirStaging {
    fn collect(
        &self,
        transaction_id: &str,
        filenames: Option<&[String]>,
    ) -> Result<Vec<StagedFile>, HoustonError> {
        let dir = self.transaction_dir(transaction_id);
        if !dir.is_dir() {
            return match filenames {
                Some(requested) if !requested.is_empty() => {
                    Err(HoustonError::UploadMissing(requested.to_vec()))
                }
                _ => Err(HoustonError::NotFound(format!(
                    "upload transaction {}",
                    transaction_id
                ))),
            };
        }

        let mut entries: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .filter(|p| {
                let name = p.file_name().unwrap_or_default().to_string_lossy();
                !name.ends_with(SIDECAR_SUFFIX) && !layout::is_hidden(&name)
            })
            .collect();
        entries.sort();

        let mut staged = Vec::with_capacity(entries.len());
        for path in entries {
            let sidecar = sidecar_for(&path);
            let metadata = if sidecar.exists() {
                serde_json::from_slice(&fs::read(&sidecar)?)?
            } else {
                UploadMetadata {
                    filename: path
                        .file_name()
                        .unwrap_or_default()
                        .to_string_lossy()
                        .into_owned(),
                }
            };
            staged.push(StagedFile { path, metadata });
        }

        let Some(requested) = filenames else {
            return Ok(staged);
        };
        let requested: BTreeSet<&str> = requested.iter().map(String::as_str).collect();
        let received: BTreeSet<&str> = staged
            .iter()
            .map(|f| f.metadata.filename.as_str())
            .collect();
        let missing: Vec<String> = requested
            .difference(&received)
            .map(|s| s.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(HoustonError::UploadMissing(missing));
        }
        Ok(staged
            .into_iter()
            .filter(|f| requested.contains(f.metadata.filename.as_str()))
            .collect())
    }

    fn purge(&self, transaction_id: &str) -> Result<(), HoustonError> {
        let dir = self.transaction_dir(transaction_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            debug!(transaction = %transaction_id, "Purged upload transaction");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum UploadSource {
    /// A staged transaction, optionally restricted to some original filenames.
    Transaction {
        id: String,
        filenames: Option<Vec<String>>,
    },
    /// Local files copied in place.
    Files(Vec<PathBuf>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializedUpload {
    pub stored_filenames: Vec<String>,
    pub original_filenames: Vec<String>,
}

impl MaterializedUpload {
    fn record(&mut self, stored: String, original: String) {
        self.stored_filenames.push(stored);
        self.original_filenames.push(original);
    }
}

/// Move or copy `source` into `_uploads/`, writing a sidecar per file.
pub fn materialize(
    layout: &StoreLayout,
    staging: &dyn UploadStaging,
    source: &UploadSource,
    purge: bool,
) -> Result<MaterializedUpload, HoustonError> {
    let mut out = MaterializedUpload::default();
    match source {
        UploadSource::Transaction { id, filenames } => {
            let staged = staging.collect(id, filenames.as_deref())?;
            for file in staged {
                let stored = stored_filename(&file.metadata.filename);
                move_file(&file.path, &layout.uploads().join(&stored))?;
                write_sidecar(layout, &stored, &file.metadata)?;
                out.record(stored, file.metadata.filename);
            }
            if purge {
                staging.purge(id)?;
            }
        }
        UploadSource::Files(paths) => {
            for path in paths {
                let (stored, original) = copy_file_add(layout, path)?;
                out.record(stored, original);
            }
        }
    }
    info!(
        files = out.stored_filenames.len(),
        root = %layout.root().display(),
        "Materialized upload"
    );
    Ok(out)
}

/// Copy a local file into `_uploads/` under its stored name. Returns
/// `(stored_name, original_name)`.
pub fn copy_file_add(layout: &StoreLayout, path: &Path) -> Result<(String, String), HoustonError> {
    if !path.is_file() {
        return Err(HoustonError::NotFound(format!("{}", path.display())));
    }
    let original = path
        .file_name()
        .ok_or_else(|| HoustonError::PathError(format!("{} has no file name", path.display())))?
        .to_string_lossy()
        .into_owned();
    let stored = stored_filename(&original);
    fs::create_dir_all(layout.uploads())?;
    fs::copy(path, layout.uploads().join(&stored))?;
    write_sidecar(
        layout,
        &stored,
        &UploadMetadata {
            filename: original.clone(),
        },
    )?;
    Ok((stored, original))
}

/// Replace `_uploads/` with a recursive copy of `source_dir`.
pub fn copy_path(layout: &StoreLayout, source_dir: &Path) -> Result<usize, HoustonError> {
    if !source_dir.is_dir() {
        return Err(HoustonError::NotFound(format!("{}", source_dir.display())));
    }
    let uploads = layout.uploads();
    if uploads.exists() {
        fs::remove_dir_all(&uploads)?;
    }
    let mut copied = 0usize;
    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(|e| HoustonError::PathError(e.to_string()))?;
        let target = uploads.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    layout::ensure_dir_with_sentinel(&uploads)?;
    Ok(copied)
}

fn write_sidecar(
    layout: &StoreLayout,
    stored: &str,
    metadata: &UploadMetadata,
) -> Result<(), HoustonError> {
    fs::create_dir_all(layout.metadata())?;
    fs::write(layout.sidecar(stored), serde_json::to_vec(metadata)?)?;
    Ok(())
}

fn move_file(from: &Path, to: &Path) -> Result<(), HoustonError> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(from, to).is_err() {
        // cross-device
        fs::copy(from, to)?;
        if let Err(e) = fs::remove_file(from) {
            warn!(path = %from.display(), error = %e, "Could not remove staged file after copy");
        }
    }
    Ok(())
}
