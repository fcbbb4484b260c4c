//! On-disk layout of one git store.
//!
//! ```text
//! <store_id>/
//!   .git/
//!   _uploads/      received files under their stored names
//!   _assets/       <asset_id>.<ext> -> ../_uploads/<stored_name>
//!   _derived/      derived artifacts
//!   _metadata/     <stored_name>.metadata.json sidecars
//!   metadata.json  commit manifest
//! ```

use crate::core::error::HoustonError;
use std::fs;
use std::path::{Component, Path, PathBuf};

pub const UPLOADS_DIR: &str = "_uploads";
pub const ASSETS_DIR: &str = "_assets";
pub const DERIVED_DIR: &str = "_derived";
pub const METADATA_DIR: &str = "_metadata";
pub const MANIFEST_FILE: &str = "metadata.json";
/// Hidden file keeping otherwise-empty directories tracked by git.
pub const SENTINEL_FILE: &str = ".touch";
/// Pre-`_derived` location of derived artifacts, inside `_assets/`.
pub const LEGACY_DERIVED_DIR: &str = "derived";

/// Paths pinned to the committed portion of a store, in staging order.
pub const COMMITTED_PATHS: [&str; 4] = ["_uploads/", "_assets/", "_metadata/", MANIFEST_FILE];

#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(git_store_database_path: &Path, store_id: &str) -> Self {
        Self {
            root: git_store_database_path.join(store_id),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn uploads(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }

    pub fn assets(&self) -> PathBuf {
        self.root.join(ASSETS_DIR)
    }

    pub fn derived(&self) -> PathBuf {
        self.root.join(DERIVED_DIR)
    }

    pub fn metadata(&self) -> PathBuf {
        self.root.join(METADATA_DIR)
    }

    pub fn manifest(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn legacy_derived(&self) -> PathBuf {
        self.assets().join(LEGACY_DERIVED_DIR)
    }

    pub fn sidecar(&self, stored_name: &str) -> PathBuf {
        self.metadata().join(format!("{}.metadata.json", stored_name))
    }

    /// Relative symlink target for a file stored at `stored_path`.
    pub fn link_target(stored_path: &str) -> PathBuf {
        Path::new("..").join(UPLOADS_DIR).join(stored_path)
    }

    /// Path of `path` relative to `_uploads/`, using `/` separators.
    pub fn stored_path_of(&self, path: &Path) -> Result<String, HoustonError> {
        let uploads = normalize(&self.uploads());
        let rel = normalize(path)
            .strip_prefix(&uploads)
            .map(Path::to_path_buf)
            .map_err(|_| {
                HoustonError::PathError(format!(
                    "{} is not inside {}",
                    path.display(),
                    uploads.display()
                ))
            })?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Ok(parts.join("/"))
    }
}

/// Lexically normalize a path: drop `.` and fold `..` without touching the disk.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Create `dir` (and parents) with its sentinel file.
pub fn ensure_dir_with_sentinel(dir: &Path) -> Result<(), HoustonError> {
    fs::create_dir_all(dir)?;
    let sentinel = dir.join(SENTINEL_FILE);
    if !sentinel.exists() {
        fs::write(&sentinel, b"")?;
    }
    Ok(())
}

pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}
