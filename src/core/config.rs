//! Process configuration.
//!
//! Loaded once by the caller and passed into the pipeline explicitly; nothing
//! in `gitstore` reads configuration from ambient state.

use crate::core::error::HoustonError;
use crate::core::ids;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "houston.toml";
pub const CONFIG_ENV_VAR: &str = "HOUSTON_CONFIG";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HoustonConfig {
    /// Root holding one directory per git store.
    pub git_store_database_path: PathBuf,
    /// Root holding the SQLite database and MIME whitelist manifests.
    pub project_database_path: PathBuf,
    /// Root of the upload staging area (one directory per transaction).
    pub upload_staging_path: PathBuf,
    pub git_public_name: Option<String>,
    pub git_email: Option<String>,
    /// Commit reconciled trees into git unless a caller overrides it.
    pub uploads_git_commit: bool,
    pub fingerprint_workers: usize,
    pub purge_upload_transactions: bool,
    pub software_version: String,
    /// MIME type -> canonical file extension.
    pub asset_mime_type_whitelist_extension: BTreeMap<String, String>,
}

impl Default for HoustonConfig {
    fn default() -> Self {
        let whitelist = [
            ("image/jpeg", "jpg"),
            ("image/png", "png"),
            ("image/gif", "gif"),
            ("image/tiff", "tiff"),
            ("image/bmp", "bmp"),
            ("image/webp", "webp"),
            ("image/heic", "heic"),
            ("video/mp4", "mp4"),
            ("video/quicktime", "mov"),
            ("video/x-msvideo", "avi"),
        ]
        .into_iter()
        .map(|(mime, ext)| (mime.to_string(), ext.to_string()))
        .collect();

        Self {
            git_store_database_path: PathBuf::from("_db/git_store"),
            project_database_path: PathBuf::from("_db"),
            upload_staging_path: PathBuf::from("_db/uploads"),
            git_public_name: None,
            git_email: None,
            uploads_git_commit: true,
            fingerprint_workers: 4,
            purge_upload_transactions: true,
            software_version: env!("CARGO_PKG_VERSION").to_string(),
            asset_mime_type_whitelist_extension: whitelist,
        }
    }
}

impl HoustonConfig {
    /// Configuration rooted at `root` with a commit identity, for tools and tests.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            git_store_database_path: root.join("git_store"),
            project_database_path: root.to_path_buf(),
            upload_staging_path: root.join("uploads"),
            git_public_name: Some("Houston".to_string()),
            git_email: Some("houston@localhost".to_string()),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), HoustonError> {
        if self.git_public_name.as_deref().unwrap_or("").is_empty() {
            return Err(HoustonError::ConfigError(
                "git_public_name must be set".to_string(),
            ));
        }
        if self.git_email.as_deref().unwrap_or("").is_empty() {
            return Err(HoustonError::ConfigError("git_email must be set".to_string()));
        }
        if self.fingerprint_workers == 0 {
            return Err(HoustonError::ConfigError(
                "fingerprint_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Commit identity as `(name, email)`.
    pub fn git_identity(&self) -> Result<(&str, &str), HoustonError> {
        match (self.git_public_name.as_deref(), self.git_email.as_deref()) {
            (Some(name), Some(email)) if !name.is_empty() && !email.is_empty() => {
                Ok((name, email))
            }
            _ => Err(HoustonError::ConfigError(
                "git commit identity (git_public_name, git_email) is not configured".to_string(),
            )),
        }
    }

    pub fn mime_type_whitelist(&self) -> BTreeSet<String> {
        self.asset_mime_type_whitelist_extension
            .keys()
            .cloned()
            .collect()
    }

    /// Identity of the whitelist contents; stamped into every commit for audit.
    pub fn mime_whitelist_id(&self) -> String {
        let sorted: Vec<String> = self.mime_type_whitelist().into_iter().collect();
        ids::stable_id_of_parts(&sorted)
    }

    pub fn extension_for_mime(&self, mime_type: &str) -> Option<&str> {
        self.asset_mime_type_whitelist_extension
            .get(mime_type)
            .map(|s| s.as_str())
    }

    /// Write `mime.whitelist.<id>.json` under the project database path if it is
    /// not there yet. Returns the manifest path.
    pub fn write_mime_whitelist_manifest(&self) -> Result<PathBuf, HoustonError> {
        let id = self.mime_whitelist_id();
        fs::create_dir_all(&self.project_database_path)?;
        let path = self
            .project_database_path
            .join(format!("mime.whitelist.{}.json", id));
        if !path.exists() {
            debug!(path = %path.display(), "Creating new MIME whitelist manifest");
            let sorted: Vec<String> = self.mime_type_whitelist().into_iter().collect();
            let mut body = serde_json::Map::new();
            body.insert(id, serde_json::json!(sorted));
            fs::write(&path, serde_json::to_string(&body)?)?;
        }
        Ok(path)
    }
}

/// Load configuration from `$HOUSTON_CONFIG`, else `./houston.toml`.
/// No config file means defaults (not an error).
pub fn load_config(dir: &Path) -> Result<HoustonConfig, HoustonError> {
    let candidate = match std::env::var(CONFIG_ENV_VAR) {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => dir.join(CONFIG_FILE_NAME),
    };
    if !candidate.exists() {
        return Ok(HoustonConfig::default());
    }
    load_config_file(&candidate)
}

pub fn load_config_file(path: &Path) -> Result<HoustonConfig, HoustonError> {
    let content = fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| {
        HoustonError::ConfigError(format!("{}: {}", path.display(), e))
    })
}
