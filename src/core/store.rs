//! Git store records.
//!
//! A git store is a logical container of uploaded files backed by one on-disk
//! directory and a local git repository. The directory is named by the store id.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Classification of the content a store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MajorType {
    Filesystem,
    Archive,
    Service,
    Test,
    #[default]
    Unknown,
    Error,
    Reject,
}

impl MajorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MajorType::Filesystem => "filesystem",
            MajorType::Archive => "archive",
            MajorType::Service => "service",
            MajorType::Test => "test",
            MajorType::Unknown => "unknown",
            MajorType::Error => "error",
            MajorType::Reject => "reject",
        }
    }
}

impl fmt::Display for MajorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MajorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filesystem" => Ok(MajorType::Filesystem),
            "archive" => Ok(MajorType::Archive),
            "service" => Ok(MajorType::Service),
            "test" => Ok(MajorType::Test),
            "unknown" => Ok(MajorType::Unknown),
            "error" => Ok(MajorType::Error),
            "reject" => Ok(MajorType::Reject),
            other => Err(format!("unknown major type '{}'", other)),
        }
    }
}

/// Tag selecting the behavior hooks a store runs (see `gitstore::behavior`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    AssetGroup,
    MissionCollection,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::AssetGroup => "asset_group",
            StoreKind::MissionCollection => "mission_collection",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asset_group" => Ok(StoreKind::AssetGroup),
            "mission_collection" => Ok(StoreKind::MissionCollection),
            other => Err(format!("unknown store kind '{}'", other)),
        }
    }
}

/// Persistent git store row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitStore {
    pub id: String,
    pub kind: StoreKind,
    pub major_type: MajorType,
    pub owner_id: String,
    pub submitter_id: Option<String>,
    pub description: Option<String>,
    /// Last commit hash; unique across all stores.
    pub commit: Option<String>,
    pub commit_mime_whitelist_id: Option<String>,
    pub commit_houston_api_version: Option<String>,
    pub config: serde_json::Map<String, serde_json::Value>,
    /// Progress record tracking an in-flight preparation.
    pub progress_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl GitStore {
    pub fn new(id: String, kind: StoreKind, owner_id: &str) -> Self {
        let now = crate::core::time::now_epoch_z();
        Self {
            id,
            kind,
            major_type: MajorType::Unknown,
            owner_id: owner_id.to_string(),
            submitter_id: None,
            description: None,
            commit: None,
            commit_mime_whitelist_id: None,
            commit_houston_api_version: None,
            config: serde_json::Map::new(),
            progress_id: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn get_config_field(&self, field: &str) -> Option<&serde_json::Value> {
        self.config.get(field)
    }
}
