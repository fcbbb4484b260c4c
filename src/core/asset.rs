use serde::{Deserialize, Serialize};
use std::path::Path;

/// One reconciled file inside a git store.
///
/// `filesystem_id`, `semantic_id` and `git_store_id` are identity fields and are
/// never rewritten once the row exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub git_store_id: String,
    /// Display path: the original filename when known, else the stored name.
    pub path: String,
    /// Location of the backing file relative to `_uploads/`.
    pub stored_path: String,
    pub mime_type: String,
    pub magic_signature: String,
    pub size_bytes: u64,
    pub filesystem_xxhash64: String,
    pub filesystem_id: String,
    pub semantic_id: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Asset {
    /// Lowercased extension of the display path, if it has one.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.path)
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
    }

    /// Copy every non-identity field from `observed`.
    pub fn apply_update(&mut self, observed: &Asset) {
        self.path = observed.path.clone();
        self.stored_path = observed.stored_path.clone();
        self.mime_type = observed.mime_type.clone();
        self.magic_signature = observed.magic_signature.clone();
        self.size_bytes = observed.size_bytes;
        self.filesystem_xxhash64 = observed.filesystem_xxhash64.clone();
        self.updated_at = observed.updated_at.clone();
    }
}
