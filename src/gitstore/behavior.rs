//! Per-kind store behavior, selected by the store's `kind` tag.

use crate::core::store::{GitStore, MajorType, StoreKind};
use serde_json::{Map, Value};

pub trait StoreBehavior: Send + Sync {
    fn kind(&self) -> StoreKind;

    /// Adjust the manifest written after a commit.
    fn commit_metadata_hook(&self, _store: &GitStore, _manifest: &mut Map<String, Value>) {}

    /// Final step of a preparation, before the store row is saved.
    fn post_preparation_hook(&self, store: &mut GitStore) {
        store.major_type = MajorType::Filesystem;
        store.progress_id = None;
    }
}

pub struct AssetGroupBehavior;

impl StoreBehavior for AssetGroupBehavior {
    fn kind(&self) -> StoreKind {
        StoreKind::AssetGroup
    }
}

pub struct MissionCollectionBehavior;

impl StoreBehavior for MissionCollectionBehavior {
    fn kind(&self) -> StoreKind {
        StoreKind::MissionCollection
    }

    fn commit_metadata_hook(&self, store: &GitStore, manifest: &mut Map<String, Value>) {
        manifest.insert(
            "git_store_type".to_string(),
            Value::String(store.kind.as_str().to_string()),
        );
    }
}

pub fn behavior_for(kind: StoreKind) -> &'static dyn StoreBehavior {
    match kind {
        StoreKind::AssetGroup => &AssetGroupBehavior,
        StoreKind::MissionCollection => &MissionCollectionBehavior,
    }
}
