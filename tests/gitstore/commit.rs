//! Commit pipeline: manifest, git commit, behavior hooks and progress.

mod support;

use houston::core::error::HoustonError;
use houston::core::store::{MajorType, StoreKind};
use houston::gitstore::commit::{self, CommitOptions};
use houston::gitstore::archive::Inspection;
use houston::gitstore::ensure::EnsureOutcome;
use houston::gitstore::git;
use houston::gitstore::remote::LocalRemote;
use std::fs;
use std::sync::Arc;
use support::{Harness, assert_monotonic, git, jpeg};

#[test]
fn commit_records_head_and_manifest_metadata() {
    let h = Harness::new();
    let mut store = h.create_store(StoreKind::AssetGroup);
    h.upload(&store.id, "a.jpg", &jpeg("a"));
    h.upload(&store.id, "b.jpg", &jpeg("b"));
    let reporter = h.service.init_progress_preparation(&mut store, true).unwrap();

    let outcome = h
        .service
        .commit(
            &store.id,
            CommitOptions::new("Add survey")
                .with_input_filenames(vec!["a.jpg".into(), "b.jpg".into()]),
        )
        .unwrap();

    let layout = h.service.layout(&store.id);
    let head = git::head(layout.root()).unwrap();
    assert_eq!(outcome.commit_id.as_deref(), Some(head.as_str()));
    assert_eq!(outcome.report.assets.len(), 2);

    let saved = h.service.get_store(&store.id).unwrap();
    assert_eq!(saved.commit.as_deref(), Some(head.as_str()));
    assert_eq!(
        saved.commit_mime_whitelist_id.as_deref(),
        Some(h.config.mime_whitelist_id().as_str())
    );
    assert_eq!(
        saved.commit_houston_api_version.as_deref(),
        Some(h.config.software_version.as_str())
    );
    assert_eq!(saved.major_type, MajorType::Filesystem);
    assert!(saved.progress_id.is_none());

    let tracked = git::run_git(layout.root(), &["ls-files"]).unwrap();
    assert!(tracked.contains("metadata.json"));
    assert!(tracked.contains("_assets/"));
    assert!(tracked.contains("_metadata/"));
    assert!(!tracked.contains("_derived/"));

    let trajectory = h.trajectory();
    assert_monotonic(&trajectory);
    assert_eq!(trajectory.first().copied(), Some(1.0));
    assert!(trajectory.contains(&90.0));
    assert!(trajectory.contains(&99.0));
    assert_eq!(trajectory.last().copied(), Some(100.0));

    let persisted = h.catalog.get_progress(&reporter.id()).unwrap().unwrap();
    assert_eq!(persisted.percentage, 100.0);
    assert!(!persisted.failed);
}

#[test]
fn commit_flag_follows_configuration_unless_forced() {
    let h = Harness::with_config(|config| config.uploads_git_commit = false);
    let store = h.create_store(StoreKind::AssetGroup);
    h.upload(&store.id, "a.jpg", &jpeg("a"));
    let root = h.service.layout(&store.id).root().to_path_buf();

    let skipped = h
        .service
        .commit(&store.id, CommitOptions::new("no commit"))
        .unwrap();
    assert!(skipped.commit_id.is_none());
    assert!(git::head(&root).is_none());
    assert!(!h.trajectory().contains(&99.0));
    assert_eq!(h.trajectory().last().copied(), Some(100.0));

    let forced = h
        .service
        .commit(&store.id, CommitOptions::new("forced").with_commit(Some(true)))
        .unwrap();
    assert_eq!(forced.commit_id, git::head(&root));
}

#[test]
fn mission_collection_records_its_kind_in_the_manifest() {
    let h = Harness::new();
    let store = h.create_store(StoreKind::MissionCollection);
    h.upload(&store.id, "a.jpg", &jpeg("a"));

    h.service
        .commit(&store.id, CommitOptions::new("mission"))
        .unwrap();

    let manifest = commit::read_manifest(&h.service.layout(&store.id)).unwrap();
    assert_eq!(manifest["git_store_type"], "mission_collection");
    assert_eq!(
        manifest[commit::MANIFEST_WHITELIST_KEY],
        h.config.mime_whitelist_id()
    );
}

#[test]
fn failing_commit_marks_progress_failed() {
    let h = Harness::new();
    let mut store = h.create_store(StoreKind::AssetGroup);
    let reporter = h.service.init_progress_preparation(&mut store, true).unwrap();
    fs::write(h.service.layout(&store.id).manifest(), "[1, 2]").unwrap();

    let err = h
        .service
        .commit(&store.id, CommitOptions::new("broken"))
        .unwrap_err();

    assert!(matches!(err, HoustonError::ValidationError(_)));
    let persisted = h.catalog.get_progress(&reporter.id()).unwrap().unwrap();
    assert!(persisted.failed);
    assert!(h.last_progress().unwrap().failed);
}

#[test]
fn archives_are_deferred_not_reconciled() {
    let h = Harness::new();
    let store = h.create_store(StoreKind::AssetGroup);
    h.upload(&store.id, "bundle.zip", b"PK\x03\x04archive-body");
    h.upload(&store.id, "a.jpg", &jpeg("a"));

    let outcome = h
        .service
        .commit(&store.id, CommitOptions::new("with archive"))
        .unwrap();

    assert_eq!(outcome.deferred_archives.len(), 1);
    assert_eq!(outcome.deferred_archives[0].mime_type, "application/zip");
    assert!(matches!(
        outcome.deferred_archives[0].inspection,
        Inspection::Rejected(_)
    ));
    assert_eq!(outcome.report.assets.len(), 1);
}

#[test]
fn archives_are_not_scanned_without_realize() {
    let h = Harness::new();
    let store = h.create_store(StoreKind::AssetGroup);
    h.upload(&store.id, "bundle.zip", b"PK\x03\x04archive-body");
    h.upload(&store.id, "a.jpg", &jpeg("a"));

    let outcome = h
        .service
        .commit(&store.id, CommitOptions::new("no realize").with_realize(false))
        .unwrap();

    assert!(outcome.deferred_archives.is_empty());
    assert_eq!(outcome.report.assets.len(), 1);
}

#[test]
fn commit_without_update_leaves_catalog_and_manifest_alone() {
    let h = Harness::new();
    let store = h.create_store(StoreKind::MissionCollection);
    h.upload(&store.id, "a.jpg", &jpeg("a"));
    let layout = h.service.layout(&store.id);

    let outcome = h
        .service
        .commit(
            &store.id,
            CommitOptions::new("files only")
                .with_update(false)
                .with_commit(Some(true)),
        )
        .unwrap();

    assert!(outcome.report.assets.is_empty());
    assert_eq!(outcome.report.error_count(), 0);
    assert!(h.catalog.list_store_assets(&store.id).unwrap().is_empty());
    assert!(h.link_names(&store.id).is_empty());
    assert!(commit::read_manifest(&layout).unwrap().get("git_store_type").is_none());
    assert!(!h.trajectory().contains(&90.0));

    let head = git::head(layout.root()).unwrap();
    assert_eq!(outcome.commit_id.as_deref(), Some(head.as_str()));
    let tracked = git::run_git(layout.root(), &["ls-files"]).unwrap();
    assert!(tracked.contains("_uploads/"));

    let updated = h
        .service
        .commit(&store.id, CommitOptions::new("reconcile now"))
        .unwrap();
    assert_eq!(updated.report.assets.len(), 1);
    assert_eq!(h.catalog.list_store_assets(&store.id).unwrap().len(), 1);
}

#[test]
fn commits_are_pushed_to_a_new_remote_project() {
    let remotes = tempfile::tempdir().unwrap();
    let h = Harness::with_remote(Arc::new(LocalRemote::new(remotes.path())));
    let store = h.create_store(StoreKind::AssetGroup);
    h.upload(&store.id, "a.jpg", &jpeg("a"));

    let outcome = h
        .service
        .commit(&store.id, CommitOptions::new("publish"))
        .unwrap();

    let bare = remotes.path().join(format!("{}.git", store.id));
    assert!(bare.is_dir());
    let pushed = git(&bare, &["log", "--format=%H", "--all", "-1"]);
    assert_eq!(outcome.commit_id.as_deref(), Some(pushed.as_str()));

    let ensured = h.service.ensure_repository(&store.id).unwrap();
    assert_eq!(ensured.outcome, EnsureOutcome::Pulled);

    assert!(h.service.delete_store(&store.id).unwrap());
    assert!(!bare.exists());
}

#[test]
fn existing_progress_record_is_kept_without_overwrite() {
    let h = Harness::new();
    let mut store = h.create_store(StoreKind::AssetGroup);
    let first = h.service.init_progress_preparation(&mut store, false).unwrap();
    let again = h.service.init_progress_preparation(&mut store, false).unwrap();
    assert_eq!(first.id(), again.id());

    let replaced = h.service.init_progress_preparation(&mut store, true).unwrap();
    assert_ne!(replaced.id(), first.id());
    assert_eq!(store.progress_id.as_deref(), Some(replaced.id().as_str()));
}
