//! Repository ensuring against local and remote state.

mod support;

use houston::core::store::MajorType;
use houston::gitstore::ensure::EnsureOutcome;
use houston::gitstore::layout::SENTINEL_FILE;
use houston::gitstore::remote::LocalRemote;
use std::fs;
use std::sync::Arc;
use support::{Harness, git, jpeg, seed_remote};

#[test]
fn fresh_store_is_initialized_once() {
    let h = Harness::new();
    let first = h.service.ensure_repository("S-FRESH").unwrap();
    assert_eq!(first.outcome, EnsureOutcome::Initialized);

    let layout = first.layout;
    assert!(layout.root().join(".git").is_dir());
    for dir in [layout.uploads(), layout.assets(), layout.derived(), layout.metadata()] {
        assert!(dir.join(SENTINEL_FILE).is_file(), "{} lacks a sentinel", dir.display());
    }
    assert_eq!(fs::read_to_string(layout.manifest()).unwrap(), "{}");
    let name = git(layout.root(), &["config", "--local", "user.name"]);
    assert_eq!(name, "Houston");

    let second = h.service.ensure_repository("S-FRESH").unwrap();
    assert_eq!(second.outcome, EnsureOutcome::Existing);
}

#[test]
fn missing_identity_refuses_to_initialize() {
    let h = Harness::with_config(|config| config.git_email = None);
    let err = h.service.ensure_repository("S-ANON").unwrap_err();
    assert!(matches!(err, houston::core::error::HoustonError::ConfigError(_)));
    assert!(!h.service.layout("S-ANON").root().exists());
}

#[test]
fn known_remote_project_is_cloned_then_pulled() {
    let remotes = tempfile::tempdir().unwrap();
    let remote_repo = seed_remote(remotes.path(), "S-REMOTE", "seed.jpg", &jpeg("seed"));
    let h = Harness::with_remote(Arc::new(LocalRemote::new(remotes.path())));

    let cloned = h.service.ensure_repository("S-REMOTE").unwrap();
    assert_eq!(cloned.outcome, EnsureOutcome::Cloned);
    assert!(cloned.layout.uploads().join("seed.jpg").is_file());
    assert!(cloned.layout.assets().join(SENTINEL_FILE).is_file());

    fs::write(remote_repo.join("_uploads").join("late.jpg"), jpeg("late")).unwrap();
    git(&remote_repo, &["add", "--all"]);
    git(&remote_repo, &["commit", "--quiet", "-m", "late"]);

    let pulled = h.service.ensure_repository("S-REMOTE").unwrap();
    assert_eq!(pulled.outcome, EnsureOutcome::Pulled);
    assert!(pulled.layout.uploads().join("late.jpg").is_file());
}

#[test]
fn pull_failure_is_swallowed() {
    let remotes = tempfile::tempdir().unwrap();
    let remote_repo = seed_remote(remotes.path(), "S-GONE", "seed.jpg", &jpeg("seed"));
    let h = Harness::with_remote(Arc::new(LocalRemote::new(remotes.path())));
    h.service.ensure_repository("S-GONE").unwrap();

    fs::remove_dir_all(&remote_repo).unwrap();
    let ensured = h.service.ensure_repository("S-GONE").unwrap();
    assert_eq!(ensured.outcome, EnsureOutcome::PullFailed);
    assert!(ensured.layout.uploads().join("seed.jpg").is_file());
}

#[test]
fn ensure_store_restores_remote_projects() {
    let remotes = tempfile::tempdir().unwrap();
    let remote_repo = seed_remote(remotes.path(), "S-TAGGED", "seed.jpg", &jpeg("seed"));
    let remote_head = git(&remote_repo, &["rev-parse", "HEAD"]);
    let h = Harness::with_remote(Arc::new(
        LocalRemote::new(remotes.path()).with_tags(&["type:archive", "unrelated"]),
    ));

    let store = h.service.ensure_store("S-TAGGED", "owner-9").unwrap().unwrap();
    assert_eq!(store.major_type, MajorType::Archive);
    assert_eq!(store.owner_id, "owner-9");
    assert_eq!(store.commit.as_deref(), Some(remote_head.as_str()));

    let saved = h.service.get_store("S-TAGGED").unwrap();
    assert_eq!(saved.commit, store.commit);

    let assets = h.catalog.list_store_assets("S-TAGGED").unwrap();
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0].path, "seed.jpg");
    assert_eq!(h.link_names("S-TAGGED").len(), 1);

    assert!(h.service.ensure_store("S-UNKNOWN", "owner-9").unwrap().is_none());
}

#[test]
fn ensure_store_adopts_the_pulled_head() {
    let remotes = tempfile::tempdir().unwrap();
    let remote_repo = seed_remote(remotes.path(), "S-MOVING", "seed.jpg", &jpeg("seed"));
    let h = Harness::with_remote(Arc::new(LocalRemote::new(remotes.path())));
    h.service.ensure_store("S-MOVING", "owner-1").unwrap().unwrap();

    fs::write(remote_repo.join("_uploads").join("late.jpg"), jpeg("late")).unwrap();
    git(&remote_repo, &["add", "--all"]);
    git(&remote_repo, &["commit", "--quiet", "-m", "late"]);
    let remote_head = git(&remote_repo, &["rev-parse", "HEAD"]);

    let store = h.service.ensure_store("S-MOVING", "owner-1").unwrap().unwrap();
    assert_eq!(store.commit.as_deref(), Some(remote_head.as_str()));
    let saved = h.service.get_store("S-MOVING").unwrap();
    assert_eq!(saved.commit.as_deref(), Some(remote_head.as_str()));
}

#[test]
fn type_tags_are_matched_without_case() {
    let remotes = tempfile::tempdir().unwrap();
    seed_remote(remotes.path(), "S-UPPER", "seed.jpg", &jpeg("seed"));
    let h = Harness::with_remote(Arc::new(
        LocalRemote::new(remotes.path()).with_tags(&["Type:ARCHIVE"]),
    ));
    let store = h.service.ensure_store("S-UPPER", "owner-1").unwrap().unwrap();
    assert_eq!(store.major_type, MajorType::Archive);

    seed_remote(remotes.path(), "S-BOGUS", "seed.jpg", &jpeg("seed"));
    let h = Harness::with_remote(Arc::new(
        LocalRemote::new(remotes.path()).with_tags(&["type:bogus"]),
    ));
    let store = h.service.ensure_store("S-BOGUS", "owner-1").unwrap().unwrap();
    assert_eq!(store.major_type, MajorType::Unknown);
}
