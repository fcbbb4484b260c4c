//! Inline and queued execution of commit jobs.

mod support;

use houston::core::error::HoustonError;
use houston::core::store::StoreKind;
use houston::gitstore::CreateRequest;
use houston::gitstore::dispatch::{CommitJob, Dispatcher, ExecutionStrategy};
use houston::gitstore::upload::UploadSource;
use std::fs;
use support::{Harness, assert_monotonic, jpeg};

#[test]
fn queued_creation_tracks_job_on_progress_record() {
    let h = Harness::new();
    let source = h.root().join("local");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("a.jpg"), jpeg("a")).unwrap();
    fs::write(source.join("b.jpg"), jpeg("b")).unwrap();
    let dispatcher = Dispatcher::new(h.service.clone()).unwrap();

    let created = h
        .service
        .create_from_upload(
            CreateRequest {
                kind: StoreKind::AssetGroup,
                owner_id: "owner-1".to_string(),
                submitter_id: None,
                description: None,
                source: UploadSource::Files(vec![source.join("a.jpg"), source.join("b.jpg")]),
            },
            &dispatcher,
            ExecutionStrategy::Queued,
        )
        .unwrap();

    let progress_id = created.store.progress_id.clone().expect("queued stores carry progress");
    let job_id = created.job.job_id().to_string();
    assert!(!job_id.is_empty());
    assert_eq!(created.job.store_id(), created.store.id);

    let outcome = created.job.wait().unwrap();
    assert_eq!(outcome.report.assets.len(), 2);

    let progress = h.catalog.get_progress(&progress_id).unwrap().unwrap();
    assert_eq!(progress.job_id.as_deref(), Some(job_id.as_str()));
    assert_eq!(progress.percentage, 100.0);
    assert!(!progress.failed);
    assert_monotonic(&h.trajectory());

    let saved = h.service.get_store(&outcome.store.id).unwrap();
    assert!(saved.progress_id.is_none());
    assert!(saved.commit.is_some());
}

#[test]
fn queued_jobs_run_in_submission_order() {
    let h = Harness::new();
    let first = h.create_store(StoreKind::AssetGroup);
    let second = h.create_store(StoreKind::AssetGroup);
    h.upload(&first.id, "a.jpg", &jpeg("a"));
    h.upload(&second.id, "b.jpg", &jpeg("b"));
    let dispatcher = Dispatcher::new(h.service.clone()).unwrap();

    let job = |store_id: &str| CommitJob {
        job_id: houston::core::ids::new_id(),
        store_id: store_id.to_string(),
        message: "queued".to_string(),
        input_filenames: Vec::new(),
    };
    let a = dispatcher.dispatch(job(&first.id), ExecutionStrategy::Queued).unwrap();
    let b = dispatcher.dispatch(job(&second.id), ExecutionStrategy::Queued).unwrap();

    let a = a.wait().unwrap();
    let b = b.wait().unwrap();
    assert_eq!(a.store.id, first.id);
    assert_eq!(b.store.id, second.id);
    assert!(a.store.updated_at <= b.store.updated_at);
}

#[test]
fn failed_job_reports_its_error_through_the_handle() {
    let h = Harness::new();
    let dispatcher = Dispatcher::new(h.service.clone()).unwrap();
    let handle = dispatcher
        .dispatch(
            CommitJob {
                job_id: houston::core::ids::new_id(),
                store_id: "S-MISSING".to_string(),
                message: "nothing".to_string(),
                input_filenames: Vec::new(),
            },
            ExecutionStrategy::Inline,
        )
        .unwrap();
    assert!(matches!(handle.wait(), Err(HoustonError::NotFound(_))));
}

#[test]
fn shut_down_dispatcher_rejects_queued_jobs() {
    let h = Harness::new();
    let store = h.create_store(StoreKind::AssetGroup);
    let dispatcher = Dispatcher::new(h.service.clone()).unwrap();
    dispatcher.shutdown();

    let err = dispatcher
        .dispatch(
            CommitJob {
                job_id: houston::core::ids::new_id(),
                store_id: store.id.clone(),
                message: "late".to_string(),
                input_filenames: Vec::new(),
            },
            ExecutionStrategy::Queued,
        )
        .unwrap_err();
    assert!(matches!(err, HoustonError::DispatchError(_)));

    let inline = dispatcher
        .dispatch(
            CommitJob {
                job_id: houston::core::ids::new_id(),
                store_id: store.id.clone(),
                message: "inline still works".to_string(),
                input_filenames: Vec::new(),
            },
            ExecutionStrategy::Inline,
        )
        .unwrap();
    assert!(inline.wait().is_ok());
}
