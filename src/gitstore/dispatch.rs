//! Commit job dispatch.
//!
//! Jobs run either inline on the caller's thread or on a single background
//! worker. One worker means queued preparations run one at a time, which is
//! the only serialization stores get.

use crate::core::error::HoustonError;
use crate::gitstore::GitStoreService;
use crate::gitstore::commit::{CommitOptions, CommitOutcome};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionStrategy {
    #[default]
    Inline,
    Queued,
}

#[derive(Debug, Clone)]
pub struct CommitJob {
    pub job_id: String,
    pub store_id: String,
    pub message: String,
    pub input_filenames: Vec<String>,
}

type JobResult = Result<CommitOutcome, HoustonError>;

struct QueuedJob {
    job: CommitJob,
    reply: Sender<JobResult>,
}

#[derive(Debug)]
pub struct JobHandle {
    job_id: String,
    store_id: String,
    result: Receiver<JobResult>,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    /// Block until the job finished.
    pub fn wait(self) -> JobResult {
        self.result.recv().map_err(|_| {
            HoustonError::DispatchError(format!("job {} was dropped by the worker", self.job_id))
        })?
    }
}

pub struct Dispatcher {
    service: Arc<GitStoreService>,
    sender: Mutex<Option<Sender<QueuedJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(service: Arc<GitStoreService>) -> Result<Self, HoustonError> {
        let (sender, receiver) = mpsc::channel::<QueuedJob>();
        let worker_service = service.clone();
        let worker = thread::Builder::new()
            .name("houston-commit-worker".to_string())
            .spawn(move || {
                for queued in receiver {
                    let result = run_job(&worker_service, &queued.job);
                    // the handle may have been dropped; nobody is waiting then
                    let _ = queued.reply.send(result);
                }
            })?;
        Ok(Self {
            service,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn service(&self) -> &GitStoreService {
        &self.service
    }

    pub fn dispatch(&self, job: CommitJob, strategy: ExecutionStrategy) -> Result<JobHandle, HoustonError> {
        let (reply, result) = mpsc::channel();
        let handle = JobHandle {
            job_id: job.job_id.clone(),
            store_id: job.store_id.clone(),
            result,
        };
        match strategy {
            ExecutionStrategy::Inline => {
                let _ = reply.send(run_job(&self.service, &job));
            }
            ExecutionStrategy::Queued => {
                let sender = self
                    .sender
                    .lock()
                    .map_err(|_| HoustonError::DispatchError("dispatcher lock poisoned".to_string()))?;
                let Some(sender) = sender.as_ref() else {
                    return Err(HoustonError::DispatchError("dispatcher is shut down".to_string()));
                };
                info!(job = %job.job_id, store = %job.store_id, "Queued commit job");
                sender
                    .send(QueuedJob { job, reply })
                    .map_err(|_| HoustonError::DispatchError("commit worker stopped".to_string()))?;
            }
        }
        Ok(handle)
    }

    /// Stop accepting jobs and wait for the queue to drain.
    pub fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(worker) = worker
            && worker.join().is_err()
        {
            error!("Commit worker panicked");
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_job(service: &GitStoreService, job: &CommitJob) -> JobResult {
    info!(job = %job.job_id, store = %job.store_id, "Running commit job");
    let options = CommitOptions::new(&job.message).with_input_filenames(job.input_filenames.clone());
    let result = service.commit(&job.store_id, options);
    if let Err(e) = &result {
        error!(job = %job.job_id, store = %job.store_id, error = %e, "Commit job failed");
    }
    result
}
