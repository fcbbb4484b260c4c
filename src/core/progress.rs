//! Percentage trackers polled by asynchronous callers.
//!
//! A [`ProgressReporter`] owns the in-memory state of one record and mirrors
//! every change into the catalog. Updates only move forward: values are clamped
//! to `0..=100`, lower values are ignored, and the record freezes once it fails
//! or reaches 100. Persistence errors are logged and dropped so progress never
//! breaks the pipeline it reports on.

use crate::core::catalog::Catalog;
use crate::core::error::HoustonError;
use crate::core::ids;
use crate::core::time::now_epoch_z;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub id: String,
    pub description: String,
    pub percentage: f64,
    pub failed: bool,
    /// Background job working on this record, when dispatched.
    pub job_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Progress {
    pub fn new(description: &str) -> Self {
        let now = now_epoch_z();
        Self {
            id: ids::new_id(),
            description: description.to_string(),
            percentage: 0.0,
            failed: false,
            job_id: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.percentage >= 100.0
    }

    /// Failed or complete; no further updates are accepted.
    pub fn is_terminal(&self) -> bool {
        self.failed || self.is_complete()
    }
}

/// Callback invoked with a snapshot after every accepted change.
pub type ProgressObserver = Arc<dyn Fn(&Progress) + Send + Sync>;

pub struct ProgressReporter {
    catalog: Option<Arc<dyn Catalog>>,
    state: Mutex<Progress>,
    observer: Option<ProgressObserver>,
}

impl ProgressReporter {
    /// Create and persist a fresh record.
    pub fn create(catalog: Arc<dyn Catalog>, description: &str) -> Result<Self, HoustonError> {
        let progress = Progress::new(description);
        catalog.insert_progress(&progress)?;
        Ok(Self {
            catalog: Some(catalog),
            state: Mutex::new(progress),
            observer: None,
        })
    }

    pub fn load(catalog: Arc<dyn Catalog>, id: &str) -> Result<Option<Self>, HoustonError> {
        Ok(catalog.get_progress(id)?.map(|progress| Self {
            catalog: Some(catalog),
            state: Mutex::new(progress),
            observer: None,
        }))
    }

    /// In-memory reporter for work that nobody polls.
    pub fn detached(description: &str) -> Self {
        Self {
            catalog: None,
            state: Mutex::new(Progress::new(description)),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Option<ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn id(&self) -> String {
        self.lock().id.clone()
    }

    pub fn snapshot(&self) -> Progress {
        self.lock().clone()
    }

    pub fn set(&self, percentage: f64) {
        let percentage = if percentage.is_nan() {
            0.0
        } else {
            percentage.clamp(0.0, 100.0)
        };
        self.update(|progress| {
            if progress.is_terminal() || percentage <= progress.percentage {
                return false;
            }
            progress.percentage = percentage;
            true
        });
    }

    pub fn fail(&self) {
        self.update(|progress| {
            if progress.is_terminal() {
                return false;
            }
            progress.failed = true;
            true
        });
    }

    pub fn set_job_id(&self, job_id: &str) {
        self.update(|progress| {
            progress.job_id = Some(job_id.to_string());
            true
        });
    }

    fn update(&self, apply: impl FnOnce(&mut Progress) -> bool) {
        let snapshot = {
            let mut progress = self.lock();
            if !apply(&mut progress) {
                return;
            }
            progress.updated_at = now_epoch_z();
            if let Some(catalog) = &self.catalog
                && let Err(e) = catalog.update_progress(&progress)
            {
                warn!(progress = %progress.id, error = %e, "Failed to persist progress");
            }
            progress.clone()
        };
        if let Some(observer) = &self.observer {
            observer(&snapshot);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
