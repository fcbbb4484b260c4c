//! Connection access for the database bins.
//!
//! Writers to one bin are serialized by an in-process lock keyed by the bin's
//! path; readers open their own connection and rely on WAL to run alongside a
//! writer. Nothing is cached between calls, so a queued commit job and an
//! inline caller never share a connection. The lock is not reentrant: a closure
//! passed to [`BinPool::with_write`] must not write to the same bin again.

use crate::core::db;
use crate::core::error::HoustonError;
use rusqlite::{Connection, ErrorCode};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::Duration;
use tracing::debug;

const OPEN_ATTEMPTS: u32 = 6;
const BACKOFF_START: Duration = Duration::from_millis(100);
const BACKOFF_CEILING: Duration = Duration::from_secs(5);

const WRITER_BUSY_TIMEOUT_SECS: u32 = 30;
const READER_BUSY_TIMEOUT_SECS: u32 = 15;

#[derive(Default)]
pub struct BinPool {
    write_locks: Mutex<FxHashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl BinPool {
    fn write_lock(&self, bin: &Path) -> Result<Arc<Mutex<()>>, HoustonError> {
        let mut locks = self
            .write_locks
            .lock()
            .map_err(|_| HoustonError::ValidationError("bin lock table poisoned".to_string()))?;
        Ok(locks.entry(bin.to_path_buf()).or_default().clone())
    }

    /// Run `f` on a fresh connection while holding the bin's write lock.
    pub fn with_write<F, R>(&self, bin: &Path, f: F) -> Result<R, HoustonError>
    where
        F: FnOnce(&Connection) -> Result<R, HoustonError>,
    {
        let lock = self.write_lock(bin)?;
        let _held = lock.lock().map_err(|_| {
            HoustonError::ValidationError(format!("write lock for {} poisoned", bin.display()))
        })?;
        let conn = open_with_backoff(bin, WRITER_BUSY_TIMEOUT_SECS)?;
        f(&conn)
    }

    /// Run `f` on a fresh connection without taking the write lock.
    pub fn with_read<F, R>(&self, bin: &Path, f: F) -> Result<R, HoustonError>
    where
        F: FnOnce(&Connection) -> Result<R, HoustonError>,
    {
        let conn = open_with_backoff(bin, READER_BUSY_TIMEOUT_SECS)?;
        f(&conn)
    }
}

fn open_with_backoff(bin: &Path, busy_timeout_secs: u32) -> Result<Connection, HoustonError> {
    let path = bin.to_string_lossy();
    let mut delay = BACKOFF_START;
    let mut attempt = 1;
    loop {
        match db::db_connect_pooled(&path, busy_timeout_secs) {
            Err(e) if is_contended(&e) && attempt < OPEN_ATTEMPTS => {
                debug!(bin = %path, attempt, "Database busy, retrying open");
                thread::sleep(delay);
                delay = (delay * 2).min(BACKOFF_CEILING);
                attempt += 1;
            }
            result => return result,
        }
    }
}

fn is_contended(err: &HoustonError) -> bool {
    matches!(
        err,
        HoustonError::RusqliteError(rusqlite::Error::SqliteFailure(failure, _))
            if matches!(failure.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Process-wide pool.
pub fn global_pool() -> &'static BinPool {
    static POOL: OnceLock<BinPool> = OnceLock::new();
    POOL.get_or_init(BinPool::default)
}
