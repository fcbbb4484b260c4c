use crate::core::error;
use crate::core::pool;
use crate::core::schemas;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub fn db_connect(db_path: &str) -> Result<Connection, error::HoustonError> {
    db_connect_pooled(db_path, 5)
}

pub fn db_connect_pooled(
    db_path: &str,
    busy_timeout_secs: u32,
) -> Result<Connection, error::HoustonError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(busy_timeout_secs as u64))
        .map_err(error::HoustonError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(error::HoustonError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(error::HoustonError::RusqliteError)?;
    Ok(conn)
}

pub fn houston_db_path(root: &Path) -> PathBuf {
    root.join(schemas::HOUSTON_DB_NAME)
}

pub fn progress_db_path(root: &Path) -> PathBuf {
    root.join(schemas::PROGRESS_DB_NAME)
}

/// Create both database bins under `root` (idempotent).
pub fn initialize_houston_db(root: &Path) -> Result<(), error::HoustonError> {
    fs::create_dir_all(root).map_err(error::HoustonError::IoError)?;

    apply_schemas(&houston_db_path(root), schemas::HOUSTON_DB_SCHEMAS)?;
    apply_schemas(&progress_db_path(root), schemas::PROGRESS_DB_SCHEMAS)?;

    info!(root = %root.display(), "Houston databases initialized");
    Ok(())
}

fn apply_schemas(db_path: &Path, statements: &[&str]) -> Result<(), error::HoustonError> {
    pool::global_pool().with_write(db_path, |conn| {
        for schema in statements {
            conn.execute(schema, [])?;
        }
        Ok(())
    })
}
