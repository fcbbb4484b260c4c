//! Shared infrastructure: configuration, errors, identifiers, persistence and
//! progress tracking. The reconciliation pipeline itself lives in `gitstore`.

pub mod asset;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod ids;
pub mod pool;
pub mod progress;
pub mod schemas;
pub mod store;
pub mod time;
