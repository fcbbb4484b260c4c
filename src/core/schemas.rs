//! Database schema definitions.
//!
//! Houston keeps its records in two SQLite databases ("bins") under the
//! project database path:
//! 1. houston.db: git_stores (one row per storage container) and assets (one row
//!    per reconciled file, keyed for de-duplication by `semantic_id`).
//! 2. progress.db: percentage trackers polled by asynchronous callers. Kept in
//!    its own file so progress writes never wait on a reconciliation holding the
//!    houston.db write lock.

pub const HOUSTON_DB_NAME: &str = "houston.db";
pub const PROGRESS_DB_NAME: &str = "progress.db";

pub const PROGRESS_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS progress (
        id TEXT PRIMARY KEY,
        description TEXT NOT NULL,
        percentage REAL NOT NULL DEFAULT 0,
        failed INTEGER NOT NULL DEFAULT 0,
        job_id TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";

pub const GIT_STORES_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS git_stores (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        major_type TEXT NOT NULL DEFAULT 'unknown',
        owner_id TEXT NOT NULL,
        submitter_id TEXT,
        description TEXT,
        commit_id TEXT UNIQUE,
        commit_mime_whitelist_id TEXT,
        commit_houston_api_version TEXT,
        config TEXT NOT NULL DEFAULT '{}',
        progress_id TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";
pub const GIT_STORES_DB_SCHEMA_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_git_stores_major_type ON git_stores(major_type)";

pub const ASSETS_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS assets (
        id TEXT PRIMARY KEY,
        git_store_id TEXT NOT NULL REFERENCES git_stores(id) ON DELETE CASCADE,
        path TEXT NOT NULL,
        stored_path TEXT NOT NULL,
        mime_type TEXT NOT NULL,
        magic_signature TEXT NOT NULL,
        size_bytes INTEGER NOT NULL,
        filesystem_xxhash64 TEXT NOT NULL,
        filesystem_id TEXT NOT NULL,
        semantic_id TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";
pub const ASSETS_DB_SCHEMA_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_assets_git_store ON assets(git_store_id)";

/// Statements applied in order when houston.db is initialized.
pub const HOUSTON_DB_SCHEMAS: &[&str] = &[
    GIT_STORES_DB_SCHEMA,
    GIT_STORES_DB_SCHEMA_INDEX,
    ASSETS_DB_SCHEMA,
    ASSETS_DB_SCHEMA_INDEX,
];

pub const PROGRESS_DB_SCHEMAS: &[&str] = &[PROGRESS_DB_SCHEMA];
