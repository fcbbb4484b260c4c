//! Relational persistence for git stores, assets and progress records.
//!
//! The pipeline talks to persistence only through the [`Catalog`] trait so a
//! deployment can back it with another database. [`SqliteCatalog`] is the
//! shipped implementation.
//!
//! Bulk asset reconciliation runs through [`Catalog::write_assets`]: the closure
//! receives an [`AssetWriter`] bound to one transaction. Every writer call is a
//! single statement, and work finished before the closure fails is still
//! committed, so an interrupted run loses at most the file in flight.

use crate::core::asset::Asset;
use crate::core::db;
use crate::core::error::HoustonError;
use crate::core::pool;
use crate::core::progress::Progress;
use crate::core::store::GitStore;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};

/// Writes issued inside one bulk asset transaction.
pub trait AssetWriter {
    fn store_exists(&self, store_id: &str) -> Result<bool, HoustonError>;
    fn find_by_id(&self, id: &str) -> Result<Option<Asset>, HoustonError>;
    fn find_by_semantic_id(&self, semantic_id: &str) -> Result<Option<Asset>, HoustonError>;
    fn insert_asset(&self, asset: &Asset) -> Result<(), HoustonError>;
    fn update_asset(&self, asset: &Asset) -> Result<(), HoustonError>;
}

pub trait Catalog: Send + Sync {
    fn insert_store(&self, store: &GitStore) -> Result<(), HoustonError>;
    fn get_store(&self, id: &str) -> Result<Option<GitStore>, HoustonError>;
    fn update_store(&self, store: &GitStore) -> Result<(), HoustonError>;
    /// Deletes the store row and, by cascade, its assets.
    fn delete_store(&self, id: &str) -> Result<(), HoustonError>;
    fn list_stores(&self) -> Result<Vec<GitStore>, HoustonError>;

    fn store_exists(&self, id: &str) -> Result<bool, HoustonError> {
        Ok(self.get_store(id)?.is_some())
    }

    fn get_asset(&self, id: &str) -> Result<Option<Asset>, HoustonError>;
    fn list_store_assets(&self, store_id: &str) -> Result<Vec<Asset>, HoustonError>;
    fn delete_asset(&self, id: &str) -> Result<(), HoustonError>;
    fn write_assets(
        &self,
        f: &mut dyn FnMut(&dyn AssetWriter) -> Result<(), HoustonError>,
    ) -> Result<(), HoustonError>;

    fn insert_progress(&self, progress: &Progress) -> Result<(), HoustonError>;
    fn get_progress(&self, id: &str) -> Result<Option<Progress>, HoustonError>;
    fn update_progress(&self, progress: &Progress) -> Result<(), HoustonError>;
    fn delete_progress(&self, id: &str) -> Result<(), HoustonError>;
}

pub struct SqliteCatalog {
    houston_db: PathBuf,
    progress_db: PathBuf,
}

impl SqliteCatalog {
    /// Open (and initialize if needed) the database bins under `root`.
    pub fn open(root: &Path) -> Result<Self, HoustonError> {
        db::initialize_houston_db(root)?;
        Ok(Self {
            houston_db: db::houston_db_path(root),
            progress_db: db::progress_db_path(root),
        })
    }
}

const STORE_COLUMNS: &str = "id, kind, major_type, owner_id, submitter_id, description, commit_id, \
     commit_mime_whitelist_id, commit_houston_api_version, config, progress_id, created_at, updated_at";

const ASSET_COLUMNS: &str = "id, git_store_id, path, stored_path, mime_type, magic_signature, \
     size_bytes, filesystem_xxhash64, filesystem_id, semantic_id, created_at, updated_at";

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, message.into())
}

fn store_from_row(row: &Row<'_>) -> rusqlite::Result<GitStore> {
    let kind: String = row.get(1)?;
    let major_type: String = row.get(2)?;
    let config: String = row.get(9)?;
    Ok(GitStore {
        id: row.get(0)?,
        kind: kind.parse().map_err(|e| conversion_error(1, e))?,
        major_type: major_type.parse().map_err(|e| conversion_error(2, e))?,
        owner_id: row.get(3)?,
        submitter_id: row.get(4)?,
        description: row.get(5)?,
        commit: row.get(6)?,
        commit_mime_whitelist_id: row.get(7)?,
        commit_houston_api_version: row.get(8)?,
        config: serde_json::from_str(&config).map_err(|e| conversion_error(9, e.to_string()))?,
        progress_id: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn asset_from_row(row: &Row<'_>) -> rusqlite::Result<Asset> {
    let size_bytes: i64 = row.get(6)?;
    Ok(Asset {
        id: row.get(0)?,
        git_store_id: row.get(1)?,
        path: row.get(2)?,
        stored_path: row.get(3)?,
        mime_type: row.get(4)?,
        magic_signature: row.get(5)?,
        size_bytes: size_bytes.max(0) as u64,
        filesystem_xxhash64: row.get(7)?,
        filesystem_id: row.get(8)?,
        semantic_id: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn progress_from_row(row: &Row<'_>) -> rusqlite::Result<Progress> {
    let failed: i64 = row.get(3)?;
    Ok(Progress {
        id: row.get(0)?,
        description: row.get(1)?,
        percentage: row.get(2)?,
        failed: failed != 0,
        job_id: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn query_asset(conn: &Connection, column: &str, value: &str) -> Result<Option<Asset>, HoustonError> {
    let sql = format!("SELECT {} FROM assets WHERE {} = ?1", ASSET_COLUMNS, column);
    let asset = conn
        .query_row(&sql, params![value], asset_from_row)
        .optional()?;
    Ok(asset)
}

fn insert_asset_row(conn: &Connection, asset: &Asset) -> Result<(), HoustonError> {
    conn.execute(
        &format!(
            "INSERT INTO assets({}) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            ASSET_COLUMNS
        ),
        params![
            asset.id,
            asset.git_store_id,
            asset.path,
            asset.stored_path,
            asset.mime_type,
            asset.magic_signature,
            asset.size_bytes as i64,
            asset.filesystem_xxhash64,
            asset.filesystem_id,
            asset.semantic_id,
            asset.created_at,
            asset.updated_at,
        ],
    )?;
    Ok(())
}

fn update_asset_row(conn: &Connection, asset: &Asset) -> Result<(), HoustonError> {
    let changed = conn.execute(
        "UPDATE assets SET path = ?2, stored_path = ?3, mime_type = ?4, magic_signature = ?5,
             size_bytes = ?6, filesystem_xxhash64 = ?7, updated_at = ?8
         WHERE id = ?1",
        params![
            asset.id,
            asset.path,
            asset.stored_path,
            asset.mime_type,
            asset.magic_signature,
            asset.size_bytes as i64,
            asset.filesystem_xxhash64,
            asset.updated_at,
        ],
    )?;
    if changed == 0 {
        return Err(HoustonError::NotFound(format!("asset {}", asset.id)));
    }
    Ok(())
}

struct SqliteAssetWriter<'a> {
    conn: &'a Connection,
}

impl AssetWriter for SqliteAssetWriter<'_> {
    fn store_exists(&self, store_id: &str) -> Result<bool, HoustonError> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM git_stores WHERE id = ?1",
                params![store_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn find_by_id(&self, id: &str) -> Result<Option<Asset>, HoustonError> {
        query_asset(self.conn, "id", id)
    }

    fn find_by_semantic_id(&self, semantic_id: &str) -> Result<Option<Asset>, HoustonError> {
        query_asset(self.conn, "semantic_id", semantic_id)
    }

    fn insert_asset(&self, asset: &Asset) -> Result<(), HoustonError> {
        insert_asset_row(self.conn, asset)
    }

    fn update_asset(&self, asset: &Asset) -> Result<(), HoustonError> {
        update_asset_row(self.conn, asset)
    }
}

impl Catalog for SqliteCatalog {
    fn insert_store(&self, store: &GitStore) -> Result<(), HoustonError> {
        let config = serde_json::to_string(&store.config)?;
        pool::global_pool().with_write(&self.houston_db, |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO git_stores({}) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    STORE_COLUMNS
                ),
                params![
                    store.id,
                    store.kind.as_str(),
                    store.major_type.as_str(),
                    store.owner_id,
                    store.submitter_id,
                    store.description,
                    store.commit,
                    store.commit_mime_whitelist_id,
                    store.commit_houston_api_version,
                    config,
                    store.progress_id,
                    store.created_at,
                    store.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    fn get_store(&self, id: &str) -> Result<Option<GitStore>, HoustonError> {
        pool::global_pool().with_read(&self.houston_db, |conn| {
            let sql = format!("SELECT {} FROM git_stores WHERE id = ?1", STORE_COLUMNS);
            Ok(conn.query_row(&sql, params![id], store_from_row).optional()?)
        })
    }

    fn update_store(&self, store: &GitStore) -> Result<(), HoustonError> {
        let config = serde_json::to_string(&store.config)?;
        pool::global_pool().with_write(&self.houston_db, |conn| {
            let changed = conn.execute(
                "UPDATE git_stores SET kind = ?2, major_type = ?3, owner_id = ?4, submitter_id = ?5,
                     description = ?6, commit_id = ?7, commit_mime_whitelist_id = ?8,
                     commit_houston_api_version = ?9, config = ?10, progress_id = ?11, updated_at = ?12
                 WHERE id = ?1",
                params![
                    store.id,
                    store.kind.as_str(),
                    store.major_type.as_str(),
                    store.owner_id,
                    store.submitter_id,
                    store.description,
                    store.commit,
                    store.commit_mime_whitelist_id,
                    store.commit_houston_api_version,
                    config,
                    store.progress_id,
                    store.updated_at,
                ],
            )?;
            if changed == 0 {
                return Err(HoustonError::StoreVanished(store.id.clone()));
            }
            Ok(())
        })
    }

    fn delete_store(&self, id: &str) -> Result<(), HoustonError> {
        pool::global_pool().with_write(&self.houston_db, |conn| {
            conn.execute("DELETE FROM git_stores WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    fn list_stores(&self) -> Result<Vec<GitStore>, HoustonError> {
        pool::global_pool().with_read(&self.houston_db, |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM git_stores ORDER BY id",
                STORE_COLUMNS
            ))?;
            let rows = stmt.query_map([], store_from_row)?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
    }

    fn get_asset(&self, id: &str) -> Result<Option<Asset>, HoustonError> {
        pool::global_pool().with_read(&self.houston_db, |conn| query_asset(conn, "id", id))
    }

    fn list_store_assets(&self, store_id: &str) -> Result<Vec<Asset>, HoustonError> {
        pool::global_pool().with_read(&self.houston_db, |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM assets WHERE git_store_id = ?1 ORDER BY id",
                ASSET_COLUMNS
            ))?;
            let rows = stmt.query_map(params![store_id], asset_from_row)?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
    }

    fn delete_asset(&self, id: &str) -> Result<(), HoustonError> {
        pool::global_pool().with_write(&self.houston_db, |conn| {
            conn.execute("DELETE FROM assets WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    fn write_assets(
        &self,
        f: &mut dyn FnMut(&dyn AssetWriter) -> Result<(), HoustonError>,
    ) -> Result<(), HoustonError> {
        pool::global_pool().with_write(&self.houston_db, |conn| {
            let tx = conn.unchecked_transaction()?;
            let result = {
                let writer = SqliteAssetWriter { conn: &tx };
                f(&writer)
            };
            tx.commit()?;
            result
        })
    }

    fn insert_progress(&self, progress: &Progress) -> Result<(), HoustonError> {
        pool::global_pool().with_write(&self.progress_db, |conn| {
            conn.execute(
                "INSERT INTO progress(id, description, percentage, failed, job_id, created_at, updated_at)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    progress.id,
                    progress.description,
                    progress.percentage,
                    progress.failed as i64,
                    progress.job_id,
                    progress.created_at,
                    progress.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    fn get_progress(&self, id: &str) -> Result<Option<Progress>, HoustonError> {
        pool::global_pool().with_read(&self.progress_db, |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, description, percentage, failed, job_id, created_at, updated_at
                     FROM progress WHERE id = ?1",
                    params![id],
                    progress_from_row,
                )
                .optional()?)
        })
    }

    fn update_progress(&self, progress: &Progress) -> Result<(), HoustonError> {
        pool::global_pool().with_write(&self.progress_db, |conn| {
            conn.execute(
                "UPDATE progress SET description = ?2, percentage = ?3, failed = ?4, job_id = ?5,
                     updated_at = ?6
                 WHERE id = ?1",
                params![
                    progress.id,
                    progress.description,
                    progress.percentage,
                    progress.failed as i64,
                    progress.job_id,
                    progress.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    fn delete_progress(&self, id: &str) -> Result<(), HoustonError> {
        pool::global_pool().with_write(&self.progress_db, |conn| {
            conn.execute("DELETE FROM progress WHERE id = ?1", params![id])?;
            Ok(())
        })
    }
}
