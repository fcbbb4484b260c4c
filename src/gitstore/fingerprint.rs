//! Content fingerprints and the identities derived from them.
//!
//! The filesystem id depends only on file content; the semantic id binds that
//! content to one store, so the same bytes uploaded twice to a store collapse
//! into one asset while other stores keep their own.

use crate::core::error::HoustonError;
use crate::core::ids;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use xxhash_rust::xxh64::Xxh64;

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// xxHash64 digest as 16 lowercase hex digits.
    pub xxhash64: String,
    pub filesystem_id: String,
    pub semantic_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintOutcome {
    Hashed(Fingerprint),
    Failed { path: PathBuf, error: String },
}

pub fn xxhash64_file(path: &Path) -> std::io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Xxh64::new(0);
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:016x}", hasher.digest()))
}

pub fn filesystem_id(xxhash64: &str) -> String {
    ids::stable_id(xxhash64)
}

pub fn semantic_id(store_id: &str, filesystem_id: &str) -> String {
    ids::stable_id_of_parts(&[store_id, filesystem_id])
}

pub fn fingerprint_file(path: &Path, store_id: &str) -> FingerprintOutcome {
    match xxhash64_file(path) {
        Ok(xxhash64) => {
            let filesystem_id = filesystem_id(&xxhash64);
            let semantic_id = semantic_id(store_id, &filesystem_id);
            FingerprintOutcome::Hashed(Fingerprint {
                xxhash64,
                filesystem_id,
                semantic_id,
            })
        }
        Err(e) => FingerprintOutcome::Failed {
            path: path.to_path_buf(),
            error: e.to_string(),
        },
    }
}

/// Fingerprint `paths` on a dedicated pool of `workers` threads. Output order
/// matches input order; a failing file yields `Failed` without stopping the rest.
pub fn fingerprint_files(
    paths: &[PathBuf],
    store_id: &str,
    workers: usize,
) -> Result<Vec<FingerprintOutcome>, HoustonError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("houston-fingerprint-{}", i))
        .build()?;
    Ok(pool.install(|| {
        paths
            .par_iter()
            .map(|path| fingerprint_file(path, store_id))
            .collect()
    }))
}
