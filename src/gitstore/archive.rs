//! Archive realization.
//!
//! Archives found in `_uploads/` are reported as deferred: they are neither
//! expanded nor reconciled into assets by this crate. Each one is inspected
//! as far as its format allows without unpacking: zip entry names and sizes
//! come from the central directory, gzip's expanded size from its trailer.
//! The entry-path and expansion guards are applied to what was listed, and an
//! unpacker must apply the same guards to every entry it writes.

use crate::core::error::HoustonError;
use crate::gitstore::layout::{self, StoreLayout};
use crate::gitstore::sniff;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub const ARCHIVE_MIME_TYPES: &[&str] = &[
    "application/gzip",
    "application/x-rar",
    "application/x-7z-compressed",
    "application/x-bzip",
    "application/x-bzip2",
    "application/x-tar",
    "application/zip",
];

/// Total expanded size may not exceed this multiple of the archive size.
pub const MAX_EXPANSION_RATIO: u64 = 100;
/// Hard cap on total expanded bytes per archive.
pub const MAX_EXPANDED_BYTES: u64 = 8 * 1024 * 1024 * 1024;

const ZIP_EOCD_SIGNATURE: &[u8] = b"PK\x05\x06";
const ZIP_CENTRAL_SIGNATURE: &[u8] = b"PK\x01\x02";
const ZIP_EOCD_LEN: usize = 22;
const ZIP_CENTRAL_LEN: usize = 46;
const GZIP_MIN_LEN: u64 = 18;

pub fn is_archive_mime(mime_type: &str) -> bool {
    ARCHIVE_MIME_TYPES.contains(&mime_type)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inspection {
    /// Contents listed and within both guards.
    Listed { entries: usize, expanded_bytes: u64 },
    /// Format whose contents are not listed without unpacking.
    Unlisted,
    /// Listing failed or an entry broke a guard; an unpacker must skip it.
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredArchive {
    pub path: PathBuf,
    pub mime_type: String,
    pub size_bytes: u64,
    pub inspection: Inspection,
}

/// Scan `_uploads/` for archives. Returns them sorted by path.
pub fn realize_archives(layout: &StoreLayout) -> Result<Vec<DeferredArchive>, HoustonError> {
    let mut found = Vec::new();
    for entry in WalkDir::new(layout.uploads()).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if layout::is_hidden(&name) {
            continue;
        }
        let Ok(sniffed) = sniff::sniff_file(entry.path()) else {
            continue;
        };
        if !is_archive_mime(&sniffed.mime_type) {
            continue;
        }
        let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let inspection = inspect(entry.path(), &sniffed.mime_type, size_bytes);
        if let Inspection::Rejected(reason) = &inspection {
            warn!(path = %entry.path().display(), reason = %reason, "Archive rejected");
        }
        found.push(DeferredArchive {
            path: entry.path().to_path_buf(),
            mime_type: sniffed.mime_type,
            size_bytes,
            inspection,
        });
    }
    if !found.is_empty() {
        info!(
            archives = found.len(),
            root = %layout.root().display(),
            "Archive uploads found, expansion deferred"
        );
    }
    Ok(found)
}

fn inspect(path: &Path, mime_type: &str, size_bytes: u64) -> Inspection {
    let listed = match mime_type {
        "application/zip" => zip_entries(path, size_bytes),
        "application/gzip" => gzip_expanded_size(path, size_bytes).map(|n| vec![(String::new(), n)]),
        _ => return Inspection::Unlisted,
    };
    let entries = match listed {
        Ok(entries) => entries,
        Err(reason) => return Inspection::Rejected(reason),
    };

    let dest = path.parent().unwrap_or(Path::new(""));
    let mut expanded_bytes = 0u64;
    for (name, size) in &entries {
        // gzip carries a single unnamed member
        if !name.is_empty()
            && let Err(e) = safe_entry_path(dest, name)
        {
            return Inspection::Rejected(e.to_string());
        }
        expanded_bytes = expanded_bytes.saturating_add(*size);
    }
    if let Err(e) = check_expansion(size_bytes, expanded_bytes) {
        return Inspection::Rejected(e.to_string());
    }
    Inspection::Listed {
        entries: entries.len(),
        expanded_bytes,
    }
}

fn read_at(file: &mut File, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

fn u16_at(bytes: &[u8], at: usize) -> usize {
    u16::from_le_bytes([bytes[at], bytes[at + 1]]) as usize
}

fn u32_at(bytes: &[u8], at: usize) -> u64 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]) as u64
}

/// Entry names and declared uncompressed sizes from the zip central directory.
fn zip_entries(path: &Path, len: u64) -> Result<Vec<(String, u64)>, String> {
    let mut file = File::open(path).map_err(|e| e.to_string())?;
    let search = len.min((ZIP_EOCD_LEN + u16::MAX as usize) as u64);
    let tail = read_at(&mut file, len - search, search as usize).map_err(|e| e.to_string())?;
    let eocd = tail
        .windows(ZIP_EOCD_SIGNATURE.len())
        .rposition(|w| w == ZIP_EOCD_SIGNATURE)
        .filter(|&at| at + ZIP_EOCD_LEN <= tail.len())
        .ok_or_else(|| "zip central directory not found".to_string())?;
    let record = &tail[eocd..];
    let count = u16_at(record, 10);
    let directory_len = u32_at(record, 12);
    let directory_offset = u32_at(record, 16);
    if directory_offset.saturating_add(directory_len) > len {
        return Err("zip central directory out of bounds".to_string());
    }

    let directory = read_at(&mut file, directory_offset, directory_len as usize)
        .map_err(|e| e.to_string())?;
    let mut entries = Vec::with_capacity(count);
    let mut at = 0usize;
    for _ in 0..count {
        if at + ZIP_CENTRAL_LEN > directory.len()
            || &directory[at..at + 4] != ZIP_CENTRAL_SIGNATURE
        {
            return Err("malformed zip central directory".to_string());
        }
        let expanded = u32_at(&directory, at + 24);
        let name_end = at + ZIP_CENTRAL_LEN + u16_at(&directory, at + 28);
        if name_end > directory.len() {
            return Err("malformed zip central directory".to_string());
        }
        let name = String::from_utf8_lossy(&directory[at + ZIP_CENTRAL_LEN..name_end]).into_owned();
        entries.push((name, expanded));
        at = name_end + u16_at(&directory, at + 30) + u16_at(&directory, at + 32);
    }
    Ok(entries)
}

/// Expanded size from the gzip trailer (modulo 2^32, as the format stores it).
fn gzip_expanded_size(path: &Path, len: u64) -> Result<u64, String> {
    if len < GZIP_MIN_LEN {
        return Err("truncated gzip stream".to_string());
    }
    let mut file = File::open(path).map_err(|e| e.to_string())?;
    let trailer = read_at(&mut file, len - 4, 4).map_err(|e| e.to_string())?;
    Ok(u32_at(&trailer, 0))
}

/// Resolve an archive entry name against `dest`, rejecting absolute names and
/// any `..` that would escape it.
pub fn safe_entry_path(dest: &Path, entry_name: &str) -> Result<PathBuf, HoustonError> {
    let entry = Path::new(entry_name);
    let mut out = dest.to_path_buf();
    let mut depth = 0usize;
    for component in entry.components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(HoustonError::PathError(format!(
                        "archive entry escapes destination: {}",
                        entry_name
                    )));
                }
                out.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(HoustonError::PathError(format!(
                    "absolute archive entry: {}",
                    entry_name
                )));
            }
        }
    }
    if depth == 0 {
        return Err(HoustonError::PathError(format!(
            "empty archive entry: {:?}",
            entry_name
        )));
    }
    Ok(out)
}

/// Reject an archive whose declared expansion is out of bounds.
pub fn check_expansion(archive_bytes: u64, expanded_bytes: u64) -> Result<(), HoustonError> {
    if expanded_bytes > MAX_EXPANDED_BYTES {
        return Err(HoustonError::ValidationError(format!(
            "archive expands to {} bytes (cap {})",
            expanded_bytes, MAX_EXPANDED_BYTES
        )));
    }
    let allowed = archive_bytes.max(1).saturating_mul(MAX_EXPANSION_RATIO);
    if expanded_bytes > allowed {
        return Err(HoustonError::ValidationError(format!(
            "archive expansion ratio exceeds {}x ({} -> {} bytes)",
            MAX_EXPANSION_RATIO, archive_bytes, expanded_bytes
        )));
    }
    Ok(())
}
