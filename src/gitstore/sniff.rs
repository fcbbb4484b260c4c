//! Content sniffing: MIME type and a human-readable format signature from
//! the leading bytes of a file.

use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Bytes read from the head of a file; enough for every signature below
/// including the tar magic at offset 257.
const SNIFF_LEN: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sniffed {
    pub mime_type: String,
    pub signature: String,
}

impl Sniffed {
    fn new(mime_type: &str, signature: &str) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            signature: signature.to_string(),
        }
    }
}

pub fn sniff_file(path: &Path) -> std::io::Result<Sniffed> {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    File::open(path)?
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut head)?;
    Ok(sniff_bytes(&head))
}

pub fn sniff_bytes(head: &[u8]) -> Sniffed {
    if head.is_empty() {
        return Sniffed::new("inode/x-empty", "empty");
    }
    if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Sniffed::new("image/jpeg", "JPEG image data");
    }
    if head.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Sniffed::new("image/png", "PNG image data");
    }
    if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        return Sniffed::new("image/gif", "GIF image data");
    }
    if head.starts_with(b"II*\0") || head.starts_with(b"MM\0*") {
        return Sniffed::new("image/tiff", "TIFF image data");
    }
    if head.starts_with(b"BM") && head.len() >= 14 {
        return Sniffed::new("image/bmp", "PC bitmap");
    }
    if head.len() >= 12 && &head[0..4] == b"RIFF" {
        match &head[8..12] {
            b"WEBP" => return Sniffed::new("image/webp", "RIFF (little-endian) data, Web/P image"),
            b"AVI " => return Sniffed::new("video/x-msvideo", "RIFF (little-endian) data, AVI"),
            _ => {}
        }
    }
    if head.len() >= 12 && &head[4..8] == b"ftyp" {
        let brand = &head[8..12];
        return match brand {
            b"heic" | b"heix" | b"mif1" | b"msf1" => Sniffed::new("image/heic", "ISO Media, HEIF Image"),
            b"qt  " => Sniffed::new("video/quicktime", "ISO Media, Apple QuickTime movie"),
            _ => Sniffed::new("video/mp4", "ISO Media, MP4 video"),
        };
    }
    if head.starts_with(b"%PDF-") {
        return Sniffed::new("application/pdf", "PDF document");
    }
    if head.starts_with(b"PK\x03\x04") || head.starts_with(b"PK\x05\x06") {
        return Sniffed::new("application/zip", "Zip archive data");
    }
    if head.starts_with(&[0x1F, 0x8B]) {
        return Sniffed::new("application/gzip", "gzip compressed data");
    }
    if head.starts_with(b"BZh") {
        return Sniffed::new("application/x-bzip2", "bzip2 compressed data");
    }
    if head.starts_with(&[b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C]) {
        return Sniffed::new("application/x-7z-compressed", "7-zip archive data");
    }
    if head.starts_with(b"Rar!\x1a\x07") {
        return Sniffed::new("application/x-rar", "RAR archive data");
    }
    if head.len() >= 262 && &head[257..262] == b"ustar" {
        return Sniffed::new("application/x-tar", "POSIX tar archive");
    }
    if looks_like_text(head) {
        return Sniffed::new("text/plain", "ASCII text");
    }
    Sniffed::new("application/octet-stream", "data")
}

fn looks_like_text(head: &[u8]) -> bool {
    // A truncated multi-byte sequence at the end of the window is fine.
    let valid = match std::str::from_utf8(head) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    };
    valid
        && !head
            .iter()
            .any(|&b| b < 0x09 || ((0x0E..0x20).contains(&b) && b != 0x1B))
}
