use crate::errors::{FreezerError, FreezerResult};
use memmap2::Mmap;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Digests recorded for every artifact. SHA-256 is the primary one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDigests {
    pub md5: String,
    pub sha256: String,
    pub sha3_256: String,
    pub blake3: String,
}

/// How file contents reach the hashers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashStrategy {
    /// Memory-map the file. Only for files nothing is writing to.
    Mapped,
    /// Read through a buffer; safe while another thread may still write.
    Streamed,
}

struct Hashers {
    md5: md5::Md5,
    sha256: sha2::Sha256,
    sha3: sha3::Sha3_256,
    blake3: blake3::Hasher,
}

impl Hashers {
    fn new() -> Self {
        use md5::Digest;
        Self {
            md5: md5::Md5::new(),
            sha256: sha2::Sha256::new(),
            sha3: sha3::Sha3_256::new(),
            blake3: blake3::Hasher::new(),
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        use md5::Digest;
        self.md5.update(chunk);
        self.sha256.update(chunk);
        self.sha3.update(chunk);
        self.blake3.update(chunk);
    }

    fn finish(self) -> FileDigests {
        use md5::Digest;
        FileDigests {
            md5: hex::encode(self.md5.finalize()),
            sha256: hex::encode(self.sha256.finalize()),
            sha3_256: hex::encode(self.sha3.finalize()),
            blake3: hex::encode(self.blake3.finalize().as_bytes()),
        }
    }
}

const CHUNK_SIZE: usize = 8192;

/// Memory-efficient hash computation using memory mapping
pub struct HashComputer;

impl HashComputer {
    pub fn hash_file(path: &Path) -> FreezerResult<FileDigests> {
        Self::hash_file_with(path, HashStrategy::Mapped)
    }

    pub fn hash_file_with(path: &Path, strategy: HashStrategy) -> FreezerResult<FileDigests> {
        match strategy {
            HashStrategy::Mapped => Self::hash_mapped(path),
            HashStrategy::Streamed => Self::hash_streamed(path),
        }
    }

    fn hash_streamed(path: &Path) -> FreezerResult<FileDigests> {
        let file = File::open(path).map_err(|e| FreezerError::io(e, path.to_path_buf()))?;
        let mut reader = BufReader::new(file);
        let mut hashers = Hashers::new();
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            let n = reader
                .read(&mut buf)
                .map_err(|e| FreezerError::io(e, path.to_path_buf()))?;
            if n == 0 {
                return Ok(hashers.finish());
            }
            hashers.update(&buf[..n]);
        }
    }

    fn hash_mapped(path: &Path) -> FreezerResult<FileDigests> {
        let file = File::open(path).map_err(|e| FreezerError::io(e, path.to_path_buf()))?;
        let len = file
            .metadata()
            .map_err(|e| FreezerError::io(e, path.to_path_buf()))?
            .len();

        // Empty files cannot be mapped.
        if len == 0 {
            return Ok(Self::compute_hashes(&[]));
        }

        // SAFETY: callers pick `Mapped` only once every writer to the
        // acquisition directory has returned.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| FreezerError::io(e, path.to_path_buf()))?;
        Ok(Self::compute_hashes(&mmap))
    }

    pub fn compute_hashes(data: &[u8]) -> FileDigests {
        let mut hashers = Hashers::new();
        for chunk in data.chunks(CHUNK_SIZE) {
            hashers.update(chunk);
        }
        hashers.finish()
    }
}

/// Host part of a URL, the way probes address their target.
pub fn host_from_url(url: &str) -> FreezerResult<String> {
    let parsed = Url::parse(url).map_err(|e| FreezerError::InvalidUrl {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    parsed
        .host_str()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
        .ok_or_else(|| FreezerError::InvalidUrl {
            url: url.to_string(),
            message: "no network location in URL".to_string(),
        })
}

/// Make a string safe to use as a single path component.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.chars().take(120).collect()
    }
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;
    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }
    if unit_idx == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", size, UNITS[unit_idx])
    }
}

pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
