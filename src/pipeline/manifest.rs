//! `manifest.json`: digests of every artifact of an acquisition, and the
//! check that a case folder still matches them.

use crate::errors::{FreezerError, FreezerResult};
use crate::utils::{FileDigests, HashComputer, HashStrategy};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Files produced after hashing, never listed in the manifest.
const EXCLUDED: &[&str] = &[MANIFEST_FILE, "report.pdf", "report.html"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the acquisition directory, `/`-separated.
    pub path: String,
    pub size: u64,
    #[serde(flatten)]
    pub digests: FileDigests,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub generated_at: DateTime<Utc>,
    pub primary_algorithm: String,
    pub entries: Vec<ManifestEntry>,
}

/// Result of checking a folder against its manifest.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub verified: usize,
    pub missing: Vec<String>,
    pub mismatched: Vec<String>,
    /// Files present in the folder but not listed in the manifest.
    pub unlisted: Vec<String>,
}

impl Verification {
    pub fn is_intact(&self) -> bool {
        self.missing.is_empty() && self.mismatched.is_empty() && self.unlisted.is_empty()
    }
}

impl Manifest {
    /// Hash every file under `directory`. Any entry that cannot be walked
    /// fails the manifest rather than being left out of it.
    pub fn build(directory: &Path) -> FreezerResult<Self> {
        Self::build_with(directory, HashStrategy::Mapped)
    }

    pub fn build_with(directory: &Path, strategy: HashStrategy) -> FreezerResult<Self> {
        let files = artifact_files(directory)?;
        let entries = files
            .par_iter()
            .map(|(name, path)| {
                let size = std::fs::metadata(path)
                    .map_err(|e| FreezerError::io(e, path.clone()))?
                    .len();
                Ok(ManifestEntry {
                    path: name.clone(),
                    size,
                    digests: HashComputer::hash_file_with(path, strategy)?,
                })
            })
            .collect::<FreezerResult<Vec<_>>>()?;

        log::debug!("Hashed {} files under {:?}", entries.len(), directory);
        Ok(Self {
            generated_at: Utc::now(),
            primary_algorithm: "sha256".to_string(),
            entries,
        })
    }

    pub fn write(&self, directory: &Path) -> FreezerResult<PathBuf> {
        let path = directory.join(MANIFEST_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(self)?).map_err(|e| FreezerError::io(e, path.clone()))?;
        Ok(path)
    }

    pub fn load(directory: &Path) -> FreezerResult<Self> {
        let path = directory.join(MANIFEST_FILE);
        let raw = std::fs::read_to_string(&path).map_err(|e| FreezerError::io(e, path))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// Re-hash every entry under `directory` and compare, then look for
    /// files the manifest does not list.
    pub fn verify(&self, directory: &Path) -> FreezerResult<Verification> {
        let outcomes: Vec<(&str, Option<bool>)> = self
            .entries
            .par_iter()
            .map(|entry| {
                let path = directory.join(&entry.path);
                let outcome = match HashComputer::hash_file(&path) {
                    Ok(digests) => Some(digests == entry.digests),
                    Err(_) => None,
                };
                (entry.path.as_str(), outcome)
            })
            .collect();

        let mut report = Verification::default();
        for (name, outcome) in outcomes {
            match outcome {
                Some(true) => report.verified += 1,
                Some(false) => report.mismatched.push(name.to_string()),
                None => report.missing.push(name.to_string()),
            }
        }

        let listed: HashSet<&str> = self.entries.iter().map(|e| e.path.as_str()).collect();
        report.unlisted = artifact_files(directory)?
            .into_iter()
            .map(|(name, _)| name)
            .filter(|name| !listed.contains(name.as_str()))
            .collect();
        Ok(report)
    }
}

/// Load the manifest of `directory` and verify the folder against it.
pub fn verify(directory: &Path) -> FreezerResult<Verification> {
    Manifest::load(directory)?.verify(directory)
}

/// Every regular file under `directory` except those written after hashing,
/// sorted by path. Symbolic links are followed.
fn artifact_files(directory: &Path) -> FreezerResult<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(directory).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf);
            FreezerError::io(e.into(), path)
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(relative) = relative_name(directory, entry.path()) {
            if !EXCLUDED.contains(&relative.as_str()) {
                files.push((relative, entry.into_path()));
            }
        }
    }
    Ok(files)
}

fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    Some(
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
    )
}
