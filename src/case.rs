//! Case directory layout
//!
//! `<cases_root>/<case_name>/<acquisition_type>/acquisition_N`, with N
//! allocated one past the highest existing suffix.

use crate::errors::{FreezerError, FreezerResult};
use crate::models::AcquisitionType;
use std::path::{Component, Path, PathBuf};

const ACQUISITION_PREFIX: &str = "acquisition_";

pub struct CaseDirectory {
    cases_root: PathBuf,
}

impl CaseDirectory {
    pub fn new(cases_root: impl Into<PathBuf>) -> Self {
        Self {
            cases_root: cases_root.into(),
        }
    }

    pub fn cases_root(&self) -> &Path {
        &self.cases_root
    }

    /// Allocate and create a fresh `acquisition_N` folder.
    pub fn create_acquisition_directory(
        &self,
        acquisition_type: AcquisitionType,
        case_name: &str,
        target_identifier: &str,
    ) -> FreezerResult<PathBuf> {
        check_case_name(&self.cases_root, case_name)?;
        let type_dir = self
            .cases_root
            .join(case_name)
            .join(acquisition_type.to_string());

        std::fs::create_dir_all(&type_dir).map_err(|source| FreezerError::AcquisitionDirectory {
            root: type_dir.clone(),
            source,
        })?;

        let mut index = next_acquisition_index(&type_dir)?;
        loop {
            let candidate = type_dir.join(format!("{}{}", ACQUISITION_PREFIX, index));
            match std::fs::create_dir(&candidate) {
                Ok(()) => {
                    log::info!(
                        "Created acquisition directory {:?} for target {}",
                        candidate,
                        target_identifier
                    );
                    return Ok(candidate);
                }
                // Another process took this index between the scan and the create.
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => index += 1,
                Err(source) => {
                    return Err(FreezerError::AcquisitionDirectory {
                        root: type_dir,
                        source,
                    })
                }
            }
        }
    }

    /// Names of the case folders under the cases root.
    pub fn list_cases(&self) -> FreezerResult<Vec<String>> {
        if !self.cases_root.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.cases_root)
            .map_err(|e| FreezerError::io(e, self.cases_root.clone()))?;

        let mut cases: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        cases.sort();
        Ok(cases)
    }
}

/// A case name must be one plain path component, so the acquisition stays
/// under the cases root.
fn check_case_name(cases_root: &Path, case_name: &str) -> FreezerResult<()> {
    let mut components = Path::new(case_name).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(name)), None) if name == case_name
    );
    if single_normal && !case_name.contains(['/', '\\']) {
        return Ok(());
    }
    Err(FreezerError::AcquisitionDirectory {
        root: cases_root.to_path_buf(),
        source: std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("case name {:?} is not a single folder name", case_name),
        ),
    })
}

fn next_acquisition_index(type_dir: &Path) -> FreezerResult<u64> {
    let entries = std::fs::read_dir(type_dir).map_err(|e| FreezerError::io(e, type_dir.to_path_buf()))?;

    let highest = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix(ACQUISITION_PREFIX))
                .and_then(|suffix| suffix.parse::<u64>().ok())
        })
        .max()
        .unwrap_or(0);

    Ok(highest + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_first_acquisition_is_one() -> Result<(), Box<dyn std::error::Error>> {
        let root = TempDir::new()?;
        let cases = CaseDirectory::new(root.path());
        let dir = cases.create_acquisition_directory(AcquisitionType::Web, "acme", "https://example.com")?;
        assert!(dir.ends_with("acme/web/acquisition_1"));
        assert!(dir.is_dir());
        Ok(())
    }

    #[test]
    fn test_instagram_numbers_separately_from_web() -> Result<(), Box<dyn std::error::Error>> {
        let root = TempDir::new()?;
        let cases = CaseDirectory::new(root.path());
        cases.create_acquisition_directory(AcquisitionType::Web, "acme", "https://example.com")?;
        let dir = cases.create_acquisition_directory(AcquisitionType::Instagram, "acme", "https://instagram.com/acme")?;
        assert!(dir.ends_with("acme/instagram/acquisition_1"));
        Ok(())
    }

    #[test]
    fn test_next_after_existing_five_is_six() -> Result<(), Box<dyn std::error::Error>> {
        let root = TempDir::new()?;
        let type_dir = root.path().join("acme").join("web");
        for i in 1..=5 {
            std::fs::create_dir_all(type_dir.join(format!("acquisition_{}", i)))?;
        }
        let cases = CaseDirectory::new(root.path());
        let dir = cases.create_acquisition_directory(AcquisitionType::Web, "acme", "https://example.com")?;
        assert_eq!(dir, type_dir.join("acquisition_6"));
        Ok(())
    }

    #[test]
    fn test_gaps_and_foreign_folders_are_ignored() -> Result<(), Box<dyn std::error::Error>> {
        let root = TempDir::new()?;
        let type_dir = root.path().join("acme").join("web");
        std::fs::create_dir_all(type_dir.join("acquisition_2"))?;
        std::fs::create_dir_all(type_dir.join("acquisition_9"))?;
        std::fs::create_dir_all(type_dir.join("notes"))?;
        std::fs::write(type_dir.join("acquisition_40"), b"not a folder")?;

        let cases = CaseDirectory::new(root.path());
        let dir = cases.create_acquisition_directory(AcquisitionType::Web, "acme", "x")?;
        assert_eq!(dir, type_dir.join("acquisition_10"));
        Ok(())
    }

    #[test]
    fn test_case_name_cannot_leave_cases_root() -> Result<(), Box<dyn std::error::Error>> {
        let root = TempDir::new()?;
        let cases_root = root.path().join("cases");
        let cases = CaseDirectory::new(&cases_root);

        for name in ["../escaped", "/abs", "a/b", "..", ".", "", "a\\..\\b"] {
            let err = cases
                .create_acquisition_directory(AcquisitionType::Web, name, "t")
                .unwrap_err();
            assert!(matches!(err, FreezerError::AcquisitionDirectory { .. }), "{:?} accepted", name);
        }
        assert!(!root.path().join("escaped").exists());
        assert!(!cases_root.exists());

        let dir = cases.create_acquisition_directory(AcquisitionType::Web, "rossi v. bianchi", "t")?;
        assert!(dir.starts_with(&cases_root));
        Ok(())
    }

    #[test]
    fn test_list_cases() -> Result<(), Box<dyn std::error::Error>> {
        let root = TempDir::new()?;
        std::fs::create_dir_all(root.path().join("beta"))?;
        std::fs::create_dir_all(root.path().join("alpha"))?;
        std::fs::write(root.path().join("readme.txt"), b"")?;

        let cases = CaseDirectory::new(root.path());
        assert_eq!(cases.list_cases()?, vec!["alpha".to_string(), "beta".to_string()]);
        Ok(())
    }
}
