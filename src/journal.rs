//! Per-acquisition journal
//!
//! Every acquisition keeps its own `acquisition.log` inside the acquisition
//! directory. Entries are timestamped in UTC and mirrored to the process log.
//! The journal is opened by `start()` and closed before hashing, so the
//! manifest covers it.

use crate::errors::{FreezerError, FreezerResult};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const JOURNAL_FILE: &str = "acquisition.log";

pub struct AcquisitionJournal {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl AcquisitionJournal {
    pub fn open(directory: &Path) -> FreezerResult<Self> {
        let path = directory.join(JOURNAL_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| FreezerError::io(e, path.clone()))?;
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        log::info!("{}", message.as_ref());
        self.write("INFO", message.as_ref());
    }

    pub fn warn(&mut self, message: impl AsRef<str>) {
        log::warn!("{}", message.as_ref());
        self.write("WARN", message.as_ref());
    }

    /// Flush and release the file. Later entries only reach the process log.
    pub fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                log::error!("Failed to flush journal {:?}: {}", self.path, e);
            }
        }
    }

    fn write(&mut self, level: &str, message: &str) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let line = format!(
            "{} {:<5} {}\n",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            level,
            message
        );
        if let Err(e) = writer.write_all(line.as_bytes()) {
            log::error!("Failed to write journal {:?}: {}", self.path, e);
        }
    }
}

impl Drop for AcquisitionJournal {
    fn drop(&mut self) {
        self.close();
    }
}
