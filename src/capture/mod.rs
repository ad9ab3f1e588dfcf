//! Internal capture steps run against the acquired page once every external
//! probe has finished: a screenshot and a saved copy of the page.

pub mod page;
pub mod screenshot;

pub use page::PageSaver;
pub use screenshot::{stitch_vertical, CommandScreenshot, FullPageScreenshot, Viewport};

use crate::probes::{ProbeError, ProbeResult};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const SCREENSHOT_DIR: &str = "screenshot";
pub const DOWNLOADS_DIR: &str = "downloads";
pub const PAGE_DIR: &str = "acquisition_page";

/// Archive every file under `source` into the zip at `target`, with paths
/// relative to `source`. Returns the number of files archived.
pub fn zip_directory(source: &Path, target: &Path) -> ProbeResult<usize> {
    let zip_err = |e: zip::result::ZipError| ProbeError::Command {
        command: "zip".to_string(),
        message: e.to_string(),
    };

    let file = File::create(target).map_err(|e| ProbeError::io(e, target))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut count = 0;
    for entry in WalkDir::new(source).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        let Ok(relative) = path.strip_prefix(source) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        // Zip entry names always use forward slashes.
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            writer.add_directory(name, options).map_err(zip_err)?;
        } else if entry.file_type().is_file() {
            let data = std::fs::read(path).map_err(|e| ProbeError::io(e, path))?;
            writer.start_file(name, options).map_err(zip_err)?;
            writer.write_all(&data).map_err(|e| ProbeError::io(e, target))?;
            count += 1;
        }
    }
    writer.finish().map_err(zip_err)?;
    Ok(count)
}

pub(crate) fn dir_has_entries(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
