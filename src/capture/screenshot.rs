//! Screenshot of the acquired page.
//!
//! Two strategies produce `screenshot.png`:
//! - `CommandScreenshot` delegates to a headless browser command line
//! - `FullPageScreenshot` scrolls a `Viewport`, saves each grab under
//!   `screenshot/full_page/<host>/part_N.png` and stitches them vertically

use super::SCREENSHOT_DIR;
use crate::config::render_command;
use crate::probes::{OneShotProbe, ProbeContext, ProbeError, ProbeResult};
use crate::task::TaskKind;
use crate::utils::sanitize_file_name;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbaImage};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

pub struct CommandScreenshot {
    template: Vec<String>,
    timeout: Duration,
}

impl CommandScreenshot {
    pub fn new(template: Vec<String>, timeout: Duration) -> Self {
        Self { template, timeout }
    }

    fn command_error(&self, message: impl Into<String>) -> ProbeError {
        ProbeError::Command {
            command: self.template.first().cloned().unwrap_or_default(),
            message: message.into(),
        }
    }
}

impl OneShotProbe for CommandScreenshot {
    fn run(&self, ctx: &ProbeContext) -> ProbeResult<PathBuf> {
        let output = ctx.artifact_path(TaskKind::Screenshot);
        let args = render_command(
            &self.template,
            &[("output", &output.display().to_string()), ("url", &ctx.url)],
        );
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| ProbeError::Unsupported("no screenshot command configured".to_string()))?;

        log::debug!("Taking screenshot: {:?}", args);
        let mut child = Command::new(program)
            .args(rest)
            .current_dir(&ctx.directory)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| self.command_error(e.to_string()))?;

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait().map_err(|e| self.command_error(e.to_string()))? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProbeError::Timeout(self.timeout));
            }
            std::thread::sleep(Duration::from_millis(100));
        };

        if !status.success() {
            return Err(self.command_error(format!("exited with {}", status)));
        }
        if !output.exists() {
            return Err(self.command_error(format!("no screenshot written to {}", output.display())));
        }
        Ok(output)
    }
}

/// A scrollable view of the page that can be captured one screen at a time.
pub trait Viewport: Send + Sync {
    /// Total scrollable height of the page, in pixels.
    fn page_height(&self) -> ProbeResult<u32>;

    fn viewport_height(&self) -> ProbeResult<u32>;

    fn scroll_to(&self, y: u32) -> ProbeResult<()>;

    /// Save the visible part of the page as a PNG at `path`.
    fn grab(&self, path: &Path) -> ProbeResult<()>;
}

pub struct FullPageScreenshot<V> {
    viewport: V,
}

impl<V: Viewport> FullPageScreenshot<V> {
    pub fn new(viewport: V) -> Self {
        Self { viewport }
    }
}

impl<V: Viewport> OneShotProbe for FullPageScreenshot<V> {
    fn run(&self, ctx: &ProbeContext) -> ProbeResult<PathBuf> {
        let host = sanitize_file_name(&ctx.host()?);
        let parts_dir = ctx.directory.join(SCREENSHOT_DIR).join("full_page").join(host);
        std::fs::create_dir_all(&parts_dir).map_err(|e| ProbeError::io(e, &parts_dir))?;

        let page_height = self.viewport.page_height()?;
        let step = self.viewport.viewport_height()?.max(1);

        let mut parts = Vec::new();
        let mut y = 0;
        loop {
            self.viewport.scroll_to(y)?;
            let part = parts_dir.join(format!("part_{}.png", parts.len() + 1));
            self.viewport.grab(&part)?;
            parts.push(part);
            y = y.saturating_add(step);
            if y >= page_height {
                break;
            }
        }
        log::debug!("Captured {} viewport grabs", parts.len());
        self.viewport.scroll_to(0)?;

        let output = ctx.artifact_path(TaskKind::Screenshot);
        stitch_vertical(&parts, &output)?;
        Ok(output)
    }
}

/// Stack `parts` top to bottom into one PNG at `output`.
///
/// Every part is resized to the smallest width and height among them so the
/// result is a clean column of equal tiles.
pub fn stitch_vertical(parts: &[PathBuf], output: &Path) -> ProbeResult<()> {
    let image_err = |e: image::ImageError, path: &Path| ProbeError::Command {
        command: "image".to_string(),
        message: format!("{}: {}", path.display(), e),
    };

    let images = parts
        .iter()
        .map(|p| image::open(p).map_err(|e| image_err(e, p)))
        .collect::<ProbeResult<Vec<DynamicImage>>>()?;

    let (width, height) = images
        .iter()
        .map(|img| img.dimensions())
        .min_by_key(|&(w, h)| u64::from(w) * u64::from(h))
        .ok_or_else(|| ProbeError::Unsupported("no screenshot parts to stitch".to_string()))?;

    let mut canvas = RgbaImage::new(width, height.saturating_mul(images.len() as u32));
    for (i, img) in images.iter().enumerate() {
        let tile = if img.dimensions() == (width, height) {
            img.to_rgba8()
        } else {
            img.resize_exact(width, height, FilterType::Triangle).to_rgba8()
        };
        image::imageops::replace(&mut canvas, &tile, 0, i64::from(height) * i as i64);
    }

    canvas.save(output).map_err(|e| image_err(e, output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Page of `tiles` screens, each filled with its own shade.
    struct FakeViewport {
        tiles: u32,
        width: u32,
        height: u32,
        position: Mutex<u32>,
    }

    impl Viewport for FakeViewport {
        fn page_height(&self) -> ProbeResult<u32> {
            Ok(self.tiles * self.height)
        }

        fn viewport_height(&self) -> ProbeResult<u32> {
            Ok(self.height)
        }

        fn scroll_to(&self, y: u32) -> ProbeResult<()> {
            *self.position.lock().unwrap() = y;
            Ok(())
        }

        fn grab(&self, path: &Path) -> ProbeResult<()> {
            let shade = (*self.position.lock().unwrap() / self.height * 60) as u8;
            RgbaImage::from_pixel(self.width, self.height, Rgba([shade, shade, shade, 255]))
                .save(path)
                .map_err(|e| ProbeError::Unsupported(e.to_string()))
        }
    }

    #[test]
    fn test_full_page_screenshot_stitches_every_screen() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let ctx = ProbeContext::new(dir.path(), "https://example.com/", Duration::from_secs(1));
        let probe = FullPageScreenshot::new(FakeViewport {
            tiles: 3,
            width: 40,
            height: 30,
            position: Mutex::new(0),
        });

        let output = probe.run(&ctx)?;
        assert_eq!(output, dir.path().join("screenshot.png"));
        assert!(dir.path().join("screenshot/full_page/example.com/part_3.png").exists());

        let stitched = image::open(&output)?.to_rgba8();
        assert_eq!(stitched.dimensions(), (40, 90));
        assert_eq!(stitched.get_pixel(0, 0)[0], 0);
        assert_eq!(stitched.get_pixel(0, 89)[0], 120);
        Ok(())
    }

    #[test]
    fn test_stitch_resizes_to_smallest_part() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let big = dir.path().join("big.png");
        let small = dir.path().join("small.png");
        RgbaImage::new(80, 60).save(&big)?;
        RgbaImage::new(40, 30).save(&small)?;

        let output = dir.path().join("out.png");
        stitch_vertical(&[big, small], &output)?;
        assert_eq!(image::open(&output)?.dimensions(), (40, 60));
        Ok(())
    }

    #[test]
    fn test_stitch_without_parts_fails() {
        let dir = TempDir::new().unwrap();
        assert!(stitch_vertical(&[], &dir.path().join("out.png")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_screenshot_runs_template() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let template = vec!["sh".to_string(), "-c".to_string(), "echo png > {output}".to_string()];
        let ctx = ProbeContext::new(dir.path(), "https://example.com/", Duration::from_secs(1));
        let path = CommandScreenshot::new(template, Duration::from_secs(5)).run(&ctx)?;
        assert!(path.exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_command_screenshot_times_out() {
        let dir = TempDir::new().unwrap();
        let template = vec!["sleep".to_string(), "5".to_string()];
        let ctx = ProbeContext::new(dir.path(), "https://example.com/", Duration::from_secs(1));
        let err = CommandScreenshot::new(template, Duration::from_millis(200)).run(&ctx).unwrap_err();
        assert!(matches!(err, ProbeError::Timeout(_)));
    }
}
