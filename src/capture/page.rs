//! Saved copy of the acquired page and the resources it links to.
//!
//! The page HTML lands in `acquisition_page/<host>.html` next to the
//! resources it embeds (images, scripts, media, frames, linked stylesheets
//! and icons); navigation links are not followed. The folder is then archived into
//! `acquisition_page.zip` and removed; a non-empty `downloads/` folder gets
//! the same treatment as `downloads.zip`.

use super::{dir_has_entries, zip_directory, DOWNLOADS_DIR, PAGE_DIR};
use crate::probes::headers::{http_client, map_reqwest};
use crate::probes::{write_file, OneShotProbe, ProbeContext, ProbeError, ProbeResult};
use crate::task::TaskKind;
use crate::utils::sanitize_file_name;
use rayon::prelude::*;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Upper bound on linked resources fetched for one page.
const MAX_RESOURCES: usize = 500;

/// `src` of embedding tags, or `href` of `<link>`.
const RESOURCE_PATTERN: &str = r#"(?i)<(?:img|script|source|video|audio|iframe|embed|track)\b[^>]*?\ssrc\s*=\s*["']([^"'#]+)["']|<link\b[^>]*?\shref\s*=\s*["']([^"'#]+)["']"#;

pub struct PageSaver {
    threads: usize,
}

/// Outcome of fetching the linked resources of a page.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResourceStats {
    pub saved: usize,
    pub failed: usize,
}

impl PageSaver {
    pub fn new(threads: usize) -> Self {
        Self { threads: threads.max(1) }
    }

    fn download_all(
        &self,
        ctx: &ProbeContext,
        client: &Client,
        urls: &[Url],
        folder: &Path,
    ) -> ProbeResult<ResourceStats> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|idx| format!("page-resource-{}", idx))
            .build()
            .map_err(|e| ProbeError::Unsupported(e.to_string()))?;

        let results: Vec<bool> = pool.install(|| {
            urls.par_iter()
                .enumerate()
                .filter(|_| !ctx.is_cancelled())
                .map(|(index, url)| match download_resource(client, url, folder, index) {
                    Ok(path) => {
                        log::debug!("Saved resource {} as {:?}", url, path);
                        true
                    }
                    Err(e) => {
                        log::debug!("Resource {} not saved: {}", url, e);
                        false
                    }
                })
                .collect()
        });

        let saved = results.iter().filter(|ok| **ok).count();
        Ok(ResourceStats {
            saved,
            failed: results.len() - saved,
        })
    }

    /// Fetch the page and its resources into `acquisition_page/`, then archive
    /// the folder. The folder only exists between a successful fetch and the
    /// end of this call.
    fn save_page(&self, ctx: &ProbeContext) -> ProbeResult<PathBuf> {
        let host = ctx.host()?;
        let base = Url::parse(&ctx.url).map_err(|e| ProbeError::Network(e.to_string()))?;
        let client = http_client(ctx.timeout)?;
        let html = client
            .get(base.clone())
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.text())
            .map_err(|e| map_reqwest(e, ctx.timeout))?;

        let folder = ctx.directory.join(PAGE_DIR);
        std::fs::create_dir_all(&folder).map_err(|e| ProbeError::io(e, &folder))?;
        let archived = self.fill_and_archive(ctx, &client, &base, &host, &html, &folder);
        let removed = std::fs::remove_dir_all(&folder).map_err(|e| ProbeError::io(e, &folder));
        let archive = archived?;
        removed?;
        Ok(archive)
    }

    fn fill_and_archive(
        &self,
        ctx: &ProbeContext,
        client: &Client,
        base: &Url,
        host: &str,
        html: &str,
        folder: &Path,
    ) -> ProbeResult<PathBuf> {
        write_file(&folder.join(format!("{}.html", sanitize_file_name(host))), html.as_bytes())?;

        let resources = extract_resources(base, html)?;
        let stats = self.download_all(ctx, client, &resources, folder)?;
        log::info!(
            "Saved page {} with {} resources ({} failed)",
            ctx.url,
            stats.saved,
            stats.failed
        );

        let archive = ctx.artifact_path(TaskKind::SavePage);
        zip_directory(folder, &archive)?;
        Ok(archive)
    }
}

impl OneShotProbe for PageSaver {
    fn run(&self, ctx: &ProbeContext) -> ProbeResult<PathBuf> {
        let saved = self.save_page(ctx);
        // Downloads are archived whether or not the page itself was saved.
        let downloads = archive_downloads(&ctx.directory);
        let archive = saved?;
        downloads?;
        Ok(archive)
    }
}

/// Archive `downloads/` into `downloads.zip` when it holds anything. The
/// folder is removed either way.
pub fn archive_downloads(directory: &Path) -> ProbeResult<Option<PathBuf>> {
    let downloads = directory.join(DOWNLOADS_DIR);
    if !downloads.is_dir() {
        return Ok(None);
    }
    let archive = if dir_has_entries(&downloads) {
        let target = directory.join(format!("{}.zip", DOWNLOADS_DIR));
        zip_directory(&downloads, &target)?;
        Some(target)
    } else {
        None
    };
    std::fs::remove_dir_all(&downloads).map_err(|e| ProbeError::io(e, &downloads))?;
    Ok(archive)
}

/// Absolute http(s) URLs of the resources embedded by `html`, deduplicated
/// in document order. Anchors and other navigation links are skipped.
pub fn extract_resources(base: &Url, html: &str) -> ProbeResult<Vec<Url>> {
    let pattern = Regex::new(RESOURCE_PATTERN).map_err(|e| ProbeError::Unsupported(e.to_string()))?;
    let mut seen = HashSet::new();
    Ok(pattern
        .captures_iter(html)
        .filter_map(|cap| {
            let raw = cap.get(1).or_else(|| cap.get(2))?.as_str().trim();
            base.join(raw).ok()
        })
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .filter(|url| url != base)
        .filter(|url| seen.insert(url.as_str().to_string()))
        .take(MAX_RESOURCES)
        .collect())
}

/// File name for a resource: its last path segment, given an extension from
/// the response content type when it has none. `index` keeps names unique.
pub fn resource_file_name(url: &Url, content_type: Option<&str>, index: usize) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .unwrap_or("index");
    let mut name = sanitize_file_name(segment);

    if Path::new(&name).extension().is_none() {
        let ext = content_type
            .and_then(|ct| ct.split(';').next())
            .and_then(|mime| mime_guess::get_mime_extensions_str(mime.trim()))
            .and_then(|exts| exts.first());
        if let Some(ext) = ext {
            name = format!("{}.{}", name, ext);
        }
    }
    format!("{:03}_{}", index, name)
}

fn download_resource(client: &Client, url: &Url, folder: &Path, index: usize) -> ProbeResult<PathBuf> {
    let response = client
        .get(url.clone())
        .send()
        .and_then(|r| r.error_for_status())
        .map_err(|e| ProbeError::Network(e.to_string()))?;
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body: bytes::Bytes = response.bytes().map_err(|e| ProbeError::Network(e.to_string()))?;

    let path = folder.join(resource_file_name(url, content_type.as_deref(), index));
    write_file(&path, &body)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_extract_resources_resolves_and_dedupes() {
        let base = Url::parse("https://example.com/blog/post").unwrap();
        let html = r##"
            <link href="/css/site.css" rel="stylesheet">
            <img src="img/a.png"><img SRC='img/a.png'>
            <a href="mailto:someone@example.com">mail</a>
            <a href="#top">top</a>
            <script src="https://cdn.example.net/app.js"></script>
            <a href="https://other.org/page">elsewhere</a>
            <a class="nav" href="/blog/next-post">next</a>
            <video controls src="/media/clip.mp4"></video>
        "##;
        let urls: Vec<String> = extract_resources(&base, html)
            .unwrap()
            .iter()
            .map(|u| u.to_string())
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/css/site.css",
                "https://example.com/blog/img/a.png",
                "https://cdn.example.net/app.js",
                "https://example.com/media/clip.mp4",
            ]
        );
    }

    #[test]
    fn test_navigation_links_are_not_resources() {
        let base = Url::parse("https://example.com/").unwrap();
        let html = r#"<img src="/logo.png"><a href="https://other.org/page">other</a><link rel="icon" href="/favicon.ico">"#;
        let urls: Vec<String> = extract_resources(&base, html)
            .unwrap()
            .iter()
            .map(|u| u.to_string())
            .collect();
        assert_eq!(urls, vec!["https://example.com/logo.png", "https://example.com/favicon.ico"]);
    }

    #[test]
    fn test_resource_file_name() {
        let url = Url::parse("https://example.com/css/site.css?v=3").unwrap();
        assert_eq!(resource_file_name(&url, None, 2), "002_site.css");

        let url = Url::parse("https://example.com/api/logo").unwrap();
        let name = resource_file_name(&url, Some("image/png; charset=binary"), 7);
        assert_eq!(name, "007_logo.png");

        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(resource_file_name(&url, None, 0), "000_index");
    }

    #[test]
    fn test_empty_downloads_folder_is_removed() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        std::fs::create_dir(dir.path().join("downloads"))?;
        assert_eq!(archive_downloads(dir.path())?, None);
        assert!(!dir.path().join("downloads").exists());
        assert!(!dir.path().join("downloads.zip").exists());
        Ok(())
    }

    #[test]
    fn test_downloads_are_archived() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        std::fs::create_dir(dir.path().join("downloads"))?;
        std::fs::write(dir.path().join("downloads").join("invoice.pdf"), "%PDF")?;
        let archive = archive_downloads(dir.path())?;
        assert_eq!(archive, Some(dir.path().join("downloads.zip")));
        assert!(!dir.path().join("downloads").exists());
        Ok(())
    }

    #[test]
    fn test_unreachable_page_leaves_no_folders() -> Result<(), Box<dyn std::error::Error>> {
        // Bind then drop to get a port nobody listens on.
        let port = TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
        let dir = TempDir::new()?;
        std::fs::create_dir(dir.path().join("downloads"))?;
        std::fs::write(dir.path().join("downloads").join("invoice.pdf"), "%PDF")?;

        let ctx = ProbeContext::new(dir.path(), format!("http://127.0.0.1:{}/", port), Duration::from_secs(2));
        assert!(PageSaver::new(2).run(&ctx).is_err());

        assert!(!dir.path().join("acquisition_page").exists());
        assert!(!dir.path().join("acquisition_page.zip").exists());
        assert!(!dir.path().join("downloads").exists());
        assert!(dir.path().join("downloads.zip").exists());
        Ok(())
    }

    fn serve(listener: TcpListener, requests: usize) {
        for _ in 0..requests {
            let Ok((mut socket, _)) = listener.accept() else { return };
            let mut buf = [0u8; 2048];
            let n = socket.read(&mut buf).unwrap_or(0);
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let (content_type, body) = if request.starts_with("GET /style.css") {
                ("text/css", "body { color: red; }".to_string())
            } else {
                ("text/html", r#"<html><link href="/style.css"></html>"#.to_string())
            };
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                content_type,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes());
        }
    }

    #[test]
    fn test_saves_page_and_resources_into_archive() -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let server = std::thread::spawn(move || serve(listener, 2));

        let dir = TempDir::new()?;
        std::fs::create_dir(dir.path().join("downloads"))?;
        let ctx = ProbeContext::new(dir.path(), format!("http://{}/", addr), Duration::from_secs(5));
        let archive = PageSaver::new(2).run(&ctx)?;
        server.join().unwrap();

        assert_eq!(archive, dir.path().join("acquisition_page.zip"));
        assert!(!dir.path().join("acquisition_page").exists());
        assert!(!dir.path().join("downloads").exists());

        let mut zip = zip::ZipArchive::new(std::fs::File::open(&archive)?)?;
        assert!(zip.by_name("127.0.0.1.html").is_ok());
        let mut css = String::new();
        zip.by_name("000_style.css")?.read_to_string(&mut css)?;
        assert_eq!(css, "body { color: red; }");
        Ok(())
    }
}
