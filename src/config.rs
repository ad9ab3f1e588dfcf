//! Acquisition configuration
//!
//! Loaded from an optional JSON file; every field has a default so a partial
//! file (or none at all) is valid. Command templates are argument vectors in
//! which `{output}`, `{url}`, `{host}` and `{input}` are substituted.

use crate::errors::{FreezerError, FreezerResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Root folder holding one sub-folder per case.
    pub cases_folder: PathBuf,
    /// Server queried for the trusted time printed on the report.
    pub ntp_server: String,
    pub nslookup: NslookupConfig,
    /// Timeout applied to every network probe, in seconds.
    pub probe_timeout_secs: u64,
    /// Concurrent probe workers (0 = CPU count).
    pub max_workers: usize,
    /// Threads used to download page resources.
    pub resource_threads: usize,
    /// Optional wall-clock bound for the stop phase, in seconds.
    pub phase_timeout_secs: Option<u64>,
    /// Maximum hops for traceroute.
    pub traceroute_max_hops: u8,
    pub packet_capture_command: Vec<String>,
    pub screen_recorder_command: Vec<String>,
    pub screenshot_command: Vec<String>,
    pub pdf_command: Vec<String>,
    /// Key log written by the browser; defaults to `$SSLKEYLOGFILE`.
    pub sslkeylog_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NslookupConfig {
    pub dns_server: String,
    pub tcp: bool,
    pub verbose: bool,
}

impl Default for NslookupConfig {
    fn default() -> Self {
        Self {
            dns_server: "1.1.1.1".to_string(),
            tcp: false,
            verbose: true,
        }
    }
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for Configuration {
    fn default() -> Self {
        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            cases_folder: home.join("freezer_cases"),
            ntp_server: "pool.ntp.org".to_string(),
            nslookup: NslookupConfig::default(),
            probe_timeout_secs: 10,
            max_workers: 0,
            resource_threads: 4,
            phase_timeout_secs: None,
            traceroute_max_hops: 22,
            packet_capture_command: args(&["tcpdump", "-i", "any", "-U", "-w", "{output}"]),
            screen_recorder_command: default_screen_recorder(),
            screenshot_command: args(&[
                "chromium",
                "--headless=new",
                "--hide-scrollbars",
                "--window-size=1920,1080",
                "--screenshot={output}",
                "{url}",
            ]),
            pdf_command: args(&["wkhtmltopdf", "--quiet", "{input}", "{output}"]),
            sslkeylog_file: std::env::var_os("SSLKEYLOGFILE").map(PathBuf::from),
        }
    }
}

#[cfg(target_os = "windows")]
fn default_screen_recorder() -> Vec<String> {
    args(&["ffmpeg", "-y", "-f", "gdigrab", "-framerate", "15", "-i", "desktop", "{output}"])
}

#[cfg(target_os = "macos")]
fn default_screen_recorder() -> Vec<String> {
    args(&["ffmpeg", "-y", "-f", "avfoundation", "-framerate", "15", "-i", "1", "{output}"])
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn default_screen_recorder() -> Vec<String> {
    args(&["ffmpeg", "-y", "-f", "x11grab", "-framerate", "15", "-i", ":0.0", "{output}"])
}

impl Configuration {
    /// Load from `path`, or defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> FreezerResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        log::debug!("Loading configuration from {:?}", path);
        let raw = std::fs::read_to_string(path).map_err(|e| FreezerError::io(e, path.to_path_buf()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn to_json(&self) -> FreezerResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }

    pub fn phase_timeout(&self) -> Option<Duration> {
        self.phase_timeout_secs.map(Duration::from_secs)
    }

    pub fn worker_count(&self) -> usize {
        if self.max_workers == 0 {
            num_cpus::get()
        } else {
            self.max_workers
        }
    }
}

/// Substitute `{name}` placeholders in a command template.
pub fn render_command(template: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (name, value)| {
                acc.replace(&format!("{{{}}}", name), value)
            })
        })
        .collect()
}
