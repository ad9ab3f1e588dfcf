//! Probe adapters
//!
//! Every external capability the orchestrator drives sits behind one of two
//! contracts:
//! - `RecordingProbe`: `start()` begins recording, `stop()` ends it
//!   (packet capture, screen recorder)
//! - `OneShotProbe`: a single blocking `run()` (WHOIS, NSLOOKUP, headers,
//!   traceroute, key log, certificate, and the internal capture steps)
//!
//! Probes are blocking by design; the orchestrator runs them on worker
//! threads and only ever sees their `ProbeResult`.

pub mod certificate;
pub mod headers;
pub mod nslookup;
pub mod recorder;
pub mod sslkeylog;
pub mod traceroute;
pub mod whois;

use crate::capture::{CommandScreenshot, PageSaver};
use crate::config::Configuration;
use crate::task::TaskKind;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Error raised inside a probe. Never propagated past the worker boundary.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("command `{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Unsupported(String),

    #[error("{0} is not recording")]
    NotRecording(TaskKind),
}

impl ProbeError {
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type ProbeResult<T> = Result<T, ProbeError>;

/// What a probe needs to know about the acquisition it serves.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    pub directory: PathBuf,
    pub url: String,
    pub timeout: Duration,
    cancelled: Arc<AtomicBool>,
}

impl ProbeContext {
    pub fn new(directory: impl Into<PathBuf>, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            directory: directory.into(),
            url: url.into(),
            timeout,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share `flag` with the acquisition; once set, probes that work in
    /// steps stop before the next one.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn artifact_path(&self, kind: TaskKind) -> PathBuf {
        self.directory.join(kind.artifact_name())
    }

    pub fn host(&self) -> ProbeResult<String> {
        crate::utils::host_from_url(&self.url).map_err(|e| ProbeError::Network(e.to_string()))
    }

    /// Write `contents` as the artifact of `kind`.
    pub fn write_artifact(&self, kind: TaskKind, contents: impl AsRef<[u8]>) -> ProbeResult<PathBuf> {
        let path = self.artifact_path(kind);
        write_file(&path, contents.as_ref())?;
        Ok(path)
    }
}

pub(crate) fn write_file(path: &Path, contents: &[u8]) -> ProbeResult<()> {
    std::fs::write(path, contents).map_err(|e| ProbeError::io(e, path))
}

pub trait RecordingProbe: Send + Sync {
    fn start(&self, ctx: &ProbeContext) -> ProbeResult<()>;

    /// Stop recording. Returns the artifact written.
    fn stop(&self, ctx: &ProbeContext) -> ProbeResult<PathBuf>;
}

pub trait OneShotProbe: Send + Sync {
    /// Run to completion. Returns the artifact written.
    fn run(&self, ctx: &ProbeContext) -> ProbeResult<PathBuf>;
}

#[derive(Clone)]
pub enum Probe {
    Recording(Arc<dyn RecordingProbe>),
    OneShot(Arc<dyn OneShotProbe>),
}

/// Probes available to an orchestrator, keyed by the task they serve.
#[derive(Clone, Default)]
pub struct ProbeSet {
    probes: HashMap<TaskKind, Probe>,
}

impl ProbeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stock adapters, configured from `config`.
    pub fn from_config(config: &Configuration) -> Self {
        let timeout = config.probe_timeout();
        Self::new()
            .with_recording(
                TaskKind::PacketCapture,
                recorder::CommandRecorder::new(
                    TaskKind::PacketCapture,
                    config.packet_capture_command.clone(),
                    recorder::StopMode::Kill,
                ),
            )
            .with_recording(
                TaskKind::ScreenRecorder,
                recorder::CommandRecorder::new(
                    TaskKind::ScreenRecorder,
                    config.screen_recorder_command.clone(),
                    recorder::StopMode::StdinQuit,
                ),
            )
            .with_one_shot(TaskKind::Whois, whois::WhoisProbe::default())
            .with_one_shot(TaskKind::Nslookup, nslookup::NslookupProbe::new(config.nslookup.clone()))
            .with_one_shot(TaskKind::Headers, headers::HeadersProbe)
            .with_one_shot(
                TaskKind::Traceroute,
                traceroute::TracerouteProbe::new(config.traceroute_max_hops),
            )
            .with_one_shot(
                TaskKind::SslKeylog,
                sslkeylog::SslKeylogProbe::new(config.sslkeylog_file.clone()),
            )
            .with_one_shot(TaskKind::SslCertificate, certificate::CertificateProbe::default())
            .with_one_shot(
                TaskKind::Screenshot,
                CommandScreenshot::new(config.screenshot_command.clone(), timeout * 6),
            )
            .with_one_shot(TaskKind::SavePage, PageSaver::new(config.resource_threads))
    }

    pub fn with_recording(mut self, kind: TaskKind, probe: impl RecordingProbe + 'static) -> Self {
        self.probes.insert(kind, Probe::Recording(Arc::new(probe)));
        self
    }

    pub fn with_one_shot(mut self, kind: TaskKind, probe: impl OneShotProbe + 'static) -> Self {
        self.probes.insert(kind, Probe::OneShot(Arc::new(probe)));
        self
    }

    pub fn insert(&mut self, kind: TaskKind, probe: Probe) {
        self.probes.insert(kind, probe);
    }

    pub fn get(&self, kind: TaskKind) -> Option<&Probe> {
        self.probes.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stock_probe_set_covers_every_task() {
        let probes = ProbeSet::from_config(&Configuration::default());
        for kind in TaskKind::ALL {
            assert!(probes.get(kind).is_some(), "no probe for {}", kind);
        }
        assert!(matches!(probes.get(TaskKind::PacketCapture), Some(Probe::Recording(_))));
        assert!(matches!(probes.get(TaskKind::Whois), Some(Probe::OneShot(_))));
    }

    #[test]
    fn test_write_artifact_uses_task_file_name() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let ctx = ProbeContext::new(dir.path(), "https://example.com", Duration::from_secs(1));
        let path = ctx.write_artifact(TaskKind::Whois, "registrar: example")?;
        assert_eq!(path, dir.path().join("whois.txt"));
        assert_eq!(std::fs::read_to_string(path)?, "registrar: example");
        Ok(())
    }

    #[test]
    fn test_context_host() {
        let ctx = ProbeContext::new("/tmp", "https://example.com/login", Duration::from_secs(1));
        assert_eq!(ctx.host().unwrap(), "example.com");
    }
}
