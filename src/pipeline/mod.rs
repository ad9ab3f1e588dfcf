//! Post-acquisition pipeline
//!
//! Runs once every task is terminal: trusted time, then the hash manifest of
//! the acquisition directory, then the report. Each step degrades on its own
//! and its error is collected; the pipeline itself never fails.

pub mod manifest;
pub mod ntp;
pub mod report;

pub use manifest::{verify, Manifest, Verification, MANIFEST_FILE};
pub use ntp::{SntpClock, TimeAuthority};
pub use report::{HtmlReport, PdfReportGenerator, ReportGenerator, ReportInput, REPORT_HTML, REPORT_PDF};

use crate::config::Configuration;
use crate::models::TrustedTime;
use crate::utils::HashStrategy;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;

pub const LOCAL_CLOCK: &str = "local clock";

/// What the pipeline produced, plus whatever went wrong on the way.
#[derive(Debug, Clone, Default)]
pub struct PipelineOutcome {
    pub trusted_time: Option<TrustedTime>,
    pub manifest: Option<PathBuf>,
    pub report: Option<PathBuf>,
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct PostAcquisition {
    time: Arc<dyn TimeAuthority>,
    report: Arc<dyn ReportGenerator>,
    ntp_server: String,
}

impl PostAcquisition {
    pub fn new(
        time: impl TimeAuthority + 'static,
        report: impl ReportGenerator + 'static,
        ntp_server: impl Into<String>,
    ) -> Self {
        Self {
            time: Arc::new(time),
            report: Arc::new(report),
            ntp_server: ntp_server.into(),
        }
    }

    pub fn from_config(config: &Configuration) -> Self {
        let timeout = config.probe_timeout();
        Self::new(
            SntpClock::new(timeout),
            PdfReportGenerator::new(config.pdf_command.clone(), timeout * 6),
            config.ntp_server.clone(),
        )
    }

    /// Blocking: hashes the whole directory and runs the report command.
    pub fn run(&self, input: ReportInput) -> PipelineOutcome {
        self.run_with(input, HashStrategy::Mapped)
    }

    /// As `run`, hashing with `strategy`.
    pub fn run_with(&self, mut input: ReportInput, strategy: HashStrategy) -> PipelineOutcome {
        let mut outcome = PipelineOutcome::default();

        let trusted_time = match self.time.now(&self.ntp_server) {
            Ok(time) => TrustedTime {
                time,
                source: self.ntp_server.clone(),
                error: None,
            },
            Err(e) => {
                log::warn!("Trusted time unavailable, using the local clock: {}", e);
                outcome.errors.push(format!("trusted time: {}", e));
                TrustedTime {
                    time: Utc::now(),
                    source: LOCAL_CLOCK.to_string(),
                    error: Some(e.to_string()),
                }
            }
        };
        input.trusted_time = Some(trusted_time.clone());
        outcome.trusted_time = Some(trusted_time);

        match Manifest::build_with(&input.directory, strategy).and_then(|m| m.write(&input.directory).map(|path| (m, path))) {
            Ok((manifest, path)) => {
                log::info!("Manifest written with {} entries", manifest.entries.len());
                input.manifest = Some(manifest);
                outcome.manifest = Some(path);
            }
            Err(e) => {
                log::error!("Hashing failed: {}", e);
                outcome.errors.push(format!("manifest: {}", e));
            }
        }

        match self.report.generate(&input) {
            Ok(path) => outcome.report = Some(path),
            Err(e) => {
                log::error!("{}", e);
                outcome.errors.push(format!("report: {}", e));
                let html = input.directory.join(REPORT_HTML);
                outcome.report = html.exists().then_some(html);
            }
        }
        outcome
    }
}
