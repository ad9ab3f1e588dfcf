use crate::task::{TaskKind, TaskRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Case metadata printed on the report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseInfo {
    pub name: String,
    pub lawyer_name: Option<String>,
    pub proceeding_type: Option<String>,
    pub courthouse: Option<String>,
    pub proceeding_number: Option<String>,
}

impl CaseInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Kind of acquisition, also the name of its folder inside the case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionType {
    Web,
    /// Captured with the web tasks; only the case folder differs.
    Instagram,
}

impl fmt::Display for AcquisitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionType::Web => write!(f, "web"),
            AcquisitionType::Instagram => write!(f, "instagram"),
        }
    }
}

/// Everything `Orchestrator::start` needs, passed by value.
#[derive(Debug, Clone)]
pub struct AcquisitionRequest {
    pub acquisition_type: AcquisitionType,
    pub case_info: CaseInfo,
    pub target_url: String,
    pub tasks: Vec<TaskKind>,
}

impl AcquisitionRequest {
    /// A web acquisition with the default start-phase tasks.
    pub fn web(case_info: CaseInfo, target_url: impl Into<String>) -> Self {
        Self {
            acquisition_type: AcquisitionType::Web,
            case_info,
            target_url: target_url.into(),
            tasks: TaskKind::DEFAULT_START.to_vec(),
        }
    }
}

/// Everything `Orchestrator::stop` needs.
///
/// `url` is the page being captured at stop time, which may differ from the
/// start URL after the operator navigated.
#[derive(Debug, Clone)]
pub struct StopRequest {
    pub url: String,
    pub external: Vec<TaskKind>,
    pub internal: Vec<TaskKind>,
}

impl StopRequest {
    pub fn web(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            external: TaskKind::DEFAULT_STOP.to_vec(),
            internal: TaskKind::DEFAULT_INTERNAL.to_vec(),
        }
    }

    pub fn internal_task_count(&self) -> usize {
        self.internal.len()
    }
}

/// Trusted time attached to the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustedTime {
    pub time: DateTime<Utc>,
    /// Where the time came from: the NTP server, or "local clock".
    pub source: String,
    /// Set when the time authority failed and the local clock was used.
    pub error: Option<String>,
}

/// Outcome of a finished acquisition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionSummary {
    pub directory: PathBuf,
    pub acquisition_type: AcquisitionType,
    pub case_info: CaseInfo,
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tasks: Vec<TaskRecord>,
    pub manifest: Option<PathBuf>,
    pub report: Option<PathBuf>,
    pub trusted_time: Option<TrustedTime>,
    /// Hashing or report errors. They never block completion.
    pub post_errors: Vec<String>,
}

impl AcquisitionSummary {
    pub fn failed_tasks(&self) -> impl Iterator<Item = &TaskRecord> {
        self.tasks
            .iter()
            .filter(|t| t.status == crate::task::TaskStatus::Failed)
    }
}
