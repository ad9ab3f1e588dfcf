//! Task records
//!
//! A task is one unit of capture work inside an acquisition. Each task is
//! identified by its kind and by the phase (start or stop) that registered
//! it, and carries two independent axes: the lifecycle `state` and the
//! outcome `status`.

pub mod registry;

pub use registry::StatusRegistry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every kind of work an acquisition knows how to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    PacketCapture,
    ScreenRecorder,
    Whois,
    Nslookup,
    Headers,
    Traceroute,
    #[serde(rename = "sslkeylog")]
    SslKeylog,
    #[serde(rename = "sslcertificate")]
    SslCertificate,
    Screenshot,
    SavePage,
}

impl TaskKind {
    pub const ALL: [TaskKind; 10] = [
        TaskKind::PacketCapture,
        TaskKind::ScreenRecorder,
        TaskKind::Whois,
        TaskKind::Nslookup,
        TaskKind::Headers,
        TaskKind::Traceroute,
        TaskKind::SslKeylog,
        TaskKind::SslCertificate,
        TaskKind::Screenshot,
        TaskKind::SavePage,
    ];

    /// Tasks launched by `start()` in a default web acquisition.
    pub const DEFAULT_START: [TaskKind; 2] = [TaskKind::ScreenRecorder, TaskKind::PacketCapture];

    /// External tasks run by `stop()` in a default web acquisition.
    pub const DEFAULT_STOP: [TaskKind; 8] = [
        TaskKind::PacketCapture,
        TaskKind::Whois,
        TaskKind::Nslookup,
        TaskKind::Headers,
        TaskKind::Traceroute,
        TaskKind::SslKeylog,
        TaskKind::SslCertificate,
        TaskKind::ScreenRecorder,
    ];

    /// Internal tasks run once every external stop task is terminal.
    pub const DEFAULT_INTERNAL: [TaskKind; 2] = [TaskKind::Screenshot, TaskKind::SavePage];

    pub fn name(self) -> &'static str {
        match self {
            TaskKind::PacketCapture => "packet-capture",
            TaskKind::ScreenRecorder => "screen-recorder",
            TaskKind::Whois => "whois",
            TaskKind::Nslookup => "nslookup",
            TaskKind::Headers => "headers",
            TaskKind::Traceroute => "traceroute",
            TaskKind::SslKeylog => "sslkeylog",
            TaskKind::SslCertificate => "sslcertificate",
            TaskKind::Screenshot => "screenshot",
            TaskKind::SavePage => "save-page",
        }
    }

    /// Internal tasks work against the captured page rather than the network
    /// or the operating system.
    pub fn is_internal(self) -> bool {
        matches!(self, TaskKind::Screenshot | TaskKind::SavePage)
    }

    /// File written into the acquisition directory by this task.
    pub fn artifact_name(self) -> &'static str {
        match self {
            TaskKind::PacketCapture => "capture.pcap",
            TaskKind::ScreenRecorder => "screen_recording.mp4",
            TaskKind::Whois => "whois.txt",
            TaskKind::Nslookup => "nslookup.txt",
            TaskKind::Headers => "headers.txt",
            TaskKind::Traceroute => "traceroute.txt",
            TaskKind::SslKeylog => "sslkey.log",
            TaskKind::SslCertificate => "server.cer",
            TaskKind::Screenshot => "screenshot.png",
            TaskKind::SavePage => "acquisition_page.zip",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| format!("unknown task '{}'", s))
    }
}

/// Half of the acquisition that registered a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Start,
    Stop,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Start => write!(f, "start"),
            Phase::Stop => write!(f, "stop"),
        }
    }
}

/// Registry key: the same kind may be registered once per phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId {
    pub phase: Phase,
    pub kind: TaskKind,
}

impl TaskId {
    pub fn new(phase: Phase, kind: TaskKind) -> Self {
        Self { phase, kind }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.phase, self.kind)
    }
}

/// Lifecycle stage, independent of outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    NotStarted,
    Started,
    Finished,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::NotStarted => write!(f, "not started"),
            TaskState::Started => write!(f, "started"),
            TaskState::Finished => write!(f, "finished"),
        }
    }
}

/// Outcome classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub state: TaskState,
    pub status: TaskStatus,
    /// Diagnostic text, empty on success.
    pub detail: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(id: TaskId, state: TaskState, status: TaskStatus) -> Self {
        let now = Utc::now();
        Self {
            id,
            state,
            status,
            detail: String::new(),
            started_at: (state != TaskState::NotStarted).then_some(now),
            finished_at: (state == TaskState::Finished).then_some(now),
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.id.kind
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_finished(&self) -> bool {
        self.state == TaskState::Finished
    }
}
