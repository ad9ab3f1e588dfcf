//! Acquisition orchestrator
//!
//! Drives one acquisition through its phases:
//!
//! ```text
//! Idle -> Starting -> Running -> Stopping -> PostProcessing -> Completed
//! ```
//!
//! Probes run on a bounded worker pool and report back through a single
//! event queue. The orchestrator is the only consumer of that queue and the
//! only writer of the status registry, so phase changes happen in exactly one
//! place: after an event has been applied.

pub mod events;
pub mod workers;

pub use events::{AcquisitionEvent, TaskNotifier, UiEvent};
pub use workers::WorkerPool;

use crate::capture::{DOWNLOADS_DIR, SCREENSHOT_DIR};
use crate::case::CaseDirectory;
use crate::config::Configuration;
use crate::errors::{FreezerError, FreezerResult};
use crate::journal::AcquisitionJournal;
use crate::models::{AcquisitionRequest, AcquisitionSummary, StopRequest};
use crate::pipeline::{PipelineOutcome, PostAcquisition, ReportInput};
use crate::probes::{Probe, ProbeContext, ProbeSet};
use crate::task::{Phase, StatusRegistry, TaskId, TaskKind, TaskRecord, TaskState, TaskStatus};
use crate::utils::{host_from_url, HashStrategy};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcquisitionPhase {
    Idle,
    Starting,
    Running,
    Stopping,
    PostProcessing,
    Completed,
}

impl fmt::Display for AcquisitionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AcquisitionPhase::Idle => "idle",
            AcquisitionPhase::Starting => "starting",
            AcquisitionPhase::Running => "running",
            AcquisitionPhase::Stopping => "stopping",
            AcquisitionPhase::PostProcessing => "post-processing",
            AcquisitionPhase::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Snapshot returned by `Orchestrator::info`.
#[derive(Debug, Clone, Serialize)]
pub struct AcquisitionInfo {
    pub phase: AcquisitionPhase,
    pub directory: Option<PathBuf>,
    pub records: Vec<TaskRecord>,
}

/// State of the acquisition in progress.
struct Session {
    request: AcquisitionRequest,
    directory: PathBuf,
    started_at: DateTime<Utc>,
    stop_url: Option<String>,
}

pub struct Orchestrator {
    config: Configuration,
    probes: ProbeSet,
    cases: CaseDirectory,
    pipeline: PostAcquisition,
    phase: AcquisitionPhase,
    registry: StatusRegistry,
    events_tx: mpsc::UnboundedSender<AcquisitionEvent>,
    events_rx: mpsc::UnboundedReceiver<AcquisitionEvent>,
    workers: WorkerPool,
    ui: Option<mpsc::Sender<UiEvent>>,
    journal: Option<AcquisitionJournal>,
    session: Option<Session>,
    /// Internal kinds registered by `stop()` and not yet launched.
    pending_internal: Vec<TaskKind>,
    /// Internal kinds launched; only their events are accepted.
    admitted: HashSet<TaskKind>,
    phase_timer: Option<JoinHandle<()>>,
    timed_out: bool,
    /// Shared with every probe context; set when the stop phase times out.
    cancelled: Arc<AtomicBool>,
    completion_sent: bool,
}

impl Orchestrator {
    pub fn new(config: Configuration, probes: ProbeSet) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let workers = WorkerPool::new(config.worker_count(), TaskNotifier::new(events_tx.clone()));
        Self {
            cases: CaseDirectory::new(config.cases_folder.clone()),
            pipeline: PostAcquisition::from_config(&config),
            config,
            probes,
            phase: AcquisitionPhase::Idle,
            registry: StatusRegistry::new(),
            events_tx,
            events_rx,
            workers,
            ui: None,
            journal: None,
            session: None,
            pending_internal: Vec::new(),
            admitted: HashSet::new(),
            phase_timer: None,
            timed_out: false,
            cancelled: Arc::new(AtomicBool::new(false)),
            completion_sent: false,
        }
    }

    /// Send display updates to `sender`. Updates that find the channel full
    /// are dropped so a slow display never stalls the acquisition; the final
    /// `Completed` is delivered as soon as the receiver makes room.
    pub fn with_ui(mut self, sender: mpsc::Sender<UiEvent>) -> Self {
        self.ui = Some(sender);
        self
    }

    pub fn with_pipeline(mut self, pipeline: PostAcquisition) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn phase(&self) -> AcquisitionPhase {
        self.phase
    }

    pub fn notifier(&self) -> TaskNotifier {
        TaskNotifier::new(self.events_tx.clone())
    }

    pub fn info(&self) -> AcquisitionInfo {
        AcquisitionInfo {
            phase: self.phase,
            directory: self.session.as_ref().map(|s| s.directory.clone()),
            records: self.registry.records().to_vec(),
        }
    }

    /// Begin an acquisition: allocate its directory and start every
    /// requested recording. Returns the directory once all recordings have
    /// reported back.
    pub async fn start(&mut self, request: AcquisitionRequest) -> FreezerResult<PathBuf> {
        if self.phase != AcquisitionPhase::Idle {
            return Err(FreezerError::InvalidPhase {
                operation: "start",
                phase: self.phase,
            });
        }

        let target = host_from_url(&request.target_url).unwrap_or_else(|_| request.target_url.clone());
        let directory = self.cases.create_acquisition_directory(
            request.acquisition_type,
            &request.case_info.name,
            &target,
        )?;
        self.set_phase(AcquisitionPhase::Starting).await;

        for sub in [SCREENSHOT_DIR, DOWNLOADS_DIR] {
            if let Err(e) = std::fs::create_dir_all(directory.join(sub)) {
                log::warn!("Cannot create {} folder: {}", sub, e);
            }
        }
        match AcquisitionJournal::open(&directory) {
            Ok(journal) => self.journal = Some(journal),
            Err(e) => log::warn!("Acquisition journal unavailable: {}", e),
        }
        self.journal_info(format!(
            "Acquisition of {} started for case '{}' in {}",
            request.target_url,
            request.case_info.name,
            directory.display()
        ));

        let ctx = self.probe_context(&directory, &request.target_url);
        let mut kinds = Vec::new();
        for kind in &request.tasks {
            if kinds.contains(kind) {
                log::warn!("Ignoring duplicate start task {}", kind);
            } else {
                kinds.push(*kind);
            }
        }
        self.session = Some(Session {
            request,
            directory: directory.clone(),
            started_at: Utc::now(),
            stop_url: None,
        });

        for kind in &kinds {
            self.register(TaskId::new(Phase::Start, *kind)).await?;
        }
        for kind in kinds {
            let id = TaskId::new(Phase::Start, kind);
            match self.probes.get(kind).cloned() {
                Some(Probe::Recording(probe)) => {
                    let ctx = ctx.clone();
                    self.workers.launch(id, move || {
                        probe.start(&ctx)?;
                        Ok("recording".to_string())
                    });
                }
                _ => {
                    self.apply_completion(id, TaskStatus::Failed, format!("no recording probe for {}", kind))
                        .await;
                }
            }
        }

        self.advance().await;
        self.drive_until(|o| o.phase != AcquisitionPhase::Starting).await?;
        Ok(directory)
    }

    /// End the acquisition: stop the recordings, run the one-shot probes,
    /// then the internal captures, then the post-acquisition pipeline.
    pub async fn stop(&mut self, request: StopRequest) -> FreezerResult<AcquisitionSummary> {
        if self.phase != AcquisitionPhase::Running {
            return Err(FreezerError::InvalidPhase {
                operation: "stop",
                phase: self.phase,
            });
        }
        if request.external.is_empty() && request.internal.is_empty() {
            return Err(FreezerError::EmptyStop);
        }

        let directory = self.directory()?;
        if let Some(session) = self.session.as_mut() {
            session.stop_url = Some(request.url.clone());
        }
        self.set_phase(AcquisitionPhase::Stopping).await;
        self.journal_info(format!("Stop requested on {}", request.url));

        let (mut external, mut internal) = (Vec::new(), Vec::new());
        for kind in request.external.iter().chain(request.internal.iter()).copied() {
            let list = if kind.is_internal() { &mut internal } else { &mut external };
            if !list.contains(&kind) {
                list.push(kind);
            }
        }

        for kind in external.iter().chain(internal.iter()) {
            self.register(TaskId::new(Phase::Stop, *kind)).await?;
        }
        self.pending_internal = internal;

        let ctx = self.probe_context(&directory, &request.url);
        for kind in external {
            self.launch(Phase::Stop, kind, &ctx).await;
        }

        if let Some(limit) = self.config.phase_timeout() {
            self.arm_phase_timer(limit);
        }

        self.advance().await;
        self.drive_until(|o| o.phase != AcquisitionPhase::Stopping).await?;
        self.finish().await
    }

    fn probe_context(&self, directory: &Path, url: &str) -> ProbeContext {
        ProbeContext::new(directory, url, self.config.probe_timeout()).with_cancellation(Arc::clone(&self.cancelled))
    }

    fn directory(&self) -> FreezerResult<PathBuf> {
        self.session
            .as_ref()
            .map(|s| s.directory.clone())
            .ok_or_else(|| FreezerError::external("orchestrator", "no acquisition in progress"))
    }

    async fn register(&mut self, id: TaskId) -> FreezerResult<()> {
        let record = self
            .registry
            .add(id, TaskState::NotStarted, TaskStatus::Pending)?
            .clone();
        self.emit(UiEvent::TaskAdded(record));
        Ok(())
    }

    /// Hand `kind` to its probe on the worker pool.
    async fn launch(&mut self, phase: Phase, kind: TaskKind, ctx: &ProbeContext) {
        let id = TaskId::new(phase, kind);
        let ctx = ctx.clone();
        match self.probes.get(kind).cloned() {
            Some(Probe::Recording(probe)) => self.workers.launch(id, move || {
                let path = probe.stop(&ctx)?;
                Ok(artifact_detail(&path))
            }),
            Some(Probe::OneShot(probe)) => self.workers.launch(id, move || {
                let path = probe.run(&ctx)?;
                Ok(artifact_detail(&path))
            }),
            None => {
                self.apply_completion(id, TaskStatus::Failed, format!("no probe configured for {}", kind))
                    .await;
            }
        }
    }

    fn arm_phase_timer(&mut self, limit: Duration) {
        let notifier = self.notifier();
        self.phase_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            notifier.post(AcquisitionEvent::PhaseTimeout { phase: Phase::Stop });
        }));
    }

    /// Consume events until `done` holds.
    async fn drive_until(&mut self, done: impl Fn(&Self) -> bool) -> FreezerResult<()> {
        while !done(self) {
            let event = self
                .events_rx
                .recv()
                .await
                .ok_or_else(|| FreezerError::external("orchestrator", "event queue closed"))?;
            self.handle(event).await;
        }
        Ok(())
    }

    async fn handle(&mut self, event: AcquisitionEvent) {
        match event {
            AcquisitionEvent::TaskStarted { id } => {
                if !self.accepts(id) {
                    log::warn!("Rejected start notice for {} before it was launched", id);
                    return;
                }
                match self.registry.update(id, TaskState::Started, TaskStatus::Running, "") {
                    Ok(true) => self.emit_record(id).await,
                    Ok(false) => {}
                    Err(e) => log::warn!("Ignoring start notice: {}", e),
                }
            }
            AcquisitionEvent::TaskCompleted { id, status, detail } => {
                if !self.accepts(id) {
                    log::warn!("Rejected completion of {} before it was launched", id);
                    return;
                }
                self.apply_completion(id, status, detail).await;
            }
            AcquisitionEvent::PhaseTimeout { phase } => self.expire(phase).await,
        }
        self.advance().await;
    }

    /// Internal tasks only take events once they have been launched.
    fn accepts(&self, id: TaskId) -> bool {
        !(id.phase == Phase::Stop && id.kind.is_internal() && !self.admitted.contains(&id.kind))
    }

    async fn apply_completion(&mut self, id: TaskId, status: TaskStatus, detail: impl Into<String>) {
        let detail = detail.into();
        match self.registry.update(id, TaskState::Finished, status, detail.clone()) {
            Ok(true) => {
                match status {
                    TaskStatus::Failed => self.journal_warn(format!("{} failed: {}", id, detail)),
                    _ => self.journal_info(format!("{} {}", id, status)),
                }
                self.emit_record(id).await;
            }
            Ok(false) => log::debug!("Duplicate completion of {} ignored", id),
            Err(e) => log::warn!("Ignoring completion: {}", e),
        }
    }

    /// Fail every unfinished task of `phase`.
    async fn expire(&mut self, phase: Phase) {
        if self.phase != AcquisitionPhase::Stopping || phase != Phase::Stop {
            return;
        }
        self.timed_out = true;
        self.cancelled.store(true, Ordering::SeqCst);
        self.journal_warn("Stop phase timed out");
        // Admit internals so they are not launched after the deadline.
        self.admitted.extend(self.pending_internal.drain(..));

        let unfinished: Vec<TaskId> = self
            .registry
            .records()
            .iter()
            .filter(|r| r.id.phase == phase && !r.is_terminal())
            .map(|r| r.id)
            .collect();
        for id in unfinished {
            self.apply_completion(id, TaskStatus::Failed, "timed out").await;
        }
    }

    /// Apply every phase change the registry now allows.
    async fn advance(&mut self) {
        self.emit(UiEvent::Progress(self.progress()));

        match self.phase {
            AcquisitionPhase::Starting if self.registry.phase_complete(Phase::Start) => {
                self.journal_info("All recordings started");
                self.set_phase(AcquisitionPhase::Running).await;
            }
            AcquisitionPhase::Stopping => {
                if !self.pending_internal.is_empty() && self.registry.external_complete(Phase::Stop) {
                    self.launch_internal().await;
                }
                if self.registry.all_complete() {
                    self.set_phase(AcquisitionPhase::PostProcessing).await;
                }
            }
            _ => {}
        }
    }

    async fn launch_internal(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let url = session.stop_url.clone().unwrap_or_else(|| session.request.target_url.clone());
        let ctx = self.probe_context(&session.directory, &url);
        self.journal_info("External tasks finished, capturing page");

        let kinds: Vec<TaskKind> = self.pending_internal.drain(..).collect();
        for kind in kinds {
            self.admitted.insert(kind);
            self.launch(Phase::Stop, kind, &ctx).await;
        }
    }

    /// Post-processing and summary. Runs once, right after the last task.
    async fn finish(&mut self) -> FreezerResult<AcquisitionSummary> {
        if let Some(timer) = self.phase_timer.take() {
            timer.abort();
        }
        if self.timed_out {
            self.workers.abort_all();
        }
        self.workers.drain().await;

        // Aborted jobs keep running on their threads; hashing must not map
        // files they may still be writing.
        let mut strategy = HashStrategy::Mapped;
        let mut still_running = 0;
        if self.timed_out {
            still_running = self.workers.quiesce(self.config.probe_timeout() * 2).await;
            if still_running > 0 {
                self.journal_warn(format!("{} timed-out tasks still running during hashing", still_running));
                strategy = HashStrategy::Streamed;
            }
        }

        let session = self
            .session
            .as_ref()
            .ok_or_else(|| FreezerError::external("orchestrator", "no acquisition in progress"))?;
        let url = session.stop_url.clone().unwrap_or_else(|| session.request.target_url.clone());
        let input = ReportInput {
            directory: session.directory.clone(),
            acquisition_type: session.request.acquisition_type,
            case_info: session.request.case_info.clone(),
            url: url.clone(),
            started_at: session.started_at,
            finished_at: Utc::now(),
            tasks: self.registry.records().to_vec(),
            manifest: None,
            trusted_time: None,
        };
        let summary_base = (input.directory.clone(), input.acquisition_type, input.case_info.clone());

        self.journal_info("Acquisition finished, computing hashes");
        if let Some(mut journal) = self.journal.take() {
            journal.close();
        }

        let pipeline = self.pipeline.clone();
        let finished_at = input.finished_at;
        let started_at = input.started_at;
        let mut outcome = match tokio::task::spawn_blocking(move || pipeline.run_with(input, strategy)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Post-processing aborted: {}", e);
                PipelineOutcome {
                    errors: vec![format!("post-processing: {}", e)],
                    ..PipelineOutcome::default()
                }
            }
        };
        if still_running > 0 {
            outcome.errors.push(format!(
                "{} timed-out tasks were still writing while hashing; their artifacts may be incomplete",
                still_running
            ));
        }
        for error in &outcome.errors {
            self.emit(UiEvent::Message(format!("Post-processing: {}", error)));
        }

        let (directory, acquisition_type, case_info) = summary_base;
        let summary = AcquisitionSummary {
            directory: directory.clone(),
            acquisition_type,
            case_info,
            url,
            started_at,
            finished_at,
            tasks: self.registry.records().to_vec(),
            manifest: outcome.manifest,
            report: outcome.report,
            trusted_time: outcome.trusted_time,
            post_errors: outcome.errors,
        };

        self.set_phase(AcquisitionPhase::Completed).await;
        self.emit(UiEvent::Progress(100));
        if !self.completion_sent {
            self.completion_sent = true;
            self.emit(UiEvent::Completed(directory));
        }
        Ok(summary)
    }

    fn progress(&self) -> u8 {
        match self.phase {
            AcquisitionPhase::Idle => 0,
            AcquisitionPhase::Starting => self.registry.progress(Phase::Start),
            AcquisitionPhase::Running => 100,
            AcquisitionPhase::Stopping => self.registry.progress(Phase::Stop),
            AcquisitionPhase::PostProcessing | AcquisitionPhase::Completed => 100,
        }
    }

    async fn set_phase(&mut self, phase: AcquisitionPhase) {
        log::debug!("Acquisition phase {} -> {}", self.phase, phase);
        self.phase = phase;
        self.emit(UiEvent::Message(format!("Acquisition {}", phase)));
    }

    async fn emit_record(&self, id: TaskId) {
        if let Some(record) = self.registry.find(id) {
            self.emit(UiEvent::TaskUpdated(record.clone()));
        }
    }

    fn emit(&self, event: UiEvent) {
        let Some(ui) = &self.ui else {
            return;
        };
        match ui.try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(event @ UiEvent::Completed(_))) => {
                let ui = ui.clone();
                tokio::spawn(async move {
                    let _ = ui.send(event).await;
                });
            }
            Err(TrySendError::Full(event)) => log::debug!("Display lagging, dropped {:?}", event),
        }
    }

    fn journal_info(&mut self, message: impl AsRef<str>) {
        match self.journal.as_mut() {
            Some(journal) => journal.info(message),
            None => log::info!("{}", message.as_ref()),
        }
    }

    fn journal_warn(&mut self, message: impl AsRef<str>) {
        match self.journal.as_mut() {
            Some(journal) => journal.warn(message),
            None => log::warn!("{}", message.as_ref()),
        }
    }
}

fn artifact_detail(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FreezerResult;
    use crate::models::CaseInfo;
    use crate::pipeline::{ReportGenerator, TimeAuthority, REPORT_PDF};
    use crate::probes::{OneShotProbe, ProbeError, ProbeResult, RecordingProbe};
    use tempfile::TempDir;

    struct NoClock;

    impl TimeAuthority for NoClock {
        fn now(&self, _server: &str) -> FreezerResult<DateTime<Utc>> {
            Ok(Utc::now())
        }
    }

    struct TouchReport;

    impl ReportGenerator for TouchReport {
        fn generate(&self, input: &ReportInput) -> FreezerResult<PathBuf> {
            let path = input.directory.join(REPORT_PDF);
            std::fs::write(&path, "%PDF").map_err(|e| FreezerError::io(e, path.clone()))?;
            Ok(path)
        }
    }

    struct FakeRecorder;

    impl RecordingProbe for FakeRecorder {
        fn start(&self, _ctx: &ProbeContext) -> ProbeResult<()> {
            Ok(())
        }

        fn stop(&self, ctx: &ProbeContext) -> ProbeResult<PathBuf> {
            ctx.write_artifact(TaskKind::PacketCapture, "pcap")
        }
    }

    struct FakeOneShot(TaskKind);

    impl OneShotProbe for FakeOneShot {
        fn run(&self, ctx: &ProbeContext) -> ProbeResult<PathBuf> {
            ctx.write_artifact(self.0, self.0.name())
        }
    }

    struct Broken;

    impl RecordingProbe for Broken {
        fn start(&self, _ctx: &ProbeContext) -> ProbeResult<()> {
            Err(ProbeError::Command {
                command: "tcpdump".to_string(),
                message: "permission denied".to_string(),
            })
        }

        fn stop(&self, _ctx: &ProbeContext) -> ProbeResult<PathBuf> {
            Err(ProbeError::NotRecording(TaskKind::PacketCapture))
        }
    }

    fn orchestrator(root: &Path, probes: ProbeSet) -> Orchestrator {
        let config = Configuration {
            cases_folder: root.to_path_buf(),
            max_workers: 4,
            ..Configuration::default()
        };
        Orchestrator::new(config, probes).with_pipeline(PostAcquisition::new(NoClock, TouchReport, "ntp.test"))
    }

    fn request(tasks: Vec<TaskKind>) -> AcquisitionRequest {
        AcquisitionRequest {
            tasks,
            ..AcquisitionRequest::web(CaseInfo::new("case"), "https://example.com/")
        }
    }

    #[tokio::test]
    async fn test_start_with_no_tasks_is_running_at_once() -> Result<(), Box<dyn std::error::Error>> {
        let root = TempDir::new()?;
        let mut orch = orchestrator(root.path(), ProbeSet::new());
        let dir = orch.start(request(Vec::new())).await?;

        assert_eq!(orch.phase(), AcquisitionPhase::Running);
        assert!(dir.ends_with("case/web/acquisition_1"));
        assert!(dir.join("screenshot").is_dir());
        assert!(dir.join("downloads").is_dir());
        assert!(dir.join("acquisition.log").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_recording_start_does_not_block() -> Result<(), Box<dyn std::error::Error>> {
        let root = TempDir::new()?;
        let probes = ProbeSet::new().with_recording(TaskKind::PacketCapture, Broken);
        let mut orch = orchestrator(root.path(), probes);
        orch.start(request(vec![TaskKind::PacketCapture, TaskKind::ScreenRecorder]))
            .await?;

        let info = orch.info();
        assert_eq!(info.phase, AcquisitionPhase::Running);
        assert_eq!(info.records.len(), 2);
        assert!(info.records.iter().all(|r| r.status == TaskStatus::Failed));
        assert!(info.records[0].detail.contains("permission denied"));
        assert!(info.records[1].detail.contains("no recording probe"));
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_requires_running_phase() {
        let root = TempDir::new().unwrap();
        let mut orch = orchestrator(root.path(), ProbeSet::new());
        let err = orch.stop(StopRequest::web("https://example.com/")).await.unwrap_err();
        assert!(matches!(
            err,
            FreezerError::InvalidPhase {
                operation: "stop",
                phase: AcquisitionPhase::Idle
            }
        ));
    }

    #[tokio::test]
    async fn test_empty_stop_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let root = TempDir::new()?;
        let mut orch = orchestrator(root.path(), ProbeSet::new());
        orch.start(request(Vec::new())).await?;
        let empty = StopRequest {
            url: "https://example.com/".to_string(),
            external: Vec::new(),
            internal: Vec::new(),
        };
        assert!(matches!(orch.stop(empty).await, Err(FreezerError::EmptyStop)));
        assert_eq!(orch.phase(), AcquisitionPhase::Running);
        Ok(())
    }

    #[tokio::test]
    async fn test_start_twice_is_invalid() -> Result<(), Box<dyn std::error::Error>> {
        let root = TempDir::new()?;
        let mut orch = orchestrator(root.path(), ProbeSet::new());
        orch.start(request(Vec::new())).await?;
        let err = orch.start(request(Vec::new())).await.unwrap_err();
        assert!(matches!(err, FreezerError::InvalidPhase { operation: "start", .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_cases_root_is_fatal() {
        let root = TempDir::new().unwrap();
        let blocker = root.path().join("file");
        std::fs::write(&blocker, "not a folder").unwrap();
        let mut orch = orchestrator(&blocker, ProbeSet::new());

        let err = orch.start(request(vec![TaskKind::PacketCapture])).await.unwrap_err();
        assert!(matches!(err, FreezerError::AcquisitionDirectory { .. }));
        assert_eq!(orch.phase(), AcquisitionPhase::Idle);
        assert!(orch.info().records.is_empty());
    }

    #[tokio::test]
    async fn test_full_cycle_with_unprobed_kinds() -> Result<(), Box<dyn std::error::Error>> {
        let root = TempDir::new()?;
        let probes = ProbeSet::new()
            .with_recording(TaskKind::PacketCapture, FakeRecorder)
            .with_one_shot(TaskKind::Whois, FakeOneShot(TaskKind::Whois))
            .with_one_shot(TaskKind::Screenshot, FakeOneShot(TaskKind::Screenshot));
        let mut orch = orchestrator(root.path(), probes);
        orch.start(request(vec![TaskKind::PacketCapture])).await?;

        let summary = orch
            .stop(StopRequest {
                url: "https://example.com/".to_string(),
                external: vec![TaskKind::PacketCapture, TaskKind::Whois, TaskKind::Headers],
                internal: vec![TaskKind::Screenshot],
            })
            .await?;

        assert_eq!(orch.phase(), AcquisitionPhase::Completed);
        assert_eq!(summary.tasks.len(), 5);
        let failed: Vec<TaskKind> = summary.failed_tasks().map(|t| t.kind()).collect();
        assert_eq!(failed, vec![TaskKind::Headers]);
        assert!(summary.directory.join("whois.txt").exists());
        assert!(summary.directory.join("screenshot.png").exists());
        assert_eq!(summary.report, Some(summary.directory.join(REPORT_PDF)));
        assert!(summary.post_errors.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_phase_timeout_fails_hung_tasks() -> Result<(), Box<dyn std::error::Error>> {
        struct Hang;
        impl OneShotProbe for Hang {
            fn run(&self, _ctx: &ProbeContext) -> ProbeResult<PathBuf> {
                std::thread::sleep(Duration::from_secs(5));
                Err(ProbeError::Timeout(Duration::from_secs(5)))
            }
        }

        let root = TempDir::new()?;
        let config = Configuration {
            cases_folder: root.path().to_path_buf(),
            phase_timeout_secs: Some(1),
            probe_timeout_secs: 1,
            ..Configuration::default()
        };
        let probes = ProbeSet::new()
            .with_one_shot(TaskKind::Traceroute, Hang)
            .with_one_shot(TaskKind::Screenshot, FakeOneShot(TaskKind::Screenshot));
        let mut orch = Orchestrator::new(config, probes)
            .with_pipeline(PostAcquisition::new(NoClock, TouchReport, "ntp.test"));
        orch.start(request(Vec::new())).await?;

        let summary = orch
            .stop(StopRequest {
                url: "https://example.com/".to_string(),
                external: vec![TaskKind::Traceroute],
                internal: vec![TaskKind::Screenshot],
            })
            .await?;

        assert_eq!(summary.tasks.len(), 2);
        assert!(summary.tasks.iter().all(|t| t.status == TaskStatus::Failed));
        assert!(summary.tasks.iter().all(|t| t.detail == "timed out"));
        assert!(!summary.directory.join("screenshot.png").exists());
        // The hung probe outlived the grace period: hashed without mapping.
        assert!(summary.post_errors.iter().any(|e| e.contains("still writing")));
        assert!(summary.manifest.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_timed_out_task_is_awaited_before_hashing() -> Result<(), Box<dyn std::error::Error>> {
        struct Late;
        impl OneShotProbe for Late {
            fn run(&self, ctx: &ProbeContext) -> ProbeResult<PathBuf> {
                std::thread::sleep(Duration::from_millis(1500));
                ctx.write_artifact(TaskKind::Traceroute, "late hops")
            }
        }

        let root = TempDir::new()?;
        let config = Configuration {
            cases_folder: root.path().to_path_buf(),
            phase_timeout_secs: Some(1),
            ..Configuration::default()
        };
        let probes = ProbeSet::new().with_one_shot(TaskKind::Traceroute, Late);
        let mut orch = Orchestrator::new(config, probes)
            .with_pipeline(PostAcquisition::new(NoClock, TouchReport, "ntp.test"));
        orch.start(request(Vec::new())).await?;

        let summary = orch
            .stop(StopRequest {
                url: "https://example.com/".to_string(),
                external: vec![TaskKind::Traceroute],
                internal: Vec::new(),
            })
            .await?;

        assert_eq!(summary.tasks[0].status, TaskStatus::Failed);
        assert_eq!(summary.tasks[0].detail, "timed out");
        assert!(summary.post_errors.is_empty());

        let manifest = crate::pipeline::Manifest::load(&summary.directory)?;
        assert!(manifest.entries.iter().any(|e| e.path == "traceroute.txt"));
        assert!(crate::pipeline::verify(&summary.directory)?.is_intact());
        Ok(())
    }

    #[tokio::test]
    async fn test_instagram_runs_the_web_tasks() -> Result<(), Box<dyn std::error::Error>> {
        let root = TempDir::new()?;
        let probes = ProbeSet::new().with_one_shot(TaskKind::Whois, FakeOneShot(TaskKind::Whois));
        let mut orch = orchestrator(root.path(), probes);
        let dir = orch
            .start(AcquisitionRequest {
                acquisition_type: crate::models::AcquisitionType::Instagram,
                ..request(Vec::new())
            })
            .await?;
        assert!(dir.ends_with("case/instagram/acquisition_1"));

        let summary = orch
            .stop(StopRequest {
                url: "https://instagram.com/acme".to_string(),
                external: vec![TaskKind::Whois],
                internal: Vec::new(),
            })
            .await?;
        assert_eq!(summary.tasks[0].status, TaskStatus::Completed);
        assert!(dir.join("whois.txt").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_pipeline_panic_still_completes() -> Result<(), Box<dyn std::error::Error>> {
        struct ExplodingReport;
        impl ReportGenerator for ExplodingReport {
            fn generate(&self, _input: &ReportInput) -> FreezerResult<PathBuf> {
                panic!("renderer crashed")
            }
        }

        let root = TempDir::new()?;
        let config = Configuration {
            cases_folder: root.path().to_path_buf(),
            ..Configuration::default()
        };
        let probes = ProbeSet::new().with_one_shot(TaskKind::Whois, FakeOneShot(TaskKind::Whois));
        let (ui_tx, mut ui_rx) = mpsc::channel(256);
        let mut orch = Orchestrator::new(config, probes)
            .with_pipeline(PostAcquisition::new(NoClock, ExplodingReport, "ntp.test"))
            .with_ui(ui_tx);
        orch.start(request(Vec::new())).await?;

        let summary = orch
            .stop(StopRequest {
                url: "https://example.com/".to_string(),
                external: vec![TaskKind::Whois],
                internal: Vec::new(),
            })
            .await?;

        assert_eq!(orch.phase(), AcquisitionPhase::Completed);
        assert_eq!(summary.report, None);
        assert_eq!(summary.post_errors.len(), 1);
        assert!(summary.post_errors[0].starts_with("post-processing:"));

        drop(orch);
        let mut completed = 0;
        while let Ok(event) = ui_rx.try_recv() {
            if matches!(event, UiEvent::Completed(_)) {
                completed += 1;
            }
        }
        assert_eq!(completed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_unread_display_does_not_stall() -> Result<(), Box<dyn std::error::Error>> {
        let root = TempDir::new()?;
        let probes = ProbeSet::new()
            .with_recording(TaskKind::PacketCapture, FakeRecorder)
            .with_one_shot(TaskKind::Whois, FakeOneShot(TaskKind::Whois));
        let (ui_tx, mut ui_rx) = mpsc::channel(1);
        let mut orch = orchestrator(root.path(), probes).with_ui(ui_tx);

        let run = async {
            orch.start(request(vec![TaskKind::PacketCapture])).await?;
            orch.stop(StopRequest {
                url: "https://example.com/".to_string(),
                external: vec![TaskKind::PacketCapture, TaskKind::Whois],
                internal: Vec::new(),
            })
            .await
        };
        let summary = tokio::time::timeout(Duration::from_secs(10), run).await??;
        assert!(summary.failed_tasks().next().is_none());

        let completed = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = ui_rx.recv().await {
                if let UiEvent::Completed(directory) = event {
                    return Some(directory);
                }
            }
            None
        })
        .await?;
        assert_eq!(completed, Some(summary.directory));
        Ok(())
    }
}
