//! Recording probes backed by an external command (`tcpdump`, `ffmpeg`).
//!
//! The command runs from `start()` until `stop()`. Its artifact is the file
//! substituted for `{output}` in the command template.

use super::{ProbeContext, ProbeError, ProbeResult, RecordingProbe};
use crate::config::render_command;
use crate::task::TaskKind;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How to end the recording process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Kill the process; the tool must write its output unbuffered.
    Kill,
    /// Send `q` on stdin and wait for a clean exit (ffmpeg finalizes the file).
    StdinQuit,
}

const GRACEFUL_EXIT: Duration = Duration::from_secs(10);
const STARTUP_GRACE: Duration = Duration::from_millis(300);

pub struct CommandRecorder {
    kind: TaskKind,
    template: Vec<String>,
    stop_mode: StopMode,
    child: Mutex<Option<Child>>,
}

impl CommandRecorder {
    pub fn new(kind: TaskKind, template: Vec<String>, stop_mode: StopMode) -> Self {
        Self {
            kind,
            template,
            stop_mode,
            child: Mutex::new(None),
        }
    }

    fn command_line(&self, ctx: &ProbeContext) -> Vec<String> {
        let output = ctx.artifact_path(self.kind).display().to_string();
        render_command(&self.template, &[("output", &output), ("url", &ctx.url)])
    }

    fn command_error(&self, message: impl Into<String>) -> ProbeError {
        ProbeError::Command {
            command: self.template.first().cloned().unwrap_or_default(),
            message: message.into(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Child>> {
        // The child handle stays valid even if a worker panicked holding the lock.
        self.child.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RecordingProbe for CommandRecorder {
    fn start(&self, ctx: &ProbeContext) -> ProbeResult<()> {
        let mut slot = self.lock();
        if slot.is_some() {
            return Err(self.command_error("recording already running"));
        }

        let args = self.command_line(ctx);
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| ProbeError::Unsupported(format!("no command configured for {}", self.kind)))?;

        log::debug!("Starting {}: {:?}", self.kind, args);
        let mut child = Command::new(program)
            .args(rest)
            .current_dir(&ctx.directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| self.command_error(e.to_string()))?;

        // Catch tools that exit immediately (missing permissions, bad device).
        std::thread::sleep(STARTUP_GRACE);
        if let Some(status) = child.try_wait().map_err(|e| self.command_error(e.to_string()))? {
            return Err(self.command_error(format!("exited right after start with {}", status)));
        }

        *slot = Some(child);
        Ok(())
    }

    fn stop(&self, ctx: &ProbeContext) -> ProbeResult<PathBuf> {
        let mut child = self.lock().take().ok_or(ProbeError::NotRecording(self.kind))?;

        match self.stop_mode {
            StopMode::Kill => {
                if let Err(e) = child.kill() {
                    log::warn!("Failed to kill {} process: {}", self.kind, e);
                }
                let _ = child.wait();
            }
            StopMode::StdinQuit => {
                if let Some(mut stdin) = child.stdin.take() {
                    let _ = stdin.write_all(b"q");
                }
                let deadline = Instant::now() + GRACEFUL_EXIT;
                loop {
                    match child.try_wait() {
                        Ok(Some(_)) => break,
                        Ok(None) if Instant::now() < deadline => {
                            std::thread::sleep(Duration::from_millis(100));
                        }
                        _ => {
                            log::warn!("{} did not exit in time, killing it", self.kind);
                            let _ = child.kill();
                            let _ = child.wait();
                            break;
                        }
                    }
                }
            }
        }

        let output = ctx.artifact_path(self.kind);
        if !output.exists() {
            return Err(self.command_error(format!("no output written to {}", output.display())));
        }
        Ok(output)
    }
}

impl Drop for CommandRecorder {
    fn drop(&mut self) {
        if let Some(mut child) = self.lock().take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
