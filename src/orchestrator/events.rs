//! Messages flowing into the orchestrator (from workers, timers and external
//! collaborators) and out of it (to the terminal UI).

use crate::task::{Phase, TaskId, TaskRecord, TaskStatus};
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Everything that can move an acquisition forward.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionEvent {
    TaskStarted {
        id: TaskId,
    },
    TaskCompleted {
        id: TaskId,
        status: TaskStatus,
        detail: String,
    },
    /// The wall-clock bound of `phase` elapsed.
    PhaseTimeout {
        phase: Phase,
    },
}

/// Cloneable handle used to post events into an orchestrator's queue.
///
/// Posting never blocks, so it is safe from worker threads and from code
/// running outside the tokio runtime.
#[derive(Debug, Clone)]
pub struct TaskNotifier {
    sender: mpsc::UnboundedSender<AcquisitionEvent>,
}

impl TaskNotifier {
    pub(crate) fn new(sender: mpsc::UnboundedSender<AcquisitionEvent>) -> Self {
        Self { sender }
    }

    /// Returns false once the orchestrator is gone.
    pub fn post(&self, event: AcquisitionEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    pub fn started(&self, id: TaskId) -> bool {
        self.post(AcquisitionEvent::TaskStarted { id })
    }

    pub fn completed(&self, id: TaskId, status: TaskStatus, detail: impl Into<String>) -> bool {
        self.post(AcquisitionEvent::TaskCompleted {
            id,
            status,
            detail: detail.into(),
        })
    }
}

/// Updates for whatever is displaying the acquisition.
#[derive(Debug, Clone)]
pub enum UiEvent {
    /// Percentage of the current phase's tasks that are terminal.
    Progress(u8),
    TaskAdded(TaskRecord),
    TaskUpdated(TaskRecord),
    Message(String),
    /// The acquisition finished; carries its directory. Sent exactly once.
    Completed(PathBuf),
}
