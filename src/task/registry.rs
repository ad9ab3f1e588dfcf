//! Acquisition status registry
//!
//! Insertion-ordered table of task records for one acquisition. Start-phase
//! and stop-phase records accumulate into the same registry so the final
//! report carries the whole history of the acquisition.
//!
//! The registry does no locking of its own: the orchestrator is its only
//! writer and funnels every mutation through its event loop.

use super::{Phase, TaskId, TaskRecord, TaskState, TaskStatus};
use crate::errors::{FreezerError, FreezerResult};
use chrono::Utc;

#[derive(Debug, Default, Clone)]
pub struct StatusRegistry {
    records: Vec<TaskRecord>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new record.
    pub fn add(&mut self, id: TaskId, state: TaskState, status: TaskStatus) -> FreezerResult<&TaskRecord> {
        if self.position(id).is_some() {
            return Err(FreezerError::DuplicateTask(id));
        }
        if state == TaskState::Finished && !status.is_terminal() {
            return Err(FreezerError::InvalidTransition {
                id,
                reason: format!("cannot register a finished task as {}", status),
            });
        }
        self.records.push(TaskRecord::new(id, state, status));
        Ok(&self.records[self.records.len() - 1])
    }

    /// Update a record in place.
    ///
    /// Returns `Ok(false)` without touching anything when the record is
    /// already finished, so duplicate completion notices are harmless.
    pub fn update(
        &mut self,
        id: TaskId,
        state: TaskState,
        status: TaskStatus,
        detail: impl Into<String>,
    ) -> FreezerResult<bool> {
        if state == TaskState::Finished && !status.is_terminal() {
            return Err(FreezerError::InvalidTransition {
                id,
                reason: format!("cannot finish with status {}", status),
            });
        }

        let index = self.position(id).ok_or(FreezerError::UnknownTask(id))?;
        let record = &mut self.records[index];

        if record.is_finished() {
            return Ok(false);
        }
        if state == TaskState::NotStarted && record.state == TaskState::Started {
            return Err(FreezerError::InvalidTransition {
                id,
                reason: "a started task cannot go back to not started".to_string(),
            });
        }

        let now = Utc::now();
        if state != TaskState::NotStarted && record.started_at.is_none() {
            record.started_at = Some(now);
        }
        if state == TaskState::Finished {
            record.finished_at = Some(now);
        }
        record.state = state;
        record.status = status;
        record.detail = detail.into();
        Ok(true)
    }

    pub fn find(&self, id: TaskId) -> Option<&TaskRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// True iff there is at least one record and every record is terminal.
    pub fn all_complete(&self) -> bool {
        !self.records.is_empty() && self.records.iter().all(TaskRecord::is_terminal)
    }

    /// True iff every record of `phase` is terminal (vacuously true when the
    /// phase has no records).
    pub fn phase_complete(&self, phase: Phase) -> bool {
        self.in_phase(phase).all(TaskRecord::is_terminal)
    }

    /// Same as `phase_complete`, restricted to external tasks.
    pub fn external_complete(&self, phase: Phase) -> bool {
        self.in_phase(phase)
            .filter(|r| !r.kind().is_internal())
            .all(TaskRecord::is_terminal)
    }

    /// Share of terminal records in `phase`, 0 to 100.
    pub fn progress(&self, phase: Phase) -> u8 {
        let total = self.in_phase(phase).count();
        if total == 0 {
            return 100;
        }
        let done = self.in_phase(phase).filter(|r| r.is_terminal()).count();
        ((done * 100) / total) as u8
    }

    pub fn records(&self) -> &[TaskRecord] {
        &self.records
    }

    fn in_phase(&self, phase: Phase) -> impl Iterator<Item = &TaskRecord> {
        self.records.iter().filter(move |r| r.id.phase == phase)
    }

    fn position(&self, id: TaskId) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }
}
