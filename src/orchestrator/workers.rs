//! Bounded pool running blocking probe work off the async runtime.
//!
//! Each job runs on `spawn_blocking` behind a semaphore permit. The wrapper
//! task always posts exactly one `TaskStarted` and one `TaskCompleted` for its
//! task, including when the job panics. The permit travels with the job onto
//! its thread, so it is held until the job returns even if the wrapper is
//! aborted.

use super::events::TaskNotifier;
use crate::probes::ProbeResult;
use crate::task::{TaskId, TaskStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

const MAX_POOL_SIZE: usize = 4096;

pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    size: u32,
    tasks: JoinSet<()>,
    notifier: TaskNotifier,
}

impl WorkerPool {
    pub fn new(max_workers: usize, notifier: TaskNotifier) -> Self {
        let size = max_workers.clamp(1, MAX_POOL_SIZE);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size: size as u32,
            tasks: JoinSet::new(),
            notifier,
        }
    }

    /// Queue `job` for `id`. Its `Ok` value becomes the record's detail.
    pub fn launch<F>(&mut self, id: TaskId, job: F)
    where
        F: FnOnce() -> ProbeResult<String> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let notifier = self.notifier.clone();

        self.tasks.spawn(async move {
            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    notifier.completed(id, TaskStatus::Failed, "worker pool closed");
                    return;
                }
            };

            notifier.started(id);
            let outcome = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                job()
            })
            .await;
            let (status, detail) = match outcome {
                Ok(Ok(detail)) => (TaskStatus::Completed, detail),
                Ok(Err(e)) => (TaskStatus::Failed, e.to_string()),
                Err(e) => (TaskStatus::Failed, join_failure(e)),
            };
            notifier.completed(id, status, detail);
        });
    }

    pub fn active(&self) -> usize {
        self.tasks.len()
    }

    /// Stop waiting on jobs still queued or running. Blocking jobs already on
    /// a thread run to completion but their results are dropped.
    pub fn abort_all(&mut self) {
        self.tasks.abort_all();
    }

    /// Number of jobs currently executing on a blocking thread.
    pub fn running(&self) -> usize {
        self.size as usize - self.semaphore.available_permits()
    }

    /// Wait up to `grace` for every blocking job to return. Call after
    /// `drain`, once nothing is queued. Returns how many are still running.
    pub async fn quiesce(&self, grace: Duration) -> usize {
        match tokio::time::timeout(grace, self.semaphore.acquire_many(self.size)).await {
            Ok(Ok(_all)) => 0,
            _ => self.running(),
        }
    }

    /// Wait for every wrapper task to end.
    pub async fn drain(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    log::error!("Worker task failed: {}", e);
                }
            }
        }
    }
}

fn join_failure(e: JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let payload = e.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("worker panicked: {}", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::events::AcquisitionEvent;
    use crate::probes::ProbeError;
    use crate::task::{Phase, TaskKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn completions(rx: &mut mpsc::UnboundedReceiver<AcquisitionEvent>) -> Vec<(TaskId, TaskStatus, String)> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let AcquisitionEvent::TaskCompleted { id, status, detail } = event {
                out.push((id, status, detail));
            }
        }
        out
    }

    #[tokio::test]
    async fn test_results_become_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pool = WorkerPool::new(2, TaskNotifier::new(tx));
        let ok = TaskId::new(Phase::Stop, TaskKind::Whois);
        let failed = TaskId::new(Phase::Stop, TaskKind::Headers);

        pool.launch(ok, || Ok("whois.txt".to_string()));
        pool.launch(failed, || Err(ProbeError::Network("connection refused".to_string())));
        pool.drain().await;

        let mut done = completions(&mut rx);
        done.sort_by_key(|(id, _, _)| id.kind.name());
        assert_eq!(done.len(), 2);
        assert_eq!(done[0], (failed, TaskStatus::Failed, "network error: connection refused".to_string()));
        assert_eq!(done[1], (ok, TaskStatus::Completed, "whois.txt".to_string()));
    }

    #[tokio::test]
    async fn test_panic_becomes_failed_record() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pool = WorkerPool::new(1, TaskNotifier::new(tx));
        let id = TaskId::new(Phase::Stop, TaskKind::Traceroute);

        pool.launch(id, || panic!("probe exploded"));
        pool.drain().await;

        let done = completions(&mut rx);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].1, TaskStatus::Failed);
        assert!(done[0].2.contains("probe exploded"));
    }

    #[tokio::test]
    async fn test_quiesce_waits_for_aborted_blocking_jobs() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut pool = WorkerPool::new(2, TaskNotifier::new(tx));
        let finished = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&finished);

        pool.launch(TaskId::new(Phase::Stop, TaskKind::Traceroute), move || {
            std::thread::sleep(Duration::from_millis(300));
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(String::new())
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.running(), 1);

        pool.abort_all();
        pool.drain().await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);

        assert_eq!(pool.quiesce(Duration::from_secs(5)).await, 0);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_quiesce_gives_up_after_grace() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut pool = WorkerPool::new(2, TaskNotifier::new(tx));
        pool.launch(TaskId::new(Phase::Stop, TaskKind::Whois), || {
            std::thread::sleep(Duration::from_millis(500));
            Ok(String::new())
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.abort_all();
        pool.drain().await;

        assert_eq!(pool.quiesce(Duration::from_millis(20)).await, 1);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut pool = WorkerPool::new(2, TaskNotifier::new(tx));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for kind in TaskKind::DEFAULT_STOP {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.launch(TaskId::new(Phase::Stop, kind), move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(30));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(String::new())
            });
        }
        pool.drain().await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.active(), 0);
    }
}
