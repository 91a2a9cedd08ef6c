//! Owned set of detached background tasks.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tracing::Instrument;

/// Outcome of draining a [`BackgroundTasks`] set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: usize,
    pub failed: usize,
    pub aborted: usize,
}

#[derive(Default)]
struct TaskSetInner {
    set: Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

/// Runs fire-and-forget work outside the caller's lifetime.
///
/// Tasks are owned by this set rather than the runtime, so shutdown can wait
/// for them. A panicking task is logged and counted and never reaches the
/// code that spawned it. Cloning shares the same set.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    inner: Arc<TaskSetInner>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a task. Returns false if the set has been drained already.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(&self, name: &'static str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.lock();
        if self.inner.closed.load(Ordering::SeqCst) {
            metrics::counter!("background_tasks_rejected_total").increment(1);
            tracing::warn!(task = name, "background task rejected after shutdown");
            return false;
        }

        while let Some(result) = set.try_join_next() {
            Self::observe(result);
        }
        set.spawn(task.instrument(tracing::info_span!("background", task = name)));
        true
    }

    /// Number of tasks not yet reaped.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Closes the set and waits up to `timeout` for in-flight tasks.
    ///
    /// Tasks still running at the deadline are aborted.
    pub async fn drain(&self, timeout: Duration) -> DrainReport {
        let mut set = {
            let mut guard = self.lock();
            self.inner.closed.store(true, Ordering::SeqCst);
            std::mem::take(&mut *guard)
        };

        let mut report = DrainReport::default();
        let joined = tokio::time::timeout(timeout, async {
            while let Some(result) = set.join_next().await {
                if Self::observe(result) {
                    report.completed += 1;
                } else {
                    report.failed += 1;
                }
            }
        })
        .await;

        if joined.is_err() {
            report.aborted = set.len();
            set.shutdown().await;
            tracing::warn!(aborted = report.aborted, "background tasks aborted at drain deadline");
        }

        tracing::info!(
            completed = report.completed,
            failed = report.failed,
            aborted = report.aborted,
            "background tasks drained"
        );
        report
    }

    /// Returns true if the task finished normally.
    fn observe(result: Result<(), JoinError>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) if e.is_panic() => {
                metrics::counter!("background_tasks_failed_total").increment(1);
                tracing::error!(error = %e, "background task panicked");
                false
            }
            Err(_) => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.inner.set.lock().unwrap_or_else(|e| e.into_inner())
    }
}
