//! Bounded-concurrency request fan-out.
//!
//! Every task runs start-to-finish on its own tokio task, at most `workers` at a time.
//! Results are returned in completion order; a task that panics is reported as a failed
//! record for its own identifier so the batch always yields one record per input.

use crate::domain::model::TaskResult;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Something the harness can name in its result records.
pub trait FanOutTask: Send + 'static {
    fn task_id(&self) -> String;
}

/// A per-task report the harness can synthesise when the worker itself failed.
pub trait FanOutReport: Send + 'static {
    fn worker_failed(task_id: String, reason: String) -> Self;
}

impl FanOutReport for TaskResult {
    fn worker_failed(task_id: String, reason: String) -> Self {
        TaskResult::error(task_id, reason)
    }
}

#[derive(Debug, Clone)]
pub struct FanOut {
    workers: usize,
    stagger: Duration,
}

impl FanOut {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            stagger: Duration::ZERO,
        }
    }

    /// Pause between task launches, to spread the first wave of requests.
    pub fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub async fn run<T, R, F, Fut>(&self, tasks: Vec<T>, work: F) -> Vec<R>
    where
        T: FanOutTask,
        R: FanOutReport,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        self.run_with_progress(tasks, work, |_| {}).await
    }

    /// Like [`FanOut::run`], calling `on_complete` for each record as it arrives.
    pub async fn run_with_progress<T, R, F, Fut, P>(
        &self,
        tasks: Vec<T>,
        work: F,
        mut on_complete: P,
    ) -> Vec<R>
    where
        T: FanOutTask,
        R: FanOutReport,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        P: FnMut(&R),
    {
        let total = tasks.len();
        let permits = Arc::new(Semaphore::new(self.workers));
        let work = Arc::new(work);
        let mut set = JoinSet::new();
        let mut results = Vec::with_capacity(total);

        tracing::debug!("Fanning out {} tasks over {} workers", total, self.workers);

        for (index, task) in tasks.into_iter().enumerate() {
            if index > 0 && !self.stagger.is_zero() {
                tokio::time::sleep(self.stagger).await;
            }

            // Collect whatever already finished while we wait for a free slot.
            let permit = loop {
                match Arc::clone(&permits).try_acquire_owned() {
                    Ok(permit) => break permit,
                    Err(_) => {
                        if let Some(joined) = set.join_next().await {
                            if let Some(record) = Self::settle(joined) {
                                on_complete(&record);
                                results.push(record);
                            }
                        }
                    }
                }
            };

            let work = Arc::clone(&work);
            set.spawn(async move {
                let _permit = permit;
                let task_id = task.task_id();
                match AssertUnwindSafe((*work)(task)).catch_unwind().await {
                    Ok(record) => record,
                    Err(panic) => {
                        let reason = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "worker panicked".to_string());
                        tracing::error!("Task {} panicked: {}", task_id, reason);
                        R::worker_failed(task_id, reason)
                    }
                }
            });
        }

        while let Some(joined) = set.join_next().await {
            if let Some(record) = Self::settle(joined) {
                on_complete(&record);
                results.push(record);
            }
        }

        if results.len() != total {
            tracing::warn!("Fan-out collected {} of {} results", results.len(), total);
        }
        results
    }

    fn settle<R>(joined: Result<R, tokio::task::JoinError>) -> Option<R> {
        match joined {
            Ok(record) => Some(record),
            Err(e) => {
                // Panics are caught inside the task; only runtime shutdown lands here.
                tracing::error!("Fan-out worker was cancelled: {}", e);
                None
            }
        }
    }
}
