//! Bounded-concurrency executor for per-repository Git work.
//!
//! Submission acquires a semaphore permit, so `submit` blocks while the
//! configured number of tasks is in flight. Task bodies are blocking (they
//! drive Git) and run on the blocking pool. A panicking task is reported
//! back to the caller instead of propagating; one worker failing never
//! cancels its siblings.

use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

type TaskResult = (String, Result<(), tokio::task::JoinError>);
type TaskFuture = Pin<Box<dyn Future<Output = TaskResult> + Send>>;

pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    delay: Duration,
    tasks: FuturesUnordered<TaskFuture>,
    dispatched: usize,
}

impl WorkerPool {
    pub fn new(concurrency: usize, delay_seconds: u64) -> Self {
        WorkerPool {
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            delay: Duration::from_secs(delay_seconds),
            tasks: FuturesUnordered::new(),
            dispatched: 0,
        }
    }

    /// Schedules one blocking task. Blocks while the pool is saturated and
    /// honours the configured inter-task delay.
    pub async fn submit<F>(&mut self, label: String, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.dispatched > 0 && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.dispatched += 1;

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("worker pool semaphore closed");

        let handle = tokio::task::spawn_blocking(move || {
            task();
            drop(permit);
        });
        self.tasks.push(Box::pin(async move { (label, handle.await) }));
    }

    /// Waits for every submitted task. Returns `(label, panic message)` for
    /// each task that did not complete normally.
    pub async fn wait_and_close(&mut self) -> Vec<(String, String)> {
        let mut failures = Vec::new();
        while let Some((label, result)) = self.tasks.next().await {
            if let Err(err) = result {
                let reason = if err.is_panic() {
                    "task panicked".to_string()
                } else {
                    err.to_string()
                };
                failures.push((label, reason));
            }
        }
        failures
    }
}
