//! Bounded worker pool for long-running operations.
//!
//! Work is admitted FIFO to a fixed number of workers. Each submission gets a
//! process-unique task id that callers use to poll or wait on the outcome.
//! Completed outcomes are retained in a bounded cache and the oldest are
//! evicted once it is full.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tessera_core::config::RunnerConfig;
use tessera_core::{Error, Result, Service, ServiceStatus, ServiceType, TaskId};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A boxed unit of work.
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

const ABANDONED: &str = "task was abandoned before completing";

/// Status of a submitted task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued or executing.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed(String),
}

impl TaskStatus {
    /// Returns true once the task can no longer change status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// A snapshot of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Task id.
    pub task_id: TaskId,
    /// Description given at submission.
    pub description: String,
    /// Current status.
    pub status: TaskStatus,
}

struct TaskEntry {
    description: String,
    status: watch::Receiver<TaskStatus>,
}

impl TaskEntry {
    fn current(&self) -> TaskStatus {
        let status = self.status.borrow().clone();
        // A running task whose sender is gone will never finish.
        if !status.is_terminal() && self.status.has_changed().is_err() {
            return TaskStatus::Failed(ABANDONED.to_string());
        }
        status
    }
}

struct Job {
    task_id: TaskId,
    work: TaskFuture,
    status: watch::Sender<TaskStatus>,
}

struct Registry {
    tasks: DashMap<TaskId, TaskEntry>,
    completed: Mutex<VecDeque<TaskId>>,
    cache_size: usize,
}

impl Registry {
    fn record_completion(&self, task_id: TaskId) {
        let mut completed = self.completed.lock();
        completed.push_back(task_id);
        while completed.len() > self.cache_size {
            if let Some(evicted) = completed.pop_front() {
                self.tasks.remove(&evicted);
                debug!(task_id = evicted, "Evicted completed task");
            }
        }
    }
}

/// Executes submitted work on a fixed-size pool of workers.
pub struct AsyncTaskRunner {
    threads: usize,
    status: ServiceStatus,
    next_id: AtomicU64,
    registry: Arc<Registry>,
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AsyncTaskRunner {
    /// Creates a stopped runner.
    #[must_use]
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            threads: config.threads.max(1),
            status: ServiceStatus::new(),
            next_id: AtomicU64::new(1),
            registry: Arc::new(Registry {
                tasks: DashMap::new(),
                completed: Mutex::new(VecDeque::new()),
                cache_size: config.cache_size.max(1),
            }),
            sender: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Enqueues `work` and returns its task id without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotStarted`] if the runner is not running.
    pub fn submit<F>(&self, description: impl Into<String>, work: F) -> Result<TaskId>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let sender = self.sender.lock().clone().ok_or_else(|| self.not_started())?;

        let task_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let description = description.into();
        let (status_tx, status_rx) = watch::channel(TaskStatus::Running);
        self.registry
            .tasks
            .insert(task_id, TaskEntry { description: description.clone(), status: status_rx });

        let job = Job { task_id, work: Box::pin(work), status: status_tx };
        if sender.send(job).is_err() {
            self.registry.tasks.remove(&task_id);
            return Err(self.not_started());
        }

        counter!("tessera_tasks_submitted_total").increment(1);
        debug!(task_id, description = %description, "Submitted task");
        Ok(task_id)
    }

    /// Returns the current status of a task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TaskNotFound`] for unknown or evicted ids.
    pub fn status(&self, task_id: TaskId) -> Result<TaskStatus> {
        self.registry
            .tasks
            .get(&task_id)
            .map(|entry| entry.current())
            .ok_or(Error::TaskNotFound(task_id))
    }

    /// Returns a snapshot of a task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TaskNotFound`] for unknown or evicted ids.
    pub fn info(&self, task_id: TaskId) -> Result<TaskInfo> {
        self.registry
            .tasks
            .get(&task_id)
            .map(|entry| TaskInfo {
                task_id,
                description: entry.description.clone(),
                status: entry.current(),
            })
            .ok_or(Error::TaskNotFound(task_id))
    }

    /// Lists every retained task ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<TaskInfo> {
        let mut tasks: Vec<_> = self
            .registry
            .tasks
            .iter()
            .map(|entry| TaskInfo {
                task_id: *entry.key(),
                description: entry.description.clone(),
                status: entry.current(),
            })
            .collect();
        tasks.sort_by_key(|t| t.task_id);
        tasks
    }

    /// Waits until the task finishes or `timeout` elapses.
    ///
    /// The task keeps running after a timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::TaskNotFound`] for unknown or evicted ids
    /// - [`Error::Timeout`] if the deadline passes first
    /// - [`Error::TaskFailed`] if the task finished with an error
    pub async fn await_completion(&self, task_id: TaskId, timeout: Duration) -> Result<()> {
        let mut rx = self
            .registry
            .tasks
            .get(&task_id)
            .map(|entry| entry.status.clone())
            .ok_or(Error::TaskNotFound(task_id))?;

        let waited = tokio::time::timeout(timeout, rx.wait_for(TaskStatus::is_terminal)).await;
        let outcome = match waited {
            Err(_) => return Err(Error::Timeout { task_id, timeout }),
            Ok(Err(_)) => TaskStatus::Failed(ABANDONED.to_string()),
            Ok(Ok(status)) => status.clone(),
        };

        match outcome {
            TaskStatus::Succeeded => Ok(()),
            TaskStatus::Failed(message) => Err(Error::TaskFailed { task_id, message }),
            TaskStatus::Running => {
                Err(Error::TaskFailed { task_id, message: ABANDONED.to_string() })
            }
        }
    }

    fn not_started(&self) -> Error {
        Error::NotStarted(ServiceType::AsyncRunner.to_string())
    }
}

/// Aborts the in-flight task if its worker is aborted.
struct AbortOnDrop(tokio::task::AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn worker_loop(
    worker: usize,
    queue: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>,
    registry: Arc<Registry>,
) {
    loop {
        let job = { queue.lock().await.recv().await };
        let Some(job) = job else {
            debug!(worker, "Task queue closed, worker exiting");
            return;
        };

        gauge!("tessera_tasks_running").increment(1.0);
        let handle = tokio::spawn(job.work);
        let _abort = AbortOnDrop(handle.abort_handle());
        let status = match handle.await {
            Ok(Ok(())) => TaskStatus::Succeeded,
            Ok(Err(e)) => TaskStatus::Failed(e.to_string()),
            Err(e) if e.is_panic() => TaskStatus::Failed("task panicked".to_string()),
            Err(e) => TaskStatus::Failed(e.to_string()),
        };
        gauge!("tessera_tasks_running").decrement(1.0);

        let outcome = if status == TaskStatus::Succeeded { "succeeded" } else { "failed" };
        counter!("tessera_tasks_completed_total", "outcome" => outcome).increment(1);
        if let TaskStatus::Failed(ref message) = status {
            warn!(task_id = job.task_id, error = %message, "Task failed");
        } else {
            debug!(task_id = job.task_id, "Task succeeded");
        }

        job.status.send_replace(status);
        registry.record_completion(job.task_id);
    }
}

#[async_trait]
impl Service for AsyncTaskRunner {
    fn service_type(&self) -> ServiceType {
        ServiceType::AsyncRunner
    }

    async fn start(&self) -> Result<()> {
        if !self.status.begin_start() {
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Arc::new(tokio::sync::Mutex::new(rx));
        let mut workers = self.workers.lock();
        for worker in 0..self.threads {
            workers.push(tokio::spawn(worker_loop(worker, queue.clone(), self.registry.clone())));
        }
        *self.sender.lock() = Some(tx);

        info!(
            threads = self.threads,
            cache_size = self.registry.cache_size,
            "Async task runner started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if !self.status.begin_stop() {
            return Ok(());
        }

        self.sender.lock().take();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in &workers {
            handle.abort();
        }
        for handle in workers {
            let _ = handle.await;
        }

        info!("Async task runner stopped");
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.status.is_started()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn started(threads: usize, cache_size: usize) -> AsyncTaskRunner {
        let runner = AsyncTaskRunner::new(&RunnerConfig { threads, cache_size });
        runner.start().await.unwrap();
        runner
    }

    #[tokio::test]
    async fn test_submit_requires_start() {
        let runner = AsyncTaskRunner::new(&RunnerConfig::default());
        let err = runner.submit("noop", async { Ok(()) }).unwrap_err();
        assert!(matches!(err, Error::NotStarted(_)));
    }

    #[tokio::test]
    async fn test_success_and_failure() {
        let runner = started(2, 16).await;

        let ok = runner.submit("ok", async { Ok(()) }).unwrap();
        let bad = runner
            .submit("bad", async { Err(Error::Admin("donor unreachable".to_string())) })
            .unwrap();
        assert_ne!(ok, bad);

        runner.await_completion(ok, Duration::from_secs(5)).await.unwrap();
        assert_eq!(runner.status(ok).unwrap(), TaskStatus::Succeeded);

        let err = runner.await_completion(bad, Duration::from_secs(5)).await.unwrap_err();
        match err {
            Error::TaskFailed { task_id, message } => {
                assert_eq!(task_id, bad);
                assert!(message.contains("donor unreachable"));
            }
            other => panic!("unexpected error: {other}"),
        }

        runner.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_await_times_out() {
        let runner = started(1, 16).await;
        let id = runner
            .submit("slow", async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .unwrap();

        let err = runner.await_completion(id, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { task_id, .. } if task_id == id));
        assert_eq!(runner.status(id).unwrap(), TaskStatus::Running);

        runner.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let runner = started(1, 16).await;
        assert!(matches!(runner.status(999), Err(Error::TaskNotFound(999))));
        assert!(matches!(
            runner.await_completion(999, Duration::from_millis(10)).await,
            Err(Error::TaskNotFound(999))
        ));
        runner.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_evicts_oldest_completed() {
        let runner = started(1, 2).await;

        let mut ids = Vec::new();
        for i in 0..3 {
            let id = runner.submit(format!("task-{i}"), async { Ok(()) }).unwrap();
            runner.await_completion(id, Duration::from_secs(5)).await.unwrap();
            ids.push(id);
        }

        // Completion is recorded right after the status flips.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(runner.status(ids[0]), Err(Error::TaskNotFound(_))));
        assert_eq!(runner.status(ids[1]).unwrap(), TaskStatus::Succeeded);
        assert_eq!(runner.status(ids[2]).unwrap(), TaskStatus::Succeeded);
        assert_eq!(runner.list().len(), 2);

        runner.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_task_fails() {
        let runner = started(1, 16).await;
        let id = runner
            .submit("panics", async {
                if true {
                    panic!("boom");
                }
                Ok(())
            })
            .unwrap();

        let err = runner.await_completion(id, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, Error::TaskFailed { .. }));

        // The worker survives a panicking task.
        let next = runner.submit("after", async { Ok(()) }).unwrap();
        runner.await_completion(next, Duration::from_secs(5)).await.unwrap();

        runner.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_abandons_pending_tasks() {
        let runner = started(1, 16).await;
        let blocker = runner
            .submit("blocker", async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .unwrap();
        let queued = runner.submit("queued", async { Ok(()) }).unwrap();

        runner.stop().await.unwrap();
        assert!(!runner.is_started());

        assert!(matches!(runner.status(blocker).unwrap(), TaskStatus::Failed(_)));
        assert!(matches!(
            runner.await_completion(queued, Duration::from_secs(1)).await,
            Err(Error::TaskFailed { .. })
        ));
        assert!(matches!(runner.submit("late", async { Ok(()) }), Err(Error::NotStarted(_))));
    }
}
