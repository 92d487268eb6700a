//! Scheduler service for named periodic jobs.
//!
//! Every job runs on its own interval. A shared semaphore bounds how many
//! job runs execute at once. Stopping the scheduler cancels every job.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tessera_core::{Error, Result, Service, ServiceStatus, ServiceType};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

/// One run of a periodic job.
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Runs named jobs on fixed intervals.
pub struct SchedulerService {
    threads: usize,
    permits: Mutex<Option<Arc<Semaphore>>>,
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
    status: ServiceStatus,
}

impl SchedulerService {
    /// Creates a scheduler running at most `threads` jobs at a time.
    #[must_use]
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
            permits: Mutex::new(None),
            jobs: Mutex::new(HashMap::new()),
            status: ServiceStatus::new(),
        }
    }

    /// Schedules `job` every `interval`, first after one interval has passed.
    /// Replaces any job with the same name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotStarted`] if the scheduler is not running.
    pub fn schedule<F>(&self, name: impl Into<String>, interval: Duration, job: F) -> Result<()>
    where
        F: Fn() -> JobFuture + Send + Sync + 'static,
    {
        let permits = self
            .permits
            .lock()
            .clone()
            .ok_or_else(|| Error::NotStarted(ServiceType::Scheduler.to_string()))?;
        let name = name.into();

        let job_name = name.clone();
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Ok(_permit) = permits.acquire().await else {
                    return;
                };
                trace!(job = %job_name, "Running scheduled job");
                job().await;
            }
        });

        if let Some(previous) = self.jobs.lock().insert(name.clone(), handle) {
            previous.abort();
        }
        debug!(job = %name, interval_ms = interval.as_millis() as u64, "Scheduled job");
        Ok(())
    }

    /// Cancels a job. Returns false if no such job exists.
    pub fn cancel(&self, name: &str) -> bool {
        match self.jobs.lock().remove(name) {
            Some(handle) => {
                handle.abort();
                debug!(job = %name, "Cancelled job");
                true
            }
            None => false,
        }
    }

    /// Names of scheduled jobs, sorted.
    #[must_use]
    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.jobs.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl Service for SchedulerService {
    fn service_type(&self) -> ServiceType {
        ServiceType::Scheduler
    }

    async fn start(&self) -> Result<()> {
        if !self.status.begin_start() {
            return Ok(());
        }
        *self.permits.lock() = Some(Arc::new(Semaphore::new(self.threads)));
        info!(threads = self.threads, "Scheduler started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if !self.status.begin_stop() {
            return Ok(());
        }

        if let Some(permits) = self.permits.lock().take() {
            permits.close();
        }
        let jobs: Vec<_> = self.jobs.lock().drain().collect();
        for (name, handle) in jobs {
            handle.abort();
            let _ = handle.await;
            debug!(job = %name, "Stopped job");
        }

        info!("Scheduler stopped");
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.status.is_started()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_job(count: Arc<AtomicUsize>) -> impl Fn() -> JobFuture + Send + Sync + 'static {
        move || -> JobFuture {
            let count = count.clone();
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    #[tokio::test]
    async fn test_schedule_requires_start() {
        let scheduler = SchedulerService::new(2);
        let count = Arc::new(AtomicUsize::new(0));
        let err = scheduler
            .schedule("job", Duration::from_millis(10), counting_job(count))
            .unwrap_err();
        assert!(matches!(err, Error::NotStarted(_)));
    }

    #[tokio::test]
    async fn test_job_runs_until_cancelled() {
        let scheduler = SchedulerService::new(2);
        scheduler.start().await.unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        scheduler.schedule("tick", Duration::from_millis(10), counting_job(count.clone())).unwrap();
        assert_eq!(scheduler.job_names(), vec!["tick".to_string()]);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(count.load(Ordering::SeqCst) >= 2);

        assert!(scheduler.cancel("tick"));
        assert!(!scheduler.cancel("tick"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_cancel = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_cancel);

        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_cancels_jobs() {
        let scheduler = SchedulerService::new(1);
        scheduler.start().await.unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        scheduler.schedule("a", Duration::from_millis(10), counting_job(count.clone())).unwrap();
        scheduler.schedule("b", Duration::from_millis(10), counting_job(count.clone())).unwrap();

        scheduler.stop().await.unwrap();
        assert!(scheduler.job_names().is_empty());
        assert!(!scheduler.is_started());

        let stopped_at = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), stopped_at);
    }
}
