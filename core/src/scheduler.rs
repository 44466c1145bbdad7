//! Job scheduler.
//!
//! Owns the set of recurring jobs that drive the pipeline. A single
//! long-lived tick task scans the job table; due jobs are dispatched on
//! spawned workers and may run concurrently with each other, but a job
//! never overlaps itself (the `running` flag holds until completion).
//! One job's failure is recorded in its stats and never disturbs another
//! job. `stop()` quits scheduling, flips the cancel token handed to
//! in-flight handlers, and waits for them to drain cooperatively.

use crate::sources::{CancelSource, CancelToken};
use anyhow::Result;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub type JobHandler = Arc<dyn Fn(CancelToken) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Per-job run accounting, surfaced to operators.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub last_error: Option<String>,
    pub avg_run_time_ms: f64,
}

/// Point-in-time view of one job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub name: String,
    pub interval_secs: u64,
    pub enabled: bool,
    pub running: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub stats: JobStats,
}

struct Job {
    name: String,
    interval: Duration,
    enabled: bool,
    running: bool,
    last_run: Option<DateTime<Utc>>,
    next_run: DateTime<Utc>,
    handler: JobHandler,
    stats: JobStats,
}

struct Inner {
    jobs: Mutex<BTreeMap<String, Job>>,
    tick_interval: Duration,
    cancel: Mutex<Option<CancelSource>>,
    tick_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Inner>,
}

impl JobScheduler {
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(BTreeMap::new()),
                tick_interval,
                cancel: Mutex::new(None),
                tick_task: Mutex::new(None),
            }),
        }
    }

    /// Register a job. It becomes due immediately and then re-arms
    /// `interval` after each completion. Registering an existing name
    /// replaces the job and resets its stats.
    pub fn register<F, Fut>(&self, name: &str, interval: Duration, handler: F)
    where
        F: Fn(CancelToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: JobHandler = Arc::new(move |cancel| Box::pin(handler(cancel)));
        let job = Job {
            name: name.to_string(),
            interval,
            enabled: true,
            running: false,
            last_run: None,
            next_run: Utc::now(),
            handler,
            stats: JobStats::default(),
        };
        self.inner.jobs.lock().insert(name.to_string(), job);
        debug!("Registered job {} (every {:?})", name, interval);
    }

    pub fn job_names(&self) -> Vec<String> {
        self.inner.jobs.lock().keys().cloned().collect()
    }

    pub fn stats(&self, name: &str) -> Option<JobStats> {
        self.inner.jobs.lock().get(name).map(|j| j.stats.clone())
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.inner
            .jobs
            .lock()
            .get(name)
            .map(|j| j.running)
            .unwrap_or(false)
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut jobs = self.inner.jobs.lock();
        match jobs.get_mut(name) {
            Some(job) => {
                job.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Ask for an immediate run; picked up by the next tick. A no-op
    /// while the job is already running.
    pub fn trigger(&self, name: &str) -> bool {
        let mut jobs = self.inner.jobs.lock();
        match jobs.get_mut(name) {
            Some(job) if !job.running => {
                job.next_run = Utc::now();
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        self.inner
            .jobs
            .lock()
            .values()
            .map(|job| JobSnapshot {
                name: job.name.clone(),
                interval_secs: job.interval.as_secs(),
                enabled: job.enabled,
                running: job.running,
                last_run: job.last_run,
                next_run: job.next_run,
                stats: job.stats.clone(),
            })
            .collect()
    }

    /// Start the tick loop. Idempotent; a no-op with zero jobs is fine.
    pub fn start(&self) {
        let mut tick_guard = self.inner.tick_task.lock();
        if tick_guard.is_some() {
            return;
        }
        let cancel_source = CancelSource::new();
        let token = cancel_source.token();
        *self.inner.cancel.lock() = Some(cancel_source);

        let scheduler = self.clone();
        let tick_interval = self.inner.tick_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        scheduler.run_pending();
                    }
                }
            }
        });
        *tick_guard = Some(handle);
        info!(
            "Job scheduler started ({} jobs, tick every {:?})",
            self.inner.jobs.lock().len(),
            tick_interval
        );
    }

    /// Dispatch every due job. Called by the tick loop; public so tests
    /// and manual tooling can drive ticks without waiting.
    pub fn run_pending(&self) -> usize {
        let token = self
            .inner
            .cancel
            .lock()
            .as_ref()
            .map(|c| c.token())
            .unwrap_or_else(CancelToken::detached);
        let now = Utc::now();

        let due: Vec<(String, JobHandler, Duration)> = {
            let mut jobs = self.inner.jobs.lock();
            jobs.values_mut()
                .filter(|job| job.enabled && !job.running && job.next_run <= now)
                .map(|job| {
                    job.running = true;
                    job.last_run = Some(now);
                    (job.name.clone(), job.handler.clone(), job.interval)
                })
                .collect()
        };

        let dispatched = due.len();
        for (name, handler, interval) in due {
            let inner = self.inner.clone();
            let token = token.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                let result = handler(token).await;
                let elapsed_ms = started.elapsed().as_millis() as f64;

                let mut jobs = inner.jobs.lock();
                if let Some(job) = jobs.get_mut(&name) {
                    job.running = false;
                    job.next_run = Utc::now()
                        + chrono::Duration::from_std(interval)
                            .unwrap_or_else(|_| chrono::Duration::seconds(60));
                    job.stats.total_runs += 1;
                    match result {
                        Ok(()) => {
                            job.stats.successful_runs += 1;
                            debug!("Job {} completed in {:.0}ms", name, elapsed_ms);
                        }
                        Err(e) => {
                            job.stats.failed_runs += 1;
                            job.stats.last_error = Some(format!("{e:#}"));
                            warn!("Job {} failed after {:.0}ms: {:#}", name, elapsed_ms, e);
                        }
                    }
                    let n = job.stats.total_runs as f64;
                    job.stats.avg_run_time_ms =
                        (job.stats.avg_run_time_ms * (n - 1.0) + elapsed_ms) / n;
                }
            });
        }
        dispatched
    }

    /// Stop scheduling and drain in-flight handlers. Handlers observe the
    /// cancel token and return promptly; they are never forcibly killed.
    pub async fn stop(&self) {
        let handle = self.inner.tick_task.lock().take();
        if let Some(source) = self.inner.cancel.lock().take() {
            source.cancel();
        }
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }

        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let any_running = self.inner.jobs.lock().values().any(|j| j.running);
            if !any_running {
                break;
            }
            if Instant::now() >= deadline {
                warn!("Scheduler stop timed out waiting for in-flight jobs");
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        info!("Job scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn wait_until(mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !check() {
            assert!(Instant::now() < deadline, "condition not met in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_start_stop_with_no_jobs() {
        let scheduler = JobScheduler::new(Duration::from_secs(60));
        scheduler.start();
        scheduler.start(); // Idempotent.
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_run_pending_dispatches_and_accounts() {
        let scheduler = JobScheduler::new(Duration::from_secs(60));
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        scheduler.register("poll", Duration::from_secs(600), move |_cancel| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        assert_eq!(scheduler.run_pending(), 1);
        wait_until(|| scheduler.stats("poll").map(|s| s.total_runs) == Some(1)).await;

        let stats = scheduler.stats("poll").unwrap();
        assert_eq!(stats.successful_runs, 1);
        assert_eq!(stats.failed_runs, 0);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Re-armed for the future: nothing due on the next tick.
        assert_eq!(scheduler.run_pending(), 0);
    }

    #[tokio::test]
    async fn test_job_never_overlaps_itself() {
        let scheduler = JobScheduler::new(Duration::from_secs(60));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (concurrent_c, peak_c) = (concurrent.clone(), peak.clone());
        scheduler.register("slow", Duration::from_secs(600), move |_cancel| {
            let concurrent = concurrent_c.clone();
            let peak = peak_c.clone();
            async move {
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        });

        assert_eq!(scheduler.run_pending(), 1);
        wait_until(|| scheduler.is_running("slow")).await;

        // While running: trigger is a no-op and ticks skip the job.
        assert!(!scheduler.trigger("slow"));
        assert_eq!(scheduler.run_pending(), 0);

        wait_until(|| !scheduler.is_running("slow")).await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_recorded_and_isolated() {
        let scheduler = JobScheduler::new(Duration::from_secs(60));
        scheduler.register("bad", Duration::from_secs(600), |_cancel| async {
            Err(anyhow!("upstream exploded"))
        });
        scheduler.register("good", Duration::from_secs(600), |_cancel| async { Ok(()) });

        assert_eq!(scheduler.run_pending(), 2);
        wait_until(|| {
            scheduler.stats("bad").map(|s| s.total_runs) == Some(1)
                && scheduler.stats("good").map(|s| s.total_runs) == Some(1)
        })
        .await;

        let bad = scheduler.stats("bad").unwrap();
        assert_eq!(bad.failed_runs, 1);
        assert!(bad.last_error.unwrap().contains("upstream exploded"));

        let good = scheduler.stats("good").unwrap();
        assert_eq!(good.successful_runs, 1);
        assert_eq!(good.failed_runs, 0);
    }

    #[tokio::test]
    async fn test_trigger_reschedules_completed_job() {
        let scheduler = JobScheduler::new(Duration::from_secs(60));
        scheduler.register("poll", Duration::from_secs(3600), |_cancel| async { Ok(()) });

        assert_eq!(scheduler.run_pending(), 1);
        wait_until(|| scheduler.stats("poll").map(|s| s.total_runs) == Some(1)).await;
        // Next run is an hour out; nothing due.
        assert_eq!(scheduler.run_pending(), 0);

        assert!(scheduler.trigger("poll"));
        assert_eq!(scheduler.run_pending(), 1);
        wait_until(|| scheduler.stats("poll").map(|s| s.total_runs) == Some(2)).await;
    }

    #[tokio::test]
    async fn test_disabled_job_is_skipped() {
        let scheduler = JobScheduler::new(Duration::from_secs(60));
        scheduler.register("poll", Duration::from_secs(600), |_cancel| async { Ok(()) });
        assert!(scheduler.set_enabled("poll", false));
        assert_eq!(scheduler.run_pending(), 0);

        assert!(scheduler.set_enabled("poll", true));
        assert_eq!(scheduler.run_pending(), 1);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_stop_cancels_in_flight_handler() {
        let scheduler = JobScheduler::new(Duration::from_secs(60));
        let observed_cancel = Arc::new(AtomicUsize::new(0));
        let observed = observed_cancel.clone();
        scheduler.register("long", Duration::from_secs(600), move |cancel| {
            let observed = observed.clone();
            async move {
                cancel.cancelled().await;
                observed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        scheduler.start();
        assert!(scheduler.run_pending() <= 1);
        wait_until(|| scheduler.is_running("long")).await;

        scheduler.stop().await;
        assert_eq!(observed_cancel.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_running("long"));
    }

    #[tokio::test]
    async fn test_average_run_time_updates() {
        let scheduler = JobScheduler::new(Duration::from_secs(60));
        scheduler.register("timed", Duration::from_secs(600), |_cancel| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        });

        scheduler.run_pending();
        wait_until(|| scheduler.stats("timed").map(|s| s.total_runs) == Some(1)).await;
        let first = scheduler.stats("timed").unwrap().avg_run_time_ms;
        assert!(first >= 10.0);

        scheduler.trigger("timed");
        scheduler.run_pending();
        wait_until(|| scheduler.stats("timed").map(|s| s.total_runs) == Some(2)).await;
        assert!(scheduler.stats("timed").unwrap().avg_run_time_ms >= 10.0);
    }
}
