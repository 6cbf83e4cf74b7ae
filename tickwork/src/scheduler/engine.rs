// Scheduler engine: job registry, due-queue, launcher task and worker pool
//
// Lock order is registry → dispatch → job state. The launcher notifier is
// never waited on while a lock is held.

use super::cancel::{CancelHandle, CancelResolver};
use super::due_queue::DueQueue;
use super::stats::{SchedulerStats, SchedulerStatus};
use crate::config::SchedulerSettings;
use crate::errors::{ExecutionError, SchedulerError};
use crate::job::{Job, JobStatus, JobTask};
use crate::pool::{PoolConfig, Work, WorkerPool};
use crate::schedule::{Schedule, ScheduleFactory};
use crate::telemetry;
use crate::time::{SystemTimeProvider, TimeProvider};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};

const DEFAULT_NAME: &str = "tickwork";
const DEFAULT_MIN_WORKERS: usize = 1;
const DEFAULT_MAX_WORKERS: usize = 5;
const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs are reported as late past this delay
const LATE_EXECUTION_THRESHOLD_MS: i64 = 1_000;

/// Configures and starts a [`Scheduler`]
pub struct SchedulerBuilder {
    name: String,
    min_workers: usize,
    max_workers: usize,
    keep_alive: Duration,
    shutdown_timeout: Duration,
    time_provider: Arc<dyn TimeProvider>,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            min_workers: DEFAULT_MIN_WORKERS,
            max_workers: DEFAULT_MAX_WORKERS,
            keep_alive: DEFAULT_KEEP_ALIVE,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            time_provider: Arc::new(SystemTimeProvider),
        }
    }
}

impl SchedulerBuilder {
    pub fn from_settings(settings: &SchedulerSettings) -> Self {
        Self::default()
            .with_name(settings.name.clone())
            .with_min_workers(settings.min_workers)
            .with_max_workers(settings.max_workers)
            .with_keep_alive(settings.keep_alive())
            .with_shutdown_timeout(settings.shutdown_timeout())
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Workers kept alive even when idle; 0 is raised to 1
    pub fn with_min_workers(mut self, min_workers: usize) -> Self {
        self.min_workers = min_workers;
        self
    }

    /// Upper bound of concurrent executions; below the minimum it becomes `min + 4`
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Wait used by [`Scheduler::shutdown_gracefully`] when none is given
    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    pub fn with_time_provider(mut self, time_provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = time_provider;
        self
    }

    /// Start the scheduler on the current tokio runtime
    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        let runtime = Handle::try_current().map_err(|e| SchedulerError::NoRuntime(e.to_string()))?;

        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(SchedulerError::InvalidConfiguration(
                "scheduler name cannot be empty".to_string(),
            ));
        }

        let min_workers = self.min_workers.max(1);
        let max_workers = if self.max_workers < min_workers {
            min_workers + 4
        } else {
            self.max_workers
        };

        let pool = WorkerPool::new(
            PoolConfig {
                name: name.clone(),
                min_workers,
                max_workers,
                keep_alive: self.keep_alive,
            },
            runtime.clone(),
        );

        let inner = Arc::new(SchedulerInner {
            started_at: self.time_provider.current_date_time(),
            name,
            time_provider: self.time_provider,
            pool,
            registry: RwLock::new(HashMap::new()),
            dispatch: Mutex::new(DispatchState {
                due_queue: DueQueue::new(),
                cancel_resolvers: HashMap::new(),
            }),
            launcher_notifier: Notify::new(),
            shutting_down: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
            shutdown_timeout: self.shutdown_timeout,
        });

        runtime.spawn(launcher_loop(Arc::clone(&inner)));

        info!(
            scheduler = %inner.name,
            min_workers = min_workers,
            max_workers = max_workers,
            "Scheduler started"
        );

        Ok(Scheduler { inner })
    }
}

/// State guarded by the dispatch lock
struct DispatchState {
    due_queue: DueQueue,
    cancel_resolvers: HashMap<String, CancelResolver>,
}

struct SchedulerInner {
    name: String,
    time_provider: Arc<dyn TimeProvider>,
    pool: WorkerPool,
    registry: RwLock<HashMap<String, Job>>,
    dispatch: Mutex<DispatchState>,
    launcher_notifier: Notify,
    shutting_down: AtomicBool,
    suspended: AtomicBool,
    shutdown_timeout: Duration,
    started_at: DateTime<Utc>,
}

/// Runs named jobs at the times given by their [`Schedule`].
///
/// A dedicated launcher task sleeps until the earliest job is due and hands
/// it to a scaling worker pool. A job never runs concurrently with itself and
/// job names are unique among jobs that are not DONE.
///
/// Dropping the scheduler requests a shutdown without waiting for running
/// jobs; use [`Scheduler::shutdown_gracefully`] to wait for them.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Schedule a task.
    ///
    /// Fails when a job with the same name is not DONE yet. Statistics of a
    /// previous DONE job with that name carry over to the new job. A schedule
    /// without upcoming execution leaves the job DONE.
    #[instrument(skip_all, fields(scheduler = %self.inner.name, job_name = %task.name()))]
    pub fn schedule(
        &self,
        task: Arc<dyn JobTask>,
        schedule: Arc<dyn Schedule>,
    ) -> Result<Job, SchedulerError> {
        let inner = &self.inner;
        let name = task.name().to_string();
        if name.trim().is_empty() {
            return Err(SchedulerError::InvalidJobName(name));
        }

        let mut registry = inner.registry.write();
        let mut dispatch = inner.dispatch.lock();

        if inner.shutting_down.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShuttingDown(inner.name.clone()));
        }

        let previous = registry.get(&name);
        if let Some(existing) = previous {
            if !existing.status().is_done() {
                return Err(SchedulerError::DuplicateJobName(name));
            }
        }

        let job = Job::new(task, schedule, previous);
        registry.insert(name, job.clone());
        inner.schedule_next_execution(&mut dispatch, &job, None);

        if !job.status().is_done() {
            info!(
                next_execution = ?job.next_execution_date_time(),
                schedule = %job.schedule(),
                "Job scheduled"
            );
        }

        Ok(job)
    }

    pub fn find_job(&self, name: &str) -> Option<Job> {
        self.inner.registry.read().get(name).cloned()
    }

    /// Every job known by the scheduler, DONE ones included, sorted by name
    pub fn job_status(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.inner.registry.read().values().cloned().collect();
        jobs.sort_by(|a, b| a.name().cmp(b.name()));
        jobs
    }

    /// Stop scheduling a job.
    ///
    /// The returned handle completes once the job is DONE: right away when
    /// the job was not executing, after the current run otherwise. Running
    /// jobs are never interrupted.
    #[instrument(skip(self), fields(scheduler = %self.inner.name))]
    pub fn cancel(&self, name: &str) -> Result<CancelHandle, SchedulerError> {
        let inner = &self.inner;
        let registry = inner.registry.read();
        let job = registry
            .get(name)
            .cloned()
            .ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))?;
        let mut dispatch = inner.dispatch.lock();

        if job.status().is_done() {
            return Ok(CancelHandle::resolved(job));
        }
        if let Some(resolver) = dispatch.cancel_resolvers.get(name) {
            return Ok(resolver.subscribe());
        }

        job.set_schedule(ScheduleFactory::never());

        match job.status() {
            JobStatus::Ready => {
                let removed = job
                    .pending_work()
                    .map(|work| inner.pool.remove(work))
                    .unwrap_or(false);
                if removed {
                    inner.schedule_next_execution(&mut dispatch, &job, None);
                    info!("Job cancelled before starting");
                    Ok(CancelHandle::resolved(job))
                } else {
                    // A worker claimed it meanwhile
                    Ok(inner.pending_cancel(&mut dispatch, &job))
                }
            }
            JobStatus::Running => Ok(inner.pending_cancel(&mut dispatch, &job)),
            JobStatus::Scheduled => {
                if dispatch.due_queue.remove(name).is_none() {
                    error!(job = %job, "Scheduled job is missing from the due-queue");
                    return Err(SchedulerError::InvariantViolation(format!(
                        "job '{}' is SCHEDULED but not in the due-queue",
                        name
                    )));
                }
                telemetry::update_queue_size(dispatch.due_queue.len());
                inner.finalize(&mut dispatch, &job);
                inner.launcher_notifier.notify_one();
                info!("Job cancelled");
                Ok(CancelHandle::resolved(job))
            }
            JobStatus::Done => Ok(CancelHandle::resolved(job)),
        }
    }

    /// Stop dispatching jobs. Running jobs finish, scheduled jobs stay scheduled.
    ///
    /// Returns `false` once shutdown has started.
    pub fn suspend(&self) -> bool {
        let inner = &self.inner;
        let _dispatch = inner.dispatch.lock();
        if inner.shutting_down.load(Ordering::SeqCst) {
            return false;
        }
        if !inner.suspended.swap(true, Ordering::SeqCst) {
            info!(scheduler = %inner.name, "Scheduler suspended");
        }
        true
    }

    /// Dispatch jobs again after [`Scheduler::suspend`].
    ///
    /// Jobs that became due while suspended are not caught up: they are
    /// moved to their next execution after now.
    pub fn resume(&self) -> bool {
        let inner = &self.inner;
        let mut dispatch = inner.dispatch.lock();
        if inner.shutting_down.load(Ordering::SeqCst) {
            return false;
        }
        if !inner.suspended.swap(false, Ordering::SeqCst) {
            return true;
        }

        let now = inner.now();
        for (missed_at, job) in dispatch.due_queue.drain_due_before(now) {
            warn!(
                scheduler = %inner.name,
                job_name = job.name(),
                missed_at = %missed_at,
                "Job misfired while the scheduler was suspended, skipping to its next execution"
            );
            inner.schedule_next_execution(&mut dispatch, &job, None);
        }

        info!(scheduler = %inner.name, "Scheduler resumed");
        inner.launcher_notifier.notify_one();
        true
    }

    pub fn status(&self) -> SchedulerStatus {
        self.inner.status()
    }

    pub fn stats(&self) -> SchedulerStats {
        let inner = &self.inner;
        let queued_jobs = inner.dispatch.lock().due_queue.len();
        let active_workers = inner.pool.active_count();
        let pool_size = inner.pool.pool_size();

        SchedulerStats {
            name: inner.name.clone(),
            status: inner.status(),
            started_at: inner.started_at,
            min_workers: inner.pool.min_workers(),
            max_workers: inner.pool.max_workers(),
            active_workers,
            idle_workers: pool_size.saturating_sub(active_workers),
            largest_pool_size: inner.pool.largest_pool_size(),
            terminating: inner.pool.is_terminating(),
            queued_jobs,
        }
    }

    /// Stop the scheduler and wait for running jobs.
    ///
    /// Jobs that have not started are discarded and end DONE. Waits up to
    /// `timeout` (the configured shutdown timeout when `None`) for running
    /// jobs; they are not interrupted when the wait times out. Calling it
    /// again only waits.
    pub async fn shutdown_gracefully(&self, timeout: Option<Duration>) {
        let inner = &self.inner;
        let timeout = timeout.unwrap_or(inner.shutdown_timeout);

        inner.request_shutdown();

        if inner.pool.await_termination(timeout).await {
            info!(scheduler = %inner.name, "Scheduler stopped");
        } else {
            warn!(
                scheduler = %inner.name,
                timeout_ms = timeout.as_millis() as u64,
                active_workers = inner.pool.active_count(),
                "Scheduler shutdown timed out with jobs still running"
            );
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.inner.request_shutdown();
    }
}

impl SchedulerInner {
    fn now(&self) -> DateTime<Utc> {
        self.time_provider.current_date_time()
    }

    fn status(&self) -> SchedulerStatus {
        if self.pool.is_terminated() {
            SchedulerStatus::Stopped
        } else if self.shutting_down.load(Ordering::SeqCst) {
            SchedulerStatus::ShuttingDown
        } else if self.suspended.load(Ordering::SeqCst) {
            SchedulerStatus::Suspended
        } else {
            SchedulerStatus::Listening
        }
    }

    /// Plan the next execution of `job` from its current schedule.
    ///
    /// The job ends SCHEDULED in the due-queue, or DONE when the schedule
    /// has no upcoming execution. After a run, `last_run_start` is the start
    /// of that run and the next execution must be strictly later.
    fn schedule_next_execution(
        &self,
        dispatch: &mut DispatchState,
        job: &Job,
        last_run_start: Option<DateTime<Utc>>,
    ) {
        job.set_pending_work(None);

        let now = self.now();
        let next = match job.schedule().next_execution_date_time(now) {
            Ok(next) => next,
            Err(e) => {
                error!(
                    scheduler = %self.name,
                    job_name = job.name(),
                    error = %e,
                    "Failed to compute the next execution"
                );
                None
            }
        };

        match next {
            Some(next) if last_run_start.is_some_and(|started| next <= started) => {
                info!(
                    scheduler = %self.name,
                    job_name = job.name(),
                    computed = %next,
                    "No execution after the last run, the job will not be executed again"
                );
                self.finalize(dispatch, job);
            }
            Some(next) if next >= now => {
                job.set_next_execution(Some(next));
                job.set_status(JobStatus::Scheduled);
                dispatch.due_queue.insert(next, job.clone());
                telemetry::update_queue_size(dispatch.due_queue.len());
                self.launcher_notifier.notify_one();
            }
            Some(past) => {
                warn!(
                    scheduler = %self.name,
                    job_name = job.name(),
                    computed = %past,
                    "Next execution is in the past, the job will not be executed again"
                );
                self.finalize(dispatch, job);
            }
            None => {
                info!(
                    scheduler = %self.name,
                    job_name = job.name(),
                    "Job will not be executed again"
                );
                self.finalize(dispatch, job);
            }
        }
    }

    /// Mark the job DONE and complete a pending cancellation
    fn finalize(&self, dispatch: &mut DispatchState, job: &Job) {
        job.set_pending_work(None);
        job.set_next_execution(None);
        job.set_status(JobStatus::Done);

        if let Some(resolver) = dispatch.cancel_resolvers.remove(job.name()) {
            resolver.resolve(job.clone());
        }
    }

    fn pending_cancel(&self, dispatch: &mut DispatchState, job: &Job) -> CancelHandle {
        let (resolver, handle) = CancelHandle::pending();
        dispatch
            .cancel_resolvers
            .insert(job.name().to_string(), resolver);
        info!(
            scheduler = %self.name,
            job_name = job.name(),
            "Job is executing, it will be cancelled once the run ends"
        );
        handle
    }

    /// Start the shutdown once: stop the pool and discard jobs not started yet
    fn request_shutdown(&self) {
        let registry = self.registry.read();
        let mut dispatch = self.dispatch.lock();

        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(scheduler = %self.name, "Scheduler shutting down");

        self.pool.shutdown();

        let mut discarded = 0;
        for (_, job) in dispatch.due_queue.drain() {
            self.finalize(&mut dispatch, &job);
            discarded += 1;
        }
        for job in registry.values() {
            if job.status() != JobStatus::Ready {
                continue;
            }
            // Work already claimed by a worker still runs
            if let Some(work) = job.pending_work() {
                if self.pool.remove(work) {
                    self.finalize(&mut dispatch, job);
                    discarded += 1;
                }
            }
        }
        telemetry::update_queue_size(0);

        if discarded > 0 {
            info!(
                scheduler = %self.name,
                discarded = discarded,
                "Discarded jobs that had not started"
            );
        }

        self.launcher_notifier.notify_one();
    }

    /// Hand every due job to the pool.
    ///
    /// Returns how long to wait for the next one, `None` when nothing is
    /// scheduled or dispatching is suspended.
    fn dispatch_due_jobs(self: &Arc<Self>) -> Option<Duration> {
        let mut dispatch = self.dispatch.lock();

        loop {
            if self.suspended.load(Ordering::SeqCst) || self.shutting_down.load(Ordering::SeqCst) {
                return None;
            }

            let due_at = dispatch.due_queue.peek().map(|(due_at, _)| due_at)?;
            let delta = due_at - self.now();
            if delta > chrono::Duration::zero() {
                return Some(delta.to_std().unwrap_or(Duration::ZERO));
            }

            let Some((_, job)) = dispatch.due_queue.pop_first() else {
                return None;
            };
            telemetry::update_queue_size(dispatch.due_queue.len());
            self.launch(&mut dispatch, job);
        }
    }

    fn launch(self: &Arc<Self>, dispatch: &mut DispatchState, job: Job) {
        job.set_status(JobStatus::Ready);

        if self.pool.active_count() >= self.pool.max_workers() {
            warn!(
                scheduler = %self.name,
                job_name = job.name(),
                max_workers = self.pool.max_workers(),
                queued = self.pool.queued_count(),
                "All workers are busy, the job will wait for a free worker"
            );
        }

        let inner = Arc::clone(self);
        let queued_job = job.clone();
        let work: Work = Box::new(move |worker| inner.run_job(queued_job, worker).boxed());

        match self.pool.submit(work) {
            Ok(work_id) => {
                job.set_pending_work(Some(work_id));
                debug!(scheduler = %self.name, job_name = job.name(), "Job dispatched");
            }
            Err(e) => {
                warn!(
                    scheduler = %self.name,
                    job_name = job.name(),
                    error = %e,
                    "Job could not be dispatched"
                );
                self.finalize(dispatch, &job);
            }
        }
    }

    /// Execution wrapper run on a worker: failures and panics stay here
    async fn run_job(self: Arc<Self>, job: Job, worker: Arc<str>) {
        let started_at = self.now();
        {
            let _dispatch = self.dispatch.lock();
            if let Some(planned) = job.next_execution_date_time() {
                let delay = started_at - planned;
                if delay.num_milliseconds() > LATE_EXECUTION_THRESHOLD_MS {
                    debug!(
                        scheduler = %self.name,
                        job_name = job.name(),
                        delay_ms = delay.num_milliseconds(),
                        "Job starts late"
                    );
                }
            }
            job.mark_running(started_at, &worker);
        }

        let timer = Instant::now();
        let task = job.task();
        let outcome = AssertUnwindSafe(task.run()).catch_unwind().await;
        let elapsed = timer.elapsed();

        match outcome {
            Ok(Ok(())) => {
                debug!(
                    scheduler = %self.name,
                    job_name = job.name(),
                    worker = %worker,
                    duration_ms = elapsed.as_millis() as u64,
                    "Job executed"
                );
                telemetry::record_job_success(job.name());
            }
            Ok(Err(e)) => {
                let err = ExecutionError::TaskFailed {
                    job: job.name().to_string(),
                    reason: format!("{:#}", e),
                };
                error!(scheduler = %self.name, job_name = job.name(), error = %err, "Job execution failed");
                telemetry::record_job_failure(job.name(), "error");
            }
            Err(panic) => {
                let err = ExecutionError::TaskPanicked {
                    job: job.name().to_string(),
                    message: panic_message(panic.as_ref()),
                };
                error!(scheduler = %self.name, job_name = job.name(), error = %err, "Job execution failed");
                telemetry::record_job_failure(job.name(), "panic");
            }
        }
        telemetry::record_job_duration(job.name(), elapsed.as_secs_f64());

        let ended_at = self.now();
        let mut dispatch = self.dispatch.lock();
        job.mark_finished(ended_at);

        if self.shutting_down.load(Ordering::SeqCst) {
            self.finalize(&mut dispatch, &job);
        } else {
            self.schedule_next_execution(&mut dispatch, &job, Some(started_at));
        }
    }
}

/// Sleeps until the earliest job is due or the due-queue changes
async fn launcher_loop(inner: Arc<SchedulerInner>) {
    info!(scheduler = %inner.name, "Launcher started");

    loop {
        // Enabled before reading the queue so a signal sent in between is kept
        let notified = inner.launcher_notifier.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if inner.shutting_down.load(Ordering::SeqCst) {
            break;
        }

        match inner.dispatch_due_jobs() {
            Some(wait) => {
                // Both a timeout and a signal lead to a fresh look at the queue
                let _ = tokio::time::timeout(wait, notified).await;
            }
            None => notified.await,
        }
    }

    info!(scheduler = %inner.name, "Launcher stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
