// Job model: the association of a task with its schedule and run statistics

use crate::pool::WorkId;
use crate::schedule::Schedule;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Waiting in the due-queue for its next execution time
    Scheduled,
    /// Handed to the worker pool, not started yet
    Ready,
    /// Executing on a worker
    Running,
    /// Not scheduled anymore; the name can be reused
    Done,
}

impl JobStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, JobStatus::Done)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Scheduled => "SCHEDULED",
            JobStatus::Ready => "READY",
            JobStatus::Running => "RUNNING",
            JobStatus::Done => "DONE",
        };
        f.write_str(s)
    }
}

/// The unit of work executed when a job becomes due.
///
/// The name is the job identity inside a scheduler.
#[async_trait]
pub trait JobTask: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> anyhow::Result<()>;
}

/// A [`JobTask`] built from a name and an async closure
pub struct FnTask<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> JobTask for FnTask<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> anyhow::Result<()> {
        (self.f)().await
    }
}

/// Build a task from a closure returning a future
///
/// ```ignore
/// let task = tickwork::task_fn("heartbeat", || async {
///     tracing::info!("still alive");
///     Ok(())
/// });
/// ```
pub fn task_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn JobTask>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnTask {
        name: name.into(),
        f,
    })
}

/// Mutable part of a job, only ever changed by the scheduler
pub(crate) struct JobState {
    status: JobStatus,
    schedule: Arc<dyn Schedule>,
    next_execution: Option<DateTime<Utc>>,
    last_execution_start: Option<DateTime<Utc>>,
    last_execution_end: Option<DateTime<Utc>>,
    executions_count: u64,
    pending_work: Option<WorkId>,
    running_on: Option<String>,
}

struct JobInner {
    name: String,
    task: Arc<dyn JobTask>,
    state: Mutex<JobState>,
}

/// A `Job` is the association of a [`JobTask`] and its running [`Schedule`].
///
/// It also carries the job status and its running statistics. `Job` is a
/// cheap handle: clones observe the same job, and every accessor returns the
/// value at the time of the call.
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl Job {
    /// A fresh job starts DONE; the scheduler drives it to SCHEDULED.
    ///
    /// Statistics of `previous` (a retired job with the same name) carry over.
    pub(crate) fn new(task: Arc<dyn JobTask>, schedule: Arc<dyn Schedule>, previous: Option<&Job>) -> Self {
        let (executions_count, last_execution_start, last_execution_end) = match previous {
            Some(previous) => (
                previous.executions_count(),
                previous.last_execution_start_date_time(),
                previous.last_execution_end_date_time(),
            ),
            None => (0, None, None),
        };

        Self {
            inner: Arc::new(JobInner {
                name: task.name().to_string(),
                task,
                state: Mutex::new(JobState {
                    status: JobStatus::Done,
                    schedule,
                    next_execution: None,
                    last_execution_start,
                    last_execution_end,
                    executions_count,
                    pending_work: None,
                    running_on: None,
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn status(&self) -> JobStatus {
        self.inner.state.lock().status
    }

    pub fn schedule(&self) -> Arc<dyn Schedule> {
        Arc::clone(&self.inner.state.lock().schedule)
    }

    /// Only meaningful while the job is [`JobStatus::Scheduled`]
    pub fn next_execution_date_time(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().next_execution
    }

    /// When the job has last been started
    pub fn last_execution_start_date_time(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().last_execution_start
    }

    /// When the job has last finished executing
    pub fn last_execution_end_date_time(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().last_execution_end
    }

    pub fn executions_count(&self) -> u64 {
        self.inner.state.lock().executions_count
    }

    /// Name of the worker currently executing the job
    pub fn running_on(&self) -> Option<String> {
        self.inner.state.lock().running_on.clone()
    }

    pub fn task(&self) -> Arc<dyn JobTask> {
        Arc::clone(&self.inner.task)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.inner.state.lock();
        JobSnapshot {
            name: self.inner.name.clone(),
            status: state.status,
            schedule: state.schedule.description(),
            next_execution: state.next_execution,
            last_execution_start: state.last_execution_start,
            last_execution_end: state.last_execution_end,
            executions_count: state.executions_count,
            running_on: state.running_on.clone(),
        }
    }

    // crate API

    pub(crate) fn is_same(&self, other: &Job) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn set_status(&self, status: JobStatus) {
        self.inner.state.lock().status = status;
    }

    pub(crate) fn set_schedule(&self, schedule: Arc<dyn Schedule>) {
        self.inner.state.lock().schedule = schedule;
    }

    pub(crate) fn set_next_execution(&self, next_execution: Option<DateTime<Utc>>) {
        self.inner.state.lock().next_execution = next_execution;
    }

    pub(crate) fn set_pending_work(&self, work: Option<WorkId>) {
        self.inner.state.lock().pending_work = work;
    }

    pub(crate) fn pending_work(&self) -> Option<WorkId> {
        self.inner.state.lock().pending_work
    }

    pub(crate) fn mark_running(&self, started_at: DateTime<Utc>, worker: &str) {
        let mut state = self.inner.state.lock();
        state.status = JobStatus::Running;
        state.last_execution_start = Some(started_at);
        state.running_on = Some(worker.to_string());
    }

    pub(crate) fn mark_finished(&self, ended_at: DateTime<Utc>) {
        let mut state = self.inner.state.lock();
        state.last_execution_end = Some(ended_at);
        state.executions_count += 1;
        state.running_on = None;
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        let next = state
            .next_execution
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "Job {} [{}] nextExecutionAt: {} (schedule: {})",
            self.inner.name,
            state.status,
            next,
            state.schedule.description()
        )
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Job").field(&self.snapshot()).finish()
    }
}

/// Serializable view of a job, e.g. for a status endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub name: String,
    pub status: JobStatus,
    pub schedule: String,
    pub next_execution: Option<DateTime<Utc>>,
    pub last_execution_start: Option<DateTime<Utc>>,
    pub last_execution_end: Option<DateTime<Utc>>,
    pub executions_count: u64,
    pub running_on: Option<String>,
}
