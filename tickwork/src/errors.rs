// Error handling framework

use thiserror::Error;

/// Schedule-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid schedule configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Schedule calculation failed: {0}")]
    CalculationFailed(String),
}

/// Errors surfaced synchronously to callers of the scheduler API
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("A job is already scheduled with the name: {0}")]
    DuplicateJobName(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid job name: {0:?}")]
    InvalidJobName(String),

    #[error("Scheduler '{0}' is shutting down")]
    ShuttingDown(String),

    #[error("Scheduler invariant violated: {0}")]
    InvariantViolation(String),

    #[error("A tokio runtime is required to start the scheduler: {0}")]
    NoRuntime(String),

    #[error("Invalid scheduler configuration: {0}")]
    InvalidConfiguration(String),
}

/// Failures of a single job execution.
///
/// These never leave the execution wrapper: they are logged with the job name
/// and the next execution is planned as usual.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Job '{job}' execution aborted: {reason}")]
    TaskFailed { job: String, reason: String },

    #[error("Job '{job}' panicked: {message}")]
    TaskPanicked { job: String, message: String },
}

/// Worker pool errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Worker pool '{0}' is shut down and rejects new work")]
    ShutDown(String),
}
