// In-process job scheduler: named tasks run on a worker pool at the times
// given by their schedule

pub mod config;
pub mod errors;
pub mod job;
mod pool;
pub mod schedule;
pub mod scheduler;
pub mod telemetry;
pub mod time;

pub use errors::{ExecutionError, ScheduleError, SchedulerError};
pub use job::{task_fn, FnTask, Job, JobSnapshot, JobStatus, JobTask};
pub use schedule::{
    CronSchedule, DaySelection, FixedDelaySchedule, NeverSchedule, OneTimeSchedule, Schedule,
    ScheduleFactory,
};
pub use scheduler::{CancelHandle, Scheduler, SchedulerBuilder, SchedulerStats, SchedulerStatus};
pub use time::{FixedTimeProvider, OffsetTimeProvider, SystemTimeProvider, TimeProvider};
