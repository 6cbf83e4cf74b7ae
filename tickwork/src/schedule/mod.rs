// Schedule definitions and next execution time calculation
//
// A schedule is a pure function of the current time. Implementations must be
// thread-safe: the same instance is shared by every job that uses it.

mod cron_schedule;
mod factory;

pub use cron_schedule::{parse_timezone, CronSchedule};
pub use factory::{day_time_cron_expression, DaySelection, ScheduleFactory};

use crate::errors::ScheduleError;
use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// Description of the schedule that never fires again
pub const DISABLED_SCHEDULE_DESCRIPTION: &str = "Disabled schedule";

/// Provides the time of the next executions of a job
pub trait Schedule: Send + Sync {
    /// Next execution strictly derived from `current` and the schedule definition.
    ///
    /// `Ok(None)` means the job will never be executed again.
    fn next_execution_date_time(
        &self,
        current: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError>;

    /// Human understandable description of the schedule
    fn description(&self) -> String;
}

impl fmt::Debug for dyn Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Schedule").field(&self.description()).finish()
    }
}

impl fmt::Display for dyn Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

/// A schedule that will never execute its job again.
///
/// Cancellation swaps a job's schedule to this one so that the next
/// completion finalizes the job instead of rescheduling it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSchedule;

impl Schedule for NeverSchedule {
    fn next_execution_date_time(
        &self,
        _current: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        Ok(None)
    }

    fn description(&self) -> String {
        DISABLED_SCHEDULE_DESCRIPTION.to_string()
    }
}

/// Runs the job again a fixed delay after the time it is evaluated at
#[derive(Debug, Clone, Copy)]
pub struct FixedDelaySchedule {
    delay: Duration,
}

impl FixedDelaySchedule {
    pub fn new(delay: Duration) -> Result<Self, ScheduleError> {
        if delay <= Duration::zero() {
            return Err(ScheduleError::InvalidConfiguration(format!(
                "fixed delay must be positive, got {}s",
                delay.num_seconds()
            )));
        }
        Ok(Self { delay })
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Schedule for FixedDelaySchedule {
    fn next_execution_date_time(
        &self,
        current: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        current
            .checked_add_signed(self.delay)
            .map(Some)
            .ok_or_else(|| {
                ScheduleError::CalculationFailed(format!(
                    "{} + {}s overflows",
                    current,
                    self.delay.num_seconds()
                ))
            })
    }

    fn description(&self) -> String {
        format!("every {} seconds", self.delay.num_seconds())
    }
}

/// Runs the job once at an absolute instant
#[derive(Debug, Clone, Copy)]
pub struct OneTimeSchedule {
    execute_at: DateTime<Utc>,
}

impl OneTimeSchedule {
    pub fn new(execute_at: DateTime<Utc>) -> Self {
        Self { execute_at }
    }
}

impl Schedule for OneTimeSchedule {
    fn next_execution_date_time(
        &self,
        current: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        // Once the instant is behind us the schedule is exhausted
        if self.execute_at >= current {
            Ok(Some(self.execute_at))
        } else {
            Ok(None)
        }
    }

    fn description(&self) -> String {
        format!("once at {}", self.execute_at.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}
