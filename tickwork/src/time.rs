// Time sources used by the scheduler to plan jobs

use chrono::{DateTime, Duration, Utc};

/// The time provider that will be used by the scheduler to plan jobs.
///
/// A scheduler consults a single provider for every "is it due" decision, so
/// injecting a fixed or shifted clock makes planning fully deterministic.
#[cfg_attr(test, mockall::automock)]
pub trait TimeProvider: Send + Sync {
    /// Returns the current date time
    fn current_date_time(&self) -> DateTime<Utc>;
}

/// Reads the system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn current_date_time(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always returns the same instant (tests)
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeProvider {
    instant: DateTime<Utc>,
}

impl FixedTimeProvider {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self { instant }
    }
}

impl TimeProvider for FixedTimeProvider {
    fn current_date_time(&self) -> DateTime<Utc> {
        self.instant
    }
}

/// System clock shifted by a constant offset, used to simulate clock skew
#[derive(Debug, Clone, Copy)]
pub struct OffsetTimeProvider {
    offset: Duration,
}

impl OffsetTimeProvider {
    pub fn new(offset: Duration) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> Duration {
        self.offset
    }
}

impl TimeProvider for OffsetTimeProvider {
    fn current_date_time(&self) -> DateTime<Utc> {
        Utc::now() + self.offset
    }
}
