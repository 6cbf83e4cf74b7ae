// Cron-based schedule backed by the `cron` crate

use super::Schedule;
use crate::errors::ScheduleError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::fmt;
use std::str::FromStr;

/// A [`Schedule`] driven by a cron expression with second precision.
///
/// The expression is evaluated in its own timezone and converted back to UTC,
/// so "every day at 07:10" keeps meaning local 07:10 across DST changes.
///
/// Format: `sec min hour day-of-month month day-of-week [year]`
#[derive(Clone)]
pub struct CronSchedule {
    expression: String,
    timezone: Tz,
    schedule: cron::Schedule,
    description: String,
}

impl CronSchedule {
    /// Parse an expression evaluated in UTC
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        Self::parse_in(expression, chrono_tz::UTC)
    }

    /// Parse an expression evaluated in the given timezone
    pub fn parse_in(expression: &str, timezone: Tz) -> Result<Self, ScheduleError> {
        let expression = expression.trim();
        let schedule = cron::Schedule::from_str(expression).map_err(|e| {
            ScheduleError::InvalidCronExpression {
                expression: expression.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            description: format!("cron '{}' ({})", expression, timezone),
            expression: expression.to_string(),
            timezone,
            schedule,
        })
    }

    /// Replace the generated description with a friendlier one
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }
}

impl Schedule for CronSchedule {
    fn next_execution_date_time(
        &self,
        current: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        let reference_in_tz = current.with_timezone(&self.timezone);

        // An exhausted expression (e.g. a past year) has no next occurrence
        Ok(self
            .schedule
            .after(&reference_in_tz)
            .next()
            .map(|next| next.with_timezone(&Utc)))
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CronSchedule")
            .field("expression", &self.expression)
            .field("timezone", &self.timezone)
            .finish()
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

/// Parse an IANA timezone name such as `Europe/Paris`
pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    Tz::from_str(name.trim())
        .map_err(|e| ScheduleError::InvalidTimezone(format!("{}: {}", name, e)))
}
