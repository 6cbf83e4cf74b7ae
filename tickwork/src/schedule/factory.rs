// Helpers that build schedules from human-level definitions

use super::{CronSchedule, FixedDelaySchedule, NeverSchedule, OneTimeSchedule, Schedule};
use crate::errors::ScheduleError;
use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use std::sync::Arc;

/// Days on which a fixed time-of-day schedule fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaySelection {
    EveryDay,
    MondayToFriday,
    Days(Vec<Weekday>),
}

impl DaySelection {
    /// The day-of-week field of the underlying cron expression
    pub fn cron_field(&self) -> String {
        match self {
            DaySelection::EveryDay => "*".to_string(),
            DaySelection::MondayToFriday => "MON-FRI".to_string(),
            DaySelection::Days(days) if days.is_empty() => "*".to_string(),
            DaySelection::Days(days) => days
                .iter()
                .map(|day| weekday_abbreviation(*day))
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    fn describe(&self) -> String {
        match self {
            DaySelection::EveryDay => "every day".to_string(),
            DaySelection::MondayToFriday => "Monday to Friday".to_string(),
            DaySelection::Days(days) if days.is_empty() => "every day".to_string(),
            DaySelection::Days(_) => format!("on {}", self.cron_field()),
        }
    }
}

fn weekday_abbreviation(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MON",
        Weekday::Tue => "TUE",
        Weekday::Wed => "WED",
        Weekday::Thu => "THU",
        Weekday::Fri => "FRI",
        Weekday::Sat => "SAT",
        Weekday::Sun => "SUN",
    }
}

/// Translate a time of day and a day selection into a cron expression.
///
/// Seconds of `time` are dropped: schedules fire on the minute.
pub fn day_time_cron_expression(time: NaiveTime, days: &DaySelection) -> String {
    format!("0 {} {} * * {}", time.minute(), time.hour(), days.cron_field())
}

/// Builds [`Schedule`]s evaluated in a single timezone
#[derive(Debug, Clone, Copy)]
pub struct ScheduleFactory {
    timezone: Tz,
}

impl Default for ScheduleFactory {
    fn default() -> Self {
        Self::utc()
    }
}

impl ScheduleFactory {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    pub fn utc() -> Self {
        Self::new(chrono_tz::UTC)
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// The schedule that will never be executed
    pub fn never() -> Arc<dyn Schedule> {
        Arc::new(NeverSchedule)
    }

    pub fn with_cron_expression(&self, expression: &str) -> Result<Arc<dyn Schedule>, ScheduleError> {
        Ok(Arc::new(CronSchedule::parse_in(expression, self.timezone)?))
    }

    pub fn at_fixed_time(
        &self,
        time: NaiveTime,
        days: DaySelection,
    ) -> Result<Arc<dyn Schedule>, ScheduleError> {
        let expression = day_time_cron_expression(time, &days);
        let description = format!(
            "{} at {:02}:{:02} ({})",
            days.describe(),
            time.hour(),
            time.minute(),
            self.timezone
        );
        let schedule = CronSchedule::parse_in(&expression, self.timezone)?.with_description(description);
        Ok(Arc::new(schedule))
    }

    pub fn at_fixed_time_every_day(&self, time: NaiveTime) -> Result<Arc<dyn Schedule>, ScheduleError> {
        self.at_fixed_time(time, DaySelection::EveryDay)
    }

    pub fn at_fixed_time_monday_to_friday(
        &self,
        time: NaiveTime,
    ) -> Result<Arc<dyn Schedule>, ScheduleError> {
        self.at_fixed_time(time, DaySelection::MondayToFriday)
    }

    pub fn at_fixed_time_on_week_days(
        &self,
        time: NaiveTime,
        days: &[Weekday],
    ) -> Result<Arc<dyn Schedule>, ScheduleError> {
        self.at_fixed_time(time, DaySelection::Days(days.to_vec()))
    }

    pub fn with_fixed_delay(&self, delay: Duration) -> Result<Arc<dyn Schedule>, ScheduleError> {
        Ok(Arc::new(FixedDelaySchedule::new(delay)?))
    }

    pub fn once_at(&self, execute_at: DateTime<Utc>) -> Arc<dyn Schedule> {
        Arc::new(OneTimeSchedule::new(execute_at))
    }
}
