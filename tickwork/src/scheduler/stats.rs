// Scheduler status and pool occupancy snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulerStatus {
    /// Dispatching due jobs
    Listening,
    /// Jobs stay scheduled but nothing is dispatched
    Suspended,
    /// Shutdown requested, workers are finishing
    ShuttingDown,
    /// Every worker has exited
    Stopped,
}

impl fmt::Display for SchedulerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulerStatus::Listening => "LISTENING",
            SchedulerStatus::Suspended => "SUSPENDED",
            SchedulerStatus::ShuttingDown => "SHUTTING_DOWN",
            SchedulerStatus::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

/// Statistics about the scheduler worker pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub name: String,
    pub status: SchedulerStatus,
    pub started_at: DateTime<Utc>,
    pub min_workers: usize,
    pub max_workers: usize,
    pub active_workers: usize,
    pub idle_workers: usize,
    pub largest_pool_size: usize,
    pub terminating: bool,
    pub queued_jobs: usize,
}

impl fmt::Display for SchedulerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scheduler {} [{}] workers: {} active, {} idle (min {}, max {}, largest {}), {} queued jobs",
            self.name,
            self.status,
            self.active_workers,
            self.idle_workers,
            self.min_workers,
            self.max_workers,
            self.largest_pool_size,
            self.queued_jobs
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_stats_display_and_json() {
        let stats = SchedulerStats {
            name: "reports".to_string(),
            status: SchedulerStatus::Listening,
            started_at: Utc.with_ymd_and_hms(2024, 5, 6, 7, 0, 0).unwrap(),
            min_workers: 1,
            max_workers: 5,
            active_workers: 0,
            idle_workers: 0,
            largest_pool_size: 0,
            terminating: false,
            queued_jobs: 2,
        };

        assert_eq!(
            stats.to_string(),
            "Scheduler reports [LISTENING] workers: 0 active, 0 idle (min 1, max 5, largest 0), 2 queued jobs"
        );

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["status"], "LISTENING");
        assert_eq!(json["max_workers"], 5);
    }
}
