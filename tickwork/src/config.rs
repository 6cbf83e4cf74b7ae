// Configuration management with layered configuration (file, env)

use crate::errors::ScheduleError;
use crate::schedule::{parse_timezone, ScheduleFactory};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub scheduler: SchedulerSettings,
    pub observability: ObservabilitySettings,
    #[serde(default)]
    pub agent: AgentSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Prefix of worker names and label of every scheduler log line
    pub name: String,
    pub min_workers: usize,
    pub max_workers: usize,
    /// How long a worker above `min_workers` stays idle before retiring
    pub keep_alive_seconds: u64,
    /// Default wait of a graceful shutdown
    pub shutdown_timeout_seconds: u64,
    /// IANA timezone fixed-time schedules are evaluated in
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl SchedulerSettings {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_seconds)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    /// Schedule factory evaluating in the configured timezone
    pub fn schedule_factory(&self) -> Result<ScheduleFactory, ScheduleError> {
        Ok(ScheduleFactory::new(parse_timezone(&self.timezone)?))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    pub log_level: String,
    #[serde(default = "default_json_logs")]
    pub json_logs: bool,
}

fn default_json_logs() -> bool {
    true
}

/// Jobs scheduled by the agent binary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default)]
    pub heartbeats: Vec<HeartbeatJob>,
}

/// A job that only logs, to check a deployment is alive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatJob {
    pub name: String,
    pub cron: String,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default configuration
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // e.g. TICKWORK__SCHEDULER__MAX_WORKERS=8
            .add_source(
                Environment::with_prefix("TICKWORK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        let scheduler = &self.scheduler;

        if scheduler.name.trim().is_empty() {
            return Err("Scheduler name cannot be empty".to_string());
        }
        if scheduler.min_workers == 0 {
            return Err("Scheduler min_workers must be greater than 0".to_string());
        }
        if scheduler.max_workers < scheduler.min_workers {
            return Err(format!(
                "Scheduler max_workers ({}) must be at least min_workers ({})",
                scheduler.max_workers, scheduler.min_workers
            ));
        }
        if scheduler.shutdown_timeout_seconds == 0 {
            return Err("Scheduler shutdown_timeout_seconds must be greater than 0".to_string());
        }
        if let Err(e) = parse_timezone(&scheduler.timezone) {
            return Err(e.to_string());
        }

        if self.observability.log_level.trim().is_empty() {
            return Err("Log level cannot be empty".to_string());
        }

        for heartbeat in &self.agent.heartbeats {
            if heartbeat.name.trim().is_empty() {
                return Err("Heartbeat job name cannot be empty".to_string());
            }
        }

        Ok(())
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            name: "tickwork".to_string(),
            min_workers: 1,
            max_workers: 5,
            keep_alive_seconds: 60,
            shutdown_timeout_seconds: 10,
            timezone: default_timezone(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scheduler: SchedulerSettings::default(),
            observability: ObservabilitySettings {
                log_level: "info".to_string(),
                json_logs: true,
            },
            agent: AgentSettings::default(),
        }
    }
}
