// Agent binary entry point: runs the configured heartbeat jobs until Ctrl+C

use anyhow::Context;
use tickwork::config::{HeartbeatJob, Settings};
use tickwork::{task_fn, telemetry, ScheduleFactory, Scheduler, SchedulerBuilder};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.json_logs,
    )?;
    telemetry::describe_metrics();

    info!(
        scheduler = %settings.scheduler.name,
        timezone = %settings.scheduler.timezone,
        heartbeats = settings.agent.heartbeats.len(),
        "Starting tickwork agent"
    );

    let factory = settings
        .scheduler
        .schedule_factory()
        .context("Invalid scheduler timezone")?;
    let scheduler = SchedulerBuilder::from_settings(&settings.scheduler)
        .build()
        .context("Failed to start the scheduler")?;

    for heartbeat in &settings.agent.heartbeats {
        // A bad entry must not keep the others from running
        if let Err(e) = schedule_heartbeat(&scheduler, &factory, heartbeat) {
            error!(job_name = %heartbeat.name, error = %e, "Failed to schedule heartbeat");
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C signal, initiating graceful shutdown");

    info!(stats = %scheduler.stats(), "Scheduler statistics");
    scheduler.shutdown_gracefully(None).await;

    info!("Agent stopped");
    Ok(())
}

fn schedule_heartbeat(
    scheduler: &Scheduler,
    factory: &ScheduleFactory,
    heartbeat: &HeartbeatJob,
) -> anyhow::Result<()> {
    let schedule = factory
        .with_cron_expression(&heartbeat.cron)
        .with_context(|| format!("Invalid cron expression for '{}'", heartbeat.name))?;

    let name = heartbeat.name.clone();
    let task = task_fn(heartbeat.name.clone(), move || {
        let name = name.clone();
        async move {
            info!(job_name = %name, at = %chrono::Utc::now(), "Heartbeat");
            Ok(())
        }
    });

    let job = scheduler.schedule(task, schedule)?;
    info!(job = %job, "Heartbeat scheduled");
    Ok(())
}
