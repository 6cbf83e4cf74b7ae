// Integration tests for the tickwork scheduler
// These tests drive a real scheduler on a multi-threaded runtime end to end

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone, Timelike, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tickwork::{
    task_fn, FixedTimeProvider, JobStatus, JobTask, OffsetTimeProvider, OneTimeSchedule,
    ScheduleFactory, Scheduler, SchedulerError, SchedulerStatus,
};
use tokio::time::sleep;

/// Helper function to build a task that counts its runs and sleeps `work` each time
fn counting_task(name: &str, runs: Arc<AtomicUsize>, work: Duration) -> Arc<dyn JobTask> {
    task_fn(name.to_string(), move || {
        let runs = Arc::clone(&runs);
        async move {
            runs.fetch_add(1, Ordering::SeqCst);
            sleep(work).await;
            Ok(())
        }
    })
}

fn noop(name: &str) -> Arc<dyn JobTask> {
    task_fn(name.to_string(), || async { Ok(()) })
}

/// Helper function to poll a condition until it holds or the timeout elapses
async fn wait_for<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// A one-time instant the scheduler still sees as upcoming
fn soon() -> DateTime<Utc> {
    Utc::now() + ChronoDuration::milliseconds(20)
}

fn far_future() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_due_job_runs_once_and_moves_to_tomorrow() {
    // Shift the scheduler clock so that the next whole minute is one second away
    let real_now = Utc::now();
    let next_minute = real_now
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap()
        + ChronoDuration::minutes(1);
    let offset = (next_minute - real_now) - ChronoDuration::seconds(1);

    let scheduler = Scheduler::builder()
        .with_time_provider(Arc::new(OffsetTimeProvider::new(offset)))
        .build()
        .unwrap();

    let time = NaiveTime::from_hms_opt(next_minute.hour(), next_minute.minute(), 0).unwrap();
    let schedule = ScheduleFactory::utc().at_fixed_time_every_day(time).unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let job = scheduler
        .schedule(counting_task("daily", Arc::clone(&runs), Duration::ZERO), schedule)
        .unwrap();

    assert_eq!(job.status(), JobStatus::Scheduled);
    assert_eq!(job.next_execution_date_time(), Some(next_minute));

    assert!(wait_for(|| job.executions_count() == 1, Duration::from_secs(10)).await);
    assert!(wait_for(|| job.status() == JobStatus::Scheduled, Duration::from_secs(2)).await);

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(
        job.next_execution_date_time(),
        Some(next_minute + ChronoDuration::days(1))
    );
    assert!(job.last_execution_start_date_time().is_some());
    assert!(job.last_execution_end_date_time() >= job.last_execution_start_date_time());

    scheduler.shutdown_gracefully(Some(Duration::from_secs(5))).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_passed_time_is_scheduled_tomorrow() {
    let now = Utc.with_ymd_and_hms(2024, 5, 6, 8, 0, 0).unwrap();
    let scheduler = Scheduler::builder()
        .with_time_provider(Arc::new(FixedTimeProvider::new(now)))
        .build()
        .unwrap();

    let seven_ten = NaiveTime::from_hms_opt(7, 10, 0).unwrap();
    let job = scheduler
        .schedule(
            noop("morning-report"),
            ScheduleFactory::utc().at_fixed_time_every_day(seven_ten).unwrap(),
        )
        .unwrap();

    assert_eq!(job.status(), JobStatus::Scheduled);
    assert_eq!(
        job.next_execution_date_time(),
        Some(Utc.with_ymd_and_hms(2024, 5, 7, 7, 10, 0).unwrap())
    );
    assert_eq!(job.executions_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_duplicate_job_name_is_rejected() {
    let scheduler = Scheduler::builder().build().unwrap();
    let at = Arc::new(OneTimeSchedule::new(far_future()));

    let first = scheduler.schedule(noop("FooTask"), at.clone()).unwrap();
    let second = scheduler.schedule(noop("FooTask"), at);

    match second {
        Err(SchedulerError::DuplicateJobName(name)) => assert_eq!(name, "FooTask"),
        other => panic!("expected a duplicate name error, got {:?}", other.map(|j| j.to_string())),
    }
    assert_eq!(scheduler.job_status().len(), 1);
    assert_eq!(first.status(), JobStatus::Scheduled);
    assert_eq!(scheduler.stats().queued_jobs, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_done_job_name_can_be_reused_and_keeps_statistics() {
    let scheduler = Scheduler::builder().build().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let at = Utc::now() + ChronoDuration::milliseconds(100);

    let first = scheduler
        .schedule(
            counting_task("once", Arc::clone(&runs), Duration::ZERO),
            Arc::new(OneTimeSchedule::new(at)),
        )
        .unwrap();
    assert!(wait_for(|| first.status() == JobStatus::Done, Duration::from_secs(5)).await);
    assert_eq!(first.executions_count(), 1);

    let second = scheduler
        .schedule(
            counting_task("once", Arc::clone(&runs), Duration::ZERO),
            Arc::new(OneTimeSchedule::new(far_future())),
        )
        .unwrap();
    assert_eq!(second.status(), JobStatus::Scheduled);
    assert_eq!(second.executions_count(), 1);
    assert_eq!(
        second.last_execution_start_date_time(),
        first.last_execution_start_date_time()
    );

    let found = scheduler.find_job("once").unwrap();
    assert_eq!(found.status(), JobStatus::Scheduled);
    assert!(scheduler.find_job("other").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_scheduled_job_resolves_immediately() {
    let scheduler = Scheduler::builder().build().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let job = scheduler
        .schedule(
            counting_task("nightly", Arc::clone(&runs), Duration::ZERO),
            Arc::new(OneTimeSchedule::new(far_future())),
        )
        .unwrap();

    let handle = scheduler.cancel("nightly").unwrap();
    assert!(handle.is_done());

    let cancelled = handle.wait().await.unwrap();
    assert_eq!(cancelled.status(), JobStatus::Done);
    assert_eq!(job.status(), JobStatus::Done);
    assert_eq!(job.executions_count(), 0);
    assert_eq!(job.schedule().description(), "Disabled schedule");
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.stats().queued_jobs, 0);

    // Cancelling again is harmless
    assert!(scheduler.cancel("nightly").unwrap().is_done());
    assert!(matches!(
        scheduler.cancel("unknown"),
        Err(SchedulerError::JobNotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_running_job_resolves_after_the_run() {
    let scheduler = Scheduler::builder().build().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let schedule = ScheduleFactory::utc()
        .with_fixed_delay(ChronoDuration::milliseconds(50))
        .unwrap();
    let job = scheduler
        .schedule(
            counting_task("slow", Arc::clone(&runs), Duration::from_millis(400)),
            schedule,
        )
        .unwrap();

    assert!(wait_for(|| job.status() == JobStatus::Running, Duration::from_secs(5)).await);
    assert!(job.running_on().is_some());

    let handle = scheduler.cancel("slow").unwrap();
    assert!(!handle.is_done());
    // A second request shares the pending cancellation
    let same = scheduler.cancel("slow").unwrap();
    assert!(!same.is_done());

    let cancelled = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cancelled.status(), JobStatus::Done);
    assert_eq!(cancelled.executions_count(), 1);
    assert!(same.is_done());

    sleep(Duration::from_millis(200)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(job.status(), JobStatus::Done);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_job_waiting_for_a_worker() {
    let scheduler = Scheduler::builder()
        .with_min_workers(1)
        .with_max_workers(1)
        .build()
        .unwrap();
    let runs = Arc::new(AtomicUsize::new(0));

    let busy = scheduler
        .schedule(
            counting_task("busy", Arc::clone(&runs), Duration::from_millis(600)),
            Arc::new(OneTimeSchedule::new(soon())),
        )
        .unwrap();
    assert!(wait_for(|| busy.status() == JobStatus::Running, Duration::from_secs(5)).await);

    let waiting = scheduler
        .schedule(
            counting_task("waiting", Arc::clone(&runs), Duration::ZERO),
            Arc::new(OneTimeSchedule::new(Utc::now() + ChronoDuration::milliseconds(20))),
        )
        .unwrap();
    assert!(wait_for(|| waiting.status() == JobStatus::Ready, Duration::from_secs(5)).await);

    let handle = scheduler.cancel("waiting").unwrap();
    assert!(handle.is_done());
    assert_eq!(waiting.status(), JobStatus::Done);

    assert!(wait_for(|| busy.status() == JobStatus::Done, Duration::from_secs(5)).await);
    assert_eq!(waiting.executions_count(), 0);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_discards_scheduled_jobs_and_waits_for_running_ones() {
    let scheduler = Scheduler::builder().build().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));

    let running = scheduler
        .schedule(
            counting_task("running", Arc::clone(&runs), Duration::from_millis(300)),
            ScheduleFactory::utc()
                .with_fixed_delay(ChronoDuration::milliseconds(10))
                .unwrap(),
        )
        .unwrap();
    let scheduled = scheduler
        .schedule(
            counting_task("scheduled", Arc::clone(&runs), Duration::ZERO),
            Arc::new(OneTimeSchedule::new(Utc::now() + ChronoDuration::seconds(30))),
        )
        .unwrap();

    assert!(wait_for(|| running.status() == JobStatus::Running, Duration::from_secs(5)).await);

    let started = Instant::now();
    scheduler.shutdown_gracefully(Some(Duration::from_secs(5))).await;
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(running.executions_count(), 1);
    assert_eq!(running.status(), JobStatus::Done);
    assert_eq!(scheduled.status(), JobStatus::Done);
    assert_eq!(scheduled.executions_count(), 0);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.status(), SchedulerStatus::Stopped);

    // Second call has nothing left to do
    scheduler.shutdown_gracefully(Some(Duration::from_secs(1))).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(matches!(
        scheduler.schedule(noop("late"), Arc::new(OneTimeSchedule::new(far_future()))),
        Err(SchedulerError::ShuttingDown(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_timeout_does_not_wait_for_long_jobs() {
    let scheduler = Scheduler::builder().build().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let job = scheduler
        .schedule(
            counting_task("long", Arc::clone(&runs), Duration::from_secs(2)),
            Arc::new(OneTimeSchedule::new(soon())),
        )
        .unwrap();
    assert!(wait_for(|| job.status() == JobStatus::Running, Duration::from_secs(5)).await);

    let started = Instant::now();
    scheduler
        .shutdown_gracefully(Some(Duration::from_millis(100)))
        .await;
    assert!(started.elapsed() < Duration::from_secs(1));

    let stats = scheduler.stats();
    assert_eq!(stats.status, SchedulerStatus::ShuttingDown);
    assert!(stats.terminating);
    assert_eq!(stats.active_workers, 1);

    // The job is not interrupted
    assert!(wait_for(|| job.status() == JobStatus::Done, Duration::from_secs(5)).await);
    assert_eq!(job.executions_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stats_of_fresh_and_busy_scheduler() {
    let scheduler = Scheduler::builder().with_name("reports").build().unwrap();

    let stats = scheduler.stats();
    assert_eq!(stats.name, "reports");
    assert_eq!(stats.status, SchedulerStatus::Listening);
    assert_eq!(stats.min_workers, 1);
    assert_eq!(stats.max_workers, 5);
    assert_eq!(stats.active_workers, 0);
    assert_eq!(stats.idle_workers, 0);
    assert_eq!(stats.largest_pool_size, 0);
    assert!(!stats.terminating);
    assert_eq!(stats.queued_jobs, 0);

    let runs = Arc::new(AtomicUsize::new(0));
    let job = scheduler
        .schedule(
            counting_task("stats", Arc::clone(&runs), Duration::from_millis(300)),
            Arc::new(OneTimeSchedule::new(soon())),
        )
        .unwrap();
    assert!(wait_for(|| job.status() == JobStatus::Running, Duration::from_secs(5)).await);

    let busy = scheduler.stats();
    assert_eq!(busy.active_workers, 1);
    assert_eq!(busy.largest_pool_size, 1);
    assert_eq!(job.running_on().as_deref(), Some("reports-worker-0"));

    let json = serde_json::to_value(&busy).unwrap();
    assert_eq!(json["status"], "LISTENING");
    assert_eq!(json["active_workers"], 1);

    assert!(wait_for(|| scheduler.stats().active_workers == 0, Duration::from_secs(5)).await);
    assert_eq!(job.status(), JobStatus::Done);
    let idle = scheduler.stats();
    assert_eq!(idle.active_workers, 0);
    assert_eq!(idle.idle_workers, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_suspend_stops_dispatch_and_resume_skips_missed_runs() {
    let scheduler = Scheduler::builder().build().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let job = scheduler
        .schedule(
            counting_task("ticker", Arc::clone(&runs), Duration::ZERO),
            ScheduleFactory::utc()
                .with_fixed_delay(ChronoDuration::milliseconds(100))
                .unwrap(),
        )
        .unwrap();
    assert!(wait_for(|| runs.load(Ordering::SeqCst) >= 1, Duration::from_secs(5)).await);

    assert!(scheduler.suspend());
    assert!(scheduler.suspend());
    assert_eq!(scheduler.status(), SchedulerStatus::Suspended);

    // Let a run that was already dispatched settle
    sleep(Duration::from_millis(150)).await;
    let runs_when_suspended = runs.load(Ordering::SeqCst);
    sleep(Duration::from_millis(400)).await;
    assert_eq!(runs.load(Ordering::SeqCst), runs_when_suspended);
    assert_eq!(job.status(), JobStatus::Scheduled);

    let missed = job.next_execution_date_time().unwrap();
    assert!(missed < Utc::now());

    let resumed_at = Utc::now();
    assert!(scheduler.resume());
    assert_eq!(scheduler.status(), SchedulerStatus::Listening);
    assert!(job.next_execution_date_time().unwrap() >= resumed_at);

    assert!(
        wait_for(
            || runs.load(Ordering::SeqCst) > runs_when_suspended,
            Duration::from_secs(5)
        )
        .await
    );

    scheduler.shutdown_gracefully(Some(Duration::from_secs(5))).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_job_keeps_its_schedule() {
    let scheduler = Scheduler::builder().build().unwrap();
    let attempts = Arc::new(AtomicUsize::new(0));
    let task = {
        let attempts = Arc::clone(&attempts);
        task_fn("flaky", move || {
            let attempts = Arc::clone(&attempts);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("remote service unavailable"))
            }
        })
    };
    let job = scheduler
        .schedule(
            task,
            ScheduleFactory::utc()
                .with_fixed_delay(ChronoDuration::milliseconds(50))
                .unwrap(),
        )
        .unwrap();

    assert!(wait_for(|| job.executions_count() >= 3, Duration::from_secs(5)).await);
    assert!(attempts.load(Ordering::SeqCst) >= 3);
    assert_ne!(job.status(), JobStatus::Done);

    scheduler.shutdown_gracefully(Some(Duration::from_secs(5))).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_jobs_run_in_due_order() {
    let scheduler = Scheduler::builder()
        .with_min_workers(1)
        .with_max_workers(1)
        .build()
        .unwrap();
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let base = Utc::now() + ChronoDuration::milliseconds(200);

    for (name, offset_ms) in [("third", 60), ("first", 0), ("second", 30)] {
        let order = Arc::clone(&order);
        let task = task_fn(name, move || {
            let order = Arc::clone(&order);
            async move {
                order.lock().unwrap().push(name);
                Ok(())
            }
        });
        scheduler
            .schedule(
                task,
                Arc::new(OneTimeSchedule::new(base + ChronoDuration::milliseconds(offset_ms))),
            )
            .unwrap();
    }

    assert!(wait_for(|| order.lock().unwrap().len() == 3, Duration::from_secs(5)).await);
    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    assert!(scheduler
        .job_status()
        .iter()
        .all(|job| job.status() == JobStatus::Done));
}
