//! Recurring report scheduler
//!
//! A single tick loop checks registered schedules and spawns one tracked task
//! per due run. Run bookkeeping lives in memory; delivery failures are
//! logged and never fail a run.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rtg_core::config::SchedulerConfig;
use rtg_core::infrastructure::metrics::{names, tags};
use rtg_core::{MetricsCollector, spawn_background, spawn_tracked};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::batch::{BatchGenerator, generate_id};
use crate::domain::{
    ReportError, ReportGenerator, ReportOptions, Schedule, ScheduleRequest, ScheduleUpdate,
    SchedulerError, next_run_after,
};
use crate::infrastructure::{DeliveryPayload, ReportDelivery};

/// A schedule together with its live state
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleView {
    #[serde(flatten)]
    pub schedule: Schedule,
    pub is_running: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpcomingRun {
    pub id: String,
    pub name: String,
    pub next_run: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub total_schedules: usize,
    pub enabled_schedules: usize,
    pub running_jobs: usize,
    pub total_runs: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    /// The five soonest enabled runs
    pub next_runs: Vec<UpcomingRun>,
}

struct SchedulerInner {
    generator: Arc<dyn ReportGenerator>,
    batch: Arc<BatchGenerator>,
    metrics: Arc<MetricsCollector>,
    delivery: ReportDelivery,
    schedules: Mutex<HashMap<String, Schedule>>,
    running: Mutex<HashSet<String>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    tick_interval: Duration,
    shutdown_timeout: Duration,
    max_concurrent_jobs: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct ReportScheduler {
    inner: Arc<SchedulerInner>,
}

impl ReportScheduler {
    pub fn new(
        generator: Arc<dyn ReportGenerator>,
        batch: Arc<BatchGenerator>,
        metrics: Arc<MetricsCollector>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                generator,
                batch,
                metrics,
                delivery: ReportDelivery::new(config.delivery_directory.clone()),
                schedules: Mutex::new(HashMap::new()),
                running: Mutex::new(HashSet::new()),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                tick_interval: Duration::from_secs(config.tick_interval_seconds.max(1)),
                shutdown_timeout: Duration::from_secs(config.shutdown_timeout_seconds),
                max_concurrent_jobs: config.max_concurrent_jobs.max(1),
            }),
        }
    }

    /// Register a schedule; its first run is computed from the cron expression
    pub fn schedule_report(&self, request: ScheduleRequest) -> Result<Schedule, SchedulerError> {
        if request.name.trim().is_empty() {
            return Err(SchedulerError::Invalid("name must not be empty".to_string()));
        }
        if request.template_id.trim().is_empty() {
            return Err(SchedulerError::Invalid(
                "template_id must not be empty".to_string(),
            ));
        }

        let id = request
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| generate_id("schedule"));

        let mut schedules = lock(&self.inner.schedules);
        if schedules.contains_key(&id) {
            return Err(SchedulerError::Invalid(format!(
                "schedule {} already exists",
                id
            )));
        }
        let schedule = Schedule::from_request(id.clone(), request, Utc::now());
        info!(
            schedule_id = %id,
            name = %schedule.name,
            cron = %schedule.cron_expression,
            next_run = %schedule.next_run,
            "Report scheduled"
        );
        schedules.insert(id, schedule.clone());
        Ok(schedule)
    }

    pub fn update_schedule(
        &self,
        id: &str,
        update: ScheduleUpdate,
    ) -> Result<Schedule, SchedulerError> {
        let mut schedules = lock(&self.inner.schedules);
        let schedule = schedules
            .get_mut(id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;

        if let Some(name) = update.name {
            schedule.name = name;
        }
        if let Some(cron) = update.cron_expression {
            schedule.next_run = next_run_after(&cron, Utc::now());
            schedule.cron_expression = cron;
        }
        if let Some(template_id) = update.template_id {
            schedule.template_id = template_id;
        }
        if let Some(targets) = update.targets {
            schedule.targets = targets;
        }
        if let Some(filters) = update.filters {
            schedule.filters = filters;
        }
        if let Some(delivery) = update.delivery {
            schedule.delivery = delivery;
        }
        if let Some(enabled) = update.enabled {
            schedule.enabled = enabled;
        }
        if let Some(conditions) = update.conditions {
            schedule.conditions = conditions;
        }

        debug!(schedule_id = id, "Schedule updated");
        Ok(schedule.clone())
    }

    pub fn remove_schedule(&self, id: &str) -> Result<(), SchedulerError> {
        if lock(&self.inner.schedules).remove(id).is_none() {
            return Err(SchedulerError::NotFound(id.to_string()));
        }
        info!(schedule_id = id, "Schedule removed");
        Ok(())
    }

    pub fn get_schedule(&self, id: &str) -> Option<ScheduleView> {
        let schedule = lock(&self.inner.schedules).get(id).cloned()?;
        let is_running = lock(&self.inner.running).contains(id);
        Some(ScheduleView {
            schedule,
            is_running,
        })
    }

    pub fn get_schedules(&self) -> Vec<ScheduleView> {
        let schedules: Vec<Schedule> = lock(&self.inner.schedules).values().cloned().collect();
        let running = lock(&self.inner.running);
        let mut views: Vec<ScheduleView> = schedules
            .into_iter()
            .map(|schedule| ScheduleView {
                is_running: running.contains(&schedule.id),
                schedule,
            })
            .collect();
        views.sort_by(|a, b| a.schedule.created_at.cmp(&b.schedule.created_at));
        views
    }

    /// Run a schedule now, regardless of its next run time and conditions
    pub fn trigger(&self, id: &str) -> Result<JoinHandle<()>, SchedulerError> {
        if !lock(&self.inner.schedules).contains_key(id) {
            return Err(SchedulerError::NotFound(id.to_string()));
        }
        if !lock(&self.inner.running).insert(id.to_string()) {
            return Err(SchedulerError::AlreadyRunning(id.to_string()));
        }
        info!(schedule_id = id, "Schedule triggered manually");
        Ok(self.spawn_run(id.to_string()))
    }

    /// Start the tick loop; returns immediately
    pub fn start(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        info!(
            interval_secs = self.inner.tick_interval.as_secs(),
            "Report scheduler started"
        );
        spawn_background("report-scheduler", async move {
            let mut ticker = tokio::time::interval(scheduler.inner.tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = scheduler.inner.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        scheduler.check_schedules(Utc::now());
                    }
                }
            }
            debug!("Report scheduler loop stopped");
            Ok::<(), ReportError>(())
        })
    }

    /// Start every due schedule whose conditions hold at `now`; returns the
    /// ids of the runs started
    pub fn check_schedules(&self, now: DateTime<Utc>) -> Vec<String> {
        if self.inner.shutdown.is_cancelled() {
            return Vec::new();
        }

        let mut due: Vec<(DateTime<Utc>, String)> = lock(&self.inner.schedules)
            .values()
            .filter(|s| s.is_due(now))
            .map(|s| (s.next_run, s.id.clone()))
            .collect();
        due.sort();

        let mut started = Vec::new();
        for (_, id) in due {
            {
                let mut running = lock(&self.inner.running);
                if running.len() >= self.inner.max_concurrent_jobs {
                    debug!(schedule_id = %id, "Concurrent job limit reached, deferring");
                    break;
                }
                if !running.insert(id.clone()) {
                    continue;
                }
            }
            if let Some(schedule) = lock(&self.inner.schedules).get_mut(&id) {
                schedule.next_run = next_run_after(&schedule.cron_expression, now);
            }
            self.spawn_run(id.clone());
            started.push(id);
        }
        started
    }

    fn spawn_run(&self, id: String) -> JoinHandle<()> {
        let inner = self.inner.clone();
        spawn_tracked(&self.inner.tracker, "scheduled-report", async move {
            let outcome = execute(&inner, &id).await;
            lock(&inner.running).remove(&id);
            outcome
        })
    }

    pub fn stats(&self) -> SchedulerStats {
        let schedules = lock(&self.inner.schedules);
        let mut upcoming: Vec<UpcomingRun> = schedules
            .values()
            .filter(|s| s.enabled)
            .map(|s| UpcomingRun {
                id: s.id.clone(),
                name: s.name.clone(),
                next_run: s.next_run,
            })
            .collect();
        upcoming.sort_by(|a, b| a.next_run.cmp(&b.next_run));
        upcoming.truncate(5);

        SchedulerStats {
            total_schedules: schedules.len(),
            enabled_schedules: schedules.values().filter(|s| s.enabled).count(),
            running_jobs: lock(&self.inner.running).len(),
            total_runs: schedules.values().map(|s| s.run_count).sum(),
            total_successes: schedules.values().map(|s| s.success_count).sum(),
            total_failures: schedules.values().map(|s| s.failure_count).sum(),
            next_runs: upcoming,
        }
    }

    /// Stop the tick loop and wait for running jobs, up to the configured
    /// timeout. Returns `false` if jobs were still running at the deadline.
    pub async fn shutdown(&self) -> bool {
        info!("Shutting down report scheduler");
        self.inner.shutdown.cancel();
        self.inner.tracker.close();

        match tokio::time::timeout(self.inner.shutdown_timeout, self.inner.tracker.wait()).await {
            Ok(()) => {
                info!("Report scheduler stopped");
                true
            }
            Err(_) => {
                warn!(
                    running = lock(&self.inner.running).len(),
                    "Scheduler shutdown timed out with jobs still running"
                );
                false
            }
        }
    }
}

/// One run of a schedule: generate, record, deliver
async fn execute(inner: &SchedulerInner, id: &str) -> Result<(), ReportError> {
    let Some(schedule) = lock(&inner.schedules).get(id).cloned() else {
        warn!(schedule_id = id, "Schedule disappeared before it could run");
        return Ok(());
    };

    info!(schedule_id = id, name = %schedule.name, "Running scheduled report");
    let mut timer = inner.metrics.start_timer(
        names::SCHEDULED_RUN_DURATION,
        tags([
            ("schedule_id", id),
            ("report_type", schedule.report_type.as_str()),
        ]),
    );
    let options = ReportOptions::default().with_cancel(inner.shutdown.child_token());

    let result: Result<Value, ReportError> = if schedule.targets.is_empty() {
        inner
            .generator
            .generate(
                &schedule.report_type,
                &schedule.template_id,
                &schedule.filters,
                options,
            )
            .await
            .map(|content| json!({ "content": content }))
    } else {
        inner
            .batch
            .generate_batch_reports(
                &schedule.targets,
                &schedule.report_type,
                &schedule.template_id,
                &schedule.filters,
                options,
            )
            .await
            .and_then(|job| {
                serde_json::to_value(job).map_err(|e| ReportError::ProviderError(e.to_string()))
            })
    };

    let finished_at = Utc::now();
    timer.tag(
        "outcome",
        match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        },
    );
    timer.stop();

    record_outcome(inner, id, finished_at, result.as_ref().err());

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            inner.metrics.increment(
                names::SCHEDULED_RUN_ERRORS,
                tags([("schedule_id", id), ("error_kind", e.kind())]),
            );
            return Err(e);
        }
    };

    let payload = DeliveryPayload {
        schedule_id: schedule.id.clone(),
        schedule_name: schedule.name.clone(),
        report_type: schedule.report_type.clone(),
        generated_at: finished_at,
        result,
    };
    let summary = inner.delivery.deliver(&schedule, &payload).await;
    info!(
        schedule_id = id,
        delivered = ?summary.delivered,
        failed = ?summary.failed,
        "Scheduled report finished"
    );
    Ok(())
}

fn record_outcome(
    inner: &SchedulerInner,
    id: &str,
    finished_at: DateTime<Utc>,
    error: Option<&ReportError>,
) {
    let mut schedules = lock(&inner.schedules);
    let Some(stored) = schedules.get_mut(id) else {
        return;
    };
    stored.last_run = Some(finished_at);
    stored.run_count += 1;
    match error {
        None => {
            stored.success_count += 1;
            stored.last_error = None;
        }
        Some(e) => {
            stored.failure_count += 1;
            stored.last_error = Some(e.to_string());
        }
    }
}
