//! Recurring report schedules

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

use super::entities::{ReportFilters, ReportType};

/// Scheduler failures surfaced to callers
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulerError {
    #[error("Schedule not found: {0}")]
    NotFound(String),

    #[error("Schedule is already running: {0}")]
    AlreadyRunning(String),

    #[error("Invalid schedule: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailDelivery {
    pub enabled: bool,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookDelivery {
    pub enabled: bool,
    pub url: Option<String>,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesystemDelivery {
    pub enabled: bool,
    /// Falls back to the scheduler's configured directory
    pub directory: Option<String>,
}

/// Where a finished run is sent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryOptions {
    pub email: EmailDelivery,
    pub webhook: WebhookDelivery,
    pub filesystem: FilesystemDelivery,
}

/// Wall-clock gates evaluated at tick time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConditions {
    pub business_hours_only: bool,
    pub weekdays_only: bool,
}

impl ScheduleConditions {
    pub fn allow(&self, now: DateTime<Utc>) -> bool {
        if self.business_hours_only && !(9..=17).contains(&now.hour()) {
            return false;
        }
        if self.weekdays_only && matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        true
    }
}

/// Caller-supplied definition of a schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub cron_expression: String,
    pub report_type: ReportType,
    pub template_id: String,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub filters: ReportFilters,
    #[serde(default)]
    pub delivery: DeliveryOptions,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub conditions: ScheduleConditions,
}

fn enabled_by_default() -> bool {
    true
}

/// A registered schedule with its run bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub name: String,
    pub cron_expression: String,
    pub report_type: ReportType,
    pub template_id: String,
    pub targets: Vec<String>,
    pub filters: ReportFilters,
    pub delivery: DeliveryOptions,
    pub enabled: bool,
    pub conditions: ScheduleConditions,
    pub created_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub run_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_error: Option<String>,
}

impl Schedule {
    pub fn from_request(id: String, request: ScheduleRequest, now: DateTime<Utc>) -> Self {
        let next_run = next_run_after(&request.cron_expression, now);
        Self {
            id,
            name: request.name,
            cron_expression: request.cron_expression,
            report_type: request.report_type,
            template_id: request.template_id,
            targets: request.targets,
            filters: request.filters,
            delivery: request.delivery,
            enabled: request.enabled,
            conditions: request.conditions,
            created_at: now,
            last_run: None,
            next_run,
            run_count: 0,
            success_count: 0,
            failure_count: 0,
            last_error: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run <= now && self.conditions.allow(now)
    }
}

/// Partial update; `None` keeps the current value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleUpdate {
    pub name: Option<String>,
    pub cron_expression: Option<String>,
    pub template_id: Option<String>,
    pub targets: Option<Vec<String>>,
    pub filters: Option<ReportFilters>,
    pub delivery: Option<DeliveryOptions>,
    pub enabled: Option<bool>,
    pub conditions: Option<ScheduleConditions>,
}

/// Next run of a minimal cron subset, in UTC.
///
/// `* * * * *` runs every minute and `M H * * *` once a day at H:M. Anything
/// else runs at the top of the next hour.
pub fn next_run_after(cron_expression: &str, from: DateTime<Utc>) -> DateTime<Utc> {
    let fields: Vec<&str> = cron_expression.split_whitespace().collect();

    if fields.len() == 5 && fields.iter().all(|f| *f == "*") {
        return from + Duration::minutes(1);
    }

    if let [minute, hour, "*", "*", "*"] = fields.as_slice() {
        if let Some(at) = daily_time(minute, hour) {
            let today = Utc.from_utc_datetime(&from.date_naive().and_time(at));
            return if today > from {
                today
            } else {
                today + Duration::days(1)
            };
        }
    }

    top_of_next_hour(from)
}

fn daily_time(minute: &str, hour: &str) -> Option<NaiveTime> {
    let minute = minute.parse::<u32>().ok()?;
    let hour = hour.parse::<u32>().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn top_of_next_hour(from: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = from
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(from);
    truncated + Duration::hours(1)
}
