//! Batch report generation under bounded concurrency

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use rtg_core::MetricsCollector;
use rtg_core::config::BatchConfig;
use rtg_core::infrastructure::metrics::{names, tags};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{
    BatchEstimate, BatchJob, BatchProgress, BatchTargetResult, DurationEstimate, ReportError,
    ReportFilters, ReportGenerator, ReportOptions, ReportType, TargetStatus,
};

static TARGET_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[1-5][0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
        .expect("target id regex is valid")
});

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `prefix_<epoch-ms>_<9 random base36 chars>`
pub(crate) fn generate_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("{}_{}_{}", prefix, Utc::now().timestamp_millis(), suffix)
}

pub fn generate_batch_id() -> String {
    generate_id("batch")
}

pub fn is_valid_target_id(id: &str) -> bool {
    TARGET_ID.is_match(id)
}

/// Trim, drop malformed ids and case-insensitive duplicates, keeping the
/// first spelling of each id in input order
pub fn validate_targets(targets: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut valid = Vec::with_capacity(targets.len());

    for raw in targets {
        let id = raw.trim();
        if !is_valid_target_id(id) {
            warn!(target_id = %raw, "Dropping malformed target id");
            continue;
        }
        if !seen.insert(id.to_lowercase()) {
            warn!(target_id = %id, "Dropping duplicate target id");
            continue;
        }
        valid.push(id.to_string());
    }
    valid
}

fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (done as f64 / total as f64 * 1000.0).round() / 10.0
}

/// Runs one report per target through a shared [`ReportGenerator`]
pub struct BatchGenerator {
    generator: Arc<dyn ReportGenerator>,
    metrics: Arc<MetricsCollector>,
    max_concurrent: usize,
    report_timeout: Duration,
    average_report: Duration,
}

impl BatchGenerator {
    pub fn new(
        generator: Arc<dyn ReportGenerator>,
        metrics: Arc<MetricsCollector>,
        config: &BatchConfig,
    ) -> Self {
        Self {
            generator,
            metrics,
            max_concurrent: config.max_concurrent.max(1),
            report_timeout: Duration::from_millis(config.report_timeout_ms),
            average_report: Duration::from_millis(config.average_report_ms),
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_report_timeout(mut self, timeout: Duration) -> Self {
        self.report_timeout = timeout;
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Generate a report for every valid target.
    ///
    /// Only an empty valid target set fails the call; per-target failures
    /// are recorded on the returned job.
    pub async fn generate_batch_reports(
        &self,
        targets: &[String],
        report_type: &ReportType,
        template_id: &str,
        base_filters: &ReportFilters,
        options: ReportOptions,
    ) -> Result<BatchJob, ReportError> {
        self.generate_batch_reports_streaming(
            targets,
            report_type,
            template_id,
            base_filters,
            options,
            &|_| {},
        )
        .await
    }

    /// Like [`generate_batch_reports`](Self::generate_batch_reports), calling
    /// `on_progress` as targets start and settle.
    ///
    /// `options.cancel` is shared by the whole batch: firing it aborts every
    /// target still in flight or queued.
    pub async fn generate_batch_reports_streaming(
        &self,
        targets: &[String],
        report_type: &ReportType,
        template_id: &str,
        base_filters: &ReportFilters,
        options: ReportOptions,
        on_progress: &(dyn Fn(BatchProgress) + Send + Sync),
    ) -> Result<BatchJob, ReportError> {
        let valid = validate_targets(targets);
        if valid.is_empty() {
            return Err(ReportError::ValidationError(
                "No valid target IDs provided".to_string(),
            ));
        }

        let batch_id = generate_batch_id();
        let total = valid.len();
        let mut job = BatchJob::new(
            batch_id.clone(),
            report_type.clone(),
            template_id.to_string(),
            total,
            self.max_concurrent,
        );

        info!(
            batch_id = %batch_id,
            report_type = %report_type,
            targets = total,
            dropped = targets.len() - total,
            concurrency = self.max_concurrent,
            "Starting batch report generation"
        );
        on_progress(BatchProgress::BatchStarted {
            batch_id: batch_id.clone(),
            total_targets: total,
            concurrency_limit: self.max_concurrent,
        });

        let semaphore = Semaphore::new(self.max_concurrent);
        let cancel = options.cancel.clone().unwrap_or_default();
        let settled = AtomicUsize::new(0);
        let batch_ref: &str = &batch_id;

        let units = valid.iter().map(|target_id| {
            let unit = Unit {
                batch_id: batch_ref,
                report_type,
                template_id,
                base_filters,
                timeout: options.timeout,
                cancel: &cancel,
            };
            let semaphore = &semaphore;
            let settled = &settled;
            async move {
                let result = match semaphore.acquire().await {
                    Ok(_permit) => {
                        on_progress(BatchProgress::TargetStarted {
                            batch_id: batch_ref.to_string(),
                            target_id: target_id.clone(),
                        });
                        self.run_target(&unit, target_id).await
                    }
                    Err(_) => failed(target_id, &ReportError::Aborted),
                };

                let done = settled.fetch_add(1, Ordering::SeqCst) + 1;
                let progress = percent(done, total);
                match (&result.status, &result.error) {
                    (TargetStatus::Success, _) => on_progress(BatchProgress::TargetCompleted {
                        batch_id: batch_ref.to_string(),
                        target_id: target_id.clone(),
                        progress,
                    }),
                    (TargetStatus::Failed, error) => on_progress(BatchProgress::TargetFailed {
                        batch_id: batch_ref.to_string(),
                        target_id: target_id.clone(),
                        error: error.clone().unwrap_or_default(),
                        progress,
                    }),
                }
                result
            }
        });

        for result in join_all(units).await {
            job.push(result);
        }
        job.finish();

        let duration_ms = job.duration_ms.unwrap_or_default();
        self.metrics.timing(
            names::BATCH_GENERATION_DURATION,
            Duration::from_millis(duration_ms),
            tags([
                ("batch_id", batch_id.clone()),
                ("report_type", report_type.to_string()),
                ("total_targets", total.to_string()),
                ("completed", job.completed.to_string()),
                ("failed", job.failed.to_string()),
            ]),
        );
        info!(
            batch_id = %batch_id,
            completed = job.completed,
            failed = job.failed,
            duration_ms,
            "Batch report generation finished"
        );
        on_progress(BatchProgress::BatchCompleted {
            batch_id,
            completed: job.completed,
            failed: job.failed,
            duration_ms,
        });

        Ok(job)
    }

    async fn run_target(&self, unit: &Unit<'_>, target_id: &str) -> BatchTargetResult {
        if unit.cancel.is_cancelled() {
            return self.record(unit, target_id, Err(ReportError::Aborted));
        }

        let mut filters = unit.base_filters.clone();
        filters.target_id = Some(target_id.to_string());
        let target_cancel = unit.cancel.child_token();
        let options = ReportOptions {
            cancel: Some(target_cancel.clone()),
            timeout: unit.timeout,
        };

        debug!(batch_id = %unit.batch_id, target_id, "Generating batch target");
        let outcome = match tokio::time::timeout(
            self.report_timeout,
            self.generator
                .generate(unit.report_type, unit.template_id, &filters, options),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                target_cancel.cancel();
                Err(ReportError::Timeout(format!(
                    "Report for target {} exceeded {}ms",
                    target_id,
                    self.report_timeout.as_millis()
                )))
            }
        };

        self.record(unit, target_id, outcome)
    }

    fn record(
        &self,
        unit: &Unit<'_>,
        target_id: &str,
        outcome: Result<String, ReportError>,
    ) -> BatchTargetResult {
        match outcome {
            Ok(content) => {
                self.metrics.increment(
                    names::BATCH_TARGET_SUCCESS,
                    tags([
                        ("batch_id", unit.batch_id),
                        ("report_type", unit.report_type.as_str()),
                    ]),
                );
                BatchTargetResult {
                    target_id: target_id.to_string(),
                    status: TargetStatus::Success,
                    content: Some(content),
                    error: None,
                    error_kind: None,
                    timestamp: Utc::now(),
                }
            }
            Err(e) => {
                warn!(batch_id = %unit.batch_id, target_id, error = %e, "Batch target failed");
                self.metrics.increment(
                    names::BATCH_TARGET_ERRORS,
                    tags([
                        ("batch_id", unit.batch_id),
                        ("report_type", unit.report_type.as_str()),
                        ("error_kind", e.kind()),
                    ]),
                );
                failed(target_id, &e)
            }
        }
    }

    /// Serial and parallel duration estimates for `target_count` targets
    pub fn estimate_batch_time(
        &self,
        target_count: usize,
        average: Option<Duration>,
    ) -> BatchEstimate {
        let average = average.unwrap_or(self.average_report).as_millis() as u64;
        let waves = target_count.div_ceil(self.max_concurrent) as u64;
        BatchEstimate {
            serial: DurationEstimate::from_millis(target_count as u64 * average),
            parallel: DurationEstimate::from_millis(waves * average),
        }
    }
}

/// Per-batch values shared by every target
struct Unit<'a> {
    batch_id: &'a str,
    report_type: &'a ReportType,
    template_id: &'a str,
    base_filters: &'a ReportFilters,
    timeout: Option<Duration>,
    cancel: &'a CancellationToken,
}

fn failed(target_id: &str, error: &ReportError) -> BatchTargetResult {
    BatchTargetResult {
        target_id: target_id.to_string(),
        status: TargetStatus::Failed,
        content: None,
        error: Some(error.to_string()),
        error_kind: Some(error.kind().to_string()),
        timestamp: Utc::now(),
    }
}
