use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{MetricSample, MetricStats, MetricsOptions, Tags};

/// Append-only, per-name capped sample store
pub struct MetricsCollector {
    series: Mutex<HashMap<String, VecDeque<MetricSample>>>,
    options: MetricsOptions,
}

impl MetricsCollector {
    pub fn new(options: MetricsOptions) -> Self {
        Self {
            series: Mutex::new(HashMap::new()),
            options,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    pub fn retention_period(&self) -> Duration {
        self.options.retention_period
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<MetricSample>>> {
        self.series.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, name: &str, value: f64, tags: Tags) {
        self.record_at(name, value, tags, Utc::now());
    }

    pub fn record_at(&self, name: &str, value: f64, tags: Tags, timestamp: DateTime<Utc>) {
        if !self.options.enabled {
            return;
        }
        let cap = self.options.max_samples_per_metric.max(1);
        let mut series = self.lock();
        let samples = series.entry(name.to_string()).or_default();
        samples.push_back(MetricSample {
            name: name.to_string(),
            value,
            tags,
            timestamp,
        });
        while samples.len() > cap {
            samples.pop_front();
        }
    }

    pub fn increment(&self, name: &str, tags: Tags) {
        self.record(name, 1.0, tags);
    }

    /// Record a duration in milliseconds
    pub fn timing(&self, name: &str, duration: Duration, tags: Tags) {
        self.record(name, duration.as_secs_f64() * 1000.0, tags);
    }

    /// Start a timer that records on [`MetricTimer::stop`] or when dropped
    pub fn start_timer(&self, name: &str, tags: Tags) -> MetricTimer<'_> {
        MetricTimer {
            collector: self,
            name: name.to_string(),
            tags,
            started: Instant::now(),
            stopped: false,
        }
    }

    /// Raw samples for `name` at or after `since` matching every pair in `filter`
    pub fn get_metrics(
        &self,
        name: &str,
        since: Option<DateTime<Utc>>,
        filter: &Tags,
    ) -> Vec<MetricSample> {
        let series = self.lock();
        series
            .get(name)
            .map(|samples| {
                samples
                    .iter()
                    .filter(|s| since.is_none_or(|since| s.timestamp >= since))
                    .filter(|s| s.matches(filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_stats(
        &self,
        name: &str,
        filter: &Tags,
        since: Option<DateTime<Utc>>,
    ) -> MetricStats {
        let values = self
            .get_metrics(name, since, filter)
            .into_iter()
            .map(|s| s.value)
            .collect();
        MetricStats::from_values(values)
    }

    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn sample_count(&self) -> usize {
        self.lock().values().map(VecDeque::len).sum()
    }

    /// Drop samples older than the retention period; returns how many were removed
    pub fn cleanup(&self) -> usize {
        if !self.options.enabled {
            return 0;
        }
        let retention = chrono::Duration::from_std(self.options.retention_period)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut removed = 0;
        let mut series = self.lock();
        for samples in series.values_mut() {
            let before = samples.len();
            samples.retain(|s| s.timestamp >= cutoff);
            removed += before - samples.len();
        }
        series.retain(|_, samples| !samples.is_empty());
        drop(series);

        if removed > 0 {
            debug!(removed, "Pruned expired metric samples");
        }
        removed
    }

    pub fn reset(&self) {
        self.lock().clear();
    }

    pub(super) fn snapshot(&self, since: DateTime<Utc>) -> Vec<MetricSample> {
        let series = self.lock();
        series
            .values()
            .flat_map(|samples| samples.iter().filter(|s| s.timestamp > since).cloned())
            .collect()
    }
}

/// Scoped timer; records exactly once, on `stop` or on drop
pub struct MetricTimer<'a> {
    collector: &'a MetricsCollector,
    name: String,
    tags: Tags,
    started: Instant,
    stopped: bool,
}

impl MetricTimer<'_> {
    /// Attach or replace a tag before the sample is recorded
    pub fn tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn stop(mut self) -> Duration {
        self.finish()
    }

    fn finish(&mut self) -> Duration {
        let elapsed = self.started.elapsed();
        if !self.stopped {
            self.stopped = true;
            self.collector
                .timing(&self.name, elapsed, std::mem::take(&mut self.tags));
        }
        elapsed
    }
}

impl Drop for MetricTimer<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}
