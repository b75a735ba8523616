use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{Duration, Utc};

use super::{MetricSample, MetricsCollector};

const PREFIX: &str = "rtg_";

/// Counter-like names are summed, everything else exports its latest value
fn is_counter(name: &str) -> bool {
    name.contains("count") || name.contains("errors") || name.contains("success")
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

impl MetricsCollector {
    /// Prometheus text exposition of the last hour of samples
    pub fn to_prometheus(&self) -> String {
        let since = Utc::now() - Duration::hours(1);

        // name -> label string -> samples
        let mut grouped: BTreeMap<String, BTreeMap<String, Vec<MetricSample>>> = BTreeMap::new();
        for sample in self.snapshot(since) {
            let labels = sample
                .tags
                .iter()
                .map(|(k, v)| format!("{}=\"{}\"", sanitize_name(k), escape_label(v)))
                .collect::<Vec<_>>()
                .join(",");
            grouped
                .entry(sample.name.clone())
                .or_default()
                .entry(labels)
                .or_default()
                .push(sample);
        }

        let mut out = String::from("# Report generator metrics\n");
        for (name, series) in grouped {
            let metric = format!("{PREFIX}{}", sanitize_name(&name));
            let counter = is_counter(&name);
            let _ = writeln!(
                out,
                "# TYPE {metric} {}",
                if counter { "counter" } else { "gauge" }
            );
            for (labels, samples) in series {
                let value = if counter {
                    samples.iter().map(|s| s.value).sum::<f64>()
                } else {
                    samples
                        .iter()
                        .max_by_key(|s| s.timestamp)
                        .map(|s| s.value)
                        .unwrap_or_default()
                };
                if labels.is_empty() {
                    let _ = writeln!(out, "{metric} {value}");
                } else {
                    let _ = writeln!(out, "{metric}{{{labels}}} {value}");
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::metrics::{MetricsOptions, Tags, names, tags};

    #[test]
    fn test_counters_are_summed_per_tag_set() {
        let metrics = MetricsCollector::new(MetricsOptions::default());
        metrics.increment(names::REPORT_GENERATION_ERRORS, tags([("kind", "timeout")]));
        metrics.increment(names::REPORT_GENERATION_ERRORS, tags([("kind", "timeout")]));
        metrics.increment(names::REPORT_GENERATION_ERRORS, tags([("kind", "aborted")]));

        let text = metrics.to_prometheus();
        assert!(text.contains("# TYPE rtg_report_generation_errors counter"));
        assert!(text.contains("rtg_report_generation_errors{kind=\"timeout\"} 2"));
        assert!(text.contains("rtg_report_generation_errors{kind=\"aborted\"} 1"));
    }

    #[test]
    fn test_gauges_export_latest_value() {
        let metrics = MetricsCollector::new(MetricsOptions::default());
        let earlier = Utc::now() - Duration::minutes(5);
        metrics.record_at(names::CACHE_HIT_RATIO, 0.25, Tags::new(), earlier);
        metrics.record(names::CACHE_HIT_RATIO, 0.75, Tags::new());

        let text = metrics.to_prometheus();
        assert!(text.contains("# TYPE rtg_cache_hit_ratio gauge"));
        assert!(text.contains("rtg_cache_hit_ratio 0.75"));
    }

    #[test]
    fn test_old_samples_are_not_exported() {
        let metrics = MetricsCollector::new(MetricsOptions::default());
        let old = Utc::now() - Duration::hours(3);
        metrics.record_at(names::LLM_CALL_DURATION, 5.0, Tags::new(), old);
        assert!(!metrics.to_prometheus().contains("llm_call_duration"));
    }

    #[test]
    fn test_label_values_are_escaped() {
        let metrics = MetricsCollector::new(MetricsOptions::default());
        metrics.increment("retry_count", tags([("error", "say \"hi\"")]));
        assert!(metrics.to_prometheus().contains(r#"error="say \"hi\"""#));
    }
}
