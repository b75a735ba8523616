use chrono::{Duration, Utc};
use serde::Serialize;

use super::{MetricsCollector, Tags, names};

/// Coarse health bucket derived from the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl HealthStatus {
    fn from_score(score: u32) -> Self {
        match score {
            90.. => Self::Excellent,
            70..=89 => Self::Good,
            50..=69 => Self::Fair,
            _ => Self::Poor,
        }
    }
}

/// Advisory health summary over the last hour
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub score: u32,
    pub status: HealthStatus,
    pub total_requests: usize,
    pub avg_duration_ms: f64,
    pub p95_duration_ms: f64,
    pub error_count: usize,
    pub success_rate_percent: f64,
    pub avg_cache_hit_ratio: Option<f64>,
    pub samples_held: usize,
    pub recommendations: Vec<String>,
}

impl MetricsCollector {
    pub fn get_health_metrics(&self) -> HealthReport {
        let since = Some(Utc::now() - Duration::hours(1));
        let none = Tags::new();

        let durations = self.get_stats(names::REPORT_GENERATION_DURATION, &none, since);
        let errors = self.get_stats(names::REPORT_GENERATION_ERRORS, &none, since);
        let cache = self.get_stats(names::CACHE_HIT_RATIO, &none, since);

        let success_rate = if durations.count > 0 {
            let ok = durations.count.saturating_sub(errors.count) as f64;
            ok / durations.count as f64 * 100.0
        } else {
            100.0
        };
        let hit_ratio = (cache.count > 0).then_some(cache.avg);

        let mut score: i32 = 100;
        let mut recommendations = Vec::new();

        if durations.avg > 60_000.0 {
            score -= 30;
            recommendations.push(
                "Average report generation exceeds 60s; lower dataset budgets or switch to a faster model".to_string(),
            );
        } else if durations.avg > 30_000.0 {
            score -= 15;
            recommendations
                .push("Average report generation exceeds 30s; consider tighter budgets".to_string());
        }

        if success_rate < 80.0 {
            score -= 30;
            recommendations.push(
                "Success rate below 80%; check completion backend availability and timeouts".to_string(),
            );
        } else if success_rate < 95.0 {
            score -= 15;
            recommendations.push("Success rate below 95%; review recent report errors".to_string());
        }

        if let Some(ratio) = hit_ratio {
            if ratio < 0.5 {
                score -= 20;
                recommendations.push(
                    "Cache hit ratio below 50%; raise dataset TTLs or the in-memory capacity".to_string(),
                );
            }
        }

        let score = score.clamp(0, 100) as u32;

        HealthReport {
            score,
            status: HealthStatus::from_score(score),
            total_requests: durations.count,
            avg_duration_ms: durations.avg.round(),
            p95_duration_ms: durations.p95.round(),
            error_count: errors.count,
            success_rate_percent: (success_rate * 100.0).round() / 100.0,
            avg_cache_hit_ratio: hit_ratio.map(|r| (r * 100.0).round() / 100.0),
            samples_held: self.sample_count(),
            recommendations,
        }
    }
}
