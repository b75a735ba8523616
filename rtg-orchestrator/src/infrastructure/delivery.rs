//! Delivery of scheduled report results

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::domain::{ReportType, Schedule};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Webhook delivery is enabled without a URL")]
    MissingUrl,

    #[error("Webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook returned status {0}")]
    Status(u16),

    #[error("Could not write report file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not encode delivery payload: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Body sent to every delivery channel
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryPayload {
    pub schedule_id: String,
    pub schedule_name: String,
    pub report_type: ReportType,
    pub generated_at: DateTime<Utc>,
    pub result: Value,
}

/// Channels that failed during one delivery round
#[derive(Debug, Default)]
pub struct DeliverySummary {
    pub delivered: Vec<&'static str>,
    pub failed: Vec<&'static str>,
}

pub struct ReportDelivery {
    client: reqwest::Client,
    default_directory: PathBuf,
}

impl ReportDelivery {
    pub fn new(default_directory: impl Into<PathBuf>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|e| {
                error!(error = %e, "Failed to build webhook client, using defaults");
                reqwest::Client::new()
            });
        Self {
            client,
            default_directory: default_directory.into(),
        }
    }

    /// Send `payload` to every enabled channel of `schedule`. Failures are
    /// logged and reported in the summary, never returned.
    pub async fn deliver(&self, schedule: &Schedule, payload: &DeliveryPayload) -> DeliverySummary {
        let mut summary = DeliverySummary::default();
        let delivery = &schedule.delivery;

        if delivery.email.enabled {
            info!(
                schedule_id = %schedule.id,
                recipients = ?delivery.email.recipients,
                "Email delivery requested; no mail transport is configured"
            );
            summary.delivered.push("email");
        }

        if delivery.webhook.enabled {
            match self
                .deliver_webhook(
                    delivery.webhook.url.as_deref(),
                    &delivery.webhook.headers,
                    payload,
                )
                .await
            {
                Ok(()) => summary.delivered.push("webhook"),
                Err(e) => {
                    warn!(schedule_id = %schedule.id, error = %e, "Webhook delivery failed");
                    summary.failed.push("webhook");
                }
            }
        }

        if delivery.filesystem.enabled {
            let directory = delivery
                .filesystem
                .directory
                .as_deref()
                .map(Path::new)
                .unwrap_or(self.default_directory.as_path());
            match self.deliver_filesystem(directory, payload).await {
                Ok(path) => {
                    info!(schedule_id = %schedule.id, path = %path.display(), "Report written");
                    summary.delivered.push("filesystem");
                }
                Err(e) => {
                    warn!(schedule_id = %schedule.id, error = %e, "Filesystem delivery failed");
                    summary.failed.push("filesystem");
                }
            }
        }

        summary
    }

    pub async fn deliver_webhook(
        &self,
        url: Option<&str>,
        headers: &[(String, String)],
        payload: &DeliveryPayload,
    ) -> Result<(), DeliveryError> {
        let url = url.filter(|u| !u.trim().is_empty()).ok_or(DeliveryError::MissingUrl)?;
        let mut request = self.client.post(url).json(payload);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(DeliveryError::Status(response.status().as_u16()));
        }
        Ok(())
    }

    pub async fn deliver_filesystem(
        &self,
        directory: &Path,
        payload: &DeliveryPayload,
    ) -> Result<PathBuf, DeliveryError> {
        tokio::fs::create_dir_all(directory).await?;
        let path = directory.join(report_file_name(&payload.schedule_id, payload.generated_at));
        let body = serde_json::to_vec_pretty(payload)?;
        tokio::fs::write(&path, body).await?;
        Ok(path)
    }
}

/// `<schedule>_<timestamp>.json`, with the timestamp made filename-safe
pub fn report_file_name(schedule_id: &str, at: DateTime<Utc>) -> String {
    let stamp = at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("{}_{}.json", schedule_id, stamp)
}
