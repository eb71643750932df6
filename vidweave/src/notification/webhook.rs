//! Webhook delivery for job completion events.
//!
//! One delivery attempt per terminal transition; failures are logged and
//! recorded on the job, never retried here and never propagated.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use crate::database::models::{JobDbModel, JobStatus};
use crate::{Error, Result};

/// Delivers job webhooks over HTTP.
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: crate::utils::http::build_client(timeout),
        }
    }

    /// Event name for a job's current status.
    fn event_for(status: Option<JobStatus>) -> &'static str {
        match status {
            Some(JobStatus::Completed) => "job.completed",
            Some(JobStatus::Failed) => "job.failed",
            Some(JobStatus::Cancelled) => "job.cancelled",
            _ => "job.updated",
        }
    }

    /// Build the JSON payload for a job event.
    pub fn build_payload(job: &JobDbModel) -> serde_json::Value {
        json!({
            "event": Self::event_for(job.status()),
            "job_id": job.id,
            "status": job.status,
            "timestamp": Utc::now().to_rfc3339(),
            "data": job,
        })
    }

    /// Attempt a single delivery to `url`.
    pub async fn notify(&self, url: &str, job: &JobDbModel) -> Result<()> {
        let payload = Self::build_payload(job);
        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Other(format!("Webhook request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(job_id = %job.id, %status, "webhook delivery rejected");
            return Err(Error::Other(format!("Webhook failed: {status}")));
        }

        debug!(job_id = %job.id, url, "webhook delivered");
        Ok(())
    }
}
