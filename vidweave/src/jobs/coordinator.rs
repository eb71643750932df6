//! Job lifecycle coordinator.
//!
//! Owns the job state machine: submission → execution → terminal state.
//! Drives the render pipeline, drains its progress channel into the job
//! record, and triggers webhook delivery on terminal transitions. A failed
//! render is always translated into the `failed` transition; a job is
//! never left stuck in `processing`.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::compose::{ComposeError, ProgressSender, RenderPipeline};
use crate::database::models::{JobDbModel, JobFilter, JobStatus, Pagination, SortBy, SortOrder};
use crate::database::repositories::JobRepository;
use crate::domain::{CompositionRequest, SceneList};
use crate::notification::WebhookNotifier;
use crate::{Error, Result};

/// Progress channel capacity per driven job.
const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Coordinates job submission, execution, cancellation, and retries.
pub struct JobCoordinator {
    jobs: Arc<dyn JobRepository>,
    pipeline: Arc<RenderPipeline>,
    webhook: Arc<WebhookNotifier>,
    /// Cancellation tokens for renders currently in flight.
    active: DashMap<String, CancellationToken>,
    max_retries: u32,
    job_ttl_days: i64,
}

impl JobCoordinator {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        pipeline: Arc<RenderPipeline>,
        webhook: Arc<WebhookNotifier>,
        max_retries: u32,
        job_ttl_days: i64,
    ) -> Self {
        Self {
            jobs,
            pipeline,
            webhook,
            active: DashMap::new(),
            max_retries,
            job_ttl_days,
        }
    }

    /// Validate and persist a new job in `pending`.
    ///
    /// Never starts execution; a scheduler calls `begin`/`drive` later.
    pub async fn submit(&self, request: CompositionRequest, api_key: &str) -> Result<JobDbModel> {
        request.validate()?;

        let title = compose_title(&request.scenes);
        let description = format!(
            "Video composition with {} scenes, total duration: {:.1}s",
            request.scenes.len(),
            request.total_duration()
        );
        let config = serde_json::to_string(&request)?;

        let job = JobDbModel::new(
            api_key,
            title,
            description,
            config,
            request.priority,
            request.webhook_url.clone(),
            self.max_retries,
            self.job_ttl_days,
        );
        self.jobs.create(&job).await?;
        info!(job_id = %job.id, scenes = request.scenes.len(), "composition job submitted");
        Ok(job)
    }

    /// Transition a pending job into `processing`, recording its start.
    pub async fn begin(&self, job_id: &str, api_key: &str) -> Result<()> {
        let job = self.require(job_id, api_key).await?;
        if !self.jobs.mark_processing(job_id).await? {
            return Err(Error::invalid_transition(
                job.status,
                JobStatus::Processing.as_str(),
            ));
        }
        debug!(job_id, "job processing started");
        Ok(())
    }

    /// Run the render for a `processing` job and finalize it.
    ///
    /// Idempotent no-op when the job is missing or not processing.
    pub async fn drive(&self, job_id: &str) -> Result<()> {
        let Some(job) = self.jobs.get_by_id(job_id).await? else {
            warn!(job_id, "drive requested for unknown job");
            return Ok(());
        };
        if job.status() != Some(JobStatus::Processing) {
            debug!(job_id, status = %job.status, "drive skipped; job not processing");
            return Ok(());
        }

        let request = match job.composition_request() {
            Ok(request) => request,
            Err(e) => {
                let message = format!("Video composition failed: invalid stored request: {e}");
                return self.finalize_failure(job_id, &message).await;
            }
        };

        let token = CancellationToken::new();
        self.active.insert(job_id.to_string(), token.clone());

        let (sender, mut progress_rx) = ProgressSender::channel(PROGRESS_CHANNEL_CAPACITY);
        let drain_jobs = self.jobs.clone();
        let drain_id = job_id.to_string();
        let mut last_persisted = job.progress;
        let drain = tokio::spawn(async move {
            while let Some(update) = progress_rx.recv().await {
                // Progress is monotonically non-decreasing while processing.
                if update.percent < last_persisted {
                    continue;
                }
                last_persisted = update.percent;
                if let Err(e) = drain_jobs
                    .update_progress(&drain_id, update.percent, &update.step)
                    .await
                {
                    warn!(job_id = %drain_id, error = %e, "failed to persist progress");
                }
            }
        });

        let result = self
            .pipeline
            .render(&job.api_key, &request, &sender, &token)
            .await;

        drop(sender);
        let _ = drain.await;
        self.active.remove(job_id);

        match result {
            Ok(artifact) => {
                let finalized = self
                    .jobs
                    .mark_completed(
                        job_id,
                        &artifact.path.to_string_lossy(),
                        artifact.format.extension(),
                        artifact.size_bytes as i64,
                        artifact.duration,
                    )
                    .await?;
                if finalized {
                    info!(job_id, path = %artifact.path.display(), "job completed");
                    self.deliver_webhook(job_id).await;
                } else {
                    // Cancelled while encoding; the artifact is orphaned.
                    warn!(job_id, "render finished but job left processing; discarding artifact");
                    let _ = tokio::fs::remove_file(&artifact.path).await;
                }
                Ok(())
            }
            Err(ComposeError::Cancelled) => {
                debug!(job_id, "render interrupted by cancellation");
                Ok(())
            }
            Err(e) => {
                let message = Error::Composition(e).to_string();
                self.finalize_failure(job_id, &message).await
            }
        }
    }

    async fn finalize_failure(&self, job_id: &str, message: &str) -> Result<()> {
        if self.jobs.mark_failed(job_id, message).await? {
            warn!(job_id, error = message, "job failed");
            self.deliver_webhook(job_id).await;
        } else {
            debug!(job_id, "failure not recorded; job already left processing");
        }
        Ok(())
    }

    /// Cancel a pending or processing job. Returns false for unknown jobs;
    /// cancelling a terminal job is an invalid transition.
    pub async fn cancel(&self, job_id: &str, api_key: &str) -> Result<bool> {
        let Some(job) = self.jobs.get(job_id, api_key).await? else {
            return Ok(false);
        };

        if !self.jobs.mark_cancelled(job_id).await? {
            return Err(Error::invalid_transition(
                job.status,
                JobStatus::Cancelled.as_str(),
            ));
        }

        // Cooperative: the pipeline observes the flag at scene boundaries
        // and before the encode step.
        if let Some(token) = self.active.get(job_id) {
            token.cancel();
        }
        info!(job_id, "job cancelled");
        self.deliver_webhook(job_id).await;
        Ok(true)
    }

    /// Re-enter a failed job into `pending` for a fresh attempt.
    pub async fn retry(&self, job_id: &str, api_key: &str) -> Result<JobDbModel> {
        let job = self.require(job_id, api_key).await?;
        if !job.can_retry() || !self.jobs.mark_retry_pending(job_id).await? {
            return Err(Error::invalid_transition(
                job.status,
                JobStatus::Pending.as_str(),
            ));
        }
        info!(job_id, attempt = job.retry_count + 1, "job re-queued for retry");
        self.require(job_id, api_key).await
    }

    pub async fn get(&self, job_id: &str, api_key: &str) -> Result<Option<JobDbModel>> {
        self.jobs.get(job_id, api_key).await
    }

    pub async fn list(
        &self,
        api_key: &str,
        filter: &JobFilter,
        page: &Pagination,
        sort_by: SortBy,
        sort_order: SortOrder,
    ) -> Result<Vec<JobDbModel>> {
        self.jobs.list(api_key, filter, page, sort_by, sort_order).await
    }

    pub async fn delete(&self, job_id: &str, api_key: &str) -> Result<bool> {
        self.jobs.delete(job_id, api_key).await
    }

    async fn require(&self, job_id: &str, api_key: &str) -> Result<JobDbModel> {
        self.jobs
            .get(job_id, api_key)
            .await?
            .ok_or_else(|| Error::not_found("Job", job_id))
    }

    /// One webhook delivery attempt; outcome recorded, never propagated.
    async fn deliver_webhook(&self, job_id: &str) {
        let job = match self.jobs.get_by_id(job_id).await {
            Ok(Some(job)) => job,
            _ => return,
        };
        let Some(url) = job.webhook_url.clone() else {
            return;
        };

        let sent = match self.webhook.notify(&url, &job).await {
            Ok(()) => true,
            Err(e) => {
                warn!(job_id, error = %e, "webhook delivery failed");
                false
            }
        };
        if let Err(e) = self.jobs.record_webhook_attempt(job_id, sent).await {
            warn!(job_id, error = %e, "failed to record webhook attempt");
        }
    }
}

/// Human-readable job title from the scene names.
fn compose_title(scenes: &SceneList) -> String {
    let names: Vec<&str> = scenes.names().collect();
    let mut title = format!(
        "Composition: {}",
        names.iter().take(3).copied().collect::<Vec<_>>().join(", ")
    );
    if names.len() > 3 {
        title.push_str(&format!(" and {} more scenes", names.len() - 3));
    }
    title
}
