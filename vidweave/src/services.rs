//! Service container for dependency injection.
//!
//! Wires repositories, the resolver, the codec capability, the render
//! pipeline, and the job coordinator over one database pool.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::info;

use crate::Result;
use crate::codec::FfmpegCodec;
use crate::compose::RenderPipeline;
use crate::config::Settings;
use crate::context::AppContext;
use crate::database::repositories::{
    FileRepository, JobRepository, SqlxFileRepository, SqlxJobRepository,
};
use crate::jobs::JobCoordinator;
use crate::media::MediaResolver;
use crate::notification::WebhookNotifier;

/// Service container holding all application services.
pub struct ServiceContainer {
    /// Database connection pool.
    pub pool: SqlitePool,
    /// Process-wide context.
    pub context: AppContext,
    /// Job repository.
    pub jobs: Arc<dyn JobRepository>,
    /// Uploaded-file repository.
    pub files: Arc<dyn FileRepository>,
    /// Job lifecycle coordinator.
    pub coordinator: Arc<JobCoordinator>,
}

impl ServiceContainer {
    /// Create a new service container with the given pool and settings.
    pub async fn new(pool: SqlitePool, settings: &Settings) -> Result<Self> {
        info!("Initializing service container");
        settings.ensure_directories().await?;

        let jobs: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(pool.clone()));
        let files: Arc<dyn FileRepository> = Arc::new(SqlxFileRepository::new(pool.clone()));

        let resolver = Arc::new(MediaResolver::new(
            files.clone(),
            settings.temp_dir.clone(),
            settings.download_max_bytes,
            settings.download_timeout,
        ));
        let codec = Arc::new(FfmpegCodec::from_settings(settings));
        let pipeline = Arc::new(RenderPipeline::new(
            resolver,
            codec,
            settings.output_dir.clone(),
        ));
        let webhook = Arc::new(WebhookNotifier::new(settings.webhook_timeout));

        let coordinator = Arc::new(JobCoordinator::new(
            jobs.clone(),
            pipeline,
            webhook,
            settings.max_retries,
            settings.job_ttl_days,
        ));

        Ok(Self {
            pool,
            context: AppContext::new(),
            jobs,
            files,
            coordinator,
        })
    }

    /// Delete expired job and file records; the storage half of the
    /// external expiration sweep.
    pub async fn sweep_expired(&self) -> Result<(u64, u64)> {
        let jobs_removed = self.jobs.delete_expired().await?;
        let files_removed = self.files.delete_expired().await?;
        if jobs_removed > 0 || files_removed > 0 {
            info!(jobs_removed, files_removed, "expired records removed");
        }
        Ok((jobs_removed, files_removed))
    }
}
