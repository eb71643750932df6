//! Job repository.
//!
//! Status changes go through compare-and-set updates so a transition is
//! legal exactly once per source state, even with concurrent callers.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::{JobDbModel, JobFilter, Pagination, SortBy, SortOrder};

/// Job repository trait.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create(&self, job: &JobDbModel) -> Result<()>;
    async fn get(&self, id: &str, api_key: &str) -> Result<Option<JobDbModel>>;
    async fn get_by_id(&self, id: &str) -> Result<Option<JobDbModel>>;
    async fn list(
        &self,
        api_key: &str,
        filter: &JobFilter,
        page: &Pagination,
        sort_by: SortBy,
        sort_order: SortOrder,
    ) -> Result<Vec<JobDbModel>>;
    async fn delete(&self, id: &str, api_key: &str) -> Result<bool>;
    async fn delete_expired(&self) -> Result<u64>;

    /// pending|queued → processing, recording `started_at`.
    async fn mark_processing(&self, id: &str) -> Result<bool>;
    /// processing → completed with the render result.
    async fn mark_completed(
        &self,
        id: &str,
        output_file: &str,
        output_format: &str,
        output_size: i64,
        duration: f64,
    ) -> Result<bool>;
    /// processing → failed with the error message recorded verbatim.
    async fn mark_failed(&self, id: &str, error_message: &str) -> Result<bool>;
    /// pending|queued|processing → cancelled.
    async fn mark_cancelled(&self, id: &str) -> Result<bool>;
    /// failed → pending with retry_count+1; refused once retries are spent.
    async fn mark_retry_pending(&self, id: &str) -> Result<bool>;

    /// Persist a progress update; only applies while processing.
    async fn update_progress(&self, id: &str, progress: f64, current_step: &str) -> Result<()>;
    /// Record the outcome of a webhook delivery attempt.
    async fn record_webhook_attempt(&self, id: &str, sent: bool) -> Result<()>;
}

/// SQLx implementation of JobRepository.
pub struct SqlxJobRepository {
    pool: SqlitePool,
}

impl SqlxJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn create(&self, job: &JobDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, api_key, status, priority, title, description,
                composition_config, progress, current_step,
                output_file, output_format, output_size, duration,
                error_message, retry_count, max_retries,
                webhook_url, webhook_sent, webhook_attempts,
                created_at, updated_at, started_at, completed_at, expires_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.api_key)
        .bind(&job.status)
        .bind(&job.priority)
        .bind(&job.title)
        .bind(&job.description)
        .bind(&job.composition_config)
        .bind(job.progress)
        .bind(&job.current_step)
        .bind(&job.output_file)
        .bind(&job.output_format)
        .bind(job.output_size)
        .bind(job.duration)
        .bind(&job.error_message)
        .bind(job.retry_count)
        .bind(job.max_retries)
        .bind(&job.webhook_url)
        .bind(job.webhook_sent)
        .bind(job.webhook_attempts)
        .bind(&job.created_at)
        .bind(&job.updated_at)
        .bind(&job.started_at)
        .bind(&job.completed_at)
        .bind(&job.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str, api_key: &str) -> Result<Option<JobDbModel>> {
        let job =
            sqlx::query_as::<_, JobDbModel>("SELECT * FROM jobs WHERE id = ? AND api_key = ?")
                .bind(id)
                .bind(api_key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(job)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<JobDbModel>> {
        let job = sqlx::query_as::<_, JobDbModel>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn list(
        &self,
        api_key: &str,
        filter: &JobFilter,
        page: &Pagination,
        sort_by: SortBy,
        sort_order: SortOrder,
    ) -> Result<Vec<JobDbModel>> {
        // Column and direction come from closed enums, never caller input.
        let mut sql = String::from("SELECT * FROM jobs WHERE api_key = ?");
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.priority.is_some() {
            sql.push_str(" AND priority = ?");
        }
        sql.push_str(&format!(
            " ORDER BY {} {} LIMIT ? OFFSET ?",
            sort_by.column(),
            sort_order.keyword()
        ));

        let mut query = sqlx::query_as::<_, JobDbModel>(&sql).bind(api_key);
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(priority) = filter.priority {
            query = query.bind(priority.as_str());
        }
        let jobs = query
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;
        Ok(jobs)
    }

    async fn delete(&self, id: &str, api_key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ? AND api_key = ?")
            .bind(id)
            .bind(api_key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired(&self) -> Result<u64> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query("DELETE FROM jobs WHERE expires_at IS NOT NULL AND expires_at < ?")
            .bind(&now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn mark_processing(&self, id: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = 'processing', started_at = ?, updated_at = ?
            WHERE id = ? AND status IN ('pending', 'queued')
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_completed(
        &self,
        id: &str,
        output_file: &str,
        output_format: &str,
        output_size: i64,
        duration: f64,
    ) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'completed',
                progress = 100.0,
                current_step = 'Video composition complete',
                output_file = ?,
                output_format = ?,
                output_size = ?,
                duration = ?,
                error_message = NULL,
                completed_at = ?,
                updated_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(output_file)
        .bind(output_format)
        .bind(output_size)
        .bind(duration)
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: &str, error_message: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = 'failed', error_message = ?, completed_at = ?, updated_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(error_message)
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_cancelled(&self, id: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = 'cancelled', completed_at = ?, updated_at = ?
            WHERE id = ? AND status IN ('pending', 'queued', 'processing')
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_retry_pending(&self, id: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'pending',
                retry_count = retry_count + 1,
                progress = 0.0,
                current_step = NULL,
                error_message = NULL,
                started_at = NULL,
                completed_at = NULL,
                updated_at = ?
            WHERE id = ? AND status = 'failed' AND retry_count < max_retries
            "#,
        )
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_progress(&self, id: &str, progress: f64, current_step: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE jobs SET progress = ?, current_step = ?, updated_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(progress.clamp(0.0, 100.0))
        .bind(current_step)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_webhook_attempt(&self, id: &str, sent: bool) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE jobs SET webhook_sent = ?, webhook_attempts = webhook_attempts + 1, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(sent)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
