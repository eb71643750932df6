//! Stored-file repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::StoredFileDbModel;

/// File-store repository trait.
#[async_trait]
pub trait FileRepository: Send + Sync {
    async fn create(&self, file: &StoredFileDbModel) -> Result<()>;
    async fn get(&self, id: &str, api_key: &str) -> Result<Option<StoredFileDbModel>>;
    async fn delete(&self, id: &str, api_key: &str) -> Result<bool>;
    async fn delete_expired(&self) -> Result<u64>;
}

/// SQLx implementation of FileRepository.
pub struct SqlxFileRepository {
    pool: SqlitePool,
}

impl SqlxFileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FileRepository for SqlxFileRepository {
    async fn create(&self, file: &StoredFileDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stored_files (
                id, api_key, filename, original_filename, file_path,
                media_kind, mime_type, file_size, width, height, duration, fps,
                created_at, expires_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file.id)
        .bind(&file.api_key)
        .bind(&file.filename)
        .bind(&file.original_filename)
        .bind(&file.file_path)
        .bind(&file.media_kind)
        .bind(&file.mime_type)
        .bind(file.file_size)
        .bind(file.width)
        .bind(file.height)
        .bind(file.duration)
        .bind(file.fps)
        .bind(&file.created_at)
        .bind(&file.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str, api_key: &str) -> Result<Option<StoredFileDbModel>> {
        let file = sqlx::query_as::<_, StoredFileDbModel>(
            "SELECT * FROM stored_files WHERE id = ? AND api_key = ?",
        )
        .bind(id)
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(file)
    }

    async fn delete(&self, id: &str, api_key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM stored_files WHERE id = ? AND api_key = ?")
            .bind(id)
            .bind(api_key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired(&self) -> Result<u64> {
        let now = Utc::now().to_rfc3339();
        let result =
            sqlx::query("DELETE FROM stored_files WHERE expires_at IS NOT NULL AND expires_at < ?")
                .bind(&now)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
