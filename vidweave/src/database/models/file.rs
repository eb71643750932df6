//! Uploaded-file store model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A file previously uploaded to the blob store, addressable by opaque id.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StoredFileDbModel {
    pub id: String,
    pub api_key: String,
    pub filename: String,
    pub original_filename: String,
    /// Absolute local path the blob lives at.
    pub file_path: String,
    /// Media kind string ("image", "video", "image/video").
    pub media_kind: String,
    pub mime_type: String,
    pub file_size: i64,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration: Option<f64>,
    pub fps: Option<f64>,
    pub created_at: String,
    pub expires_at: Option<String>,
}

impl StoredFileDbModel {
    /// Check if the record is past its expiration timestamp.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .is_some_and(|expires| expires < now)
    }
}
