//! Job database model and status machinery.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::{CompositionRequest, Priority};

/// Job status values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job is persisted and waiting for a scheduler to begin it.
    Pending,
    /// Accepted for compatibility; treated like pending. The coordinator
    /// never sets this itself.
    Queued,
    /// Job is currently rendering.
    Processing,
    /// Render finished successfully.
    Completed,
    /// Render failed; may be retried while attempts remain.
    Failed,
    /// Job was cancelled by its owner.
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Legality of a single state transition.
    ///
    /// pending → processing; processing → completed|failed;
    /// pending|processing → cancelled; failed → pending (explicit retry).
    /// Terminal states otherwise never transition again.
    pub fn can_transition(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Pending | Queued, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Pending | Queued, Cancelled)
                | (Processing, Cancelled)
                | (Failed, Pending)
        )
    }
}

/// Job database model: the persistent unit of work.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JobDbModel {
    pub id: String,
    /// Owner credential the job is scoped to.
    pub api_key: String,
    pub status: String,
    pub priority: String,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Serialized `CompositionRequest` JSON.
    pub composition_config: String,
    /// Render progress in percent, 0..=100.
    pub progress: f64,
    pub current_step: Option<String>,
    pub output_file: Option<String>,
    pub output_format: Option<String>,
    pub output_size: Option<i64>,
    /// Duration of the rendered video in seconds.
    pub duration: Option<f64>,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub max_retries: i64,
    pub webhook_url: Option<String>,
    pub webhook_sent: bool,
    pub webhook_attempts: i64,
    /// RFC 3339 timestamps.
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub expires_at: Option<String>,
}

impl JobDbModel {
    pub fn new(
        api_key: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        composition_config: impl Into<String>,
        priority: Priority,
        webhook_url: Option<String>,
        max_retries: u32,
        ttl_days: i64,
    ) -> Self {
        let now = Utc::now();
        let expires = now + Duration::days(ttl_days);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            api_key: api_key.into(),
            status: JobStatus::Pending.as_str().to_string(),
            priority: priority.as_str().to_string(),
            title: Some(title.into()),
            description: Some(description.into()),
            composition_config: composition_config.into(),
            progress: 0.0,
            current_step: None,
            output_file: None,
            output_format: None,
            output_size: None,
            duration: None,
            error_message: None,
            retry_count: 0,
            max_retries: max_retries as i64,
            webhook_url,
            webhook_sent: false,
            webhook_attempts: 0,
            created_at: now.to_rfc3339(),
            updated_at: now.to_rfc3339(),
            started_at: None,
            completed_at: None,
            expires_at: Some(expires.to_rfc3339()),
        }
    }

    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::parse(&self.status)
    }

    pub fn priority(&self) -> Option<Priority> {
        Priority::parse(&self.priority)
    }

    /// Deserialize the embedded composition request.
    pub fn composition_request(&self) -> Result<CompositionRequest, serde_json::Error> {
        serde_json::from_str(&self.composition_config)
    }

    /// Check if the job reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.status().is_some_and(|s| s.is_terminal())
    }

    /// Retry eligibility: failed with attempts remaining.
    pub fn can_retry(&self) -> bool {
        self.status() == Some(JobStatus::Failed) && self.retry_count < self.max_retries
    }

    /// Check if the record is past its expiration timestamp.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .is_some_and(|expires| expires < now)
    }
}

/// Filters for job listing.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub priority: Option<Priority>,
}

/// Pagination parameters for job listing.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Pagination {
    pub const MAX_PER_PAGE: u32 = 100;

    pub fn offset(&self) -> i64 {
        (self.page.max(1) as i64 - 1) * self.limit()
    }

    pub fn limit(&self) -> i64 {
        self.per_page.clamp(1, Self::MAX_PER_PAGE) as i64
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 50,
        }
    }
}

/// Sortable job columns. Closed set keeps column names out of caller input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    CreatedAt,
    UpdatedAt,
    Priority,
    Status,
}

impl SortBy {
    pub fn column(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::Priority => "priority",
            Self::Status => "status",
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}
