//! Application settings loaded from the environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

/// Default directive for the tracing `EnvFilter`.
pub const DEFAULT_LOG_FILTER: &str = "vidweave=info,sqlx=warn";

/// Runtime settings for the service.
///
/// Every field has a default so the service starts with no environment at
/// all; values are overridden via env vars (a `.env` file is honored by the
/// binary before this is read).
#[derive(Debug, Clone)]
pub struct Settings {
    /// SQLite database URL.
    pub database_url: String,
    /// Directory rendered artifacts are written to.
    pub output_dir: PathBuf,
    /// Scratch directory for downloaded media.
    pub temp_dir: PathBuf,
    /// Maximum size of a single remote media download, in bytes.
    pub download_max_bytes: u64,
    /// Timeout for a single remote media download.
    pub download_timeout: Duration,
    /// Timeout for webhook delivery.
    pub webhook_timeout: Duration,
    /// Path to the ffmpeg binary.
    pub ffmpeg_path: String,
    /// Path to the ffprobe binary.
    pub ffprobe_path: String,
    /// Default maximum retry attempts for a job.
    pub max_retries: u32,
    /// Days until a job record expires.
    pub job_ttl_days: i64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::config(format!("invalid value for {key}: {raw:?}"))),
        Err(_) => Ok(default),
    }
}

impl Settings {
    /// Load settings from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let temp_default = std::env::temp_dir().join("vidweave");
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:vidweave.db?mode=rwc".to_string()),
            output_dir: env_or("OUTPUT_DIR", PathBuf::from("./outputs"))?,
            temp_dir: env_or("TEMP_DIR", temp_default)?,
            download_max_bytes: env_or("DOWNLOAD_MAX_BYTES", 100 * 1024 * 1024)?,
            download_timeout: Duration::from_secs(env_or("DOWNLOAD_TIMEOUT_SECS", 120u64)?),
            webhook_timeout: Duration::from_secs(env_or("WEBHOOK_TIMEOUT_SECS", 30u64)?),
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            ffprobe_path: std::env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),
            max_retries: env_or("JOB_MAX_RETRIES", 3u32)?,
            job_ttl_days: env_or("JOB_TTL_DAYS", 7i64)?,
        })
    }

    /// Create the output and scratch directories if they do not exist.
    pub async fn ensure_directories(&self) -> Result<()> {
        crate::utils::fs::ensure_dir_all(&self.output_dir).await?;
        crate::utils::fs::ensure_dir_all(&self.temp_dir).await?;
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite:vidweave.db?mode=rwc".to_string(),
            output_dir: PathBuf::from("./outputs"),
            temp_dir: std::env::temp_dir().join("vidweave"),
            download_max_bytes: 100 * 1024 * 1024,
            download_timeout: Duration::from_secs(120),
            webhook_timeout: Duration::from_secs(30),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            max_retries: 3,
            job_ttl_days: 7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.ffmpeg_path, "ffmpeg");
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.job_ttl_days, 7);
        assert_eq!(settings.download_max_bytes, 100 * 1024 * 1024);
    }
}
