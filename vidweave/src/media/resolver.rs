//! Media resolver: turns a scene `source` into a local, seekable file.
//!
//! Absolute http(s) URLs are downloaded into the scratch directory with a
//! bounded-size, bounded-time transfer; anything else is treated as an
//! opaque handle into the uploaded-file store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tempfile::TempPath;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::database::repositories::FileRepository;
use crate::utils::url::is_absolute_url;

/// Resolver failure modes.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("unreachable source {uri}: {cause}")]
    Unreachable { uri: String, cause: String },

    #[error("unsupported source {0}: not a URL or known file handle")]
    UnsupportedSource(String),

    #[error("file store error: {0}")]
    Store(String),
}

impl ResolveError {
    fn unreachable(source: &str, cause: impl Into<String>) -> Self {
        Self::Unreachable {
            uri: source.to_string(),
            cause: cause.into(),
        }
    }
}

/// A local handle to the bytes backing a scene.
///
/// Owned exclusively by the render invocation that created it. When a
/// scratch download backs the value, the guard deletes the file on drop, so
/// release happens on every exit path.
#[derive(Debug)]
pub struct ResolvedMedia {
    path: PathBuf,
    _scratch: Option<TempPath>,
}

impl ResolvedMedia {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn stored(path: PathBuf) -> Self {
        Self {
            path,
            _scratch: None,
        }
    }

    pub(crate) fn scratch(temp: TempPath) -> Self {
        Self {
            path: temp.to_path_buf(),
            _scratch: Some(temp),
        }
    }
}

/// Map a response content type to a scratch-file extension.
fn extension_for_content_type(content_type: &str) -> &'static str {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/bmp" => ".bmp",
        "video/mp4" => ".mp4",
        "video/webm" => ".webm",
        "video/quicktime" => ".mov",
        "video/x-msvideo" => ".avi",
        "video/x-matroska" => ".mkv",
        _ => ".tmp",
    }
}

/// Resolves scene sources to local files.
pub struct MediaResolver {
    client: reqwest::Client,
    files: Arc<dyn FileRepository>,
    scratch_dir: PathBuf,
    max_bytes: u64,
}

impl MediaResolver {
    pub fn new(
        files: Arc<dyn FileRepository>,
        scratch_dir: PathBuf,
        max_bytes: u64,
        timeout: Duration,
    ) -> Self {
        Self {
            client: crate::utils::http::build_client(timeout),
            files,
            scratch_dir,
            max_bytes,
        }
    }

    /// Resolve a scene source for the given owner.
    pub async fn resolve(
        &self,
        source: &str,
        api_key: &str,
    ) -> Result<ResolvedMedia, ResolveError> {
        if is_absolute_url(source) {
            self.download(source).await
        } else {
            self.lookup_handle(source, api_key).await
        }
    }

    async fn download(&self, url: &str) -> Result<ResolvedMedia, ResolveError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ResolveError::unreachable(url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::unreachable(url, format!("HTTP {status}")));
        }

        let extension = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(extension_for_content_type)
            .unwrap_or(".tmp");

        let scratch = tempfile::Builder::new()
            .prefix("download_")
            .suffix(extension)
            .tempfile_in(&self.scratch_dir)
            .map_err(|e| ResolveError::unreachable(url, format!("scratch file: {e}")))?
            .into_temp_path();

        let mut file = tokio::fs::File::create(&scratch)
            .await
            .map_err(|e| ResolveError::unreachable(url, format!("scratch file: {e}")))?;

        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ResolveError::unreachable(url, e.to_string()))?;
            written += chunk.len() as u64;
            if written > self.max_bytes {
                return Err(ResolveError::unreachable(
                    url,
                    format!("download exceeds {} bytes", self.max_bytes),
                ));
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| ResolveError::unreachable(url, format!("scratch write: {e}")))?;
        }
        file.flush()
            .await
            .map_err(|e| ResolveError::unreachable(url, format!("scratch write: {e}")))?;

        debug!(url, bytes = written, "downloaded remote media");
        Ok(ResolvedMedia::scratch(scratch))
    }

    async fn lookup_handle(
        &self,
        handle: &str,
        api_key: &str,
    ) -> Result<ResolvedMedia, ResolveError> {
        let record = self
            .files
            .get(handle, api_key)
            .await
            .map_err(|e| ResolveError::Store(e.to_string()))?
            .ok_or_else(|| ResolveError::UnsupportedSource(handle.to_string()))?;

        if record.is_expired(Utc::now()) {
            warn!(handle, "file handle refers to an expired upload");
            return Err(ResolveError::UnsupportedSource(handle.to_string()));
        }

        let path = PathBuf::from(&record.file_path);
        if !path.exists() {
            warn!(handle, path = %path.display(), "stored file missing on disk");
            return Err(ResolveError::UnsupportedSource(handle.to_string()));
        }

        Ok(ResolvedMedia::stored(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::StoredFileDbModel;
    use crate::database::repositories::SqlxFileRepository;
    use crate::database::test_pool;

    async fn resolver_with_store() -> (MediaResolver, Arc<SqlxFileRepository>, tempfile::TempDir) {
        let pool = test_pool().await;
        let files = Arc::new(SqlxFileRepository::new(pool));
        let dir = tempfile::tempdir().unwrap();
        let resolver = MediaResolver::new(
            files.clone(),
            dir.path().to_path_buf(),
            1024 * 1024,
            Duration::from_secs(2),
        );
        (resolver, files, dir)
    }

    fn stored_file(id: &str, path: &Path, expires_at: Option<String>) -> StoredFileDbModel {
        StoredFileDbModel {
            id: id.to_string(),
            api_key: "k".to_string(),
            filename: "a.mp4".to_string(),
            original_filename: "a.mp4".to_string(),
            file_path: path.to_string_lossy().to_string(),
            media_kind: "video".to_string(),
            mime_type: "video/mp4".to_string(),
            file_size: 4,
            width: None,
            height: None,
            duration: None,
            fps: None,
            created_at: Utc::now().to_rfc3339(),
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_resolves_known_file_handle() {
        let (resolver, files, dir) = resolver_with_store().await;
        let media_path = dir.path().join("a.mp4");
        tokio::fs::write(&media_path, b"data").await.unwrap();
        files
            .create(&stored_file("f1", &media_path, None))
            .await
            .unwrap();

        let resolved = resolver.resolve("f1", "k").await.unwrap();
        assert_eq!(resolved.path(), media_path.as_path());
    }

    #[tokio::test]
    async fn test_unknown_handle_is_unsupported() {
        let (resolver, _files, _dir) = resolver_with_store().await;
        let err = resolver.resolve("missing", "k").await.unwrap_err();
        assert!(matches!(err, ResolveError::UnsupportedSource(_)));
    }

    #[tokio::test]
    async fn test_expired_handle_is_unsupported() {
        let (resolver, files, dir) = resolver_with_store().await;
        let media_path = dir.path().join("a.mp4");
        tokio::fs::write(&media_path, b"data").await.unwrap();
        let past = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
        files
            .create(&stored_file("f1", &media_path, Some(past)))
            .await
            .unwrap();

        let err = resolver.resolve("f1", "k").await.unwrap_err();
        assert!(matches!(err, ResolveError::UnsupportedSource(_)));
    }

    #[tokio::test]
    async fn test_unreachable_url() {
        let (resolver, _files, _dir) = resolver_with_store().await;
        let err = resolver
            .resolve("http://127.0.0.1:9/nope.mp4", "k")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_scratch_file_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let temp = tempfile::Builder::new()
            .prefix("download_")
            .tempfile_in(dir.path())
            .unwrap()
            .into_temp_path();
        let path = temp.to_path_buf();
        let resolved = ResolvedMedia::scratch(temp);
        assert!(path.exists());
        drop(resolved);
        assert!(!path.exists());
    }

    #[test]
    fn test_extension_for_content_type() {
        assert_eq!(extension_for_content_type("image/jpeg"), ".jpg");
        assert_eq!(
            extension_for_content_type("video/mp4; charset=binary"),
            ".mp4"
        );
        assert_eq!(extension_for_content_type("application/pdf"), ".tmp");
    }
}
