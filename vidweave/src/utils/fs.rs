//! Filesystem helpers shared across modules.

use std::path::Path;

use crate::{Error, Result};

fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::Other(format!("{op} {}: {source}", path.display()))
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error("creating directory", path, e))
}

/// Remove leftover `download_*` scratch files from a previous run.
///
/// Missing directories and individual removal failures are not errors.
pub async fn cleanup_scratch(dir: &Path) -> u64 {
    let mut removed = 0u64;
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return removed;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let is_scratch = name.to_string_lossy().starts_with("download_");
        if is_scratch && tokio::fs::remove_file(entry.path()).await.is_ok() {
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_dir_all_creates_nested() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a/b/c");
        ensure_dir_all(&nested).await.unwrap();
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn test_cleanup_scratch_removes_only_downloads() {
        let root = tempfile::tempdir().unwrap();
        tokio::fs::write(root.path().join("download_ab.tmp"), b"x")
            .await
            .unwrap();
        tokio::fs::write(root.path().join("keep.mp4"), b"x")
            .await
            .unwrap();
        let removed = cleanup_scratch(root.path()).await;
        assert_eq!(removed, 1);
        assert!(root.path().join("keep.mp4").exists());
    }
}
