// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Filesystem operations the download pipeline depends on.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{DownloadError, DownloadResult};

/// Primitive file operations used by staging, transfer and relocation.
#[async_trait]
pub trait Filesystem: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;

    async fn create_dir_all(&self, path: &Path) -> DownloadResult<()>;

    /// Rename `src` to `dst`. Must never fall back to copy-then-delete.
    async fn move_atomic(&self, src: &Path, dst: &Path) -> DownloadResult<()>;

    /// Remove a directory tree, or a single file.
    async fn delete_recursive(&self, path: &Path) -> DownloadResult<()>;

    /// Write the whole buffer in one call, replacing any existing file.
    async fn write_whole(&self, path: &Path, bytes: &[u8]) -> DownloadResult<()>;
}

/// [`Filesystem`] backed by `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

#[async_trait]
impl Filesystem for LocalFs {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn create_dir_all(&self, path: &Path) -> DownloadResult<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| DownloadError::filesystem("create directory", path, e))
    }

    async fn move_atomic(&self, src: &Path, dst: &Path) -> DownloadResult<()> {
        tokio::fs::rename(src, dst)
            .await
            .map_err(|e| DownloadError::filesystem("move", src, e))
    }

    async fn delete_recursive(&self, path: &Path) -> DownloadResult<()> {
        let result = if tokio::fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false) {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        };
        result.map_err(|e| DownloadError::filesystem("delete", path, e))
    }

    async fn write_whole(&self, path: &Path, bytes: &[u8]) -> DownloadResult<()> {
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| DownloadError::filesystem("write", path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_fs_roundtrip() {
        let dir = TempDir::new().expect("temp dir");
        let fs = LocalFs;

        let nested = dir.path().join("a").join("b");
        fs.create_dir_all(&nested).await.unwrap();
        assert!(fs.exists(&nested).await);

        let file = nested.join("weights.bin");
        fs.write_whole(&file, b"abc").await.unwrap();
        assert_eq!(std::fs::read(&file).unwrap(), b"abc");

        let moved = dir.path().join("weights.bin");
        fs.move_atomic(&file, &moved).await.unwrap();
        assert!(!fs.exists(&file).await);
        assert!(fs.exists(&moved).await);

        fs.delete_recursive(&dir.path().join("a")).await.unwrap();
        assert!(!fs.exists(&nested).await);

        fs.delete_recursive(&moved).await.unwrap();
        assert!(!fs.exists(&moved).await);
    }

    #[tokio::test]
    async fn test_move_missing_source_is_filesystem_error() {
        let dir = TempDir::new().expect("temp dir");
        let err = LocalFs
            .move_atomic(&dir.path().join("missing"), &dir.path().join("dst"))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Filesystem { op: "move", .. }));
    }
}
