// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-attempt staging directories.
//!
//! Each download attempt gets its own timestamp-suffixed directory under the
//! staging root. Cleanup is best-effort: failures are logged and never
//! replace the outcome of the transfer itself.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;

use super::fs::Filesystem;
use crate::error::DownloadResult;

/// Prefix of every staging directory name.
pub const TEMP_DIR_PREFIX: &str = "modelfetch-download";

pub struct TempDirectoryManager {
    fs: Arc<dyn Filesystem>,
    root: PathBuf,
    seq: AtomicU64,
}

impl TempDirectoryManager {
    pub fn new(fs: Arc<dyn Filesystem>, root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            root: root.into(),
            seq: AtomicU64::new(0),
        }
    }

    /// A fresh, unused staging path. Nothing is created on disk.
    pub fn allocate(&self) -> PathBuf {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.root.join(format!(
            "{}-{}-{}",
            TEMP_DIR_PREFIX,
            Utc::now().timestamp_millis(),
            seq
        ))
    }

    /// Create `path` (recursively) unless it already exists.
    pub async fn ensure(&self, path: &Path) -> DownloadResult<()> {
        if self.fs.exists(path).await {
            return Ok(());
        }
        self.fs.create_dir_all(path).await?;
        tracing::debug!("Created directory {}", path.display());
        Ok(())
    }

    /// Remove `path` and everything below it. Never fails.
    pub async fn cleanup(&self, path: &Path) {
        if !self.fs.exists(path).await {
            return;
        }
        match self.fs.delete_recursive(path).await {
            Ok(()) => tracing::debug!("Temporary directory cleaned up: {}", path.display()),
            Err(e) => tracing::warn!("Failed to clean up temp directory: {}", e),
        }
    }
}
