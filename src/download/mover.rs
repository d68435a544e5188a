// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Relocation of finished staging files into the models directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::fs::Filesystem;
use crate::error::{DownloadError, DownloadResult};

pub struct FileMover {
    fs: Arc<dyn Filesystem>,
}

impl FileMover {
    pub fn new(fs: Arc<dyn Filesystem>) -> Self {
        Self { fs }
    }

    /// Rename `temp_path` into `final_dir`, keeping its file name.
    ///
    /// Only an atomic rename is attempted, so the models directory never
    /// shows a half-written file. Staging and models directories must be on
    /// the same filesystem.
    pub async fn move_into(&self, temp_path: &Path, final_dir: &Path) -> DownloadResult<PathBuf> {
        let file_name = temp_path.file_name().ok_or_else(|| {
            DownloadError::filesystem("move", temp_path, "path has no file name")
        })?;
        let final_path = final_dir.join(file_name);

        self.fs.move_atomic(temp_path, &final_path).await?;
        tracing::info!("File {} moved to final location", final_path.display());
        Ok(final_path)
    }
}
