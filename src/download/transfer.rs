// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! One streamed, cancellable GET into a staging directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use super::fs::Filesystem;
use super::transport::HttpTransport;
use crate::catalog::file_name_from_url;
use crate::credentials::CredentialStore;
use crate::error::{DownloadError, DownloadResult};

/// Upper bound on the buffer reserved up front from `Content-Length`.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

pub struct FileTransfer {
    transport: Arc<dyn HttpTransport>,
    fs: Arc<dyn Filesystem>,
    credentials: Arc<dyn CredentialStore>,
    token_key: String,
}

impl FileTransfer {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        fs: Arc<dyn Filesystem>,
        credentials: Arc<dyn CredentialStore>,
        token_key: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            fs,
            credentials,
            token_key: token_key.into(),
        }
    }

    /// Download `url` into `dest_dir` and return the written file's path.
    ///
    /// The file is named after the URL's last path segment. `on_progress`
    /// receives a 0-100 percentage after each chunk, and only when the
    /// response carried a `Content-Length`. The body is accumulated in memory
    /// and written with a single call once the stream ends.
    ///
    /// Cancellation is observed between chunks and also interrupts a
    /// pending request or chunk read. It fails with
    /// [`DownloadError::Cancelled`] and nothing is written in that case.
    pub async fn fetch<F>(
        &self,
        url: &str,
        dest_dir: &Path,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> DownloadResult<PathBuf>
    where
        F: FnMut(u8) + Send,
    {
        let file_name = file_name_from_url(url);
        let temp_path = dest_dir.join(&file_name);

        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let token = self.credentials.token(&self.token_key);
        if token.is_none() {
            tracing::debug!("No bearer token configured, requesting {} anonymously", file_name);
        }

        tracing::info!("Downloading {} from {}", file_name, url);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            response = self.transport.get(url, token.as_deref()) => response?,
        };

        if !response.is_success() {
            return Err(DownloadError::HttpStatus {
                url: url.to_string(),
                status: response.status,
                reason: response.reason,
            });
        }

        // A zero length tells us nothing about progress.
        let total = response.content_length.filter(|&len| len > 0);
        let mut body = response.body.ok_or_else(|| DownloadError::EmptyBody {
            url: url.to_string(),
        })?;

        let mut buffer: Vec<u8> =
            Vec::with_capacity(total.map(|t| t.min(MAX_PREALLOC) as usize).unwrap_or(0));
        let mut last_percent: Option<u8> = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                next = body.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;
            buffer.extend_from_slice(&chunk);

            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            if let Some(total) = total {
                let percent = percent_of(buffer.len() as u64, total);
                if last_percent != Some(percent) {
                    tracing::trace!("{}: {}%", file_name, percent);
                    on_progress(percent);
                    last_percent = Some(percent);
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        self.fs.write_whole(&temp_path, &buffer).await?;
        tracing::info!(
            "File {} downloaded to staging ({} bytes)",
            file_name,
            buffer.len()
        );
        Ok(temp_path)
    }
}

/// Rounded percentage of `received` over `total`, capped at 100.
pub(crate) fn percent_of(received: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (received as u128 * 100 + total as u128 / 2) / total as u128;
    pct.min(100) as u8
}
