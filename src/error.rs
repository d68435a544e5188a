// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error taxonomy for model downloads.
//!
//! Every failure a transfer can hit maps onto one of these variants. The
//! orchestrator records network, body and filesystem failures on the model
//! (`status = error`), swallows [`DownloadError::Cancelled`] because it is the
//! expected result of a pause or stop, and logs [`DownloadError::Config`]
//! instead of raising it.

use std::path::{Path, PathBuf};

/// Result alias used across the download modules.
pub type DownloadResult<T> = std::result::Result<T, DownloadError>;

/// Errors produced while downloading, staging or relocating model files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    /// Transport failure (connection refused, reset, TLS, body read error).
    Network(String),
    /// The server answered with a non-success status.
    HttpStatus {
        url: String,
        status: u16,
        reason: String,
    },
    /// The response carried no body to read.
    EmptyBody { url: String },
    /// The transfer was cancelled by pause, stop or shutdown.
    Cancelled,
    /// A create, move, write or delete failed.
    Filesystem {
        op: &'static str,
        path: PathBuf,
        message: String,
    },
    /// Unknown model name, invalid catalog, or missing runtime.
    Config(String),
}

impl DownloadError {
    /// Build a filesystem error from an I/O failure.
    pub fn filesystem(op: &'static str, path: impl AsRef<Path>, err: impl std::fmt::Display) -> Self {
        Self::Filesystem {
            op,
            path: path.as_ref().to_path_buf(),
            message: err.to_string(),
        }
    }

    /// True for the error class that pause/stop produce on purpose.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// True for transport and HTTP status failures.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::HttpStatus { .. })
    }
}

impl std::fmt::Display for DownloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::HttpStatus { url, status, reason } => {
                let file = url.rsplit('/').next().unwrap_or(url);
                let file = file.split('?').next().unwrap_or(file);
                write!(f, "Failed to download {}: {} {}", file, status, reason)
            }
            Self::EmptyBody { url } => write!(f, "Response body is empty for {}", url),
            Self::Cancelled => write!(f, "Download cancelled"),
            Self::Filesystem { op, path, message } => {
                write!(f, "Failed to {} {}: {}", op, path.display(), message)
            }
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for DownloadError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_only_cancelled() {
        assert!(DownloadError::Cancelled.is_cancellation());
        assert!(!DownloadError::Network("reset".into()).is_cancellation());
        assert!(!DownloadError::EmptyBody { url: "u".into() }.is_cancellation());
    }

    #[test]
    fn test_http_status_message_names_the_file() {
        let err = DownloadError::HttpStatus {
            url: "https://host/repo/model.gguf".into(),
            status: 404,
            reason: "Not Found".into(),
        };
        assert_eq!(err.to_string(), "Failed to download model.gguf: 404 Not Found");
        assert!(err.is_network());
    }

    #[test]
    fn test_filesystem_message_includes_path() {
        let err = DownloadError::filesystem("move", "/tmp/a.bin", "denied");
        assert_eq!(err.to_string(), "Failed to move /tmp/a.bin: denied");
    }
}
