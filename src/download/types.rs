// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download types: model records, the active task, and published snapshots.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::catalog::CatalogEntry;

/// Status of a catalog model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    /// Nothing on disk, nothing pending
    NotDownloaded,
    /// Waiting in the queue for the slot
    Queued,
    /// Owns the slot and is transferring
    Downloading,
    /// Interrupted by the user; resuming restarts from zero
    Paused,
    /// All files are in the models directory
    Downloaded,
    /// Last attempt failed; see the record's error
    Error,
}

impl ModelStatus {
    /// Returns true if no transfer is pending or running for the model.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ModelStatus::NotDownloaded
                | ModelStatus::Paused
                | ModelStatus::Downloaded
                | ModelStatus::Error
        )
    }

    /// Returns true if the model is queued or downloading.
    pub fn is_pending(&self) -> bool {
        matches!(self, ModelStatus::Queued | ModelStatus::Downloading)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::NotDownloaded => "not_downloaded",
            ModelStatus::Queued => "queued",
            ModelStatus::Downloading => "downloading",
            ModelStatus::Paused => "paused",
            ModelStatus::Downloaded => "downloaded",
            ModelStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-model download state, one per catalog entry for the process lifetime.
#[derive(Debug, Clone)]
pub struct ModelDownloadRecord {
    pub name: String,
    pub display_size: String,
    pub links: Vec<String>,
    /// File name each link lands under, in link order
    pub files: Vec<String>,
    pub status: ModelStatus,
    /// 0-100
    pub progress: u8,
    /// Present only while `status == Error`
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ModelDownloadRecord {
    pub fn from_entry(entry: &CatalogEntry) -> Self {
        Self {
            name: entry.name.clone(),
            display_size: entry.display_size.clone(),
            links: entry.links.clone(),
            files: entry.file_names(),
            status: ModelStatus::NotDownloaded,
            progress: 0,
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// Update the status and timestamp. Clears the error unless the new
    /// status is `Error`.
    pub fn update_status(&mut self, status: ModelStatus) {
        self.status = status;
        if status != ModelStatus::Error {
            self.error = None;
        }
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.update_status(ModelStatus::Error);
        self.error = Some(message.into());
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot {
            name: self.name.clone(),
            display_size: self.display_size.clone(),
            status: self.status,
            progress: self.progress,
            error: self.error.clone(),
        }
    }
}

/// The single in-flight transfer.
///
/// Owned by the manager; created when a transfer claims the slot and dropped
/// the moment the transfer ends, is paused or is stopped.
#[derive(Debug)]
pub struct DownloadTask {
    /// Distinguishes attempts of the same model
    pub id: u64,
    pub name: String,
    pub cancel: CancellationToken,
    /// Unique, timestamp-suffixed staging directory
    pub temp_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub(crate) handle: Option<JoinHandle<()>>,
}

impl DownloadTask {
    pub fn new(id: u64, name: impl Into<String>, temp_dir: PathBuf) -> Self {
        Self {
            id,
            name: name.into(),
            cancel: CancellationToken::new(),
            temp_dir,
            started_at: Utc::now(),
            handle: None,
        }
    }
}

/// Observable state of one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub name: String,
    pub display_size: String,
    pub status: ModelStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything a UI needs to render the download screen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerSnapshot {
    /// Catalog order
    pub models: Vec<ModelSnapshot>,
    /// Waiting names, head first
    pub queue: Vec<String>,
    /// Name holding the slot
    pub active: Option<String>,
}

impl ManagerSnapshot {
    pub fn model(&self, name: &str) -> Option<&ModelSnapshot> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn status(&self, name: &str) -> Option<ModelStatus> {
        self.model(name).map(|m| m.status)
    }

    /// True when nothing is downloading or waiting.
    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.queue.is_empty()
    }

    /// Zero-based queue position, if queued.
    pub fn queue_position(&self, name: &str) -> Option<usize> {
        self.queue.iter().position(|n| n == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings_match_serde() {
        let json = serde_json::to_string(&ModelStatus::NotDownloaded).unwrap();
        assert_eq!(json, "\"not_downloaded\"");
        assert_eq!(ModelStatus::NotDownloaded.as_str(), "not_downloaded");
    }

    #[test]
    fn test_update_status_clears_error() {
        let entry = CatalogEntry::new("m", "1 GB", vec!["https://x/m.bin?download=true".into()]);
        let mut record = ModelDownloadRecord::from_entry(&entry);
        assert_eq!(record.files, vec!["m.bin".to_string()]);
        record.fail("boom");
        assert_eq!(record.status, ModelStatus::Error);
        assert_eq!(record.error.as_deref(), Some("boom"));

        record.update_status(ModelStatus::Downloading);
        assert!(record.error.is_none());
    }

    #[test]
    fn test_snapshot_queue_position() {
        let snapshot = ManagerSnapshot {
            models: vec![],
            queue: vec!["a".into(), "b".into()],
            active: Some("c".into()),
        };
        assert_eq!(snapshot.queue_position("b"), Some(1));
        assert_eq!(snapshot.queue_position("c"), None);
        assert!(!snapshot.is_idle());
    }
}
