// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Model catalog: the fixed list of downloadable models.
//!
//! The catalog is read-only configuration for the download manager. A model
//! may need several files (weights plus a projector, for example), so each
//! entry carries an ordered, non-empty list of source URLs.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DownloadError, DownloadResult};

/// One downloadable model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Unique model name.
    pub name: String,
    /// Human-readable size, display only (e.g. "1.2 GB").
    #[serde(default, alias = "size")]
    pub display_size: String,
    /// Source URLs, fetched strictly in this order.
    pub links: Vec<String>,
}

impl CatalogEntry {
    pub fn new(name: impl Into<String>, display_size: impl Into<String>, links: Vec<String>) -> Self {
        Self {
            name: name.into(),
            display_size: display_size.into(),
            links,
        }
    }

    /// File names the links resolve to, in link order.
    pub fn file_names(&self) -> Vec<String> {
        self.links.iter().map(|link| file_name_from_url(link)).collect()
    }
}

/// Validated, ordered set of catalog entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Build a catalog, rejecting empty names, duplicate names and models
    /// without links.
    pub fn new(entries: Vec<CatalogEntry>) -> DownloadResult<Self> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if entry.name.trim().is_empty() {
                return Err(DownloadError::Config("catalog entry with empty name".into()));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(DownloadError::Config(format!(
                    "duplicate catalog entry '{}'",
                    entry.name
                )));
            }
            if entry.links.is_empty() {
                return Err(DownloadError::Config(format!(
                    "catalog entry '{}' has no links",
                    entry.name
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Parse a JSON array of entries.
    pub fn from_json(json: &str) -> DownloadResult<Self> {
        let entries: Vec<CatalogEntry> = serde_json::from_str(json)
            .map_err(|e| DownloadError::Config(format!("invalid catalog JSON: {}", e)))?;
        Self::new(entries)
    }

    /// Load a JSON catalog file.
    pub fn load(path: &Path) -> DownloadResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DownloadError::filesystem("read catalog", path, e))?;
        Self::from_json(&content)
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Catalog {
    /// The built-in model list shipped with the desktop app.
    fn default() -> Self {
        Self {
            entries: vec![
                CatalogEntry::new(
                    "Gemma3-4B-Q4",
                    "1.2 GB",
                    vec![
                        "https://huggingface.co/google/gemma-3-4b-it-qat-q4_0-gguf/resolve/main/gemma-3-4b-it-q4_0.gguf?download=true".into(),
                        "https://huggingface.co/google/gemma-3-4b-it-qat-q4_0-gguf/resolve/main/mmproj-model-f16-4B.gguf?download=true".into(),
                    ],
                ),
                CatalogEntry::new(
                    "Bitnet-b1.58-2B-4T",
                    "800 MB",
                    vec!["https://example.com/bitnet-b1-58-2b-4t.gguf".into()],
                ),
                CatalogEntry::new(
                    "Kukoro-82M",
                    "1.2 GB",
                    vec!["https://example.com/kukoro-82m.gguf".into()],
                ),
                CatalogEntry::new(
                    "KeyBert",
                    "1.2 GB",
                    vec!["https://example.com/keybert.gguf".into()],
                ),
                CatalogEntry::new(
                    "Whisper3-Large-Turbo",
                    "1.2 GB",
                    vec!["https://example.com/whisper3-large-turbo.gguf".into()],
                ),
            ],
        }
    }
}

/// Name of the file a URL points at: its last path segment, query dropped.
///
/// Falls back to `downloaded_file` when the URL has no usable segment.
pub fn file_name_from_url(link: &str) -> String {
    reqwest::Url::parse(link)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|segments| segments.last().map(str::to_string))
        })
        .filter(|segment| !segment.is_empty())
        .unwrap_or_else(|| "downloaded_file".to_string())
}
