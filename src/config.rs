// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persisted configuration for modelfetch.
//!
//! Stored as pretty JSON at `~/.modelfetch/config.json`. Every field is
//! optional; missing values fall back to platform directories.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::credentials::ConfigCredentials;
use crate::download::DownloadSettings;

const APP_DIR: &str = "modelfetch";
const CONFIG_FILE: &str = "config.json";

/// `<data_dir>/modelfetch/models`, where finished models live by default.
pub fn default_models_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join("models")
}

/// `<cache_dir>/modelfetch/staging`, or the system temp dir.
///
/// Must share a filesystem with the models dir for the final rename.
pub fn default_staging_dir() -> PathBuf {
    match dirs::cache_dir() {
        Some(cache) => cache.join(APP_DIR).join("staging"),
        None => std::env::temp_dir(),
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    /// Final directory downloaded models are moved into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models_path: Option<PathBuf>,
    /// Bearer token for the model host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hf_token: Option<String>,
    /// JSON catalog replacing the built-in model list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_path: Option<PathBuf>,
    /// Root under which per-attempt staging directories are created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_path: Option<PathBuf>,
}

impl Config {
    /// Path of the config file in the user's home directory.
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(home.join(format!(".{}", APP_DIR)).join(CONFIG_FILE))
    }

    /// Load the config from its default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load a config file, returning defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Save the config to its default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).with_context(|| format!("Failed to write config file: {:?}", path))
    }

    /// Configured models directory, or `<data_dir>/modelfetch/models`.
    pub fn models_dir(&self) -> PathBuf {
        self.models_path.clone().unwrap_or_else(default_models_dir)
    }

    /// Configured staging root, or `<cache_dir>/modelfetch/staging`.
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_path.clone().unwrap_or_else(default_staging_dir)
    }

    /// The configured catalog, or the built-in one.
    pub fn catalog(&self) -> Result<Catalog> {
        match &self.catalog_path {
            Some(path) => Catalog::load(path)
                .with_context(|| format!("Failed to load catalog: {:?}", path)),
            None => Ok(Catalog::default()),
        }
    }

    pub fn credentials(&self) -> ConfigCredentials {
        ConfigCredentials::new(self.hf_token.clone())
    }

    pub fn download_settings(&self) -> DownloadSettings {
        DownloadSettings {
            models_dir: self.models_dir(),
            staging_root: self.staging_dir(),
            ..DownloadSettings::default()
        }
    }
}
