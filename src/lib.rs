// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! modelfetch - queued model downloads for local inference
//!
//! Downloads catalog models one at a time into a models directory, with a
//! FIFO queue behind the active transfer, pause/resume/stop control, and
//! per-model progress published over a `watch` channel.
//!
//! # Core Modules
//!
//! - [`catalog`] - Model names, display sizes and download links
//! - [`download`] - The download manager and its transfer pipeline
//! - [`config`] - Persisted settings (`~/.modelfetch/config.json`)
//! - [`credentials`] - Bearer token lookup
//! - [`error`] - Download error type

pub mod catalog;
pub mod config;
pub mod credentials;
pub mod download;
pub mod error;
pub mod sync;

pub use catalog::{Catalog, CatalogEntry};
pub use config::Config;
pub use credentials::{ConfigCredentials, CredentialStore, StaticCredentials};
pub use download::{
    DownloadManager, DownloadSettings, ManagerSnapshot, ModelSnapshot, ModelStatus,
};
pub use error::{DownloadError, DownloadResult};
