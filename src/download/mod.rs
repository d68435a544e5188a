// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Model download system
//!
//! One model transfers at a time; the rest wait in a FIFO queue. A model's
//! files are streamed into a private staging directory and only renamed
//! into the models directory once every file has arrived.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │ DownloadManager │────▶│ transfer task   │
//! │ (slot + queue)  │     │ (tokio spawn)   │
//! └────────┬────────┘     └────────┬────────┘
//!          │                       │
//!          ▼                       ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ watch channel   │     │ FileTransfer    │──▶ HttpTransport
//! │ (snapshots)     │     │ FileMover       │──▶ Filesystem
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use modelfetch::catalog::Catalog;
//! use modelfetch::credentials::StaticCredentials;
//! use modelfetch::download::{DownloadManager, DownloadSettings, ModelStatus};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let manager = DownloadManager::new(
//!     Catalog::default(),
//!     DownloadSettings::default(),
//!     Arc::new(StaticCredentials::new()),
//! )?;
//!
//! manager.download_model("KeyBert");
//!
//! let mut updates = manager.subscribe();
//! updates
//!     .wait_for(|s| s.status("KeyBert").map_or(true, |st| st.is_terminal()))
//!     .await?;
//! println!("{:?}", manager.snapshot("KeyBert"));
//! # Ok(())
//! # }
//! ```

pub mod fs;
pub mod manager;
pub mod mover;
pub mod queue;
pub mod temp_dir;
pub mod transfer;
pub mod transport;
pub mod types;

pub use fs::{Filesystem, LocalFs};
pub use manager::{DownloadManager, DownloadSettings};
pub use queue::DownloadQueue;
pub use transport::{BodyStream, HttpResponse, HttpTransport, ReqwestTransport};
pub use types::{DownloadTask, ManagerSnapshot, ModelDownloadRecord, ModelSnapshot, ModelStatus};
