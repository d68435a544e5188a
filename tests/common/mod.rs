// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared fixtures for the download manager integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use modelfetch::catalog::{Catalog, CatalogEntry};
use modelfetch::credentials::StaticCredentials;
use modelfetch::download::{
    DownloadManager, DownloadSettings, Filesystem, HttpResponse, HttpTransport, LocalFs,
    ManagerSnapshot, ModelStatus,
};
use modelfetch::error::{DownloadError, DownloadResult};

pub const WAIT: Duration = Duration::from_secs(5);

/// Sender half of a channel-fed response body.
pub type BodyFeed = mpsc::UnboundedSender<DownloadResult<Bytes>>;

pub fn link(model: &str, file: &str) -> String {
    format!("https://models.test/{}/resolve/main/{}?download=true", model, file)
}

// =============================================================================
// SCRIPTED TRANSPORT
// =============================================================================

struct Reply {
    status: u16,
    content_length: Option<u64>,
    body: Option<modelfetch::download::BodyStream>,
}

/// In-memory transport answering each URL from a per-URL script.
///
/// Unscripted URLs answer 404. Every request is recorded with the bearer
/// token it carried.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, url: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Answer `url` once with the whole body and its length.
    pub fn serve(&self, url: &str, body: &'static [u8]) {
        let stream = futures_util::stream::iter(vec![Ok(Bytes::from_static(body))]).boxed();
        self.push(
            url,
            Reply {
                status: 200,
                content_length: Some(body.len() as u64),
                body: Some(stream),
            },
        );
    }

    /// Answer `url` once with an error status.
    pub fn fail(&self, url: &str, status: u16) {
        self.push(
            url,
            Reply {
                status,
                content_length: None,
                body: None,
            },
        );
    }

    /// Answer `url` once with a body fed by the returned sender. The body
    /// ends when the sender is dropped.
    pub fn stream(&self, url: &str, content_length: u64) -> BodyFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(
            url,
            Reply {
                status: 200,
                content_length: Some(content_length),
                body: Some(UnboundedReceiverStream::new(rx).boxed()),
            },
        );
        tx
    }

    pub fn requested_urls(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }

    pub fn bearers(&self) -> Vec<Option<String>> {
        self.requests.lock().unwrap().iter().map(|(_, b)| b.clone()).collect()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn get(&self, url: &str, bearer: Option<&str>) -> DownloadResult<HttpResponse> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), bearer.map(str::to_string)));

        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front);
        let reply = reply.unwrap_or(Reply {
            status: 404,
            content_length: None,
            body: None,
        });
        let reason = match reply.status {
            200 => "OK",
            404 => "Not Found",
            500 => "Internal Server Error",
            _ => "",
        };
        Ok(HttpResponse {
            status: reply.status,
            reason: reason.to_string(),
            content_length: reply.content_length,
            body: reply.body,
        })
    }
}

// =============================================================================
// FAILING FILESYSTEM
// =============================================================================

/// Local filesystem whose rename fails for one file name.
pub struct FailingMoveFs {
    pub file_name: String,
}

#[async_trait]
impl Filesystem for FailingMoveFs {
    async fn exists(&self, path: &Path) -> bool {
        LocalFs.exists(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> DownloadResult<()> {
        LocalFs.create_dir_all(path).await
    }

    async fn move_atomic(&self, src: &Path, dst: &Path) -> DownloadResult<()> {
        if dst.file_name().map_or(false, |n| n == self.file_name.as_str()) {
            return Err(DownloadError::filesystem("move", src, "cross-device link"));
        }
        LocalFs.move_atomic(src, dst).await
    }

    async fn delete_recursive(&self, path: &Path) -> DownloadResult<()> {
        LocalFs.delete_recursive(path).await
    }

    async fn write_whole(&self, path: &Path, bytes: &[u8]) -> DownloadResult<()> {
        LocalFs.write_whole(path, bytes).await
    }
}

/// Local filesystem that refuses to create any directory named `dir_name`.
pub struct FailingCreateFs {
    pub dir_name: String,
}

#[async_trait]
impl Filesystem for FailingCreateFs {
    async fn exists(&self, path: &Path) -> bool {
        LocalFs.exists(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> DownloadResult<()> {
        if path.file_name().map_or(false, |n| n == self.dir_name.as_str()) {
            return Err(DownloadError::filesystem("create directory", path, "permission denied"));
        }
        LocalFs.create_dir_all(path).await
    }

    async fn move_atomic(&self, src: &Path, dst: &Path) -> DownloadResult<()> {
        LocalFs.move_atomic(src, dst).await
    }

    async fn delete_recursive(&self, path: &Path) -> DownloadResult<()> {
        LocalFs.delete_recursive(path).await
    }

    async fn write_whole(&self, path: &Path, bytes: &[u8]) -> DownloadResult<()> {
        LocalFs.write_whole(path, bytes).await
    }
}

// =============================================================================
// FIXTURE
// =============================================================================

pub struct Fixture {
    pub dir: TempDir,
    pub models: PathBuf,
    pub staging: PathBuf,
    pub transport: Arc<ScriptedTransport>,
    pub manager: DownloadManager,
}

pub struct FixtureBuilder {
    entries: Vec<CatalogEntry>,
    credentials: StaticCredentials,
    fs: Arc<dyn Filesystem>,
}

impl FixtureBuilder {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            credentials: StaticCredentials::new(),
            fs: Arc::new(LocalFs),
        }
    }

    /// Add a model whose links are `link(name, file)` for each file.
    pub fn model(mut self, name: &str, files: &[&str]) -> Self {
        let links = files.iter().map(|f| link(name, f)).collect();
        self.entries.push(CatalogEntry::new(name, "1 GB", links));
        self
    }

    pub fn token(mut self, token: &str) -> Self {
        self.credentials = StaticCredentials::with_hf_token(token);
        self
    }

    pub fn fs(mut self, fs: Arc<dyn Filesystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn build(self) -> Fixture {
        let dir = TempDir::new().expect("temp dir");
        let models = dir.path().join("models");
        let staging = dir.path().join("staging");
        let transport = ScriptedTransport::new();
        let settings = DownloadSettings {
            models_dir: models.clone(),
            staging_root: staging.clone(),
            shutdown_grace: Duration::from_secs(2),
            ..DownloadSettings::default()
        };
        let manager = DownloadManager::with_backends(
            Catalog::new(self.entries).expect("valid catalog"),
            settings,
            Arc::new(self.credentials),
            transport.clone(),
            self.fs,
        )
        .expect("manager");

        Fixture {
            dir,
            models,
            staging,
            transport,
            manager,
        }
    }
}

impl Fixture {
    /// Wait until `pred` holds for a published snapshot, checking the slot
    /// and queue invariants on every snapshot seen along the way.
    pub async fn wait_for<F>(&self, mut pred: F) -> ManagerSnapshot
    where
        F: FnMut(&ManagerSnapshot) -> bool,
    {
        let mut rx = self.manager.subscribe();
        let result = tokio::time::timeout(
            WAIT,
            rx.wait_for(|s| {
                assert_invariants(s);
                pred(s)
            }),
        )
        .await
        .expect("timed out waiting for manager state")
        .expect("manager dropped");
        result.clone()
    }

    pub async fn wait_status(&self, name: &str, status: ModelStatus) -> ManagerSnapshot {
        self.wait_for(|s| s.status(name) == Some(status)).await
    }

    pub fn staging_entries(&self) -> usize {
        std::fs::read_dir(&self.staging).map(|d| d.count()).unwrap_or(0)
    }

    pub fn model_file(&self, file: &str) -> PathBuf {
        self.models.join(file)
    }
}

/// At most one model downloading; queued iff in the queue exactly once.
pub fn assert_invariants(snapshot: &ManagerSnapshot) {
    let downloading = snapshot
        .models
        .iter()
        .filter(|m| m.status == ModelStatus::Downloading)
        .count();
    assert!(downloading <= 1, "more than one model downloading: {:?}", snapshot);

    for model in &snapshot.models {
        let occurrences = snapshot.queue.iter().filter(|n| **n == model.name).count();
        if model.status == ModelStatus::Queued {
            assert_eq!(occurrences, 1, "queued model {} not in queue once", model.name);
        } else {
            assert_eq!(occurrences, 0, "{} in queue with status {}", model.name, model.status);
        }
    }
}

/// Poll until `cond` holds or the wait budget runs out.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
