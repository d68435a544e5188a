// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download manager: single-slot orchestration of model downloads.
//!
//! At most one model transfers at a time. Requests that arrive while the
//! slot is busy wait in a FIFO queue, and every transfer's end (success,
//! error or cancellation) hands the slot to the next queued name.
//!
//! All slot/queue/record state lives behind one lock. Every public call that
//! inspects the slot and then mutates it does both inside one critical
//! section, and the lock is never held across an `.await`.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use indexmap::IndexMap;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::fs::{Filesystem, LocalFs};
use super::mover::FileMover;
use super::queue::DownloadQueue;
use super::temp_dir::TempDirectoryManager;
use super::transfer::FileTransfer;
use super::transport::{HttpTransport, ReqwestTransport};
use super::types::{DownloadTask, ManagerSnapshot, ModelDownloadRecord, ModelSnapshot, ModelStatus};
use crate::catalog::Catalog;
use crate::config::{default_models_dir, default_staging_dir};
use crate::credentials::{CredentialStore, HF_TOKEN_KEY};
use crate::error::{DownloadError, DownloadResult};
use crate::sync::{resilient_read, resilient_write};

/// How long `shutdown` waits for the cancelled transfer task to exit.
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Directories and knobs the manager is constructed with.
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    /// Final location of downloaded model files
    pub models_dir: PathBuf,
    /// Parent of the per-attempt staging directories
    pub staging_root: PathBuf,
    /// Credential key for the bearer token
    pub token_key: String,
    pub shutdown_grace: Duration,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            staging_root: default_staging_dir(),
            token_key: HF_TOKEN_KEY.to_string(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

struct ManagerState {
    /// Catalog order
    records: IndexMap<String, ModelDownloadRecord>,
    queue: DownloadQueue,
    /// The slot
    active: Option<DownloadTask>,
    next_task_id: u64,
    closed: bool,
}

impl ManagerState {
    fn owns_slot(&self, task_id: u64) -> bool {
        self.active.as_ref().map_or(false, |t| t.id == task_id)
    }

    fn is_active(&self, name: &str) -> bool {
        self.active.as_ref().map_or(false, |t| t.name == name)
    }

    fn set_status(&mut self, name: &str, status: ModelStatus) {
        if let Some(record) = self.records.get_mut(name) {
            record.update_status(status);
        }
    }

    fn reset(&mut self, name: &str) {
        if let Some(record) = self.records.get_mut(name) {
            record.progress = 0;
            record.update_status(ModelStatus::NotDownloaded);
        }
    }

    fn snapshot(&self) -> ManagerSnapshot {
        ManagerSnapshot {
            models: self.records.values().map(ModelDownloadRecord::snapshot).collect(),
            queue: self.queue.to_vec(),
            active: self.active.as_ref().map(|t| t.name.clone()),
        }
    }
}

/// What the spawned transfer needs; everything else stays in the slot.
struct TransferJob {
    id: u64,
    name: String,
    links: Vec<String>,
    temp_dir: PathBuf,
    cancel: CancellationToken,
}

struct Inner {
    state: RwLock<ManagerState>,
    models_dir: RwLock<PathBuf>,
    fs: Arc<dyn Filesystem>,
    transfer: FileTransfer,
    mover: FileMover,
    temp_dirs: TempDirectoryManager,
    updates: watch::Sender<ManagerSnapshot>,
    runtime: Handle,
    shutdown_grace: Duration,
}

/// Orchestrates catalog downloads through a single transfer slot.
///
/// Cheap to clone; every clone drives the same slot and queue. Construct one
/// per process and hand clones to whatever needs it.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<Inner>,
}

impl DownloadManager {
    /// Create a manager that downloads over `reqwest` onto the local disk.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        catalog: Catalog,
        settings: DownloadSettings,
        credentials: Arc<dyn CredentialStore>,
    ) -> DownloadResult<Self> {
        let transport = Arc::new(ReqwestTransport::new()?);
        Self::with_backends(catalog, settings, credentials, transport, Arc::new(LocalFs))
    }

    /// Create a manager over explicit transport and filesystem backends.
    pub fn with_backends(
        catalog: Catalog,
        settings: DownloadSettings,
        credentials: Arc<dyn CredentialStore>,
        transport: Arc<dyn HttpTransport>,
        fs: Arc<dyn Filesystem>,
    ) -> DownloadResult<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            DownloadError::Config("DownloadManager must be created inside a tokio runtime".into())
        })?;

        let records: IndexMap<String, ModelDownloadRecord> = catalog
            .entries()
            .iter()
            .map(|entry| (entry.name.clone(), ModelDownloadRecord::from_entry(entry)))
            .collect();

        let state = ManagerState {
            records,
            queue: DownloadQueue::new(),
            active: None,
            next_task_id: 0,
            closed: false,
        };
        let (updates, _) = watch::channel(state.snapshot());

        let inner = Inner {
            state: RwLock::new(state),
            models_dir: RwLock::new(settings.models_dir),
            transfer: FileTransfer::new(transport, fs.clone(), credentials, settings.token_key),
            mover: FileMover::new(fs.clone()),
            temp_dirs: TempDirectoryManager::new(fs.clone(), settings.staging_root),
            fs,
            updates,
            runtime,
            shutdown_grace: settings.shutdown_grace,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Request a download of `name`.
    ///
    /// No-op if the model is already downloading or queued. Starts at once
    /// when the slot is free, otherwise queues the model.
    pub fn download_model(&self, name: &str) {
        let inner = &self.inner;
        let mut state = resilient_write(&inner.state);
        if state.closed {
            tracing::debug!("Ignoring download of {} after shutdown", name);
            return;
        }
        let Some(record) = state.records.get(name) else {
            warn_unknown(name);
            return;
        };
        if record.status.is_pending() {
            tracing::warn!("Model {} is already downloading or queued", name);
            return;
        }

        if state.active.is_some() {
            state.queue.enqueue(name);
            state.set_status(name, ModelStatus::Queued);
            tracing::info!("Model {} queued (position {})", name, state.queue.len());
        } else {
            inner.begin_transfer(&mut state, name);
        }
        inner.publish(&state);
    }

    /// Pause the active download of `name`.
    ///
    /// Only valid while `name` holds the slot. Progress is kept; resuming
    /// starts the transfer over from zero.
    pub fn pause_download(&self, name: &str) {
        let inner = &self.inner;
        {
            let mut state = resilient_write(&inner.state);
            if !state.records.contains_key(name) {
                warn_unknown(name);
                return;
            }
            if !state.is_active(name) {
                tracing::debug!("Model {} is not downloading, nothing to pause", name);
                return;
            }
            if let Some(task) = state.active.take() {
                task.cancel.cancel();
            }
            state.set_status(name, ModelStatus::Paused);
            tracing::info!("Download paused for {}", name);
            inner.publish(&state);
        }
        inner.process_queue();
    }

    /// Stop `name` whatever its status: cancel it if active, drop it from
    /// the queue, and reset it to `not_downloaded`.
    pub async fn stop_download(&self, name: &str) {
        let inner = &self.inner;
        let stopped = {
            let mut state = resilient_write(&inner.state);
            if !state.records.contains_key(name) {
                warn_unknown(name);
                return;
            }
            let stopped = if state.is_active(name) {
                state.active.take()
            } else {
                None
            };
            if let Some(task) = &stopped {
                task.cancel.cancel();
            }
            state.queue.remove(name);
            state.reset(name);
            tracing::info!("Download stopped for {}", name);
            inner.publish(&state);
            stopped
        };

        if let Some(task) = stopped {
            inner.temp_dirs.cleanup(&task.temp_dir).await;
        }
        inner.process_queue();
    }

    /// Restart a paused model from zero, or queue it if the slot is busy.
    pub fn resume_download(&self, name: &str) {
        let inner = &self.inner;
        let mut state = resilient_write(&inner.state);
        if state.closed {
            tracing::debug!("Ignoring resume of {} after shutdown", name);
            return;
        }
        let Some(record) = state.records.get(name) else {
            warn_unknown(name);
            return;
        };
        if record.status != ModelStatus::Paused {
            tracing::debug!("Model {} is not paused, nothing to resume", name);
            return;
        }

        if state.active.is_some() {
            state.queue.enqueue(name);
            state.set_status(name, ModelStatus::Queued);
            tracing::info!("Model {} queued for resume", name);
        } else {
            inner.begin_transfer(&mut state, name);
        }
        inner.publish(&state);
    }

    /// Start the queue head if the slot is free.
    pub fn process_queue(&self) {
        self.inner.process_queue();
    }

    /// Mark models whose files are all present in the models directory as
    /// downloaded. Returns how many records changed.
    pub async fn sync_installed(&self) -> usize {
        let models_dir = self.models_dir();
        let candidates: Vec<(String, Vec<String>)> = {
            let state = resilient_read(&self.inner.state);
            state
                .records
                .values()
                .filter(|r| r.status == ModelStatus::NotDownloaded)
                .map(|r| (r.name.clone(), r.files.clone()))
                .collect()
        };

        let mut installed = Vec::new();
        for (name, files) in candidates {
            let mut complete = true;
            for file in &files {
                if !self.inner.fs.exists(&models_dir.join(file)).await {
                    complete = false;
                    break;
                }
            }
            if complete {
                installed.push(name);
            }
        }

        let mut state = resilient_write(&self.inner.state);
        let mut changed = 0;
        for name in &installed {
            if let Some(record) = state.records.get_mut(name) {
                if record.status == ModelStatus::NotDownloaded {
                    record.progress = 100;
                    record.update_status(ModelStatus::Downloaded);
                    changed += 1;
                }
            }
        }
        if changed > 0 {
            tracing::info!("Found {} installed model(s) in {}", changed, models_dir.display());
            self.inner.publish(&state);
        }
        changed
    }

    /// Stop the active transfer, drop everything queued, and refuse further
    /// requests. Waits up to the configured grace period for the transfer
    /// task to exit.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        let stopped = {
            let mut state = resilient_write(&inner.state);
            if state.closed {
                return;
            }
            state.closed = true;

            let stopped = state.active.take();
            if let Some(task) = &stopped {
                task.cancel.cancel();
                state.reset(&task.name);
                tracing::info!("Shutting down: stopped download of {}", task.name);
            }
            while let Some(name) = state.queue.dequeue_next() {
                state.reset(&name);
            }
            inner.publish(&state);
            stopped
        };

        let Some(mut task) = stopped else { return };
        inner.temp_dirs.cleanup(&task.temp_dir).await;
        if let Some(handle) = task.handle.take() {
            match tokio::time::timeout(inner.shutdown_grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Download task for {} ended abnormally: {}", task.name, e),
                Err(_) => tracing::warn!(
                    "Download task for {} did not stop within {:?}",
                    task.name,
                    inner.shutdown_grace
                ),
            }
        }
    }

    /// Current state of one model.
    pub fn snapshot(&self, name: &str) -> Option<ModelSnapshot> {
        let state = resilient_read(&self.inner.state);
        state.records.get(name).map(ModelDownloadRecord::snapshot)
    }

    /// Current state of every model, in catalog order.
    pub fn snapshots(&self) -> Vec<ModelSnapshot> {
        let state = resilient_read(&self.inner.state);
        state.records.values().map(ModelDownloadRecord::snapshot).collect()
    }

    /// Models, queue and slot in one consistent view.
    pub fn state(&self) -> ManagerSnapshot {
        resilient_read(&self.inner.state).snapshot()
    }

    pub fn status(&self, name: &str) -> Option<ModelStatus> {
        let state = resilient_read(&self.inner.state);
        state.records.get(name).map(|r| r.status)
    }

    pub fn queue(&self) -> Vec<String> {
        resilient_read(&self.inner.state).queue.to_vec()
    }

    /// Name of the model holding the slot.
    pub fn active_download(&self) -> Option<String> {
        let state = resilient_read(&self.inner.state);
        state.active.as_ref().map(|t| t.name.clone())
    }

    /// Staging directory of the active transfer.
    pub fn active_temp_dir(&self) -> Option<PathBuf> {
        let state = resilient_read(&self.inner.state);
        state.active.as_ref().map(|t| t.temp_dir.clone())
    }

    /// Receive a fresh [`ManagerSnapshot`] after every state change.
    pub fn subscribe(&self) -> watch::Receiver<ManagerSnapshot> {
        self.inner.updates.subscribe()
    }

    pub fn contains(&self, name: &str) -> bool {
        resilient_read(&self.inner.state).records.contains_key(name)
    }

    pub fn models_dir(&self) -> PathBuf {
        resilient_read(&self.inner.models_dir).clone()
    }

    /// Change where finished files go. Applies to transfers started later.
    pub fn set_models_dir(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        tracing::info!("Models path set to {}", path.display());
        *resilient_write(&self.inner.models_dir) = path;
    }
}

impl Inner {
    fn publish(&self, state: &ManagerState) {
        self.updates.send_replace(state.snapshot());
    }

    fn models_dir(&self) -> PathBuf {
        resilient_read(&self.models_dir).clone()
    }

    /// Claim the slot for `name` and spawn its transfer. Caller holds the
    /// state lock and has checked the slot is free.
    fn begin_transfer(self: &Arc<Self>, state: &mut ManagerState, name: &str) {
        state.next_task_id += 1;
        let id = state.next_task_id;

        let Some(record) = state.records.get_mut(name) else {
            warn_unknown(name);
            return;
        };
        record.progress = 0;
        record.update_status(ModelStatus::Downloading);
        let links = record.links.clone();

        let mut task = DownloadTask::new(id, name, self.temp_dirs.allocate());
        let job = TransferJob {
            id,
            name: name.to_string(),
            links,
            temp_dir: task.temp_dir.clone(),
            cancel: task.cancel.clone(),
        };
        tracing::info!("Downloading model {} (task {})", name, id);

        let inner = Arc::clone(self);
        task.handle = Some(self.runtime.spawn(async move { inner.run_transfer(job).await }));
        state.active = Some(task);
    }

    fn process_queue(self: &Arc<Self>) {
        let mut state = resilient_write(&self.state);
        if state.closed || state.active.is_some() {
            return;
        }
        let Some(next) = state.queue.dequeue_next() else {
            return;
        };
        tracing::debug!("Slot free, starting queued model {}", next);
        self.begin_transfer(&mut state, &next);
        self.publish(&state);
    }

    async fn run_transfer(self: Arc<Self>, job: TransferJob) {
        let outcome = self.execute(&job).await;
        self.temp_dirs.cleanup(&job.temp_dir).await;
        self.finish(&job, outcome);
        self.process_queue();
    }

    /// Fetch every link in order, then move every staged file into place.
    async fn execute(&self, job: &TransferJob) -> DownloadResult<Vec<PathBuf>> {
        let models_dir = self.models_dir();
        self.temp_dirs.ensure(&models_dir).await?;
        self.temp_dirs.ensure(&job.temp_dir).await?;
        tracing::debug!(
            "Staging {} in {} for {}",
            job.name,
            job.temp_dir.display(),
            models_dir.display()
        );

        let mut staged = Vec::with_capacity(job.links.len());
        for (index, link) in job.links.iter().enumerate() {
            if job.cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            let temp_path = self
                .transfer
                .fetch(link, &job.temp_dir, &job.cancel, |percent| {
                    self.report_progress(job, index, percent)
                })
                .await?;
            staged.push(temp_path);
            self.report_progress(job, index, 100);
        }

        if job.cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        // Files moved before a failing one stay where they are.
        let mut moved = Vec::with_capacity(staged.len());
        for temp_path in &staged {
            moved.push(self.mover.move_into(temp_path, &models_dir).await?);
        }
        Ok(moved)
    }

    /// Fold one file's percentage into the model's overall progress.
    ///
    /// Stays below 100 until the model is actually downloaded.
    fn report_progress(&self, job: &TransferJob, link_index: usize, file_percent: u8) {
        let links = job.links.len().max(1) as u32;
        let overall = ((link_index as u32 * 100 + file_percent as u32) / links).min(99) as u8;

        let mut state = resilient_write(&self.state);
        if !state.owns_slot(job.id) || job.cancel.is_cancelled() {
            return;
        }
        let Some(record) = state.records.get_mut(&job.name) else {
            return;
        };
        if overall <= record.progress {
            return;
        }
        record.progress = overall;
        self.publish(&state);
    }

    /// Record the outcome and free the slot, unless the task already lost
    /// the slot to a pause, stop or shutdown.
    fn finish(&self, job: &TransferJob, outcome: DownloadResult<Vec<PathBuf>>) {
        let mut state = resilient_write(&self.state);
        if !state.owns_slot(job.id) {
            tracing::debug!("Download cancelled for {} (task {})", job.name, job.id);
            return;
        }
        let elapsed = state
            .active
            .take()
            .map(|task| (chrono::Utc::now() - task.started_at).num_seconds())
            .unwrap_or(0);

        match outcome {
            Ok(files) => {
                if let Some(record) = state.records.get_mut(&job.name) {
                    if record.status == ModelStatus::Downloading {
                        record.progress = 100;
                        record.update_status(ModelStatus::Downloaded);
                        tracing::info!(
                            "Model {} downloaded ({} file(s) in {}s)",
                            job.name,
                            files.len(),
                            elapsed
                        );
                    }
                }
            }
            Err(e) if e.is_cancellation() || job.cancel.is_cancelled() => {
                tracing::debug!("Download cancelled for {}", job.name);
                state.reset(&job.name);
            }
            Err(e) => {
                tracing::error!("Failed to download model {}: {}", job.name, e);
                if let Some(record) = state.records.get_mut(&job.name) {
                    record.fail(e.to_string());
                }
            }
        }
        self.publish(&state);
    }
}

fn warn_unknown(name: &str) {
    tracing::warn!("{}", DownloadError::Config(format!("unknown model '{}'", name)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntry;
    use crate::credentials::StaticCredentials;
    use crate::download::transport::HttpResponse;
    use async_trait::async_trait;

    /// Transport whose requests never resolve, so the slot stays busy.
    struct PendingTransport;

    #[async_trait]
    impl HttpTransport for PendingTransport {
        async fn get(&self, _url: &str, _bearer: Option<&str>) -> DownloadResult<HttpResponse> {
            std::future::pending().await
        }
    }

    fn manager(names: &[&str]) -> DownloadManager {
        let entries = names
            .iter()
            .map(|n| CatalogEntry::new(*n, "1 GB", vec![format!("https://host/{}.bin", n)]))
            .collect();
        let settings = DownloadSettings {
            models_dir: std::env::temp_dir().join("modelfetch-unit-models"),
            staging_root: std::env::temp_dir().join("modelfetch-unit-staging"),
            ..DownloadSettings::default()
        };
        DownloadManager::with_backends(
            Catalog::new(entries).unwrap(),
            settings,
            Arc::new(StaticCredentials::new()),
            Arc::new(PendingTransport),
            Arc::new(LocalFs),
        )
        .unwrap()
    }

    #[test]
    fn test_new_outside_runtime_is_config_error() {
        let result = DownloadManager::with_backends(
            Catalog::default(),
            DownloadSettings::default(),
            Arc::new(StaticCredentials::new()),
            Arc::new(PendingTransport),
            Arc::new(LocalFs),
        );
        assert!(matches!(result, Err(DownloadError::Config(_))));
    }

    #[tokio::test]
    async fn test_unknown_model_is_noop() {
        let manager = manager(&["a"]);
        manager.download_model("missing");
        manager.pause_download("missing");
        manager.resume_download("missing");
        manager.stop_download("missing").await;
        assert!(manager.state().is_idle());
        assert_eq!(manager.status("a"), Some(ModelStatus::NotDownloaded));
    }

    #[tokio::test]
    async fn test_second_request_queues() {
        let manager = manager(&["a", "b"]);
        manager.download_model("a");
        manager.download_model("b");

        assert_eq!(manager.status("a"), Some(ModelStatus::Downloading));
        assert_eq!(manager.status("b"), Some(ModelStatus::Queued));
        assert_eq!(manager.active_download().as_deref(), Some("a"));
        assert_eq!(manager.queue(), vec!["b".to_string()]);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_pause_requires_active() {
        let manager = manager(&["a", "b"]);
        manager.download_model("a");
        manager.download_model("b");

        manager.pause_download("b");
        assert_eq!(manager.status("b"), Some(ModelStatus::Queued));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_resume_requires_paused() {
        let manager = manager(&["a"]);
        manager.resume_download("a");
        assert_eq!(manager.status("a"), Some(ModelStatus::NotDownloaded));
        assert!(manager.active_download().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_resets_and_refuses() {
        let manager = manager(&["a", "b"]);
        manager.download_model("a");
        manager.download_model("b");

        manager.shutdown().await;
        let state = manager.state();
        assert!(state.is_idle());
        assert_eq!(state.status("a"), Some(ModelStatus::NotDownloaded));
        assert_eq!(state.status("b"), Some(ModelStatus::NotDownloaded));

        manager.download_model("a");
        assert_eq!(manager.status("a"), Some(ModelStatus::NotDownloaded));
    }
}
