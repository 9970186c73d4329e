// YouStream - Watch search results while they download
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Per-item download lifecycle
//!
//! An [`Item`] is one catalog entry plus the state machine of its download:
//!
//! ```text
//! NotRequested -> Downloading -> Downloaded
//!                 Downloading -> Cancelled | Failed
//! Cancelled | Failed -> Downloading   (re-download)
//! ```
//!
//! [`Item::start_download`] spawns a task that races the executor against a
//! cancel signal. [`Item::cancel`] marks the item `Cancelled` first, then
//! signals and joins the task, so a cancelled attempt can never flip to
//! `Downloaded` afterwards. Every attempt carries a generation number and the
//! task only commits its result if its generation is still current.

use super::executor::{DownloadExecutor, DownloadRequest};
use super::paths::OutputPaths;
use crate::catalog::MetadataRecord;
use crate::config::EngineConfig;
use crate::error::{Result, StreamError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;

/// Download state of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemState {
    NotRequested,
    Downloading,
    Downloaded,
    Cancelled,
    /// The last attempt failed; eligible for another attempt like `Cancelled`
    Failed,
}

/// Rate negotiated for a download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateMode {
    /// Explicit navigation: full configured rate
    Full,
    /// Speculative download ahead of playback: half rate
    Prefetch,
}

/// Point-in-time view of an item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub index: usize,
    pub title: String,
    pub author: String,
    pub state: ItemState,
    pub rate_mode: RateMode,
    pub attempts: u32,
    pub bytes_on_disk: u64,
    pub duration_secs: Option<u32>,
    pub last_error: Option<String>,
}

/// Handle to the running download task
struct ActiveDownload {
    handle: JoinHandle<()>,
    cancel_tx: oneshot::Sender<()>,
}

struct ItemInner {
    state: ItemState,
    rate_mode: RateMode,
    attempts: u32,
    generation: u64,
    last_error: Option<String>,
    probed_duration: Option<u32>,
    active: Option<ActiveDownload>,
}

/// One catalog entry and its download lifecycle
pub struct Item {
    index: usize,
    metadata: MetadataRecord,
    paths: OutputPaths,
    config: Arc<EngineConfig>,
    executor: Arc<dyn DownloadExecutor>,
    inner: Arc<RwLock<ItemInner>>,
}

impl std::fmt::Debug for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Item")
            .field("index", &self.index)
            .field("metadata", &self.metadata)
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

impl Item {
    pub fn new(
        index: usize,
        metadata: MetadataRecord,
        config: Arc<EngineConfig>,
        executor: Arc<dyn DownloadExecutor>,
    ) -> Self {
        let paths = OutputPaths::for_title(
            &config.output_directory,
            &metadata.title,
            index,
            &config.container_extension,
        );

        Self {
            index,
            metadata,
            paths,
            config,
            executor,
            inner: Arc::new(RwLock::new(ItemInner {
                state: ItemState::NotRequested,
                rate_mode: RateMode::Full,
                attempts: 0,
                generation: 0,
                last_error: None,
                probed_duration: None,
                active: None,
            })),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn metadata(&self) -> &MetadataRecord {
        &self.metadata
    }

    pub fn paths(&self) -> &OutputPaths {
        &self.paths
    }

    /// Start downloading at `rate_mode`
    ///
    /// No-op when already `Downloaded` or `Downloading`. Otherwise the item
    /// becomes `Downloading` and the transfer runs on a background task;
    /// this returns without waiting for it.
    pub async fn start_download(&self, rate_mode: RateMode) -> Result<()> {
        let mut inner = self.inner.write().await;

        match inner.state {
            ItemState::Downloaded | ItemState::Downloading => return Ok(()),
            ItemState::NotRequested | ItemState::Cancelled | ItemState::Failed => {}
        }

        if let Some(dir) = self.paths.final_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        inner.rate_mode = rate_mode;
        inner.state = ItemState::Downloading;
        inner.attempts += 1;
        inner.generation += 1;
        inner.last_error = None;

        let generation = inner.generation;
        let request = DownloadRequest {
            index: self.index,
            source_url: self.metadata.source_url.clone(),
            final_path: self.paths.final_path.clone(),
            partial_path: self.paths.partial_path.clone(),
            rate_limit_kib: self.config.rate_limit_kib(rate_mode),
        };

        log::info!(
            "Item {} '{}': downloading ({:?}, {} KiB/s, attempt {})",
            self.index,
            self.metadata.title,
            rate_mode,
            request.rate_limit_kib,
            inner.attempts
        );

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let executor = self.executor.clone();
        let state = self.inner.clone();

        let handle = tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel_rx => {
                    log::debug!("Item {}: download task cancelled", request.index);
                    return;
                }
                result = executor.download(&request) => result,
            };

            commit(&state, generation, &request, result).await;
        });

        inner.active = Some(ActiveDownload { handle, cancel_tx });
        Ok(())
    }

    /// Cancel a running download
    ///
    /// Safe from any state; only `Downloading` is affected. Waits for the
    /// task to stop (bounded by the configured cancel timeout) and removes
    /// the partial file. Returns whether a download was cancelled.
    pub async fn cancel(&self) -> bool {
        let active = {
            let mut inner = self.inner.write().await;
            if inner.state != ItemState::Downloading {
                return false;
            }
            inner.state = ItemState::Cancelled;
            inner.active.take()
        };

        log::info!("Item {} '{}': cancelling download", self.index, self.metadata.title);

        if let Some(mut active) = active {
            let _ = active.cancel_tx.send(());

            let started = Instant::now();
            match tokio::time::timeout(self.config.cancel_timeout(), &mut active.handle).await {
                Ok(_) => log::debug!("Item {}: download task stopped after {:?}", self.index, started.elapsed()),
                Err(_) => {
                    log::warn!(
                        "Item {}: download task did not stop within {:?}, aborting",
                        self.index,
                        self.config.cancel_timeout()
                    );
                    active.handle.abort();
                }
            }
        }

        if tokio::fs::metadata(&self.paths.partial_path).await.is_ok() {
            if let Err(e) = tokio::fs::remove_file(&self.paths.partial_path).await {
                log::warn!("Failed to remove partial file {}: {}", self.paths.partial_path.display(), e);
            }
        }

        true
    }

    /// Record the rate mode. A running transfer keeps the rate it started with.
    pub async fn set_rate_mode(&self, rate_mode: RateMode) {
        self.inner.write().await.rate_mode = rate_mode;
    }

    pub async fn rate_mode(&self) -> RateMode {
        self.inner.read().await.rate_mode
    }

    pub async fn state(&self) -> ItemState {
        self.inner.read().await.state
    }

    pub async fn attempts(&self) -> u32 {
        self.inner.read().await.attempts
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.read().await.last_error.clone()
    }

    /// Path the renderer should open
    ///
    /// The partial path while the download has not completed, the final path
    /// once `Downloaded`. Fails with `NotStarted` before any download.
    pub async fn get_path(&self) -> Result<PathBuf> {
        match self.state().await {
            ItemState::NotRequested => Err(StreamError::NotStarted(self.index)),
            ItemState::Downloaded => Ok(self.paths.final_path.clone()),
            ItemState::Downloading | ItemState::Cancelled | ItemState::Failed => {
                Ok(self.paths.partial_path.clone())
            }
        }
    }

    /// Bytes on disk so far, 0 when no file exists yet
    ///
    /// Takes no lock, so it never waits on the download task.
    pub async fn current_byte_size(&self) -> u64 {
        for path in [&self.paths.final_path, &self.paths.partial_path] {
            if let Ok(metadata) = tokio::fs::metadata(path).await {
                return metadata.len();
            }
        }
        0
    }

    /// Record the duration reported by the renderer when metadata had none
    pub async fn set_probed_duration(&self, seconds: u32) {
        self.inner.write().await.probed_duration = Some(seconds);
    }

    /// Known duration: metadata first, then the probed value
    pub async fn duration_secs(&self) -> Option<u32> {
        match self.metadata.duration_secs {
            Some(secs) => Some(secs),
            None => self.inner.read().await.probed_duration,
        }
    }

    pub async fn snapshot(&self) -> ItemSnapshot {
        let bytes_on_disk = self.current_byte_size().await;
        let inner = self.inner.read().await;
        ItemSnapshot {
            index: self.index,
            title: self.metadata.title.clone(),
            author: self.metadata.author.clone(),
            state: inner.state,
            rate_mode: inner.rate_mode,
            attempts: inner.attempts,
            bytes_on_disk,
            duration_secs: self.metadata.duration_secs.or(inner.probed_duration),
            last_error: inner.last_error.clone(),
        }
    }
}

/// Move the bytes to the final path if the executor left them at the partial path
async fn finalize(request: &DownloadRequest) -> Result<()> {
    if tokio::fs::metadata(&request.final_path).await.is_ok() {
        return Ok(());
    }

    if tokio::fs::metadata(&request.partial_path).await.is_ok() {
        tokio::fs::rename(&request.partial_path, &request.final_path).await?;
        return Ok(());
    }

    Err(StreamError::download_failed(
        request.index,
        "download finished without producing a file",
    ))
}

/// Apply the outcome of attempt `generation` unless it was superseded
///
/// Finalization runs under the write lock, so a cancel either lands before it
/// (and the partial file is never promoted) or finds the item `Downloaded`.
async fn commit(state: &RwLock<ItemInner>, generation: u64, request: &DownloadRequest, result: Result<()>) {
    let index = request.index;
    let mut inner = state.write().await;
    if inner.generation != generation || inner.state != ItemState::Downloading {
        log::debug!("Item {}: dropping result of superseded attempt {}", index, generation);
        return;
    }

    let result = match result {
        Ok(()) => finalize(request).await,
        Err(e) => Err(e),
    };

    inner.active = None;
    match result {
        Ok(()) => {
            inner.state = ItemState::Downloaded;
            log::info!("Item {}: downloaded", index);
        }
        Err(e) => {
            log::error!("Item {}: download failed: {}", index, e);
            inner.state = ItemState::Failed;
            inner.last_error = Some(e.to_string());
        }
    }
}
