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


//! Single-flight download scheduler
//!
//! The scheduler owns the catalog and the items of one search session and
//! decides which single item downloads at any instant.
//!
//! # Locking
//!
//! - The catalog mutex is the serialization scope of every mutating
//!   operation ([`Scheduler::navigate_to`], [`Scheduler::prefetch_ahead`],
//!   [`Scheduler::stop`]). It may be held across catalog fetches and
//!   cancellation joins.
//! - Item list and session state sit behind their own short-lived locks, so
//!   queries such as [`Scheduler::is_index_downloading`] never wait on a
//!   navigation in progress.
//!
//! # Catalog failures
//!
//! Prefetch extends the catalog when its window reaches past the known
//! records. After such a fetch fails, prefetch stays inside the known records
//! until a navigation succeeds, so a periodic caller does not hammer a failing
//! source.
//!
//! # Single flight
//!
//! `active` names the one item whose download this scheduler started and
//! which is still `Downloading`. It is reconciled against the item's real
//! state at the start of every operation, since downloads finish on their
//! own tasks. Nothing starts while it is set, except navigation, which
//! cancels it first.

use crate::catalog::{Catalog, MetadataSource};
use crate::config::EngineConfig;
use crate::download::{DownloadExecutor, Item, ItemSnapshot, ItemState, RateMode};
use crate::error::{Result, StreamError};
use crate::playback::readiness::{ReadinessOutcome, ReadinessWaiter};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Result of one [`Scheduler::prefetch_ahead`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchOutcome {
    /// Started a prefetch download of this index
    Started(usize),
    /// This index is still downloading; single flight
    Busy(usize),
    /// Enough items ahead are already downloaded
    Satisfied,
    /// The catalog ends inside the window and nothing was eligible
    Exhausted,
    /// Nothing in the window needs downloading (or nothing was navigated to yet)
    Idle,
}

/// Status of a session for display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub query: String,
    pub current_index: Option<usize>,
    pub active_download: Option<usize>,
    pub prefetch_count: usize,
    pub catalog_exhausted: bool,
    pub items: Vec<ItemSnapshot>,
}

#[derive(Debug, Default)]
struct SessionState {
    current_index: Option<usize>,
    active: Option<usize>,
    prefetch_count: usize,
    catalog_exhausted: bool,
    /// A prefetch-triggered catalog fetch failed since the last navigation
    prefetch_fetch_failed: bool,
}

/// Index-based navigation and prefetch over one search session
pub struct Scheduler {
    config: Arc<EngineConfig>,
    executor: Arc<dyn DownloadExecutor>,
    query: String,
    catalog: Mutex<Catalog>,
    items: RwLock<Vec<Arc<Item>>>,
    state: RwLock<SessionState>,
}

impl Scheduler {
    /// Create a session for `query`
    pub fn new<S: Into<String>>(
        config: EngineConfig,
        source: Arc<dyn MetadataSource>,
        executor: Arc<dyn DownloadExecutor>,
        query: S,
    ) -> Result<Self> {
        config.validate()?;
        let query = query.into();
        let catalog = Catalog::new(source, query.clone(), config.page_size);

        Ok(Self {
            config: Arc::new(config),
            executor,
            query,
            catalog: Mutex::new(catalog),
            items: RwLock::new(Vec::new()),
            state: RwLock::new(SessionState::default()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Make `index` the current item and download it at full rate
    ///
    /// A different item that is still downloading is cancelled (and joined)
    /// before the new download starts. Negative indices fail with
    /// `InvalidIndex` before anything is touched.
    pub async fn navigate_to(&self, index: i64) -> Result<Arc<Item>> {
        if index < 0 {
            return Err(StreamError::InvalidIndex(index));
        }
        let index = index as usize;

        let mut catalog = self.catalog.lock().await;
        self.reap_active().await;

        let fetched = catalog.ensure_available(index).await.map(|_| ());
        {
            let mut state = self.state.write().await;
            state.catalog_exhausted = catalog.is_exhausted();
            if fetched.is_ok() {
                state.prefetch_fetch_failed = false;
            }
        }
        fetched?;
        self.sync_items(&catalog).await;

        let previous = self.state.read().await.active;
        if let Some(previous) = previous.filter(|&p| p != index) {
            if let Some(item) = self.item(previous).await {
                log::info!("Navigating to {}: cancelling download of {}", index, previous);
                item.cancel().await;
            }
            self.state.write().await.active = None;
        }

        let item = self
            .item(index)
            .await
            .ok_or_else(|| StreamError::internal(format!("item {} missing after catalog fetch", index)))?;

        let started = item.start_download(RateMode::Full).await;
        let downloading = item.state().await == ItemState::Downloading;
        if downloading && item.rate_mode().await != RateMode::Full {
            // A prefetch in flight becomes the current item and keeps its transfer
            log::debug!("Item {} was prefetching, now current", index);
            item.set_rate_mode(RateMode::Full).await;
        }

        {
            let mut state = self.state.write().await;
            if downloading {
                state.active = Some(index);
            } else if state.active == Some(index) {
                state.active = None;
            }
            if started.is_ok() {
                state.current_index = Some(index);
            }
        }

        started?;
        log::debug!("Current index is now {}", index);
        Ok(item)
    }

    /// Navigate to the item after the current one (or the first)
    pub async fn next(&self) -> Result<Arc<Item>> {
        let target = match self.current_index().await {
            Some(current) => current as i64 + 1,
            None => 0,
        };
        self.navigate_to(target).await
    }

    /// Navigate to the item before the current one
    ///
    /// At index 0 this is `InvalidIndex(-1)` and nothing changes.
    pub async fn previous(&self) -> Result<Arc<Item>> {
        let target = match self.current_index().await {
            Some(current) => current as i64 - 1,
            None => -1,
        };
        self.navigate_to(target).await
    }

    /// Start a speculative download ahead of the current item
    ///
    /// Does nothing while a download is active or while at least
    /// `prefetch_low_water` items ahead are already downloaded. Otherwise
    /// scans `current+1 ..= current+window` in ascending order and starts the
    /// first item that needs downloading, at prefetch rate. Items that failed
    /// or were cancelled are retried until `prefetch_retry_limit` attempts.
    pub async fn prefetch_ahead(&self, window: usize) -> Result<PrefetchOutcome> {
        let mut catalog = self.catalog.lock().await;

        if let Some(active) = self.reap_active().await {
            return Ok(PrefetchOutcome::Busy(active));
        }

        let current = match self.current_index().await {
            Some(current) => current,
            None => return Ok(PrefetchOutcome::Idle),
        };

        let mut downloaded_ahead = 0;
        for item in self.items.read().await.iter().skip(current + 1) {
            if item.state().await == ItemState::Downloaded {
                downloaded_ahead += 1;
            }
        }
        if downloaded_ahead >= self.config.prefetch_low_water {
            return Ok(PrefetchOutcome::Satisfied);
        }

        for index in current + 1..=current + window {
            let needs_fetch = index >= catalog.len() && !catalog.is_exhausted();
            if needs_fetch && self.state.read().await.prefetch_fetch_failed {
                log::debug!("Prefetch: not fetching past index {} until the next navigation", catalog.len());
                return Ok(PrefetchOutcome::Idle);
            }

            match catalog.ensure_available(index).await {
                Ok(_) => {}
                Err(StreamError::NoMoreItems { .. }) => {
                    self.state.write().await.catalog_exhausted = true;
                    self.sync_items(&catalog).await;
                    log::debug!("Prefetch: catalog ends before index {}", index);
                    return Ok(PrefetchOutcome::Exhausted);
                }
                Err(e) => {
                    if matches!(e, StreamError::CatalogUnavailable { .. }) {
                        self.state.write().await.prefetch_fetch_failed = true;
                    }
                    return Err(e);
                }
            }
            self.sync_items(&catalog).await;

            let item = match self.item(index).await {
                Some(item) => item,
                None => continue,
            };

            let eligible = match item.state().await {
                ItemState::NotRequested => true,
                ItemState::Cancelled | ItemState::Failed => {
                    item.attempts().await < self.config.prefetch_retry_limit
                }
                // Already downloading inside the window: leave it alone
                ItemState::Downloading => return Ok(PrefetchOutcome::Busy(index)),
                ItemState::Downloaded => false,
            };

            if eligible {
                item.start_download(RateMode::Prefetch).await?;
                let mut state = self.state.write().await;
                state.active = Some(index);
                state.prefetch_count += 1;
                log::info!("Prefetching item {} ({} ahead of {})", index, index - current, current);
                return Ok(PrefetchOutcome::Started(index));
            }
        }

        Ok(PrefetchOutcome::Idle)
    }

    /// Cancel the active download, if any
    pub async fn stop(&self) -> bool {
        let _catalog = self.catalog.lock().await;
        let active = self.state.write().await.active.take();
        match active {
            Some(index) => match self.item(index).await {
                Some(item) => item.cancel().await,
                None => false,
            },
            None => false,
        }
    }

    /// Whether `index` is fully downloaded. Never fetches.
    pub async fn is_index_downloaded(&self, index: usize) -> bool {
        match self.item(index).await {
            Some(item) => item.state().await == ItemState::Downloaded,
            None => false,
        }
    }

    /// Whether `index` is downloading right now. Never fetches.
    pub async fn is_index_downloading(&self, index: usize) -> bool {
        match self.item(index).await {
            Some(item) => item.state().await == ItemState::Downloading,
            None => false,
        }
    }

    /// Path to hand to the renderer for `index`
    pub async fn path_for(&self, index: usize) -> Result<PathBuf> {
        match self.item(index).await {
            Some(item) => item.get_path().await,
            None => Err(StreamError::NotStarted(index)),
        }
    }

    /// Wait until `index` is playable. Holds no scheduler lock while waiting.
    pub async fn wait_until_playable(&self, index: usize, threshold_bytes: u64) -> Result<ReadinessOutcome> {
        let item = self.item(index).await.ok_or(StreamError::NotStarted(index))?;
        ReadinessWaiter::new(self.config.poll_interval())
            .wait_until_playable(&item, threshold_bytes)
            .await
    }

    pub async fn item(&self, index: usize) -> Option<Arc<Item>> {
        self.items.read().await.get(index).cloned()
    }

    pub async fn current_item(&self) -> Option<Arc<Item>> {
        match self.current_index().await {
            Some(index) => self.item(index).await,
            None => None,
        }
    }

    pub async fn current_index(&self) -> Option<usize> {
        self.state.read().await.current_index
    }

    /// Index of the download in flight, if any
    pub async fn active_download(&self) -> Option<usize> {
        self.reap_active().await
    }

    /// Number of prefetch downloads started in this session
    pub async fn prefetch_count(&self) -> usize {
        self.state.read().await.prefetch_count
    }

    /// Number of items known so far
    pub async fn known_items(&self) -> usize {
        self.items.read().await.len()
    }

    /// Catalog fetches issued so far
    pub async fn catalog_fetch_count(&self) -> usize {
        self.catalog.lock().await.fetch_count()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let active_download = self.reap_active().await;
        let items: Vec<Arc<Item>> = self.items.read().await.clone();

        let mut snapshots = Vec::with_capacity(items.len());
        for item in &items {
            snapshots.push(item.snapshot().await);
        }

        let state = self.state.read().await;
        SessionSnapshot {
            query: self.query.clone(),
            current_index: state.current_index,
            active_download,
            prefetch_count: state.prefetch_count,
            catalog_exhausted: state.catalog_exhausted,
            items: snapshots,
        }
    }

    /// Clear `active` once its item has left `Downloading`
    async fn reap_active(&self) -> Option<usize> {
        let active = self.state.read().await.active;
        let index = active?;

        let still_downloading = match self.item(index).await {
            Some(item) => item.state().await == ItemState::Downloading,
            None => false,
        };

        if still_downloading {
            return Some(index);
        }

        let mut state = self.state.write().await;
        if state.active == Some(index) {
            log::debug!("Download of item {} is no longer active", index);
            state.active = None;
        }
        None
    }

    /// Create items for records the catalog fetched since the last call
    async fn sync_items(&self, catalog: &Catalog) {
        let mut items = self.items.write().await;
        for index in items.len()..catalog.len() {
            if let Some(record) = catalog.record(index) {
                items.push(Arc::new(Item::new(
                    index,
                    record.clone(),
                    self.config.clone(),
                    self.executor.clone(),
                )));
            }
        }
    }
}
