//! In-process fakes for the engine's collaborators

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use youstream_core::catalog::{CatalogPage, MetadataRecord, MetadataSource};
use youstream_core::download::{DownloadExecutor, DownloadRequest, Item, ItemState};
use youstream_core::error::{Result, StreamError};
use youstream_core::playback::Renderer;
use youstream_core::{EngineConfig, Scheduler};

pub const KIB: usize = 1024;

/// Serves `total` numbered records, with injectable one-shot failures
pub struct ScriptedSource {
    total: usize,
    failing_offsets: Mutex<HashSet<usize>>,
    broken_offsets: Mutex<HashSet<usize>>,
    fetched_offsets: Mutex<Vec<usize>>,
}

impl ScriptedSource {
    pub fn new(total: usize) -> Arc<Self> {
        Arc::new(Self {
            total,
            failing_offsets: Mutex::new(HashSet::new()),
            broken_offsets: Mutex::new(HashSet::new()),
            fetched_offsets: Mutex::new(Vec::new()),
        })
    }

    /// The next fetch at `offset` fails as a transport error
    pub fn fail_once_at(&self, offset: usize) {
        self.failing_offsets.lock().unwrap().insert(offset);
    }

    /// Every fetch at `offset` fails until [`recover`](Self::recover)
    pub fn fail_at(&self, offset: usize) {
        self.broken_offsets.lock().unwrap().insert(offset);
    }

    pub fn recover(&self, offset: usize) {
        self.broken_offsets.lock().unwrap().remove(&offset);
    }

    pub fn fetched_offsets(&self) -> Vec<usize> {
        self.fetched_offsets.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetched_offsets.lock().unwrap().len()
    }
}

#[async_trait]
impl MetadataSource for ScriptedSource {
    async fn fetch_page(&self, query: &str, start_offset: usize, page_size: usize) -> Result<CatalogPage> {
        self.fetched_offsets.lock().unwrap().push(start_offset);

        let broken = self.broken_offsets.lock().unwrap().contains(&start_offset);
        if broken || self.failing_offsets.lock().unwrap().remove(&start_offset) {
            return Err(StreamError::catalog_unavailable("connection reset by peer", start_offset));
        }

        let end = (start_offset + page_size).min(self.total);
        let records = (start_offset..end)
            .map(|i| {
                MetadataRecord::new(
                    "uploader",
                    format!("{} {}", query, i),
                    format!("https://video.example/watch?v={}", i),
                )
            })
            .collect();

        Ok(CatalogPage::new(start_offset, page_size, records))
    }
}

/// Writes `chunks` chunks of `chunk_bytes` to the partial path, one per
/// `interval`, then waits for the gate to be open before reporting success.
pub struct ScriptedExecutor {
    chunk_bytes: usize,
    chunks: usize,
    interval: Duration,
    gate: watch::Sender<bool>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    requests: Mutex<Vec<DownloadRequest>>,
}

impl ScriptedExecutor {
    /// Executor whose downloads finish as soon as their bytes are written
    pub fn new(chunk_bytes: usize, chunks: usize, interval: Duration) -> Arc<Self> {
        let (gate, _) = watch::channel(true);
        Arc::new(Self {
            chunk_bytes,
            chunks,
            interval,
            gate,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Executor whose downloads stay in flight until [`release`](Self::release)
    pub fn held(chunk_bytes: usize, chunks: usize, interval: Duration) -> Arc<Self> {
        let executor = Self::new(chunk_bytes, chunks, interval);
        executor.hold();
        executor
    }

    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Highest number of transfers ever running at once
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<DownloadRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_for(&self, index: usize) -> Option<DownloadRequest> {
        self.requests().into_iter().rev().find(|r| r.index == index)
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DownloadExecutor for ScriptedExecutor {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn download(&self, request: &DownloadRequest) -> Result<()> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        self.requests.lock().unwrap().push(request.clone());

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&request.partial_path)
            .await?;

        let chunk = vec![0u8; self.chunk_bytes];
        for _ in 0..self.chunks {
            file.write_all(&chunk).await?;
            file.flush().await?;
            tokio::time::sleep(self.interval).await;
        }

        let mut gate = self.gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| StreamError::internal("gate dropped"))?;
        Ok(())
    }
}

/// Renderer that records what it was asked to load
#[derive(Default)]
pub struct RecordingRenderer {
    pub loads: Mutex<Vec<(PathBuf, Option<f64>)>>,
    pub playing: AtomicBool,
    pub position: Mutex<Option<f64>>,
}

impl RecordingRenderer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_state(&self, playing: bool, position: Option<f64>) {
        self.playing.store(playing, Ordering::SeqCst);
        *self.position.lock().unwrap() = position;
    }

    pub fn loads(&self) -> Vec<(PathBuf, Option<f64>)> {
        self.loads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Renderer for RecordingRenderer {
    async fn load(&self, path: &Path) -> Result<()> {
        self.loads.lock().unwrap().push((path.to_path_buf(), None));
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn load_at(&self, path: &Path, position_secs: f64) -> Result<()> {
        self.loads.lock().unwrap().push((path.to_path_buf(), Some(position_secs)));
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.playing.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn unpause(&self) -> Result<()> {
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    async fn time_position(&self) -> Option<f64> {
        *self.position.lock().unwrap()
    }

    async fn duration(&self) -> Option<f64> {
        None
    }
}

/// Fast-polling configuration writing into `dir`
pub fn test_config(dir: &Path) -> EngineConfig {
    EngineConfig {
        output_directory: dir.to_path_buf(),
        poll_interval_ms: 10,
        cancel_timeout_ms: 1000,
        restart_cooldown_ms: 60_000,
        ..Default::default()
    }
}

pub fn scheduler(
    config: EngineConfig,
    source: Arc<ScriptedSource>,
    executor: Arc<ScriptedExecutor>,
    query: &str,
) -> Arc<Scheduler> {
    Arc::new(Scheduler::new(config, source, executor, query).expect("valid config"))
}

pub async fn wait_for_state(item: &Item, state: ItemState) {
    for _ in 0..500 {
        if item.state().await == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("item {} never reached {:?} (is {:?})", item.index(), state, item.state().await);
}

pub async fn wait_for_bytes(item: &Item, bytes: u64) {
    for _ in 0..500 {
        if item.current_byte_size().await >= bytes {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("item {} never reached {} bytes", item.index(), bytes);
}

/// Number of items currently downloading
pub async fn downloading_count(scheduler: &Scheduler) -> usize {
    scheduler
        .snapshot()
        .await
        .items
        .iter()
        .filter(|item| item.state == ItemState::Downloading)
        .count()
}
