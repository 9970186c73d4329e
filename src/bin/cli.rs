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


use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use youstream_core::catalog::Catalog;
use youstream_core::download::ItemState;
use youstream_core::playback::{
    open_when_playable, FinishOutcome, PlaybackSync, Renderer, RendererEvent, TickOutcome,
};
use youstream_core::{EngineConfig, HttpMetadataSource, Scheduler, StreamError, YoutubeDlExecutor};

#[derive(Parser)]
#[command(name = "youstream-cli")]
#[command(about = "YouStream CLI - watch search results while they download", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the per-user config)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Download directory
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List search results
    Search {
        /// Search terms
        #[arg(required = true)]
        terms: Vec<String>,
        /// Number of pages to list
        #[arg(short, long, default_value_t = 1)]
        pages: usize,
    },
    /// Download one search result
    Fetch {
        /// Search terms
        #[arg(required = true)]
        terms: Vec<String>,
        /// Zero-based result index
        #[arg(short, long, default_value_t = 0)]
        index: i64,
    },
    /// Play search results one after another while they download
    Watch {
        /// Search terms
        #[arg(required = true)]
        terms: Vec<String>,
        /// Player program (mpv compatible command line)
        #[arg(long, default_value = "mpv")]
        player: String,
        /// Zero-based result index to start at
        #[arg(short, long, default_value_t = 0)]
        start: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::load_or_default()?,
    };
    if let Some(output) = cli.output {
        config.output_directory = output;
    }
    config.validate()?;

    match cli.command {
        Commands::Search { terms, pages } => search(config, &terms.join(" "), pages).await,
        Commands::Fetch { terms, index } => fetch(config, &terms.join(" "), index).await,
        Commands::Watch { terms, player, start } => watch(config, &terms.join(" "), &player, start).await,
    }
}

async fn search(config: EngineConfig, query: &str, pages: usize) -> Result<()> {
    let source = Arc::new(HttpMetadataSource::from_config(&config)?);
    let mut catalog = Catalog::new(source, query, config.page_size);

    for _ in 0..pages {
        catalog.fetch_next_page().await?;
        if catalog.is_exhausted() {
            break;
        }
    }

    if catalog.is_empty() {
        println!("No results for '{}'", query);
        return Ok(());
    }

    for (index, record) in catalog.records().iter().enumerate() {
        println!(
            "{:>3}. {} - {} [{}]",
            index,
            record.title,
            record.author,
            record.duration_label()
        );
    }
    Ok(())
}

fn build_scheduler(config: EngineConfig, query: &str) -> Result<Arc<Scheduler>> {
    config.ensure_output_directory()?;
    let source = Arc::new(HttpMetadataSource::from_config(&config)?);
    let executor = Arc::new(YoutubeDlExecutor::from_config(&config));
    Ok(Arc::new(Scheduler::new(config, source, executor, query)?))
}

async fn fetch(config: EngineConfig, query: &str, index: i64) -> Result<()> {
    let threshold = config.readiness_threshold_bytes;
    let poll = config.poll_interval();
    let scheduler = build_scheduler(config, query)?;

    tokio::select! {
        result = fetch_item(&scheduler, index, threshold, poll) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, cancelling download");
            scheduler.stop().await;
            Ok(())
        }
    }
}

async fn fetch_item(scheduler: &Scheduler, index: i64, threshold: u64, poll: Duration) -> Result<()> {
    let item = scheduler.navigate_to(index).await.map_err(report)?;
    println!("Downloading #{}: {}", item.index(), item.metadata().title);

    let outcome = scheduler.wait_until_playable(item.index(), threshold).await?;
    if outcome.is_playable() {
        println!("Playable: {}", item.get_path().await?.display());
    }

    loop {
        match item.state().await {
            ItemState::Downloading => tokio::time::sleep(poll).await,
            ItemState::Downloaded => {
                println!("Done: {}", item.get_path().await?.display());
                return Ok(());
            }
            state => {
                let reason = item.last_error().await.unwrap_or_else(|| format!("{:?}", state));
                anyhow::bail!("download did not complete: {}", reason);
            }
        }
    }
}

async fn watch(config: EngineConfig, query: &str, player: &str, start: i64) -> Result<()> {
    let threshold = config.readiness_threshold_bytes;
    let tick = config.tick_interval();
    let scheduler = build_scheduler(config, query)?;
    let renderer = PlayerRenderer::new(player);

    let result = tokio::select! {
        result = play_session(&scheduler, &renderer, start, threshold, tick) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    };

    renderer.stop().await;
    scheduler.stop().await;
    result
}

/// Play from `start` onwards, advancing when an item really finishes
async fn play_session(
    scheduler: &Arc<Scheduler>,
    renderer: &PlayerRenderer,
    start: i64,
    threshold: u64,
    tick: Duration,
) -> Result<()> {
    let mut sync = PlaybackSync::new(scheduler.clone());
    let mut index = start;

    loop {
        let outcome = match open_when_playable(scheduler, index, threshold, renderer).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_exhaustion() => {
                println!("{}", e.user_message());
                return Ok(());
            }
            Err(e) => return Err(report(e)),
        };

        if !outcome.is_playable() {
            println!("Skipping #{}: download was aborted", index);
            index += 1;
            continue;
        }

        if let Some(item) = scheduler.current_item().await {
            println!("▶ #{} {} - {}", item.index(), item.metadata().title, item.metadata().author);
        }
        sync.on_event(RendererEvent::MediaStarted {
            duration_secs: renderer.duration().await,
        })
        .await?;

        let mut ticker = tokio::time::interval(tick);
        loop {
            ticker.tick().await;

            if let Some(success) = renderer.take_exit().await {
                // A player that bails out right away could not decode the file
                if !success && sync.last_known_position() < 1.0 {
                    let err = StreamError::RendererUnsupportedFormat(format!("#{}", index));
                    println!("{}", err.user_message());
                    break;
                }
                match sync.on_event(RendererEvent::MediaFinished).await {
                    Ok(Some(FinishOutcome::Stalled)) => continue,
                    Ok(_) => break,
                    Err(e) => {
                        log::warn!("{}", e);
                        break;
                    }
                }
            }

            match sync.tick_renderer(renderer).await {
                Ok(TickOutcome::Restart { at, .. }) => println!("  … buffering, resuming at {:.0}s", at),
                Ok(_) => {}
                Err(e) => log::warn!("Tick failed: {}", e),
            }
        }

        index += 1;
    }
}

fn report(e: StreamError) -> anyhow::Error {
    let message = e.user_message();
    anyhow::Error::new(e).context(message)
}

struct PlayerProcess {
    child: Child,
    path: PathBuf,
    offset: f64,
    started: Instant,
}

/// Renderer backed by an external player process, one process per load
///
/// Positions are estimated from wall-clock time since the load.
struct PlayerRenderer {
    program: String,
    process: Mutex<Option<PlayerProcess>>,
    paused_at: Mutex<Option<(PathBuf, f64)>>,
}

impl PlayerRenderer {
    fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            process: Mutex::new(None),
            paused_at: Mutex::new(None),
        }
    }

    async fn spawn(&self, path: &Path, offset: f64) -> youstream_core::Result<()> {
        let mut process = self.process.lock().await;
        if let Some(mut old) = process.take() {
            let _ = old.child.kill().await;
        }

        let mut command = Command::new(&self.program);
        if offset > 0.0 {
            command.arg(format!("--start={:.1}", offset));
        }
        let child = command
            .arg(path)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    StreamError::InvalidConfiguration(format!("player '{}' not found", self.program))
                } else {
                    StreamError::IoError(e)
                }
            })?;

        *process = Some(PlayerProcess {
            child,
            path: path.to_path_buf(),
            offset,
            started: Instant::now(),
        });
        *self.paused_at.lock().await = None;
        Ok(())
    }

    /// Exit status of a player that stopped on its own, reported once
    async fn take_exit(&self) -> Option<bool> {
        let mut process = self.process.lock().await;
        let status = match process.as_mut() {
            Some(p) => p.child.try_wait().ok().flatten()?,
            None => return None,
        };
        *process = None;
        Some(status.success())
    }

    async fn stop(&self) {
        if let Some(mut p) = self.process.lock().await.take() {
            let _ = p.child.kill().await;
        }
    }
}

#[async_trait]
impl Renderer for PlayerRenderer {
    async fn load(&self, path: &Path) -> youstream_core::Result<()> {
        self.spawn(path, 0.0).await
    }

    async fn load_at(&self, path: &Path, position_secs: f64) -> youstream_core::Result<()> {
        self.spawn(path, position_secs).await
    }

    async fn pause(&self) -> youstream_core::Result<()> {
        // No control channel to the player: stop it and remember where
        if let Some(mut p) = self.process.lock().await.take() {
            let position = p.offset + p.started.elapsed().as_secs_f64();
            let _ = p.child.kill().await;
            *self.paused_at.lock().await = Some((p.path, position));
        }
        Ok(())
    }

    async fn unpause(&self) -> youstream_core::Result<()> {
        let paused = self.paused_at.lock().await.take();
        match paused {
            Some((path, position)) => self.spawn(&path, position).await,
            None => Ok(()),
        }
    }

    async fn is_playing(&self) -> bool {
        let mut process = self.process.lock().await;
        match process.as_mut() {
            Some(p) => matches!(p.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn time_position(&self) -> Option<f64> {
        let mut process = self.process.lock().await;
        let p = process.as_mut()?;
        match p.child.try_wait() {
            Ok(None) => Some(p.offset + p.started.elapsed().as_secs_f64()),
            _ => None,
        }
    }

    async fn duration(&self) -> Option<f64> {
        None
    }
}
