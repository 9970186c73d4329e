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


//! Playback/download reconciliation
//!
//! [`PlaybackSync`] is driven by a fixed-interval tick from whoever owns the
//! timer. Each tick it reconciles three signals that change independently:
//! whether the renderer is playing, the position it reports, and whether the
//! current item is still downloading.
//!
//! A renderer that stopped past the stall threshold while its file is still
//! growing has most likely run out of bytes, so the tick asks for a reload at
//! the last known position instead of advancing to the next item.
//!
//! Ticks take `&mut self`; the owner serializes them.

use super::renderer::{Renderer, RendererEvent};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::scheduler::{PrefetchOutcome, Scheduler};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What the owner of the tick should do next
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Nothing has been navigated to yet
    Idle,
    /// Reload `path` at `at` seconds
    Restart { index: usize, path: PathBuf, at: f64 },
    /// A restart was issued recently and the renderer has not resumed yet
    RestartPending,
    /// Playback is healthy; carries the result of the opportunistic prefetch
    Continue(PrefetchOutcome),
}

/// How a media-finished notification was classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishOutcome {
    /// The file ran dry mid-download; the next tick restarts at the kept position
    Stalled,
    /// The item really ended
    Finished(PrefetchOutcome),
}

pub struct PlaybackSync {
    scheduler: Arc<Scheduler>,
    tick_interval: Duration,
    stall_threshold_secs: f64,
    restart_cooldown: Duration,
    prefetch_window: usize,
    last_position: f64,
    /// Item the position belongs to
    position_index: Option<usize>,
    media_duration: Option<f64>,
    last_restart: Option<Instant>,
    restart_pending: bool,
}

impl PlaybackSync {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        let config: &EngineConfig = scheduler.config();
        let tick_interval = config.tick_interval();
        let stall_threshold_secs = config.stall_threshold_secs;
        let restart_cooldown = config.restart_cooldown();
        let prefetch_window = config.prefetch_window;

        Self {
            scheduler,
            tick_interval,
            stall_threshold_secs,
            restart_cooldown,
            prefetch_window,
            last_position: 0.0,
            position_index: None,
            media_duration: None,
            last_restart: None,
            restart_pending: false,
        }
    }

    /// Last known playback position in seconds
    pub fn last_known_position(&self) -> f64 {
        self.last_position
    }

    /// Whether a stopped renderer at the last known position counts as stalled
    pub fn must_restart(&self, renderer_playing: bool, downloading: bool) -> bool {
        !renderer_playing && downloading && self.last_position > self.stall_threshold_secs
    }

    /// One tick of the playback timer
    ///
    /// `position` is what the renderer reported, if anything. Zero, negative
    /// and NaN readings count as missing; while missing, the position advances
    /// by the tick interval as long as the renderer says it is playing.
    pub async fn on_tick(&mut self, renderer_playing: bool, position: Option<f64>) -> Result<TickOutcome> {
        let current = match self.scheduler.current_index().await {
            Some(current) => current,
            None => return Ok(TickOutcome::Idle),
        };
        self.follow_index(current);

        match position.filter(|p| p.is_finite() && *p > 0.0) {
            Some(p) => self.last_position = p,
            None if renderer_playing => self.last_position += self.tick_interval.as_secs_f64(),
            None => {}
        }

        if renderer_playing {
            self.restart_pending = false;
        }

        let downloading = self.scheduler.is_index_downloading(current).await;
        if self.must_restart(renderer_playing, downloading) {
            if self.restart_pending && self.in_cooldown() {
                return Ok(TickOutcome::RestartPending);
            }

            let path = self.scheduler.path_for(current).await?;
            log::info!(
                "Playback of item {} stalled at {:.1}s while downloading, restarting",
                current,
                self.last_position
            );
            self.last_restart = Some(Instant::now());
            self.restart_pending = true;
            return Ok(TickOutcome::Restart {
                index: current,
                path,
                at: self.last_position,
            });
        }

        let prefetch = self.scheduler.prefetch_ahead(self.prefetch_window).await?;
        Ok(TickOutcome::Continue(prefetch))
    }

    /// Tick against a live renderer, applying a restart if one is due
    pub async fn tick_renderer(&mut self, renderer: &dyn Renderer) -> Result<TickOutcome> {
        let playing = renderer.is_playing().await;
        let position = renderer.time_position().await;

        let outcome = self.on_tick(playing, position).await?;
        if let TickOutcome::Restart { path, at, .. } = &outcome {
            renderer.load_at(path, *at).await?;
        }
        Ok(outcome)
    }

    /// Dispatch a renderer notification
    ///
    /// Returns the classification for `MediaFinished`, `None` otherwise.
    pub async fn on_event(&mut self, event: RendererEvent) -> Result<Option<FinishOutcome>> {
        match event {
            RendererEvent::MediaStarted { duration_secs } => {
                self.on_media_started(duration_secs).await;
                Ok(None)
            }
            RendererEvent::MediaFinished => self.on_media_finished().await.map(Some),
        }
    }

    /// The renderer started playing the current item
    pub async fn on_media_started(&mut self, renderer_duration: Option<f64>) {
        if let Some(current) = self.scheduler.current_index().await {
            self.follow_index(current);
        }
        let duration = renderer_duration.filter(|d| d.is_finite() && *d > 0.0);
        self.media_duration = duration;

        if let (Some(duration), Some(item)) = (duration, self.scheduler.current_item().await) {
            if item.metadata().duration_secs.is_none() {
                item.set_probed_duration(duration.round() as u32).await;
                log::debug!("Item {}: probed duration {:.0}s", item.index(), duration);
            }
        }
    }

    /// The renderer reached the end of what it could play
    ///
    /// If the item is still downloading and playback had passed the stall
    /// threshold, the file ran dry: the position is kept for the restart.
    /// Otherwise the position resets and prefetch gets a chance to run.
    pub async fn on_media_finished(&mut self) -> Result<FinishOutcome> {
        if let Some(current) = self.scheduler.current_index().await {
            self.follow_index(current);
            let downloading = self.scheduler.is_index_downloading(current).await;
            if downloading && self.last_position > self.stall_threshold_secs {
                log::info!("Item {} ran out of data at {:.1}s", current, self.last_position);
                return Ok(FinishOutcome::Stalled);
            }
        }

        self.last_position = 0.0;
        self.media_duration = None;
        let prefetch = self.scheduler.prefetch_ahead(self.prefetch_window).await?;
        Ok(FinishOutcome::Finished(prefetch))
    }

    /// Played fraction of the current item, when its duration is known
    pub async fn progress_fraction(&self) -> Option<f64> {
        let duration = match self.media_duration {
            Some(duration) => duration,
            None => self.scheduler.current_item().await?.duration_secs().await? as f64,
        };
        if duration <= 0.0 {
            return None;
        }
        Some((self.last_position / duration).clamp(0.0, 1.0))
    }

    fn in_cooldown(&self) -> bool {
        self.last_restart
            .map(|at| at.elapsed() < self.restart_cooldown)
            .unwrap_or(false)
    }

    // A position belongs to one item; navigation starts the next from zero
    fn follow_index(&mut self, current: usize) {
        if self.position_index != Some(current) {
            self.position_index = Some(current);
            self.last_position = 0.0;
            self.media_duration = None;
            self.restart_pending = false;
        }
    }
}
