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


//! Playback on top of downloads in progress
//!
//! - [`readiness`] - wait until a partial file is big enough to play
//! - [`sync`] - per-tick stall detection and restart at the last position
//! - [`renderer`] - the media renderer seam

pub mod readiness;
pub mod renderer;
pub mod sync;

pub use readiness::{ReadinessOutcome, ReadinessWaiter};
pub use renderer::{Renderer, RendererEvent};
pub use sync::{FinishOutcome, PlaybackSync, TickOutcome};

use crate::error::Result;
use crate::scheduler::Scheduler;

/// Navigate to `index`, wait until it is playable and hand it to `renderer`
///
/// Returns the readiness outcome. Nothing is loaded when the download was
/// cancelled or failed before becoming playable.
pub async fn open_when_playable(
    scheduler: &Scheduler,
    index: i64,
    threshold_bytes: u64,
    renderer: &dyn Renderer,
) -> Result<ReadinessOutcome> {
    let item = scheduler.navigate_to(index).await?;

    let outcome = ReadinessWaiter::from_config(scheduler.config())
        .wait_until_playable(&item, threshold_bytes)
        .await?;

    if !outcome.is_playable() {
        log::warn!("Item {} is not playable: {:?}", item.index(), outcome);
        return Ok(outcome);
    }

    let mut path = item.get_path().await?;
    if tokio::fs::metadata(&path).await.is_err() {
        // Finished and renamed between the wait and the lookup
        path = item.get_path().await?;
    }

    log::info!("Playing item {} from {}", item.index(), path.display());
    renderer.load(&path).await?;
    Ok(outcome)
}
