//! Size-gated readiness
//!
//! Playback may start on a partial file once it holds enough bytes. The
//! waiter polls the item's on-disk size and state at a fixed interval and
//! takes no lock the download task needs.

use crate::config::EngineConfig;
use crate::download::{Item, ItemState};
use crate::error::{Result, StreamError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Why a readiness wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessOutcome {
    /// The file reached the threshold
    ThresholdReached { bytes: u64 },
    /// The download finished below the threshold (short clip)
    Completed { bytes: u64 },
    /// The download was cancelled or failed; do not play this item
    Aborted(ItemState),
}

impl ReadinessOutcome {
    pub fn is_playable(&self) -> bool {
        !matches!(self, ReadinessOutcome::Aborted(_))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReadinessWaiter {
    poll_interval: Duration,
}

impl ReadinessWaiter {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.poll_interval())
    }

    /// Wait until `item` holds `threshold_bytes`, completes, or aborts
    ///
    /// There is no timeout; cancelling the item is the forced exit. Waiting on
    /// an item whose download never started fails with `NotStarted`.
    pub async fn wait_until_playable(&self, item: &Item, threshold_bytes: u64) -> Result<ReadinessOutcome> {
        loop {
            let state = item.state().await;
            let outcome = match state {
                ItemState::NotRequested => return Err(StreamError::NotStarted(item.index())),
                ItemState::Cancelled | ItemState::Failed => Some(ReadinessOutcome::Aborted(state)),
                ItemState::Downloading | ItemState::Downloaded => {
                    let bytes = item.current_byte_size().await;
                    if bytes >= threshold_bytes {
                        Some(ReadinessOutcome::ThresholdReached { bytes })
                    } else if state == ItemState::Downloaded {
                        Some(ReadinessOutcome::Completed { bytes })
                    } else {
                        None
                    }
                }
            };

            if let Some(outcome) = outcome {
                log::debug!("Item {} readiness: {:?}", item.index(), outcome);
                return Ok(outcome);
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Run the wait on its own task
    pub fn spawn_wait(&self, item: Arc<Item>, threshold_bytes: u64) -> JoinHandle<Result<ReadinessOutcome>> {
        let waiter = *self;
        tokio::spawn(async move { waiter.wait_until_playable(&item, threshold_bytes).await })
    }
}
