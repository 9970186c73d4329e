//! Renderer seam
//!
//! The media renderer is an external collaborator. The engine only needs to
//! load a file (optionally at a position), pause/unpause, and read back the
//! playing flag, position and duration. Renderers that cannot decode a file
//! return [`StreamError::RendererUnsupportedFormat`](crate::StreamError).

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Notifications a renderer emits
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RendererEvent {
    /// Playback of the loaded file began; carries the probed duration if known
    MediaStarted { duration_secs: Option<f64> },
    /// The renderer reached the end of what it could play
    MediaFinished,
}

#[async_trait]
pub trait Renderer: Send + Sync {
    /// Load and play `path` from the start
    async fn load(&self, path: &Path) -> Result<()>;

    /// Load and play `path` starting at `position_secs`
    async fn load_at(&self, path: &Path, position_secs: f64) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn unpause(&self) -> Result<()>;

    async fn is_playing(&self) -> bool;

    /// Current position in seconds. May be missing while the renderer is busy.
    async fn time_position(&self) -> Option<f64>;

    /// Duration of the loaded file in seconds, when the renderer knows it
    async fn duration(&self) -> Option<f64>;
}
