//! YouStream core: watch search results while they download.
//!
//! Pages a metadata catalog for a query, downloads one item at a time in the
//! background (with slower speculative prefetch of the items ahead), lets
//! playback start once a partial file is big enough, and restarts the
//! renderer at the right offset when playback outruns the download.

pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod playback;
pub mod scheduler;

pub use catalog::{Catalog, CatalogPage, HttpMetadataSource, MetadataRecord, MetadataSource};
pub use config::EngineConfig;
pub use download::{DownloadExecutor, Item, ItemSnapshot, ItemState, RateMode, YoutubeDlExecutor};
pub use error::{Result, StreamError};
pub use playback::{
    open_when_playable, PlaybackSync, ReadinessOutcome, ReadinessWaiter, Renderer, RendererEvent,
    TickOutcome,
};
pub use scheduler::{PrefetchOutcome, Scheduler, SessionSnapshot};
