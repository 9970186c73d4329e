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


//! Engine configuration
//!
//! Every tunable of the engine lives here: page size, readiness threshold,
//! polling and tick intervals, the stall threshold, prefetch limits, download
//! rates and the download program. Missing keys in a config file fall back
//! to [`EngineConfig::default`].

use crate::download::RateMode;
use crate::error::{Result, StreamError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default metadata search endpoint (`{query}`, `{start}` and `{count}` are substituted)
pub const DEFAULT_SEARCH_URL_TEMPLATE: &str =
    "https://gdata.youtube.com/feeds/api/videos?q={query}&alt=json&start-index={start}&max-results={count}";

/// 1.5 MiB, enough for the renderer to start without starving immediately
pub const DEFAULT_READINESS_THRESHOLD_BYTES: u64 = 1_572_864;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory that receives downloaded media files
    pub output_directory: PathBuf,

    /// Number of metadata records requested per catalog page
    pub page_size: usize,

    /// Minimum on-disk size before a partial file is handed to the renderer
    pub readiness_threshold_bytes: u64,

    /// Readiness polling interval
    pub poll_interval_ms: u64,

    /// Period of the playback tick driven by the UI timer
    pub tick_interval_ms: u64,

    /// Playback position (seconds) past which a stopped renderer counts as stalled
    pub stall_threshold_secs: f64,

    /// Minimum time between two stall restarts
    pub restart_cooldown_ms: u64,

    /// How many items past the current one prefetch looks at
    pub prefetch_window: usize,

    /// Prefetch only while fewer than this many items ahead are downloaded
    pub prefetch_low_water: usize,

    /// Attempts after which prefetch stops retrying a failed or cancelled item
    pub prefetch_retry_limit: u32,

    /// Rate limit for explicit navigation downloads (KiB/s). Prefetch uses half.
    pub max_download_rate_kib: u32,

    /// Upper bound on waiting for a cancelled download task to wind down
    pub cancel_timeout_ms: u64,

    /// Download program (youtube-dl compatible command line)
    pub executor_program: String,

    /// Format codes in order of preference
    pub preferred_formats: Vec<String>,

    /// Container extension of the final file
    pub container_extension: String,

    /// Search endpoint of the HTTP metadata source
    pub search_url_template: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_directory: default_output_directory(),
            page_size: 10,
            readiness_threshold_bytes: DEFAULT_READINESS_THRESHOLD_BYTES,
            poll_interval_ms: 250,
            tick_interval_ms: 100,
            stall_threshold_secs: 2.0,
            restart_cooldown_ms: 1000,
            prefetch_window: 2,
            prefetch_low_water: 2,
            prefetch_retry_limit: 2,
            max_download_rate_kib: 200,
            cancel_timeout_ms: 2000,
            executor_program: "youtube-dl".to_string(),
            preferred_formats: ["18", "34", "43", "5", "44", "35", "17", "45", "22", "46", "37"]
                .iter()
                .map(|f| f.to_string())
                .collect(),
            container_extension: "mp4".to_string(),
            search_url_template: DEFAULT_SEARCH_URL_TEMPLATE.to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the per-user configuration, or defaults when there is none
    pub fn load_or_default() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => {
                log::info!("Loading configuration from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Save configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// `<config dir>/youstream/config.json`
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("youstream").join("config.json"))
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(StreamError::InvalidConfiguration("page_size must be at least 1".to_string()));
        }
        if self.poll_interval_ms == 0 || self.tick_interval_ms == 0 {
            return Err(StreamError::InvalidConfiguration(
                "poll and tick intervals must be non-zero".to_string(),
            ));
        }
        if !(self.stall_threshold_secs > 0.0) {
            return Err(StreamError::InvalidConfiguration(format!(
                "stall_threshold_secs must be positive, got {}",
                self.stall_threshold_secs
            )));
        }
        if self.max_download_rate_kib < 2 {
            return Err(StreamError::InvalidConfiguration(
                "max_download_rate_kib must be at least 2".to_string(),
            ));
        }
        if self.executor_program.trim().is_empty() {
            return Err(StreamError::InvalidConfiguration("executor_program is empty".to_string()));
        }
        Ok(())
    }

    /// Create the output directory if needed
    pub fn ensure_output_directory(&self) -> Result<&Path> {
        std::fs::create_dir_all(&self.output_directory)?;
        Ok(&self.output_directory)
    }

    /// Rate limit (KiB/s) negotiated for a download in `mode`
    pub fn rate_limit_kib(&self, mode: RateMode) -> u32 {
        match mode {
            RateMode::Full => self.max_download_rate_kib,
            RateMode::Prefetch => self.max_download_rate_kib / 2,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn restart_cooldown(&self) -> Duration {
        Duration::from_millis(self.restart_cooldown_ms)
    }

    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_timeout_ms)
    }
}

/// Default download directory: `<videos>/youstream`, or `./songs`
pub fn default_output_directory() -> PathBuf {
    dirs::video_dir()
        .map(|dir| dir.join("youstream"))
        .unwrap_or_else(|| PathBuf::from("./songs"))
}
