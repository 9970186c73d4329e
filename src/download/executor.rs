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


//! Download executors
//!
//! An executor moves the bytes of one source URL onto disk. It writes to
//! the request's partial path during the transfer and leaves the result at
//! the final path (or at the partial path, which the item then renames).
//!
//! Executors are cancelled by dropping the future returned from
//! [`DownloadExecutor::download`], so they must release their resources on
//! drop. [`YoutubeDlExecutor`] spawns its child with `kill_on_drop`.

use crate::config::EngineConfig;
use crate::error::{Result, StreamError};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;

/// Lines of stderr kept for the failure message
const STDERR_TAIL_LINES: usize = 5;

/// Everything an executor needs for one transfer
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRequest {
    /// Catalog index of the item, for logging and errors
    pub index: usize,
    pub source_url: String,
    pub final_path: PathBuf,
    pub partial_path: PathBuf,
    /// Rate limit in KiB/s
    pub rate_limit_kib: u32,
}

/// Collaborator that fetches the bytes of one item
#[async_trait]
pub trait DownloadExecutor: Send + Sync {
    /// Name of the executor (for logging)
    fn name(&self) -> &'static str;

    /// Run the transfer to completion
    async fn download(&self, request: &DownloadRequest) -> Result<()>;
}

/// Progress reported by a youtube-dl compatible program
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    pub percent: f32,
    pub total: String,
    pub speed: String,
    pub eta: Option<String>,
}

/// Parse a progress line like `[download]  12.5% of 3.20MiB at 100.00KiB/s ETA 00:30`
pub fn parse_progress(line: &str) -> Option<TransferProgress> {
    lazy_static! {
        static ref PROGRESS_RE: Regex = Regex::new(
            r"\[download\]\s+(\d+\.?\d*)%\s+of\s+~?\s*(\d+\.?\d*\s*\w+)(?:\s+at\s+(\S+/s|Unknown speed))?(?:\s+ETA\s+(\S+))?"
        )
        .unwrap();
    }

    let caps = PROGRESS_RE.captures(line)?;
    let percent: f32 = caps.get(1)?.as_str().parse().ok()?;

    Some(TransferProgress {
        percent,
        total: caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
        speed: caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_else(|| "?".to_string()),
        eta: caps.get(4).map(|m| m.as_str().to_string()),
    })
}

/// Executor that shells out to youtube-dl (or a compatible fork)
#[derive(Debug, Clone)]
pub struct YoutubeDlExecutor {
    program: String,
    formats: Vec<String>,
}

impl YoutubeDlExecutor {
    pub fn new<S: Into<String>>(program: S, formats: Vec<String>) -> Self {
        Self {
            program: program.into(),
            formats,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.executor_program.clone(), config.preferred_formats.clone())
    }

    /// Command line arguments for `request`
    pub fn build_args(&self, request: &DownloadRequest) -> Vec<String> {
        // The output template treats '%' as a field marker
        let output = request.final_path.to_string_lossy().replace('%', "%%");

        let mut args = vec!["-o".to_string(), output];
        if !self.formats.is_empty() {
            args.push("-f".to_string());
            args.push(self.formats.join("/"));
        }
        args.push("-r".to_string());
        args.push(format!("{}K", request.rate_limit_kib));
        args.push("--newline".to_string());
        args.push("--no-playlist".to_string());
        args.push(request.source_url.clone());
        args
    }
}

#[async_trait]
impl DownloadExecutor for YoutubeDlExecutor {
    fn name(&self) -> &'static str {
        "youtube-dl"
    }

    async fn download(&self, request: &DownloadRequest) -> Result<()> {
        let args = self.build_args(request);
        log::debug!("Spawning {} {}", self.program, args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    StreamError::ExecutorNotFound(self.program.clone())
                } else {
                    StreamError::download_failed(request.index, format!("Failed to execute {}: {}", self.program, e))
                }
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            StreamError::download_failed(request.index, "Failed to capture executor stdout")
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            StreamError::download_failed(request.index, "Failed to capture executor stderr")
        })?;

        // Spawn task to log progress
        let index = request.index;
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut last_logged = -10.0f32;
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(progress) = parse_progress(&line) {
                    if progress.percent - last_logged >= 10.0 || progress.percent >= 100.0 {
                        last_logged = progress.percent;
                        log::debug!(
                            "Item {}: {:.1}% of {} at {}",
                            index,
                            progress.percent,
                            progress.total,
                            progress.speed
                        );
                    }
                }
            }
        });

        // Keep the stderr tail for the failure message
        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_task = tokio::spawn({
            let tail = tail.clone();
            async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut tail = tail.lock().await;
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
        });

        let status = child.wait().await?;
        let _ = stderr_task.await;
        log::debug!("{} exited for item {} with {}", self.program, request.index, status);

        if !status.success() {
            let tail = tail.lock().await;
            let detail = tail.iter().cloned().collect::<Vec<_>>().join(" | ");
            return Err(StreamError::download_failed(
                request.index,
                format!("{} exited with {}: {}", self.program, status, detail),
            ));
        }

        Ok(())
    }
}
