//! Error types for YouStream
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are grouped by the component that raises them (catalog, download,
//! scheduling, playback) so callers can decide whether to retry, report
//! "no more items", or give up on the current item.
//!
//! ## Propagation policy
//!
//! - State-machine violations (cancelling twice, starting an item that is
//!   already downloaded) are absorbed as no-ops and never reach this type.
//! - Resource and transport failures are returned to the immediate caller.
//!   A failed catalog fetch is [`StreamError::CatalogUnavailable`], never an
//!   empty page, so "fetch failed" stays distinguishable from
//!   [`StreamError::NoMoreItems`].

use thiserror::Error;

/// Result type alias using StreamError
pub type Result<T> = std::result::Result<T, StreamError>;

/// Main error type for the streaming engine
#[derive(Error, Debug)]
pub enum StreamError {
    // ===== Catalog Errors =====

    /// Metadata fetch failed (transport or parse). Retry at the next navigation attempt.
    #[error("Catalog unavailable at offset {offset}: {message}")]
    CatalogUnavailable {
        message: String,
        /// Start offset of the page that could not be fetched
        offset: usize,
    },

    /// The metadata source is exhausted before the requested index
    #[error("No more items: index {index} is past the end of the catalog ({available} available)")]
    NoMoreItems {
        index: usize,
        /// Number of items known when the source reported exhaustion
        available: usize,
    },

    // ===== Scheduling Errors =====

    /// Negative or otherwise malformed index. Rejected before any state is touched.
    #[error("Invalid index: {0}")]
    InvalidIndex(i64),

    /// Path or size queried before any download began for that index
    #[error("Download not started for index {0}")]
    NotStarted(usize),

    // ===== Download Errors =====

    /// The download task exited abnormally
    #[error("Download of item {index} failed: {message}")]
    DownloadFailed {
        index: usize,
        message: String,
    },

    /// The download program could not be launched
    #[error("Download program not found: {0}")]
    ExecutorNotFound(String),

    // ===== Playback Errors =====

    /// The renderer refused the file (propagated, never recovered by the engine)
    #[error("Unable to load {0}: unsupported format?")]
    RendererUnsupportedFormat(String),

    // ===== Configuration Errors =====

    /// Configuration is invalid or incomplete
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ===== General Errors =====

    /// Operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Operation timed out
    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    /// Internal error that should not normally occur
    #[error("Internal error: {0}")]
    InternalError(String),

    // ===== External Library Errors =====

    /// HTTP client error from reqwest
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// URL construction error
    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StreamError {
    /// Create a CatalogUnavailable error for the page at `offset`
    pub fn catalog_unavailable<S: Into<String>>(message: S, offset: usize) -> Self {
        StreamError::CatalogUnavailable {
            message: message.into(),
            offset,
        }
    }

    /// Create a DownloadFailed error for item `index`
    pub fn download_failed<S: Into<String>>(index: usize, message: S) -> Self {
        StreamError::DownloadFailed {
            index,
            message: message.into(),
        }
    }

    /// Create an InternalError with a message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        StreamError::InternalError(message.into())
    }

    /// Check if error is retryable
    ///
    /// Returns `true` for failures that may succeed on a later attempt:
    /// - Catalog fetch failures
    /// - Download failures (the item stays eligible for re-download)
    /// - Timeouts
    /// - Connection-level HTTP errors
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::CatalogUnavailable { .. }
            | StreamError::DownloadFailed { .. }
            | StreamError::Timeout(_) => true,
            StreamError::ReqwestError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Check if error means the catalog has no item at the requested index
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, StreamError::NoMoreItems { .. })
    }

    /// Check if error is a caller mistake rather than a runtime failure
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            StreamError::InvalidIndex(_)
                | StreamError::NotStarted(_)
                | StreamError::InvalidConfiguration(_)
        )
    }

    /// Get user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            StreamError::CatalogUnavailable { .. } => {
                "Could not reach the video catalog. Check your connection and try again.".to_string()
            }
            StreamError::NoMoreItems { .. } => "No more videos for this search.".to_string(),
            StreamError::ExecutorNotFound(program) => {
                format!(
                    "'{}' is required but was not found. Please install it and ensure it's in your PATH.",
                    program
                )
            }
            StreamError::DownloadFailed { index, .. } => {
                format!("Video #{} could not be downloaded. It will be retried later.", index + 1)
            }
            _ => self.to_string(),
        }
    }
}
