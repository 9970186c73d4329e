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


//! Metadata sources
//!
//! A [`MetadataSource`] turns `(query, start_offset, page_size)` into a
//! [`CatalogPage`]. Any transport or parse failure is reported as
//! [`StreamError::CatalogUnavailable`]; only a well-formed response without
//! entries is an empty (exhausted) page.
//!
//! # Feed format
//!
//! [`HttpMetadataSource`] reads the JSON video feed format:
//!
//! ```json
//! { "feed": { "entry": [ {
//!     "author": [ { "name": { "$t": "chillhop" } } ],
//!     "link": [ { "href": "https://www.youtube.com/watch?v=..." } ],
//!     "updated": { "$t": "2013-05-01T12:34:56.000Z" },
//!     "media$group": {
//!         "media$title": { "$t": "lofi beats" },
//!         "yt$duration": { "seconds": "215" }
//!     }
//! } ] } }
//! ```

use super::record::{CatalogPage, MetadataRecord};
use crate::config::EngineConfig;
use crate::error::{Result, StreamError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Ordered, paginated source of metadata records
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch the page starting at zero-based `start_offset`
    async fn fetch_page(&self, query: &str, start_offset: usize, page_size: usize) -> Result<CatalogPage>;
}

/// HTTP/JSON metadata source driven by a search URL template
pub struct HttpMetadataSource {
    client: Client,
    url_template: String,
}

impl HttpMetadataSource {
    /// Create a source from a template containing `{query}`, `{start}` and `{count}`
    pub fn new<S: Into<String>>(url_template: S) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            url_template: url_template.into(),
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::new(config.search_url_template.clone())
    }

    /// Build the request URL. The feed's `start` index is 1-based.
    pub fn build_url(&self, query: &str, start_offset: usize, page_size: usize) -> Result<url::Url> {
        let terms = query
            .split_whitespace()
            .map(|term| urlencoding::encode(term).into_owned())
            .collect::<Vec<_>>()
            .join("+");

        let raw = self
            .url_template
            .replace("{query}", &terms)
            .replace("{start}", &(start_offset + 1).to_string())
            .replace("{count}", &page_size.to_string());

        Ok(url::Url::parse(&raw)?)
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataSource {
    async fn fetch_page(&self, query: &str, start_offset: usize, page_size: usize) -> Result<CatalogPage> {
        let url = self.build_url(query, start_offset, page_size)?;
        log::debug!("Fetching catalog page: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StreamError::catalog_unavailable(e.to_string(), start_offset))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::catalog_unavailable(
                format!("HTTP {}", status),
                start_offset,
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| StreamError::catalog_unavailable(e.to_string(), start_offset))?;

        parse_feed(&body, start_offset, page_size)
    }
}

/// Parse a feed document into a page
///
/// Entries without a title or link are skipped.
pub fn parse_feed(body: &str, start_offset: usize, page_size: usize) -> Result<CatalogPage> {
    let document: Value = serde_json::from_str(body)
        .map_err(|e| StreamError::catalog_unavailable(format!("malformed feed: {}", e), start_offset))?;

    let feed = document
        .get("feed")
        .ok_or_else(|| StreamError::catalog_unavailable("response has no feed", start_offset))?;

    let entries = match feed.get("entry") {
        Some(Value::Array(entries)) => entries.as_slice(),
        Some(_) => {
            return Err(StreamError::catalog_unavailable("feed entry is not a list", start_offset));
        }
        // A feed past the last result carries no entry list at all
        None => &[],
    };

    let mut records = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        match parse_entry(entry) {
            Some(record) => records.push(record),
            None => log::warn!("Skipping malformed catalog entry at offset {}", start_offset + i),
        }
    }

    Ok(CatalogPage {
        start_offset,
        page_size,
        records,
        entries_seen: entries.len(),
    })
}

fn parse_entry(entry: &Value) -> Option<MetadataRecord> {
    let title = text_at(entry, "/media$group/media$title/$t")?;
    let source_url = entry.pointer("/link/0/href")?.as_str()?.to_string();
    let author = text_at(entry, "/author/0/name/$t").unwrap_or_default();

    let published = text_at(entry, "/updated/$t")
        .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
        .map(|t| t.with_timezone(&Utc));

    let duration_secs = entry
        .pointer("/media$group/yt$duration/seconds")
        .and_then(as_seconds)
        .or_else(|| entry.pointer("/media$group/media$content/0/duration").and_then(as_seconds));

    Some(MetadataRecord {
        author,
        title,
        source_url,
        published,
        duration_secs,
    })
}

fn text_at(entry: &Value, pointer: &str) -> Option<String> {
    entry.pointer(pointer)?.as_str().map(|s| s.to_string())
}

// Durations appear both as numbers and as numeric strings
fn as_seconds(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
