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


//! Paged metadata catalog
//!
//! The catalog caches the records of one search query and grows forward only,
//! one fixed-size page at a time, starting from the end of the known window.
//!
//! - A fetch failure is returned as [`StreamError::CatalogUnavailable`] and
//!   leaves the window untouched, so the next navigation retries the same page.
//! - A page without entries marks the source exhausted. Indices past the end
//!   then fail with [`StreamError::NoMoreItems`] without another fetch. A page
//!   whose entries were all malformed still moves the window forward.

pub mod record;
pub mod source;

pub use record::{CatalogPage, MetadataRecord};
pub use source::{HttpMetadataSource, MetadataSource};

use crate::error::{Result, StreamError};
use std::sync::Arc;

/// Forward-growing cache of one query's metadata pages
pub struct Catalog {
    source: Arc<dyn MetadataSource>,
    query: String,
    page_size: usize,
    records: Vec<MetadataRecord>,
    /// Offset of the next page to request
    window_end: usize,
    exhausted: bool,
    fetch_count: usize,
}

impl Catalog {
    pub fn new<S: Into<String>>(source: Arc<dyn MetadataSource>, query: S, page_size: usize) -> Self {
        Self {
            source,
            query: query.into(),
            page_size: page_size.max(1),
            records: Vec::new(),
            window_end: 0,
            exhausted: false,
            fetch_count: 0,
        }
    }

    /// Make sure a record exists at `index`, fetching pages as needed
    pub async fn ensure_available(&mut self, index: usize) -> Result<&MetadataRecord> {
        while self.records.len() <= index {
            if self.exhausted {
                return Err(StreamError::NoMoreItems {
                    index,
                    available: self.records.len(),
                });
            }
            self.fetch_next_page().await?;
        }

        Ok(&self.records[index])
    }

    /// Fetch the page at the end of the window
    ///
    /// Returns the number of records appended, which is zero for an exhausted
    /// source and for a page of malformed entries. Check [`Catalog::is_exhausted`]
    /// to tell them apart.
    pub async fn fetch_next_page(&mut self) -> Result<usize> {
        if self.exhausted {
            return Ok(0);
        }

        let offset = self.window_end;
        self.fetch_count += 1;
        let page = match self.source.fetch_page(&self.query, offset, self.page_size).await {
            Ok(page) => page,
            Err(e) => {
                log::warn!("Catalog fetch for '{}' at offset {} failed: {}", self.query, offset, e);
                return Err(match e {
                    e @ StreamError::CatalogUnavailable { .. } => e,
                    other => StreamError::catalog_unavailable(other.to_string(), offset),
                });
            }
        };

        if page.is_exhausted() {
            log::info!("Catalog for '{}' exhausted at offset {}", self.query, offset);
            self.exhausted = true;
            return Ok(0);
        }

        let count = page.records.len();
        if count < page.entries_seen {
            log::warn!(
                "Catalog page for '{}' at offset {}: {} of {} entries unusable",
                self.query,
                offset,
                page.entries_seen - count,
                page.entries_seen
            );
        }
        log::info!("Fetched {} catalog records for '{}' at offset {}", count, self.query, offset);
        self.records.extend(page.records);
        // Advance by the requested size so skipped entries never cause an overlapping fetch
        self.window_end += self.page_size;

        Ok(count)
    }

    pub fn record(&self, index: usize) -> Option<&MetadataRecord> {
        self.records.get(index)
    }

    pub fn records(&self) -> &[MetadataRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Offset the next fetch would start at
    pub fn window_end(&self) -> usize {
        self.window_end
    }

    /// Number of page fetches issued so far, failed ones included
    pub fn fetch_count(&self) -> usize {
        self.fetch_count
    }
}
