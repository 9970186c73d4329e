//! Catalog records and pages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata of one remote media item
///
/// Produced once per item by the metadata source. Only `duration_secs` may be
/// filled in later, when the renderer probes a file whose duration was unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub author: String,
    pub title: String,
    pub source_url: String,
    pub published: Option<DateTime<Utc>>,
    pub duration_secs: Option<u32>,
}

impl MetadataRecord {
    pub fn new<A: Into<String>, T: Into<String>, U: Into<String>>(author: A, title: T, source_url: U) -> Self {
        Self {
            author: author.into(),
            title: title.into(),
            source_url: source_url.into(),
            published: None,
            duration_secs: None,
        }
    }

    pub fn with_duration(mut self, seconds: u32) -> Self {
        self.duration_secs = Some(seconds);
        self
    }

    /// `m:ss`, or `--:--` while unknown
    pub fn duration_label(&self) -> String {
        match self.duration_secs {
            Some(secs) => format!("{}:{:02}", secs / 60, secs % 60),
            None => "--:--".to_string(),
        }
    }
}

/// One fetched page of the catalog. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogPage {
    /// Zero-based offset of the first record
    pub start_offset: usize,
    /// Page size the page was requested with
    pub page_size: usize,
    pub records: Vec<MetadataRecord>,
    /// Entries the source returned, malformed ones included
    pub entries_seen: usize,
}

impl CatalogPage {
    /// Page whose entries all parsed
    pub fn new(start_offset: usize, page_size: usize, records: Vec<MetadataRecord>) -> Self {
        Self {
            start_offset,
            page_size,
            entries_seen: records.len(),
            records,
        }
    }

    /// A page without any entries means the source is exhausted
    ///
    /// A page whose entries were all malformed is not.
    pub fn is_exhausted(&self) -> bool {
        self.entries_seen == 0
    }
}
