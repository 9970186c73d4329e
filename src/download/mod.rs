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


//! Item downloads
//!
//! This module handles downloading catalog items to disk.
//!
//! - [`item`] - per-item state machine and the cancellable download task
//! - [`executor`] - the collaborator that moves the bytes (youtube-dl by default)
//! - [`paths`] - title-derived final and partial file names

pub mod executor;
pub mod item;
pub mod paths;

// Re-export commonly used types
pub use executor::{DownloadExecutor, DownloadRequest, YoutubeDlExecutor};
pub use item::{Item, ItemSnapshot, ItemState, RateMode};
pub use paths::OutputPaths;
