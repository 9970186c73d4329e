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


//! Title-derived output paths
//!
//! Every item downloads to `<output_dir>/<sanitized title>.<ext>`. While the
//! transfer runs the bytes go to the same name with a `.part` suffix, so the
//! partial file is always distinguishable from a finished one.

use std::path::{Path, PathBuf};

/// Suffix appended to the final file name while a download is in flight
pub const PARTIAL_SUFFIX: &str = ".part";

// 255 bytes on every platform we build for
const MAX_COMPONENT_LENGTH: usize = 255;

/// Final and partial location of one item's media file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub final_path: PathBuf,
    pub partial_path: PathBuf,
}

impl OutputPaths {
    /// Derive both paths from the item's title
    ///
    /// Empty (or fully stripped) titles fall back to `item-<index>`.
    pub fn for_title(output_dir: &Path, title: &str, index: usize, extension: &str) -> Self {
        let extension = extension.trim_start_matches('.');
        let mut stem = sanitize_filename(title);
        if stem.is_empty() {
            stem = format!("item-{}", index);
        }

        // Leave room for ".<ext>.part"
        let max_stem = MAX_COMPONENT_LENGTH.saturating_sub(extension.len() + 1 + PARTIAL_SUFFIX.len());
        let stem = truncate_component(&stem, max_stem);

        let final_path = output_dir.join(format!("{}.{}", stem, extension));
        let partial_path = partial_path_for(&final_path);

        Self { final_path, partial_path }
    }
}

/// `<final>.part`
pub fn partial_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Sanitize a title for use as a file name
///
/// Reserved characters are swapped for look-alikes, double quotes become
/// single quotes, and leading/trailing whitespace and dots are trimmed.
/// Returns an empty string when nothing usable is left.
pub fn sanitize_filename(name: &str) -> String {
    let result: String = name.chars().map(replace_char).collect();
    result.trim().trim_matches('.').trim().to_string()
}

fn replace_char(c: char) -> char {
    match c {
        '"' => '\'',
        '<' => '＜', // U+FF1C fullwidth less-than sign
        '>' => '＞', // U+FF1E fullwidth greater-than sign
        ':' => '_',
        '|' => '⏐', // U+23D0 vertical line extension
        '?' => '？', // U+FF1F fullwidth question mark
        '*' => '✱', // U+2731 heavy asterisk
        '/' => '∕',  // U+2215 division slash
        '\\' => '_',
        // youtube-dl output templates treat '%' specially
        '%' => '％', // U+FF05 fullwidth percent sign
        c if c.is_control() => '_',
        c => c,
    }
}

/// Truncate to at most `max_bytes` on a UTF-8 boundary
pub fn truncate_component(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let mut index = max_bytes;
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }

    text[..index].trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("test<>file"), "test＜＞file");
        assert_eq!(sanitize_filename("AC/DC: Live"), "AC∕DC_ Live");
        assert_eq!(sanitize_filename("what|now?"), "what⏐now？");
        assert_eq!(sanitize_filename("a*b\\c"), "a✱b_c");
        assert_eq!(sanitize_filename("100% lofi"), "100％ lofi");
    }

    #[test]
    fn test_double_quotes_become_single() {
        assert_eq!(sanitize_filename(r#"The "Best" Mix"#), "The 'Best' Mix");
    }

    #[test]
    fn test_trim_whitespace_and_dots() {
        assert_eq!(sanitize_filename("  test  "), "test");
        assert_eq!(sanitize_filename("test..."), "test");
        assert_eq!(sanitize_filename("...  "), "");
    }

    #[test]
    fn test_output_paths() {
        let paths = OutputPaths::for_title(Path::new("/tmp/songs"), "lofi beats", 0, "mp4");
        assert_eq!(paths.final_path, PathBuf::from("/tmp/songs/lofi beats.mp4"));
        assert_eq!(paths.partial_path, PathBuf::from("/tmp/songs/lofi beats.mp4.part"));
    }

    #[test]
    fn test_empty_title_falls_back_to_index() {
        let paths = OutputPaths::for_title(Path::new("out"), " .. ", 7, ".webm");
        assert_eq!(paths.final_path, PathBuf::from("out/item-7.webm"));
    }

    #[test]
    fn test_long_title_is_truncated() {
        let title = "é".repeat(300);
        let paths = OutputPaths::for_title(Path::new("out"), &title, 0, "mp4");
        let name = paths.partial_path.file_name().unwrap().to_str().unwrap();
        assert!(name.len() <= 255);
        assert!(name.ends_with(".mp4.part"));
    }
}
