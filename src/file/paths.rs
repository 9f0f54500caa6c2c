// audible-converter - AAX conversion and activation bytes discovery
// Copyright (C) 2025 audible-converter contributors
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


//! File naming for uploads, intermediates, chunks and archives
//!
//! | File | Name |
//! |------|------|
//! | upload copy | `YYYYmmdd_HHMMSS_<secure name>` |
//! | intermediate | `<stem>_temp.mp3` |
//! | chunk | `<stem>_chunk_NNN.mp3` (1-based) |
//! | archive | `<stem>_converted.zip` |

use chrono::Local;
use std::path::{Path, PathBuf};

/// Reduce an uploaded file name to a safe basename
///
/// Keeps ASCII letters, digits, `.`, `-` and `_`; everything else becomes
/// `_`. Directory components are dropped. Returns `None` when nothing usable
/// is left.
pub fn secure_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let cleaned: String = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Resolve a requested download name inside `output_dir`
///
/// Rejects anything that is not a plain file name (separators, `..`, empty).
pub fn safe_child_path(output_dir: &Path, requested: &str) -> Option<PathBuf> {
    let plain = !requested.is_empty()
        && requested != "."
        && requested != ".."
        && !requested.contains(['/', '\\'])
        && !requested.contains("..");
    plain.then(|| output_dir.join(requested))
}

/// Builds the names used by one conversion job
#[derive(Debug, Clone)]
pub struct PathBuilder {
    stem: String,
}

impl PathBuilder {
    /// `file_name` is the sanitized upload name
    pub fn new(file_name: &str) -> Self {
        let stem = Path::new(file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "audiobook".to_string());
        Self { stem }
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    /// Timestamp-prefixed copy of `file_name` for the upload area
    pub fn timestamped(file_name: &str) -> String {
        format!("{}_{}", Local::now().format("%Y%m%d_%H%M%S"), file_name)
    }

    pub fn intermediate_mp3(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(format!("{}_temp.mp3", self.stem))
    }

    pub fn chunk_file_name(&self, index: usize) -> String {
        format!("{}_chunk_{:03}.mp3", self.stem, index)
    }

    pub fn zip_name(&self) -> String {
        format!("{}_converted.zip", self.stem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_filename() {
        assert_eq!(secure_filename("My Book.aax").as_deref(), Some("My_Book.aax"));
        assert_eq!(secure_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(secure_filename("C:\\Users\\me\\Book.aa").as_deref(), Some("Book.aa"));
        assert_eq!(secure_filename("Bücher.aax").as_deref(), Some("B_cher.aax"));
        assert_eq!(secure_filename("..").as_deref(), None);
        assert_eq!(secure_filename("").as_deref(), None);
    }

    #[test]
    fn test_safe_child_path() {
        let out = Path::new("/srv/output");
        assert_eq!(
            safe_child_path(out, "book_converted.zip"),
            Some(PathBuf::from("/srv/output/book_converted.zip"))
        );
        assert!(safe_child_path(out, "../secret.txt").is_none());
        assert!(safe_child_path(out, "a/b.zip").is_none());
        assert!(safe_child_path(out, "..").is_none());
        assert!(safe_child_path(out, "").is_none());
    }

    #[test]
    fn test_path_builder_names() {
        let paths = PathBuilder::new("Project_Hail_Mary.aax");
        assert_eq!(paths.stem(), "Project_Hail_Mary");
        assert_eq!(paths.chunk_file_name(1), "Project_Hail_Mary_chunk_001.mp3");
        assert_eq!(paths.chunk_file_name(12), "Project_Hail_Mary_chunk_012.mp3");
        assert_eq!(paths.zip_name(), "Project_Hail_Mary_converted.zip");
        assert_eq!(
            paths.intermediate_mp3(Path::new("/tmp/job")),
            PathBuf::from("/tmp/job/Project_Hail_Mary_temp.mp3")
        );
    }

    #[test]
    fn test_timestamped_prefix() {
        let name = PathBuilder::timestamped("book.aax");
        assert!(name.ends_with("_book.aax"));
        assert_eq!(name.len(), "YYYYmmdd_HHMMSS_book.aax".len());
    }
}
