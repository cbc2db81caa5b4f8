//! Utility functions for file naming and path manipulation

use crate::config::FileCollisionAction;
use crate::error::{Error, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

static INVALID_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/*?:"<>|]"#).unwrap());

static PART_MARKERS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"[Pp]art\s*\d+").unwrap(),
        Regex::new(r"第\s*\d+\s*[话集話]").unwrap(),
        Regex::new(r"[Pp]\s*\d+").unwrap(),
    ]
});

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]").unwrap());

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Get a unique path for a file, handling collisions according to the specified action
///
/// # Arguments
///
/// * `path` - The desired file path
/// * `action` - How to handle file collisions
///
/// # Returns
///
/// Returns the final path to use. For Rename action, this may have a suffix added.
/// For Skip action, returns an error if the file already exists.
/// For Overwrite action, returns the original path unchanged.
///
/// # Examples
///
/// ```
/// use dash_dl::utils::get_unique_path;
/// use dash_dl::config::FileCollisionAction;
/// use std::path::Path;
///
/// let path = Path::new("/tmp/dash-dl-doc/Demo.mp4");
/// let unique = get_unique_path(path, FileCollisionAction::Rename).unwrap();
/// // If Demo.mp4 exists, returns Demo (1).mp4
/// // If that exists too, returns Demo (2).mp4, etc.
/// ```
pub fn get_unique_path(path: &Path, action: FileCollisionAction) -> Result<PathBuf> {
    match action {
        FileCollisionAction::Overwrite => Ok(path.to_path_buf()),
        FileCollisionAction::Skip => {
            if path.exists() {
                return Err(Error::FileCollision {
                    path: path.to_path_buf(),
                    reason: "file already exists and collision action is skip".to_string(),
                });
            }
            Ok(path.to_path_buf())
        }
        FileCollisionAction::Rename => {
            if !path.exists() {
                return Ok(path.to_path_buf());
            }

            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| Error::InvalidPath {
                    path: path.to_path_buf(),
                    reason: "cannot extract file stem".to_string(),
                })?;

            let extension = path.extension().and_then(|e| e.to_str());

            let parent = path.parent().ok_or_else(|| Error::InvalidPath {
                path: path.to_path_buf(),
                reason: "cannot extract parent directory".to_string(),
            })?;

            for i in 1..=MAX_RENAME_ATTEMPTS {
                let new_name = match extension {
                    Some(ext) => format!("{} ({}).{}", stem, i, ext),
                    None => format!("{} ({})", stem, i),
                };
                let new_path = parent.join(new_name);
                if !new_path.exists() {
                    return Ok(new_path);
                }
            }

            Err(Error::FileCollision {
                path: path.to_path_buf(),
                reason: format!(
                    "could not find unique filename after {} attempts",
                    MAX_RENAME_ATTEMPTS
                ),
            })
        }
    }
}

/// Replace characters that are invalid in file names with `_`
///
/// Leading and trailing whitespace and dots are trimmed. Returns an empty
/// string when nothing usable remains; callers pick their own fallback.
///
/// # Examples
///
/// ```
/// use dash_dl::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("a/b: c?"), "a_b_ c_");
/// ```
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let replaced = INVALID_FILENAME_CHARS.replace_all(name, "_");
    replaced
        .trim_matches(|c: char| c.is_whitespace() || c == '.')
        .to_string()
}

/// Derive a series folder name from the title of its first part
///
/// Part markers (`Part 3`, `第3话`, `P3`) and punctuation are removed and
/// whitespace collapsed. When nothing is left the raw title is returned.
#[must_use]
pub fn clean_series_title(title: &str) -> String {
    let mut cleaned = title.to_string();
    for marker in PART_MARKERS.iter() {
        cleaned = marker.replace_all(&cleaned, "").into_owned();
    }
    cleaned = NON_WORD.replace_all(&cleaned, "").into_owned();
    cleaned = WHITESPACE_RUN.replace_all(&cleaned, " ").trim().to_string();

    if cleaned.is_empty() {
        title.trim().to_string()
    } else {
        cleaned
    }
}

/// Size of a file on disk, or 0 when it does not exist
pub(crate) async fn file_len(path: &Path) -> std::io::Result<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}
