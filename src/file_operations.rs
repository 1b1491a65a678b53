//! Filename and path handling for downloaded media
//!
//! This module turns catalog metadata into filesystem-safe file names,
//! derives the final and temporary paths of a transfer, and decides what
//! happens when the final file is already present.

use std::path::{Path, PathBuf};

/// Suffix appended to the final file name while a transfer is in progress
pub const TEMP_SUFFIX: &str = ".temp";

/// Maximum length (in characters) of a sanitized file name
const MAX_FILENAME_CHARS: usize = 200;

/// Longest suffix after the final dot that is still treated as an extension
/// when a name has to be shortened
const MAX_EXTENSION_CHARS: usize = 16;

/// Sanitizes a string for use in filenames by replacing problematic characters
///
/// - Reserved characters `< > : " / \ | ? *` and control characters become `-`
/// - Runs of `-` are collapsed into a single `-`
/// - Leading/trailing `-` and whitespace are trimmed
/// - Names longer than 200 characters are shortened, keeping the extension
///
/// The function is total and idempotent: sanitizing an already sanitized
/// name returns it unchanged.
pub fn sanitize_filename(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len());

    for c in name.chars() {
        let c = match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '-',
            c if c.is_control() => '-',
            c => c,
        };

        // Collapse runs of dashes
        if c == '-' && sanitized.ends_with('-') {
            continue;
        }
        sanitized.push(c);
    }

    let trimmed = trim_name(&sanitized);
    if trimmed.chars().count() <= MAX_FILENAME_CHARS {
        return trimmed.to_string();
    }

    shorten(trimmed)
}

fn trim_name(name: &str) -> &str {
    name.trim_matches(|c: char| c == '-' || c.is_whitespace())
}

/// Shortens an over-long name so the result stays within the length limit
fn shorten(name: &str) -> String {
    if let Some((base, extension)) = name.rsplit_once('.') {
        let extension_chars = extension.chars().count();
        if !base.is_empty() && extension_chars > 0 && extension_chars <= MAX_EXTENSION_CHARS {
            let keep = MAX_FILENAME_CHARS - extension_chars - 1;
            let base: String = base.chars().take(keep).collect();
            return format!("{}.{}", trim_name(&base), extension);
        }
    }

    let truncated: String = name.chars().take(MAX_FILENAME_CHARS).collect();
    trim_name(&truncated).to_string()
}

/// Builds the canonical `SxxEyy` token for an episode
pub fn episode_token(season_number: u32, index: u32) -> String {
    format!("S{:02}E{:02}", season_number, index)
}

/// Builds the file name for a movie: `"{title} ({year}).{container}"`
///
/// Movies without a year are named `"{title}.{container}"`.
///
/// # Examples
///
/// ```
/// use plex_downloader::movie_filename;
///
/// assert_eq!(movie_filename("Arrival", Some(2016), "mkv"), "Arrival (2016).mkv");
/// ```
pub fn movie_filename(title: &str, year: Option<u32>, container: &str) -> String {
    let name = match year {
        Some(year) => format!("{} ({}).{}", title, year, container),
        None => format!("{}.{}", title, container),
    };
    sanitize_filename(&name)
}

/// Builds the file name for an episode:
/// `"{show} - S{season:02}E{index:02} - {title}.{container}"`
///
/// # Examples
///
/// ```
/// use plex_downloader::episode_filename;
///
/// assert_eq!(
///     episode_filename("The Wire", 1, 3, "The Buys", "mkv"),
///     "The Wire - S01E03 - The Buys.mkv"
/// );
/// ```
pub fn episode_filename(
    show_title: &str,
    season_number: u32,
    index: u32,
    episode_title: &str,
    container: &str,
) -> String {
    let name = format!(
        "{} - {} - {}.{}",
        show_title,
        episode_token(season_number, index),
        episode_title,
        container
    );
    sanitize_filename(&name)
}

/// Paths involved in a single transfer
///
/// Created at the start of a transfer and discarded afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTarget {
    /// Sanitized file name
    pub filename: String,
    /// Where the finished file ends up
    pub final_path: PathBuf,
    /// Where bytes are written while the transfer runs
    pub temp_path: PathBuf,
}

impl TransferTarget {
    /// Derives the final and temporary paths for `filename` inside `output_dir`
    pub fn new(output_dir: &Path, filename: String) -> Self {
        let final_path = output_dir.join(&filename);
        let temp_path = output_dir.join(format!("{}{}", filename, TEMP_SUFFIX));
        Self {
            filename,
            final_path,
            temp_path,
        }
    }
}

/// Result of checking the final path before a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDecision {
    /// Download (and possibly overwrite)
    Proceed,
    /// Leave the existing file alone
    Skip,
}

/// Decides whether a transfer to `final_path` should go ahead
///
/// A missing file always proceeds. An existing file is skipped in batch mode
/// without consulting `confirm_overwrite`; otherwise the transfer proceeds
/// only if `confirm_overwrite` answers `true`.
pub fn resolve_conflict<F>(
    final_path: &Path,
    batch_mode: bool,
    confirm_overwrite: F,
) -> ConflictDecision
where
    F: FnOnce(&Path) -> bool,
{
    if !final_path.exists() {
        return ConflictDecision::Proceed;
    }

    if batch_mode {
        return ConflictDecision::Skip;
    }

    if confirm_overwrite(final_path) {
        ConflictDecision::Proceed
    } else {
        ConflictDecision::Skip
    }
}
