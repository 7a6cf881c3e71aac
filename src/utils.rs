//! Utility functions for filenames, log output, and the output directory.
//!
//! - Filename sanitization and the date+title naming scheme
//! - String truncation for log fields
//! - File system validation for the output directory

use crate::models::ResolvedDate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

static ILLEGAL_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\\/*?:"<>|]"#).expect("static regex"));

/// Strip the characters Windows and Unix refuse in file names.
///
/// Offending characters are removed, not replaced, and surrounding
/// whitespace is trimmed.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(clean_filename("A/B: Test?"), "AB Test");
/// ```
pub fn clean_filename(title: &str) -> String {
    ILLEGAL_FILENAME_CHARS.replace_all(title, "").trim().to_string()
}

/// The archive file name for an article: `YYYY-MM-DD_<clean title>.html`.
///
/// Deterministic in the resolved day and the title, which is what makes
/// re-runs skip already archived posts.
pub fn article_filename(date: &ResolvedDate, title: &str) -> String {
    format!("{}_{}.html", date.day(), clean_filename(title))
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut at `max` bytes (backing off to a char boundary)
/// with an ellipsis and byte count appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then creates and deletes a probe file.
///
/// # Errors
///
/// Returns an error if:
/// - The directory cannot be created
/// - The directory is not writable (permission denied, read-only filesystem, etc.)
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    // Try a small sync write using std fs (simpler error surface)
    let probe_path = path.join("..__probe_write__");
    stdfs::File::create(&probe_path)?;
    let _ = stdfs::remove_file(&probe_path);
    info!("Output directory is writable");
    Ok(())
}
