//! Command-line interface definitions for the archiver.
//!
//! Every option has a default, so running the binary with no arguments
//! archives the default publication into `./Downloads`. Site and output
//! directory can also come from the environment.

use crate::models::ArchiveSettings;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Publication archived when no site is given.
pub const DEFAULT_SITE_URL: &str = "https://rationaloptimistsociety.substack.com";

/// Command-line arguments for the archiver.
///
/// # Examples
///
/// ```sh
/// # Archive the default publication into ./Downloads
/// substack_archiver
///
/// # Another publication, somewhere else, without the final prompt
/// substack_archiver -s https://example.substack.com -o ./archive --no-wait
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Root URL of the publication to archive
    #[arg(short, long, env = "ARCHIVE_SITE_URL", default_value = DEFAULT_SITE_URL)]
    pub site_url: String,

    /// Directory the HTML files are written to
    #[arg(short, long, env = "ARCHIVE_OUTPUT_DIR", default_value = "Downloads")]
    pub output_dir: PathBuf,

    /// Number of images fetched in parallel for one post
    #[arg(short, long, default_value_t = 8)]
    pub workers: usize,

    /// Path fragment that marks a post URL in the sitemap
    #[arg(long, default_value = "/p/")]
    pub article_path: String,

    /// Exit right after the summary instead of waiting for Enter
    #[arg(long)]
    pub no_wait: bool,
}

impl Cli {
    /// Validate the arguments into runtime settings.
    pub fn settings(&self) -> Result<ArchiveSettings, url::ParseError> {
        Ok(ArchiveSettings {
            site_url: Url::parse(&self.site_url)?,
            output_dir: self.output_dir.clone(),
            image_workers: self.workers.max(1),
            article_path: self.article_path.clone(),
            post_write_delay: (Duration::from_millis(1000), Duration::from_millis(1500)),
        })
    }
}
