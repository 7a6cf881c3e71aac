//! # Substack Archiver
//!
//! Downloads every post of a Substack publication into self-contained HTML
//! files, one per post, named after the post's publication date and title.
//!
//! ## Features
//!
//! - Lists posts from the publication's `sitemap.xml`
//! - Resolves one authoritative publication date per post (JSON-LD, meta
//!   tags, sitemap `lastmod`, then retrieval time)
//! - Inlines stylesheets and images so files open offline
//! - Strips scripts, embeds and site chrome, adds an attribution line
//! - Skips posts already on disk, so re-runs only fetch what is new
//!
//! ## Usage
//!
//! ```sh
//! substack_archiver -s https://example.substack.com -o ./archive
//! ```
//!
//! ## Architecture
//!
//! 1. **Indexing**: read post URLs (and `lastmod`) from the sitemap
//! 2. **Dating**: resolve each post's publication date from its page
//! 3. **Inlining**: fetch stylesheets and images (images 8 at a time)
//! 4. **Output**: write `YYYY-MM-DD_<title>.html` into the output directory

use clap::Parser;
use std::error::Error;
use std::io::{self, BufRead, Write};
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod fetcher;
mod models;
mod outputs;
mod scrapers;
mod utils;

use cli::Cli;
use fetcher::{Fetcher, RetryPolicy};
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("substack_archiver starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(?args.site_url, ?args.output_dir, args.workers, "Parsed CLI arguments");

    let settings = match args.settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!(site_url = %args.site_url, error = %e, "Site URL is not a valid absolute URL");
            return Err(e.into());
        }
    };

    // Early check: ensure output dir is writable
    if let Err(e) = ensure_writable_dir(&settings.output_dir).await {
        error!(
            path = %settings.output_dir.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let fetcher = Fetcher::new(RetryPolicy::default())?;

    // ---- Index ----
    let articles = scrapers::sitemap::index_articles(&fetcher, &settings).await;

    // ---- Archive ----
    let written = scrapers::post::archive_articles(&fetcher, &settings, &articles).await;

    let elapsed = start_time.elapsed();
    info!(
        listed = articles.len(),
        written,
        output_dir = %settings.output_dir.display(),
        elapsed_secs = elapsed.as_secs_f64(),
        "substack_archiver finished"
    );

    if !args.no_wait {
        print!("Press Enter to exit...");
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
    }

    Ok(())
}
