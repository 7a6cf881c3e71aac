//! Data models shared by the lister, the date resolver and the post archiver.
//!
//! - [`ArticleRef`]: one post discovered in the sitemap
//! - [`PublishedAt`]: a parsed timestamp, either zoned or naive
//! - [`DateSource`] / [`ResolvedDate`]: where an article's date came from
//! - [`ArticleRecord`]: a fetched post on its way to disk
//! - [`ArchiveSettings`]: resolved runtime configuration

use chrono::{DateTime, Local, NaiveDateTime};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// A post URL discovered in the site index, with the index's own
/// (coarse) timestamp when it had one.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleRef {
    /// Absolute URL of the post page.
    pub url: String,
    /// The sitemap `lastmod`, used only when the page carries no date.
    pub fallback: Option<PublishedAt>,
}

/// A parsed timestamp.
///
/// Timestamps that carried an explicit offset are stored converted to the
/// local timezone. Timestamps without one are kept naive and never
/// converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishedAt {
    Zoned(DateTime<Local>),
    Naive(NaiveDateTime),
}

impl PublishedAt {
    /// Convert zoned instants to the local timezone; naive ones pass through.
    pub fn to_local(self) -> Self {
        match self {
            PublishedAt::Zoned(dt) => PublishedAt::Zoned(dt.with_timezone(&Local)),
            naive @ PublishedAt::Naive(_) => naive,
        }
    }

    /// Render with a chrono `strftime` pattern.
    pub fn format(&self, pattern: &str) -> String {
        match self {
            PublishedAt::Zoned(dt) => dt.format(pattern).to_string(),
            PublishedAt::Naive(dt) => dt.format(pattern).to_string(),
        }
    }
}

/// Where a resolved date came from, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSource {
    /// `datePublished` inside a JSON-LD block.
    LinkedData,
    /// `article:published_time` / `itemprop="datePublished"` meta tag.
    MetaTag,
    /// The sitemap `lastmod` handed in by the lister.
    Sitemap,
    /// Wall clock at resolution time. Last resort.
    RetrievalTime,
}

impl DateSource {
    pub const PRIORITY: [DateSource; 4] = [
        DateSource::LinkedData,
        DateSource::MetaTag,
        DateSource::Sitemap,
        DateSource::RetrievalTime,
    ];
}

impl fmt::Display for DateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DateSource::LinkedData => "json-ld",
            DateSource::MetaTag => "meta",
            DateSource::Sitemap => "sitemap",
            DateSource::RetrievalTime => "retrieval-time",
        };
        f.write_str(name)
    }
}

/// The one authoritative publication date of an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDate {
    pub at: PublishedAt,
    pub source: DateSource,
}

impl ResolvedDate {
    /// Day precision, used in filenames (`2024-03-01`).
    pub fn day(&self) -> String {
        self.at.format("%Y-%m-%d")
    }

    /// Minute precision, used in the attribution line (`2024-03-01 18:30`).
    pub fn minute(&self) -> String {
        self.at.format("%Y-%m-%d %H:%M")
    }

    /// True when no source on the page or in the index had a date.
    pub fn is_degraded(&self) -> bool {
        self.source == DateSource::RetrievalTime
    }
}

/// A fetched post, dated and titled, waiting to be inlined and written.
#[derive(Debug, Clone)]
pub struct ArticleRecord {
    pub url: Url,
    pub title: String,
    pub date: ResolvedDate,
    /// The page as downloaded.
    pub html: String,
}

impl ArticleRecord {
    /// Text of the block placed under the post title.
    pub fn attribution(&self) -> String {
        if self.date.is_degraded() {
            format!(
                "Archived: {} (publication date unknown) | Source: {}",
                self.date.minute(),
                self.url
            )
        } else {
            format!("Published: {} | Source: {}", self.date.minute(), self.url)
        }
    }
}

/// Runtime configuration, resolved from the command line.
#[derive(Debug, Clone)]
pub struct ArchiveSettings {
    /// Root of the publication, e.g. `https://example.substack.com`.
    pub site_url: Url,
    /// Directory the HTML files are written to.
    pub output_dir: PathBuf,
    /// Width of the per-article image fetch pool.
    pub image_workers: usize,
    /// Sitemap `<loc>` substring that marks a post.
    pub article_path: String,
    /// Random pause after each written article, as `(min, max)`.
    pub post_write_delay: (Duration, Duration),
}

impl ArchiveSettings {
    /// Location of the site index.
    pub fn sitemap_url(&self) -> String {
        format!("{}/sitemap.xml", self.site_url.as_str().trim_end_matches('/'))
    }
}
