//! Article discovery from the publication's `sitemap.xml`.
//!
//! Every `<url>` whose `<loc>` contains the article path (`/p/` on
//! Substack) becomes an [`ArticleRef`]. The entry's `<lastmod>` is kept as
//! a coarse fallback date for posts whose pages carry no date of their own.

use crate::fetcher::Fetcher;
use crate::models::{ArchiveSettings, ArticleRef};
use crate::scrapers::dates::parse_timestamp;
use serde::Deserialize;
use tracing::{debug, error, info, instrument};

#[derive(Debug, Deserialize)]
struct UrlSet {
    #[serde(rename = "url", default)]
    urls: Vec<UrlEntry>,
}

#[derive(Debug, Deserialize)]
struct UrlEntry {
    loc: Option<String>,
    lastmod: Option<String>,
}

/// Parse a sitemap document into article references, in document order.
///
/// An unparseable `lastmod` only costs that entry its fallback date.
pub fn parse_sitemap(xml: &str, article_path: &str) -> Result<Vec<ArticleRef>, quick_xml::DeError> {
    let set: UrlSet = quick_xml::de::from_str(xml)?;

    let articles = set
        .urls
        .into_iter()
        .filter_map(|entry| {
            let url = entry.loc?.trim().to_string();
            if !url.contains(article_path) {
                return None;
            }
            let fallback = entry.lastmod.as_deref().and_then(|raw| {
                let parsed = parse_timestamp(raw);
                if parsed.is_none() {
                    debug!(%url, lastmod = %raw, "Ignoring unparseable lastmod");
                }
                parsed
            });
            Some(ArticleRef { url, fallback })
        })
        .collect();

    Ok(articles)
}

/// Index the site's articles.
///
/// A failed fetch or a malformed sitemap is logged and yields an empty list;
/// the batch then simply has nothing to do.
#[instrument(level = "info", skip_all, fields(sitemap = %settings.sitemap_url()))]
pub async fn index_articles(fetcher: &Fetcher, settings: &ArchiveSettings) -> Vec<ArticleRef> {
    let sitemap_url = settings.sitemap_url();

    let xml = match fetcher.fetch_document(&sitemap_url).await {
        Ok(xml) => xml,
        Err(e) => {
            error!(error = %e, "Sitemap fetch failed");
            return Vec::new();
        }
    };

    match parse_sitemap(&xml, &settings.article_path) {
        Ok(articles) => {
            info!(count = articles.len(), "Indexed articles from sitemap");
            articles
        }
        Err(e) => {
            error!(error = %e, "Sitemap could not be parsed");
            Vec::new()
        }
    }
}
