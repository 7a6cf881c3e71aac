//! Publication date resolution.
//!
//! A post's date is taken from the first source that yields one, in the
//! order of [`DateSource::PRIORITY`]:
//!
//! 1. `datePublished` in a JSON-LD block
//! 2. the `article:published_time` (or `itemprop="datePublished"`) meta tag
//! 3. the sitemap `lastmod` supplied by the lister
//! 4. the wall clock, flagged as degraded
//!
//! Parse failures in any source just mean "not found here"; they never
//! surface as errors.

use crate::models::{DateSource, PublishedAt, ResolvedDate};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, warn};

static LINKED_DATA: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).expect("static selector"));
static META_PUBLISHED: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[property="article:published_time"]"#).expect("static selector")
});
static META_ITEMPROP: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[itemprop="datePublished"]"#).expect("static selector"));

const ZONED_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// The date-bearing bits of a post page, lifted out of the parsed document.
#[derive(Debug, Default, Clone)]
pub struct PageMetadata {
    /// Raw text of every JSON-LD block, in document order.
    pub linked_data: Vec<String>,
    /// Non-empty `content` of the published-time meta tags, preferred tag first.
    pub published_meta: Vec<String>,
}

impl PageMetadata {
    pub fn from_document(document: &Html) -> Self {
        let linked_data = document
            .select(&LINKED_DATA)
            .map(|script| script.text().collect::<String>())
            .filter(|text| !text.trim().is_empty())
            .collect();

        let published_meta = document
            .select(&META_PUBLISHED)
            .chain(document.select(&META_ITEMPROP))
            .filter_map(|meta| meta.value().attr("content"))
            .map(str::trim)
            .filter(|content| !content.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            linked_data,
            published_meta,
        }
    }
}

/// Parse a timestamp the way publishing platforms tend to write them.
///
/// Offsets are honoured (and the result converted to local time); values
/// without one come back naive. A bare date is midnight.
pub fn parse_timestamp(raw: &str) -> Option<PublishedAt> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(PublishedAt::Zoned(dt.with_timezone(&Local)));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(PublishedAt::Zoned(dt.with_timezone(&Local)));
    }

    // `Z` is not accepted by `%z`
    let offset_form = match raw.strip_suffix('Z').or_else(|| raw.strip_suffix('z')) {
        Some(stripped) => format!("{stripped}+00:00"),
        None => raw.to_string(),
    };
    for format in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&offset_form, format) {
            return Some(PublishedAt::Zoned(dt.with_timezone(&Local)));
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(PublishedAt::Naive(dt));
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(PublishedAt::Naive)
}

/// `datePublished` of the first object carrying one, per JSON-LD block.
fn from_linked_data(blocks: &[String]) -> Option<PublishedAt> {
    blocks.iter().find_map(|block| {
        let value: Value = match serde_json::from_str(block.trim()) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Skipping unparseable JSON-LD block");
                return None;
            }
        };

        let published = match &value {
            Value::Array(items) => items.iter().find_map(|item| item.get("datePublished")),
            Value::Object(_) => value.get("datePublished"),
            _ => None,
        }?;

        published.as_str().and_then(parse_timestamp)
    })
}

impl DateSource {
    fn extract(
        self,
        metadata: &PageMetadata,
        fallback: Option<&PublishedAt>,
    ) -> Option<PublishedAt> {
        match self {
            DateSource::LinkedData => from_linked_data(&metadata.linked_data),
            DateSource::MetaTag => metadata
                .published_meta
                .iter()
                .find_map(|content| parse_timestamp(content)),
            DateSource::Sitemap => fallback.copied(),
            DateSource::RetrievalTime => Some(PublishedAt::Zoned(Local::now())),
        }
    }
}

/// Pick the publication date of a page, normalized to local time.
pub fn resolve(metadata: &PageMetadata, fallback: Option<&PublishedAt>) -> ResolvedDate {
    let (source, at) = DateSource::PRIORITY
        .iter()
        .find_map(|source| source.extract(metadata, fallback).map(|at| (*source, at)))
        .unwrap_or_else(|| (DateSource::RetrievalTime, PublishedAt::Zoned(Local::now())));

    let resolved = ResolvedDate {
        at: at.to_local(),
        source,
    };

    if resolved.is_degraded() {
        warn!(date = %resolved.minute(), "No publication date found; using retrieval time");
    } else {
        debug!(date = %resolved.minute(), %source, "Resolved publication date");
    }
    resolved
}
