//! Reading a downloaded post page.
//!
//! [`PageScan`] lifts everything the archiver needs out of the parsed
//! document in one pass: the title, the date metadata, and the absolute
//! URLs of the stylesheets and images to inline. The element helpers are
//! shared with the renderer so that both agree on which element is the
//! title and which URL an element points at.

use crate::scrapers::dates::PageMetadata;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use url::Url;

static POST_TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h1.post-title").expect("static selector"));
static PAGE_TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").expect("static selector"));
static LINKS: Lazy<Selector> = Lazy::new(|| Selector::parse("link[href]").expect("static selector"));
static IMAGES: Lazy<Selector> = Lazy::new(|| Selector::parse("img").expect("static selector"));

pub const UNTITLED: &str = "Untitled";

/// The element the post title was read from, with its text.
///
/// `h1.post-title` wins over `<title>`; an element without text does not
/// count.
pub fn title_element(document: &Html) -> Option<(ElementRef<'_>, String)> {
    document
        .select(&POST_TITLE)
        .take(1)
        .chain(document.select(&PAGE_TITLE).take(1))
        .find_map(|el| {
            let text: String = el.text().map(str::trim).collect();
            (!text.is_empty()).then_some((el, text))
        })
}

/// `<link>` elements whose `rel` list names a stylesheet.
pub fn is_stylesheet_link(el: ElementRef<'_>) -> bool {
    el.value().name() == "link"
        && el
            .value()
            .attr("rel")
            .is_some_and(|rel| {
                rel.split_ascii_whitespace()
                    .any(|token| token.eq_ignore_ascii_case("stylesheet"))
            })
}

/// Absolute URL of a stylesheet link.
pub fn stylesheet_url(el: ElementRef<'_>, base: &Url) -> Option<String> {
    let href = el.value().attr("href").filter(|href| !href.is_empty())?;
    base.join(href).ok().map(String::from)
}

/// Absolute URL of an image: `src` first, then the lazy-load `data-src`.
pub fn image_url(el: ElementRef<'_>, base: &Url) -> Option<String> {
    let value = el.value();
    let source = value
        .attr("src")
        .filter(|src| !src.is_empty())
        .or_else(|| value.attr("data-src").filter(|src| !src.is_empty()))?;
    base.join(source).ok().map(String::from)
}

/// What the archiver needs from a post page before touching the network again.
#[derive(Debug, Clone)]
pub struct PageScan {
    pub title: String,
    pub metadata: PageMetadata,
    /// Distinct stylesheet URLs, in document order.
    pub stylesheets: Vec<String>,
    /// Distinct image URLs, in document order.
    pub images: Vec<String>,
}

impl PageScan {
    pub fn from_html(html: &str, base: &Url) -> Self {
        let document = Html::parse_document(html);

        let title = title_element(&document)
            .map(|(_, text)| text)
            .unwrap_or_else(|| UNTITLED.to_string());

        let mut stylesheets = Vec::new();
        for link in document.select(&LINKS).filter(|el| is_stylesheet_link(*el)) {
            if let Some(url) = stylesheet_url(link, base) {
                if !stylesheets.contains(&url) {
                    stylesheets.push(url);
                }
            }
        }

        let mut images = Vec::new();
        for img in document.select(&IMAGES) {
            if let Some(url) = image_url(img, base) {
                if !images.contains(&url) {
                    images.push(url);
                }
            }
        }

        Self {
            title,
            metadata: PageMetadata::from_document(&document),
            stylesheets,
            images,
        }
    }
}
