//! Archiving individual posts.
//!
//! [`archive_article`] takes one [`ArticleRef`] from page download to file
//! on disk:
//!
//! 1. fetch and scan the page (title, date metadata, resources)
//! 2. resolve the publication date
//! 3. skip the post if `YYYY-MM-DD_<title>.html` already exists
//! 4. inline stylesheets, then images (bounded parallel fetch)
//! 5. render without scripts and site chrome, with an attribution line
//! 6. write the file and pause briefly
//!
//! Any failure aborts only the post at hand. [`archive_articles`] walks the
//! whole list one post at a time.

use crate::fetcher::Fetcher;
use crate::models::{ArchiveSettings, ArticleRecord, ArticleRef};
use crate::outputs::html::{self, PageEdits, image_data_uri};
use crate::scrapers::dates;
use crate::scrapers::page::PageScan;
use crate::utils::{article_filename, truncate_for_log};
use futures::stream::{self, StreamExt};
use rand::{Rng, rng};
use std::collections::HashMap;
use std::error::Error;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument};
use url::Url;

/// What became of one post.
#[derive(Debug)]
enum Outcome {
    Written(PathBuf),
    AlreadyArchived(PathBuf),
}

/// Archive posts sequentially, in list order.
///
/// Returns the number of newly written files.
#[instrument(level = "info", skip_all, fields(count = articles.len()))]
pub async fn archive_articles(
    fetcher: &Fetcher,
    settings: &ArchiveSettings,
    articles: &[ArticleRef],
) -> usize {
    let t0 = Instant::now();
    let written = stream::iter(articles)
        .then(|article| archive_article(fetcher, settings, article))
        .filter(|written| std::future::ready(*written))
        .count()
        .await;

    info!(
        listed = articles.len(),
        written,
        skipped_or_failed = articles.len() - written,
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "Archived articles"
    );
    written
}

/// Archive a single post. `true` only when a new file was written.
#[instrument(level = "info", skip_all, fields(url = %article.url))]
pub async fn archive_article(
    fetcher: &Fetcher,
    settings: &ArchiveSettings,
    article: &ArticleRef,
) -> bool {
    match try_archive(fetcher, settings, article).await {
        Ok(Outcome::Written(path)) => {
            debug!(path = %path.display(), "Archived article");
            true
        }
        Ok(Outcome::AlreadyArchived(path)) => {
            debug!(path = %path.display(), "Already archived; skipping");
            false
        }
        Err(e) => {
            error!(url = %article.url, error = %e, "Article failed; skipping");
            false
        }
    }
}

async fn try_archive(
    fetcher: &Fetcher,
    settings: &ArchiveSettings,
    article: &ArticleRef,
) -> Result<Outcome, Box<dyn Error>> {
    let url = Url::parse(&article.url)?;
    let page = fetcher.fetch_document(&article.url).await?;
    let scan = PageScan::from_html(&page, &url);

    let record = ArticleRecord {
        url,
        date: dates::resolve(&scan.metadata, article.fallback.as_ref()),
        title: scan.title.clone(),
        html: page,
    };

    let path = settings
        .output_dir
        .join(article_filename(&record.date, &record.title));
    if path.exists() {
        return Ok(Outcome::AlreadyArchived(path));
    }

    info!(
        date = %record.date.day(),
        source = %record.date.source,
        title = %truncate_for_log(&record.title, 120),
        "Downloading"
    );

    let edits = PageEdits {
        stylesheets: inline_stylesheets(fetcher, &scan.stylesheets).await,
        images: inline_images(fetcher, &scan.images, settings.image_workers).await,
        attribution: record.attribution(),
    };

    let rendered = html::render(&record.html, &record.url, &edits);
    html::write_page(&path, &rendered).await?;

    polite_pause(settings.post_write_delay).await;
    Ok(Outcome::Written(path))
}

/// Fetch stylesheet text for each URL; unavailable sheets are left out.
async fn inline_stylesheets(fetcher: &Fetcher, urls: &[String]) -> HashMap<String, String> {
    let mut stylesheets = HashMap::new();
    for url in urls {
        match fetcher.fetch_text(url).await {
            Some(css) => {
                stylesheets.insert(url.clone(), css);
            }
            None => debug!(%url, "Stylesheet unavailable; keeping link"),
        }
    }
    stylesheets
}

/// Fetch images through a pool of `workers` concurrent requests.
///
/// Returns image URL to `data:` URI for every image that arrived; failed
/// ones are absent and keep their original reference in the output.
#[instrument(level = "debug", skip_all, fields(count = urls.len(), workers = workers))]
pub async fn inline_images(
    fetcher: &Fetcher,
    urls: &[String],
    workers: usize,
) -> HashMap<String, String> {
    let fetched: Vec<(&String, Option<Vec<u8>>)> = stream::iter(urls)
        .map(|url| async move { (url, fetcher.fetch_binary(url).await) })
        .buffer_unordered(workers.max(1))
        .collect()
        .await;

    let mut images = HashMap::new();
    let mut failed = 0usize;
    for (url, bytes) in fetched {
        match bytes {
            Some(bytes) => {
                images.insert(url.clone(), image_data_uri(&bytes));
            }
            None => {
                failed += 1;
                debug!(%url, "Image unavailable; leaving original reference");
            }
        }
    }

    debug!(inlined = images.len(), failed, "Inlined images");
    images
}

/// Sleep a random time within `(min, max)` to stay gentle on the origin.
async fn polite_pause((min, max): (Duration, Duration)) {
    let delay = if max > min {
        Duration::from_secs_f64(rng().random_range(min.as_secs_f64()..=max.as_secs_f64()))
    } else {
        min
    };
    if !delay.is_zero() {
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::RetryPolicy;
    use crate::scrapers::sitemap::index_articles;
    use chrono::{Local, TimeZone, Utc};
    use scraper::{Html, Selector};
    use std::path::Path;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const POST: &str = r#"<!DOCTYPE html>
<html><head>
<title>Ignored | Example</title>
<script type="application/ld+json">{"@type":"NewsArticle","datePublished":"2024-03-01T12:00:00Z"}</script>
<meta property="article:published_time" content="2022-01-01T00:00:00Z">
<link rel="stylesheet" href="/static/site.css">
</head><body>
<div class="substack-header">header</div>
<h1 class="post-title">A/B: Test?</h1>
<img src="/img/one.png" alt="one">
<img src="" data-src="/img/two.png" loading="lazy" alt="two">
<img src="/img/broken.png" alt="three">
<script>track()</script>
</body></html>"#;

    fn quick_fetcher() -> Fetcher {
        Fetcher::new(RetryPolicy {
            max_attempts: 3,
            error_pause: Duration::from_millis(1),
            rate_limit_pause: Duration::from_millis(1),
        })
        .unwrap()
    }

    fn settings_for(site: &str, output_dir: &Path) -> ArchiveSettings {
        ArchiveSettings {
            site_url: Url::parse(site).unwrap(),
            output_dir: output_dir.to_path_buf(),
            image_workers: 8,
            article_path: "/p/".to_string(),
            post_write_delay: (Duration::ZERO, Duration::ZERO),
        }
    }

    fn expected_day(utc: chrono::DateTime<Utc>) -> String {
        utc.with_timezone(&Local).format("%Y-%m-%d").to_string()
    }

    async fn mount_post(server: &MockServer, route: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    async fn mount_assets(server: &MockServer) {
        mount_post(server, "/static/site.css", "h1 { font-weight: 700; }").await;
        Mock::given(method("GET"))
            .and(path("/img/one.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"one".to_vec()))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/img/two.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"two".to_vec()))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/img/broken.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(server)
            .await;
    }

    fn post_filename() -> String {
        let published = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        format!("{}_AB Test.html", expected_day(published))
    }

    #[tokio::test]
    async fn test_archive_article_writes_inlined_page() {
        let server = MockServer::start().await;
        mount_post(&server, "/p/post", POST).await;
        mount_assets(&server).await;

        let out = tempfile::tempdir().unwrap();
        let settings = settings_for(&server.uri(), out.path());
        let article = ArticleRef {
            url: format!("{}/p/post", server.uri()),
            fallback: None,
        };

        assert!(archive_article(&quick_fetcher(), &settings, &article).await);

        let written = std::fs::read_to_string(out.path().join(post_filename())).unwrap();
        assert!(written.contains("<style>h1 { font-weight: 700; }</style>"));
        assert!(!written.contains("track()"));
        assert!(!written.contains("substack-header"));
        assert!(written.contains(&format!("Source: {}/p/post", server.uri())));

        let document = Html::parse_document(&written);
        let images = Selector::parse("img").unwrap();
        let sources: Vec<&str> = document
            .select(&images)
            .filter_map(|img| img.value().attr("src"))
            .collect();
        let inlined = sources
            .iter()
            .filter(|src| src.starts_with("data:image/jpeg;base64,"))
            .count();
        assert_eq!(inlined, 2);
        assert!(sources.contains(&"/img/broken.png"));
        assert!(sources.contains(&image_data_uri(b"two").as_str()));

        let lazy = Selector::parse(r#"img[alt="two"]"#).unwrap();
        let two = document.select(&lazy).next().unwrap();
        assert!(two.value().attr("data-src").is_none());
        assert!(two.value().attr("loading").is_none());
    }

    #[tokio::test]
    async fn test_inline_images_partial_failure() {
        let server = MockServer::start().await;
        mount_assets(&server).await;

        let urls: Vec<String> = ["/img/one.png", "/img/two.png", "/img/broken.png"]
            .iter()
            .map(|p| format!("{}{}", server.uri(), p))
            .collect();
        let images = inline_images(&quick_fetcher(), &urls, 8).await;

        assert_eq!(images.len(), 2);
        assert_eq!(images.get(&urls[0]), Some(&image_data_uri(b"one")));
        assert!(!images.contains_key(&urls[2]));
    }

    #[tokio::test]
    async fn test_existing_file_is_not_rewritten() {
        let server = MockServer::start().await;
        mount_post(&server, "/p/post", POST).await;
        mount_assets(&server).await;

        let out = tempfile::tempdir().unwrap();
        let existing = out.path().join(post_filename());
        std::fs::write(&existing, "already here").unwrap();

        let settings = settings_for(&server.uri(), out.path());
        let article = ArticleRef {
            url: format!("{}/p/post", server.uri()),
            fallback: None,
        };

        assert!(!archive_article(&quick_fetcher(), &settings, &article).await);
        assert_eq!(std::fs::read_to_string(&existing).unwrap(), "already here");
    }

    #[tokio::test]
    async fn test_second_run_skips() {
        let server = MockServer::start().await;
        mount_post(&server, "/p/post", POST).await;
        mount_assets(&server).await;

        let out = tempfile::tempdir().unwrap();
        let settings = settings_for(&server.uri(), out.path());
        let fetcher = quick_fetcher();
        let article = ArticleRef {
            url: format!("{}/p/post", server.uri()),
            fallback: None,
        };

        assert!(archive_article(&fetcher, &settings, &article).await);
        assert!(!archive_article(&fetcher, &settings, &article).await);
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_failed_page_fetch_is_contained() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/p/missing"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let out = tempfile::tempdir().unwrap();
        let settings = settings_for(&server.uri(), out.path());
        let article = ArticleRef {
            url: format!("{}/p/missing", server.uri()),
            fallback: None,
        };

        assert!(!archive_article(&quick_fetcher(), &settings, &article).await);
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_undated_post_uses_retrieval_time() {
        let server = MockServer::start().await;
        mount_post(
            &server,
            "/p/undated",
            "<html><head><title>Undated</title></head><body><p>text</p></body></html>",
        )
        .await;

        let out = tempfile::tempdir().unwrap();
        let settings = settings_for(&server.uri(), out.path());
        let article = ArticleRef {
            url: format!("{}/p/undated", server.uri()),
            fallback: None,
        };

        let before = Local::now().format("%Y-%m-%d").to_string();
        assert!(archive_article(&quick_fetcher(), &settings, &article).await);
        let after = Local::now().format("%Y-%m-%d").to_string();

        let names: Vec<String> = std::fs::read_dir(out.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(
            names[0] == format!("{before}_Undated.html") || names[0] == format!("{after}_Undated.html")
        );

        let written = std::fs::read_to_string(out.path().join(&names[0])).unwrap();
        assert!(written.contains("(publication date unknown)"));
    }

    #[tokio::test]
    async fn test_sitemap_fallback_names_file() {
        let server = MockServer::start().await;
        mount_post(
            &server,
            "/p/old",
            r#"<html><head><title>Old Post</title></head><body><h1 class="post-title">Old Post</h1></body></html>"#,
        )
        .await;

        let out = tempfile::tempdir().unwrap();
        let settings = settings_for(&server.uri(), out.path());
        let article = ArticleRef {
            url: format!("{}/p/old", server.uri()),
            fallback: dates::parse_timestamp("2024-01-15T00:00:00Z"),
        };

        assert!(archive_article(&quick_fetcher(), &settings, &article).await);
        let published = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let expected = out
            .path()
            .join(format!("{}_Old Post.html", expected_day(published)));
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn test_batch_from_sitemap() {
        let server = MockServer::start().await;
        let sitemap = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>{0}/p/post</loc><lastmod>2024-03-02</lastmod></url>
  <url><loc>{0}/archive</loc></url>
  <url><loc>{0}/p/missing</loc></url>
  <url><loc>{0}/p/second</loc><lastmod>2024-02-10T08:00:00Z</lastmod></url>
</urlset>"#,
            server.uri()
        );
        mount_post(&server, "/sitemap.xml", &sitemap).await;
        mount_post(&server, "/p/post", POST).await;
        mount_post(
            &server,
            "/p/second",
            r#"<html><head><title>Second</title></head><body></body></html>"#,
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/p/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        mount_assets(&server).await;

        let out = tempfile::tempdir().unwrap();
        let settings = settings_for(&server.uri(), out.path());
        let fetcher = quick_fetcher();

        let articles = index_articles(&fetcher, &settings).await;
        assert_eq!(articles.len(), 3);
        assert_eq!(archive_articles(&fetcher, &settings, &articles).await, 2);
        assert_eq!(archive_articles(&fetcher, &settings, &articles).await, 0);
    }

    #[tokio::test]
    async fn test_page_decoded_as_utf8_despite_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/p/cafe"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"<html><head><meta property="article:published_time" content="2024-03-01T12:00:00Z"><title>Café</title></head><body></body></html>"#
                    .as_bytes()
                    .to_vec(),
                "text/html; charset=iso-8859-1",
            ))
            .mount(&server)
            .await;

        let out = tempfile::tempdir().unwrap();
        let settings = settings_for(&server.uri(), out.path());
        let article = ArticleRef {
            url: format!("{}/p/cafe", server.uri()),
            fallback: None,
        };

        assert!(archive_article(&quick_fetcher(), &settings, &article).await);
        let published = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let expected = out
            .path()
            .join(format!("{}_Café.html", expected_day(published)));
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn test_polite_pause_zero_returns() {
        let started = Instant::now();
        polite_pause((Duration::ZERO, Duration::ZERO)).await;
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_polite_pause_stays_in_range() {
        let (min, max) = (Duration::from_millis(1000), Duration::from_millis(1500));
        let started = Instant::now();
        polite_pause((min, max)).await;
        let elapsed = started.elapsed();
        assert!(elapsed >= min, "paused only {elapsed:?}");
        // scheduler slack on top of the upper bound
        assert!(elapsed < max + Duration::from_millis(500), "paused {elapsed:?}");
    }
}
