//! Scrapers for a Substack publication.
//!
//! The pipeline follows the same two phases for every run:
//!
//! 1. **Indexing**: [`sitemap::index_articles`] lists post URLs from `sitemap.xml`
//! 2. **Archiving**: [`post::archive_articles`] fetches, dates, inlines and writes each post
//!
//! # Submodules
//!
//! | Module | Role |
//! |--------|------|
//! | [`sitemap`] | Sitemap parsing, post filtering, `lastmod` fallback dates |
//! | [`page`] | One pass over a post page: title, date metadata, resources |
//! | [`dates`] | Timestamp parsing and the date source priority chain |
//! | [`post`] | Per-post archive flow and the sequential batch |
//!
//! Failed fetches are logged and skipped; nothing here aborts the batch.

pub mod dates;
pub mod page;
pub mod post;
pub mod sitemap;
