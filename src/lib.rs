//! Fluent scraping: register groups of URLs on a scraper, attach async
//! extraction callbacks, and get one deep-merged JSON result back.
//!
//! ```no_run
//! use fluent_scrape::backend::HttpBackend;
//! use fluent_scrape::config::HttpConfig;
//! use fluent_scrape::document::Element;
//! use fluent_scrape::scraper::Scraper;
//! use serde_json::json;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let mut scraper = Scraper::new(HttpBackend::new(&HttpConfig::default())?);
//! scraper
//!     .register_group("title", "https://example.com")
//!     .scrape(|page| {
//!         Box::pin(async move {
//!             let title = page.query_single("h1").await.text().await;
//!             Ok(Some(json!({ "title": title })))
//!         })
//!     });
//! let result = scraper.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod convert;
pub mod document;
pub mod error;
pub mod merge;
pub mod output;
pub mod pipeline;
pub mod queue;
pub mod scraper;
pub mod utils;

pub use error::ScrapeError;
