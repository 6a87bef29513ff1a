//! tumblr-grab - incremental media downloader for Tumblr blogs.
//!
//! Walks a blog's post timeline from most-recent backward, extracts media
//! from the NPF content of each post (including reblog trails), downloads
//! it, and persists a resumable cursor so the next run picks up exactly
//! where this one stopped.
//!
//! # Features
//!
//! - Incremental crawls with a per-blog timestamp cursor and offset
//! - Best-resolution image variant selection
//! - High-resolution URL fixups with automatic fallback
//! - Bounded download concurrency with priority admission
//! - Signal-driven cooperative cancellation
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use tumblr_grab::{Config, Cursor, Scraper, TumblrApi};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_or_default(std::path::Path::new("tumblr-grab.toml"))?;
//!     let api = Arc::new(TumblrApi::new(config.api_key.clone())?);
//!     let scraper = Scraper::new(api, config);
//!
//!     let cursor = scraper
//!         .scrape("staff.tumblr.com", Cursor::fresh(), CancellationToken::new())
//!         .await?;
//!     println!("crawled to {} ({} posts)", cursor.time, cursor.offset);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod fs;
pub mod media;
pub mod scrape;
pub mod sync;

// Re-exports for convenience
pub use api::TumblrApi;
pub use config::Config;
pub use db::StateDb;
pub use error::{Error, Result};
pub use scrape::{Cursor, Scraper};
