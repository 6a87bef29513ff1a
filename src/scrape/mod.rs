//! Crawl orchestration: pagination, extraction, and downloading.

mod download;
mod engine;

pub use engine::Cursor;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::TumblrApi;
use crate::config::Config;
use crate::error::Result;
use crate::fs::PathLocks;
use crate::scrape::download::DownloadPipeline;
use crate::scrape::engine::ScrapeContext;
use crate::sync::PrioritySemaphore;

/// Ties the pagination engine, extractor, and download pipeline into one
/// cancellable run per blog.
pub struct Scraper {
    api: Arc<TumblrApi>,
    config: Config,
}

impl Scraper {
    pub fn new(api: Arc<TumblrApi>, config: Config) -> Self {
        Self { api, config }
    }

    /// Crawl `blog` starting from `cursor` until the timeline is exhausted
    /// or the run is cancelled. Returns the final cursor; the caller
    /// persists it only when this returns `Ok`.
    pub async fn scrape(
        &self,
        blog: &str,
        cursor: Cursor,
        cancel: CancellationToken,
    ) -> Result<Cursor> {
        tokio::fs::create_dir_all(&self.config.save_location).await?;

        if cursor.fresh {
            tracing::info!("{}: starting fresh crawl at {}", blog, cursor.time);
        } else {
            tracing::info!(
                "{}: resuming before {} (offset {})",
                blog,
                cursor.time,
                cursor.offset
            );
        }

        let semaphore = PrioritySemaphore::new(self.config.concurrency);
        let locks = Arc::new(PathLocks::new());
        let pipeline = Arc::new(DownloadPipeline::new(
            Arc::clone(&self.api),
            self.config.save_location.clone(),
            locks,
            blog.to_string(),
        ));

        let context = ScrapeContext::new(
            Arc::clone(&self.api),
            pipeline,
            semaphore,
            cancel,
            blog.to_string(),
            cursor,
        );

        let finished = context.run().await?;

        tracing::info!(
            "{}: scraping finished at {} (offset {})",
            blog,
            finished.time,
            finished.offset
        );

        Ok(finished)
    }
}
