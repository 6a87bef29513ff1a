//! Backward traversal of a blog's post timeline.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::api::types::{Post, PostsPage};
use crate::api::TumblrApi;
use crate::error::{Error, Result};
use crate::media::extract_media;
use crate::scrape::download::DownloadPipeline;
use crate::sync::PrioritySemaphore;

/// Resumable crawl position, owned by the engine for the duration of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    /// Timestamp boundary; posts newer than this have already been seen.
    pub time: DateTime<Utc>,

    /// Posts processed so far; doubles as pagination offset and admission
    /// priority.
    pub offset: u64,

    /// True when this blog has never been crawled before.
    pub fresh: bool,
}

impl Cursor {
    /// Start state for a blog with no stored position: begin at "now".
    pub fn fresh() -> Self {
        Self {
            time: Utc::now(),
            offset: 0,
            fresh: true,
        }
    }

    /// Continue strictly before a previously persisted position.
    pub fn resume(time: DateTime<Utc>, offset: u64) -> Self {
        Self {
            time,
            offset,
            fresh: false,
        }
    }
}

/// Drives pagination for one crawl run and fans downloads out through the
/// admission gate. The cursor is owned here and only read back by the
/// caller after `run` returns.
pub(crate) struct ScrapeContext {
    api: Arc<TumblrApi>,
    pipeline: Arc<DownloadPipeline>,
    semaphore: Arc<PrioritySemaphore>,
    cancel: CancellationToken,
    blog: String,
    cursor: Cursor,
    downloads: JoinSet<Result<()>>,
}

impl ScrapeContext {
    pub(crate) fn new(
        api: Arc<TumblrApi>,
        pipeline: Arc<DownloadPipeline>,
        semaphore: Arc<PrioritySemaphore>,
        cancel: CancellationToken,
        blog: String,
        cursor: Cursor,
    ) -> Self {
        Self {
            api,
            pipeline,
            semaphore,
            cancel,
            blog,
            cursor,
            downloads: JoinSet::new(),
        }
    }

    /// Run the pagination loop to completion and drain all outstanding
    /// downloads before reporting the final cursor.
    pub(crate) async fn run(mut self) -> Result<Cursor> {
        let loop_result = self.run_loop().await;
        if loop_result.is_err() {
            // Stop in-flight downloads promptly; harmless if the loop
            // failed because the token already fired.
            self.cancel.cancel();
        }

        let drain_result = self.drain().await;

        match (loop_result, drain_result) {
            (Ok(()), Ok(())) => Ok(self.cursor),
            // A download's hard failure is the root cause when the loop
            // only observed the resulting cancellation.
            (Err(Error::Cancelled), Err(e)) => Err(e),
            (Err(e), _) => Err(e),
            (Ok(()), Err(e)) => Err(e),
        }
    }

    async fn run_loop(&mut self) -> Result<()> {
        loop {
            tracing::info!(
                "{}: fetching posts before {} (offset {})",
                self.blog,
                self.cursor.time,
                self.cursor.offset
            );

            let page = self.fetch_page().await?;
            if page.posts.is_empty() {
                return Ok(());
            }

            for post in &page.posts {
                let posted_at = post.posted_at();

                if posted_at > self.cursor.time {
                    // A post newer than the cursor means the listing was
                    // reordered or duplicated; following it would loop
                    // forever.
                    tracing::warn!(
                        "{}: post {} is newer than the cursor, stopping",
                        self.blog,
                        post.id
                    );
                    return Ok(());
                }

                self.cursor.time = posted_at;
                self.scrape_post(post).await?;
            }

            self.cursor.offset += page.posts.len() as u64;
        }
    }

    async fn fetch_page(&self) -> Result<PostsPage> {
        let _unit = self
            .semaphore
            .acquire(self.cursor.offset, &self.cancel)
            .await?;
        self.api
            .get_posts(&self.blog, self.cursor.offset, &self.cancel)
            .await
    }

    /// Extract a post's media and spawn one download per task. Admission is
    /// acquired here, before spawning, so the pagination loop itself backs
    /// off when capacity is exhausted.
    async fn scrape_post(&mut self, post: &Post) -> Result<()> {
        for task in extract_media(post, self.cursor.offset)? {
            let unit = self.semaphore.acquire(task.priority, &self.cancel).await?;

            let pipeline = Arc::clone(&self.pipeline);
            let cancel = self.cancel.clone();

            self.downloads.spawn(async move {
                let _unit = unit;
                let result = pipeline.download_file(&task, &cancel).await;

                // The first hard failure takes the whole run down.
                if let Err(e) = &result {
                    if !e.is_cancelled() {
                        cancel.cancel();
                    }
                }

                result
            });
        }

        Ok(())
    }

    /// Wait for every outstanding download, keeping the first hard failure.
    async fn drain(&mut self) -> Result<()> {
        let mut first_error = None;

        while let Some(joined) = self.downloads.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(Error::Download(format!("download task panicked: {}", e))),
            };

            match result {
                Ok(()) => {}
                Err(Error::Cancelled) => {}
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
