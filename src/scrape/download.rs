//! Media file downloading.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use filetime::FileTime;
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::api::TumblrApi;
use crate::error::{Error, Result};
use crate::fs::{destination_for_url, fixup_file_path, PathLocks};
use crate::media::DownloadTask;

/// Small and medium video renditions carry a resolution suffix; the
/// canonical high-resolution asset has none.
static VIDEO_URL_FIXUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"_(?:480|720)\.mp4$").unwrap());

/// Image URLs end in a size token; 1280 is the largest the CDN serves.
static IMAGE_SIZE_FIXUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"_\d+\.([a-z]+)$").unwrap());

/// Last-Modified headers within this window of the post time are assumed to
/// be clock skew and ignored.
const MTIME_SKEW_TOLERANCE_HOURS: i64 = 24;

/// Result of a single transfer attempt.
#[derive(Debug)]
enum FetchOutcome {
    /// File transferred and written.
    Written,
    /// Destination already exists or is being written by another task.
    Skipped,
    /// 403: the media was deleted; not an error.
    Gone,
    /// 404 or 500: candidates for the original-URL fallback.
    NotFound,
}

/// Downloads one media URL to the save directory.
pub struct DownloadPipeline {
    api: Arc<TumblrApi>,
    save_dir: PathBuf,
    locks: Arc<PathLocks>,
    blog: String,
}

impl DownloadPipeline {
    pub fn new(api: Arc<TumblrApi>, save_dir: PathBuf, locks: Arc<PathLocks>, blog: String) -> Self {
        Self {
            api,
            save_dir,
            locks,
            blog,
        }
    }

    /// Download one task: try the heuristically optimal URL first, fall back
    /// to the original once on not-found, and tolerate a final not-found.
    pub async fn download_file(&self, task: &DownloadTask, cancel: &CancellationToken) -> Result<()> {
        let optimal_url = fixup_url(&task.url);

        let mut outcome = self
            .download_file_maybe(&optimal_url, task.timestamp, cancel)
            .await;

        if matches!(outcome, Ok(FetchOutcome::NotFound)) && optimal_url != task.url {
            outcome = self
                .download_file_maybe(&task.url, task.timestamp, cancel)
                .await;
        }

        match outcome {
            Ok(FetchOutcome::NotFound) => {
                tracing::info!("{}: did not find {}", self.blog, task.url);
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                tracing::error!("{}: failed to download file: {}", self.blog, e);
                Err(e)
            }
        }
    }

    /// Single transfer attempt of `raw_url`.
    async fn download_file_maybe(
        &self,
        raw_url: &str,
        post_time: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome> {
        let mut path = destination_for_url(&self.save_dir, raw_url)?;

        // Existence-based dedup: a file at the destination means a previous
        // run already fetched it.
        if tokio::fs::symlink_metadata(&path).await.is_ok() {
            tracing::info!("{}: skipping {}", self.blog, path.display());
            return Ok(FetchOutcome::Skipped);
        }

        let response = self.api.fetch_media(raw_url, cancel).await?;

        match response.status().as_u16() {
            200 => {}
            // Deleted media answers 403.
            403 => return Ok(FetchOutcome::Gone),
            // The API answers 500 for some genuinely absent resources.
            404 | 500 => return Ok(FetchOutcome::NotFound),
            _ => {
                return Err(Error::Download(format!(
                    "GET {} failed with: {}",
                    raw_url,
                    response.status()
                )))
            }
        }

        let file_time = resolve_file_time(&self.blog, post_time, &response);

        let content_disposition = header_str(&response, header::CONTENT_DISPOSITION);
        let content_type = header_str(&response, header::CONTENT_TYPE);
        let fixed_path = fixup_file_path(&self.save_dir, &path, content_disposition, content_type);

        if fixed_path != path {
            path = fixed_path;

            if tokio::fs::symlink_metadata(&path).await.is_ok() {
                tracing::info!("{}: skipping {}", self.blog, path.display());
                return Ok(FetchOutcome::Skipped);
            }
        }

        if !self.locks.acquire(&path) {
            return Ok(FetchOutcome::Skipped);
        }

        let write = write_body(response, &path);
        tokio::pin!(write);
        let result = tokio::select! {
            result = &mut write => result,
            _ = cancel.cancelled() => {
                let _ = tokio::fs::remove_file(&path).await;
                Err(Error::Cancelled)
            }
        };
        self.locks.release(&path);
        result?;

        let mtime = FileTime::from_unix_time(file_time.timestamp(), 0);
        filetime::set_file_times(&path, mtime, mtime)?;

        tracing::info!("{}: wrote {}", self.blog, path.display());
        Ok(FetchOutcome::Written)
    }
}

/// Rewrite a URL toward the highest-resolution asset. A failed bet is undone
/// by the caller's original-URL fallback.
pub fn fixup_url(url: &str) -> String {
    if url.ends_with(".mp4") {
        return VIDEO_URL_FIXUP.replace(url, ".mp4").into_owned();
    }

    IMAGE_SIZE_FIXUP.replace(url, "_1280.$1").into_owned()
}

/// File mtime: the post's timestamp, unless Last-Modified parses and differs
/// by more than the skew tolerance.
fn resolve_file_time(
    blog: &str,
    post_time: DateTime<Utc>,
    response: &reqwest::Response,
) -> DateTime<Utc> {
    let Some(value) = response
        .headers()
        .get(header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
    else {
        return post_time;
    };

    match DateTime::parse_from_rfc2822(value) {
        Ok(last_modified) => {
            let last_modified = last_modified.with_timezone(&Utc);
            if (post_time - last_modified).abs() > TimeDelta::hours(MTIME_SKEW_TOLERANCE_HOURS) {
                last_modified
            } else {
                post_time
            }
        }
        Err(e) => {
            tracing::warn!("{}: failed to parse Last-Modified header: {}", blog, e);
            post_time
        }
    }
}

fn header_str(response: &reqwest::Response, name: header::HeaderName) -> Option<&str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Stream the response body straight to the destination file, deleting the
/// partial file on any write error.
async fn write_body(response: reqwest::Response, path: &Path) -> Result<()> {
    let mut file = File::create(path).await?;

    let result = async {
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(Error::Http)?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
    .await;

    if result.is_err() {
        drop(file);
        let _ = tokio::fs::remove_file(path).await;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn task(url: String) -> DownloadTask {
        DownloadTask {
            url,
            timestamp: Utc.timestamp_opt(1_600_000_000, 0).unwrap(),
            priority: 0,
        }
    }

    fn pipeline_for(server: &MockServer, dir: &Path) -> DownloadPipeline {
        let api = Arc::new(
            TumblrApi::with_base_url("key".to_string(), server.uri()).unwrap(),
        );
        DownloadPipeline::new(
            api,
            dir.to_path_buf(),
            Arc::new(PathLocks::new()),
            "test.tumblr.com".to_string(),
        )
    }

    #[test]
    fn fixup_url_strips_video_resolution_suffix() {
        assert_eq!(
            fixup_url("https://vt.tumblr.com/clip_480.mp4"),
            "https://vt.tumblr.com/clip.mp4"
        );
        assert_eq!(
            fixup_url("https://vt.tumblr.com/clip_720.mp4"),
            "https://vt.tumblr.com/clip.mp4"
        );
        assert_eq!(
            fixup_url("https://vt.tumblr.com/clip.mp4"),
            "https://vt.tumblr.com/clip.mp4"
        );
    }

    #[test]
    fn fixup_url_upgrades_image_size_token() {
        assert_eq!(
            fixup_url("https://media.tumblr.com/photo_500.jpg"),
            "https://media.tumblr.com/photo_1280.jpg"
        );
        assert_eq!(
            fixup_url("https://media.tumblr.com/photo.jpg"),
            "https://media.tumblr.com/photo.jpg"
        );
    }

    #[tokio::test]
    async fn successful_download_writes_file_with_post_mtime() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        Mock::given(method("GET"))
            .and(url_path("/media/photo_1280.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"jpegdata".to_vec())
                    .insert_header("Content-Type", "image/jpeg"),
            )
            .mount(&server)
            .await;

        let pipeline = pipeline_for(&server, dir.path());
        let cancel = CancellationToken::new();
        let task = task(format!("{}/media/photo_1280.jpg", server.uri()));

        pipeline.download_file(&task, &cancel).await.unwrap();

        let written = dir.path().join("photo_1280.jpg");
        assert_eq!(std::fs::read(&written).unwrap(), b"jpegdata");

        let metadata = std::fs::metadata(&written).unwrap();
        let mtime = FileTime::from_last_modification_time(&metadata);
        assert_eq!(mtime.unix_seconds(), 1_600_000_000);
    }

    #[tokio::test]
    async fn optimal_url_falls_back_to_original_on_not_found() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        Mock::given(method("GET"))
            .and(url_path("/media/photo_1280.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path("/media/photo_500.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"small".to_vec())
                    .insert_header("Content-Type", "image/jpeg"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let pipeline = pipeline_for(&server, dir.path());
        let cancel = CancellationToken::new();
        let task = task(format!("{}/media/photo_500.jpg", server.uri()));

        pipeline.download_file(&task, &cancel).await.unwrap();

        assert!(dir.path().join("photo_500.jpg").exists());
        assert!(!dir.path().join("photo_1280.jpg").exists());
    }

    #[tokio::test]
    async fn not_found_and_server_error_are_both_tolerated() {
        for status in [404u16, 500] {
            let server = MockServer::start().await;
            let dir = tempfile::tempdir().unwrap();

            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let pipeline = pipeline_for(&server, dir.path());
            let cancel = CancellationToken::new();
            let task = task(format!("{}/media/photo.jpg", server.uri()));

            pipeline.download_file(&task, &cancel).await.unwrap();
            assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        }
    }

    #[tokio::test]
    async fn forbidden_is_a_silent_noop_without_fallback() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        Mock::given(method("GET"))
            .and(url_path("/media/clip.mp4"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let pipeline = pipeline_for(&server, dir.path());
        let cancel = CancellationToken::new();
        // No resolution suffix, so the optimal URL equals the original.
        let task = task(format!("{}/media/clip.mp4", server.uri()));

        pipeline.download_file(&task, &cancel).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn other_statuses_are_hard_failures() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(418))
            .mount(&server)
            .await;

        let pipeline = pipeline_for(&server, dir.path());
        let cancel = CancellationToken::new();
        let task = task(format!("{}/media/photo.jpg", server.uri()));

        let result = pipeline.download_file(&task, &cancel).await;
        assert!(matches!(result, Err(Error::Download(_))));
    }

    #[tokio::test]
    async fn existing_file_skips_the_transfer_entirely() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        std::fs::write(dir.path().join("photo.jpg"), b"already here").unwrap();

        let pipeline = pipeline_for(&server, dir.path());
        let cancel = CancellationToken::new();
        let task = task(format!("{}/media/photo.jpg", server.uri()));

        pipeline.download_file(&task, &cancel).await.unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("photo.jpg")).unwrap(),
            b"already here"
        );
    }

    #[tokio::test]
    async fn content_disposition_renames_the_file() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"data".to_vec())
                    .insert_header("Content-Disposition", "attachment; filename=\"named.png\""),
            )
            .mount(&server)
            .await;

        let pipeline = pipeline_for(&server, dir.path());
        let cancel = CancellationToken::new();
        let task = task(format!("{}/media/photo.jpg", server.uri()));

        pipeline.download_file(&task, &cancel).await.unwrap();
        assert!(dir.path().join("named.png").exists());
        assert!(!dir.path().join("photo.jpg").exists());
    }

    #[tokio::test]
    async fn distant_last_modified_overrides_post_time() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        // 1_600_000_000 is 2020-09-13; a 2015 Last-Modified is far outside
        // the skew tolerance.
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"data".to_vec())
                    .insert_header("Content-Type", "image/jpeg")
                    .insert_header("Last-Modified", "Wed, 01 Jul 2015 10:00:00 GMT"),
            )
            .mount(&server)
            .await;

        let pipeline = pipeline_for(&server, dir.path());
        let cancel = CancellationToken::new();
        let task = task(format!("{}/media/photo.jpg", server.uri()));

        pipeline.download_file(&task, &cancel).await.unwrap();

        let metadata = std::fs::metadata(dir.path().join("photo.jpg")).unwrap();
        let mtime = FileTime::from_last_modification_time(&metadata);
        let expected = DateTime::parse_from_rfc2822("Wed, 01 Jul 2015 10:00:00 GMT")
            .unwrap()
            .timestamp();
        assert_eq!(mtime.unix_seconds(), expected);
    }

    #[tokio::test]
    async fn nearby_last_modified_keeps_post_time() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        let post_time = Utc.timestamp_opt(1_600_000_000, 0).unwrap();
        let nearby = (post_time - TimeDelta::hours(2)).to_rfc2822();

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"data".to_vec())
                    .insert_header("Content-Type", "image/jpeg")
                    .insert_header("Last-Modified", nearby.as_str()),
            )
            .mount(&server)
            .await;

        let pipeline = pipeline_for(&server, dir.path());
        let cancel = CancellationToken::new();
        let task = task(format!("{}/media/photo.jpg", server.uri()));

        pipeline.download_file(&task, &cancel).await.unwrap();

        let metadata = std::fs::metadata(dir.path().join("photo.jpg")).unwrap();
        let mtime = FileTime::from_last_modification_time(&metadata);
        assert_eq!(mtime.unix_seconds(), 1_600_000_000);
    }
}
