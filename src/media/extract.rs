//! Turns one post's content blocks (and reblog trail) into download tasks.

use chrono::{DateTime, Utc};
use url::Url;

use crate::api::types::{ContentBlock, ImageVariant, Post, VideoVariant};
use crate::error::Result;

/// One media URL scheduled for download.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub url: String,

    /// Timestamp of the owning post, used as the downloaded file's mtime.
    pub timestamp: DateTime<Utc>,

    /// Admission priority at dispatch time.
    pub priority: u64,
}

/// Collect download tasks from a post's own content and each layer of its
/// reblog trail.
///
/// A decode failure in the post's own blocks is fatal; malformed trail
/// content only skips that trail entry.
pub fn extract_media(post: &Post, priority: u64) -> Result<Vec<DownloadTask>> {
    let mut urls = Vec::new();

    scan_blocks(&post.content, &mut urls)?;

    for entry in &post.trail {
        let Some(raw) = entry.content.as_ref() else {
            continue;
        };

        let blocks: Vec<ContentBlock> = match serde_json::from_value(raw.clone()) {
            Ok(blocks) => blocks,
            Err(e) => {
                tracing::debug!(
                    "skipping malformed trail content from {}: {}",
                    entry.blog_name(),
                    e
                );
                continue;
            }
        };

        scan_blocks(&blocks, &mut urls)?;
    }

    Ok(urls
        .into_iter()
        .map(|url| DownloadTask {
            url,
            timestamp: post.posted_at(),
            priority,
        })
        .collect())
}

fn scan_blocks(blocks: &[ContentBlock], urls: &mut Vec<String>) -> Result<()> {
    for block in blocks {
        if block.media.is_null() {
            continue;
        }

        match block.kind.as_str() {
            "image" => {
                let variants: Vec<ImageVariant> = serde_json::from_value(block.media.clone())?;
                if let Some(url) = select_best_variant(&variants) {
                    urls.push(url.to_string());
                }
            }
            "video" => {
                let variant: VideoVariant = serde_json::from_value(block.media.clone())?;
                // Third-party embeds are not downloadable media.
                if is_platform_media(&variant.url) {
                    urls.push(variant.url);
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// Pick the variant to download: the first one flagged as having original
/// dimensions, otherwise the largest by pixel area (earliest wins ties).
fn select_best_variant(variants: &[ImageVariant]) -> Option<&str> {
    let mut best: Option<&ImageVariant> = None;
    let mut best_area = 0u64;

    for variant in variants {
        if variant.has_original_dimensions {
            return Some(&variant.url);
        }

        let area = variant.width * variant.height;
        if best.is_none() || area > best_area {
            best = Some(variant);
            best_area = area;
        }
    }

    best.map(|v| v.url.as_str())
}

/// True when the URL's host is part of the platform's media CDN.
fn is_platform_media(raw_url: &str) -> bool {
    let Ok(url) = Url::parse(raw_url) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };

    host == "tumblr.com" || host.ends_with(".tumblr.com")
}
