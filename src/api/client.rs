//! Tumblr API HTTP client.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::api::types::{PostsPage, PostsResponse};
use crate::error::{Error, Result};

/// Tumblr API base URL.
const API_BASE: &str = "https://api.tumblr.com/v2";

/// Fixed listing page size.
pub const PAGE_SIZE: u32 = 20;

/// Unauthenticated client for the public blog API and media CDN.
pub struct TumblrApi {
    client: Client,
    api_key: String,
    base_url: String,
}

impl TumblrApi {
    /// Create a new API client.
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_base_url(api_key, API_BASE.to_string())
    }

    /// Create a client against a non-default API base URL (used by tests).
    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .tcp_keepalive(Duration::from_secs(60))
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Api(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url,
        })
    }

    /// Fetch one listing page of a blog's posts in NPF form.
    pub async fn get_posts(
        &self,
        blog: &str,
        offset: u64,
        cancel: &CancellationToken,
    ) -> Result<PostsPage> {
        let url = format!("{}/blog/{}/posts", self.base_url, blog);
        let limit = PAGE_SIZE.to_string();
        let offset = offset.to_string();

        tracing::debug!("GET {} offset={}", url, offset);

        let request = self.client.get(&url).query(&[
            ("api_key", self.api_key.as_str()),
            ("limit", limit.as_str()),
            ("npf", "true"),
            ("offset", offset.as_str()),
        ]);

        let response = tokio::select! {
            result = request.send() => result?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::Api(format!("GET {} failed with: {}", url, status)));
        }

        let text = tokio::select! {
            result = response.text() => result?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        let data: PostsResponse = serde_json::from_str(&text)?;
        Ok(data.response)
    }

    /// Plain GET of a media URL. Status handling is left to the caller.
    pub async fn fetch_media(&self, url: &str, cancel: &CancellationToken) -> Result<Response> {
        tokio::select! {
            result = self.client.get(url).send() => Ok(result?),
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }
}
