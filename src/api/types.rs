//! API response type definitions.
//!
//! Posts are requested in the NPF representation: each post carries a list
//! of typed content blocks, and reblogs additionally carry a "trail" of
//! prior layers whose content is encoded independently.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};

/// Envelope around the blog-posts endpoint response.
#[derive(Debug, Deserialize)]
pub struct PostsResponse {
    pub response: PostsPage,
}

/// One page of posts.
#[derive(Debug, Default, Deserialize)]
pub struct PostsPage {
    #[serde(default)]
    pub posts: Vec<Post>,
}

/// A post from the blog timeline.
#[derive(Debug, Clone, Deserialize)]
pub struct Post {
    /// The API serves the id as either a number or a string.
    #[serde(deserialize_with = "id_from_number_or_string")]
    pub id: i64,

    /// Unix timestamp of the post.
    pub timestamp: i64,

    /// NPF content blocks of the post itself.
    #[serde(default)]
    pub content: Vec<ContentBlock>,

    /// Reblog trail; each entry's content is decoded separately.
    #[serde(default)]
    pub trail: Vec<TrailEntry>,
}

impl Post {
    pub fn posted_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.timestamp, 0)
            .single()
            .unwrap_or(DateTime::UNIX_EPOCH)
    }
}

/// One layer of a post's reblog trail.
#[derive(Debug, Clone, Deserialize)]
pub struct TrailEntry {
    #[serde(default)]
    pub blog: TrailBlog,

    /// Set instead of `blog` when the attributed blog no longer exists.
    #[serde(default)]
    pub broken_blog_name: Option<String>,

    /// Raw content payload; malformed trail content is non-fatal.
    #[serde(default)]
    pub content: Option<serde_json::Value>,
}

impl TrailEntry {
    /// Attributed blog name, falling back to the "broken" name.
    pub fn blog_name(&self) -> &str {
        if !self.blog.name.is_empty() {
            &self.blog.name
        } else {
            self.broken_blog_name.as_deref().unwrap_or("unknown")
        }
    }
}

/// Blog attribution of a trail entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrailBlog {
    #[serde(default)]
    pub name: String,
}

/// A typed NPF content block with its raw type-specific payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub media: serde_json::Value,
}

/// One resolution of an image block.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageVariant {
    pub url: String,
    #[serde(default)]
    pub width: u64,
    #[serde(default)]
    pub height: u64,
    #[serde(default)]
    pub has_original_dimensions: bool,
}

/// The single variant of a video block.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoVariant {
    pub url: String,
}

fn id_from_number_or_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(i64),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
