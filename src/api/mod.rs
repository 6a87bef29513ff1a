//! Tumblr API client and response types.

mod client;
pub mod types;

pub use client::{TumblrApi, PAGE_SIZE};
