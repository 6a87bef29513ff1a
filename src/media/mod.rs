//! Media extraction from NPF post content.

mod extract;

pub use extract::{extract_media, DownloadTask};
