//! Error types for the tumblr-grab application.

use thiserror::Error;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // API errors
    #[error("API error: {0}")]
    Api(String),

    // Download errors
    #[error("Download failed: {0}")]
    Download(String),

    // Run aborted by a termination signal or another worker's failure
    #[error("Cancelled")]
    Cancelled,

    // Crawl state persistence errors
    #[error("State database error: {0}")]
    Db(#[from] rusqlite::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    // URL parsing errors
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True when the run was cancelled rather than having failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Process exit codes.
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const ABORT: i32 = 1;
    pub const API_ERROR: i32 = 2;
    pub const CONFIG_ERROR: i32 = 3;
    pub const DOWNLOAD_ERROR: i32 = 4;
    pub const UNEXPECTED_ERROR: i32 = 5;
}
