//! Command-line argument definitions using clap.

use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;

/// Tumblr media downloader CLI.
#[derive(Parser, Debug)]
#[command(
    name = "tumblr-grab",
    version,
    about = "Downloads all media from a Tumblr blog",
    long_about = "Incrementally downloads every photo and video a Tumblr blog has posted.\n\n\
                  The crawl position is persisted per blog, so an interrupted run\n\
                  resumes where it left off."
)]
pub struct Args {
    /// Blog to download: a bare name, `name.tumblr.com`, or a custom domain.
    #[arg(short, long, value_name = "URL")]
    pub download: String,

    /// Path to configuration file.
    #[arg(short, long, default_value = "tumblr-grab.toml")]
    pub config: PathBuf,

    /// Path to the crawl state database.
    #[arg(long, default_value = "tumblr-grab.db")]
    pub state: PathBuf,

    /// Tumblr API key (overrides the config file).
    #[arg(short, long, env = "TUMBLR_API_KEY")]
    pub api_key: Option<String>,

    /// Directory to save media into (overrides the config file).
    #[arg(short = 'o', long)]
    pub save_location: Option<PathBuf>,

    /// Maximum number of concurrent fetches (overrides the config file).
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Enable debug logging.
    #[arg(long)]
    pub debug: bool,
}

impl Args {
    /// Merge CLI arguments into an existing config, overriding where specified.
    pub fn merge_into_config(&self, config: &mut Config) {
        if let Some(api_key) = &self.api_key {
            config.api_key = api_key.clone();
        }

        if let Some(save_location) = &self.save_location {
            config.save_location = save_location.clone();
        }

        if let Some(concurrency) = self.concurrency {
            if concurrency > 0 {
                config.concurrency = concurrency;
            }
        }
    }

    /// Normalize the blog argument into a hostname the API accepts.
    ///
    /// A bare name becomes `<name>.tumblr.com`; anything containing a dot is
    /// taken as a full domain already.
    pub fn blog_host(&self) -> String {
        let link = self.download.trim();
        if link.contains('.') {
            link.to_string()
        } else {
            format!("{}.tumblr.com", link)
        }
    }
}
