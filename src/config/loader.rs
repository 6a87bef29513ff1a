//! Configuration structures and loading logic.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Tumblr API key used for listing requests.
    #[serde(default)]
    pub api_key: String,

    /// Maximum number of simultaneously active fetches.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Directory downloaded media is written to.
    #[serde(default = "default_save_location")]
    pub save_location: PathBuf,
}

fn default_concurrency() -> usize {
    24
}

fn default_save_location() -> PathBuf {
    PathBuf::from("downloads")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            concurrency: default_concurrency(),
            save_location: default_save_location(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, recovering from `<path>.bak` if the
    /// primary file is missing and falling back to defaults when neither
    /// exists.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config.normalized()),
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut backup = path.as_os_str().to_owned();
                backup.push(".bak");

                match Self::load(Path::new(&backup)) {
                    Ok(config) => {
                        tracing::warn!("recovering backup config file");
                        Ok(config.normalized())
                    }
                    Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                        tracing::warn!(
                            "config file not found: {} -> using default values",
                            path.display()
                        );
                        Ok(Self::default())
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate required fields after CLI overrides are merged in.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(Error::Config(
                "api_key is required (set it in the config file or via --api-key)".to_string(),
            ));
        }
        Ok(())
    }

    fn normalized(mut self) -> Self {
        if self.concurrency == 0 {
            self.concurrency = default_concurrency();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_full_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "api_key = \"abc\"\nconcurrency = 8\nsave_location = \"/tmp/media\""
        )
        .unwrap();

        let config = Config::load_or_default(file.path()).unwrap();
        assert_eq!(config.api_key, "abc");
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.save_location, PathBuf::from("/tmp/media"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.api_key, "");
        assert_eq!(config.concurrency, 24);
        assert_eq!(config.save_location, PathBuf::from("downloads"));
    }

    #[test]
    fn zero_concurrency_is_normalized() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "api_key = \"abc\"\nconcurrency = 0").unwrap();

        let config = Config::load_or_default(file.path()).unwrap();
        assert_eq!(config.concurrency, 24);
    }

    #[test]
    fn backup_file_is_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("grab.toml");
        fs::write(dir.path().join("grab.toml.bak"), "api_key = \"bak\"").unwrap();

        let config = Config::load_or_default(&primary).unwrap();
        assert_eq!(config.api_key, "bak");
    }

    #[test]
    fn validate_rejects_missing_api_key() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }
}
