//! Configuration file support.
//!
//! Loads settings from `~/.config/rir-stats/config.toml` on Linux
//! (or platform-appropriate location on other OSes).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use crate::reader::{DEFAULT_SECTIONS, ReadOptions};
use crate::split::DEFAULT_SEARCH_WINDOW;

/// One registry whose delegation file is fetched.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderConfig {
    /// Short name, also used as the cache subdirectory.
    pub name: String,

    /// URL of the delegation file. Its checksum is expected at `<url>.md5`.
    pub url: String,
}

impl ProviderConfig {
    fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
        }
    }
}

/// The extended delegation files of the five regional registries.
pub fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::new(
            "afrinic",
            "http://ftp.apnic.net/stats/afrinic/delegated-afrinic-extended-latest",
        ),
        ProviderConfig::new(
            "apnic",
            "http://ftp.apnic.net/stats/apnic/delegated-apnic-extended-latest",
        ),
        ProviderConfig::new(
            "lacnic",
            "http://ftp.apnic.net/stats/lacnic/delegated-lacnic-extended-latest",
        ),
        ProviderConfig::new(
            "ripencc",
            "http://ftp.apnic.net/stats/ripe-ncc/delegated-ripencc-extended-latest",
        ),
        ProviderConfig::new(
            "arin",
            "http://ftp.arin.net/pub/stats/arin/delegated-arin-extended-latest",
        ),
    ]
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of sections each file is split into for parallel parsing.
    pub sections: usize,

    /// Bytes searched for a line terminator around each section boundary.
    pub search_window: usize,

    /// Where fetched files are kept. Defaults to `~/.rir`.
    #[serde(rename = "cache_dir")]
    pub cache_dir_override: Option<PathBuf>,

    /// Cached files younger than this many seconds are used without checking.
    pub max_age_secs: u64,

    /// HTTP request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Registries to fetch.
    pub providers: Vec<ProviderConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sections: DEFAULT_SECTIONS,
            search_window: DEFAULT_SEARCH_WINDOW,
            cache_dir_override: None,
            max_age_secs: 86_400,
            request_timeout_secs: 60,
            providers: default_providers(),
        }
    }
}

impl Config {
    /// Load configuration from the default config file location.
    ///
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but is malformed.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => {
                let content = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                toml::from_str(&content)
                    .with_context(|| format!("Invalid TOML in config file: {}", path.display()))
            }
            _ => Ok(Config::default()),
        }
    }

    /// Returns the path to the config file.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("rir-stats/config.toml"))
    }

    /// Directory holding cached delegation files.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        match &self.cache_dir_override {
            Some(dir) => Ok(dir.clone()),
            None => dirs::home_dir()
                .map(|home| home.join(".rir"))
                .context("Cannot determine home directory for the cache"),
        }
    }

    /// Reader settings derived from this configuration.
    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            sections: self.sections,
            search_window: self.search_window,
        }
    }

    /// Validate all configuration settings.
    pub fn validate(&self) -> Result<()> {
        if self.sections == 0 {
            anyhow::bail!("sections must be at least 1");
        }
        if self.search_window == 0 {
            anyhow::bail!("search_window must be at least 1");
        }

        let mut seen = HashSet::new();
        for (i, provider) in self.providers.iter().enumerate() {
            if provider.name.trim().is_empty() {
                anyhow::bail!("Invalid provider [{}]: empty name", i);
            }
            if !seen.insert(provider.name.as_str()) {
                anyhow::bail!("Invalid provider [{}]: duplicate name {:?}", i, provider.name);
            }
        }
        Ok(())
    }
}
