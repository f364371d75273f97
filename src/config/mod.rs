//! Configuration module for bdepot.
//!
//! Handles loading and parsing the .bdepotrc configuration file.

pub mod platform;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use platform::Platform;

use crate::logging::LogConfig;

/// Default probe timeout in seconds.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 120;

/// Default package index base URL.
pub const DEFAULT_PACKAGE_INDEX_URL: &str = "https://pypi.org";

/// Default .bdepotrc file content with all settings documented.
const DEFAULT_BDEPOTRC: &str = r#"# bdepot Configuration File
# ==========================
# This file is read on startup.
# Lines starting with '#' are comments.
#
# Repository
# ----------
# Directory holding the component repository. Created on first use.
# repository = ~/BlenderDepot

# Object pool cache file (programs probed once are reused across runs)
# object_pool_file = ~/.bdepot/object_pool.json

# External Tools
# --------------
# Seconds to wait for blender/python probes before giving up
# probe_timeout = 120

# Package index used to enrich package summaries
# package_index_url = https://pypi.org

# Logging Configuration
# ---------------------
# Logs are stored in ~/.bdepot/logs/ with automatic cleanup.
#
# log_enabled = true       # Enable/disable file logging (true/false)
# log_level = info         # Log level: trace, debug, info, warn, error, off
# log_retention = 24       # Hours to keep log files (default: 24)
"#;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to config file.
    pub config_path: PathBuf,
    /// Repository root directory.
    pub repository: PathBuf,
    /// Object pool cache file.
    pub object_pool_file: PathBuf,
    /// Timeout for external probes.
    pub probe_timeout: Duration,
    /// Package index base URL.
    pub package_index_url: String,
    /// Logging configuration.
    pub log_config: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            config_path: Self::default_config_path(),
            repository: home.join("BlenderDepot"),
            object_pool_file: home.join(".bdepot").join("object_pool.json"),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            package_index_url: DEFAULT_PACKAGE_INDEX_URL.to_string(),
            log_config: LogConfig::default(),
        }
    }
}

impl Config {
    /// Returns the default config file path (~/.bdepotrc).
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".bdepotrc")
    }

    /// Loads configuration from the default path, creating it if it doesn't exist.
    ///
    /// # Errors
    /// Returns error if config cannot be read.
    pub fn load() -> io::Result<Self> {
        Self::load_from(&Self::default_config_path())
    }

    /// Loads configuration from a specific path.
    ///
    /// # Errors
    /// Returns error if config cannot be read.
    pub fn load_from(path: &Path) -> io::Result<Self> {
        if !path.exists() {
            Self::create_default_config(path)?;
        }

        let content = fs::read_to_string(path)?;
        let mut config = Self {
            config_path: path.to_path_buf(),
            ..Self::default()
        };
        config.parse(&content);
        Ok(config)
    }

    /// Creates the default config file.
    fn create_default_config(path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(path)?;
        file.write_all(DEFAULT_BDEPOTRC.as_bytes())?;
        Ok(())
    }

    /// Parses the config file content.
    fn parse(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim();

                // Remove inline comments
                let value = value.split('#').next().unwrap_or(value).trim();

                self.apply_setting(key, value);
            }
        }
    }

    /// Applies a single setting.
    fn apply_setting(&mut self, key: &str, value: &str) {
        match key {
            "repository" | "repo" => {
                self.repository = expand_home(value);
            }
            "object_pool_file" => {
                self.object_pool_file = expand_home(value);
            }
            "probe_timeout" => match value.parse::<u64>() {
                Ok(secs) if secs > 0 => self.probe_timeout = Duration::from_secs(secs),
                _ => tracing::warn!("Ignoring invalid probe_timeout: {}", value),
            },
            "package_index_url" => {
                self.package_index_url = value.trim_end_matches('/').to_string();
            }
            "log_level" => {
                self.log_config.level = LogConfig::parse_level(value);
            }
            "log_retention" | "log_retention_hours" => {
                self.log_config.retention_hours = LogConfig::parse_retention(value);
            }
            "log_enabled" | "logging" => {
                self.log_config.enabled =
                    matches!(value.to_lowercase().as_str(), "true" | "yes" | "1" | "on");
            }
            _ => {
                tracing::debug!("Unknown config key: {}", key);
            }
        }
    }

    /// Reloads the configuration from disk.
    ///
    /// # Errors
    /// Returns error if config cannot be read.
    pub fn reload(&mut self) -> io::Result<()> {
        let path = self.config_path.clone();
        *self = Self::load_from(&path)?;
        Ok(())
    }
}

/// Expands a leading `~` to the home directory.
#[must_use]
pub fn expand_home(value: &str) -> PathBuf {
    if let Some(rest) = value.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest.trim_start_matches(['/', '\\']));
        }
    }
    PathBuf::from(value)
}
