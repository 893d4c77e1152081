//! Configuration file loader.

use std::path::{Path, PathBuf};

use super::RunnerConfig;

/// Configuration loader that searches multiple locations.
#[derive(Debug)]
pub struct ConfigLoader {
    /// Search paths in order of priority.
    search_paths: Vec<PathBuf>,
    /// Set when the user named the file; it must then exist.
    explicit: bool,
}

impl ConfigLoader {
    /// Create a new config loader with default search paths.
    #[must_use]
    pub fn new() -> Self {
        let mut search_paths = Vec::new();

        // 1. Current directory: fx-supervisor.toml
        search_paths.push(PathBuf::from("fx-supervisor.toml"));

        // 2. User config directory: ~/.config/fx-supervisor/config.toml
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("fx-supervisor").join("config.toml"));
        }

        Self {
            search_paths,
            explicit: false,
        }
    }

    /// Create a config loader with a specific config file path.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            search_paths: vec![path],
            explicit: true,
        }
    }

    /// Load configuration from the first available file, or return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or if
    /// an explicitly given file cannot be read.
    pub fn load(&self) -> Result<RunnerConfig, ConfigError> {
        if self.explicit {
            if let Some(path) = self.search_paths.first() {
                return Self::load_from_path(path);
            }
        }

        match self.find_config_file() {
            Some(path) => Self::load_from_path(&path),
            None => {
                tracing::debug!(
                    searched = ?self.search_paths,
                    "No config file found, using defaults"
                );
                Ok(RunnerConfig::default())
            }
        }
    }

    /// Load configuration from a specific path.
    fn load_from_path(path: &Path) -> Result<RunnerConfig, ConfigError> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Find the first config file that exists.
    #[must_use]
    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths.iter().find(|p| p.exists()).cloned()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
}
