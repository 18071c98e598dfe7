//! JSON Configuration Management
//!
//! Handles reading and writing the application configuration file.

use std::fs;
use std::path::{Path, PathBuf};

use crate::models::settings::AppConfig;
use crate::utils::error::{AppError, AppResult};

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "retail-copilot.json";

/// Configuration service for loading app settings
#[derive(Debug)]
pub struct ConfigService {
    config_path: Option<PathBuf>,
    config: AppConfig,
}

impl ConfigService {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `retail-copilot.json` in the
    /// working directory is used if present, otherwise defaults.
    pub fn load(explicit: Option<&Path>) -> AppResult<Self> {
        let (config_path, config) = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(AppError::not_found(format!(
                        "config file {}",
                        path.display()
                    )));
                }
                (Some(path.to_path_buf()), Self::load_from_file(path)?)
            }
            None => {
                let candidate = PathBuf::from(DEFAULT_CONFIG_FILE);
                if candidate.exists() {
                    let config = Self::load_from_file(&candidate)?;
                    (Some(candidate), config)
                } else {
                    (None, AppConfig::default())
                }
            }
        };

        if let Some(path) = &config_path {
            tracing::debug!(path = %path.display(), "loaded configuration");
        }

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a file
    fn load_from_file(path: &Path) -> AppResult<AppConfig> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        config.validate().map_err(AppError::validation)?;
        Ok(config)
    }

    /// Save configuration to a file with pretty formatting
    pub fn save_to_file(path: &Path, config: &AppConfig) -> AppResult<()> {
        config.validate().map_err(AppError::validation)?;
        let content = serde_json::to_string_pretty(config)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the current configuration
    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    /// Get a clone of the current configuration
    pub fn get_config_clone(&self) -> AppConfig {
        self.config.clone()
    }

    /// File the configuration was read from, if any
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Replace the configuration after applying command-line overrides.
    pub fn override_with(&mut self, config: AppConfig) -> AppResult<()> {
        config.validate().map_err(AppError::validation)?;
        self.config = config;
        Ok(())
    }
}

impl Default for ConfigService {
    fn default() -> Self {
        Self {
            config_path: None,
            config: AppConfig::default(),
        }
    }
}
