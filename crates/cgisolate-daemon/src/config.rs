use cgisolate_core::IsolationConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for the cgisolate daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Resource isolation settings (`[network]`, `[disk]`, `[cgroups]`, `[executor]`)
    #[serde(flatten)]
    pub isolation: IsolationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LogConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log directory path (default: ./logs/)
    pub log_dir: PathBuf,

    /// Daily rolled log file prefix (default: cgisolate-daemon.log)
    pub file_name: String,
}

/// Where the loaded settings came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    /// No config file
    Defaults,
    /// Config file ignored, with the reason
    Rejected(String),
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./logs"),
            file_name: "cgisolate-daemon.log".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Example
    /// ```no_run
    /// use cgisolate_daemon::config::Config;
    ///
    /// let config = Config::load_from_file("/etc/cgisolate/config.toml").unwrap();
    /// println!("Network enforcement: {}", config.isolation.network.enabled);
    /// ```
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load and validate `path` for commands that act on the settings.
    ///
    /// A missing file means defaults.
    pub fn load_checked(path: impl AsRef<Path>) -> Result<(Self, ConfigSource), String> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok((Self::default(), ConfigSource::Defaults));
        }

        let config = Self::load_from_file(path)
            .map_err(|e| format!("Failed to load configuration file {:?}: {}", path, e))?;
        config
            .validate()
            .map_err(|e| format!("Configuration validation failed: {}", e))?;
        Ok((config, ConfigSource::File))
    }

    /// Load `path` for commands that must work even with a broken config file.
    ///
    /// Anything [`Self::load_checked`] rejects falls back to defaults.
    pub fn load_lenient(path: impl AsRef<Path>) -> (Self, ConfigSource) {
        Self::load_checked(path)
            .unwrap_or_else(|reason| (Self::default(), ConfigSource::Rejected(reason)))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        self.isolation.validate()?;

        if self.logging.file_name.trim().is_empty() {
            return Err("Log file name must not be empty".to_string());
        }

        Ok(())
    }

    /// Get full path to the current log file prefix
    pub fn log_path(&self) -> PathBuf {
        self.logging.log_dir.join(&self.logging.file_name)
    }
}
