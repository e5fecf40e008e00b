//! Configuration file support for myriota-dfu.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (MYRIOTA_DFU_*)
//! 3. Local config file (./myriota-dfu.toml)
//! 4. Global config file (~/.config/myriota-dfu/config.toml)
//!
//! A file named with `--config` replaces 3 and 4.

use anyhow::Context as _;
use directories::ProjectDirs;
use log::{debug, warn};
use myriota_dfu::UpdaterConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::CliError;

/// Name of the per-directory config file.
pub const LOCAL_CONFIG_FILE: &str = "myriota-dfu.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Update tuning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Ceiling for one upload, in seconds.
    pub transfer_timeout_secs: Option<u64>,
    /// Wait for the application start banner, in seconds.
    pub start_timeout_secs: Option<u64>,
    /// NAKs tolerated per block before cancelling.
    pub max_block_retries: Option<u32>,
    /// Largest single write to the port.
    pub max_payload: Option<usize>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Update settings.
    #[serde(default)]
    pub update: UpdateConfig,
}

impl Config {
    /// Load configuration from the global and local files.
    ///
    /// Unreadable files are skipped with a warning.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            match Self::load_from_file(&global_path) {
                Ok(Some(global)) => {
                    debug!("Loaded global config from {}", global_path.display());
                    config.merge(global);
                },
                Ok(None) => {},
                Err(e) => warn!("{e:#}"),
            }
        }

        // Load local config (overrides global)
        match Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            Ok(Some(local)) => {
                debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
                config.merge(local);
            },
            Ok(None) => {},
            Err(e) => warn!("{e:#}"),
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    ///
    /// Unlike [`Config::load`], a missing or invalid file is an error.
    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        match Self::load_from_file(path)? {
            Some(config) => {
                debug!("Loaded config from {}", path.display());
                Ok(config)
            },
            None => Err(CliError::Config(format!(
                "Config file not found: {}",
                path.display()
            ))
            .into()),
        }
    }

    /// Parse one file; `Ok(None)` when it does not exist.
    fn load_from_file(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = toml::from_str(&content).map_err(|e| {
            CliError::Config(format!(
                "Failed to parse config file {}: {e}",
                path.display()
            ))
        })?;
        Ok(Some(config))
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "myriota-dfu").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        // Connection
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }

        // Update
        if other.update.transfer_timeout_secs.is_some() {
            self.update.transfer_timeout_secs = other.update.transfer_timeout_secs;
        }
        if other.update.start_timeout_secs.is_some() {
            self.update.start_timeout_secs = other.update.start_timeout_secs;
        }
        if other.update.max_block_retries.is_some() {
            self.update.max_block_retries = other.update.max_block_retries;
        }
        if other.update.max_payload.is_some() {
            self.update.max_payload = other.update.max_payload;
        }
    }

    /// Library settings with the configured overrides applied.
    pub fn updater_config(&self) -> UpdaterConfig {
        let mut updater = UpdaterConfig::default();
        if let Some(secs) = self.update.transfer_timeout_secs {
            updater = updater.with_transfer_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.update.start_timeout_secs {
            updater = updater.with_start_timeout(Duration::from_secs(secs));
        }
        updater.with_max_block_retries(self.update.max_block_retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.serial.is_none());
        assert!(config.connection.baud.is_none());
        assert!(config.update.transfer_timeout_secs.is_none());
        assert!(config.update.max_payload.is_none());
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.connection.serial = Some("/dev/ttyUSB0".to_string());
        base.update.max_block_retries = Some(10);

        base.merge(Config::default());

        assert_eq!(base.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.update.max_block_retries, Some(10));
    }

    #[test]
    fn test_config_merge_overrides() {
        let mut base = Config::default();
        base.connection.baud = Some(9600);

        let mut other = Config::default();
        other.connection.baud = Some(115200);
        other.update.start_timeout_secs = Some(60);
        base.merge(other);

        assert_eq!(base.connection.baud, Some(115200));
        assert_eq!(base.update.start_timeout_secs, Some(60));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[connection]
serial = "/dev/ttyUSB0"
baud = 115200

[update]
transfer_timeout_secs = 300
start_timeout_secs = 30
max_block_retries = 16
max_payload = 244
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.connection.baud, Some(115200));
        assert_eq!(config.update.transfer_timeout_secs, Some(300));
        assert_eq!(config.update.start_timeout_secs, Some(30));
        assert_eq!(config.update.max_block_retries, Some(16));
        assert_eq!(config.update.max_payload, Some(244));
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.connection.serial.is_none());
        assert!(config.update.max_block_retries.is_none());
    }

    #[test]
    fn test_updater_config_overrides() {
        let mut config = Config::default();
        config.update.transfer_timeout_secs = Some(10);
        config.update.max_block_retries = Some(5);

        let updater = config.updater_config();
        assert_eq!(updater.transfer_timeout, Duration::from_secs(10));
        assert_eq!(updater.start_timeout, Duration::from_secs(45));
        assert_eq!(updater.xmodem.max_block_retries, Some(5));
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempdir().unwrap();
        let path = dir
            .path()
            .join("custom.toml");
        fs::write(
            &path,
            r#"
[connection]
serial = "/dev/ttyACM1"
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.connection.serial.as_deref(), Some("/dev/ttyACM1"));
    }

    #[test]
    fn test_load_from_path_missing_is_config_error() {
        let err = Config::load_from_path(Path::new("/nonexistent/path/config.toml")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_path_invalid_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir
            .path()
            .join("broken.toml");
        fs::write(&path, "invalid toml [[[").unwrap();

        let err = Config::load_from_path(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Config(_))
        ));
    }

    #[test]
    fn test_global_config_path() {
        if let Some(p) = Config::global_config_path() {
            assert!(p.to_str().unwrap().contains("myriota-dfu"));
            assert!(p.to_str().unwrap().ends_with("config.toml"));
        }
    }
}
