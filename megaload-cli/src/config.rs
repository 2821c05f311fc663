//! Configuration file support for megaload.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (MEGALOAD_*)
//! 3. Local config file (./megaload.toml)
//! 4. Global config file (~/.config/megaload/config.toml)
//!
//! `--config PATH` replaces sources 3 and 4 with a single file.
//!
//! ```toml
//! [connection]
//! port = "/dev/ttyUSB0"
//! baud = 38400
//! timeout = 10
//! stop_bits = 2
//!
//! [device]
//! profile = "megaload"
//! field_order = "page,proc,flash,boot,eeprom"
//! reset = "reset\n"
//! page_timeout = 3
//! max_failures = 3
//! ```

use crate::CliError;
use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the local config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "megaload.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
    /// Handshake timeout in seconds.
    pub timeout: Option<u64>,
    /// Stop bits (1 or 2).
    pub stop_bits: Option<u8>,
}

/// Device configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Device profile name ("megaload" or "generic").
    pub profile: Option<String>,
    /// Procinfo field order tokens.
    pub field_order: Option<String>,
    /// Reset sequence, with C-style escapes.
    pub reset: Option<String>,
    /// Page acknowledgement timeout in seconds.
    pub page_timeout: Option<u64>,
    /// Consecutive failures tolerated per page.
    pub max_failures: Option<u32>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Device settings.
    #[serde(default)]
    pub device: DeviceConfig,
}

impl Config {
    /// Load configuration from the global and local files.
    ///
    /// Unreadable or malformed files are reported and skipped.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                match Self::load_from_file(&global_path) {
                    Ok(global) => {
                        debug!("Loaded global config from {}", global_path.display());
                        config.merge(global);
                    },
                    Err(e) => warn!("{e}"),
                }
            }
        }

        let local_path = Path::new(LOCAL_CONFIG_FILE);
        if local_path.exists() {
            match Self::load_from_file(local_path) {
                Ok(local) => {
                    debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
                    config.merge(local);
                },
                Err(e) => warn!("{e}"),
            }
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    ///
    /// Unlike [`Config::load`], a missing or malformed file is an error.
    pub fn load_from_path(path: &Path) -> Result<Self, CliError> {
        let config = Self::load_from_file(path)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self, CliError> {
        let content = fs::read_to_string(path).map_err(|e| {
            CliError::Usage(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        toml::from_str(&content).map_err(|e| {
            CliError::Usage(format!("Failed to parse TOML config file {}: {e}", path.display()))
        })
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "megaload").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; values set in `other` win.
    fn merge(&mut self, other: Self) {
        let Self { connection, device } = other;

        if connection.port.is_some() {
            self.connection.port = connection.port;
        }
        if connection.baud.is_some() {
            self.connection.baud = connection.baud;
        }
        if connection.timeout.is_some() {
            self.connection.timeout = connection.timeout;
        }
        if connection.stop_bits.is_some() {
            self.connection.stop_bits = connection.stop_bits;
        }

        if device.profile.is_some() {
            self.device.profile = device.profile;
        }
        if device.field_order.is_some() {
            self.device.field_order = device.field_order;
        }
        if device.reset.is_some() {
            self.device.reset = device.reset;
        }
        if device.page_timeout.is_some() {
            self.device.page_timeout = device.page_timeout;
        }
        if device.max_failures.is_some() {
            self.device.max_failures = device.max_failures;
        }
    }
}
