//! # Configuration Management Module
//!
//! Persistent settings for the device being polled, stored in platform-appropriate locations.
//! Handles loading, saving, validation and providing defaults.
//!
//! ## Settings
//! - `address`: BLE address (or platform peripheral id on macOS) of the Energy Advisor
//! - `name`: Optional display name
//! - `pulses_per_kwh`: Metering resolution printed on the meter, 1..=20000
//! - `passkey`: Optional pairing passkey, stored for the OS pairing flow only
//! - `poll_interval_secs`, `connect_timeout_secs`, `notify_timeout_secs`: Timing
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/emerald-ble/config.toml
//! - Linux: ~/.config/emerald-ble/config.toml
//! - Windows: %APPDATA%\emerald-ble\config.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::device::DeviceIdentity;
use crate::error::ConfigError;
use crate::protocol::{DEFAULT_PULSES_PER_KWH, MAX_PULSES_PER_KWH};
use crate::session::FetchOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub address: String,
    pub name: Option<String>,
    pub pulses_per_kwh: u32,
    pub passkey: Option<u32>,
    pub poll_interval_secs: u64,
    pub connect_timeout_secs: u64,
    pub notify_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: String::new(),
            name: None,
            pulses_per_kwh: DEFAULT_PULSES_PER_KWH,
            passkey: None,
            poll_interval_secs: 30,
            connect_timeout_secs: 15,
            notify_timeout_secs: 8,
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("emerald-ble")
            .join("config.toml")
    }

    /// Load config from the default location, creating it if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, writing defaults there if the file is missing
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config = toml::from_str(&contents).map_err(ConfigError::ParseFailed)?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config at {}, writing defaults", path.display());
                let config = Self::default();
                config.save_to(path)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        fs::write(path, toml_string).map_err(ConfigError::WriteFailed)?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::MissingAddress);
        }
        if !(1..=MAX_PULSES_PER_KWH).contains(&self.pulses_per_kwh) {
            return Err(ConfigError::InvalidPulsesPerKwh(self.pulses_per_kwh));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("connect_timeout_secs"));
        }
        if self.notify_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("notify_timeout_secs"));
        }
        Ok(())
    }

    pub fn identity(&self) -> Result<DeviceIdentity, ConfigError> {
        self.validate()?;
        DeviceIdentity::new(self.address.trim(), self.name.clone(), self.pulses_per_kwh)
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            notify_timeout: Duration::from_secs(self.notify_timeout_secs),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}
