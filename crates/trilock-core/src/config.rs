//! Deployment configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```
//! use trilock_core::TriLockConfig;
//!
//! let config = TriLockConfig::from_toml_str("").unwrap();
//! assert_eq!(config.engine.settle_delay_ms, 800);
//! assert_eq!(config.engine.auto_lock_secs, 10);
//! ```
//!
//! A deployment that wants simulated factors cleared on every mode switch:
//!
//! ```toml
//! [engine]
//! mode_switch_policy = "reset_verified"
//!
//! [[registry.devices]]
//! id = "AA:BB:CC:DD:EE:FF"
//! name = "Pocket beacon"
//! kind = "bluetooth"
//! ```

use crate::{
    Result,
    constants::{
        DEFAULT_AUTO_LOCK_SECS, DEFAULT_JOURNAL_CAPACITY, DEFAULT_RECONNECT_INITIAL_MS,
        DEFAULT_RECONNECT_MAX_MS, DEFAULT_RSSI_THRESHOLD_DBM, DEFAULT_SETTLE_DELAY_MS,
        DEFAULT_WRITE_TIMEOUT_MS,
    },
    error::Error,
    registry::DeviceRegistry,
    types::{AuthorizedKey, ConnectionMode, ModeSwitchPolicy, RegisteredDevice},
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_auto_lock_secs")]
    pub auto_lock_secs: u32,

    #[serde(default = "default_journal_capacity")]
    pub journal_capacity: usize,

    #[serde(default)]
    pub initial_mode: ConnectionMode,

    #[serde(default)]
    pub mode_switch_policy: ModeSwitchPolicy,
}

fn default_settle_delay_ms() -> u64 {
    DEFAULT_SETTLE_DELAY_MS
}

fn default_auto_lock_secs() -> u32 {
    DEFAULT_AUTO_LOCK_SECS
}

fn default_journal_capacity() -> usize {
    DEFAULT_JOURNAL_CAPACITY
}

impl EngineConfig {
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            auto_lock_secs: default_auto_lock_secs(),
            journal_capacity: default_journal_capacity(),
            initial_mode: ConnectionMode::default(),
            mode_switch_policy: ModeSwitchPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Minimum advertisement RSSI (dBm) that counts as "near".
    #[serde(default = "default_rssi_threshold_dbm")]
    pub rssi_threshold_dbm: i16,

    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

fn default_rssi_threshold_dbm() -> i16 {
    DEFAULT_RSSI_THRESHOLD_DBM
}

fn default_reconnect_initial_ms() -> u64 {
    DEFAULT_RECONNECT_INITIAL_MS
}

fn default_reconnect_max_ms() -> u64 {
    DEFAULT_RECONNECT_MAX_MS
}

fn default_write_timeout_ms() -> u64 {
    DEFAULT_WRITE_TIMEOUT_MS
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            rssi_threshold_dbm: default_rssi_threshold_dbm(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

/// Initial registry contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_keys")]
    pub keys: Vec<AuthorizedKey>,

    #[serde(default)]
    pub devices: Vec<RegisteredDevice>,
}

fn default_keys() -> Vec<AuthorizedKey> {
    vec![AuthorizedKey {
        id: "KEY-001".to_string(),
        name: "Master Key A".to_string(),
        fingerprint_enrolled: true,
        vein_enrolled: true,
        battery_level: 85,
    }]
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            keys: default_keys(),
            devices: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriLockConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub link: LinkConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TriLockConfig {
    /// Read and validate a TOML configuration file.
    ///
    /// # Errors
    /// Returns `Error::Io` if the file cannot be read, `Error::ConfigParse`
    /// for malformed TOML, `Error::Config` for out-of-range values and
    /// `Error::InvalidId` for blank registry ids or names.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    /// See [`TriLockConfig::load`].
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns `Error::Config` naming the first invalid field, or the key or
    /// device error for the first invalid registry entry.
    pub fn validate(&self) -> Result<()> {
        if self.engine.settle_delay_ms == 0 {
            return Err(Error::Config(
                "engine.settle_delay_ms must be positive".to_string(),
            ));
        }
        if self.engine.auto_lock_secs == 0 {
            return Err(Error::Config(
                "engine.auto_lock_secs must be positive".to_string(),
            ));
        }
        if self.engine.journal_capacity == 0 {
            return Err(Error::Config(
                "engine.journal_capacity must be at least 1".to_string(),
            ));
        }
        if !(-127..=0).contains(&self.link.rssi_threshold_dbm) {
            return Err(Error::Config(format!(
                "link.rssi_threshold_dbm must be within -127..=0, got {}",
                self.link.rssi_threshold_dbm
            )));
        }
        if self.link.reconnect_initial_ms == 0
            || self.link.reconnect_initial_ms > self.link.reconnect_max_ms
        {
            return Err(Error::Config(format!(
                "link.reconnect_initial_ms ({}) must be positive and <= link.reconnect_max_ms ({})",
                self.link.reconnect_initial_ms, self.link.reconnect_max_ms
            )));
        }
        if self.link.write_timeout_ms == 0 {
            return Err(Error::Config(
                "link.write_timeout_ms must be positive".to_string(),
            ));
        }
        for key in &self.registry.keys {
            key.validate()?;
        }
        for device in &self.registry.devices {
            device.validate()?;
        }
        Ok(())
    }

    /// Build the initial registry from the `[registry]` section.
    ///
    /// # Errors
    /// Returns `Error::DuplicateId` if ids repeat.
    pub fn build_registry(&self) -> Result<DeviceRegistry> {
        DeviceRegistry::from_parts(self.registry.keys.clone(), self.registry.devices.clone())
    }
}
