//! # Link Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TETHER_DEVICE_ID=C3:1A:00:00:12:34                                 │
//! │     TETHER_ACK_TIMEOUT_MS=3000                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tether/link.toml (Linux)                                 │
//! │     ~/Library/Application Support/dev.tether.tether/link.toml (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     tlw64 family, 5 s ack timeout, generated device id                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [device]
//! id = "C3:1A:00:00:12:34"
//! name = "Wrist Band"
//! family = "tlw64"
//!
//! [link]
//! ack_timeout_ms = 5000
//! queue_capacity = 32
//! initial_backoff_ms = 500
//! max_backoff_secs = 60
//! max_reconnect_attempts = 0  # 0 = infinite
//!
//! [agps]
//! max_archive_bytes = 1048576
//!
//! [profile]
//! gender = "female"
//! height_cm = 0               # 0 = unset
//! weight_kg = 70
//! age = 30
//! steps_goal = 8000
//!
//! [display]
//! units = "metric"
//! time_format = "24h"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use tether_core::{
    ActivityUser, DeviceFamilyKind, InitContext, MeasurementSystem, TimeFormat, MAX_ARCHIVE_BYTES,
};

use crate::error::{LinkError, LinkResult};

// =============================================================================
// Device Configuration
// =============================================================================

/// The band this process talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device identifier, usually the radio address.
    pub id: String,

    #[serde(default = "default_device_name")]
    pub name: String,

    /// Frame layout family.
    #[serde(default)]
    pub family: DeviceFamilyKind,
}

fn default_device_name() -> String {
    "Wrist Band".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
            family: DeviceFamilyKind::default(),
        }
    }
}

// =============================================================================
// Link Settings
// =============================================================================

/// Queue and reconnect behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSettings {
    /// How long a single write may wait for its ack.
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,

    /// Transactions that can wait in a device's queue before `enqueue` blocks.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Reconnect attempts per outage. 0 retries forever.
    #[serde(default)]
    pub max_reconnect_attempts: u32,
}

fn default_ack_timeout() -> u64 {
    5000
}
fn default_queue_capacity() -> usize {
    32
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    60
}

impl Default for LinkSettings {
    fn default() -> Self {
        LinkSettings {
            ack_timeout_ms: default_ack_timeout(),
            queue_capacity: default_queue_capacity(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            max_reconnect_attempts: 0,
        }
    }
}

// =============================================================================
// AGPS + Storage Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgpsSettings {
    /// Directory holding `<device>.agps` files. Platform cache dir if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Read cap for cached archives.
    #[serde(default = "default_max_archive_bytes")]
    pub max_archive_bytes: u64,
}

fn default_max_archive_bytes() -> u64 {
    MAX_ARCHIVE_BYTES
}

impl Default for AgpsSettings {
    fn default() -> Self {
        AgpsSettings {
            cache_dir: None,
            max_archive_bytes: default_max_archive_bytes(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Preference file. Platform data dir if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences_path: Option<PathBuf>,
}

/// Units and clock style shown on the band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySettings {
    #[serde(default)]
    pub units: MeasurementSystem,

    #[serde(default)]
    pub time_format: TimeFormat,
}

// =============================================================================
// Main Link Configuration
// =============================================================================

/// Complete link configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub link: LinkSettings,

    #[serde(default)]
    pub agps: AgpsSettings,

    #[serde(default)]
    pub store: StoreSettings,

    /// Wearer profile pushed during initialization.
    #[serde(default)]
    pub profile: ActivityUser,

    #[serde(default)]
    pub display: DisplaySettings,
}

impl LinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (link.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> LinkResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading link config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load link config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> LinkResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| LinkError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Link config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> LinkResult<()> {
        if self.device.id.is_empty() {
            return Err(LinkError::MissingDeviceId);
        }

        if self.link.ack_timeout_ms == 0 {
            return Err(LinkError::InvalidConfig(
                "ack_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.link.queue_capacity == 0 {
            return Err(LinkError::InvalidConfig(
                "queue_capacity must be greater than 0".into(),
            ));
        }

        if self.link.initial_backoff_ms == 0
            || self.link.initial_backoff_ms > self.link.max_backoff_secs.saturating_mul(1000)
        {
            return Err(LinkError::InvalidConfig(format!(
                "initial_backoff_ms ({}) must be between 1 and max_backoff_secs ({} s)",
                self.link.initial_backoff_ms, self.link.max_backoff_secs
            )));
        }

        if self.agps.max_archive_bytes == 0 {
            return Err(LinkError::InvalidConfig(
                "max_archive_bytes must be greater than 0".into(),
            ));
        }

        // The user data frame carries weight in a single byte.
        if self.profile.weight_kg > u16::from(u8::MAX) {
            return Err(LinkError::InvalidConfig(format!(
                "weight_kg must be at most 255, got {}",
                self.profile.weight_kg
            )));
        }

        Ok(())
    }

    /// Applies `TETHER_*` overrides looked up through `var`.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(id) = var("TETHER_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Some(name) = var("TETHER_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Some(family) = var("TETHER_DEVICE_FAMILY") {
            match family.parse() {
                Ok(parsed) => self.device.family = parsed,
                Err(e) => warn!(error = %e, "Ignoring device family from environment"),
            }
        }

        if let Some(ms) = var("TETHER_ACK_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                debug!(ack_timeout_ms = ms, "Overriding ack timeout from environment");
                self.link.ack_timeout_ms = ms;
            }
        }

        if let Some(dir) = var("TETHER_AGPS_CACHE_DIR") {
            self.agps.cache_dir = Some(PathBuf::from(dir));
        }

        if let Some(path) = var("TETHER_PREFERENCES_PATH") {
            self.store.preferences_path = Some(PathBuf::from(path));
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("dev", "tether", "tether")
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("link.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    pub fn family(&self) -> DeviceFamilyKind {
        self.device.family
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.link.ack_timeout_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.link.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.link.max_backoff_secs)
    }

    /// Configured cache dir, else `<platform cache>/agps`, else `./agps-cache`.
    pub fn cache_dir(&self) -> PathBuf {
        self.agps
            .cache_dir
            .clone()
            .or_else(|| Self::project_dirs().map(|d| d.cache_dir().join("agps")))
            .unwrap_or_else(|| PathBuf::from("agps-cache"))
    }

    /// Configured preference file, else `<platform data>/preferences.json`.
    pub fn preferences_path(&self) -> PathBuf {
        self.store
            .preferences_path
            .clone()
            .or_else(|| Self::project_dirs().map(|d| d.data_dir().join("preferences.json")))
            .unwrap_or_else(|| PathBuf::from("preferences.json"))
    }

    /// Initialization context for a connection made at `now`.
    pub fn init_context(&self, now: NaiveDateTime) -> InitContext {
        InitContext {
            now,
            user: self.profile.clone(),
            units: self.display.units,
            time_format: self.display.time_format,
        }
    }
}
