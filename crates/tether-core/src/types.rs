//! # Domain Types
//!
//! Core domain types used throughout Tether.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  DeviceState    │   │   AgpsStatus    │   │  Constellation  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Disconnected   │   │  Unknown        │   │  GPS            │       │
//! │  │  Connecting     │   │  Current        │   │  GLONASS        │       │
//! │  │  Initializing   │   │  Error          │   │  QZSS           │       │
//! │  │  Initialized    │   └─────────────────┘   │  GALILEO        │       │
//! │  │  Error          │                         └─────────────────┘       │
//! │  └─────────────────┘                                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  ActivityUser   │   │MeasurementSystem│   │   TimeFormat    │       │
//! │  │  gender, height │   │  Metric         │   │  H24            │       │
//! │  │  weight, age    │   │  Imperial       │   │  H12            │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

// =============================================================================
// Device State
// =============================================================================

/// Connection/initialization state of one device.
///
/// `Initialized` is only reachable through `Initializing`; `Error` is
/// reachable from anywhere and is left only by reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    #[default]
    Disconnected,
    Connecting,
    Initializing,
    Initialized,
    Error,
}

impl DeviceState {
    /// Returns true once the device accepts user-action transactions.
    pub fn is_ready(&self) -> bool {
        matches!(self, DeviceState::Initialized)
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceState::Disconnected => write!(f, "disconnected"),
            DeviceState::Connecting => write!(f, "connecting"),
            DeviceState::Initializing => write!(f, "initializing"),
            DeviceState::Initialized => write!(f, "initialized"),
            DeviceState::Error => write!(f, "error"),
        }
    }
}

// =============================================================================
// AGPS Status
// =============================================================================

/// User-visible freshness of the almanac data on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgpsStatus {
    #[default]
    Unknown,
    Current,
    Error,
}

impl std::fmt::Display for AgpsStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgpsStatus::Unknown => write!(f, "UNKNOWN"),
            AgpsStatus::Current => write!(f, "CURRENT"),
            AgpsStatus::Error => write!(f, "ERROR"),
        }
    }
}

// =============================================================================
// Constellation
// =============================================================================

/// A satellite system a device can request almanac data for.
///
/// Each constellation maps to exactly one file inside the AGPS archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Constellation {
    Gps,
    Glonass,
    Qzss,
    Galileo,
}

impl Constellation {
    /// Every known constellation.
    pub const ALL: [Constellation; 4] = [
        Constellation::Gps,
        Constellation::Glonass,
        Constellation::Qzss,
        Constellation::Galileo,
    ];

    /// Name used on the wire by the device (`constellations=GPS,GLONASS`).
    pub fn name(&self) -> &'static str {
        match self {
            Constellation::Gps => "GPS",
            Constellation::Glonass => "GLONASS",
            Constellation::Qzss => "QZSS",
            Constellation::Galileo => "GALILEO",
        }
    }

    /// Archive entry holding this constellation's almanac.
    pub fn file_name(&self) -> &'static str {
        match self {
            Constellation::Gps => "CPE_GPS.BIN",
            Constellation::Glonass => "CPE_GLO.BIN",
            Constellation::Qzss => "CPE_QZSS.BIN",
            Constellation::Galileo => "CPE_GAL.BIN",
        }
    }
}

impl std::fmt::Display for Constellation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Unrecognized constellation name. Matching is exact and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown constellation: '{0}'")]
pub struct UnknownConstellation(pub String);

impl std::str::FromStr for Constellation {
    type Err = UnknownConstellation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Constellation::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| UnknownConstellation(s.to_string()))
    }
}

// =============================================================================
// User Profile
// =============================================================================

/// Profile category used for stride estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Female,
    #[default]
    Male,
    Other,
}

/// The wearer's profile as pushed to the band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityUser {
    #[serde(default)]
    pub gender: Gender,

    /// Height in centimetres; `None` falls back to a per-category stride.
    #[serde(default)]
    pub height_cm: Option<u16>,

    #[serde(default = "default_weight_kg")]
    pub weight_kg: u16,

    #[serde(default = "default_age")]
    pub age: u8,

    #[serde(default = "default_steps_goal")]
    pub steps_goal: u32,
}

fn default_weight_kg() -> u16 {
    70
}

fn default_age() -> u8 {
    30
}

fn default_steps_goal() -> u32 {
    8000
}

impl Default for ActivityUser {
    fn default() -> Self {
        ActivityUser {
            gender: Gender::default(),
            height_cm: None,
            weight_kg: default_weight_kg(),
            age: default_age(),
            steps_goal: default_steps_goal(),
        }
    }
}

// =============================================================================
// Display Preferences
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementSystem {
    #[default]
    Metric,
    Imperial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeFormat {
    #[default]
    #[serde(rename = "24h")]
    H24,
    #[serde(rename = "12h")]
    H12,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constellation_lookup_is_exact() {
        assert_eq!("GPS".parse::<Constellation>().unwrap(), Constellation::Gps);
        assert_eq!(
            "GALILEO".parse::<Constellation>().unwrap(),
            Constellation::Galileo
        );
        assert!("gps".parse::<Constellation>().is_err());
        assert!(" GPS".parse::<Constellation>().is_err());
        assert!("".parse::<Constellation>().is_err());
        assert!("BEIDOU".parse::<Constellation>().is_err());
    }

    #[test]
    fn test_constellation_file_names() {
        assert_eq!(Constellation::Gps.file_name(), "CPE_GPS.BIN");
        assert_eq!(Constellation::Glonass.file_name(), "CPE_GLO.BIN");
        assert_eq!(Constellation::Qzss.file_name(), "CPE_QZSS.BIN");
        assert_eq!(Constellation::Galileo.file_name(), "CPE_GAL.BIN");
    }

    #[test]
    fn test_state_display_and_readiness() {
        assert_eq!(DeviceState::Initializing.to_string(), "initializing");
        assert!(DeviceState::Initialized.is_ready());
        assert!(!DeviceState::Initializing.is_ready());
        assert_eq!(DeviceState::default(), DeviceState::Disconnected);
    }

    #[test]
    fn test_agps_status_display() {
        assert_eq!(AgpsStatus::Current.to_string(), "CURRENT");
        assert_eq!(AgpsStatus::Error.to_string(), "ERROR");
    }
}
