//! # Device Families
//!
//! A device family is a strategy object chosen when a device is attached.
//! It knows the family's GATT layout, how each intent is laid out as bytes,
//! and what the initialization transaction looks like.
//!
//! ## Layering
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  DeviceEvent (notification, call, find device)                          │
//! │       │ intents_for()                                                   │
//! │       ▼                                                                 │
//! │  DeviceIntent (set time, vibrate, show icon, push profile)              │
//! │       │ encode_command()                                                │
//! │       ▼                                                                 │
//! │  Command frames (fixed-offset byte layouts, versioned per family)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::frame::Command;
use crate::tlw64::Tlw64;
use crate::transaction::Transaction;
use crate::types::{ActivityUser, MeasurementSystem, TimeFormat};

// =============================================================================
// Intents
// =============================================================================

/// Icons a band can show without text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconKind {
    Mail,
    WeChat,
}

/// Text alert categories; the band picks its alert style from this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertCategory {
    Sms,
    Call,
}

/// A high-level request that maps to one or more command frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceIntent {
    SetTime(NaiveDateTime),
    DisplaySettings {
        units: MeasurementSystem,
        time_format: TimeFormat,
    },
    UserProfile(ActivityUser),
    Vibrate {
        duration: u8,
        count: u8,
    },
    ShowIcon(IconKind),
    ShowNotification {
        category: AlertCategory,
        text: String,
    },
    StopNotification,
}

// =============================================================================
// Events
// =============================================================================

/// Phone-side notification sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Sms,
    WeChat,
    Other,
}

/// Something happened on the phone that the band should reflect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Notification {
        kind: NotificationKind,
        sender: String,
    },
    IncomingCall {
        caller: String,
    },
    CallEnded,
    FindDevice {
        start: bool,
    },
    SetTime(NaiveDateTime),
}

// =============================================================================
// Initialization Context
// =============================================================================

/// Everything the initialization transaction needs from the phone side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitContext {
    pub now: NaiveDateTime,
    pub user: ActivityUser,
    pub units: MeasurementSystem,
    pub time_format: TimeFormat,
}

// =============================================================================
// Capability Trait
// =============================================================================

/// Capabilities of one device family.
pub trait DeviceFamily: Send + Sync {
    /// Short identifier used in logs and config.
    fn name(&self) -> &'static str;

    /// Primary GATT service the family advertises.
    fn service(&self) -> Uuid;

    /// Characteristic every command frame is written to.
    fn control_characteristic(&self) -> Uuid;

    /// Lays out one intent as command frames. Total for well-formed input.
    fn encode_command(&self, intent: &DeviceIntent) -> Vec<Command>;

    /// Transaction run after connecting, bracketed by lifecycle markers.
    fn initial_transaction(&self, ctx: &InitContext) -> Transaction;

    /// Intents the family uses to reflect a phone-side event.
    fn intents_for(&self, event: &DeviceEvent) -> Vec<DeviceIntent>;

    /// User-action transaction for an event, or `None` if the family
    /// ignores it.
    fn transaction_for(&self, name: &str, event: &DeviceEvent) -> Option<Transaction> {
        let commands: Vec<Command> = self
            .intents_for(event)
            .iter()
            .flat_map(|intent| self.encode_command(intent))
            .collect();

        if commands.is_empty() {
            return None;
        }

        Some(
            Transaction::builder(name)
                .write_all(commands)
                .require_initialized()
                .build(),
        )
    }
}

// =============================================================================
// Family Selection
// =============================================================================

/// Families known to this build, selectable from config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFamilyKind {
    #[default]
    Tlw64,
}

impl DeviceFamilyKind {
    /// Instantiates the strategy for this family.
    pub fn family(&self) -> Box<dyn DeviceFamily> {
        match self {
            DeviceFamilyKind::Tlw64 => Box::new(Tlw64),
        }
    }
}

impl std::fmt::Display for DeviceFamilyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceFamilyKind::Tlw64 => write!(f, "tlw64"),
        }
    }
}

/// Unrecognized family name in config or environment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown device family: '{0}'. Valid options: tlw64")]
pub struct UnknownFamily(pub String);

impl std::str::FromStr for DeviceFamilyKind {
    type Err = UnknownFamily;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tlw64" => Ok(DeviceFamilyKind::Tlw64),
            other => Err(UnknownFamily(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_kind_parsing() {
        assert_eq!("tlw64".parse::<DeviceFamilyKind>().unwrap(), DeviceFamilyKind::Tlw64);
        assert_eq!("TLW64".parse::<DeviceFamilyKind>().unwrap(), DeviceFamilyKind::Tlw64);
        assert!("mi-band".parse::<DeviceFamilyKind>().is_err());
        assert_eq!(DeviceFamilyKind::Tlw64.family().name(), "tlw64");
    }

    #[test]
    fn test_ignored_event_builds_no_transaction() {
        let family = DeviceFamilyKind::Tlw64.family();
        let event = DeviceEvent::FindDevice { start: false };
        assert!(family.transaction_for("find", &event).is_none());
    }
}
