//! # Link Error Types
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Link Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Queue               │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  WriteFailed    │  │  NotInitialized         │ │
//! │  │  MissingDeviceId│  │  AckTimeout     │  │  InvalidMarker          │ │
//! │  │  ConfigLoad/Save│  │  NotAttached    │  │  Discarded              │ │
//! │  │                 │  │  ConnectFailed  │  │  ShuttingDown           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐                                                   │
//! │  │    Registry     │                                                   │
//! │  │                 │                                                   │
//! │  │  UnknownDevice  │                                                   │
//! │  │  DeviceExists   │                                                   │
//! │  └─────────────────┘                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use tether_core::{DeviceState, LifecycleError};

/// Result type alias for link operations.
pub type LinkResult<T> = Result<T, LinkError>;

/// Link error type.
#[derive(Debug, Error)]
pub enum LinkError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid link configuration: {0}")]
    InvalidConfig(String),

    #[error("Device ID not configured")]
    MissingDeviceId,

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The transport rejected or lost a write.
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// No ack arrived within the configured window.
    #[error("No ack within {0} ms")]
    AckTimeout(u64),

    /// A write was attempted with no session attached.
    #[error("No transport attached")]
    NotAttached,

    /// Establishing a new session failed.
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    // =========================================================================
    // Queue Errors
    // =========================================================================
    /// A user-action transaction arrived before initialization finished.
    #[error("Device not initialized (state: {0})")]
    NotInitialized(DeviceState),

    /// A lifecycle marker inside a transaction was not a legal transition.
    #[error("Invalid marker: {0}")]
    InvalidMarker(#[from] LifecycleError),

    /// Dropped unexecuted (or cut short) by a disconnect or an earlier failure.
    #[error("Transaction discarded")]
    Discarded,

    /// The queue worker is gone.
    #[error("Command queue is shutting down")]
    ShuttingDown,

    // =========================================================================
    // Registry Errors
    // =========================================================================
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Device already attached: {0}")]
    DeviceExists(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for LinkError {
    fn from(err: toml::de::Error) -> Self {
        LinkError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for LinkError {
    fn from(err: toml::ser::Error) -> Self {
        LinkError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl LinkError {
    /// Returns true if the error means the link itself is broken: the running
    /// transaction is aborted, queued work is dropped and the device goes to
    /// `Error`.
    pub fn is_transaction_fatal(&self) -> bool {
        matches!(
            self,
            LinkError::WriteFailed(_) | LinkError::AckTimeout(_) | LinkError::NotAttached
        )
    }

    /// Returns true if reconnecting and re-enqueueing may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LinkError::WriteFailed(_)
                | LinkError::AckTimeout(_)
                | LinkError::NotAttached
                | LinkError::ConnectFailed(_)
                | LinkError::Discarded
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            LinkError::InvalidConfig(_)
                | LinkError::MissingDeviceId
                | LinkError::ConfigLoadFailed(_)
                | LinkError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_fatal_errors() {
        assert!(LinkError::AckTimeout(5000).is_transaction_fatal());
        assert!(LinkError::WriteFailed("gatt 133".into()).is_transaction_fatal());
        assert!(LinkError::NotAttached.is_transaction_fatal());

        assert!(!LinkError::NotInitialized(DeviceState::Connecting).is_transaction_fatal());
        assert!(!LinkError::Discarded.is_transaction_fatal());
        let marker = LifecycleError {
            from: DeviceState::Disconnected,
            to: DeviceState::Initialized,
        };
        assert!(!LinkError::from(marker).is_transaction_fatal());
    }

    #[test]
    fn test_categories() {
        assert!(LinkError::ConnectFailed("out of range".into()).is_retryable());
        assert!(!LinkError::MissingDeviceId.is_retryable());
        assert!(LinkError::MissingDeviceId.is_config_error());
        assert!(!LinkError::AckTimeout(1).is_config_error());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(LinkError::AckTimeout(5000).to_string(), "No ack within 5000 ms");
        assert_eq!(
            LinkError::NotInitialized(DeviceState::Initializing).to_string(),
            "Device not initialized (state: initializing)"
        );
    }
}
