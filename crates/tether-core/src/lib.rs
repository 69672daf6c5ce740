//! # tether-core: Pure Link Logic for Tether
//!
//! Everything about talking to a wearable that can be decided without
//! touching a radio, a file or a clock lives here.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tether Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    apps/tether-sim                              │   │
//! │  │    config ──► registry ──► driver ──► AGPS pull ──► confirm     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │         tether-link (queue worker, lifecycle, AGPS handler)     │   │
//! │  └──────────────┬──────────────────────────────────┬───────────────┘   │
//! │                 │                                  │                    │
//! │  ┌──────────────▼──────────────────────────────┐   │                    │
//! │  │           ★ tether-core (THIS CRATE) ★       │   │                    │
//! │  │                                              │   │                    │
//! │  │  ┌──────────┐ ┌──────────┐ ┌──────────────┐  │   │                    │
//! │  │  │  frames  │ │lifecycle │ │   archive    │  │   │                    │
//! │  │  │  tlw64   │ │  txns    │ │  file_type   │  │   │                    │
//! │  │  └──────────┘ └──────────┘ └──────────────┘  │   │                    │
//! │  │   NO I/O • NO ASYNC • NO LOGGING             │   │                    │
//! │  └──────────────────────────────────────────────┘   │                    │
//! │                                                     │                    │
//! │  ┌──────────────────────────────────────────────────▼───────────────┐   │
//! │  │              tether-store (AGPS cache, preferences)              │   │
//! │  └──────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Device state, AGPS status, constellations, user profile
//! - [`frame`] - The [`Command`] frame
//! - [`transaction`] - Ordered command batches with lifecycle markers
//! - [`lifecycle`] - Device lifecycle state machine
//! - [`family`] - Device family capability trait
//! - [`tlw64`] - TLW64 frame layouts
//! - [`archive`] - ustar reader for AGPS archives
//! - [`file_type`] - Device file type lookup
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use tether_core::{DeviceFamilyKind, DeviceEvent, NotificationKind};
//!
//! let family = DeviceFamilyKind::Tlw64.family();
//! let event = DeviceEvent::Notification {
//!     kind: NotificationKind::Sms,
//!     sender: "Alice".into(),
//! };
//!
//! let tx = family.transaction_for("sms", &event).unwrap();
//! assert!(tx.requires_initialized());
//! assert_eq!(tx.command_count(), 3);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod archive;
pub mod error;
pub mod family;
pub mod file_type;
pub mod frame;
pub mod lifecycle;
pub mod tlw64;
pub mod transaction;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use archive::Archive;
pub use error::{ArchiveError, LifecycleError};
pub use family::{
    AlertCategory, DeviceEvent, DeviceFamily, DeviceFamilyKind, DeviceIntent, IconKind,
    InitContext, NotificationKind,
};
pub use file_type::FileType;
pub use frame::Command;
pub use lifecycle::Lifecycle;
pub use transaction::{Step, Transaction, TransactionBuilder};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Largest AGPS archive read from the cache (1 MiB).
pub const MAX_ARCHIVE_BYTES: u64 = 1024 * 1024;

/// Key under which the AGPS status is published.
pub const PREF_AGPS_STATUS: &str = "agps_status";

/// Key under which the last successful AGPS update time is published.
pub const PREF_AGPS_LAST_UPDATE: &str = "agps_last_update";
