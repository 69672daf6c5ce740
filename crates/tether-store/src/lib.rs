//! # tether-store: File Storage for Tether
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tether Data Flow                                 │
//! │                                                                         │
//! │  AGPS pull request / PreferenceUpdate (tether-link)                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   tether-store (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌────────────────────────┐      ┌────────────────────────┐   │   │
//! │  │   │   AgpsCache            │      │   PreferenceStore      │   │   │
//! │  │   │   (cache.rs)           │      │   (preferences.rs)     │   │   │
//! │  │   │                        │      │                        │   │   │
//! │  │   │   <device>.agps        │      │   prefs.json           │   │   │
//! │  │   │   1 MiB read cap       │      │   status, last update  │   │   │
//! │  │   └────────────────────────┘      └────────────────────────┘   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ~/.cache/tether/agps/   ~/.local/share/tether/prefs.json              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`cache`] - Per-device AGPS archive files
//! - [`preferences`] - JSON preference file
//! - [`error`] - Store error types

pub mod cache;
pub mod error;
pub mod preferences;

pub use cache::AgpsCache;
pub use error::{StoreError, StoreResult};
pub use preferences::PreferenceStore;
