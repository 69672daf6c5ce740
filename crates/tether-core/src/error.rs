//! # Error Types
//!
//! Domain-specific error types for tether-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tether-core errors (this file)                                        │
//! │  ├── ArchiveError     - Malformed AGPS archive container               │
//! │  └── LifecycleError   - Marker not allowed from the current state      │
//! │                                                                         │
//! │  tether-store errors (separate crate)                                  │
//! │  └── StoreError       - Cache / preference file failures               │
//! │                                                                         │
//! │  tether-link errors (separate crate)                                   │
//! │  └── LinkError        - Transport, queue and config failures           │
//! │                                                                         │
//! │  Flow: LifecycleError → LinkError::InvalidMarker → caller              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Encoding is total: no error in this module ever originates from building
//! a command frame.

use thiserror::Error;

use crate::types::DeviceState;

// =============================================================================
// Archive Error
// =============================================================================

/// Parse failures for the AGPS archive container (ustar).
///
/// Every variant carries the byte offset of the header block where parsing
/// stopped, so a corrupt cache file can be inspected by hand.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArchiveError {
    /// Input ended inside a header or inside entry data.
    #[error("Archive truncated at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Header checksum does not match the stored value.
    #[error("Bad header checksum at offset {offset}: stored {stored}, computed {computed}")]
    BadChecksum {
        offset: usize,
        stored: u32,
        computed: u32,
    },

    /// The octal size (or checksum) field is not a valid number.
    #[error("Invalid numeric field '{field}' at offset {offset}")]
    InvalidSize { offset: usize, field: &'static str },

    /// Entry name is empty or not valid UTF-8.
    #[error("Invalid entry name at offset {offset}")]
    InvalidName { offset: usize },

    /// Input ran out on a block boundary without the zero end-of-archive block.
    #[error("Archive is missing its end-of-archive marker (offset {offset})")]
    MissingTerminator { offset: usize },
}

// =============================================================================
// Lifecycle Error
// =============================================================================

/// A lifecycle marker that is not a legal transition from the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid lifecycle transition: {from} -> {to}")]
pub struct LifecycleError {
    pub from: DeviceState,
    pub to: DeviceState,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ArchiveError::Truncated {
            offset: 512,
            needed: 1024,
            available: 700,
        };
        assert_eq!(
            err.to_string(),
            "Archive truncated at offset 512: needed 1024 bytes, 700 available"
        );

        let err = LifecycleError {
            from: DeviceState::Disconnected,
            to: DeviceState::Initialized,
        };
        assert_eq!(
            err.to_string(),
            "Invalid lifecycle transition: disconnected -> initialized"
        );
    }
}
