//! # Store Error Types
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  std::io::Error / serde_json::Error                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  StoreError (this module) ← Adds the path that failed                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  LinkError (tether-link) ← AGPS handler logs it and stays silent       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A cached file is bigger than the read cap.
    ///
    /// ## When This Occurs
    /// - A stale or foreign file was dropped into the cache dir
    /// - The cap was lowered after the file was written
    #[error("{path} is {size} bytes, over the {limit} byte limit")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    /// Device id cannot be turned into a file name.
    #[error("Invalid device id: '{0}'")]
    InvalidDeviceId(String),

    /// Preference file is not valid JSON (or a value has the wrong shape).
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Returns true if the file exists but must not be read as-is.
    pub fn is_unreadable_content(&self) -> bool {
        matches!(self, StoreError::TooLarge { .. } | StoreError::Serialization(_))
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_path() {
        let err = StoreError::TooLarge {
            path: PathBuf::from("/tmp/a.agps"),
            size: 2_000_000,
            limit: 1_048_576,
        };
        assert_eq!(
            err.to_string(),
            "/tmp/a.agps is 2000000 bytes, over the 1048576 byte limit"
        );
        assert!(err.is_unreadable_content());
        assert!(!StoreError::InvalidDeviceId(String::new()).is_unreadable_content());
    }
}
