//! # Preference Store
//!
//! JSON file of per-device preferences, the consumer end of the preference
//! event bus. Layout on disk:
//!
//! ```text
//! {
//!   "C3:1A:00:00:12:34": {
//!     "agps_status": "CURRENT",
//!     "agps_last_update": 1718000000000
//!   }
//! }
//! ```
//!
//! Every `set` rewrites the file through a temp file and a rename, so a
//! crash never leaves a half-written store behind.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use tether_core::{AgpsStatus, PREF_AGPS_LAST_UPDATE, PREF_AGPS_STATUS};

use crate::error::{StoreError, StoreResult};

type DevicePrefs = BTreeMap<String, Value>;

/// File-backed preference store shared by all devices.
#[derive(Debug)]
pub struct PreferenceStore {
    path: PathBuf,
    prefs: Mutex<BTreeMap<String, DevicePrefs>>,
}

impl PreferenceStore {
    /// Opens the store at `path`, starting empty if the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let prefs = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Preference file not found, starting empty");
                BTreeMap::new()
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        Ok(PreferenceStore {
            path,
            prefs: Mutex::new(prefs),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sets one key for one device and persists the whole store.
    pub async fn set(&self, device_id: &str, key: &str, value: Value) -> StoreResult<()> {
        let mut prefs = self.prefs.lock().await;
        prefs
            .entry(device_id.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.persist(&prefs).await
    }

    pub async fn get(&self, device_id: &str, key: &str) -> Option<Value> {
        let prefs = self.prefs.lock().await;
        prefs.get(device_id).and_then(|p| p.get(key)).cloned()
    }

    /// All keys stored for a device.
    pub async fn device(&self, device_id: &str) -> DevicePrefs {
        let prefs = self.prefs.lock().await;
        prefs.get(device_id).cloned().unwrap_or_default()
    }

    /// Drops everything stored for a device. Returns false if nothing was.
    pub async fn remove_device(&self, device_id: &str) -> StoreResult<bool> {
        let mut prefs = self.prefs.lock().await;
        if prefs.remove(device_id).is_none() {
            return Ok(false);
        }
        self.persist(&prefs).await?;
        Ok(true)
    }

    /// AGPS status of a device; `Unknown` when unset or unreadable.
    pub async fn agps_status(&self, device_id: &str) -> AgpsStatus {
        match self.get(device_id, PREF_AGPS_STATUS).await {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(device_id, error = %e, "Malformed AGPS status, treating as unknown");
                AgpsStatus::Unknown
            }),
            None => AgpsStatus::Unknown,
        }
    }

    /// Last confirmed AGPS delivery, stored as epoch milliseconds.
    pub async fn agps_last_update(&self, device_id: &str) -> Option<DateTime<Utc>> {
        let millis = self.get(device_id, PREF_AGPS_LAST_UPDATE).await?.as_i64()?;
        Utc.timestamp_millis_opt(millis).single()
    }

    async fn persist(&self, prefs: &BTreeMap<String, DevicePrefs>) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }

        let json = serde_json::to_vec_pretty(prefs)?;
        let temp = self.path.with_extension("tmp");
        tokio::fs::write(&temp, json)
            .await
            .map_err(|e| StoreError::io(&temp, e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_set_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.json");

        let store = PreferenceStore::open(&path).await.unwrap();
        assert_eq!(store.agps_status("band").await, AgpsStatus::Unknown);

        store
            .set("band", PREF_AGPS_STATUS, json!("CURRENT"))
            .await
            .unwrap();
        store
            .set("band", PREF_AGPS_LAST_UPDATE, json!(1_718_000_000_000i64))
            .await
            .unwrap();

        let reopened = PreferenceStore::open(&path).await.unwrap();
        assert_eq!(reopened.agps_status("band").await, AgpsStatus::Current);
        assert_eq!(
            reopened.agps_last_update("band").await.unwrap().timestamp_millis(),
            1_718_000_000_000
        );
        assert_eq!(reopened.device("band").await.len(), 2);
        assert!(reopened.device("other").await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_status_reads_as_unknown() {
        let dir = TempDir::new().unwrap();
        let store = PreferenceStore::open(dir.path().join("p.json")).await.unwrap();

        store.set("band", PREF_AGPS_STATUS, json!(42)).await.unwrap();
        assert_eq!(store.agps_status("band").await, AgpsStatus::Unknown);
        assert_eq!(store.agps_last_update("band").await, None);
    }

    #[tokio::test]
    async fn test_remove_device() {
        let dir = TempDir::new().unwrap();
        let store = PreferenceStore::open(dir.path().join("p.json")).await.unwrap();

        store.set("band", "k", json!(true)).await.unwrap();
        assert!(store.remove_device("band").await.unwrap());
        assert!(!store.remove_device("band").await.unwrap());
        assert_eq!(store.get("band", "k").await, None);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let err = PreferenceStore::open(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
