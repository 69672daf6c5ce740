//! # Preference Event Bus
//!
//! Status changes leave the link as `{device, key, value}` pushes. The
//! consumer (a settings screen, the JSON preference file) is not the link's
//! concern; anything implementing [`PreferenceEmitter`] can sit on the other
//! end.
//!
//! ## Keys
//! ```text
//! ┌──────────────────────┬──────────────────────────────────────────────────┐
//! │ agps_status          │ "UNKNOWN" | "CURRENT" | "ERROR"                  │
//! │ agps_last_update     │ epoch milliseconds of the last confirmed upload  │
//! └──────────────────────┴──────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use tether_core::{AgpsStatus, PREF_AGPS_LAST_UPDATE, PREF_AGPS_STATUS};
use tether_store::PreferenceStore;

// =============================================================================
// Preference Update
// =============================================================================

/// One pushed preference change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceUpdate {
    pub device_id: String,
    pub key: String,
    pub value: Value,
}

impl PreferenceUpdate {
    pub fn new(device_id: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        PreferenceUpdate {
            device_id: device_id.into(),
            key: key.into(),
            value,
        }
    }

    pub fn agps_status(device_id: impl Into<String>, status: AgpsStatus) -> Self {
        Self::new(device_id, PREF_AGPS_STATUS, Value::String(status.to_string()))
    }

    pub fn agps_last_update(device_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::new(device_id, PREF_AGPS_LAST_UPDATE, Value::from(at.timestamp_millis()))
    }

    /// The status carried by an `agps_status` update.
    pub fn as_agps_status(&self) -> Option<AgpsStatus> {
        if self.key != PREF_AGPS_STATUS {
            return None;
        }
        serde_json::from_value(self.value.clone()).ok()
    }
}

// =============================================================================
// Emitter Trait
// =============================================================================

/// Sink for preference pushes.
pub trait PreferenceEmitter: Send + Sync {
    fn emit(&self, update: PreferenceUpdate);
}

/// Drops every update.
pub struct NoOpEmitter;

impl PreferenceEmitter for NoOpEmitter {
    fn emit(&self, _update: PreferenceUpdate) {}
}

/// Fans updates out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastEmitter {
    tx: broadcast::Sender<PreferenceUpdate>,
}

impl BroadcastEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        BroadcastEmitter { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PreferenceUpdate> {
        self.tx.subscribe()
    }
}

impl PreferenceEmitter for BroadcastEmitter {
    fn emit(&self, update: PreferenceUpdate) {
        debug!(device_id = %update.device_id, key = %update.key, value = %update.value, "Preference update");
        // No subscribers is fine; nobody is listening yet.
        let _ = self.tx.send(update);
    }
}

// =============================================================================
// Preference Sink
// =============================================================================

/// Applies every update from `rx` to `store` until the bus closes.
pub fn spawn_preference_sink(
    mut rx: broadcast::Receiver<PreferenceUpdate>,
    store: Arc<PreferenceStore>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(update) => {
                    if let Err(e) = store.set(&update.device_id, &update.key, update.value).await {
                        error!(device_id = %update.device_id, key = %update.key, error = %e, "Failed to persist preference");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Preference sink lagged, updates lost");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("Preference sink stopped");
    })
}

// =============================================================================
// Test Support
// =============================================================================

/// Keeps every update in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingEmitter {
    updates: std::sync::Mutex<Vec<PreferenceUpdate>>,
}

#[cfg(test)]
impl RecordingEmitter {
    pub(crate) fn updates(&self) -> Vec<PreferenceUpdate> {
        self.updates.lock().unwrap().clone()
    }

    pub(crate) fn statuses(&self) -> Vec<AgpsStatus> {
        self.updates()
            .iter()
            .filter_map(PreferenceUpdate::as_agps_status)
            .collect()
    }
}

#[cfg(test)]
impl PreferenceEmitter for RecordingEmitter {
    fn emit(&self, update: PreferenceUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_update_values() {
        let status = PreferenceUpdate::agps_status("band", AgpsStatus::Current);
        assert_eq!(status.key, "agps_status");
        assert_eq!(status.value, Value::String("CURRENT".into()));
        assert_eq!(status.as_agps_status(), Some(AgpsStatus::Current));

        let at = Utc.timestamp_millis_opt(1_718_000_000_123).unwrap();
        let time = PreferenceUpdate::agps_last_update("band", at);
        assert_eq!(time.key, "agps_last_update");
        assert_eq!(time.value, Value::from(1_718_000_000_123i64));
        assert_eq!(time.as_agps_status(), None);
    }

    #[tokio::test]
    async fn test_sink_persists_broadcast_updates() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(PreferenceStore::open(dir.path().join("p.json")).await.unwrap());

        let bus = BroadcastEmitter::new(16);
        let sink = spawn_preference_sink(bus.subscribe(), store.clone());

        bus.emit(PreferenceUpdate::agps_status("band", AgpsStatus::Error));
        drop(bus);
        sink.await.unwrap();

        assert_eq!(store.agps_status("band").await, AgpsStatus::Error);
    }
}
