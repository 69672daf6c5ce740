//! # Device Registry
//!
//! Several bands can be attached at once. Each entry owns its own driver
//! (and with it a lifecycle and queue worker) plus its own AGPS handler, so
//! one device stalling never holds up another.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use tether_core::DeviceFamilyKind;
use tether_store::AgpsCache;

use crate::agps::AgpsRequestHandler;
use crate::config::LinkSettings;
use crate::driver::DeviceDriver;
use crate::error::{LinkError, LinkResult};
use crate::events::PreferenceEmitter;

/// Everything the link keeps per attached device.
pub struct DeviceEntry {
    pub driver: DeviceDriver,
    pub agps: AgpsRequestHandler,
}

impl DeviceEntry {
    pub fn device_id(&self) -> &str {
        self.driver.device_id()
    }
}

/// Attached devices by id.
pub struct DeviceRegistry {
    settings: LinkSettings,
    cache: AgpsCache,
    emitter: Arc<dyn PreferenceEmitter>,
    devices: RwLock<HashMap<String, Arc<DeviceEntry>>>,
}

impl DeviceRegistry {
    pub fn new(settings: LinkSettings, cache: AgpsCache, emitter: Arc<dyn PreferenceEmitter>) -> Self {
        DeviceRegistry {
            settings,
            cache,
            emitter,
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Starts a driver and AGPS handler for a new device.
    pub async fn attach(&self, device_id: &str, family: DeviceFamilyKind) -> LinkResult<Arc<DeviceEntry>> {
        let mut devices = self.devices.write().await;
        if devices.contains_key(device_id) {
            return Err(LinkError::DeviceExists(device_id.to_string()));
        }

        let id: Arc<str> = Arc::from(device_id);
        let entry = Arc::new(DeviceEntry {
            driver: DeviceDriver::from_settings(id.clone(), family, &self.settings),
            agps: AgpsRequestHandler::new(id, self.cache.clone(), self.emitter.clone()),
        });
        devices.insert(device_id.to_string(), entry.clone());

        info!(device_id, family = %family, "Device attached");
        Ok(entry)
    }

    pub async fn get(&self, device_id: &str) -> LinkResult<Arc<DeviceEntry>> {
        self.devices
            .read()
            .await
            .get(device_id)
            .cloned()
            .ok_or_else(|| LinkError::UnknownDevice(device_id.to_string()))
    }

    /// Removes a device, disconnecting it first.
    pub async fn detach(&self, device_id: &str) -> LinkResult<()> {
        let entry = self
            .devices
            .write()
            .await
            .remove(device_id)
            .ok_or_else(|| LinkError::UnknownDevice(device_id.to_string()))?;

        entry.driver.disconnect().await?;
        info!(device_id, "Device detached");
        Ok(())
    }

    /// Attached device ids, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoOpEmitter;
    use crate::transport::{Fault, SimulatedTransport};
    use chrono::NaiveDate;
    use std::time::Duration;
    use tempfile::TempDir;
    use tether_core::{ActivityUser, DeviceState, InitContext};

    fn registry(dir: &TempDir) -> DeviceRegistry {
        let settings = LinkSettings {
            ack_timeout_ms: 100,
            ..LinkSettings::default()
        };
        DeviceRegistry::new(settings, AgpsCache::new(dir.path()), Arc::new(NoOpEmitter))
    }

    fn ctx() -> InitContext {
        InitContext {
            now: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            user: ActivityUser::default(),
            units: Default::default(),
            time_format: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_attach_get_detach() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        registry.attach("b", DeviceFamilyKind::Tlw64).await.unwrap();
        registry.attach("a", DeviceFamilyKind::Tlw64).await.unwrap();
        assert_eq!(registry.list().await, vec!["a", "b"]);

        let err = registry.attach("a", DeviceFamilyKind::Tlw64).await;
        assert!(matches!(err, Err(LinkError::DeviceExists(_))));

        let entry = registry.get("a").await.unwrap();
        assert_eq!(entry.device_id(), "a");
        assert_eq!(entry.agps.device_id(), "a");

        registry.detach("a").await.unwrap();
        assert_eq!(entry.driver.state(), DeviceState::Disconnected);
        assert!(matches!(registry.get("a").await, Err(LinkError::UnknownDevice(_))));
        assert!(matches!(registry.detach("a").await, Err(LinkError::UnknownDevice(_))));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_devices_fail_independently() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let a = registry.attach("a", DeviceFamilyKind::Tlw64).await.unwrap();
        let b = registry.attach("b", DeviceFamilyKind::Tlw64).await.unwrap();

        let stalled = Arc::new(
            SimulatedTransport::new()
                .with_latency(Duration::from_millis(5))
                .with_fault(0, Fault::Stall),
        );
        let healthy = Arc::new(SimulatedTransport::new().with_latency(Duration::from_millis(5)));

        let (ctx_a, ctx_b) = (ctx(), ctx());
        let (ra, rb) = tokio::join!(
            a.driver.connect(stalled, &ctx_a),
            b.driver.connect(healthy.clone(), &ctx_b),
        );

        assert!(matches!(ra, Err(LinkError::AckTimeout(_))));
        assert_eq!(a.driver.state(), DeviceState::Error);
        rb.unwrap();
        assert_eq!(b.driver.state(), DeviceState::Initialized);
        assert_eq!(healthy.frames().len(), 3);
    }
}
