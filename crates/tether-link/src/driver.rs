//! # Device Driver
//!
//! Binds a device family to one queue worker. The driver turns phone-side
//! events into transactions and hands them to the queue; it never writes to
//! the transport itself.
//!
//! ```text
//! ┌──────────────┐  event   ┌──────────────┐  transaction  ┌──────────────┐
//! │    caller    │ ───────► │ DeviceDriver │ ────────────► │ CommandQueue │
//! └──────────────┘          │  (family)    │               │   worker     │
//!                           └──────────────┘               └──────┬───────┘
//!                                                                 │ frames
//!                                                                 ▼
//!                                                            Transport
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use tether_core::{
    DeviceEvent, DeviceFamily, DeviceFamilyKind, DeviceIntent, DeviceState, InitContext, Step,
    Transaction,
};

use crate::config::LinkSettings;
use crate::error::LinkResult;
use crate::lifecycle::{LifecycleHandle, LifecycleWatch};
use crate::queue::{CommandQueue, QueueHandle};
use crate::transport::{Session, Transport};

/// Drives one device through its family's frame layout.
#[derive(Clone)]
pub struct DeviceDriver {
    device_id: Arc<str>,
    family: Arc<dyn DeviceFamily>,
    queue: QueueHandle,
}

impl DeviceDriver {
    /// Spawns the queue worker for `device_id`.
    pub fn spawn(
        device_id: impl Into<Arc<str>>,
        family: Arc<dyn DeviceFamily>,
        ack_timeout: Duration,
        queue_capacity: usize,
    ) -> Self {
        let device_id = device_id.into();
        let lifecycle = LifecycleHandle::new(device_id.clone());
        let queue = CommandQueue::spawn(device_id.clone(), lifecycle, ack_timeout, queue_capacity);

        info!(device_id = %device_id, family = family.name(), "Device driver started");

        DeviceDriver {
            device_id,
            family,
            queue,
        }
    }

    /// Spawns a driver using the configured family and queue settings.
    pub fn from_settings(
        device_id: impl Into<Arc<str>>,
        family: DeviceFamilyKind,
        settings: &LinkSettings,
    ) -> Self {
        Self::spawn(
            device_id,
            Arc::from(family.family()),
            Duration::from_millis(settings.ack_timeout_ms),
            settings.queue_capacity,
        )
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn family(&self) -> &dyn DeviceFamily {
        self.family.as_ref()
    }

    pub fn queue(&self) -> &QueueHandle {
        &self.queue
    }

    pub fn lifecycle(&self) -> &LifecycleHandle {
        self.queue.lifecycle()
    }

    pub fn state(&self) -> DeviceState {
        self.lifecycle().state()
    }

    pub fn subscribe(&self) -> LifecycleWatch {
        self.lifecycle().subscribe()
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Binds a freshly connected transport to the family's control
    /// characteristic.
    pub async fn attach(&self, transport: Arc<dyn Transport>) -> LinkResult<()> {
        let session = Session::new(transport, self.family.control_characteristic());
        self.queue.reattach(session).await
    }

    /// The family's initialization transaction, entered via `Connecting`.
    pub fn initial_transaction(&self, ctx: &InitContext) -> Transaction {
        self.family
            .initial_transaction(ctx)
            .prepend([Step::Marker(DeviceState::Connecting)])
    }

    /// Runs the initialization transaction to completion.
    pub async fn initialize(&self, ctx: &InitContext) -> LinkResult<()> {
        self.queue.submit(self.initial_transaction(ctx)).await?;
        info!(device_id = %self.device_id, "Device initialized");
        Ok(())
    }

    /// Attaches `transport` and initializes over it.
    pub async fn connect(&self, transport: Arc<dyn Transport>, ctx: &InitContext) -> LinkResult<()> {
        self.attach(transport).await?;
        self.initialize(ctx).await
    }

    /// Drops the session and everything queued; the device ends up
    /// `Disconnected`.
    pub async fn disconnect(&self) -> LinkResult<()> {
        self.queue.disconnect().await
    }

    // =========================================================================
    // User Actions
    // =========================================================================

    /// Reflects a phone-side event on the band. Events the family ignores
    /// complete immediately.
    pub async fn perform(&self, event: &DeviceEvent) -> LinkResult<()> {
        let name = event_name(event);
        match self.family.transaction_for(name, event) {
            Some(tx) => self.queue.submit(tx).await,
            None => {
                debug!(device_id = %self.device_id, event = name, "Event ignored by family");
                Ok(())
            }
        }
    }

    /// Sends a single intent as its own user-action transaction.
    pub async fn send_intent(&self, intent: &DeviceIntent) -> LinkResult<()> {
        let tx = Transaction::builder(intent_name(intent))
            .write_all(self.family.encode_command(intent))
            .require_initialized()
            .build();
        self.queue.submit(tx).await
    }
}

fn event_name(event: &DeviceEvent) -> &'static str {
    match event {
        DeviceEvent::Notification { .. } => "notification",
        DeviceEvent::IncomingCall { .. } => "incoming_call",
        DeviceEvent::CallEnded => "call_ended",
        DeviceEvent::FindDevice { .. } => "find_device",
        DeviceEvent::SetTime(_) => "set_time",
    }
}

fn intent_name(intent: &DeviceIntent) -> &'static str {
    match intent {
        DeviceIntent::SetTime(_) => "set_time",
        DeviceIntent::DisplaySettings { .. } => "display_settings",
        DeviceIntent::UserProfile(_) => "user_profile",
        DeviceIntent::Vibrate { .. } => "vibrate",
        DeviceIntent::ShowIcon(_) => "show_icon",
        DeviceIntent::ShowNotification { .. } => "show_notification",
        DeviceIntent::StopNotification => "stop_notification",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;
    use crate::transport::SimulatedTransport;
    use chrono::NaiveDate;
    use tether_core::tlw64::{CMD_DATETIME, CONTROL_CHARACTERISTIC};
    use tether_core::{ActivityUser, NotificationKind};

    fn ctx() -> InitContext {
        InitContext {
            now: NaiveDate::from_ymd_opt(2024, 3, 9)
                .unwrap()
                .and_hms_opt(8, 30, 0)
                .unwrap(),
            user: ActivityUser::default(),
            units: Default::default(),
            time_format: Default::default(),
        }
    }

    fn driver() -> DeviceDriver {
        DeviceDriver::from_settings("band", DeviceFamilyKind::Tlw64, &LinkSettings::default())
    }

    #[tokio::test]
    async fn test_initial_transaction_starts_connecting() {
        let tx = driver().initial_transaction(&ctx());
        assert_eq!(tx.steps()[0], Step::Marker(DeviceState::Connecting));
        assert_eq!(tx.steps()[1], Step::Marker(DeviceState::Initializing));
        assert_eq!(
            tx.steps().last(),
            Some(&Step::Marker(DeviceState::Initialized))
        );
    }

    #[tokio::test]
    async fn test_connect_then_notify() {
        let transport = Arc::new(SimulatedTransport::new());
        let driver = driver();

        driver.connect(transport.clone(), &ctx()).await.unwrap();
        assert_eq!(driver.state(), DeviceState::Initialized);

        let init_frames = transport.frames();
        assert_eq!(init_frames.len(), 3);
        assert_eq!(init_frames[0][0], CMD_DATETIME);

        let sms = DeviceEvent::Notification {
            kind: NotificationKind::Sms,
            sender: "Alice".into(),
        };
        driver.perform(&sms).await.unwrap();
        assert_eq!(transport.frames().len(), 6);
        assert!(transport
            .writes()
            .iter()
            .all(|(ch, _)| *ch == CONTROL_CHARACTERISTIC));
    }

    #[tokio::test]
    async fn test_user_action_before_initialize_is_rejected() {
        let transport = Arc::new(SimulatedTransport::new());
        let driver = driver();
        driver.attach(transport.clone()).await.unwrap();

        let err = driver
            .send_intent(&DeviceIntent::Vibrate { duration: 1, count: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::NotInitialized(DeviceState::Disconnected)));
        assert_eq!(transport.attempts(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_then_reconnect() {
        let driver = driver();
        driver
            .connect(Arc::new(SimulatedTransport::new()), &ctx())
            .await
            .unwrap();

        driver.disconnect().await.unwrap();
        assert_eq!(driver.state(), DeviceState::Disconnected);

        let fresh = Arc::new(SimulatedTransport::new());
        driver.connect(fresh.clone(), &ctx()).await.unwrap();
        assert_eq!(driver.state(), DeviceState::Initialized);
        assert_eq!(fresh.frames().len(), 3);
    }

    #[tokio::test]
    async fn test_ignored_event_completes() {
        let transport = Arc::new(SimulatedTransport::new());
        let driver = driver();
        driver.connect(transport.clone(), &ctx()).await.unwrap();

        driver
            .perform(&DeviceEvent::FindDevice { start: false })
            .await
            .unwrap();
        assert_eq!(transport.frames().len(), 3);
    }
}
