//! # Reconnect Supervisor
//!
//! The queue never retries. When a device lands in `Error` this task is the
//! one that brings it back: connect a new transport, reattach it, and re-run
//! the initialization transaction, backing off exponentially between tries.
//!
//! ## Supervisor Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   ┌──────────┐  state == Error   ┌────────────┐  ok   ┌──────────────┐  │
//! │   │ Watching │ ────────────────► │ Reconnect  │ ────► │ Initialized  │  │
//! │   └──────────┘                   └─────┬──────┘       └──────┬───────┘  │
//! │        ▲                               │ fail                │          │
//! │        │                               ▼                     │          │
//! │        │                        ┌────────────┐               │          │
//! │        │                        │  Backoff   │ ──► retry     │          │
//! │        │                        └─────┬──────┘               │          │
//! │        │            max attempts hit  │ shutdown             │          │
//! │        │                              ▼                      │          │
//! │        │                           (exit)                    │          │
//! │        └─────────────────────────────────────────────────────┘          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A deliberate disconnect leaves the device `Disconnected`, which the
//! supervisor ignores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::Local;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tether_core::{DeviceState, InitContext};

use crate::config::LinkConfig;
use crate::driver::DeviceDriver;
use crate::error::{LinkError, LinkResult};
use crate::transport::{SimulatedTransport, Transport};

// =============================================================================
// Connector
// =============================================================================

/// Opens new transports to a device.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects to `device_id` and resolves its primary `service`.
    async fn connect(&self, device_id: &str, service: Uuid) -> LinkResult<Arc<dyn Transport>>;
}

/// Hands out [`SimulatedTransport`]s, optionally failing the first few
/// attempts.
#[derive(Debug, Default)]
pub struct SimulatedConnector {
    fail_first: usize,
    latency: Duration,
    calls: AtomicUsize,
    services: Mutex<Vec<Uuid>>,
    transports: Mutex<Vec<Arc<SimulatedTransport>>>,
}

impl SimulatedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses the first `n` connection attempts.
    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    /// Ack latency of the transports handed out.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Connection attempts so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Services asked for, one per connection attempt.
    pub fn services(&self) -> Vec<Uuid> {
        self.services
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Most recently handed-out transport.
    pub fn last_transport(&self) -> Option<Arc<SimulatedTransport>> {
        self.transports.lock().ok()?.last().cloned()
    }
}

#[async_trait]
impl Connector for SimulatedConnector {
    async fn connect(&self, device_id: &str, service: Uuid) -> LinkResult<Arc<dyn Transport>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut services) = self.services.lock() {
            services.push(service);
        }
        if call < self.fail_first {
            return Err(LinkError::ConnectFailed(format!(
                "{device_id}: simulated refusal {}",
                call + 1
            )));
        }

        let transport = Arc::new(SimulatedTransport::new().with_latency(self.latency));
        if let Ok(mut transports) = self.transports.lock() {
            transports.push(transport.clone());
        }
        Ok(transport)
    }
}

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Reconnect attempts per outage. 0 retries forever.
    pub max_attempts: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            max_attempts: 0,
        }
    }
}

impl From<&LinkConfig> for SupervisorConfig {
    fn from(config: &LinkConfig) -> Self {
        SupervisorConfig {
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            max_attempts: config.link.max_reconnect_attempts,
        }
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Why a supervisor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    Shutdown,
    GaveUp,
    /// The device's queue is gone.
    DeviceGone,
}

enum Recovery {
    Recovered,
    Exit(SupervisorExit),
}

/// Handle for a running supervisor.
pub struct SupervisorHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<SupervisorExit>,
}

impl SupervisorHandle {
    /// Asks the supervisor to stop. Pending backoff sleeps end at once.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }

    /// Waits for the supervisor to stop.
    pub async fn join(self) -> SupervisorExit {
        self.task.await.unwrap_or(SupervisorExit::Shutdown)
    }
}

/// Keeps one device connected.
pub struct Supervisor {
    driver: DeviceDriver,
    connector: Arc<dyn Connector>,
    init: InitContext,
    config: SupervisorConfig,
    shutdown_rx: mpsc::Receiver<()>,
}

impl Supervisor {
    /// Spawns a supervisor for `driver`. `init` is re-stamped with the
    /// current local time on every reconnect.
    pub fn spawn(
        driver: DeviceDriver,
        connector: Arc<dyn Connector>,
        init: InitContext,
        config: SupervisorConfig,
    ) -> SupervisorHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let supervisor = Supervisor {
            driver,
            connector,
            init,
            config,
            shutdown_rx,
        };
        let task = tokio::spawn(supervisor.run());
        SupervisorHandle { shutdown_tx, task }
    }

    async fn run(mut self) -> SupervisorExit {
        let device_id = self.driver.device_id().to_string();
        info!(device_id = %device_id, "Supervisor started");

        let mut watch = self.driver.subscribe();
        let exit = loop {
            tokio::select! {
                state = watch.wait_for(DeviceState::Error) => {
                    if state.is_none() {
                        break SupervisorExit::DeviceGone;
                    }
                }
                _ = self.shutdown_rx.recv() => break SupervisorExit::Shutdown,
            }

            warn!(
                device_id = %device_id,
                failed_from = ?self.driver.lifecycle().failed_from(),
                "Link failed, reconnecting"
            );

            match self.recover().await {
                Recovery::Recovered => continue,
                Recovery::Exit(exit) => break exit,
            }
        };

        info!(device_id = %device_id, ?exit, "Supervisor stopped");
        exit
    }

    async fn recover(&mut self) -> Recovery {
        let mut backoff = self.create_backoff();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.reconnect().await {
                Ok(()) => {
                    info!(device_id = %self.driver.device_id(), attempt, "Reconnected");
                    return Recovery::Recovered;
                }
                Err(LinkError::ShuttingDown) => return Recovery::Exit(SupervisorExit::DeviceGone),
                Err(e) if !e.is_retryable() => {
                    error!(device_id = %self.driver.device_id(), attempt, error = %e, "Reconnect cannot succeed, giving up");
                    return Recovery::Exit(SupervisorExit::GaveUp);
                }
                Err(e) => warn!(device_id = %self.driver.device_id(), attempt, error = %e, "Reconnect failed"),
            }

            if self.config.max_attempts > 0 && attempt >= self.config.max_attempts {
                error!(
                    device_id = %self.driver.device_id(),
                    max_attempts = self.config.max_attempts,
                    "Max reconnect attempts reached"
                );
                return Recovery::Exit(SupervisorExit::GaveUp);
            }

            let Some(duration) = backoff.next_backoff() else {
                error!(device_id = %self.driver.device_id(), "Backoff exhausted");
                return Recovery::Exit(SupervisorExit::GaveUp);
            };
            debug!(?duration, attempt, "Waiting before reconnect");

            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown during backoff");
                    return Recovery::Exit(SupervisorExit::Shutdown);
                }
            }
        }
    }

    async fn reconnect(&self) -> LinkResult<()> {
        let transport = self
            .connector
            .connect(self.driver.device_id(), self.driver.family().service())
            .await?;
        let ctx = InitContext {
            now: Local::now().naive_local(),
            ..self.init.clone()
        };
        self.driver.connect(transport, &ctx).await
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.config.initial_backoff,
            max_interval: self.config.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkSettings;
    use crate::transport::Fault;
    use tether_core::tlw64::SERVICE;
    use tether_core::{ActivityUser, DeviceEvent, DeviceFamilyKind};

    /// Fails every attempt with a configuration error.
    #[derive(Default)]
    struct NoAdapter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Connector for NoAdapter {
        async fn connect(&self, _device_id: &str, _service: Uuid) -> LinkResult<Arc<dyn Transport>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(LinkError::InvalidConfig("no radio adapter".into()))
        }
    }

    fn init() -> InitContext {
        InitContext {
            now: Local::now().naive_local(),
            user: ActivityUser::default(),
            units: Default::default(),
            time_format: Default::default(),
        }
    }

    fn driver() -> DeviceDriver {
        let settings = LinkSettings {
            ack_timeout_ms: 100,
            ..LinkSettings::default()
        };
        DeviceDriver::from_settings("band", DeviceFamilyKind::Tlw64, &settings)
    }

    fn config(max_attempts: u32) -> SupervisorConfig {
        SupervisorConfig {
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
            max_attempts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_transport_failure() {
        let driver = driver();
        // Init goes through, the first user action breaks the link.
        let flaky = Arc::new(SimulatedTransport::new().with_fault(3, Fault::Fail));
        driver.connect(flaky, &init()).await.unwrap();

        let connector = Arc::new(SimulatedConnector::new().failing_first(2));
        let handle = Supervisor::spawn(driver.clone(), connector.clone(), init(), config(0));

        let err = driver
            .perform(&DeviceEvent::FindDevice { start: true })
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::WriteFailed(_)));

        let mut watch = driver.subscribe();
        watch.wait_for(DeviceState::Initialized).await.unwrap();

        assert_eq!(connector.calls(), 3);
        assert_eq!(connector.services(), vec![SERVICE; 3]);
        assert_eq!(connector.last_transport().unwrap().frames().len(), 3);

        driver
            .perform(&DeviceEvent::FindDevice { start: true })
            .await
            .unwrap();

        handle.shutdown().await;
        assert_eq!(handle.join().await, SupervisorExit::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let driver = driver();
        driver.lifecycle().fail();

        let connector = Arc::new(SimulatedConnector::new().failing_first(usize::MAX));
        let handle = Supervisor::spawn(driver.clone(), connector.clone(), init(), config(3));

        assert_eq!(handle.join().await, SupervisorExit::GaveUp);
        assert_eq!(connector.calls(), 3);
        assert_eq!(driver.state(), DeviceState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_permanent_connect_error() {
        let driver = driver();
        driver.lifecycle().fail();

        let connector = Arc::new(NoAdapter::default());
        let handle = Supervisor::spawn(driver.clone(), connector.clone(), init(), config(0));

        assert_eq!(handle.join().await, SupervisorExit::GaveUp);
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignores_deliberate_disconnect() {
        let driver = driver();
        let connector = Arc::new(SimulatedConnector::new());
        driver
            .connect(connector.connect("band", SERVICE).await.unwrap(), &init())
            .await
            .unwrap();

        let handle = Supervisor::spawn(driver.clone(), connector.clone(), init(), config(0));
        driver.disconnect().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(connector.calls(), 1);
        assert_eq!(driver.state(), DeviceState::Disconnected);

        handle.shutdown().await;
        assert_eq!(handle.join().await, SupervisorExit::Shutdown);
    }
}
