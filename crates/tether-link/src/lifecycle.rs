//! Shared, observable lifecycle of one device.
//!
//! The state machine itself lives in `tether_core::Lifecycle`; this wraps it
//! in a `watch` channel so the queue worker mutates it and anyone else can
//! follow along.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use tether_core::{DeviceState, Lifecycle, LifecycleError};

/// Cloneable handle to a device's lifecycle.
#[derive(Debug, Clone)]
pub struct LifecycleHandle {
    device_id: Arc<str>,
    tx: Arc<watch::Sender<Lifecycle>>,
}

impl LifecycleHandle {
    pub fn new(device_id: impl Into<Arc<str>>) -> Self {
        let (tx, _rx) = watch::channel(Lifecycle::new());
        LifecycleHandle {
            device_id: device_id.into(),
            tx: Arc::new(tx),
        }
    }

    pub fn state(&self) -> DeviceState {
        self.tx.borrow().state()
    }

    /// Last state reached before the current `Error`, if any.
    pub fn failed_from(&self) -> Option<DeviceState> {
        self.tx.borrow().failed_from()
    }

    /// Applies a marker, returning the previous state.
    pub fn apply_marker(&self, to: DeviceState) -> Result<DeviceState, LifecycleError> {
        let mut outcome = Err(LifecycleError {
            from: to,
            to,
        });
        self.tx.send_if_modified(|lc| {
            outcome = lc.apply_marker(to);
            matches!(outcome, Ok(from) if from != to)
        });

        match outcome {
            Ok(from) if from != to => {
                info!(device_id = %self.device_id, %from, %to, "Lifecycle transition");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(device_id = %self.device_id, error = %e, "Rejected lifecycle marker");
            }
        }
        outcome
    }

    /// Forces `Error`, returning the previous state.
    pub fn fail(&self) -> DeviceState {
        let mut from = DeviceState::Error;
        self.tx.send_if_modified(|lc| {
            from = lc.fail();
            from != DeviceState::Error
        });
        if from != DeviceState::Error {
            warn!(device_id = %self.device_id, %from, "Lifecycle forced to error");
        }
        from
    }

    pub fn subscribe(&self) -> LifecycleWatch {
        LifecycleWatch {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving end of a device's lifecycle.
#[derive(Debug, Clone)]
pub struct LifecycleWatch {
    rx: watch::Receiver<Lifecycle>,
}

impl LifecycleWatch {
    /// Current state, marking it as seen.
    pub fn current(&mut self) -> DeviceState {
        self.rx.borrow_and_update().state()
    }

    /// Waits for the next state change. `None` once the device is gone.
    pub async fn changed(&mut self) -> Option<DeviceState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().state())
    }

    /// Waits until the device is in `state` (returns at once if it already is).
    pub async fn wait_for(&mut self, state: DeviceState) -> Option<DeviceState> {
        if self.current() == state {
            return Some(state);
        }
        loop {
            if self.changed().await? == state {
                return Some(state);
            }
        }
    }
}
