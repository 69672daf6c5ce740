//! # Device Lifecycle State Machine
//!
//! Tracks connection/initialization state of one device and decides which
//! markers are legal.
//!
//! ## Transitions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  ┌────────────┐   ┌────────────┐   ┌──────────────┐   ┌─────────────┐  │
//! │  │Disconnected│──►│ Connecting │──►│ Initializing │──►│ Initialized │  │
//! │  └────────────┘   └────────────┘   └──────────────┘   └─────────────┘  │
//! │        ▲                ▲                                               │
//! │        │                │ reconnect                                     │
//! │        │          ┌─────┴──────┐                                        │
//! │        │          │   Error    │ ◄──── from any state                   │
//! │        │          └────────────┘                                        │
//! │        └──────── disconnect (from any state)                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The only mutators are [`Lifecycle::apply_marker`] (markers reached inside
//! a transaction, plus an explicit disconnect) and [`Lifecycle::fail`]
//! (transport failure). After a failure the last marker reached before it
//! stays readable through [`Lifecycle::failed_from`], so a device that died
//! half-way through initialization reports `Initializing`, never
//! `Initialized`.

use crate::error::LifecycleError;
use crate::types::DeviceState;

/// Lifecycle of one connected device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lifecycle {
    state: DeviceState,
    failed_from: Option<DeviceState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Returns true if a marker for `to` is legal while in `from`.
    pub fn can_transition(from: DeviceState, to: DeviceState) -> bool {
        use DeviceState::*;

        match to {
            Disconnected | Error => true,
            Connecting => matches!(from, Disconnected | Error),
            Initializing => from == Connecting,
            Initialized => from == Initializing,
        }
    }

    /// Applies a marker, returning the previous state.
    pub fn apply_marker(&mut self, to: DeviceState) -> Result<DeviceState, LifecycleError> {
        let from = self.state;
        if !Self::can_transition(from, to) {
            return Err(LifecycleError { from, to });
        }
        self.state = to;
        if to != DeviceState::Error {
            self.failed_from = None;
        }
        Ok(from)
    }

    /// Forces `Error` after a transport failure, returning the previous state.
    pub fn fail(&mut self) -> DeviceState {
        let from = std::mem::replace(&mut self.state, DeviceState::Error);
        if from != DeviceState::Error {
            self.failed_from = Some(from);
        }
        from
    }

    /// State the device was in when the last transport failure hit, while it
    /// is still in `Error`.
    pub fn failed_from(&self) -> Option<DeviceState> {
        self.failed_from
    }
}
