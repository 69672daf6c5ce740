//! # Transport Seam
//!
//! The radio stack is not ours. All the link needs from it is "write these
//! bytes to this characteristic and tell me when the device acked". A
//! [`Session`] pairs one such transport with the characteristic commands go
//! to; it is handed to the queue worker on attach and replaced on every
//! reconnect.
//!
//! ## Session Lifetime
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Connector::connect() ──► Arc<dyn Transport> ──► Session ──► worker     │
//! │                                                     │                   │
//! │                          write failure / timeout    │ dropped           │
//! │                          or disconnect              ▼                   │
//! │                                               (no session)              │
//! │                                                     │                   │
//! │                          supervisor reconnects      │ reattach          │
//! │                                                     ▼                   │
//! │                                               new Session               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{LinkError, LinkResult};

// =============================================================================
// Transport Trait
// =============================================================================

/// A connected link to one device.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Writes one frame and resolves once the device acknowledged it.
    ///
    /// The caller bounds this with its own timeout; implementations may
    /// wait forever on a silent device.
    async fn write(&self, characteristic: Uuid, bytes: &[u8]) -> LinkResult<()>;
}

/// A transport bound to the characteristic commands are written to.
#[derive(Clone)]
pub struct Session {
    pub transport: Arc<dyn Transport>,
    pub characteristic: Uuid,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>, characteristic: Uuid) -> Self {
        Session {
            transport,
            characteristic,
        }
    }

    pub async fn write(&self, bytes: &[u8]) -> LinkResult<()> {
        self.transport.write(self.characteristic, bytes).await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("characteristic", &self.characteristic)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Simulated Transport
// =============================================================================

/// How a [`SimulatedTransport`] treats one write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Never ack; the caller's timeout fires.
    Stall,
    /// Reject the write immediately.
    Fail,
}

/// In-process stand-in for a band: records every write and acks after a
/// fixed latency, with optional faults at chosen write indices (0-based,
/// counted across the transport's lifetime).
#[derive(Debug, Default)]
pub struct SimulatedTransport {
    latency: Duration,
    faults: Vec<(usize, Fault)>,
    writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
    attempts: AtomicUsize,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Injects a fault at write number `index`.
    pub fn with_fault(mut self, index: usize, fault: Fault) -> Self {
        self.faults.push((index, fault));
        self
    }

    /// Frames acked so far, in order.
    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.writes
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }

    /// Bytes of every acked frame, in order.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.writes().into_iter().map(|(_, bytes)| bytes).collect()
    }

    /// Writes attempted, including faulted ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn write(&self, characteristic: Uuid, bytes: &[u8]) -> LinkResult<()> {
        let index = self.attempts.fetch_add(1, Ordering::SeqCst);

        match self.faults.iter().find(|(i, _)| *i == index).map(|(_, f)| *f) {
            Some(Fault::Stall) => std::future::pending::<()>().await,
            Some(Fault::Fail) => {
                return Err(LinkError::WriteFailed(format!("simulated fault at write {index}")))
            }
            None => {}
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Ok(mut writes) = self.writes.lock() {
            writes.push((characteristic, bytes.to_vec()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_transport_records_and_faults() {
        let transport = SimulatedTransport::new().with_fault(1, Fault::Fail);
        let ch = Uuid::nil();

        transport.write(ch, &[1, 2]).await.unwrap();
        assert!(transport.write(ch, &[3]).await.is_err());
        transport.write(ch, &[4]).await.unwrap();

        assert_eq!(transport.frames(), vec![vec![1, 2], vec![4]]);
        assert_eq!(transport.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_never_acks() {
        let transport = SimulatedTransport::new().with_fault(0, Fault::Stall);
        let result =
            tokio::time::timeout(Duration::from_secs(30), transport.write(Uuid::nil(), &[0])).await;
        assert!(result.is_err());
        assert!(transport.frames().is_empty());
    }
}
