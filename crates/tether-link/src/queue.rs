//! # Command Queue
//!
//! One worker task per device executes transactions strictly in order; a
//! transaction runs to completion (or abort) before the next one starts.
//!
//! ## Worker Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Command Queue Worker                                 │
//! │                                                                         │
//! │  control channel (priority)           job channel (FIFO)               │
//! │  ──────────────────────────           ─────────────────                │
//! │  Reattach(session)                    Job { transaction, generation }   │
//! │  Disconnect                                  │                          │
//! │                                              ▼                          │
//! │                               stale generation? ──yes──► Discarded     │
//! │                                              │ no                       │
//! │                               needs Initialized and not? ──► NotInit.  │
//! │                                              │                          │
//! │                                              ▼                          │
//! │                               for each step, front to back:            │
//! │                                 Marker ──► lifecycle.apply_marker      │
//! │                                 Write  ──► session.write               │
//! │                                            bounded by ack timeout      │
//! │                                              │                          │
//! │                          timeout / transport error                      │
//! │                                              ▼                          │
//! │                               lifecycle → Error, session dropped,      │
//! │                               generation += 1 (queued jobs discarded)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The generation counter is what makes "drop everything queued" cheap: a job
//! remembers the generation it was enqueued in, and the worker refuses jobs
//! from an older one. A disconnect also bumps it, which additionally cuts
//! short a write that is still waiting for its ack.
//!
//! There is no retry here. Reconnecting and re-enqueueing is the caller's
//! job (see `supervisor`).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use tether_core::{Command, DeviceState, Step, Transaction};

use crate::error::{LinkError, LinkResult};
use crate::lifecycle::LifecycleHandle;
use crate::transport::Session;

// =============================================================================
// Messages
// =============================================================================

struct Job {
    transaction: Transaction,
    generation: u64,
    done: oneshot::Sender<LinkResult<()>>,
}

enum Control {
    Reattach(Session, oneshot::Sender<()>),
    Disconnect(oneshot::Sender<()>),
}

// =============================================================================
// Queue Handle
// =============================================================================

/// Handle for enqueueing work on a device's queue.
#[derive(Clone)]
pub struct QueueHandle {
    device_id: Arc<str>,
    jobs: mpsc::Sender<Job>,
    control: mpsc::Sender<Control>,
    generation: Arc<watch::Sender<u64>>,
    lifecycle: LifecycleHandle,
}

/// Completion of an enqueued transaction.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<LinkResult<()>>,
}

impl Completion {
    /// Waits for the transaction to finish.
    pub async fn wait(self) -> LinkResult<()> {
        self.rx.await.unwrap_or(Err(LinkError::ShuttingDown))
    }
}

impl QueueHandle {
    /// Appends a transaction to the device's FIFO.
    ///
    /// Resolves once the transaction is queued (waiting for room if the
    /// queue is full); the returned [`Completion`] resolves once it ran.
    pub async fn enqueue(&self, transaction: Transaction) -> LinkResult<Completion> {
        let (done, rx) = oneshot::channel();
        let job = Job {
            generation: *self.generation.borrow(),
            transaction,
            done,
        };
        self.jobs
            .send(job)
            .await
            .map_err(|_| LinkError::ShuttingDown)?;
        Ok(Completion { rx })
    }

    /// Enqueues a transaction and waits for it to finish.
    pub async fn submit(&self, transaction: Transaction) -> LinkResult<()> {
        self.enqueue(transaction).await?.wait().await
    }

    /// Hands the worker a fresh session. Takes effect before any job
    /// enqueued after this returns.
    pub async fn reattach(&self, session: Session) -> LinkResult<()> {
        let (ack, rx) = oneshot::channel();
        self.control
            .send(Control::Reattach(session, ack))
            .await
            .map_err(|_| LinkError::ShuttingDown)?;
        rx.await.map_err(|_| LinkError::ShuttingDown)
    }

    /// Drops the session, discards queued transactions, cuts short the one
    /// in progress and moves the device to `Disconnected`.
    pub async fn disconnect(&self) -> LinkResult<()> {
        self.generation.send_modify(|g| *g += 1);

        let (ack, rx) = oneshot::channel();
        self.control
            .send(Control::Disconnect(ack))
            .await
            .map_err(|_| LinkError::ShuttingDown)?;
        rx.await.map_err(|_| LinkError::ShuttingDown)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn lifecycle(&self) -> &LifecycleHandle {
        &self.lifecycle
    }
}

// =============================================================================
// Command Queue Worker
// =============================================================================

/// Serialized executor for one device.
pub struct CommandQueue {
    device_id: Arc<str>,
    lifecycle: LifecycleHandle,
    ack_timeout: Duration,
    session: Option<Session>,
    jobs: mpsc::Receiver<Job>,
    control: mpsc::Receiver<Control>,
    generation_tx: Arc<watch::Sender<u64>>,
    generation_rx: watch::Receiver<u64>,
}

impl CommandQueue {
    /// Spawns the worker for one device and returns its handle.
    pub fn spawn(
        device_id: impl Into<Arc<str>>,
        lifecycle: LifecycleHandle,
        ack_timeout: Duration,
        capacity: usize,
    ) -> QueueHandle {
        let device_id = device_id.into();
        let (jobs_tx, jobs_rx) = mpsc::channel(capacity.max(1));
        let (control_tx, control_rx) = mpsc::channel(4);
        let (generation_tx, generation_rx) = watch::channel(0u64);
        let generation_tx = Arc::new(generation_tx);

        let worker = CommandQueue {
            device_id: device_id.clone(),
            lifecycle: lifecycle.clone(),
            ack_timeout,
            session: None,
            jobs: jobs_rx,
            control: control_rx,
            generation_tx: generation_tx.clone(),
            generation_rx,
        };
        tokio::spawn(worker.run());

        QueueHandle {
            device_id,
            jobs: jobs_tx,
            control: control_tx,
            generation: generation_tx,
            lifecycle,
        }
    }

    async fn run(mut self) {
        debug!(device_id = %self.device_id, "Command queue started");

        loop {
            tokio::select! {
                biased;

                Some(control) = self.control.recv() => self.handle_control(control),

                job = self.jobs.recv() => match job {
                    Some(job) => {
                        let name = job.transaction.name().to_string();
                        let result = self.process(&job).await;
                        self.log_outcome(&name, &result);
                        let _ = job.done.send(result);
                    }
                    None => break,
                },
            }
        }

        debug!(device_id = %self.device_id, "Command queue stopped");
    }

    fn handle_control(&mut self, control: Control) {
        match control {
            Control::Reattach(session, ack) => {
                info!(device_id = %self.device_id, "Session attached");
                self.session = Some(session);
                let _ = ack.send(());
            }
            Control::Disconnect(ack) => {
                self.session = None;
                self.generation_rx.borrow_and_update();
                let _ = self.lifecycle.apply_marker(DeviceState::Disconnected);
                info!(device_id = %self.device_id, "Disconnected, queued work discarded");
                let _ = ack.send(());
            }
        }
    }

    async fn process(&mut self, job: &Job) -> LinkResult<()> {
        let generation = *self.generation_rx.borrow_and_update();
        if job.generation != generation {
            return Err(LinkError::Discarded);
        }

        let tx = &job.transaction;
        if tx.requires_initialized() {
            let state = self.lifecycle.state();
            if !state.is_ready() {
                return Err(LinkError::NotInitialized(state));
            }
        }

        debug!(
            device_id = %self.device_id,
            transaction = %tx.name(),
            commands = tx.command_count(),
            "Running transaction"
        );

        for step in tx.steps() {
            if *self.generation_rx.borrow() != generation {
                return Err(LinkError::Discarded);
            }

            match step {
                Step::Marker(state) => {
                    self.lifecycle.apply_marker(*state)?;
                }
                Step::Write(command) => {
                    if let Err(e) = self.write(command).await {
                        if e.is_transaction_fatal() {
                            self.abort_link();
                        }
                        return Err(e);
                    }
                }
            }
        }

        Ok(())
    }

    /// One write, bounded by the ack timeout and cut short by a disconnect.
    async fn write(&mut self, command: &Command) -> LinkResult<()> {
        let session = self.session.clone().ok_or(LinkError::NotAttached)?;
        let bytes = command.to_bytes();
        let ack_timeout = self.ack_timeout;

        debug!(
            device_id = %self.device_id,
            opcode = command.opcode,
            len = bytes.len(),
            "Writing frame"
        );

        tokio::select! {
            result = timeout(ack_timeout, session.write(&bytes)) => match result {
                Ok(ack) => ack,
                Err(_) => Err(LinkError::AckTimeout(ack_timeout.as_millis() as u64)),
            },
            _ = self.generation_rx.changed() => Err(LinkError::Discarded),
        }
    }

    /// The link is unusable: force `Error`, forget the session and orphan
    /// everything queued so far.
    fn abort_link(&mut self) {
        self.lifecycle.fail();
        self.session = None;
        self.generation_tx.send_modify(|g| *g += 1);
        self.generation_rx.borrow_and_update();
    }

    fn log_outcome(&self, name: &str, result: &LinkResult<()>) {
        match result {
            Ok(()) => debug!(device_id = %self.device_id, transaction = %name, "Transaction complete"),
            Err(LinkError::Discarded) => {
                debug!(device_id = %self.device_id, transaction = %name, "Transaction discarded")
            }
            Err(e) if e.is_transaction_fatal() => {
                error!(device_id = %self.device_id, transaction = %name, error = %e, "Transaction aborted")
            }
            Err(e) => {
                warn!(device_id = %self.device_id, transaction = %name, error = %e, "Transaction rejected")
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
