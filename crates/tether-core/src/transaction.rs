//! # Transactions
//!
//! An ordered, atomically-sequenced batch of device commands with optional
//! lifecycle markers in between.
//!
//! ## Execution Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Transaction "initialize"                                               │
//! │                                                                         │
//! │  [Connecting] → [Initializing] → write → write → write → [Initialized]  │
//! │       │               │            │                          │         │
//! │       ▼               ▼            ▼                          ▼         │
//! │   state set      state set    await ack                  state set     │
//! │                               (timeout aborts the rest)                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Steps run front-to-back with no reordering. A marker mutates the device
//! state exactly when it is reached, so a transaction that fails half-way
//! leaves the state at the last marker it passed.

use crate::frame::Command;
use crate::types::DeviceState;

/// One step of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Write a frame and wait for the link-level ack.
    Write(Command),
    /// Move the device lifecycle to this state.
    Marker(DeviceState),
}

/// An ordered batch of steps, executed by the command queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    name: String,
    steps: Vec<Step>,
    requires_initialized: bool,
}

impl Transaction {
    /// Starts building a transaction. The name only shows up in logs.
    pub fn builder(name: impl Into<String>) -> TransactionBuilder {
        TransactionBuilder {
            name: name.into(),
            steps: Vec::new(),
            requires_initialized: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// User-action transactions are only valid on an initialized device.
    pub fn requires_initialized(&self) -> bool {
        self.requires_initialized
    }

    /// Number of write steps.
    pub fn command_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, Step::Write(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns a copy with `steps` placed in front of the existing ones.
    pub fn prepend(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        let mut head: Vec<Step> = steps.into_iter().collect();
        head.append(&mut self.steps);
        self.steps = head;
        self
    }
}

/// Builder mirroring the order in which steps will execute.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    name: String,
    steps: Vec<Step>,
    requires_initialized: bool,
}

impl TransactionBuilder {
    pub fn marker(mut self, state: DeviceState) -> Self {
        self.steps.push(Step::Marker(state));
        self
    }

    pub fn write(mut self, command: Command) -> Self {
        self.steps.push(Step::Write(command));
        self
    }

    pub fn write_all(mut self, commands: impl IntoIterator<Item = Command>) -> Self {
        self.steps.extend(commands.into_iter().map(Step::Write));
        self
    }

    /// Marks the transaction as a user action (performInitialized semantics).
    pub fn require_initialized(mut self) -> Self {
        self.requires_initialized = true;
        self
    }

    pub fn build(self) -> Transaction {
        Transaction {
            name: self.name,
            steps: self.steps,
            requires_initialized: self.requires_initialized,
        }
    }
}
