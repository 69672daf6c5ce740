//! # tether-link: Link Runtime for Tether
//!
//! Drives attached wearables: one serialized command queue per device, the
//! lifecycle each device moves through, reconnects after link failures, and
//! the AGPS pull-request handshake.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Link Runtime                                    │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  DeviceRegistry (one entry per device)           │  │
//! │  └───────────────┬──────────────────────────────────┬───────────────┘  │
//! │                  ▼                                  ▼                   │
//! │  ┌────────────────────────────┐     ┌────────────────────────────────┐ │
//! │  │ DeviceDriver               │     │ AgpsRequestHandler             │ │
//! │  │                            │     │                                │ │
//! │  │ events → family frames     │     │ query → cached archive → bytes │ │
//! │  │ init transaction           │     │ DeliveryTicket::confirm        │ │
//! │  └─────────────┬──────────────┘     └───────────────┬────────────────┘ │
//! │                ▼                                    ▼                   │
//! │  ┌────────────────────────────┐     ┌────────────────────────────────┐ │
//! │  │ CommandQueue worker        │     │ PreferenceEmitter              │ │
//! │  │                            │     │                                │ │
//! │  │ FIFO, ack timeout,         │     │ agps_status, agps_last_update  │ │
//! │  │ abort + drain on failure   │     │ → BroadcastEmitter → store     │ │
//! │  └─────────────┬──────────────┘     └────────────────────────────────┘ │
//! │                ▼                                                        │
//! │  ┌────────────────────────────┐     ┌────────────────────────────────┐ │
//! │  │ Transport (radio stack)    │ ◄── │ Supervisor: reconnect+backoff  │ │
//! │  └────────────────────────────┘     └────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - TOML + environment configuration
//! - [`error`] - Link error types
//! - [`transport`] - Transport seam and the simulated band
//! - [`lifecycle`] - Observable per-device lifecycle
//! - [`queue`] - Serialized per-device transaction worker
//! - [`driver`] - Family-aware device driver
//! - [`agps`] - AGPS pull-request handler
//! - [`events`] - Preference update bus
//! - [`registry`] - Attached devices
//! - [`supervisor`] - Reconnect policy
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tether_link::{LinkConfig, DeviceRegistry, BroadcastEmitter};
//!
//! let config = LinkConfig::load_or_default(None);
//! let registry = DeviceRegistry::new(config.link.clone(), cache, Arc::new(bus));
//!
//! let entry = registry.attach(config.device_id(), config.family()).await?;
//! entry.driver.connect(transport, &config.init_context(now)).await?;
//!
//! if let Some(delivery) = entry.agps.handle(path, &QueryParams::parse(query)).await {
//!     send(delivery.bytes).await?;
//!     delivery.ticket.confirm().await;
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agps;
pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod queue;
pub mod registry;
pub mod supervisor;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use agps::{AgpsDelivery, AgpsRequestHandler, DeliveryTicket, QueryParams};
pub use config::LinkConfig;
pub use driver::DeviceDriver;
pub use error::{LinkError, LinkResult};
pub use events::{
    spawn_preference_sink, BroadcastEmitter, NoOpEmitter, PreferenceEmitter, PreferenceUpdate,
};
pub use lifecycle::{LifecycleHandle, LifecycleWatch};
pub use queue::{CommandQueue, Completion, QueueHandle};
pub use registry::{DeviceEntry, DeviceRegistry};
pub use supervisor::{
    Connector, SimulatedConnector, Supervisor, SupervisorConfig, SupervisorExit, SupervisorHandle,
};
pub use transport::{Fault, Session, SimulatedTransport, Transport};
