//! # Tether Simulator
//!
//! Plays one band session end to end without a radio.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  load config ─► attach device ─► connect + initialize ─► supervisor     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  notifications (SMS, WeChat, call) ─► AGPS pull ─► confirm ─► detach    │
//! │                                                                         │
//! │  preference updates ─► broadcast bus ─► preferences.json                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tether_core::{DeviceEvent, NotificationKind};
use tether_link::{
    spawn_preference_sink, BroadcastEmitter, Connector, DeviceRegistry, LinkConfig, QueryParams,
    SimulatedConnector, Supervisor, SupervisorConfig,
};
use tether_store::{AgpsCache, PreferenceStore};

const AGPS_PATH: &str = "/agps";
const AGPS_QUERY: &str = "constellations=GPS,GLONASS";

/// Plays one simulated band session.
#[derive(Parser, Debug)]
#[command(name = "tether-sim")]
struct Args {
    /// Link configuration file (TOML). Platform config dir if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tar archive to seed the device's AGPS cache with.
    #[arg(long)]
    agps: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = LinkConfig::load(args.config.clone()).unwrap_or_else(|e| {
        warn!(error = %e, "Falling back to default configuration");
        LinkConfig::default()
    });
    info!(
        device_id = %config.device_id(),
        family = %config.family(),
        ack_timeout_ms = config.link.ack_timeout_ms,
        "Configuration loaded"
    );

    // Preference bus: handler events land in the JSON preference file.
    let store = Arc::new(
        PreferenceStore::open(config.preferences_path())
            .await
            .context("opening preference store")?,
    );
    let bus = BroadcastEmitter::new(64);
    let sink = spawn_preference_sink(bus.subscribe(), store.clone());

    let cache = AgpsCache::new(config.cache_dir()).with_max_bytes(config.agps.max_archive_bytes);
    if let Some(path) = &args.agps {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let cached = cache.write(config.device_id(), &bytes).await?;
        info!(path = %cached.display(), size = bytes.len(), "AGPS archive cached");
    }

    let registry = DeviceRegistry::new(config.link.clone(), cache, Arc::new(bus.clone()));
    let entry = registry.attach(config.device_id(), config.family()).await?;

    // Connect and initialize.
    let connector = Arc::new(SimulatedConnector::new().with_latency(Duration::from_millis(20)));
    let transport = connector
        .connect(config.device_id(), entry.driver.family().service())
        .await?;
    let init = config.init_context(Local::now().naive_local());
    entry.driver.connect(transport, &init).await?;

    let supervisor = Supervisor::spawn(
        entry.driver.clone(),
        connector.clone(),
        init,
        SupervisorConfig::from(&config),
    );

    // A few phone-side events.
    let events = [
        DeviceEvent::Notification {
            kind: NotificationKind::Sms,
            sender: "Alice".into(),
        },
        DeviceEvent::Notification {
            kind: NotificationKind::WeChat,
            sender: "Bob".into(),
        },
        DeviceEvent::IncomingCall {
            caller: "+81 3 1234 5678".into(),
        },
        DeviceEvent::CallEnded,
    ];
    for event in &events {
        if let Err(e) = entry.driver.perform(event).await {
            warn!(error = %e, ?event, "Event not delivered");
        }
    }

    // The band asks for almanac data.
    let query = QueryParams::parse(AGPS_QUERY);
    match entry.agps.handle(AGPS_PATH, &query).await {
        Some(delivery) => {
            info!(size = delivery.bytes.len(), "Transmitting AGPS archive");
            delivery.ticket.confirm().await;
        }
        None => info!("No AGPS response sent"),
    }

    supervisor.shutdown().await;
    let exit = supervisor.join().await;
    info!(?exit, "Reconnect supervisor exited");
    registry.detach(config.device_id()).await?;

    if let Some(transport) = connector.last_transport() {
        info!(frames = transport.frames().len(), "Frames written to band");
    }

    // Close the bus so the sink drains and stops.
    drop(entry);
    drop(registry);
    drop(bus);
    sink.await.context("preference sink")?;

    let prefs = store.device(config.device_id()).await;
    info!(
        agps_status = %store.agps_status(config.device_id()).await,
        agps_last_update = ?store.agps_last_update(config.device_id()).await,
        keys = prefs.len(),
        "Session complete"
    );
    Ok(())
}

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=tether_link=trace` - Show trace for the link crate only
/// - Default: INFO level
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tether_link=debug"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_accept_both_flag_forms() {
        let args = Args::try_parse_from([
            "tether-sim",
            "--config=link.toml",
            "--agps",
            "almanac.tar",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("link.toml")));
        assert_eq!(args.agps, Some(PathBuf::from("almanac.tar")));

        let bare = Args::try_parse_from(["tether-sim"]).unwrap();
        assert!(bare.config.is_none() && bare.agps.is_none());

        assert!(Args::try_parse_from(["tether-sim", "--verbose"]).is_err());
    }
}
