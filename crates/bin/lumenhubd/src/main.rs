//! # lumenhubd — lumenhub daemon
//!
//! Composition root that wires all adapters together and runs the hub.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Install the `tracing` subscriber
//! - Read the device map and hub document through the config-file store
//! - Construct the broadcast channel, flag source and transports
//! - Start the hub and announce discovered devices to it
//! - Handle graceful shutdown (SIGINT)
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no domain logic belongs here.

mod config;

use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use lumenhub_adapter_config_file::FileConfigStore;
use lumenhub_adapter_flags_http::HttpFlagSource;
use lumenhub_adapter_virtual::VirtualTransport;
use lumenhub_app::broadcast::InProcessBroadcast;
use lumenhub_app::hub::Hub;
use lumenhub_app::ports::ConfigStore;
use lumenhub_domain::event::DeviceUpdateKind;

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.filter)?)
        .init();

    // Configuration store
    let store = FileConfigStore::new(&config.hub.devices, &config.hub.document);
    let records = store.load_device_map().await?;
    let mut document = store.load_document().await?;
    if let Some(secs) = config.flags.poll_interval_secs {
        document.defaults.flag_poll_interval_secs = secs;
    }

    // Adapters
    let broadcast = InProcessBroadcast::new(config.broadcast.capacity);
    let mut updates = broadcast.subscribe();
    let flags = HttpFlagSource::new(config.flag_timeout())?;
    let transport = if config.integrations.virtual_enabled {
        VirtualTransport::from_records(&records)
    } else {
        VirtualTransport::new()
    };

    // Hub
    let hub = Hub::new(records, document, broadcast, flags);
    let client = hub.handle();
    let running = tokio::spawn(hub.run());
    transport.announce(&client)?;

    let monitor = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => match &update.kind {
                    DeviceUpdateKind::StateChanged { snapshot, change } => tracing::info!(
                        channel = %snapshot.channel,
                        power_state = ?snapshot.power_state,
                        origin = ?change.origin,
                        "device state changed"
                    ),
                    DeviceUpdateKind::Updated { snapshot } => tracing::debug!(
                        channel = %snapshot.channel,
                        online = snapshot.is_online,
                        "device updated"
                    ),
                },
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "update monitor lagging");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    tracing::info!("lumenhubd running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    client.shutdown()?;
    running.await?;
    monitor.abort();
    Ok(())
}
