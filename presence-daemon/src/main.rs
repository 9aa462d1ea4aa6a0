mod config;
mod cycle;
mod diagnostics;
mod error_handler;
mod watchdog;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use presence_protocol::adapter::RealAdapterDriver;
use presence_protocol::{register_with_bluez, AdapterDriver, ConvexRegistryClient, FastPathQueue, PairingAgentState, RegistryClient};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use zbus::Connection;

use config::Config;
use cycle::Cycle;
use diagnostics::{init_logging, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli).context("failed to initialize logging")?;

    let mut config = Config::from_env();
    if let Some(path) = &cli.override_file {
        config.device_override_file = Some(path.clone());
    }

    info!(polling_interval = ?config.polling_interval, once = cli.once, "starting presence daemon");

    let adapter: Arc<dyn AdapterDriver> =
        Arc::new(RealAdapterDriver::new(config.device_info_cache_ttl, Duration::from_secs(10)));
    let registry: Arc<dyn RegistryClient> = Arc::new(ConvexRegistryClient::new(config.registry_config()));

    let fast_path = Arc::new(FastPathQueue::new(256, config.fast_path_event_suppression));
    let pairing = PairingAgentState::new(fast_path.clone(), config.pairing_timeout);

    if config.fast_path_queue_enabled {
        start_pairing_agent(pairing.clone(), adapter.clone()).await;
    } else {
        info!("fast-path queue disabled; pairing agent not registered");
    }

    watchdog::spawn(adapter.clone(), config.adapter_watchdog_interval, config.advertise_nudge_command.clone(), Duration::from_secs(5));

    let mut cycle = Cycle::new(adapter, registry, pairing, fast_path, config.clone());

    if cli.once {
        cycle.run_once().await;
        return Ok(());
    }

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut ticker = tokio::time::interval(config.polling_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                cycle.run_once().await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Connects to the system bus, serves the pairing agent, and starts the
/// background watcher that folds BlueZ's device signals into
/// `PairingAgentState`. Failure here is logged, not fatal: the daemon can
/// still track presence via polling alone, just without the fast path.
async fn start_pairing_agent(pairing: PairingAgentState, adapter: Arc<dyn AdapterDriver>) {
    let connection = match Connection::system().await {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "failed to connect to the D-Bus system bus; pairing fast-path disabled");
            return;
        }
    };

    if let Err(e) = register_with_bluez(&connection, pairing.clone(), adapter).await {
        warn!(error = %e, "failed to register BlueZ pairing agent; pairing fast-path disabled");
        return;
    }

    if let Err(e) = presence_protocol::pairing::watcher::spawn(connection, pairing).await {
        warn!(error = %e, "failed to start BlueZ device watcher; pairing fast-path disabled");
    }
}
