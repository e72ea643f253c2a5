// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! SPP Scanner

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use spp_scanner::bluetooth::DeviceAddress;
use spp_scanner::config::Config;

/// Read barcodes from a paired Bluetooth SPP scanner.
#[derive(Parser, Debug)]
#[command(name = "spp-scanner", version, about)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scanner address, overrides the configured one
    #[arg(short, long)]
    device: Option<String>,

    /// Print paired devices and exit
    #[arg(long)]
    list_paired: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; scanned codes go to stdout, logs to stderr
    let directive = if cli.verbose {
        "spp_scanner=debug"
    } else {
        "spp_scanner=info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    info!("Starting SPP Scanner v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load_from(&config_path)?;
    info!("Configuration loaded from {}", config_path.display());

    let device = if cli.list_paired {
        None
    } else {
        let raw = cli
            .device
            .as_deref()
            .or(config.scanner.device_address.as_deref())
            .ok_or_else(|| {
                anyhow!(
                    "No scanner configured; pass --device or set scanner.device_address in {}",
                    config_path.display()
                )
            })?;
        Some(DeviceAddress::parse(raw)?)
    };

    run(config, device).await?;

    info!("SPP Scanner stopped");
    Ok(())
}

#[cfg(feature = "bluez")]
async fn run(config: Config, device: Option<DeviceAddress>) -> Result<()> {
    use spp_scanner::bluetooth::{BluezAdapter, ConnectionManager, ReconnectSupervisor};
    use spp_scanner::events::EventProcessor;
    use spp_scanner::state::{AppState, ConnectionStatus};
    use std::sync::Arc;
    use tracing::warn;

    let adapter = Arc::new(BluezAdapter::new().await?);
    let (manager, events) = ConnectionManager::new(adapter, config.link.clone());

    let Some(device) = device else {
        for paired in manager.paired_devices().await {
            println!("{}\t{}", paired.address, paired.name);
        }
        return Ok(());
    };

    let state = AppState::new();
    let supervisor = ReconnectSupervisor::new(manager, config.reconnect.clone());
    let pump = tokio::spawn(
        supervisor
            .clone()
            .run(events, EventProcessor::new(state.clone())),
    );

    state.set_status(ConnectionStatus::Connecting);
    if !supervisor.connect(device).await {
        warn!("Initial connection failed, retrying in the background");
    }

    info!("Ready. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    supervisor.disconnect().await;
    tokio::task::yield_now().await;
    pump.abort();

    info!("{} codes scanned", state.get_scan_count());
    Ok(())
}

#[cfg(not(feature = "bluez"))]
async fn run(_config: Config, _device: Option<DeviceAddress>) -> Result<()> {
    anyhow::bail!("built without Bluetooth support; rebuild with `--features bluez`")
}
