use std::sync::Arc;

use anyhow::Result;
use ble_serial_bridge_lib::cli::{Cli, Commands};
use ble_serial_bridge_lib::commands::{connect_to_device, format_device_table, scan_devices, send};
use ble_serial_bridge_lib::core::bluetooth::{ChannelObserver, LifecycleEvent};
use ble_serial_bridge_lib::logging;
use ble_serial_bridge_lib::state::AppState;
use clap::Parser;
use log::{info, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::{Duration, sleep};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level(), cli.json_logs);

    info!("Starting AppState initialization.");
    let mut app_state = AppState::new(&cli.config_dir).await?;

    let (sender, mut events) = mpsc::unbounded_channel();
    let observer = Arc::new(ChannelObserver::new(sender));
    app_state.bluetooth_manager.set_observer(&observer).await;

    let result = run(cli.command, &app_state, &mut events).await;
    app_state.bluetooth_manager.shutdown().await;
    result
}

async fn run(
    command: Commands,
    app_state: &AppState,
    events: &mut UnboundedReceiver<LifecycleEvent>,
) -> Result<()> {
    let manager = &app_state.bluetooth_manager;
    match command {
        Commands::Scan { duration } => {
            let devices = scan_devices(manager, Duration::from_secs(duration)).await?;
            print!("{}", format_device_table(&devices));
        }
        Commands::Connect {
            device,
            duration,
            send: text,
            wait,
        } => {
            let devices = scan_devices(manager, Duration::from_secs(duration)).await?;
            print!("{}", format_device_table(&devices));

            let record = connect_to_device(
                manager,
                events,
                device.as_deref(),
                Duration::from_secs(wait),
            )
            .await?;
            println!("Connected to {} ({})", record.display_name(), record.id);

            if let Err(e) = manager.read_rssi().await {
                warn!("Failed to request RSSI: {}", e);
            }
            if let Some(text) = text {
                send(manager, &text).await?;
                println!("Sent {} bytes", text.len());
            }
            // Let pending writes and RSSI reads complete before shutting down.
            sleep(Duration::from_secs(1)).await;
        }
    }
    Ok(())
}
