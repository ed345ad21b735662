//! Bridge commands
//! This module defines the operations a front end invokes on the Bluetooth manager.

use anyhow::{Context, Result, anyhow, bail};
use log::info;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Duration, sleep, timeout};

use crate::core::bluetooth::{
    BluetoothManager, LifecycleEvent, PeripheralRecord, Transport,
};

/// Scans for `duration` and returns the ranked device list.
pub async fn scan_devices<T: Transport + Send + 'static>(
    manager: &BluetoothManager<T>,
    duration: Duration,
) -> Result<Vec<PeripheralRecord>> {
    manager.start_scan().await.context("Failed to start scan")?;
    info!("Scanning for {:?}...", duration);
    sleep(duration).await;
    manager.stop_scan().await.context("Failed to stop scan")?;
    Ok(manager.snapshot().await)
}

/// Connects to `device_id`, or to the strongest listed device when none is given,
/// and waits until its channel is ready.
///
/// `events` must be the receiving end of a [`ChannelObserver`] registered on `manager`.
///
/// [`ChannelObserver`]: crate::core::bluetooth::ChannelObserver
pub async fn connect_to_device<T: Transport + Send + 'static>(
    manager: &BluetoothManager<T>,
    events: &mut UnboundedReceiver<LifecycleEvent>,
    device_id: Option<&str>,
    wait: Duration,
) -> Result<PeripheralRecord> {
    let target = match device_id {
        Some(id) => id.to_string(),
        None => manager
            .snapshot()
            .await
            .first()
            .map(|record| record.id.to_string())
            .ok_or_else(|| anyhow!("No devices found"))?,
    };

    manager
        .connect_device(&target)
        .await
        .with_context(|| format!("Failed to connect to {}", target))?;

    let outcome = timeout(wait, async {
        while let Some(event) = events.recv().await {
            match event {
                LifecycleEvent::DeviceReady(record) if record.id.as_str() == target => {
                    return Ok(record);
                }
                LifecycleEvent::ConnectionFailed { device, failure } if device.id.as_str() == target => {
                    bail!("Connection to {} failed: {}", device.display_name(), failure);
                }
                _ => {}
            }
        }
        Err(anyhow!("Lifecycle event channel closed"))
    })
    .await;

    match outcome {
        Ok(result) => result,
        Err(_) => Err(anyhow!("{} was not ready within {:?}", target, wait)),
    }
}

/// Writes `text` to the ready channel.
pub async fn send<T: Transport + Send + 'static>(
    manager: &BluetoothManager<T>,
    text: &str,
) -> Result<()> {
    manager
        .write(text.as_bytes())
        .await
        .context("Failed to write to device")
}

/// Renders the ranked device list as a plain-text table.
pub fn format_device_table(records: &[PeripheralRecord]) -> String {
    let mut table = format!(
        "{:<3} {:<38} {:<24} {:>6}  {:<9} {}\n",
        "#", "ID", "NAME", "RSSI", "SIGNAL", "MANUFACTURER"
    );
    for (index, record) in records.iter().enumerate() {
        table.push_str(&format!(
            "{:<3} {:<38} {:<24} {:>6.0}  {:<9} {}\n",
            index + 1,
            record.id.as_str(),
            record.display_name(),
            record.rssi,
            record.signal_quality().label(),
            record.manufacturer_name
        ));
    }
    table
}
