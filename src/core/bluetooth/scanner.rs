use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use bluest::{Adapter, AdvertisingDevice, Device, Uuid};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::advertisement::raw_manufacturer_payload;
use crate::core::bluetooth::transport::{Advertisement, TransportEvent};
use crate::core::bluetooth::types::PeripheralId;
use crate::utils::lock;

/// Runs the bluest advertisement stream on a background task and forwards every
/// sighting as a [`TransportEvent::AdvertisementSeen`].
pub struct BluetoothScanner {
    adapter: Adapter,
    devices: Arc<Mutex<HashMap<PeripheralId, Device>>>,
    events: UnboundedSender<TransportEvent>,
    cancel_token: CancellationToken,
    scan_task_handle: Option<JoinHandle<()>>,
}

impl BluetoothScanner {
    pub fn new(
        adapter: Adapter,
        devices: Arc<Mutex<HashMap<PeripheralId, Device>>>,
        events: UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            adapter,
            devices,
            events,
            cancel_token: CancellationToken::new(),
            scan_task_handle: None,
        }
    }

    /// Starts a scan task. Peripherals already connected to the host that expose
    /// `known_service` are reported first, with a signal strength of 0.
    pub fn start_scan(&mut self, runtime: &Handle, services: Vec<Uuid>, known_service: Uuid) {
        if self.scan_task_handle.is_some() {
            self.stop_scan();
        }

        self.cancel_token = CancellationToken::new();
        let cancel_token_for_task = self.cancel_token.clone();
        let adapter_for_task = self.adapter.clone();
        let devices_for_task = self.devices.clone();
        let events_for_task = self.events.clone();

        let handle = runtime.spawn(async move {
            if let Err(e) = Self::internal_scan_task(
                adapter_for_task,
                devices_for_task,
                events_for_task,
                cancel_token_for_task,
                services,
                known_service,
            )
            .await
            {
                error!("Scan task finished with an error: {:?}", e);
            }
        });

        self.scan_task_handle = Some(handle);
        info!("Device scan task started.");
    }

    /// Signals the scan task to stop. Does not wait for it.
    pub fn stop_scan(&mut self) {
        info!("Stopping Bluetooth scan.");
        self.cancel_token.cancel();
        if self.scan_task_handle.take().is_none() {
            debug!("No active scan task handle found.");
        }
    }

    async fn internal_scan_task(
        adapter: Adapter,
        devices: Arc<Mutex<HashMap<PeripheralId, Device>>>,
        events: UnboundedSender<TransportEvent>,
        cancel_token: CancellationToken,
        services: Vec<Uuid>,
        known_service: Uuid,
    ) -> Result<()> {
        info!("Checking for connected devices");
        match adapter.connected_devices_with_services(&[known_service]).await {
            Ok(connected) => {
                for device in connected {
                    let advertisement = Advertisement {
                        id: PeripheralId::new(device.id().to_string()),
                        name: device.name().ok(),
                        local_name: None,
                        manufacturer_data: None,
                        rssi: 0.0,
                    };
                    if !Self::report(&devices, &events, device, advertisement) {
                        return Ok(());
                    }
                }
            }
            Err(e) => warn!("Failed to list connected devices: {}", e),
        }

        info!("Starting bluetooth scan");
        let mut scan_stream = adapter.scan(&services).await?;

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    match result {
                        Some(discovered_device) => {
                            let Some(advertisement) = Self::to_advertisement(&discovered_device) else {
                                continue;
                            };
                            if !Self::report(&devices, &events, discovered_device.device, advertisement) {
                                break;
                            }
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    info!("Scan task was cancelled.");
                    break;
                }
            }
        }
        Ok(())
    }

    fn to_advertisement(discovered: &AdvertisingDevice) -> Option<Advertisement> {
        let device = &discovered.device;
        let adv_data = &discovered.adv_data;
        debug!("Found device - Device: {:?}, RSSI: {:?}", device, discovered.rssi);

        let Some(rssi) = discovered.rssi else {
            debug!("Skipping {:?} without signal strength", device.id());
            return None;
        };

        Some(Advertisement {
            id: PeripheralId::new(device.id().to_string()),
            name: device.name().ok(),
            local_name: adv_data.local_name.clone(),
            manufacturer_data: adv_data
                .manufacturer_data
                .as_ref()
                .map(|m| raw_manufacturer_payload(m.company_id, &m.data)),
            rssi: f32::from(rssi),
        })
    }

    /// Remembers the device handle and forwards the advertisement.
    /// Returns false once nobody listens for events anymore.
    fn report(
        devices: &Arc<Mutex<HashMap<PeripheralId, Device>>>,
        events: &UnboundedSender<TransportEvent>,
        device: Device,
        advertisement: Advertisement,
    ) -> bool {
        lock(devices).insert(advertisement.id.clone(), device);
        if events
            .send(TransportEvent::AdvertisementSeen(advertisement))
            .is_err()
        {
            warn!("Transport event receiver dropped, ending scan.");
            return false;
        }
        true
    }
}
