//! Bluetooth connection handling on top of bluest
//! Every request spawns a task on the runtime and reports its outcome as a
//! [`TransportEvent`] on the shared event channel.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use bluest::{Adapter, AdapterEvent, Characteristic, Device, Service, Uuid};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};

use crate::core::bluetooth::constants::ADAPTER_READY_TIMEOUT_SECS;
use crate::core::bluetooth::notification::NotificationHandler;
use crate::core::bluetooth::scanner::BluetoothScanner;
use crate::core::bluetooth::transport::{Transport, TransportEvent};
use crate::core::bluetooth::types::{
    CharacteristicFlags, CharacteristicInfo, PeripheralId, ServiceInfo, WriteMode,
};
use crate::error::TransportError;
use crate::utils::lock;

/// Waits for the adapter to report the radio as available, for at most `limit`.
/// Some platforms report a fresh adapter as unavailable until their first state update.
async fn wait_for_radio<E: Display>(
    ready: impl Future<Output = std::result::Result<(), E>>,
    limit: Duration,
) -> bool {
    match timeout(limit, ready).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("Bluetooth adapter is not usable: {}", e);
            false
        }
        Err(_) => {
            warn!("Bluetooth radio still unavailable after {:?}.", limit);
            false
        }
    }
}

/// Radio stack backed by the platform Bluetooth adapter
pub struct BluestTransport {
    adapter: Adapter,
    runtime: Handle,
    events: UnboundedSender<TransportEvent>,
    powered: Arc<AtomicBool>,
    /// Service used to find peripherals that are already connected to the host
    known_service: Uuid,
    devices: Arc<Mutex<HashMap<PeripheralId, Device>>>,
    services: Arc<Mutex<HashMap<Uuid, Service>>>,
    characteristics: Arc<Mutex<HashMap<(Uuid, Uuid), Characteristic>>>,
    scanner: BluetoothScanner,
    notification_handler: NotificationHandler,
    power_watch_handle: JoinHandle<()>,
}

impl BluestTransport {
    /// Opens the default adapter. Must be called from within a tokio runtime.
    pub async fn new(known_service: Uuid) -> Result<(Self, UnboundedReceiver<TransportEvent>)> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
        let powered_on = wait_for_radio(
            adapter.wait_available(),
            Duration::from_secs(ADAPTER_READY_TIMEOUT_SECS),
        )
        .await;
        info!(
            "Bluetooth adapter found, radio is {}.",
            if powered_on { "on" } else { "off" }
        );

        let runtime = Handle::current();
        let (events, receiver) = mpsc::unbounded_channel();
        let powered = Arc::new(AtomicBool::new(powered_on));
        let devices = Arc::new(Mutex::new(HashMap::new()));
        let scanner = BluetoothScanner::new(adapter.clone(), devices.clone(), events.clone());
        let power_watch_handle = runtime.spawn(Self::watch_power(
            adapter.clone(),
            powered.clone(),
            events.clone(),
        ));

        let transport = Self {
            adapter,
            runtime,
            events,
            powered,
            known_service,
            devices,
            services: Arc::new(Mutex::new(HashMap::new())),
            characteristics: Arc::new(Mutex::new(HashMap::new())),
            scanner,
            notification_handler: NotificationHandler::new(),
            power_watch_handle,
        };
        Ok((transport, receiver))
    }

    async fn watch_power(
        adapter: Adapter,
        powered: Arc<AtomicBool>,
        events: UnboundedSender<TransportEvent>,
    ) {
        let mut adapter_events = match adapter.events().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to watch adapter state: {}", e);
                return;
            }
        };

        while let Some(result) = adapter_events.next().await {
            let event = match result {
                Ok(AdapterEvent::Available) => {
                    powered.store(true, Ordering::SeqCst);
                    TransportEvent::RadioPoweredOn
                }
                Ok(AdapterEvent::Unavailable) => {
                    powered.store(false, Ordering::SeqCst);
                    TransportEvent::RadioPoweredOff
                }
                Err(e) => {
                    error!("Error in adapter event stream: {}", e);
                    break;
                }
            };
            if events.send(event).is_err() {
                break;
            }
        }
        info!("Adapter event stream ended");
    }

    fn emit(events: &UnboundedSender<TransportEvent>, event: TransportEvent) {
        if let Err(e) = events.send(event) {
            warn!("Dropping transport event, receiver closed: {:?}", e.0);
        }
    }

    fn device(&self, peripheral: &PeripheralId) -> Result<Device, TransportError> {
        lock(&self.devices)
            .get(peripheral)
            .cloned()
            .ok_or_else(|| TransportError::UnknownPeripheral(peripheral.clone()))
    }

    fn characteristic(
        &self,
        peripheral: &PeripheralId,
        info: &CharacteristicInfo,
    ) -> Result<Characteristic, TransportError> {
        lock(&self.characteristics)
            .get(&(info.service_uuid, info.uuid))
            .cloned()
            .ok_or_else(|| TransportError::UnknownCharacteristic {
                peripheral: peripheral.clone(),
                characteristic: info.uuid.to_string(),
            })
    }

    async fn describe_characteristic(
        service_uuid: Uuid,
        characteristic: &Characteristic,
    ) -> CharacteristicInfo {
        let flags = match characteristic.properties().await {
            Ok(props) => CharacteristicFlags {
                read: props.read,
                write: props.write,
                write_without_response: props.write_without_response,
                notify: props.notify,
                indicate: props.indicate,
            },
            Err(e) => {
                warn!(
                    "Failed to read properties of {}: {}",
                    characteristic.uuid(),
                    e
                );
                CharacteristicFlags::default()
            }
        };
        CharacteristicInfo {
            uuid: characteristic.uuid(),
            service_uuid,
            flags,
        }
    }
}

impl Transport for BluestTransport {
    fn is_powered_on(&self) -> bool {
        self.powered.load(Ordering::SeqCst)
    }

    fn start_scan(&mut self, services: &[Uuid]) -> Result<(), TransportError> {
        if !self.is_powered_on() {
            return Err(TransportError::AdapterNotAvailable);
        }
        self.scanner
            .start_scan(&self.runtime, services.to_vec(), self.known_service);
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), TransportError> {
        self.scanner.stop_scan();
        Ok(())
    }

    fn forget_peripherals(&mut self) {
        let mut devices = lock(&self.devices);
        debug!("Forgetting {} device handles", devices.len());
        devices.clear();
    }

    fn connect(&mut self, peripheral: &PeripheralId) -> Result<(), TransportError> {
        let device = self.device(peripheral)?;
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let id = peripheral.clone();

        self.runtime.spawn(async move {
            if device.is_connected().await {
                info!("Device {} already connected.", id);
                Self::emit(&events, TransportEvent::Connected(id));
                return;
            }
            let event = match adapter.connect_device(&device).await {
                Ok(()) => TransportEvent::Connected(id),
                Err(e) => TransportEvent::ConnectFailed {
                    id,
                    reason: e.to_string(),
                },
            };
            Self::emit(&events, event);
        });
        Ok(())
    }

    fn disconnect(&mut self, peripheral: &PeripheralId) -> Result<(), TransportError> {
        let device = self.device(peripheral)?;
        self.notification_handler.stop_notifications();
        lock(&self.services).clear();
        lock(&self.characteristics).clear();

        let adapter = self.adapter.clone();
        self.runtime.spawn(async move {
            if !device.is_connected().await {
                info!("Device {} not connected", device.id());
                return;
            }
            info!("Disconnecting from device {}", device.id());
            match adapter.disconnect_device(&device).await {
                Ok(()) => info!("Successfully disconnected"),
                Err(e) => error!("Failed to disconnect: {}", e),
            }
        });
        Ok(())
    }

    fn discover_services(&mut self, peripheral: &PeripheralId) -> Result<(), TransportError> {
        let device = self.device(peripheral)?;
        let services = self.services.clone();
        let events = self.events.clone();
        let id = peripheral.clone();

        self.runtime.spawn(async move {
            match device.discover_services().await {
                Ok(discovered) => {
                    let infos = {
                        let mut services = lock(&services);
                        services.clear();
                        discovered
                            .into_iter()
                            .map(|service| {
                                let uuid = service.uuid();
                                services.insert(uuid, service);
                                ServiceInfo { uuid }
                            })
                            .collect()
                    };
                    Self::emit(
                        &events,
                        TransportEvent::ServicesDiscovered {
                            id,
                            services: infos,
                        },
                    );
                }
                // No event: the lifecycle's discovery deadline covers this case.
                Err(e) => error!("Service discovery on {} failed: {}", id, e),
            }
        });
        Ok(())
    }

    fn discover_characteristics(
        &mut self,
        peripheral: &PeripheralId,
        service: &ServiceInfo,
    ) -> Result<(), TransportError> {
        let bluest_service = lock(&self.services)
            .get(&service.uuid)
            .cloned()
            .ok_or_else(|| TransportError::UnknownService {
                peripheral: peripheral.clone(),
                service: service.uuid.to_string(),
            })?;
        let characteristics = self.characteristics.clone();
        let events = self.events.clone();
        let id = peripheral.clone();
        let service = service.clone();

        self.runtime.spawn(async move {
            let discovered = match bluest_service.discover_characteristics().await {
                Ok(discovered) => discovered,
                Err(e) => {
                    error!("Characteristic discovery of {} failed: {}", service.uuid, e);
                    Vec::new()
                }
            };

            let mut infos = Vec::with_capacity(discovered.len());
            for characteristic in discovered {
                let info = Self::describe_characteristic(service.uuid, &characteristic).await;
                debug!("Characteristic {} flags {:?}", info.uuid, info.flags);
                lock(&characteristics).insert((service.uuid, info.uuid), characteristic);
                infos.push(info);
            }

            Self::emit(
                &events,
                TransportEvent::CharacteristicsDiscovered {
                    id,
                    service,
                    characteristics: infos,
                },
            );
        });
        Ok(())
    }

    fn subscribe(
        &mut self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicInfo,
    ) -> Result<(), TransportError> {
        let notify_char = self.characteristic(peripheral, characteristic)?;
        self.notification_handler
            .setup_notifications(&self.runtime, peripheral.clone(), notify_char);
        Ok(())
    }

    fn write(
        &mut self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicInfo,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError> {
        let write_char = self.characteristic(peripheral, characteristic)?;
        let events = self.events.clone();
        let id = peripheral.clone();
        let data = data.to_vec();

        self.runtime.spawn(async move {
            let result = match mode {
                WriteMode::WithResponse => write_char.write(&data).await,
                WriteMode::WithoutResponse => write_char.write_without_response(&data).await,
            };
            Self::emit(
                &events,
                TransportEvent::ValueWritten {
                    id,
                    characteristic: write_char.uuid(),
                    error: result.err().map(|e| e.to_string()),
                },
            );
        });
        Ok(())
    }

    fn read_rssi(&mut self, peripheral: &PeripheralId) -> Result<(), TransportError> {
        let device = self.device(peripheral)?;
        let events = self.events.clone();
        let id = peripheral.clone();

        self.runtime.spawn(async move {
            match device.rssi().await {
                Ok(rssi) => Self::emit(&events, TransportEvent::RssiRead { id, rssi }),
                Err(e) => warn!("Failed to read RSSI of {}: {}", id, e),
            }
        });
        Ok(())
    }
}

impl Drop for BluestTransport {
    fn drop(&mut self) {
        self.scanner.stop_scan();
        self.power_watch_handle.abort();
    }
}
