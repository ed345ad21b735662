//! Bluetooth manager
//! Async front of the connection lifecycle. A background task pumps transport events
//! into the lifecycle and checks the discovery deadline.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::constants::DISCOVERY_DEADLINE_POLL_MS;
use crate::core::bluetooth::lifecycle::{ConnectionLifecycle, LifecycleConfig, LifecycleState};
use crate::core::bluetooth::observer::DiscoveryObserver;
use crate::core::bluetooth::registry::ManufacturerRegistry;
use crate::core::bluetooth::transport::{Transport, TransportEvent};
use crate::core::bluetooth::types::{PeripheralId, PeripheralRecord};
use crate::error::{BridgeError, Result};

/// Manages Bluetooth operations
pub struct BluetoothManager<T: Transport + Send + 'static> {
    lifecycle: Arc<Mutex<ConnectionLifecycle<T>>>,
    cancel_token: CancellationToken,
    pump_handle: Option<JoinHandle<()>>,
}

impl<T: Transport + Send + 'static> BluetoothManager<T> {
    /// Creates the manager and starts pumping `events` into the lifecycle.
    /// Must be called from within a tokio runtime.
    pub fn new(
        transport: T,
        events: UnboundedReceiver<TransportEvent>,
        registry: Arc<ManufacturerRegistry>,
        config: LifecycleConfig,
    ) -> Self {
        let lifecycle = Arc::new(Mutex::new(ConnectionLifecycle::new(
            transport, registry, config,
        )));
        let cancel_token = CancellationToken::new();
        let pump_handle = tokio::spawn(Self::pump_events(
            lifecycle.clone(),
            events,
            cancel_token.clone(),
        ));

        Self {
            lifecycle,
            cancel_token,
            pump_handle: Some(pump_handle),
        }
    }

    async fn pump_events(
        lifecycle: Arc<Mutex<ConnectionLifecycle<T>>>,
        mut events: UnboundedReceiver<TransportEvent>,
        cancel_token: CancellationToken,
    ) {
        let mut deadline_tick = interval(Duration::from_millis(DISCOVERY_DEADLINE_POLL_MS));
        deadline_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Event pump cancelled.");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => lifecycle.lock().await.handle_event(event),
                    None => {
                        info!("Transport event channel closed.");
                        break;
                    }
                },
                _ = deadline_tick.tick() => {
                    lifecycle.lock().await.poll_timeout(Instant::now());
                }
            }
        }
    }

    pub async fn set_observer<O: DiscoveryObserver + 'static>(&self, observer: &Arc<O>) {
        self.lifecycle.lock().await.set_observer(observer);
    }

    pub async fn clear_observer(&self) {
        self.lifecycle.lock().await.clear_observer();
    }

    pub async fn start_scan(&self) -> Result<()> {
        self.lifecycle.lock().await.start_scan()
    }

    pub async fn stop_scan(&self) -> Result<()> {
        self.lifecycle.lock().await.stop_scan()
    }

    pub async fn connect(&self, record: PeripheralRecord) -> Result<()> {
        self.lifecycle.lock().await.connect(record)
    }

    /// Connects to a listed peripheral by its handle
    pub async fn connect_device(&self, device_id: &str) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let record = lifecycle
            .ledger()
            .get(&PeripheralId::from(device_id))
            .cloned()
            .ok_or_else(|| BridgeError::DeviceNotFound(device_id.to_string()))?;
        lifecycle.connect(record)
    }

    pub async fn write(&self, data: &[u8]) -> Result<()> {
        self.lifecycle.lock().await.write(data)
    }

    pub async fn read_rssi(&self) -> Result<()> {
        self.lifecycle.lock().await.read_rssi()
    }

    /// Ranked list of the peripherals found so far
    pub async fn snapshot(&self) -> Vec<PeripheralRecord> {
        self.lifecycle.lock().await.snapshot()
    }

    pub async fn state(&self) -> LifecycleState {
        self.lifecycle.lock().await.state().clone()
    }

    pub async fn is_ready(&self) -> bool {
        matches!(self.state().await, LifecycleState::Ready(..))
    }

    /// Stops the event pump. Pending transport events are dropped.
    pub async fn shutdown(&mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.pump_handle.take() {
            if let Err(e) = handle.await {
                warn!("Event pump ended abnormally: {}", e);
            }
        }
        info!("Bluetooth manager shut down.");
    }
}

impl<T: Transport + Send + 'static> Drop for BluetoothManager<T> {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
