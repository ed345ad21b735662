//! Connection lifecycle
//!
//! Owns scan state, the discovery ledger and the single connection attempt. Every
//! transition is driven either by a caller operation or by a [`TransportEvent`]; neither
//! path blocks, the outcome of each request arrives later as another event.
//!
//! ```text
//! idle -> scanning -> connecting -> discovering services -> discovering characteristics -> ready
//!   ^________________________|______________________|_______________________|
//!            connect failed / radio off / discovery timeout
//! ```

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::bluetooth_config::BluetoothConfig;
use crate::core::bluetooth::advertisement;
use crate::core::bluetooth::constants::{
    DEFAULT_DISCOVERY_TIMEOUT_SECS, UUID_SERIAL_CHARACTERISTIC, UUID_SERIAL_SERVICE,
};
use crate::core::bluetooth::ledger::DiscoveryLedger;
use crate::core::bluetooth::observer::{ConnectionFailure, DiscoveryObserver};
use crate::core::bluetooth::registry::ManufacturerRegistry;
use crate::core::bluetooth::transport::{Advertisement, Transport, TransportEvent};
use crate::core::bluetooth::types::{
    CharacteristicInfo, PeripheralId, PeripheralRecord, ServiceInfo, WritableChannel,
};
use crate::error::{BridgeError, Result};

/// Runtime settings of the lifecycle
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleConfig {
    pub target_service: Uuid,
    pub target_characteristic: Uuid,
    /// Scan only for peripherals advertising `target_service`
    pub filter_scan_by_service: bool,
    /// Forget previously listed peripherals when a new scan starts
    pub clear_devices_on_scan: bool,
    /// Upper bound for service plus characteristic discovery; `None` waits forever
    pub discovery_timeout: Option<Duration>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            target_service: UUID_SERIAL_SERVICE,
            target_characteristic: UUID_SERIAL_CHARACTERISTIC,
            filter_scan_by_service: false,
            clear_devices_on_scan: true,
            discovery_timeout: Some(Duration::from_secs(DEFAULT_DISCOVERY_TIMEOUT_SECS)),
        }
    }
}

impl From<&BluetoothConfig> for LifecycleConfig {
    fn from(config: &BluetoothConfig) -> Self {
        Self {
            target_service: config.target_service_uuid,
            target_characteristic: config.target_characteristic_uuid,
            filter_scan_by_service: config.filter_scan_by_service,
            clear_devices_on_scan: config.clear_devices_on_scan,
            discovery_timeout: config.discovery_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// A connected peripheral whose channel is being resolved or is ready
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveConnection {
    pub handle: PeripheralId,
    pub record: PeripheralRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleState {
    Idle,
    Scanning,
    Connecting(PeripheralRecord),
    DiscoveringServices(ActiveConnection),
    DiscoveringCharacteristics(ActiveConnection),
    Ready(ActiveConnection, WritableChannel),
}

impl LifecycleState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Connecting(_) => "connecting",
            Self::DiscoveringServices(_) => "discovering services",
            Self::DiscoveringCharacteristics(_) => "discovering characteristics",
            Self::Ready(..) => "ready",
        }
    }
}

pub struct ConnectionLifecycle<T: Transport> {
    transport: T,
    registry: Arc<ManufacturerRegistry>,
    config: LifecycleConfig,
    ledger: DiscoveryLedger,
    state: LifecycleState,
    observer: Option<Weak<dyn DiscoveryObserver>>,
    /// Services whose characteristics have been requested but not reported yet
    outstanding_services: usize,
    discovery_deadline: Option<Instant>,
}

impl<T: Transport> ConnectionLifecycle<T> {
    pub fn new(transport: T, registry: Arc<ManufacturerRegistry>, config: LifecycleConfig) -> Self {
        Self {
            transport,
            registry,
            config,
            ledger: DiscoveryLedger::new(),
            state: LifecycleState::Idle,
            observer: None,
            outstanding_services: 0,
            discovery_deadline: None,
        }
    }

    /// Registers the observer, replacing any previous one. Only a weak reference is kept.
    pub fn set_observer<O: DiscoveryObserver + 'static>(&mut self, observer: &Arc<O>) {
        let observer: Weak<dyn DiscoveryObserver> = Arc::downgrade(observer) as Weak<O>;
        self.observer = Some(observer);
    }

    pub fn clear_observer(&mut self) {
        self.observer = None;
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn ledger(&self) -> &DiscoveryLedger {
        &self.ledger
    }

    /// Ranked copy of the currently listed peripherals
    pub fn snapshot(&self) -> Vec<PeripheralRecord> {
        self.ledger.snapshot()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Starts a scan session. Silently does nothing while the radio is off.
    pub fn start_scan(&mut self) -> Result<()> {
        match self.state {
            LifecycleState::Idle => {}
            LifecycleState::Scanning => {
                debug!("Scan already running.");
                return Ok(());
            }
            _ => return Err(self.invalid_state("start scan")),
        }

        if !self.transport.is_powered_on() {
            debug!("Bluetooth radio is not powered on, scan request ignored.");
            return Ok(());
        }

        if self.config.clear_devices_on_scan {
            self.ledger.clear();
            self.transport.forget_peripherals();
        }

        let services: &[Uuid] = if self.config.filter_scan_by_service {
            std::slice::from_ref(&self.config.target_service)
        } else {
            &[]
        };
        self.transport.start_scan(services)?;
        self.state = LifecycleState::Scanning;
        info!("Device scan started.");
        Ok(())
    }

    /// Stops the running scan. Listed peripherals are kept.
    pub fn stop_scan(&mut self) -> Result<()> {
        if self.state != LifecycleState::Scanning {
            debug!("No scan running, stop request ignored.");
            return Ok(());
        }
        self.state = LifecycleState::Idle;
        self.transport.stop_scan()?;
        info!("Device scan stopped.");
        Ok(())
    }

    /// Starts connecting to `record`. Only one connection attempt may be in flight.
    pub fn connect(&mut self, record: PeripheralRecord) -> Result<()> {
        match self.state {
            LifecycleState::Idle => {}
            LifecycleState::Scanning => {
                self.state = LifecycleState::Idle;
                if let Err(e) = self.transport.stop_scan() {
                    warn!("Failed to stop scan before connecting: {}", e);
                }
            }
            _ => return Err(self.invalid_state("connect")),
        }

        info!("Initiating connection to {} ({})...", record.display_name(), record.id);
        self.transport.connect(&record.id)?;
        self.state = LifecycleState::Connecting(record);
        Ok(())
    }

    /// Writes to the ready channel using its preferred write mode.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let LifecycleState::Ready(active, channel) = &self.state else {
            return Err(BridgeError::NotReady);
        };
        debug!("Writing {} bytes to {}", data.len(), channel.characteristic.uuid);
        self.transport
            .write(&active.handle, &channel.characteristic, data, channel.write_mode)?;
        Ok(())
    }

    /// Requests a fresh signal strength reading of the ready peripheral.
    pub fn read_rssi(&mut self) -> Result<()> {
        let LifecycleState::Ready(active, _) = &self.state else {
            return Err(BridgeError::NotReady);
        };
        self.transport.read_rssi(&active.handle)?;
        Ok(())
    }

    /// Applies one event from the radio stack.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::RadioPoweredOn => info!("Bluetooth radio powered on."),
            TransportEvent::RadioPoweredOff => self.reset_after_power_loss(),
            TransportEvent::AdvertisementSeen(adv) => self.on_advertisement(adv),
            TransportEvent::Connected(handle) => self.on_connected(handle),
            TransportEvent::ConnectFailed { id, reason } => self.on_connect_failed(id, reason),
            TransportEvent::ServicesDiscovered { id, services } => {
                self.on_services_discovered(id, services)
            }
            TransportEvent::CharacteristicsDiscovered {
                id,
                service,
                characteristics,
            } => self.on_characteristics_discovered(id, service, characteristics),
            TransportEvent::ValueWritten {
                id,
                characteristic,
                error,
            } => match error {
                Some(e) => warn!("Write to {} on {} failed: {}", characteristic, id, e),
                None => debug!("Write to {} on {} acknowledged", characteristic, id),
            },
            TransportEvent::RssiRead { id, rssi } => debug!("RSSI of {}: {} dBm", id, rssi),
        }
    }

    /// Gives up on a discovery that outlived the configured timeout.
    /// Returns true when the attempt was abandoned.
    pub fn poll_timeout(&mut self, now: Instant) -> bool {
        let expired = self.discovery_deadline.is_some_and(|deadline| now >= deadline);
        if !expired {
            return false;
        }

        let active = match &self.state {
            LifecycleState::DiscoveringServices(active)
            | LifecycleState::DiscoveringCharacteristics(active) => active.clone(),
            _ => {
                self.discovery_deadline = None;
                return false;
            }
        };
        warn!(
            "Target characteristic {} not found on {} in time, giving up.",
            self.config.target_characteristic, active.handle
        );
        self.abandon_connection(active, ConnectionFailure::DiscoveryTimedOut);
        true
    }

    fn on_advertisement(&mut self, adv: Advertisement) {
        if self.state != LifecycleState::Scanning {
            return;
        }

        let decoded = advertisement::decode(
            adv.manufacturer_data.as_deref().unwrap_or_default(),
            adv.local_name.as_deref(),
            &self.registry,
        );
        let record = PeripheralRecord::new(adv.id, adv.name, adv.rssi, decoded.display_name);

        if self.ledger.offer(record.clone()) {
            info!(
                "Found device - ID: {}, Name: {:?}, RSSI: {}, Manufacturer: {:?}",
                record.id, record.name, record.rssi, record.manufacturer_name
            );
            if let Some(observer) = self.observer() {
                observer.on_peripheral_discovered(&record);
            }
        }
    }

    fn on_connected(&mut self, handle: PeripheralId) {
        let record = match &self.state {
            LifecycleState::Connecting(pending) if pending.id == handle => pending.clone(),
            _ => {
                warn!("Ignoring unexpected connection of {} while {}", handle, self.state.name());
                return;
            }
        };

        info!("Connection successful, discovering services...");
        self.discovery_deadline = self.config.discovery_timeout.map(|t| Instant::now() + t);
        let active = ActiveConnection { handle, record };
        if let Err(e) = self.transport.discover_services(&active.handle) {
            error!("Failed to request services of {}: {}", active.handle, e);
            self.abandon_connection(active, ConnectionFailure::RequestFailed(e.to_string()));
            return;
        }
        self.state = LifecycleState::DiscoveringServices(active);
    }

    fn on_connect_failed(&mut self, id: PeripheralId, reason: String) {
        let record = match &self.state {
            LifecycleState::Connecting(pending) if pending.id == id => pending.clone(),
            _ => {
                debug!("Ignoring connection failure of {} while {}", id, self.state.name());
                return;
            }
        };
        warn!("Connection to {} failed: {}", id, reason);
        self.fail_attempt(&record, ConnectionFailure::Rejected(reason));
    }

    fn on_services_discovered(&mut self, id: PeripheralId, services: Vec<ServiceInfo>) {
        let active = match &self.state {
            LifecycleState::DiscoveringServices(active) if active.handle == id => active.clone(),
            _ => {
                debug!("Ignoring services of {} while {}", id, self.state.name());
                return;
            }
        };

        if services.is_empty() {
            warn!("{} exposes no services.", id);
        }
        for service in &services {
            debug!("Available service: {}", service.uuid);
            if let Err(e) = self.transport.discover_characteristics(&active.handle, service) {
                error!("Failed to request characteristics of {}: {}", service.uuid, e);
                self.abandon_connection(active, ConnectionFailure::RequestFailed(e.to_string()));
                return;
            }
        }
        self.outstanding_services = services.len();
        self.state = LifecycleState::DiscoveringCharacteristics(active);
    }

    fn on_characteristics_discovered(
        &mut self,
        id: PeripheralId,
        service: ServiceInfo,
        characteristics: Vec<CharacteristicInfo>,
    ) {
        let active = match &self.state {
            LifecycleState::DiscoveringCharacteristics(active) if active.handle == id => {
                active.clone()
            }
            _ => {
                debug!("Ignoring characteristics of {} while {}", id, self.state.name());
                return;
            }
        };
        self.outstanding_services = self.outstanding_services.saturating_sub(1);

        let target = self.config.target_characteristic;
        let Some(characteristic) = characteristics.into_iter().find(|c| c.uuid == target) else {
            if self.outstanding_services == 0 {
                warn!("Target characteristic {} not found on {}", target, id);
            }
            return;
        };

        info!("Found writable characteristic {} in service {}", characteristic.uuid, service.uuid);
        if let Err(e) = self.transport.subscribe(&active.handle, &characteristic) {
            error!("Failed to subscribe to {}: {}", characteristic.uuid, e);
            self.abandon_connection(active, ConnectionFailure::RequestFailed(e.to_string()));
            return;
        }

        let channel = WritableChannel::for_characteristic(characteristic);
        info!(
            "{} is ready, writing {:?}.",
            active.record.display_name(),
            channel.write_mode
        );
        let record = active.record.clone();
        self.discovery_deadline = None;
        self.outstanding_services = 0;
        self.state = LifecycleState::Ready(active, channel);

        if let Some(observer) = self.observer() {
            observer.on_peripheral_connected(&record);
        }
    }

    fn reset_after_power_loss(&mut self) {
        if self.state != LifecycleState::Idle {
            info!("Bluetooth radio powered off while {}, resetting.", self.state.name());
        }
        self.state = LifecycleState::Idle;
        self.outstanding_services = 0;
        self.discovery_deadline = None;
    }

    /// Drops an established connection and reports the failure.
    fn abandon_connection(&mut self, active: ActiveConnection, failure: ConnectionFailure) {
        if let Err(e) = self.transport.disconnect(&active.handle) {
            warn!("Failed to disconnect {}: {}", active.handle, e);
        }
        self.fail_attempt(&active.record, failure);
    }

    fn fail_attempt(&mut self, record: &PeripheralRecord, failure: ConnectionFailure) {
        self.state = LifecycleState::Idle;
        self.outstanding_services = 0;
        self.discovery_deadline = None;
        if let Some(observer) = self.observer() {
            observer.on_connection_failed(record, &failure);
        }
    }

    fn observer(&self) -> Option<Arc<dyn DiscoveryObserver>> {
        self.observer.as_ref().and_then(Weak::upgrade)
    }

    fn invalid_state(&self, operation: &'static str) -> BridgeError {
        BridgeError::InvalidState {
            operation,
            state: self.state.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::core::bluetooth::types::{CharacteristicFlags, WriteMode};
    use crate::error::TransportError;

    #[derive(Debug, Clone, PartialEq)]
    enum Request {
        StartScan(Vec<Uuid>),
        StopScan,
        ForgetPeripherals,
        Connect(PeripheralId),
        Disconnect(PeripheralId),
        DiscoverServices(PeripheralId),
        DiscoverCharacteristics(PeripheralId, Uuid),
        Subscribe(PeripheralId, Uuid),
        Write(PeripheralId, Vec<u8>, WriteMode),
        ReadRssi(PeripheralId),
    }

    #[derive(Default)]
    struct FakeRadio {
        powered_off: bool,
        fail_subscribe: bool,
        requests: Vec<Request>,
    }

    impl FakeRadio {
        fn count(&self, matches: impl Fn(&Request) -> bool) -> usize {
            self.requests.iter().filter(|r| matches(r)).count()
        }
    }

    impl Transport for FakeRadio {
        fn is_powered_on(&self) -> bool {
            !self.powered_off
        }
        fn start_scan(&mut self, services: &[Uuid]) -> std::result::Result<(), TransportError> {
            self.requests.push(Request::StartScan(services.to_vec()));
            Ok(())
        }
        fn stop_scan(&mut self) -> std::result::Result<(), TransportError> {
            self.requests.push(Request::StopScan);
            Ok(())
        }
        fn forget_peripherals(&mut self) {
            self.requests.push(Request::ForgetPeripherals);
        }
        fn connect(&mut self, p: &PeripheralId) -> std::result::Result<(), TransportError> {
            self.requests.push(Request::Connect(p.clone()));
            Ok(())
        }
        fn disconnect(&mut self, p: &PeripheralId) -> std::result::Result<(), TransportError> {
            self.requests.push(Request::Disconnect(p.clone()));
            Ok(())
        }
        fn discover_services(&mut self, p: &PeripheralId) -> std::result::Result<(), TransportError> {
            self.requests.push(Request::DiscoverServices(p.clone()));
            Ok(())
        }
        fn discover_characteristics(
            &mut self,
            p: &PeripheralId,
            service: &ServiceInfo,
        ) -> std::result::Result<(), TransportError> {
            self.requests
                .push(Request::DiscoverCharacteristics(p.clone(), service.uuid));
            Ok(())
        }
        fn subscribe(
            &mut self,
            p: &PeripheralId,
            c: &CharacteristicInfo,
        ) -> std::result::Result<(), TransportError> {
            if self.fail_subscribe {
                return Err(TransportError::Other("notify refused".into()));
            }
            self.requests.push(Request::Subscribe(p.clone(), c.uuid));
            Ok(())
        }
        fn write(
            &mut self,
            p: &PeripheralId,
            _c: &CharacteristicInfo,
            data: &[u8],
            mode: WriteMode,
        ) -> std::result::Result<(), TransportError> {
            self.requests.push(Request::Write(p.clone(), data.to_vec(), mode));
            Ok(())
        }
        fn read_rssi(&mut self, p: &PeripheralId) -> std::result::Result<(), TransportError> {
            self.requests.push(Request::ReadRssi(p.clone()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        discovered: Mutex<Vec<PeripheralRecord>>,
        connected: Mutex<Vec<PeripheralRecord>>,
        failed: Mutex<Vec<ConnectionFailure>>,
    }

    impl DiscoveryObserver for Recorder {
        fn on_peripheral_discovered(&self, record: &PeripheralRecord) {
            self.discovered.lock().unwrap().push(record.clone());
        }
        fn on_peripheral_connected(&self, record: &PeripheralRecord) {
            self.connected.lock().unwrap().push(record.clone());
        }
        fn on_connection_failed(&self, _record: &PeripheralRecord, failure: &ConnectionFailure) {
            self.failed.lock().unwrap().push(failure.clone());
        }
    }

    const OTHER_SERVICE: Uuid = Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);
    const OTHER_CHARACTERISTIC: Uuid = Uuid::from_u128(0x00002a29_0000_1000_8000_00805f9b34fb);

    fn lifecycle() -> (ConnectionLifecycle<FakeRadio>, Arc<Recorder>) {
        let registry: ManufacturerRegistry =
            [(0x000D, "Texas Instruments Inc.".to_string())].into_iter().collect();
        let mut lifecycle = ConnectionLifecycle::new(
            FakeRadio::default(),
            Arc::new(registry),
            LifecycleConfig::default(),
        );
        let recorder = Arc::new(Recorder::default());
        lifecycle.set_observer(&recorder);
        (lifecycle, recorder)
    }

    fn record(id: &str) -> PeripheralRecord {
        PeripheralRecord::new(PeripheralId::from(id), Some(id.to_string()), -50.0, "")
    }

    fn advert(id: &str, rssi: f32) -> TransportEvent {
        TransportEvent::AdvertisementSeen(Advertisement {
            id: PeripheralId::from(id),
            name: Some(id.to_string()),
            local_name: None,
            manufacturer_data: Some(vec![0x0D, 0x00, 0x01]),
            rssi,
        })
    }

    fn characteristic(uuid: Uuid, flags: CharacteristicFlags) -> CharacteristicInfo {
        CharacteristicInfo {
            uuid,
            service_uuid: UUID_SERIAL_SERVICE,
            flags,
        }
    }

    fn serial_characteristic() -> CharacteristicInfo {
        characteristic(
            UUID_SERIAL_CHARACTERISTIC,
            CharacteristicFlags {
                read: true,
                write_without_response: true,
                notify: true,
                ..Default::default()
            },
        )
    }

    /// Drives a lifecycle into discovering characteristics for "hm10" with two services.
    fn discovering_characteristics() -> (ConnectionLifecycle<FakeRadio>, Arc<Recorder>) {
        let (mut lc, recorder) = lifecycle();
        lc.start_scan().unwrap();
        lc.connect(record("hm10")).unwrap();
        lc.handle_event(TransportEvent::Connected("hm10".into()));
        lc.handle_event(TransportEvent::ServicesDiscovered {
            id: "hm10".into(),
            services: vec![
                ServiceInfo { uuid: OTHER_SERVICE },
                ServiceInfo { uuid: UUID_SERIAL_SERVICE },
            ],
        });
        (lc, recorder)
    }

    #[test]
    fn scan_requires_powered_radio() {
        let (mut lc, _) = lifecycle();
        lc.transport_mut().powered_off = true;

        lc.start_scan().unwrap();
        assert_eq!(lc.state(), &LifecycleState::Idle);
        assert!(lc.transport().requests.is_empty());
    }

    #[test]
    fn scan_is_unfiltered_unless_configured() {
        let (mut lc, _) = lifecycle();
        lc.start_scan().unwrap();
        assert_eq!(lc.state(), &LifecycleState::Scanning);
        assert_eq!(
            lc.transport().requests,
            vec![Request::ForgetPeripherals, Request::StartScan(vec![])]
        );

        let mut filtered = ConnectionLifecycle::new(
            FakeRadio::default(),
            Arc::new(ManufacturerRegistry::empty()),
            LifecycleConfig {
                filter_scan_by_service: true,
                ..Default::default()
            },
        );
        filtered.start_scan().unwrap();
        assert_eq!(
            filtered.transport().requests,
            vec![Request::ForgetPeripherals, Request::StartScan(vec![UUID_SERIAL_SERVICE])]
        );
    }

    #[test]
    fn advertisements_are_listed_once_and_ranked() {
        let (mut lc, recorder) = lifecycle();
        lc.start_scan().unwrap();

        lc.handle_event(advert("far", -90.0));
        lc.handle_event(advert("near", -40.0));
        lc.handle_event(advert("mid", -60.0));
        lc.handle_event(advert("near", -30.0));
        lc.handle_event(advert("noise", -100.0));

        let ranked: Vec<f32> = lc.snapshot().iter().map(|r| r.rssi).collect();
        assert_eq!(ranked, vec![-40.0, -60.0, -90.0]);
        assert_eq!(recorder.discovered.lock().unwrap().len(), 3);
        assert_eq!(lc.snapshot()[0].manufacturer_name, "Texas Instruments Inc.");
    }

    #[test]
    fn stop_scan_halts_processing_but_keeps_devices() {
        let (mut lc, recorder) = lifecycle();
        lc.start_scan().unwrap();
        lc.handle_event(advert("a", -50.0));
        lc.stop_scan().unwrap();
        lc.handle_event(advert("b", -50.0));

        assert_eq!(lc.state(), &LifecycleState::Idle);
        assert_eq!(lc.snapshot().len(), 1);
        assert_eq!(recorder.discovered.lock().unwrap().len(), 1);
    }

    #[test]
    fn new_scan_session_starts_with_empty_ledger() {
        let (mut lc, _) = lifecycle();
        lc.start_scan().unwrap();
        lc.handle_event(advert("a", -50.0));
        lc.stop_scan().unwrap();
        lc.start_scan().unwrap();
        assert!(lc.snapshot().is_empty());
        assert_eq!(lc.transport().count(|r| *r == Request::ForgetPeripherals), 2);
    }

    #[test]
    fn ledger_survives_rescan_when_clearing_disabled() {
        let mut lc = ConnectionLifecycle::new(
            FakeRadio::default(),
            Arc::new(ManufacturerRegistry::empty()),
            LifecycleConfig {
                clear_devices_on_scan: false,
                ..Default::default()
            },
        );
        lc.start_scan().unwrap();
        lc.handle_event(advert("a", -50.0));
        lc.stop_scan().unwrap();
        lc.start_scan().unwrap();
        assert_eq!(lc.snapshot().len(), 1);
        assert_eq!(lc.transport().count(|r| *r == Request::ForgetPeripherals), 0);
    }

    #[test]
    fn second_connect_is_rejected_while_connecting() {
        let (mut lc, _) = lifecycle();
        lc.start_scan().unwrap();
        lc.connect(record("a")).unwrap();
        assert_eq!(lc.state(), &LifecycleState::Connecting(record("a")));
        assert_eq!(
            &lc.transport().requests[2..],
            &[Request::StopScan, Request::Connect("a".into())]
        );

        let err = lc.connect(record("b")).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidState { operation: "connect", .. }));
        assert!(matches!(lc.state(), LifecycleState::Connecting(r) if r.id.as_str() == "a"));
        assert_eq!(lc.transport().count(|r| matches!(r, Request::Connect(_))), 1);
    }

    #[test]
    fn scan_is_rejected_during_connection() {
        let (mut lc, _) = lifecycle();
        lc.connect(record("a")).unwrap();
        assert!(matches!(lc.start_scan(), Err(BridgeError::InvalidState { .. })));
    }

    #[test]
    fn connected_requests_services_exactly_once() {
        let (mut lc, _) = lifecycle();
        lc.start_scan().unwrap();
        lc.connect(record("a")).unwrap();
        lc.handle_event(TransportEvent::Connected("a".into()));

        assert!(matches!(
            lc.state(),
            LifecycleState::DiscoveringServices(active) if active.handle.as_str() == "a"
        ));
        assert_eq!(
            lc.transport().count(|r| matches!(r, Request::DiscoverServices(_))),
            1
        );
    }

    #[test]
    fn connection_of_other_peripheral_is_ignored() {
        let (mut lc, _) = lifecycle();
        lc.connect(record("a")).unwrap();
        lc.handle_event(TransportEvent::Connected("b".into()));
        assert!(matches!(lc.state(), LifecycleState::Connecting(_)));
    }

    #[test]
    fn connect_failure_returns_to_idle_and_notifies() {
        let (mut lc, recorder) = lifecycle();
        lc.connect(record("a")).unwrap();
        lc.handle_event(TransportEvent::ConnectFailed {
            id: "a".into(),
            reason: "timeout".into(),
        });

        assert_eq!(lc.state(), &LifecycleState::Idle);
        assert_eq!(
            *recorder.failed.lock().unwrap(),
            vec![ConnectionFailure::Rejected("timeout".into())]
        );
        // a fresh attempt is allowed, nothing is retried automatically
        assert_eq!(lc.transport().count(|r| matches!(r, Request::Connect(_))), 1);
        lc.connect(record("a")).unwrap();
    }

    #[test]
    fn every_service_gets_a_characteristic_request() {
        let (lc, _) = discovering_characteristics();
        assert!(matches!(lc.state(), LifecycleState::DiscoveringCharacteristics(_)));
        assert_eq!(
            lc.transport().count(|r| matches!(r, Request::DiscoverCharacteristics(..))),
            2
        );
    }

    #[test]
    fn target_characteristic_makes_peripheral_ready() {
        let (mut lc, recorder) = discovering_characteristics();
        lc.handle_event(TransportEvent::CharacteristicsDiscovered {
            id: "hm10".into(),
            service: ServiceInfo { uuid: UUID_SERIAL_SERVICE },
            characteristics: vec![serial_characteristic()],
        });

        let LifecycleState::Ready(active, channel) = lc.state() else {
            panic!("expected ready, got {:?}", lc.state());
        };
        assert_eq!(active.handle.as_str(), "hm10");
        assert_eq!(channel.write_mode, WriteMode::WithoutResponse);
        assert_eq!(
            lc.transport().count(|r| matches!(r, Request::Subscribe(_, u) if *u == UUID_SERIAL_CHARACTERISTIC)),
            1
        );
        assert_eq!(recorder.connected.lock().unwrap().len(), 1);

        // a late duplicate does not notify twice
        lc.handle_event(TransportEvent::CharacteristicsDiscovered {
            id: "hm10".into(),
            service: ServiceInfo { uuid: UUID_SERIAL_SERVICE },
            characteristics: vec![serial_characteristic()],
        });
        assert_eq!(recorder.connected.lock().unwrap().len(), 1);
    }

    #[test]
    fn missing_target_characteristic_leaves_state_unchanged() {
        let (mut lc, recorder) = discovering_characteristics();
        let before = lc.state().clone();
        lc.handle_event(TransportEvent::CharacteristicsDiscovered {
            id: "hm10".into(),
            service: ServiceInfo { uuid: OTHER_SERVICE },
            characteristics: vec![characteristic(OTHER_CHARACTERISTIC, CharacteristicFlags::default())],
        });

        assert_eq!(lc.state(), &before);
        assert!(recorder.connected.lock().unwrap().is_empty());
        assert!(recorder.failed.lock().unwrap().is_empty());
    }

    #[test]
    fn acknowledged_write_is_preferred_when_supported() {
        let (mut lc, _) = discovering_characteristics();
        let flags = CharacteristicFlags {
            write: true,
            write_without_response: true,
            ..Default::default()
        };
        lc.handle_event(TransportEvent::CharacteristicsDiscovered {
            id: "hm10".into(),
            service: ServiceInfo { uuid: UUID_SERIAL_SERVICE },
            characteristics: vec![characteristic(UUID_SERIAL_CHARACTERISTIC, flags)],
        });

        lc.write(b"AT").unwrap();
        assert!(lc.transport().requests.contains(&Request::Write(
            "hm10".into(),
            b"AT".to_vec(),
            WriteMode::WithResponse
        )));
    }

    #[test]
    fn write_requires_ready_channel() {
        let (mut lc, _) = lifecycle();
        assert!(matches!(lc.write(b"AT"), Err(BridgeError::NotReady)));
        assert!(matches!(lc.read_rssi(), Err(BridgeError::NotReady)));
    }

    #[test]
    fn subscription_failure_abandons_connection() {
        let (mut lc, recorder) = discovering_characteristics();
        lc.transport_mut().fail_subscribe = true;
        lc.handle_event(TransportEvent::CharacteristicsDiscovered {
            id: "hm10".into(),
            service: ServiceInfo { uuid: UUID_SERIAL_SERVICE },
            characteristics: vec![serial_characteristic()],
        });

        assert_eq!(lc.state(), &LifecycleState::Idle);
        assert!(lc.transport().requests.contains(&Request::Disconnect("hm10".into())));
        assert!(matches!(
            recorder.failed.lock().unwrap().as_slice(),
            [ConnectionFailure::RequestFailed(_)]
        ));
    }

    #[test]
    fn discovery_timeout_reports_failure() {
        let (mut lc, recorder) = discovering_characteristics();
        assert!(!lc.poll_timeout(Instant::now()));

        let later = Instant::now() + Duration::from_secs(DEFAULT_DISCOVERY_TIMEOUT_SECS + 1);
        assert!(lc.poll_timeout(later));
        assert_eq!(lc.state(), &LifecycleState::Idle);
        assert!(lc.transport().requests.contains(&Request::Disconnect("hm10".into())));
        assert_eq!(
            *recorder.failed.lock().unwrap(),
            vec![ConnectionFailure::DiscoveryTimedOut]
        );
        assert!(!lc.poll_timeout(later));
    }

    #[test]
    fn discovery_waits_forever_without_timeout() {
        let mut lc = ConnectionLifecycle::new(
            FakeRadio::default(),
            Arc::new(ManufacturerRegistry::empty()),
            LifecycleConfig {
                discovery_timeout: None,
                ..Default::default()
            },
        );
        lc.connect(record("a")).unwrap();
        lc.handle_event(TransportEvent::Connected("a".into()));
        assert!(!lc.poll_timeout(Instant::now() + Duration::from_secs(3600)));
        assert!(matches!(lc.state(), LifecycleState::DiscoveringServices(_)));
    }

    #[test]
    fn power_loss_resets_from_any_state() {
        let (mut lc, recorder) = discovering_characteristics();
        lc.handle_event(TransportEvent::RadioPoweredOff);
        assert_eq!(lc.state(), &LifecycleState::Idle);
        assert!(recorder.failed.lock().unwrap().is_empty());

        let (mut lc, _) = lifecycle();
        lc.start_scan().unwrap();
        lc.handle_event(TransportEvent::RadioPoweredOff);
        assert_eq!(lc.state(), &LifecycleState::Idle);

        let (mut lc, recorder) = lifecycle();
        lc.connect(record("a")).unwrap();
        lc.handle_event(TransportEvent::RadioPoweredOff);
        assert_eq!(lc.state(), &LifecycleState::Idle);
        // a late connection report for the dropped attempt is ignored
        lc.handle_event(TransportEvent::Connected("a".into()));
        assert_eq!(lc.state(), &LifecycleState::Idle);
        assert!(recorder.failed.lock().unwrap().is_empty());

        let (mut lc, recorder) = discovering_characteristics();
        lc.handle_event(TransportEvent::CharacteristicsDiscovered {
            id: "hm10".into(),
            service: ServiceInfo { uuid: UUID_SERIAL_SERVICE },
            characteristics: vec![serial_characteristic()],
        });
        assert!(matches!(lc.state(), LifecycleState::Ready(..)));
        lc.handle_event(TransportEvent::RadioPoweredOff);
        assert_eq!(lc.state(), &LifecycleState::Idle);
        assert!(matches!(lc.write(b"AT"), Err(BridgeError::NotReady)));
        assert!(matches!(lc.read_rssi(), Err(BridgeError::NotReady)));
        assert!(recorder.failed.lock().unwrap().is_empty());
        assert!(!lc.poll_timeout(Instant::now() + Duration::from_secs(3600)));
    }

    #[test]
    fn replaced_or_dropped_observer_receives_nothing() {
        let (mut lc, first) = lifecycle();
        let second = Arc::new(Recorder::default());
        lc.set_observer(&second);
        lc.start_scan().unwrap();
        lc.handle_event(advert("a", -50.0));
        assert!(first.discovered.lock().unwrap().is_empty());
        assert_eq!(second.discovered.lock().unwrap().len(), 1);

        drop(second);
        lc.handle_event(advert("b", -50.0));
        assert_eq!(lc.snapshot().len(), 2);
    }
}
