//! Boundary to the platform radio stack.
//!
//! Requests issued through [`Transport`] return as soon as they are queued; their outcome
//! comes back later as a [`TransportEvent`] delivered, in order, on a single event channel.

use uuid::Uuid;

use crate::core::bluetooth::types::{
    CharacteristicInfo, PeripheralId, ServiceInfo, WriteMode,
};
use crate::error::TransportError;

/// A single advertisement as reported by the radio stack
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    pub id: PeripheralId,
    /// Name of the device as known to the platform
    pub name: Option<String>,
    /// Local name field of the advertisement packet
    pub local_name: Option<String>,
    /// Raw manufacturer-specific data, company identifier first
    pub manufacturer_data: Option<Vec<u8>>,
    pub rssi: f32,
}

/// Events pushed by the radio stack
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    RadioPoweredOn,
    RadioPoweredOff,
    AdvertisementSeen(Advertisement),
    Connected(PeripheralId),
    ConnectFailed {
        id: PeripheralId,
        reason: String,
    },
    ServicesDiscovered {
        id: PeripheralId,
        services: Vec<ServiceInfo>,
    },
    CharacteristicsDiscovered {
        id: PeripheralId,
        service: ServiceInfo,
        characteristics: Vec<CharacteristicInfo>,
    },
    ValueWritten {
        id: PeripheralId,
        characteristic: Uuid,
        error: Option<String>,
    },
    RssiRead {
        id: PeripheralId,
        rssi: i16,
    },
}

/// Requests the lifecycle can issue to the radio stack
pub trait Transport {
    fn is_powered_on(&self) -> bool;

    /// Starts scanning; an empty service list scans for every peripheral.
    fn start_scan(&mut self, services: &[Uuid]) -> Result<(), TransportError>;

    fn stop_scan(&mut self) -> Result<(), TransportError>;

    /// Drops the platform handles of peripherals seen in earlier scans.
    fn forget_peripherals(&mut self) {}

    fn connect(&mut self, peripheral: &PeripheralId) -> Result<(), TransportError>;

    fn disconnect(&mut self, peripheral: &PeripheralId) -> Result<(), TransportError>;

    fn discover_services(&mut self, peripheral: &PeripheralId) -> Result<(), TransportError>;

    fn discover_characteristics(
        &mut self,
        peripheral: &PeripheralId,
        service: &ServiceInfo,
    ) -> Result<(), TransportError>;

    fn subscribe(
        &mut self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicInfo,
    ) -> Result<(), TransportError>;

    fn write(
        &mut self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicInfo,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError>;

    fn read_rssi(&mut self, peripheral: &PeripheralId) -> Result<(), TransportError>;
}
