//! Defines shared data structures for the Bluetooth module.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

use crate::core::bluetooth::constants::{RSSI_CEILING_DBM, RSSI_FLOOR_DBM};

static MAC_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").expect("MAC address pattern is valid")
});

/// Platform-specific unique identifier of a peripheral.
/// Stable for as long as the peripheral stays visible to the radio stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PeripheralId(String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Represents a discovered Bluetooth peripheral
#[derive(Debug, Clone, Serialize)]
pub struct PeripheralRecord {
    /// Platform-specific unique identifier for the device
    pub id: PeripheralId,
    /// The name of the device, if available
    pub name: Option<String>,
    /// The signal strength (RSSI) of the device in dBm
    pub rssi: f32,
    /// Advertised local name or company name resolved from manufacturer data; empty when unknown
    pub manufacturer_name: String,
}

impl PeripheralRecord {
    /// Creates a new PeripheralRecord instance
    pub fn new(
        id: PeripheralId,
        name: Option<String>,
        rssi: f32,
        manufacturer_name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name,
            rssi,
            manufacturer_name: manufacturer_name.into(),
        }
    }

    /// Returns true if the signal strength lies in the listable range (-100, 0] dBm
    pub fn has_listable_rssi(&self) -> bool {
        self.rssi > RSSI_FLOOR_DBM && self.rssi <= RSSI_CEILING_DBM
    }

    pub fn signal_quality(&self) -> SignalQuality {
        SignalQuality::from_rssi(self.rssi)
    }

    /// MAC address embedded in the platform identifier, if any (not available on macOS)
    pub fn address(&self) -> Option<String> {
        MAC_ADDRESS
            .find_iter(self.id.as_str())
            .last()
            .map(|m| m.as_str().to_uppercase())
    }

    /// Name to show in listings
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => "Unknown",
        }
    }
}

impl PartialEq for PeripheralRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeripheralRecord {}

impl Hash for PeripheralRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Coarse reception bucket for a signal strength reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SignalQuality {
    Excellent,
    Good,
    Fair,
    Poor,
    Unusable,
}

impl SignalQuality {
    pub fn from_rssi(rssi: f32) -> Self {
        match rssi {
            r if (-50.0..0.0).contains(&r) => Self::Excellent,
            r if (-70.0..-50.0).contains(&r) => Self::Good,
            r if (-80.0..-70.0).contains(&r) => Self::Fair,
            r if (-90.0..-80.0).contains(&r) => Self::Poor,
            _ => Self::Unusable,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
            Self::Unusable => "unusable",
        }
    }
}

/// How writes to the channel are acknowledged by the peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

/// A GATT service exposed by a connected peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
}

/// Capabilities advertised by a characteristic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicFlags {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

/// A characteristic discovered on one of the services of a connected peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
    pub flags: CharacteristicFlags,
}

impl CharacteristicInfo {
    /// Acknowledged writes are preferred whenever the characteristic supports them.
    pub fn preferred_write_mode(&self) -> WriteMode {
        if self.flags.write {
            WriteMode::WithResponse
        } else {
            WriteMode::WithoutResponse
        }
    }
}

/// The characteristic selected for data exchange with a ready peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritableChannel {
    pub characteristic: CharacteristicInfo,
    pub write_mode: WriteMode,
}

impl WritableChannel {
    pub fn for_characteristic(characteristic: CharacteristicInfo) -> Self {
        let write_mode = characteristic.preferred_write_mode();
        Self {
            characteristic,
            write_mode,
        }
    }
}
