//! Bluetooth functionality of the serial bridge
//! This module handles scanning, ranking discovered peripherals, and driving a
//! connection until the serial characteristic is ready for writing.

pub mod advertisement;
mod connection;
pub mod constants;
pub mod ledger;
pub mod lifecycle;
mod manager;
mod notification;
pub mod observer;
pub mod registry;
mod scanner;
pub mod transport;
pub mod types;

// Re-export types that should be publicly accessible
pub use connection::BluestTransport;
pub use constants::*;
pub use ledger::DiscoveryLedger;
pub use lifecycle::{ActiveConnection, ConnectionLifecycle, LifecycleConfig, LifecycleState};
pub use manager::BluetoothManager;
pub use observer::{ChannelObserver, ConnectionFailure, DiscoveryObserver, LifecycleEvent, NoopObserver};
pub use registry::ManufacturerRegistry;
pub use transport::{Advertisement, Transport, TransportEvent};
pub use types::{
    CharacteristicFlags, CharacteristicInfo, PeripheralId, PeripheralRecord, ServiceInfo,
    SignalQuality, WritableChannel, WriteMode,
};
