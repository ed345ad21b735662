//! Core functionality of the serial bridge

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::{BluestTransport, BluetoothManager, PeripheralRecord};
