//! Error types for the discovery and connection core

use thiserror::Error;

use crate::core::bluetooth::types::PeripheralId;

/// Errors returned synchronously by lifecycle operations
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("No writable channel: peripheral is not ready")]
    NotReady,

    #[error("Device not found with ID: {0}")]
    DeviceNotFound(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failures raised by the radio stack when a request cannot be issued
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Unknown peripheral: {0}")]
    UnknownPeripheral(PeripheralId),

    #[error("Unknown service {service} on peripheral {peripheral}")]
    UnknownService { peripheral: PeripheralId, service: String },

    #[error("Unknown characteristic {characteristic} on peripheral {peripheral}")]
    UnknownCharacteristic {
        peripheral: PeripheralId,
        characteristic: String,
    },

    #[error("Bluetooth adapter not available")]
    AdapterNotAvailable,

    #[error("Transport error: {0}")]
    Other(String),
}

/// Errors raised while loading the manufacturer table
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to read manufacturer table: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse manufacturer table: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to parse manufacturer table: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Invalid company identifier: {0}")]
    InvalidIdentifier(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
