//! BLE serial bridge library
//! Discovers BLE serial-bridge peripherals, ranks them by signal strength and drives a
//! connection until their writable channel is ready.

// Module declarations
pub mod cli;
pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod state;
pub mod utils;

pub use error::{BridgeError, Result};
