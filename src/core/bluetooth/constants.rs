//! Constants used throughout the application
//! This module contains all the constant values used in the application,
//! such as UUIDs, signal bounds and timeouts.

use uuid::Uuid;

/// Serial-bridge service UUID (0xFFE0), present on nearly every HM-10 style module
pub const UUID_SERIAL_SERVICE: Uuid = Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb);

/// Serial-bridge data characteristic UUID (0xFFE1), the writable channel of the 0xFFE0 service
pub const UUID_SERIAL_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);

/// Signal strength must be strictly above this value (dBm) to be listed
pub const RSSI_FLOOR_DBM: f32 = -100.0;

/// Signal strength must be at most this value (dBm) to be listed
pub const RSSI_CEILING_DBM: f32 = 0.0;

/// Default time allowed for service and characteristic discovery, in seconds
pub const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 15;

/// Interval at which the event pump checks the discovery deadline, in milliseconds
pub const DISCOVERY_DEADLINE_POLL_MS: u64 = 500;

/// Scan duration in seconds
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 5;

/// Upper bound for the adapter to report the radio as available at startup, in seconds
pub const ADAPTER_READY_TIMEOUT_SECS: u64 = 3;
