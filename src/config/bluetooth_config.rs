use std::path::{Path, PathBuf};

use crate::core::bluetooth::constants::{
    DEFAULT_DISCOVERY_TIMEOUT_SECS, UUID_SERIAL_CHARACTERISTIC, UUID_SERIAL_SERVICE,
};
use crate::utils::ensure_directory_exists;
use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;
use uuid::Uuid;

const CONFIG_FILE_NAME: &str = "bluetooth_config.json";

/// Bluetooth discovery and connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Service of the serial-bridge module
    pub target_service_uuid: Uuid,
    /// Characteristic used as the writable channel
    pub target_characteristic_uuid: Uuid,
    /// Only scan for peripherals advertising the target service.
    /// Many modules do not advertise it, so this is off by default.
    pub filter_scan_by_service: bool,
    /// Forget the device list whenever a new scan starts
    pub clear_devices_on_scan: bool,
    /// Seconds allowed for service and characteristic discovery; `null` waits forever
    pub discovery_timeout_secs: Option<u64>,
    /// Company identifier table (JSON or YAML) replacing the bundled one; `null` uses the bundled table
    pub manufacturer_table_path: Option<PathBuf>,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        BluetoothConfig {
            target_service_uuid: UUID_SERIAL_SERVICE,
            target_characteristic_uuid: UUID_SERIAL_CHARACTERISTIC,
            filter_scan_by_service: false,
            clear_devices_on_scan: true,
            discovery_timeout_secs: Some(DEFAULT_DISCOVERY_TIMEOUT_SECS),
            manufacturer_table_path: None,
        }
    }
}

impl BluetoothConfig {
    /// Loads the config from `config_dir`, falling back to defaults when no file exists.
    pub async fn load_config(config_dir: &Path) -> Result<Self> {
        let file_path = config_dir.join(CONFIG_FILE_NAME);
        let file_path_str = file_path.to_string_lossy().into_owned();

        if !file_path.exists() {
            warn!(
                "Bluetooth config file not found at {:?}, using default.",
                file_path_str
            );
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Bluetooth config loaded from {:?}", file_path_str);
        Ok(config)
    }

    /// Saves the current config into `config_dir`.
    pub async fn save_config(&self, config_dir: &Path) -> Result<()> {
        ensure_directory_exists(config_dir).await?;

        let file_path = config_dir.join(CONFIG_FILE_NAME);
        let file_path_str = file_path.to_string_lossy().into_owned();

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize bluetooth config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(file_path.to_path_buf(), config_json).await?;
        info!("Bluetooth config saved to {:?}", file_path_str);
        Ok(())
    }
}
