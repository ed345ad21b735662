//! Application state management
//! This module wires the configuration, manufacturer table and radio stack together.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use log::info;

use crate::config::AppConfig;
use crate::core::bluetooth::{
    BluestTransport, BluetoothManager, LifecycleConfig, ManufacturerRegistry,
};

/// Global application state
pub struct AppState {
    pub config: AppConfig,
    /// The Bluetooth manager instance
    pub bluetooth_manager: BluetoothManager<BluestTransport>,
}

impl AppState {
    /// Loads the configuration from `config_dir` and opens the Bluetooth adapter.
    pub async fn new(config_dir: &Path) -> Result<Self> {
        let config = AppConfig::load(config_dir).await?;
        Self::with_config(config).await
    }

    pub async fn with_config(config: AppConfig) -> Result<Self> {
        let bluetooth = &config.bluetooth;
        let registry = Arc::new(
            ManufacturerRegistry::load_or_bundled(bluetooth.manufacturer_table_path.as_deref()).await,
        );
        info!("{} manufacturer names available.", registry.len());

        info!("Initializing BluetoothManager...");
        let (transport, events) = BluestTransport::new(bluetooth.target_service_uuid).await?;
        let bluetooth_manager =
            BluetoothManager::new(transport, events, registry, LifecycleConfig::from(bluetooth));

        Ok(Self {
            config,
            bluetooth_manager,
        })
    }
}
