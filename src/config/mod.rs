pub mod bluetooth_config;

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::bluetooth_config::BluetoothConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub bluetooth: BluetoothConfig,
}

impl AppConfig {
    /// Loads every config file found in `config_dir`.
    pub async fn load(config_dir: &Path) -> Result<Self> {
        Ok(AppConfig {
            bluetooth: BluetoothConfig::load_config(config_dir).await?,
        })
    }
}
