//! Command line interface definition

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::LevelFilter;

use crate::core::bluetooth::DEFAULT_SCAN_DURATION_SECS;

/// BLE serial bridge
#[derive(Debug, Parser)]
#[command(name = "ble-serial-bridge")]
#[command(about = "Find BLE serial-bridge modules and connect to their writable channel")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding bluetooth_config.json
    #[arg(long, default_value = ".")]
    pub config_dir: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit log records as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan and print the devices ranked by signal strength
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value_t = DEFAULT_SCAN_DURATION_SECS)]
        duration: u64,
    },
    /// Scan, connect to a device and optionally send text to it
    Connect {
        /// Device ID to connect to; defaults to the strongest device found
        #[arg(long)]
        device: Option<String>,

        /// Scan duration in seconds
        #[arg(short, long, default_value_t = DEFAULT_SCAN_DURATION_SECS)]
        duration: u64,

        /// Text written to the channel once it is ready
        #[arg(long)]
        send: Option<String>,

        /// Seconds to wait for the channel to become ready
        #[arg(long, default_value_t = 20)]
        wait: u64,
    },
}

impl Cli {
    pub fn log_level(&self) -> LevelFilter {
        if self.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }
}
