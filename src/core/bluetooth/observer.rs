//! Observer contract through which the lifecycle reports discovery and connection events.

use std::fmt;

use log::warn;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::bluetooth::types::PeripheralRecord;

/// Why a connection attempt ended without reaching the ready state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConnectionFailure {
    /// The radio stack reported that the connection could not be established
    Rejected(String),
    /// A follow-up request to the radio stack could not be issued
    RequestFailed(String),
    /// Service or characteristic discovery did not find the target channel in time
    DiscoveryTimedOut,
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(reason) => write!(f, "connection rejected: {}", reason),
            Self::RequestFailed(reason) => write!(f, "request failed: {}", reason),
            Self::DiscoveryTimedOut => f.write_str("target characteristic not found in time"),
        }
    }
}

/// Receives lifecycle notifications. Every method defaults to a no-op so implementers
/// only override what they need.
pub trait DiscoveryObserver: Send + Sync {
    /// A peripheral was listed for the first time during the current scan
    fn on_peripheral_discovered(&self, _record: &PeripheralRecord) {}

    /// The writable channel of the peripheral is subscribed and ready
    fn on_peripheral_connected(&self, _record: &PeripheralRecord) {}

    fn on_connection_failed(&self, _record: &PeripheralRecord, _failure: &ConnectionFailure) {}
}

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl DiscoveryObserver for NoopObserver {}

/// Lifecycle notification as delivered over a channel
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum LifecycleEvent {
    DeviceFound(PeripheralRecord),
    DeviceReady(PeripheralRecord),
    ConnectionFailed {
        device: PeripheralRecord,
        failure: ConnectionFailure,
    },
}

/// Forwards observer callbacks to a tokio channel, e.g. for a UI task.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: UnboundedSender<LifecycleEvent>,
}

impl ChannelObserver {
    pub fn new(sender: UnboundedSender<LifecycleEvent>) -> Self {
        Self { sender }
    }

    fn emit(&self, event: LifecycleEvent) {
        if let Err(e) = self.sender.send(event) {
            warn!("Failed to emit lifecycle event, receiver dropped: {:?}", e.0);
        }
    }
}

impl DiscoveryObserver for ChannelObserver {
    fn on_peripheral_discovered(&self, record: &PeripheralRecord) {
        self.emit(LifecycleEvent::DeviceFound(record.clone()));
    }

    fn on_peripheral_connected(&self, record: &PeripheralRecord) {
        self.emit(LifecycleEvent::DeviceReady(record.clone()));
    }

    fn on_connection_failed(&self, record: &PeripheralRecord, failure: &ConnectionFailure) {
        self.emit(LifecycleEvent::ConnectionFailed {
            device: record.clone(),
            failure: failure.clone(),
        });
    }
}
