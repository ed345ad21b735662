//! Notification handling for the serial channel
//! This module keeps the notification subscription of the writable channel alive.

use bluest::Characteristic;
use futures_util::StreamExt;
use log::{debug, error, info};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::types::PeripheralId;

/// Notification handler for the subscribed characteristic
#[derive(Default)]
pub struct NotificationHandler {
    cancel_token: Option<CancellationToken>,
}

impl NotificationHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to notifications of `notify_char`, replacing any previous subscription.
    pub fn setup_notifications(
        &mut self,
        runtime: &Handle,
        peripheral: PeripheralId,
        notify_char: Characteristic,
    ) {
        self.stop_notifications();
        info!("Subscribing to notifications...");

        let cancel_token = CancellationToken::new();
        self.cancel_token = Some(cancel_token.clone());

        runtime.spawn(async move {
            tokio::select! {
                _ = Self::process_notifications(&peripheral, &notify_char) => {}
                _ = cancel_token.cancelled() => info!("Notification subscription of {} cancelled", peripheral),
            }
        });
    }

    pub fn stop_notifications(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
    }

    async fn process_notifications(peripheral: &PeripheralId, notify_char: &Characteristic) {
        info!("Listening for notifications of {}...", notify_char.uuid());

        match notify_char.notify().await {
            Ok(mut notification_stream) => {
                while let Some(result) = notification_stream.next().await {
                    match result {
                        Ok(value) => {
                            debug!("Received from {}: {}", peripheral, hex::encode_upper(&value));
                        }
                        Err(e) => {
                            error!("Error in notification stream: {}", e);
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                error!("Failed to subscribe to notifications: {}", e);
            }
        }

        info!("Notification stream ended");
    }
}

impl Drop for NotificationHandler {
    fn drop(&mut self) {
        self.stop_notifications();
    }
}
