//! Notification subscriptions
//!
//! Owns the set of characteristics currently pushing value-changed events.
//! Entries are keyed by GATT attribute handle, so a characteristic seen again
//! through a fresh enumeration still counts as subscribed. Each subscription
//! gets its own channel and forwarder task; the forwarder drops the priming
//! frame and hands every later frame to the decoder.

use crate::domain::errors::{CommunicationStatus, SubscribeError};
use crate::domain::models::{
    send_log, AppEvent, CharacteristicHandle, CharacteristicRecord, EventSender, MessageSeverity,
    ValueSample,
};
use crate::domain::resolver;
use crate::domain::values::ValueDecoder;
use crate::infrastructure::bluetooth::protocol::format_uuid;
use crate::infrastructure::bluetooth::transport::{
    DescriptorValue, GattTransport, Notification, NotificationToken,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

struct Subscription {
    name: String,
    handle: CharacteristicHandle,
    token: NotificationToken,
    forwarder: JoinHandle<()>,
}

pub struct SubscriptionManager {
    subscriptions: HashMap<u16, Subscription>,
    decoder: Arc<dyn ValueDecoder>,
    event_sender: EventSender,
}

impl SubscriptionManager {
    pub fn new(decoder: Arc<dyn ValueDecoder>, event_sender: EventSender) -> Self {
        Self {
            subscriptions: HashMap::new(),
            decoder,
            event_sender,
        }
    }

    /// Subscribe to the characteristic `token` resolves to within `candidates`
    pub async fn subscribe(
        &mut self,
        transport: &dyn GattTransport,
        candidates: &[CharacteristicRecord],
        token: &str,
    ) -> Result<(), SubscribeError> {
        let characteristic = resolver::find(candidates, token)
            .ok_or_else(|| SubscribeError::InvalidCharacteristic(token.to_string()))?;

        if self.subscriptions.contains_key(&characteristic.attribute) {
            return Err(SubscribeError::AlreadySubscribed(
                characteristic.name.clone(),
            ));
        }

        info!(
            "Enabling notifications on {} ({})",
            characteristic.name,
            format_uuid(characteristic.uuid)
        );
        let status = transport
            .write_notify_descriptor(characteristic.handle, DescriptorValue::Notify)
            .await;
        match status {
            Ok(CommunicationStatus::Success) => {}
            Ok(status) => {
                warn!(
                    "Notification subscription on {} returned status: {:?}",
                    characteristic.name, status
                );
                return Err(SubscribeError::SubscribeFailed(characteristic.name.clone()));
            }
            Err(e) => {
                warn!("Notification subscription on {} failed: {}", characteristic.name, e);
                return Err(SubscribeError::SubscribeFailed(characteristic.name.clone()));
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let token = match transport.register_notifications(characteristic.handle, tx) {
            Ok(token) => token,
            Err(e) => {
                warn!("Could not register value handler on {}: {}", characteristic.name, e);
                let _ = transport
                    .write_notify_descriptor(characteristic.handle, DescriptorValue::None)
                    .await;
                return Err(SubscribeError::SubscribeFailed(characteristic.name.clone()));
            }
        };

        let forwarder = tokio::spawn(forward_values(
            characteristic.name.clone(),
            rx,
            self.decoder.clone(),
            self.event_sender.clone(),
        ));

        self.subscriptions.insert(
            characteristic.attribute,
            Subscription {
                name: characteristic.name.clone(),
                handle: characteristic.handle,
                token,
                forwarder,
            },
        );
        send_log(
            &self.event_sender,
            format!("Subscribed to {}", characteristic.name),
            MessageSeverity::Success,
        );
        Ok(())
    }

    /// Disable and deregister every subscription, best effort.
    ///
    /// A failed descriptor write is logged and the remaining entries are still
    /// torn down. Returns the number of subscriptions removed.
    pub async fn unsubscribe_all(&mut self, transport: &dyn GattTransport) -> usize {
        let count = self.subscriptions.len();
        for (_, subscription) in self.subscriptions.drain() {
            let handle = subscription.handle;
            match transport
                .write_notify_descriptor(handle, DescriptorValue::None)
                .await
            {
                Ok(CommunicationStatus::Success) => {}
                Ok(status) => warn!(
                    "Disabling notifications on {} returned status: {:?}",
                    subscription.name, status
                ),
                Err(e) => warn!(
                    "Disabling notifications on {} failed: {}",
                    subscription.name, e
                ),
            }
            if let Err(e) = transport.deregister_notifications(handle, subscription.token) {
                warn!("Could not remove value handler on {}: {}", subscription.name, e);
            }
            subscription.forwarder.abort();
            debug!("Unsubscribed from {}", subscription.name);
        }
        count
    }

    pub fn contains(&self, handle: CharacteristicHandle) -> bool {
        self.subscriptions.values().any(|s| s.handle == handle)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

/// Decode and deliver the frames of one subscription
async fn forward_values(
    name: String,
    mut rx: mpsc::UnboundedReceiver<Notification>,
    decoder: Arc<dyn ValueDecoder>,
    event_sender: EventSender,
) {
    let mut primed = false;
    while let Some(notification) = rx.recv().await {
        // The first frame after enabling notifications is stale on these
        // peripherals.
        if !primed {
            primed = true;
            trace!("Discarding priming frame on {}: {:02X?}", name, notification.value);
            continue;
        }

        match decoder.decode(&notification.value) {
            Some(value) => {
                let sample = ValueSample {
                    characteristic: name.clone(),
                    raw: notification.value,
                    value,
                };
                if event_sender.send(AppEvent::Value(sample)).is_err() {
                    break;
                }
            }
            None => debug!("Undecodable frame on {}: {:02X?}", name, notification.value),
        }
    }
    trace!("Value forwarder for {} finished", name);
}
