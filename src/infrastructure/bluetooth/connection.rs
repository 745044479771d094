//! BLE Connection Module
//!
//! Owns the single open peripheral connection, its service table, the service
//! cursor and the subscription set.

use crate::domain::errors::{ConnectError, ServiceError, SubscribeError};
use crate::domain::models::{
    send_log, CharacteristicRecord, ConnectionHandle, EventSender, MessageSeverity, ServiceRecord,
};
use crate::domain::registry::SharedRegistry;
use crate::domain::resolver;
use crate::domain::values::ValueDecoder;
use crate::infrastructure::bluetooth::cursor::{
    read_characteristics, EnumerationFailure, Selection, ServiceCursor,
};
use crate::infrastructure::bluetooth::subscription::SubscriptionManager;
use crate::infrastructure::bluetooth::transport::{CacheMode, GattTransport};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

struct OpenConnection {
    peripheral_id: String,
    name: String,
    handle: ConnectionHandle,
    services: Vec<ServiceRecord>,
}

pub struct GattSession {
    transport: Arc<dyn GattTransport>,
    registry: SharedRegistry,
    event_sender: EventSender,
    connect_timeout: Duration,
    open: Option<OpenConnection>,
    cursor: ServiceCursor,
    subscriptions: SubscriptionManager,
}

impl GattSession {
    pub fn new(
        transport: Arc<dyn GattTransport>,
        registry: SharedRegistry,
        decoder: Arc<dyn ValueDecoder>,
        event_sender: EventSender,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            registry,
            subscriptions: SubscriptionManager::new(decoder, event_sender.clone()),
            event_sender,
            connect_timeout,
            open: None,
            cursor: ServiceCursor::new(),
        }
    }

    /// Connect to the device `token` resolves to and enumerate its services.
    ///
    /// Any open session is torn down first; the radio supports one link.
    pub async fn open(&mut self, token: &str) -> Result<(), ConnectError> {
        if token.is_empty() {
            self.send_log("Device name can not be empty.", MessageSeverity::Error);
            return Err(ConnectError::NotFound(String::new()));
        }

        let devices = self.registry.snapshot();
        let device = match resolver::find(&devices, token) {
            Some(device) => device.clone(),
            None => {
                self.send_log(
                    format!("Device {} not found.", token),
                    MessageSeverity::Error,
                );
                return Err(ConnectError::NotFound(token.to_string()));
            }
        };

        self.close().await;

        info!("Connecting to {} ({})", device.name, device.id);
        self.send_log(
            format!("Connecting to {}.", device.name),
            MessageSeverity::Info,
        );

        let handle =
            match tokio::time::timeout(self.connect_timeout, self.transport.connect_by_id(&device.id))
                .await
            {
                Ok(Ok(handle)) => handle,
                Ok(Err(e)) => {
                    warn!("Connection to {} failed: {}", device.name, e);
                    return Err(self.unreachable(&device.name));
                }
                Err(_) => {
                    warn!(
                        "Connection to {} timed out after {:?}",
                        device.name, self.connect_timeout
                    );
                    return Err(self.unreachable(&device.name));
                }
            };

        let services = match self
            .transport
            .enumerate_services(handle, CacheMode::Uncached)
            .await
        {
            Ok(services) => services,
            Err(e) => {
                error!("Failed to get GATT services: {}", e);
                self.transport.release_connection(handle);
                return Err(self.unreachable(&device.name));
            }
        };

        info!("Found {} services", services.len());
        for (i, s) in services.iter().enumerate() {
            info!("#{:02}: {}", i, s.name);
        }

        self.open = Some(OpenConnection {
            peripheral_id: device.id,
            name: device.name,
            handle,
            services,
        });
        Ok(())
    }

    /// Unsubscribe everything, release services and the connection.
    /// Closing a closed session does nothing.
    pub async fn close(&mut self) {
        let Some(open) = self.open.take() else {
            return;
        };

        let removed = self.unsubscribe_all().await;
        if removed > 0 {
            info!("Removed {} subscriptions", removed);
        }
        self.cursor.clear();
        for service in &open.services {
            self.transport.release_service(service.handle);
        }
        self.transport.release_connection(open.handle);

        info!("Device {} is disconnected", open.name);
        self.send_log(
            format!("Device {} is disconnected.", open.name),
            MessageSeverity::Info,
        );
    }

    /// Re-read the service table of the open connection, uncached
    pub async fn refresh_services(&mut self) -> Result<(), ConnectError> {
        let Some(open) = self.open.as_mut() else {
            return Err(ConnectError::NotFound(String::new()));
        };

        match self
            .transport
            .enumerate_services(open.handle, CacheMode::Uncached)
            .await
        {
            Ok(services) => {
                // Release handles that are no longer part of the table
                for service in &open.services {
                    if !services.iter().any(|s| s.handle == service.handle) {
                        self.transport.release_service(service.handle);
                    }
                }
                open.services = services;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to refresh GATT services: {}", e);
                Err(ConnectError::Unreachable(open.name.clone()))
            }
        }
    }

    pub async fn select_service(&mut self, token: &str) -> Result<Selection, ServiceError> {
        let Some(open) = self.open.as_ref() else {
            self.send_log(
                "Nothing to use, no BLE device connected.",
                MessageSeverity::Error,
            );
            return Err(ServiceError::NoDevice);
        };

        let result = self
            .cursor
            .select(self.transport.as_ref(), &open.services, token)
            .await;
        match &result {
            Ok(Selection::Ready { .. }) => {
                if let Some(service) = self.cursor.selected() {
                    let message = format!("Selected service {}.", service.name);
                    self.send_log(message, MessageSeverity::Info);
                }
            }
            Ok(Selection::EmptyService) => {
                self.send_log(
                    "Service don't have any characteristic.",
                    MessageSeverity::Warning,
                );
            }
            Err(e) => self.send_log(e.to_string(), MessageSeverity::Error),
        }
        result
    }

    /// Subscribe to `service/characteristic`, or to `characteristic` of the
    /// selected service
    pub async fn subscribe(&mut self, locator: &str) -> Result<(), SubscribeError> {
        let result = self.subscribe_inner(locator).await;
        if let Err(e) = &result {
            self.send_log(e.to_string(), MessageSeverity::Error);
        }
        result
    }

    async fn subscribe_inner(&mut self, locator: &str) -> Result<(), SubscribeError> {
        let Some(open) = self.open.as_ref() else {
            return Err(SubscribeError::NoDevice);
        };

        let parts: Vec<&str> = locator.split('/').collect();
        let (candidates, token): (Vec<CharacteristicRecord>, &str) = match parts.as_slice() {
            [service_token, token] => {
                let service = resolver::find(&open.services, service_token)
                    .ok_or_else(|| SubscribeError::NotFound(service_token.to_string()))?;
                let characteristics =
                    match read_characteristics(self.transport.as_ref(), service).await {
                        Ok(characteristics) => characteristics,
                        Err(EnumerationFailure::Denied) => {
                            return Err(SubscribeError::AccessDenied(service.name.clone()))
                        }
                        Err(EnumerationFailure::Fault(message)) => {
                            return Err(SubscribeError::Restricted(message))
                        }
                    };
                (characteristics, *token)
            }
            [token] => {
                if self.cursor.selected().is_none() {
                    return Err(SubscribeError::NoServiceSelected);
                }
                (self.cursor.characteristics().to_vec(), *token)
            }
            _ => return Err(SubscribeError::InvalidCharacteristic(locator.to_string())),
        };

        if token.is_empty() {
            return Err(SubscribeError::InvalidCharacteristic(locator.to_string()));
        }

        self.subscriptions
            .subscribe(self.transport.as_ref(), &candidates, token)
            .await
    }

    pub async fn unsubscribe_all(&mut self) -> usize {
        self.subscriptions
            .unsubscribe_all(self.transport.as_ref())
            .await
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn peripheral_id(&self) -> Option<&str> {
        self.open.as_ref().map(|o| o.peripheral_id.as_str())
    }

    pub fn services(&self) -> &[ServiceRecord] {
        self.open.as_ref().map(|o| o.services.as_slice()).unwrap_or(&[])
    }

    pub fn selected_service(&self) -> Option<&ServiceRecord> {
        self.cursor.selected()
    }

    pub fn characteristics(&self) -> &[CharacteristicRecord] {
        self.cursor.characteristics()
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    fn unreachable(&self, name: &str) -> ConnectError {
        self.send_log(
            format!("Device {} is unreachable.", name),
            MessageSeverity::Error,
        );
        ConnectError::Unreachable(name.to_string())
    }

    fn send_log(&self, message: impl Into<String>, severity: MessageSeverity) {
        send_log(&self.event_sender, message, severity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AppEvent, DeviceRecord};
    use crate::domain::values::UnsignedDecoder;
    use crate::infrastructure::bluetooth::fake::{
        service, Call, ConnectBehavior, FakeTransport, BATTERY, BATTERY_LEVEL, HEART_RATE,
        MEASUREMENT,
    };
    use crate::infrastructure::bluetooth::transport::DescriptorValue;
    use tokio::sync::mpsc;

    fn session(
        fake: &Arc<FakeTransport>,
    ) -> (GattSession, SharedRegistry, mpsc::UnboundedReceiver<AppEvent>) {
        let registry = SharedRegistry::new();
        registry.apply(|r| {
            r.on_added(DeviceRecord::new("BLE#polar", "Polar H10 8A1B"));
            r.on_added(DeviceRecord::new("BLE#mi", "Mi Band 4"));
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let session = GattSession::new(
            fake.clone(),
            registry.clone(),
            Arc::new(UnsignedDecoder),
            tx,
            Duration::from_secs(3),
        );
        (session, registry, rx)
    }

    #[tokio::test]
    async fn test_open_by_ordinal_enumerates_services_in_order() {
        let fake = FakeTransport::heart_rate();
        let (mut session, _, _rx) = session(&fake);

        // Sorted: "Mi Band 4", "Polar H10 8A1B"
        session.open("#1").await.unwrap();
        assert!(session.is_open());
        assert_eq!(session.peripheral_id(), Some("BLE#polar"));
        let names: Vec<&str> = session.services().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["HeartRate", "Battery"]);
        assert_eq!(fake.calls()[0], Call::Connect("BLE#polar".to_string()));
    }

    #[tokio::test]
    async fn test_open_unknown_or_empty_token() {
        let fake = FakeTransport::heart_rate();
        let (mut session, _, _rx) = session(&fake);

        assert_eq!(
            session.open("").await,
            Err(ConnectError::NotFound(String::new()))
        );
        assert_eq!(
            session.open("Garmin").await,
            Err(ConnectError::NotFound("Garmin".to_string()))
        );
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_no_state() {
        let fake = FakeTransport::heart_rate();
        fake.set_connect(ConnectBehavior::Fail);
        let (mut session, _, _rx) = session(&fake);

        let err = session.open("Polar H10 8A1B").await.unwrap_err();
        assert_eq!(err, ConnectError::Unreachable("Polar H10 8A1B".to_string()));
        assert!(!session.is_open());
        assert!(session.services().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let fake = FakeTransport::heart_rate();
        fake.set_connect(ConnectBehavior::Hang);
        let (mut session, _, _rx) = session(&fake);

        let start = tokio::time::Instant::now();
        let err = session.open("Polar H10 8A1B").await.unwrap_err();
        assert_eq!(err, ConnectError::Unreachable("Polar H10 8A1B".to_string()));
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(start.elapsed() < Duration::from_secs(4));
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_failed_enumeration_is_unreachable() {
        let fake = FakeTransport::heart_rate();
        fake.fail_service_enumeration();
        let (mut session, _, _rx) = session(&fake);

        let err = session.open("Polar H10 8A1B").await.unwrap_err();
        assert!(matches!(err, ConnectError::Unreachable(_)));
        assert!(!session.is_open());
        assert_eq!(
            fake.calls().last(),
            Some(&Call::ReleaseConnection(ConnectionHandle(1)))
        );
    }

    #[tokio::test]
    async fn test_reopen_tears_down_before_connecting() {
        let fake = FakeTransport::heart_rate();
        let (mut session, _, _rx) = session(&fake);

        session.open("Polar H10 8A1B").await.unwrap();
        session.select_service("HeartRate").await.unwrap();
        session.subscribe("HeartRateMeasurement").await.unwrap();
        session.subscribe("Battery/BatteryLevel").await.unwrap();
        fake.clear_calls();

        session.open("Mi Band 4").await.unwrap();

        let calls = fake.calls();
        let connect = calls
            .iter()
            .position(|c| matches!(c, Call::Connect(_)))
            .unwrap();
        let teardown: Vec<&Call> = calls[..connect].iter().collect();
        assert_eq!(
            teardown
                .iter()
                .filter(|c| matches!(c, Call::WriteDescriptor(_, DescriptorValue::None)))
                .count(),
            2
        );
        assert_eq!(
            teardown.iter().filter(|c| matches!(c, Call::Deregister(_))).count(),
            2
        );
        assert!(teardown.contains(&&Call::ReleaseService(HEART_RATE)));
        assert!(teardown.contains(&&Call::ReleaseService(BATTERY)));
        assert_eq!(
            calls[connect - 1],
            Call::ReleaseConnection(ConnectionHandle(1))
        );
        assert!(session.subscriptions().is_empty());
        assert!(session.selected_service().is_none());
        assert_eq!(session.peripheral_id(), Some("BLE#mi"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let fake = FakeTransport::heart_rate();
        let (mut session, _, _rx) = session(&fake);
        session.open("Polar H10 8A1B").await.unwrap();

        session.close().await;
        let after_first = fake.calls().len();
        session.close().await;
        assert_eq!(fake.calls().len(), after_first);
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_select_requires_device() {
        let fake = FakeTransport::heart_rate();
        let (mut session, _, _rx) = session(&fake);
        assert_eq!(
            session.select_service("HeartRate").await,
            Err(ServiceError::NoDevice)
        );
        assert_eq!(
            session.subscribe("HeartRateMeasurement").await,
            Err(SubscribeError::NoDevice)
        );
    }

    #[tokio::test]
    async fn test_subscribe_without_selection() {
        let fake = FakeTransport::heart_rate();
        let (mut session, _, _rx) = session(&fake);
        session.open("Polar H10 8A1B").await.unwrap();

        assert_eq!(
            session.subscribe("HeartRateMeasurement").await,
            Err(SubscribeError::NoServiceSelected)
        );
    }

    #[tokio::test]
    async fn test_ad_hoc_subscribe_ignores_selection() {
        let fake = FakeTransport::heart_rate();
        let (mut session, _, _rx) = session(&fake);
        session.open("Polar H10 8A1B").await.unwrap();
        session.select_service("HeartRate").await.unwrap();

        session.subscribe("#1/#0").await.unwrap();
        assert!(session.subscriptions().contains(BATTERY_LEVEL));
        assert!(!session.subscriptions().contains(MEASUREMENT));
        // Selection untouched
        assert_eq!(session.selected_service().map(|s| s.handle), Some(HEART_RATE));
        assert_eq!(session.characteristics().len(), 3);
    }

    #[tokio::test]
    async fn test_malformed_locators() {
        let fake = FakeTransport::heart_rate();
        let (mut session, _, _rx) = session(&fake);
        session.open("Polar H10 8A1B").await.unwrap();
        session.select_service("HeartRate").await.unwrap();

        assert_eq!(
            session.subscribe("a/b/c").await,
            Err(SubscribeError::InvalidCharacteristic("a/b/c".to_string()))
        );
        assert_eq!(
            session.subscribe("Nope/#0").await,
            Err(SubscribeError::NotFound("Nope".to_string()))
        );
        assert_eq!(
            session.subscribe("").await,
            Err(SubscribeError::InvalidCharacteristic(String::new()))
        );
    }

    #[tokio::test]
    async fn test_ad_hoc_subscribe_access_failures() {
        let fake = FakeTransport::heart_rate();
        let (mut session, _, _rx) = session(&fake);
        session.open("Polar H10 8A1B").await.unwrap();

        fake.deny_access(1);
        assert_eq!(
            session.subscribe("Battery/BatteryLevel").await,
            Err(SubscribeError::AccessDenied("Battery".to_string()))
        );

        fake.fault_access();
        assert_eq!(
            session.subscribe("Battery/BatteryLevel").await,
            Err(SubscribeError::Restricted("access is denied".to_string()))
        );

        assert!(session.subscriptions().is_empty());
        assert_eq!(
            fake.count(|c| matches!(c, Call::WriteDescriptor(_, DescriptorValue::Notify))),
            0
        );
    }

    #[tokio::test]
    async fn test_resubscribe_with_reissued_handles() {
        let fake = FakeTransport::heart_rate();
        fake.reissue_handles();
        let (mut session, _, _rx) = session(&fake);
        session.open("Polar H10 8A1B").await.unwrap();

        session
            .subscribe("HeartRate/HeartRateMeasurement")
            .await
            .unwrap();
        assert_eq!(
            session.subscribe("HeartRate/HeartRateMeasurement").await,
            Err(SubscribeError::AlreadySubscribed(
                "HeartRateMeasurement".to_string()
            ))
        );

        // Same attribute again, now through the selected service
        session.select_service("HeartRate").await.unwrap();
        assert_eq!(
            session.subscribe("HeartRateMeasurement").await,
            Err(SubscribeError::AlreadySubscribed(
                "HeartRateMeasurement".to_string()
            ))
        );

        assert_eq!(session.subscriptions().len(), 1);
        assert_eq!(fake.count(|c| matches!(c, Call::Register(_))), 1);
        assert_eq!(
            fake.count(|c| matches!(c, Call::WriteDescriptor(_, DescriptorValue::Notify))),
            1
        );
    }

    #[tokio::test]
    async fn test_refresh_releases_vanished_services() {
        let fake = FakeTransport::heart_rate();
        let (mut session, _, _rx) = session(&fake);
        session.open("Polar H10 8A1B").await.unwrap();
        fake.clear_calls();

        session.refresh_services().await.unwrap();
        assert_eq!(session.services().len(), 2);
        assert_eq!(fake.count(|c| matches!(c, Call::ReleaseService(_))), 0);

        fake.set_services(vec![service("HeartRate", 0x180D, HEART_RATE)]);
        session.refresh_services().await.unwrap();
        assert_eq!(session.services().len(), 1);
        assert_eq!(
            fake.count(|c| matches!(c, Call::ReleaseService(_))),
            1
        );
        assert_eq!(
            fake.count(|c| *c == Call::ReleaseService(BATTERY)),
            1
        );

        // Only the remaining service is released on close
        fake.clear_calls();
        session.close().await;
        assert_eq!(
            fake.count(|c| matches!(c, Call::ReleaseService(_))),
            1
        );
    }
}
