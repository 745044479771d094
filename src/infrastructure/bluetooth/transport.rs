//! Contracts of the platform Bluetooth stack.
//!
//! The session layer only talks to the radio through these traits; the WinRT
//! backend implements them on Windows and the tests use an instrumented fake.

use crate::domain::errors::{CommunicationStatus, TransportError};
use crate::domain::models::{
    CharacteristicHandle, CharacteristicRecord, ConnectionHandle, DeviceRecord, ServiceHandle,
    ServiceRecord,
};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Events raised by the platform discovery watcher
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    Added(DeviceRecord),
    Updated(DeviceRecord),
    Removed(String),
    EnumerationCompleted,
    Stopped,
}

/// Control surface of the discovery watcher. Its events are delivered on the
/// channel handed to the backend when the watcher is created.
pub trait DiscoveryWatcher: Send {
    fn start(&mut self) -> anyhow::Result<()>;
    fn stop(&mut self) -> anyhow::Result<()>;
}

/// GATT attribute cache policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Cached,
    Uncached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessStatus {
    Allowed,
    Denied,
}

/// Client characteristic configuration descriptor value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorValue {
    None,
    Notify,
}

/// A value-changed event as delivered by the transport callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub characteristic: CharacteristicHandle,
    pub value: Vec<u8>,
}

pub type NotificationSink = mpsc::UnboundedSender<Notification>;

/// Registration token returned by `register_notifications`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificationToken(pub i64);

#[async_trait]
pub trait GattTransport: Send + Sync {
    async fn connect_by_id(&self, id: &str) -> Result<ConnectionHandle, TransportError>;

    async fn enumerate_services(
        &self,
        connection: ConnectionHandle,
        mode: CacheMode,
    ) -> Result<Vec<ServiceRecord>, TransportError>;

    async fn request_access(&self, service: ServiceHandle) -> Result<AccessStatus, TransportError>;

    async fn enumerate_characteristics(
        &self,
        service: ServiceHandle,
        mode: CacheMode,
    ) -> Result<Vec<CharacteristicRecord>, TransportError>;

    async fn write_notify_descriptor(
        &self,
        characteristic: CharacteristicHandle,
        value: DescriptorValue,
    ) -> Result<CommunicationStatus, TransportError>;

    /// Route value-changed events of `characteristic` into `sink`
    fn register_notifications(
        &self,
        characteristic: CharacteristicHandle,
        sink: NotificationSink,
    ) -> Result<NotificationToken, TransportError>;

    fn deregister_notifications(
        &self,
        characteristic: CharacteristicHandle,
        token: NotificationToken,
    ) -> Result<(), TransportError>;

    fn release_service(&self, service: ServiceHandle);

    fn release_connection(&self, connection: ConnectionHandle);
}
