//! `GattTransport` over `Windows.Devices.Bluetooth`.
//!
//! WinRT objects stay inside this module. The session layer only sees the
//! opaque handles handed out here. Service and characteristic handles are
//! interned by GATT attribute handle, so re-enumerating a table hands back
//! the same handles and objects.

use crate::domain::errors::{CommunicationStatus, TransportError};
use crate::domain::models::{
    CharacteristicHandle, CharacteristicProperties, CharacteristicRecord, ConnectionHandle,
    ServiceHandle, ServiceRecord,
};
use crate::infrastructure::bluetooth::attributes::AttributeTable;
use crate::infrastructure::bluetooth::protocol::{characteristic_name, service_name};
use crate::infrastructure::bluetooth::transport::{
    AccessStatus, CacheMode, DescriptorValue, GattTransport, Notification, NotificationSink,
    NotificationToken,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};
use windows::core::HSTRING;
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattCharacteristicProperties,
    GattClientCharacteristicConfigurationDescriptorValue, GattCommunicationStatus,
    GattDeviceService, GattValueChangedEventArgs,
};
use windows::Devices::Bluetooth::{BluetoothCacheMode, BluetoothLEDevice};
use windows::Devices::Enumeration::DeviceAccessStatus;
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, IBuffer};

fn fault(e: windows::core::Error) -> TransportError {
    TransportError::Fault(e.message().to_string())
}

fn status(status: GattCommunicationStatus) -> CommunicationStatus {
    match status {
        GattCommunicationStatus::Success => CommunicationStatus::Success,
        GattCommunicationStatus::AccessDenied => CommunicationStatus::AccessDenied,
        GattCommunicationStatus::ProtocolError => CommunicationStatus::ProtocolError,
        _ => CommunicationStatus::Unreachable,
    }
}

fn cache_mode(mode: CacheMode) -> BluetoothCacheMode {
    match mode {
        CacheMode::Cached => BluetoothCacheMode::Cached,
        CacheMode::Uncached => BluetoothCacheMode::Uncached,
    }
}

fn properties(flags: GattCharacteristicProperties) -> CharacteristicProperties {
    let has = |flag: GattCharacteristicProperties| flags.0 & flag.0 != 0;
    CharacteristicProperties {
        broadcast: has(GattCharacteristicProperties::Broadcast),
        read: has(GattCharacteristicProperties::Read),
        write_without_response: has(GattCharacteristicProperties::WriteWithoutResponse),
        write: has(GattCharacteristicProperties::Write),
        notify: has(GattCharacteristicProperties::Notify),
        indicate: has(GattCharacteristicProperties::Indicate),
    }
}

fn read_bytes(buffer: &IBuffer) -> windows::core::Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let mut bytes = vec![0u8; reader.UnconsumedBufferLength()? as usize];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

fn close_service(service: &GattDeviceService) {
    if let Err(e) = service.Close() {
        warn!("Failed to close service: {}", e);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct WinRtTransport {
    next_connection: AtomicU64,
    devices: Mutex<HashMap<u64, BluetoothLEDevice>>,
    services: Mutex<AttributeTable<GattDeviceService>>,
    characteristics: Mutex<AttributeTable<GattCharacteristic>>,
}

impl WinRtTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn device(&self, handle: ConnectionHandle) -> Result<BluetoothLEDevice, TransportError> {
        lock(&self.devices)
            .get(&handle.0)
            .cloned()
            .ok_or_else(|| TransportError::Fault(format!("unknown connection {}", handle.0)))
    }

    fn service(&self, handle: ServiceHandle) -> Result<GattDeviceService, TransportError> {
        lock(&self.services)
            .get(handle.0)
            .ok_or_else(|| TransportError::Fault(format!("unknown service {}", handle.0)))
    }

    fn characteristic(
        &self,
        handle: CharacteristicHandle,
    ) -> Result<GattCharacteristic, TransportError> {
        lock(&self.characteristics)
            .get(handle.0)
            .ok_or_else(|| TransportError::Fault(format!("unknown characteristic {}", handle.0)))
    }
}

#[async_trait]
impl GattTransport for WinRtTransport {
    async fn connect_by_id(&self, id: &str) -> Result<ConnectionHandle, TransportError> {
        let device = BluetoothLEDevice::FromIdAsync(&HSTRING::from(id))
            .map_err(fault)?
            .await
            .map_err(fault)?;
        debug!("Opened device {:?}", device.Name().unwrap_or_default());

        let handle = self.next_connection.fetch_add(1, Ordering::Relaxed) + 1;
        lock(&self.devices).insert(handle, device);
        Ok(ConnectionHandle(handle))
    }

    async fn enumerate_services(
        &self,
        connection: ConnectionHandle,
        mode: CacheMode,
    ) -> Result<Vec<ServiceRecord>, TransportError> {
        let device = self.device(connection)?;
        let result = device
            .GetGattServicesWithCacheModeAsync(cache_mode(mode))
            .map_err(fault)?
            .await
            .map_err(fault)?;

        let result_status = status(result.Status().map_err(fault)?);
        if result_status != CommunicationStatus::Success {
            return Err(TransportError::Status(result_status));
        }

        let mut records = Vec::new();
        for service in result.Services().map_err(fault)? {
            let uuid = service.Uuid().map_err(fault)?.to_u128();
            let attribute = service.AttributeHandle().map_err(fault)?;
            let handle = lock(&self.services).intern(connection.0, attribute, service);
            records.push(ServiceRecord {
                name: service_name(uuid),
                uuid,
                handle: ServiceHandle(handle),
            });
        }
        Ok(records)
    }

    async fn request_access(&self, service: ServiceHandle) -> Result<AccessStatus, TransportError> {
        let service = self.service(service)?;
        let access = service
            .RequestAccessAsync()
            .map_err(fault)?
            .await
            .map_err(fault)?;
        Ok(if access == DeviceAccessStatus::Allowed {
            AccessStatus::Allowed
        } else {
            AccessStatus::Denied
        })
    }

    async fn enumerate_characteristics(
        &self,
        service: ServiceHandle,
        mode: CacheMode,
    ) -> Result<Vec<CharacteristicRecord>, TransportError> {
        let parent = service.0;
        let service = self.service(service)?;
        let result = service
            .GetCharacteristicsWithCacheModeAsync(cache_mode(mode))
            .map_err(fault)?
            .await
            .map_err(fault)?;

        let result_status = status(result.Status().map_err(fault)?);
        if result_status != CommunicationStatus::Success {
            return Err(TransportError::Status(result_status));
        }

        let mut records = Vec::new();
        for characteristic in result.Characteristics().map_err(fault)? {
            let uuid = characteristic.Uuid().map_err(fault)?.to_u128();
            let flags = characteristic.CharacteristicProperties().map_err(fault)?;
            let attribute = characteristic.AttributeHandle().map_err(fault)?;
            let handle = lock(&self.characteristics).intern(parent, attribute, characteristic);
            records.push(CharacteristicRecord {
                name: characteristic_name(uuid),
                uuid,
                properties: properties(flags),
                attribute,
                handle: CharacteristicHandle(handle),
            });
        }
        Ok(records)
    }

    async fn write_notify_descriptor(
        &self,
        characteristic: CharacteristicHandle,
        value: DescriptorValue,
    ) -> Result<CommunicationStatus, TransportError> {
        let characteristic = self.characteristic(characteristic)?;
        let value = match value {
            DescriptorValue::None => GattClientCharacteristicConfigurationDescriptorValue::None,
            DescriptorValue::Notify => GattClientCharacteristicConfigurationDescriptorValue::Notify,
        };
        let result = characteristic
            .WriteClientCharacteristicConfigurationDescriptorAsync(value)
            .map_err(fault)?
            .await
            .map_err(fault)?;
        Ok(status(result))
    }

    fn register_notifications(
        &self,
        characteristic: CharacteristicHandle,
        sink: NotificationSink,
    ) -> Result<NotificationToken, TransportError> {
        let target = self.characteristic(characteristic)?;
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    match args.CharacteristicValue().and_then(|b| read_bytes(&b)) {
                        Ok(value) => {
                            let _ = sink.send(Notification {
                                characteristic,
                                value,
                            });
                        }
                        Err(e) => warn!("Unreadable notification payload: {}", e),
                    }
                }
                Ok(())
            },
        );
        let token = target.ValueChanged(&handler).map_err(fault)?;
        Ok(NotificationToken(token))
    }

    fn deregister_notifications(
        &self,
        characteristic: CharacteristicHandle,
        token: NotificationToken,
    ) -> Result<(), TransportError> {
        self.characteristic(characteristic)?
            .RemoveValueChanged(token.0)
            .map_err(fault)
    }

    fn release_service(&self, service: ServiceHandle) {
        lock(&self.characteristics).remove_children(service.0);
        if let Some(service) = lock(&self.services).remove(service.0) {
            close_service(&service);
        }
    }

    fn release_connection(&self, connection: ConnectionHandle) {
        let services = lock(&self.services).remove_children(connection.0);
        for (id, service) in services {
            lock(&self.characteristics).remove_children(id);
            close_service(&service);
        }
        if let Some(device) = lock(&self.devices).remove(&connection.0) {
            if let Err(e) = device.Close() {
                warn!("Failed to close device: {}", e);
            }
        }
    }
}
