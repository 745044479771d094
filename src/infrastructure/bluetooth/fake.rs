//! Instrumented in-memory transport and watcher for tests.

use crate::domain::errors::{CommunicationStatus, TransportError};
use crate::domain::models::{
    CharacteristicHandle, CharacteristicProperties, CharacteristicRecord, ConnectionHandle,
    ServiceHandle, ServiceRecord,
};
use crate::infrastructure::bluetooth::protocol::from_short;
use crate::infrastructure::bluetooth::transport::{
    AccessStatus, CacheMode, DescriptorValue, DiscoveryWatcher, GattTransport, Notification,
    NotificationSink, NotificationToken,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(String),
    EnumerateServices(ConnectionHandle),
    RequestAccess(ServiceHandle),
    EnumerateCharacteristics(ServiceHandle),
    WriteDescriptor(CharacteristicHandle, DescriptorValue),
    Register(CharacteristicHandle),
    Deregister(CharacteristicHandle),
    ReleaseService(ServiceHandle),
    ReleaseConnection(ConnectionHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    Succeed,
    Fail,
    Hang,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<Call>,
    services: Vec<ServiceRecord>,
    characteristics: HashMap<ServiceHandle, Vec<CharacteristicRecord>>,
    connect: Option<ConnectBehavior>,
    services_fail: bool,
    denials_remaining: u32,
    access_faults: bool,
    failing_writes: HashSet<CharacteristicHandle>,
    reissue_handles: bool,
    enumerations: u64,
    sinks: HashMap<CharacteristicHandle, NotificationSink>,
    next_connection: u64,
    next_token: i64,
}

#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<FakeState>,
}

pub const HEART_RATE: ServiceHandle = ServiceHandle(1);
pub const BATTERY: ServiceHandle = ServiceHandle(2);
pub const MEASUREMENT: CharacteristicHandle = CharacteristicHandle(10);
pub const BODY_LOCATION: CharacteristicHandle = CharacteristicHandle(11);
pub const CONTROL_POINT: CharacteristicHandle = CharacteristicHandle(12);
pub const BATTERY_LEVEL: CharacteristicHandle = CharacteristicHandle(20);

pub fn service(name: &str, short: u16, handle: ServiceHandle) -> ServiceRecord {
    ServiceRecord {
        name: name.to_string(),
        uuid: from_short(short),
        handle,
    }
}

/// Attribute handles mirror the transport handles of the default table
fn characteristic(
    name: &str,
    short: u16,
    properties: CharacteristicProperties,
    handle: CharacteristicHandle,
) -> CharacteristicRecord {
    CharacteristicRecord {
        name: name.to_string(),
        uuid: from_short(short),
        properties,
        attribute: handle.0 as u16,
        handle,
    }
}

impl FakeTransport {
    /// A heart-rate strap: HeartRate (3 characteristics) and Battery (1)
    pub fn heart_rate() -> Arc<Self> {
        let fake = Self::default();
        {
            let mut state = fake.state.lock().unwrap();
            state.services = vec![
                service("HeartRate", 0x180D, HEART_RATE),
                service("Battery", 0x180F, BATTERY),
            ];
            state.characteristics.insert(
                HEART_RATE,
                vec![
                    characteristic(
                        "HeartRateMeasurement",
                        0x2A37,
                        CharacteristicProperties::notify(),
                        MEASUREMENT,
                    ),
                    characteristic(
                        "BodySensorLocation",
                        0x2A38,
                        CharacteristicProperties::read(),
                        BODY_LOCATION,
                    ),
                    characteristic(
                        "HeartRateControlPoint",
                        0x2A39,
                        CharacteristicProperties::notify(),
                        CONTROL_POINT,
                    ),
                ],
            );
            state.characteristics.insert(
                BATTERY,
                vec![characteristic(
                    "BatteryLevel",
                    0x2A19,
                    CharacteristicProperties::notify(),
                    BATTERY_LEVEL,
                )],
            );
        }
        Arc::new(fake)
    }

    pub fn set_connect(&self, behavior: ConnectBehavior) {
        self.state.lock().unwrap().connect = Some(behavior);
    }

    pub fn fail_service_enumeration(&self) {
        self.state.lock().unwrap().services_fail = true;
    }

    /// Deny the next `count` access requests
    pub fn deny_access(&self, count: u32) {
        self.state.lock().unwrap().denials_remaining = count;
    }

    pub fn fault_access(&self) {
        self.state.lock().unwrap().access_faults = true;
    }

    pub fn set_services(&self, services: Vec<ServiceRecord>) {
        self.state.lock().unwrap().services = services;
    }

    /// Hand out a new transport handle for every characteristic on each
    /// enumeration, keeping the attribute handles
    pub fn reissue_handles(&self) {
        self.state.lock().unwrap().reissue_handles = true;
    }

    pub fn set_characteristics(&self, service: ServiceHandle, chars: Vec<CharacteristicRecord>) {
        self.state.lock().unwrap().characteristics.insert(service, chars);
    }

    pub fn fail_writes(&self, characteristic: CharacteristicHandle) {
        self.state
            .lock()
            .unwrap()
            .failing_writes
            .insert(characteristic);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| predicate(c)).count()
    }

    pub fn registered(&self) -> usize {
        self.state.lock().unwrap().sinks.len()
    }

    /// Deliver a value-changed event as the platform callback would
    pub fn notify(&self, characteristic: CharacteristicHandle, value: &[u8]) -> bool {
        let state = self.state.lock().unwrap();
        match state.sinks.get(&characteristic) {
            Some(sink) => sink
                .send(Notification {
                    characteristic,
                    value: value.to_vec(),
                })
                .is_ok(),
            None => false,
        }
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl GattTransport for FakeTransport {
    async fn connect_by_id(&self, id: &str) -> Result<ConnectionHandle, TransportError> {
        self.record(Call::Connect(id.to_string()));
        let behavior = {
            let mut state = self.state.lock().unwrap();
            state.next_connection += 1;
            (
                state.connect.unwrap_or(ConnectBehavior::Succeed),
                state.next_connection,
            )
        };
        match behavior {
            (ConnectBehavior::Succeed, n) => Ok(ConnectionHandle(n)),
            (ConnectBehavior::Fail, _) => Err(TransportError::Fault("radio off".to_string())),
            (ConnectBehavior::Hang, _) => std::future::pending().await,
        }
    }

    async fn enumerate_services(
        &self,
        connection: ConnectionHandle,
        mode: CacheMode,
    ) -> Result<Vec<ServiceRecord>, TransportError> {
        assert_eq!(mode, CacheMode::Uncached);
        self.record(Call::EnumerateServices(connection));
        let state = self.state.lock().unwrap();
        if state.services_fail {
            return Err(TransportError::Status(CommunicationStatus::Unreachable));
        }
        Ok(state.services.clone())
    }

    async fn request_access(&self, service: ServiceHandle) -> Result<AccessStatus, TransportError> {
        self.record(Call::RequestAccess(service));
        let mut state = self.state.lock().unwrap();
        if state.access_faults {
            return Err(TransportError::Fault("access is denied".to_string()));
        }
        if state.denials_remaining > 0 {
            state.denials_remaining -= 1;
            return Ok(AccessStatus::Denied);
        }
        Ok(AccessStatus::Allowed)
    }

    async fn enumerate_characteristics(
        &self,
        service: ServiceHandle,
        mode: CacheMode,
    ) -> Result<Vec<CharacteristicRecord>, TransportError> {
        assert_eq!(mode, CacheMode::Uncached);
        self.record(Call::EnumerateCharacteristics(service));
        let mut state = self.state.lock().unwrap();
        state.enumerations += 1;
        let mut records = state
            .characteristics
            .get(&service)
            .cloned()
            .unwrap_or_default();
        if state.reissue_handles {
            let generation = state.enumerations * 1000;
            for record in &mut records {
                record.handle = CharacteristicHandle(generation + record.handle.0);
            }
        }
        Ok(records)
    }

    async fn write_notify_descriptor(
        &self,
        characteristic: CharacteristicHandle,
        value: DescriptorValue,
    ) -> Result<CommunicationStatus, TransportError> {
        self.record(Call::WriteDescriptor(characteristic, value));
        let state = self.state.lock().unwrap();
        if state.failing_writes.contains(&characteristic) {
            return Ok(CommunicationStatus::ProtocolError);
        }
        Ok(CommunicationStatus::Success)
    }

    fn register_notifications(
        &self,
        characteristic: CharacteristicHandle,
        sink: NotificationSink,
    ) -> Result<NotificationToken, TransportError> {
        self.record(Call::Register(characteristic));
        let mut state = self.state.lock().unwrap();
        state.next_token += 1;
        state.sinks.insert(characteristic, sink);
        Ok(NotificationToken(state.next_token))
    }

    fn deregister_notifications(
        &self,
        characteristic: CharacteristicHandle,
        _token: NotificationToken,
    ) -> Result<(), TransportError> {
        self.record(Call::Deregister(characteristic));
        self.state.lock().unwrap().sinks.remove(&characteristic);
        Ok(())
    }

    fn release_service(&self, service: ServiceHandle) {
        self.record(Call::ReleaseService(service));
    }

    fn release_connection(&self, connection: ConnectionHandle) {
        self.record(Call::ReleaseConnection(connection));
    }
}

/// Watcher that only counts start/stop requests
#[derive(Clone, Default)]
pub struct FakeWatcher {
    pub starts: Arc<Mutex<u32>>,
    pub stops: Arc<Mutex<u32>>,
}

impl DiscoveryWatcher for FakeWatcher {
    fn start(&mut self) -> anyhow::Result<()> {
        *self.starts.lock().unwrap() += 1;
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        *self.stops.lock().unwrap() += 1;
        Ok(())
    }
}
