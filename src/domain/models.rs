use std::fmt;
use tokio::sync::mpsc;

/// Opaque handle to an open peripheral connection, issued by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub u64);

/// Opaque handle to a GATT service, issued by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceHandle(pub u64);

/// Opaque handle to a GATT characteristic, issued by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle(pub u64);

/// Anything that can be looked up by display name or `#NN` ordinal
pub trait Named {
    fn name(&self) -> &str;
}

/// A peripheral currently visible to the discovery watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub id: String,
    pub name: String,
    pub connectable: bool,
}

impl DeviceRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            connectable: true,
        }
    }
}

impl Named for DeviceRecord {
    fn name(&self) -> &str {
        &self.name
    }
}

/// A service enumerated on the open connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub name: String,
    pub uuid: u128,
    pub handle: ServiceHandle,
}

impl Named for ServiceRecord {
    fn name(&self) -> &str {
        &self.name
    }
}

/// GATT characteristic capability flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicProperties {
    pub broadcast: bool,
    pub read: bool,
    pub write_without_response: bool,
    pub write: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharacteristicProperties {
    pub fn notify() -> Self {
        Self {
            notify: true,
            ..Default::default()
        }
    }

    pub fn read() -> Self {
        Self {
            read: true,
            ..Default::default()
        }
    }
}

impl fmt::Display for CharacteristicProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = [
            (self.broadcast, "Broadcast"),
            (self.read, "Read"),
            (self.write_without_response, "WriteWithoutResponse"),
            (self.write, "Write"),
            (self.notify, "Notify"),
            (self.indicate, "Indicate"),
        ];
        let names: Vec<&str> = flags
            .iter()
            .filter(|(set, _)| *set)
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", names.join(", "))
    }
}

/// A characteristic of the selected (or ad hoc enumerated) service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicRecord {
    pub name: String,
    pub uuid: u128,
    pub properties: CharacteristicProperties,
    /// GATT attribute handle on the peripheral. Stable for the lifetime of
    /// the connection, unlike `handle` which is only valid until released.
    pub attribute: u16,
    pub handle: CharacteristicHandle,
}

impl Named for CharacteristicRecord {
    fn name(&self) -> &str {
        &self.name
    }
}

/// One decoded notification
#[derive(Debug, Clone, PartialEq)]
pub struct ValueSample {
    pub characteristic: String,
    pub raw: Vec<u8>,
    pub value: f64,
}

/// Acquisition lifecycle, see `AcquisitionOrchestrator`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Watching,
    DeviceFound,
    Connecting,
    Connected,
    ServiceSearching,
    ServiceFound,
    Subscribing { attempt: u32 },
    Listening,
    GivingUp,
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Watching => write!(f, "searching device"),
            Self::DeviceFound => write!(f, "device found"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::ServiceSearching => write!(f, "searching service"),
            Self::ServiceFound => write!(f, "service found"),
            Self::Subscribing { attempt } => write!(f, "registering service (attempt {})", attempt),
            Self::Listening => write!(f, "listening"),
            Self::GivingUp => write!(f, "gave up"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    LogMessage(StatusMessage),
    StateChanged(AcquisitionState),
    Value(ValueSample),
    /// The tracked peripheral disappeared from discovery
    DeviceLost(DeviceRecord),
}

pub type EventSender = mpsc::UnboundedSender<AppEvent>;

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

/// Send a status line to the consumer. A closed consumer is not an error.
pub fn send_log(sender: &EventSender, message: impl Into<String>, severity: MessageSeverity) {
    let _ = sender.send(AppEvent::LogMessage(StatusMessage {
        message: message.into(),
        severity,
    }));
}
