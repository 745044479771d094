use thiserror::Error;

/// GATT communication status reported by the transport for a completed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunicationStatus {
    Success,
    Unreachable,
    ProtocolError,
    AccessDenied,
}

/// Failure raised by a `GattTransport` call itself
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("operation timed out")]
    Timeout,

    #[error("communication status {0:?}")]
    Status(CommunicationStatus),

    #[error("{0}")]
    Fault(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectError {
    #[error("device {0:?} not found")]
    NotFound(String),

    #[error("device {0} is unreachable")]
    Unreachable(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("nothing to use, no BLE device connected")]
    NoDevice,

    #[error("invalid service name or number {0:?}")]
    NotFound(String),

    #[error("error accessing service {0}")]
    AccessDenied(String),

    #[error("restricted service, can't read characteristics: {0}")]
    Restricted(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubscribeError {
    #[error("no BLE device connected")]
    NoDevice,

    #[error("invalid service name or number {0:?}")]
    NotFound(String),

    #[error("no service is selected")]
    NoServiceSelected,

    #[error("invalid characteristic {0:?}")]
    InvalidCharacteristic(String),

    #[error("already subscribed to characteristic {0}")]
    AlreadySubscribed(String),

    #[error("can't subscribe to characteristic {0}")]
    SubscribeFailed(String),

    #[error("error accessing service {0}")]
    AccessDenied(String),

    #[error("restricted service, can't subscribe to characteristics: {0}")]
    Restricted(String),
}
