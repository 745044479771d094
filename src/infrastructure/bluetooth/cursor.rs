//! Selected service and its characteristic cache.

use crate::domain::errors::{ServiceError, TransportError};
use crate::domain::models::{CharacteristicRecord, ServiceRecord};
use crate::domain::resolver;
use crate::infrastructure::bluetooth::transport::{AccessStatus, CacheMode, GattTransport};
use tracing::{info, warn};

/// Outcome of a successful service selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Ready { characteristics: usize },
    /// Selected, but the service reported no characteristics
    EmptyService,
}

/// Why reading a service's characteristics did not produce a list
#[derive(Debug)]
pub(crate) enum EnumerationFailure {
    Denied,
    Fault(String),
}

/// Request access to `service` and read its characteristics, uncached
pub(crate) async fn read_characteristics(
    transport: &dyn GattTransport,
    service: &ServiceRecord,
) -> Result<Vec<CharacteristicRecord>, EnumerationFailure> {
    info!("Requesting access to service {}", service.name);
    match transport.request_access(service.handle).await {
        Ok(AccessStatus::Allowed) => {}
        Ok(AccessStatus::Denied) => return Err(EnumerationFailure::Denied),
        Err(e) => return Err(EnumerationFailure::Fault(e.to_string())),
    }

    match transport
        .enumerate_characteristics(service.handle, CacheMode::Uncached)
        .await
    {
        Ok(characteristics) => Ok(characteristics),
        Err(TransportError::Status(status)) => {
            warn!("Characteristic enumeration returned status: {:?}", status);
            Err(EnumerationFailure::Denied)
        }
        Err(e) => Err(EnumerationFailure::Fault(e.to_string())),
    }
}

#[derive(Debug, Default)]
pub struct ServiceCursor {
    selected: Option<ServiceRecord>,
    characteristics: Vec<CharacteristicRecord>,
}

impl ServiceCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the service `token` resolves to among `services`
    pub async fn select(
        &mut self,
        transport: &dyn GattTransport,
        services: &[ServiceRecord],
        token: &str,
    ) -> Result<Selection, ServiceError> {
        let service = resolver::find(services, token)
            .ok_or_else(|| ServiceError::NotFound(token.to_string()))?;

        let characteristics = match read_characteristics(transport, service).await {
            Ok(characteristics) => characteristics,
            Err(EnumerationFailure::Denied) => {
                return Err(ServiceError::AccessDenied(service.name.clone()))
            }
            Err(EnumerationFailure::Fault(message)) => {
                return Err(ServiceError::Restricted(message))
            }
        };

        info!(
            "Selected service {} ({} characteristics)",
            service.name,
            characteristics.len()
        );
        for (i, c) in characteristics.iter().enumerate() {
            info!("#{:02}: {}\t{}", i, c.name, c.properties);
        }

        let count = characteristics.len();
        self.characteristics = characteristics;
        self.selected = Some(service.clone());

        if count == 0 {
            Ok(Selection::EmptyService)
        } else {
            Ok(Selection::Ready {
                characteristics: count,
            })
        }
    }

    pub fn selected(&self) -> Option<&ServiceRecord> {
        self.selected.as_ref()
    }

    pub fn characteristics(&self) -> &[CharacteristicRecord] {
        &self.characteristics
    }

    pub fn clear(&mut self) {
        self.selected = None;
        self.characteristics.clear();
    }
}
