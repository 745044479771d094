//! Bluetooth Service Module
//!
//! Top-level acquisition sequence: wait for a matching device, connect, wait
//! for the matching service, select it (with bounded retries) and subscribe
//! to the matching characteristic.

use crate::domain::errors::SubscribeError;
use crate::domain::models::{
    send_log, AcquisitionState, AppEvent, DeviceRecord, EventSender, MessageSeverity,
    ServiceRecord,
};
use crate::domain::registry::SharedRegistry;
use crate::domain::resolver::name_contains;
use crate::domain::settings::AcquisitionSettings;
use crate::domain::values::ValueDecoder;
use crate::infrastructure::bluetooth::connection::GattSession;
use crate::infrastructure::bluetooth::cursor::Selection;
use crate::infrastructure::bluetooth::protocol::parse_uuid;
use crate::infrastructure::bluetooth::transport::GattTransport;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct AcquisitionOrchestrator {
    session: GattSession,
    registry: SharedRegistry,
    settings: AcquisitionSettings,
    event_sender: EventSender,
    state: AcquisitionState,
    attempts: u32,
}

impl AcquisitionOrchestrator {
    pub fn new(
        transport: Arc<dyn GattTransport>,
        registry: SharedRegistry,
        decoder: Arc<dyn ValueDecoder>,
        event_sender: EventSender,
        settings: AcquisitionSettings,
    ) -> Self {
        let session = GattSession::new(
            transport,
            registry.clone(),
            decoder,
            event_sender.clone(),
            settings.connect_timeout(),
        );
        Self {
            session,
            registry,
            settings,
            event_sender,
            state: AcquisitionState::Idle,
            attempts: 0,
        }
    }

    /// Drive the acquisition, then stay up until `shutdown` flips to true and
    /// tear the session down.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> AcquisitionState {
        let finished = tokio::select! {
            state = self.acquire() => Some(state),
            _ = wait_for_shutdown(&mut shutdown) => None,
        };

        if let Some(state) = finished {
            if state == AcquisitionState::Listening {
                self.send_log("Listening...", MessageSeverity::Success);
            }
            wait_for_shutdown(&mut shutdown).await;
        }

        info!("Shutting down acquisition in state: {}", self.state);
        self.session.close().await;
        self.state
    }

    /// Run the acquisition sequence up to `Listening` or `GivingUp`
    pub async fn acquire(&mut self) -> AcquisitionState {
        self.transition(AcquisitionState::Watching);
        let device = self.wait_for_device().await;
        self.registry.apply(|r| r.track(&device.id));
        info!(
            "Found {} ({}), connectable: {}",
            device.name, device.id, device.connectable
        );
        self.transition(AcquisitionState::DeviceFound);
        self.send_log(format!("Found {}", device.name), MessageSeverity::Info);

        self.transition(AcquisitionState::Connecting);
        if let Err(e) = self.session.open(&device.name).await {
            warn!("Could not open {}: {}", device.name, e);
            return self.give_up();
        }
        self.transition(AcquisitionState::Connected);

        self.transition(AcquisitionState::ServiceSearching);
        let service = self.wait_for_service().await;
        self.transition(AcquisitionState::ServiceFound);
        tokio::time::sleep(self.settings.settle_delay()).await;

        if !self.select_with_retry(&service.name).await {
            return self.give_up();
        }

        let filter = &self.settings.characteristic_name_filter;
        let Some(characteristic) = self
            .session
            .characteristics()
            .iter()
            .find(|c| matches_filter(&c.name, c.uuid, filter))
            .map(|c| c.name.clone())
        else {
            self.send_log(
                format!("No characteristic matching {:?} in {}", filter, service.name),
                MessageSeverity::Error,
            );
            return self.give_up();
        };

        match self.session.subscribe(&characteristic).await {
            Ok(()) | Err(SubscribeError::AlreadySubscribed(_)) => {
                self.transition(AcquisitionState::Listening);
            }
            Err(e) => {
                warn!("Subscription to {} failed: {}", characteristic, e);
                return self.give_up();
            }
        }
        self.state
    }

    /// First snapshot entry whose name contains the device filter. Re-checked
    /// on every registry change and at least once per poll interval.
    async fn wait_for_device(&self) -> DeviceRecord {
        let mut changes = self.registry.changes();
        loop {
            let found = self
                .registry
                .snapshot()
                .into_iter()
                .find(|d| name_contains(&d.name, &self.settings.device_name_filter));
            if let Some(device) = found {
                return device;
            }
            let _ = tokio::time::timeout(self.settings.poll_interval(), changes.changed()).await;
        }
    }

    async fn wait_for_service(&mut self) -> ServiceRecord {
        loop {
            let found = self
                .session
                .services()
                .iter()
                .find(|s| matches_filter(&s.name, s.uuid, &self.settings.service_name_filter))
                .cloned();
            if let Some(service) = found {
                return service;
            }
            debug!(
                "No service matching {:?} yet",
                self.settings.service_name_filter
            );
            tokio::time::sleep(self.settings.poll_interval()).await;
            let _ = self.session.refresh_services().await;
        }
    }

    async fn select_with_retry(&mut self, service: &str) -> bool {
        let max_attempts = self.settings.subscribe_max_attempts;
        for attempt in 1..=max_attempts {
            self.attempts = attempt;
            self.transition(AcquisitionState::Subscribing { attempt });

            match self.session.select_service(service).await {
                Ok(Selection::Ready { .. }) => return true,
                Ok(Selection::EmptyService) => {
                    warn!("Service {} has no characteristics yet", service)
                }
                Err(e) => warn!("Selecting service {} failed: {}", service, e),
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.settings.subscribe_retry_delay()).await;
            }
        }
        false
    }

    fn give_up(&mut self) -> AcquisitionState {
        self.send_log(
            "Could not start listening, giving up.",
            MessageSeverity::Error,
        );
        self.transition(AcquisitionState::GivingUp);
        self.state
    }

    fn transition(&mut self, state: AcquisitionState) {
        info!("Acquisition state: {}", state);
        self.state = state;
        let _ = self.event_sender.send(AppEvent::StateChanged(state));
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// Number of service selection attempts made so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn session(&self) -> &GattSession {
        &self.session
    }

    fn send_log(&self, message: impl Into<String>, severity: MessageSeverity) {
        send_log(&self.event_sender, message, severity);
    }
}

/// Name substring match, or exact match when `filter` parses as a UUID
fn matches_filter(name: &str, uuid: u128, filter: &str) -> bool {
    name_contains(name, filter) || parse_uuid(filter).is_ok_and(|parsed| parsed == uuid)
}

/// Resolves once the flag is set or its sender is gone
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
