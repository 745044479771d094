//! `DeviceInformation` watcher over Bluetooth LE association endpoints.

use crate::domain::models::DeviceRecord;
use crate::infrastructure::bluetooth::protocol::{
    AQS_ALL_BLE_DEVICES, PROPERTY_IS_CONNECTABLE, REQUESTED_PROPERTIES,
};
use crate::infrastructure::bluetooth::transport::{DiscoveryEvent, DiscoveryWatcher};
use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info};
use windows::core::{IInspectable, Interface, HSTRING};
use windows::Devices::Enumeration::{
    DeviceInformation, DeviceInformationKind, DeviceInformationUpdate, DeviceWatcher,
    DeviceWatcherStatus,
};
use windows::Foundation::Collections::IIterable;
use windows::Foundation::{IReference, TypedEventHandler};

pub struct WinRtWatcher {
    watcher: DeviceWatcher,
}

impl WinRtWatcher {
    /// Create the watcher and route its events into `events`
    pub fn new(events: mpsc::UnboundedSender<DiscoveryEvent>) -> Result<Self> {
        let properties: Vec<HSTRING> = REQUESTED_PROPERTIES
            .iter()
            .map(|p| HSTRING::from(*p))
            .collect();
        let properties: IIterable<HSTRING> = properties.into();

        let watcher = DeviceInformation::CreateWatcherWithKindAqsFilterAndAdditionalProperties(
            &HSTRING::from(AQS_ALL_BLE_DEVICES),
            &properties,
            DeviceInformationKind::AssociationEndpoint,
        )?;

        let sender = events.clone();
        watcher.Added(&TypedEventHandler::new(
            move |_: windows::core::Ref<DeviceWatcher>,
                  info: windows::core::Ref<DeviceInformation>| {
                if let Some(info) = info.as_ref() {
                    let record = DeviceRecord {
                        id: info.Id()?.to_string(),
                        name: info.Name()?.to_string(),
                        connectable: is_connectable(info),
                    };
                    let _ = sender.send(DiscoveryEvent::Added(record));
                }
                Ok(())
            },
        ))?;

        // The watcher needs an Updated handler, even one that only forwards
        let sender = events.clone();
        watcher.Updated(&TypedEventHandler::new(
            move |_: windows::core::Ref<DeviceWatcher>,
                  update: windows::core::Ref<DeviceInformationUpdate>| {
                if let Some(update) = update.as_ref() {
                    let record = DeviceRecord {
                        id: update.Id()?.to_string(),
                        name: String::new(),
                        connectable: false,
                    };
                    let _ = sender.send(DiscoveryEvent::Updated(record));
                }
                Ok(())
            },
        ))?;

        let sender = events.clone();
        watcher.Removed(&TypedEventHandler::new(
            move |_: windows::core::Ref<DeviceWatcher>,
                  update: windows::core::Ref<DeviceInformationUpdate>| {
                if let Some(update) = update.as_ref() {
                    let _ = sender.send(DiscoveryEvent::Removed(update.Id()?.to_string()));
                }
                Ok(())
            },
        ))?;

        let sender = events.clone();
        watcher.EnumerationCompleted(&TypedEventHandler::new(
            move |_: windows::core::Ref<DeviceWatcher>, _: windows::core::Ref<IInspectable>| {
                let _ = sender.send(DiscoveryEvent::EnumerationCompleted);
                Ok(())
            },
        ))?;

        let sender = events;
        watcher.Stopped(&TypedEventHandler::new(
            move |_: windows::core::Ref<DeviceWatcher>, _: windows::core::Ref<IInspectable>| {
                let _ = sender.send(DiscoveryEvent::Stopped);
                Ok(())
            },
        ))?;

        Ok(Self { watcher })
    }
}

fn is_connectable(info: &DeviceInformation) -> bool {
    info.Properties()
        .and_then(|props| props.Lookup(&HSTRING::from(PROPERTY_IS_CONNECTABLE)))
        .and_then(|value| value.cast::<IReference<bool>>())
        .and_then(|value| value.Value())
        .unwrap_or(false)
}

impl DiscoveryWatcher for WinRtWatcher {
    fn start(&mut self) -> Result<()> {
        let status = self.watcher.Status()?;
        if status == DeviceWatcherStatus::Started
            || status == DeviceWatcherStatus::EnumerationCompleted
        {
            return Ok(());
        }
        info!("Starting device watcher");
        self.watcher.Start()?;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let status = self.watcher.Status()?;
        if status == DeviceWatcherStatus::Started
            || status == DeviceWatcherStatus::EnumerationCompleted
        {
            debug!("Stopping device watcher");
            self.watcher.Stop()?;
        }
        Ok(())
    }
}

impl Drop for WinRtWatcher {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
