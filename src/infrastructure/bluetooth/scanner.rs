//! BLE Scanner Module
//!
//! Applies discovery watcher events to the device registry. The pump is the
//! only writer of the registry; watcher callbacks just enqueue events.

use crate::domain::models::{send_log, AppEvent, EventSender, MessageSeverity};
use crate::domain::registry::SharedRegistry;
use crate::infrastructure::bluetooth::transport::{DiscoveryEvent, DiscoveryWatcher};
use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct DiscoveryPump<W: DiscoveryWatcher> {
    watcher: W,
    registry: SharedRegistry,
    event_sender: EventSender,
}

impl<W: DiscoveryWatcher> DiscoveryPump<W> {
    pub fn new(watcher: W, registry: SharedRegistry, event_sender: EventSender) -> Self {
        Self {
            watcher,
            registry,
            event_sender,
        }
    }

    /// Start the watcher and apply its events until the channel closes
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<DiscoveryEvent>) -> Result<()> {
        info!("Starting device watcher");
        send_log(
            &self.event_sender,
            "Searching device...",
            MessageSeverity::Info,
        );
        self.watcher.start()?;

        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle(event) {
                warn!("Device watcher control failed: {}", e);
            }
        }

        let _ = self.watcher.stop();
        Ok(())
    }

    pub fn handle(&mut self, event: DiscoveryEvent) -> Result<()> {
        match event {
            DiscoveryEvent::Added(record) => {
                let name = record.name.clone();
                if self.registry.apply(|r| r.on_added(record)) {
                    debug!("Device added: {:?}", name);
                }
            }
            DiscoveryEvent::Updated(record) => {
                self.registry.apply(|r| r.on_updated(record));
            }
            DiscoveryEvent::Removed(id) => {
                let (removed, tracked) = self
                    .registry
                    .apply(|r| (r.on_removed(&id), r.is_tracked(&id)));
                if let Some(record) = removed {
                    debug!("Device removed: {:?}", record.name);
                    if tracked {
                        info!("Tracked device {} disappeared", record.name);
                        let _ = self.event_sender.send(AppEvent::DeviceLost(record));
                    }
                }
            }
            DiscoveryEvent::EnumerationCompleted => {
                debug!("Initial enumeration completed, stopping watcher");
                self.watcher.stop()?;
            }
            DiscoveryEvent::Stopped => {
                debug!("Watcher stopped, restarting with a fresh device list");
                self.registry.apply(|r| r.clear());
                self.watcher.start()?;
            }
        }
        Ok(())
    }
}
