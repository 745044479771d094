//! Reconciled view of the peripherals the discovery watcher currently reports.

use crate::domain::models::DeviceRecord;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceRecord>,
    tracked: Option<String>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a newly discovered device.
    ///
    /// A record is ignored when another record already has the same id *or*
    /// the same name: peripherals that rotate their BLE address show up again
    /// under a fresh id but keep advertising the same name, and are treated as
    /// already known. Returns whether the record was inserted.
    pub fn on_added(&mut self, record: DeviceRecord) -> bool {
        if self
            .devices
            .iter()
            .any(|d| d.id == record.id || d.name == record.name)
        {
            debug!("Ignoring known device {} ({})", record.name, record.id);
            return false;
        }
        self.devices.push(record);
        true
    }

    /// Updates never change identity or name, so they are accepted and dropped.
    pub fn on_updated(&mut self, _record: DeviceRecord) {}

    pub fn on_removed(&mut self, id: &str) -> Option<DeviceRecord> {
        let index = self.devices.iter().position(|d| d.id == id)?;
        Some(self.devices.remove(index))
    }

    /// Named devices ordered by name. This ordering is the index space of
    /// `#NN` tokens and is recomputed on every call.
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        let mut devices: Vec<DeviceRecord> = self
            .devices
            .iter()
            .filter(|d| !d.name.is_empty())
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        devices
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn track(&mut self, id: &str) {
        self.tracked = Some(id.to_string());
    }

    pub fn is_tracked(&self, id: &str) -> bool {
        self.tracked.as_deref() == Some(id)
    }
}

/// Registry shared between the discovery pump (the only writer) and readers.
///
/// Every mutation bumps a generation counter so waiters can sleep until the
/// device list changes instead of busy-polling.
#[derive(Clone)]
pub struct SharedRegistry {
    inner: Arc<Mutex<DeviceRegistry>>,
    generation: Arc<watch::Sender<u64>>,
}

impl Default for SharedRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedRegistry {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(DeviceRegistry::new())),
            generation: Arc::new(generation),
        }
    }

    /// Run a mutation under the registry lock and notify waiters
    pub fn apply<R>(&self, f: impl FnOnce(&mut DeviceRegistry) -> R) -> R {
        let result = {
            let mut registry = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut registry)
        };
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
        result
    }

    /// Read under the registry lock
    pub fn read<R>(&self, f: impl FnOnce(&DeviceRegistry) -> R) -> R {
        let registry = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&registry)
    }

    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        self.read(|r| r.snapshot())
    }

    /// Receiver that observes every change made through `apply`
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }
}
