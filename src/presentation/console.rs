//! Console rendering of acquisition events.

use crate::domain::models::{
    AcquisitionState, AppEvent, MessageSeverity, StatusMessage, ValueSample,
};
use crate::domain::settings::DisplaySettings;
use crate::domain::values::{format_value, DataFormat};
use std::collections::VecDeque;
use tracing::{debug, info};

/// Bounded history of decoded values. The oldest value is dropped once the
/// buffer is full.
#[derive(Debug, Clone)]
pub struct ValueBuffer {
    values: VecDeque<f64>,
    capacity: usize,
    count: u64,
}

impl ValueBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            count: 0,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
        self.count += 1;
    }

    pub fn current(&self) -> Option<f64> {
        self.values.back().copied()
    }

    /// Samples received since the last `clear`, including evicted ones
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_hot(&self, threshold: f64) -> bool {
        self.current().is_some_and(|v| v > threshold)
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.count = 0;
    }
}

pub struct ConsoleView {
    format: DataFormat,
    hot_threshold: f64,
    buffer: ValueBuffer,
    device_lost: bool,
}

impl ConsoleView {
    pub fn new(settings: &DisplaySettings) -> Self {
        Self {
            format: settings.data_format,
            hot_threshold: settings.hot_threshold,
            buffer: ValueBuffer::new(settings.buffer_capacity),
            device_lost: false,
        }
    }

    /// Apply an event and return the line to print, if any
    pub fn handle(&mut self, event: AppEvent) -> Option<String> {
        match event {
            AppEvent::LogMessage(msg) => Some(Self::status_line(&msg)),
            AppEvent::StateChanged(state) => {
                debug!("Acquisition state: {}", state);
                // A new link starts a fresh history
                if state == AcquisitionState::Connected {
                    self.buffer.clear();
                }
                None
            }
            AppEvent::Value(sample) => Some(self.value_line(sample)),
            AppEvent::DeviceLost(device) => {
                info!("Device {} lost, shutting down", device.name);
                self.device_lost = true;
                Some(format!(" ! {} disconnected", device.name))
            }
        }
    }

    fn status_line(msg: &StatusMessage) -> String {
        let marker = match msg.severity {
            MessageSeverity::Info => ">",
            MessageSeverity::Success => "+",
            MessageSeverity::Warning => "?",
            MessageSeverity::Error => "!",
        };
        format!(" {} {}", marker, msg.message)
    }

    fn value_line(&mut self, sample: ValueSample) -> String {
        self.buffer.push(sample.value);
        let mut line = format!(
            " {}: {} ({})",
            sample.characteristic,
            format_value(&sample.raw, self.format),
            sample.value
        );
        if self.buffer.is_hot(self.hot_threshold) {
            line.push_str(" [hot]");
        }
        line
    }

    pub fn buffer(&self) -> &ValueBuffer {
        &self.buffer
    }

    pub fn device_lost(&self) -> bool {
        self.device_lost
    }
}
