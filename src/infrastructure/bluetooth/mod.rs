//! Bluetooth Module
//!
//! Session management for a single BLE GATT peripheral.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 AcquisitionOrchestrator                    │
//! │   watch → connect → find service → select → subscribe     │
//! └─────────────────────┬────────────────────────────────────┘
//!                       │
//!         ┌─────────────┼──────────────┬──────────────┐
//!         │             │              │              │
//!         ▼             ▼              ▼              ▼
//! ┌──────────────┐ ┌────────────┐ ┌──────────┐ ┌──────────────┐
//! │ DiscoveryPump│ │ GattSession│ │  Service │ │ Subscription │
//! │              │ │            │ │  Cursor  │ │   Manager    │
//! │ - registry   │ │ - connect  │ │ - select │ │ - notify on  │
//! │   writer     │ │ - services │ │ - chars  │ │ - priming    │
//! └──────┬───────┘ └─────┬──────┘ └────┬─────┘ └──────┬───────┘
//!        │               └─────────────┼──────────────┘
//!        ▼                             ▼
//!  DiscoveryWatcher               GattTransport
//!  (winrt::DeviceWatcher)         (winrt::WinRtTransport)
//! ```
//!
//! ## Modules
//!
//! - [`transport`] - Platform contracts: discovery events and GATT primitives
//! - [`attributes`] - Stable handles for platform GATT objects
//! - [`protocol`] - Assigned numbers, UUID helpers, discovery filter
//! - [`scanner`] - Applies discovery events to the device registry
//! - [`connection`] - The single open connection and its service table
//! - [`cursor`] - Selected service and its characteristics
//! - [`subscription`] - Notification subscriptions and value forwarding
//! - [`service`] - Acquisition state machine

pub mod attributes;
pub mod connection;
pub mod cursor;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod subscription;
pub mod transport;

#[cfg(windows)]
pub mod winrt;

#[cfg(test)]
pub(crate) mod fake;

// Re-export main service for convenience
pub use service::AcquisitionOrchestrator;
