//! Bluetooth functionality for the BLE central bridge
//! This module handles all bluetooth operations including scanning,
//! connecting, GATT operations and event delivery.

mod bluest_backend;
mod connection;
mod constants;
mod error;
mod events;
mod gatt;
mod manager;
mod platform;
mod registry;
mod scanner;
mod timer;
mod types;
pub mod uuid_normalizer;

#[cfg(test)]
pub(crate) mod fake_platform;
#[cfg(test)]
mod tests;

// Re-export types that should be publicly accessible
pub use bluest_backend::BluestPlatform;
pub use connection::{ConnectionSession, ConnectionSupervisor, GattLink, ServiceCatalog};
pub use constants::*; // Re-export all constants
pub use error::{BleError, PlatformError};
pub use events::{
    radio_channel, BleEvent, EventSink, RadioEvent, RadioEventReceiver, RadioEventSender,
    SharedEventSink,
};
pub use gatt::GattDispatcher;
pub use manager::BluetoothManager;
pub use platform::RadioPlatform;
pub use registry::DeviceRegistry;
pub use scanner::ScanController;
pub use types::{
    AdapterState, Advertisement, ConnectionPriority, ConnectionState, DiscoveredCharacteristic,
    DiscoveredService, GattStatus, GattTarget, LinkState, ScanResult, WriteType,
};
pub use uuid_normalizer::CanonicalUuid;
