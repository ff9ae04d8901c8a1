//! Core functionality for the BLE central bridge
//! This module contains the central-role session manager.

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::{BleError, BleEvent, BluetoothManager, DeviceRegistry, RadioPlatform};
